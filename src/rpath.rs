//! POSIX path arithmetic for remote paths.
//!
//! Remote paths are plain strings, never `std::path::Path`: the remote host is
//! always POSIX regardless of where the gateway runs, and `Path` semantics
//! (separators, prefixes) follow the local OS.

/// Joins `rel` under `base`. An absolute `rel` replaces `base` entirely.
pub fn join(base: &str, rel: &str) -> String {
    if rel.starts_with('/') {
        return rel.to_string();
    }
    if rel.is_empty() {
        return base.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), rel)
}

/// Final component of a path, empty for `/`.
pub fn basename(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or("")
}

/// Everything before the final component; `/` for top-level paths.
pub fn dirname(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => "/",
        Some(idx) => &trimmed[..idx],
        None => "/",
    }
}

/// Every ancestor of `path` from shallowest to the path itself,
/// e.g. `/a/b/c` yields `/a`, `/a/b`, `/a/b/c`. Used to mkdir-walk.
pub fn ancestors(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for part in path.split('/').filter(|p| !p.is_empty()) {
        current.push('/');
        current.push_str(part);
        out.push(current.clone());
    }
    out
}

/// True when `candidate` is `root` itself or strictly inside it.
/// Both sides must already be canonical.
pub fn is_within(root: &str, candidate: &str) -> bool {
    candidate == root || candidate.starts_with(&format!("{}/", root.trim_end_matches('/')))
}
