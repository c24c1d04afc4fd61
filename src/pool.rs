//! Union-pool branch detection and cross-branch directory placement.
//!
//! A mergerfs pool balances new files only among branches where the target
//! subdirectory already exists, so directories must be mirrored onto every
//! branch before any write lands in the pool.

use std::time::Duration;

use crate::errors::{GatewayError, Result};
use crate::rpath;
use crate::session::Session;
use crate::shell;
use crate::transport::Transport;

const POOL_SOURCE_PREFIX: &str = "mergerfs#";
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Probes the remote host for the branches backing a mergerfs pool. Tries, in
/// order: the mount source of the session root, the first mounted mergerfs
/// source, and finally the static mount table. An empty list means no pool
/// was found, which is not an error — pooling is optional.
pub fn detect_branches(session: &Session) -> Result<Vec<String>> {
    let probes = [
        format!(
            "findmnt -no SOURCE --target {} || true",
            shell::quote(session.root())
        ),
        "findmnt -t fuse.mergerfs -no SOURCE | head -n1 || true".to_string(),
        r"awk '!/^\s*#/ && $1 ~ /^mergerfs#/ {print $1; exit}' /etc/fstab || true".to_string(),
    ];

    for probe in &probes {
        let output = session.transport().exec(probe, Some(PROBE_TIMEOUT))?;
        if let Some(branches) = parse_pool_source(output.stdout.trim()) {
            tracing::debug!(count = branches.len(), "pool branches detected");
            return Ok(branches);
        }
    }
    Ok(Vec::new())
}

/// Parses a `mergerfs#branch1:branch2:...` mount source into its branch
/// list. `None` for anything that is not a mergerfs source.
pub fn parse_pool_source(source: &str) -> Option<Vec<String>> {
    let rest = source.strip_prefix(POOL_SOURCE_PREFIX)?;
    let branches: Vec<String> = rest
        .split(':')
        .filter(|b| !b.is_empty())
        .map(str::to_string)
        .collect();
    if branches.is_empty() {
        None
    } else {
        Some(branches)
    }
}

/// Mirrors `subpath` onto every branch with one batched remote command.
/// `subpath` must be relative and free of parent traversals; branches are
/// trusted mount points from [`detect_branches`].
pub fn ensure_pool_dirs(
    transport: &dyn Transport,
    subpath: &str,
    branches: &[String],
) -> Result<()> {
    if subpath.starts_with('/') || subpath.split('/').any(|seg| seg == "..") {
        return Err(GatewayError::InvalidInput(format!(
            "pool subpath '{subpath}' must be relative and must not traverse upward"
        )));
    }
    if branches.is_empty() {
        return Ok(());
    }

    let command = branches
        .iter()
        .map(|branch| format!("mkdir -p {}", shell::quote(&rpath::join(branch, subpath))))
        .collect::<Vec<_>>()
        .join(" && ");
    let output = transport.exec(&command, Some(Duration::from_secs(10)))?;
    if !output.success() {
        return Err(GatewayError::Transport(format!(
            "pool mkdir failed (exit {}): {}",
            output.exit_code,
            output.stderr.trim()
        )));
    }
    tracing::debug!(subpath, branches = branches.len(), "pool dirs ensured");
    Ok(())
}
