//! Atomic single-file upload and download.
//!
//! Both directions write to a temp name carrying a fresh random token and
//! promote it with a single rename, so the final name never exists as a
//! partial artifact. Failures remove the temp best-effort and propagate;
//! retry policy belongs to the caller.

use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{GatewayError, Result};
use crate::rpath;
use crate::session::{ensure_remote_dirs, Session};
use crate::transfer::progress::{ProgressCounter, ProgressObserver};
use crate::transfer::temp_token;

#[derive(Debug, Clone)]
pub struct UploadReport {
    pub remote_path: String,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct DownloadReport {
    pub local_path: PathBuf,
    pub bytes: u64,
}

/// Uploads `local` into `folder` (absolute used as-is, relative joined under
/// the root), creating missing remote directories.
pub fn upload(
    session: &Session,
    local: &Path,
    folder: Option<&str>,
    remote_name: Option<&str>,
    overwrite: bool,
    observer: Option<ProgressObserver>,
) -> Result<UploadReport> {
    if !local.is_file() {
        return Err(GatewayError::NotFound {
            path: local.display().to_string(),
        });
    }
    let name = match remote_name {
        Some(n) => n.to_string(),
        None => local
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| GatewayError::InvalidInput("local path has no file name".into()))?,
    };

    let dir = session.resolve_dir(folder);
    ensure_remote_dirs(session.transport(), &dir)?;

    let final_path = rpath::join(&dir, &name);
    if session.transport().stat(&final_path)?.is_some() && !overwrite {
        return Err(GatewayError::AlreadyExists { path: final_path });
    }

    let size = fs::metadata(local)?.len();
    let temp_path = format!("{}.part-{}", final_path, temp_token());
    let counter = ProgressCounter::new(size, observer);

    let put = session
        .transport()
        .put(local, &temp_path, &|cumulative| counter.advance_to(cumulative));
    if let Err(err) = put {
        remove_remote_temp(session, &temp_path);
        return Err(err);
    }

    if let Err(err) = session.transport().rename(&temp_path, &final_path) {
        remove_remote_temp(session, &temp_path);
        return Err(err);
    }
    counter.finish();

    tracing::debug!(local = %local.display(), remote = %final_path, size, "upload complete");
    Ok(UploadReport {
        remote_path: final_path,
        bytes: size,
    })
}

/// Downloads a remote file, staging it locally under a temp name and renaming
/// into place only after the full transfer completes.
pub fn download(
    session: &Session,
    remote_name: &str,
    folder: Option<&str>,
    local: Option<&Path>,
    overwrite: bool,
    observer: Option<ProgressObserver>,
) -> Result<DownloadReport> {
    let dir = session.resolve_dir(folder);
    let remote_path = rpath::join(&dir, remote_name);

    let stat = session
        .transport()
        .stat(&remote_path)?
        .ok_or_else(|| GatewayError::NotFound {
            path: remote_path.clone(),
        })?;

    let local_path = match local {
        Some(p) => p.to_path_buf(),
        None => PathBuf::from(rpath::basename(remote_name)),
    };
    if local_path.exists() && !overwrite {
        return Err(GatewayError::AlreadyExists {
            path: local_path.display().to_string(),
        });
    }
    if let Some(parent) = local_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let file_name = local_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| GatewayError::InvalidInput("destination has no file name".into()))?;
    let temp_path = local_path.with_file_name(format!("{}.part-{}", file_name, temp_token()));

    let counter = ProgressCounter::new(stat.size, observer);
    let get = session
        .transport()
        .get(&remote_path, &temp_path, &|cumulative| {
            counter.advance_to(cumulative)
        });
    if let Err(err) = get {
        if let Err(cleanup) = fs::remove_file(&temp_path) {
            tracing::warn!(path = %temp_path.display(), error = %cleanup, "temp cleanup failed");
        }
        return Err(err);
    }

    fs::rename(&temp_path, &local_path)?;
    counter.finish();

    tracing::debug!(remote = %remote_path, local = %local_path.display(), "download complete");
    Ok(DownloadReport {
        local_path,
        bytes: stat.size,
    })
}

fn remove_remote_temp(session: &Session, path: &str) {
    if let Err(err) = session.transport().remove_file(path) {
        tracing::warn!(path, error = %err, "remote temp cleanup failed");
    }
}
