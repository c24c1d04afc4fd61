//! URL-triggered fetch executed entirely on the remote host.
//!
//! No payload bytes pass through the gateway process: the remote host pulls
//! the URL itself with `curl` (or `wget` when curl is absent), writes to a
//! tokened temp name, and the gateway promotes it with one rename.

use std::time::Duration;

use percent_encoding::percent_decode_str;
use url::Url;

use crate::archive::{self, ExtractOptions, ExtractReport};
use crate::errors::{GatewayError, Result};
use crate::rpath;
use crate::session::{ensure_remote_dirs, Session};
use crate::shell;
use crate::tools::has_tool;
use crate::transfer::temp_token;

const FALLBACK_FILENAME: &str = "download.bin";
const MAX_FILENAME_LEN: usize = 200;
/// `timeout(1)` exits with 124 when the wrapped command overruns.
const TIMEOUT_EXIT_CODE: i32 = 124;
const MIN_EXEC_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct FetchRequest<'a> {
    pub url: &'a str,
    /// Absolute used as-is, relative joined under the root, `None` = root.
    pub target_dir: Option<&'a str>,
    /// Remote filename override. Sanitized the same way a guessed name is
    /// (separators stripped, unsafe characters replaced, length clamped),
    /// so the stored name can differ from the one supplied.
    pub filename: Option<&'a str>,
    pub overwrite: bool,
    pub timeout: Option<Duration>,
    pub auto_extract: bool,
    /// When false (default) an extraction failure is attached to the report
    /// instead of failing the already-successful download.
    pub raise_extract_errors: bool,
}

impl<'a> FetchRequest<'a> {
    pub fn new(url: &'a str) -> Self {
        Self {
            url,
            target_dir: None,
            filename: None,
            overwrite: false,
            timeout: None,
            auto_extract: false,
            raise_extract_errors: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchReport {
    pub remote_path: String,
    pub bytes: u64,
    pub extracted: Option<ExtractReport>,
    pub extract_error: Option<String>,
}

pub fn fetch_url(session: &Session, request: &FetchRequest) -> Result<FetchReport> {
    let url = Url::parse(request.url)
        .map_err(|e| GatewayError::InvalidInput(format!("bad URL: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(GatewayError::InvalidInput(format!(
            "only http(s) URLs are allowed, got '{}'",
            url.scheme()
        )));
    }

    let target = session.resolve_dir(request.target_dir);
    prepare_target_dir(session, &target)?;

    let name = match request.filename {
        Some(given) => sanitize_filename(given),
        None => guess_filename_from_url(&url),
    };
    let final_path = rpath::join(&target, &name);
    if session.transport().stat(&final_path)?.is_some() && !request.overwrite {
        return Err(GatewayError::AlreadyExists { path: final_path });
    }

    let temp_path = format!("{}.part.{}", final_path, temp_token());
    run_remote_fetch(session, &url, &temp_path, request.timeout)?;

    let bytes = match session.transport().stat(&temp_path)? {
        None => {
            return Err(GatewayError::Download {
                exit_code: 0,
                detail: "fetch reported success but produced no file".into(),
            })
        }
        Some(stat) if stat.size == 0 => {
            remove_remote_temp(session, &temp_path);
            return Err(GatewayError::Download {
                exit_code: 0,
                detail: "fetch produced an empty file (content may require cookies or auth)"
                    .into(),
            });
        }
        Some(stat) => stat.size,
    };

    if let Err(err) = session.transport().rename(&temp_path, &final_path) {
        remove_remote_temp(session, &temp_path);
        return Err(err);
    }
    tracing::debug!(url = %url, remote = %final_path, bytes, "remote fetch complete");

    let mut report = FetchReport {
        remote_path: final_path.clone(),
        bytes,
        extracted: None,
        extract_error: None,
    };

    if request.auto_extract && archive::ArchiveKind::from_name(&name).is_some() {
        match archive::extract(session, &final_path, &ExtractOptions::default()) {
            Ok(extracted) => report.extracted = Some(extracted),
            Err(err) if request.raise_extract_errors => return Err(err),
            Err(err) => {
                tracing::warn!(archive = %final_path, error = %err, "auto-extract failed");
                report.extract_error = Some(err.to_string());
            }
        }
    }

    Ok(report)
}

/// Creates the target directory through both interfaces and verifies it is
/// actually listable. Pooled filesystems sometimes expose a directory to the
/// shell before the SFTP subsystem sees it, or vice versa.
fn prepare_target_dir(session: &Session, target: &str) -> Result<()> {
    ensure_remote_dirs(session.transport(), target)?;
    session.transport().exec(
        &format!("mkdir -p {}", shell::quote(target)),
        Some(Duration::from_secs(10)),
    )?;
    session.transport().read_dir(target).map_err(|err| {
        GatewayError::Transport(format!("target dir '{target}' is not listable: {err}"))
    })?;
    Ok(())
}

fn run_remote_fetch(
    session: &Session,
    url: &Url,
    temp_path: &str,
    timeout: Option<Duration>,
) -> Result<()> {
    let fetch_cmd = if has_tool(session.transport(), "curl")? {
        format!(
            "curl -L --fail --retry 2 --speed-time 30 --speed-limit 1024 -o {} {}",
            shell::quote(temp_path),
            shell::quote(url.as_str()),
        )
    } else if has_tool(session.transport(), "wget")? {
        format!(
            "wget --tries=3 --timeout=60 -O {} {}",
            shell::quote(temp_path),
            shell::quote(url.as_str()),
        )
    } else {
        return Err(GatewayError::ToolUnavailable {
            tool: "curl".into(),
        });
    };

    let (command, exec_timeout) = match timeout {
        Some(t) if !t.is_zero() => (
            format!("timeout {}s {}", t.as_secs(), fetch_cmd),
            Some(t.max(MIN_EXEC_TIMEOUT)),
        ),
        _ => (fetch_cmd, None),
    };

    let output = session.transport().exec(&command, exec_timeout)?;
    if !output.success() {
        remove_remote_temp(session, temp_path);
        if output.exit_code == TIMEOUT_EXIT_CODE {
            if let Some(t) = timeout {
                return Err(GatewayError::Timeout { seconds: t.as_secs() });
            }
        }
        let detail = if output.stderr.trim().is_empty() {
            output.stdout.trim().to_string()
        } else {
            output.stderr.trim().to_string()
        };
        return Err(GatewayError::Download {
            exit_code: output.exit_code,
            detail,
        });
    }
    Ok(())
}

fn remove_remote_temp(session: &Session, path: &str) {
    if let Err(err) = session.transport().remove_file(path) {
        tracing::warn!(path, error = %err, "remote temp cleanup failed");
    }
}

/// Best-effort filename from the URL path: percent-decoded, stripped of any
/// path separators (including foreign-OS backslashes), reduced to a
/// conservative character set, length-clamped, with a sentinel fallback.
pub fn guess_filename_from_url(url: &Url) -> String {
    let decoded = percent_decode_str(url.path())
        .decode_utf8()
        .map(|s| s.into_owned())
        .unwrap_or_default();
    let trimmed = decoded.trim_end_matches('/');
    let leaf = trimmed
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("");
    sanitize_filename(leaf)
}

fn sanitize_filename(raw: &str) -> String {
    let leaf = raw.rsplit(['/', '\\']).next().unwrap_or("");
    let mut name: String = leaf
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if name.is_empty() || name == "." || name == ".." {
        return FALLBACK_FILENAME.to_string();
    }

    if name.len() > MAX_FILENAME_LEN {
        // Keep the extension when trimming very long names.
        let (stem, ext) = match name.rfind('.') {
            Some(idx) if idx > 0 => (name[..idx].to_string(), name[idx..].to_string()),
            _ => (name.clone(), String::new()),
        };
        let keep = MAX_FILENAME_LEN.saturating_sub(ext.len());
        name = format!("{}{}", &stem[..keep.min(stem.len())], ext);
    }
    name
}
