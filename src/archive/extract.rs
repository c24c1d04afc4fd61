//! Remote archive extraction with tool fallback and atomic promotion.
//!
//! Extraction always targets a freshly created temp directory; the final
//! directory appears only through a rename of the fully-populated temp, so a
//! reader never observes a half-extracted tree under the final name.

use std::time::Duration;

use crate::archive::kind::{split_stem, ArchiveKind};
use crate::errors::{GatewayError, Result};
use crate::rpath;
use crate::session::{ensure_remote_dirs, Session};
use crate::shell;
use crate::tools::has_tool;
use crate::transfer::temp_token;

const TIMEOUT_EXIT_CODE: i32 = 124;
/// Floor for the channel-level wait so the `timeout` wrapper's exit 124, not
/// a dropped channel, is the limit that fires for short caller timeouts.
const MIN_EXEC_TIMEOUT: Duration = Duration::from_secs(120);

/// One extraction strategy, keyed by the remote command it needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractTool {
    SevenZip,
    Tar,
    Unzip,
    Unrar,
    Unar,
    Gunzip,
    Bunzip2,
    Unxz,
}

impl ExtractTool {
    pub fn command_name(self) -> &'static str {
        match self {
            ExtractTool::SevenZip => "7z",
            ExtractTool::Tar => "tar",
            ExtractTool::Unzip => "unzip",
            ExtractTool::Unrar => "unrar",
            ExtractTool::Unar => "unar",
            ExtractTool::Gunzip => "gunzip",
            ExtractTool::Bunzip2 => "bunzip2",
            ExtractTool::Unxz => "unxz",
        }
    }

    /// Preference order per kind: the universal archiver first where it can
    /// extract in one pass, then format-specific tools. Compressed tarballs
    /// go straight to `tar`, which unpacks both layers at once.
    fn eligible(kind: ArchiveKind) -> &'static [ExtractTool] {
        match kind {
            ArchiveKind::SevenZ => &[ExtractTool::SevenZip],
            ArchiveKind::Zip => &[ExtractTool::SevenZip, ExtractTool::Unzip],
            ArchiveKind::Rar => &[ExtractTool::SevenZip, ExtractTool::Unrar, ExtractTool::Unar],
            ArchiveKind::Tar => &[ExtractTool::SevenZip, ExtractTool::Tar],
            ArchiveKind::TarGz | ArchiveKind::TarBz2 | ArchiveKind::TarXz => &[ExtractTool::Tar],
            ArchiveKind::Gz => &[ExtractTool::SevenZip, ExtractTool::Gunzip],
            ArchiveKind::Bz2 => &[ExtractTool::SevenZip, ExtractTool::Bunzip2],
            ArchiveKind::Xz => &[ExtractTool::SevenZip, ExtractTool::Unxz],
        }
    }

    fn command(self, kind: ArchiveKind, archive: &str, temp_dir: &str, stem: &str) -> String {
        let a = shell::quote(archive);
        let d = shell::quote(temp_dir);
        match self {
            ExtractTool::SevenZip => format!("7z x -y -o{d} {a}"),
            ExtractTool::Tar => {
                let flags = match kind {
                    ArchiveKind::TarGz => "-xzf",
                    ArchiveKind::TarBz2 => "-xjf",
                    ArchiveKind::TarXz => "-xJf",
                    _ => "-xf",
                };
                format!("tar {flags} {a} -C {d}")
            }
            ExtractTool::Unzip => format!("unzip -o {a} -d {d}"),
            ExtractTool::Unrar => format!("unrar x -y {a} {d}/"),
            ExtractTool::Unar => format!("unar -quiet -o {d} {a}"),
            ExtractTool::Gunzip | ExtractTool::Bunzip2 | ExtractTool::Unxz => {
                let out = shell::quote(&rpath::join(temp_dir, stem));
                format!("{} -c {a} > {out}", self.command_name())
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// Destination directory; defaults to the archive's own directory.
    pub dest: Option<String>,
    pub overwrite: bool,
    /// Remove the archive after a successful extraction (best-effort).
    pub delete_archive: bool,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct ExtractReport {
    pub extracted_to: String,
    pub tool: &'static str,
    pub file_count: u64,
    pub total_bytes: u64,
}

pub fn extract(session: &Session, archive: &str, opts: &ExtractOptions) -> Result<ExtractReport> {
    let archive = session.transport().realpath(archive)?;
    if session.transport().stat(&archive)?.is_none() {
        return Err(GatewayError::NotFound { path: archive });
    }

    let name = rpath::basename(&archive).to_string();
    let (stem, kind) = split_stem(&name).ok_or(GatewayError::UnsupportedFormat {
        name: name.clone(),
    })?;
    let stem = stem.to_string();

    let dest = match &opts.dest {
        Some(d) => rpath::join(session.root(), d),
        None => rpath::dirname(&archive).to_string(),
    };
    let final_dir = rpath::join(&dest, &stem);
    let final_exists = session.transport().stat(&final_dir)?.is_some();
    if final_exists && !opts.overwrite {
        return Err(GatewayError::AlreadyExists { path: final_dir });
    }
    // Extraction into an absolute dest is allowed, but the destructive
    // options are not: anything this call will remove must pass the guard.
    if final_exists && opts.overwrite {
        session.guard(&final_dir)?;
    }
    if opts.delete_archive {
        session.guard(&archive)?;
    }

    let tool = select_tool(session, kind)?;

    ensure_remote_dirs(session.transport(), &dest)?;
    let temp_dir = rpath::join(&dest, &format!(".extract-{}-{}", stem, temp_token()));
    session.transport().mkdir(&temp_dir)?;

    let command = tool.command(kind, &archive, &temp_dir, &stem);
    let (command, exec_timeout) = match opts.timeout {
        Some(t) if !t.is_zero() => (
            format!("timeout {}s {}", t.as_secs(), command),
            Some(t.max(MIN_EXEC_TIMEOUT)),
        ),
        _ => (command, None),
    };

    let output = match session.transport().exec(&command, exec_timeout) {
        Ok(output) => output,
        Err(err) => {
            remove_remote_tree(session, &temp_dir);
            return Err(err);
        }
    };
    if !output.success() {
        remove_remote_tree(session, &temp_dir);
        if output.exit_code == TIMEOUT_EXIT_CODE {
            if let Some(t) = opts.timeout {
                return Err(GatewayError::Timeout { seconds: t.as_secs() });
            }
        }
        return Err(GatewayError::Extraction {
            tool: tool.command_name().to_string(),
            exit_code: output.exit_code,
            detail: trimmed_detail(&output.stderr, &output.stdout),
        });
    }

    // Remove the stale final dir only now, immediately before the rename, so
    // a failed extraction never costs the caller their existing data.
    if final_exists {
        remove_remote_tree(session, &final_dir);
    }
    if let Err(err) = session.transport().rename(&temp_dir, &final_dir) {
        remove_remote_tree(session, &temp_dir);
        return Err(err);
    }
    tracing::debug!(archive = %archive, to = %final_dir, tool = tool.command_name(), "extracted");

    if opts.delete_archive {
        if let Err(err) = session.transport().remove_file(&archive) {
            tracing::warn!(path = %archive, error = %err, "archive cleanup failed");
        }
    }

    let (file_count, total_bytes) = measure_tree(session, &final_dir)?;
    Ok(ExtractReport {
        extracted_to: final_dir,
        tool: tool.command_name(),
        file_count,
        total_bytes,
    })
}

fn trimmed_detail(stderr: &str, stdout: &str) -> String {
    if stderr.trim().is_empty() {
        stdout.trim().to_string()
    } else {
        stderr.trim().to_string()
    }
}

fn select_tool(session: &Session, kind: ArchiveKind) -> Result<ExtractTool> {
    let eligible = ExtractTool::eligible(kind);
    for tool in eligible {
        if has_tool(session.transport(), tool.command_name())? {
            return Ok(*tool);
        }
    }
    Err(GatewayError::ToolUnavailable {
        tool: eligible
            .first()
            .map(|t| t.command_name())
            .unwrap_or("7z")
            .to_string(),
    })
}

fn remove_remote_tree(session: &Session, path: &str) {
    let command = format!("rm -rf {}", shell::quote(path));
    match session.transport().exec(&command, Some(Duration::from_secs(30))) {
        Ok(output) if output.success() => {}
        Ok(output) => {
            tracing::warn!(path, stderr = %output.stderr.trim(), "tree cleanup failed");
        }
        Err(err) => tracing::warn!(path, error = %err, "tree cleanup failed"),
    }
}

/// Recursive file count and byte total over the extracted tree.
fn measure_tree(session: &Session, dir: &str) -> Result<(u64, u64)> {
    let q = shell::quote(dir);
    let count = session
        .transport()
        .exec(&format!("find {q} -type f | wc -l"), Some(Duration::from_secs(30)))?;
    let size = session
        .transport()
        .exec(&format!("du -sb {q}"), Some(Duration::from_secs(30)))?;

    let file_count = count.stdout.trim().parse::<u64>().unwrap_or(0);
    let total_bytes = size
        .stdout
        .split_whitespace()
        .next()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    Ok((file_count, total_bytes))
}
