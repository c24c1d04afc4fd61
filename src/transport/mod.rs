//! The remote capability seam.
//!
//! The gateway core never talks to SSH directly; it drives a [`Transport`],
//! which bundles the two primitives every operation is built from: remote
//! command execution and remote file access. The shipped implementation is
//! [`ssh::SshTransport`]; tests substitute an in-memory one.

pub mod resolver;
pub mod ssh;

use std::path::Path;
use std::time::Duration;

use crate::errors::Result;

/// Captured result of one remote command.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Remote stat result. `None` from [`Transport::stat`] means "not found";
/// any other failure is an error.
#[derive(Debug, Clone, Copy)]
pub struct RemoteStat {
    pub size: u64,
    pub is_dir: bool,
}

/// One entry of a remote directory listing.
#[derive(Debug, Clone)]
pub struct RemoteEntry {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
}

/// Cumulative-byte progress callback invoked during streaming transfers.
/// May be called from transfer-internal context; the final call repeats the
/// total and must be tolerated more than once.
pub type ProgressFn<'a> = &'a (dyn Fn(u64) + Send + Sync);

/// One authenticated command+file channel to the remote host.
///
/// All paths are remote POSIX strings. Implementations own the underlying
/// connection; `close` must tear everything down unconditionally.
pub trait Transport {
    /// Runs `command` through the remote shell. A `timeout` bounds the wait
    /// for completion; expiry surfaces as [`GatewayError::Timeout`].
    ///
    /// [`GatewayError::Timeout`]: crate::errors::GatewayError::Timeout
    fn exec(&self, command: &str, timeout: Option<Duration>) -> Result<ExecOutput>;

    /// Stats a remote path; `Ok(None)` when it does not exist.
    fn stat(&self, path: &str) -> Result<Option<RemoteStat>>;

    fn read_dir(&self, path: &str) -> Result<Vec<RemoteEntry>>;

    /// Creates a single directory (parent must exist).
    fn mkdir(&self, path: &str) -> Result<()>;

    fn remove_file(&self, path: &str) -> Result<()>;

    /// Removes an empty directory.
    fn remove_dir(&self, path: &str) -> Result<()>;

    /// Atomic rename; replaces `to` when it exists.
    fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Server-side canonicalization: resolves `..` segments and symlinks the
    /// way the remote filesystem sees them. Must work for paths whose final
    /// component does not exist yet.
    fn realpath(&self, path: &str) -> Result<String>;

    /// Streams a local file to `remote`, reporting cumulative bytes.
    fn put(&self, local: &Path, remote: &str, progress: ProgressFn) -> Result<u64>;

    /// Streams `remote` into a local file, reporting cumulative bytes.
    fn get(&self, remote: &str, local: &Path, progress: ProgressFn) -> Result<u64>;

    /// Tears down the file handle then the command handle, unconditionally.
    fn close(&self);
}
