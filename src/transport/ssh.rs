//! SSH-backed [`Transport`] built on libssh2.
//!
//! One TCP connection carries both halves of the capability: an exec channel
//! per command and a long-lived SFTP handle for file access. Keepalive is
//! enabled so idle sessions survive NAT/tunnel infrastructure between the
//! gateway and the remote host.

use std::cell::RefCell;
use std::fs::File;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use ssh2::{ErrorCode, OpenFlags, OpenType, RenameFlags, Session, Sftp};

use super::{ExecOutput, ProgressFn, RemoteEntry, RemoteStat, Transport};
use crate::errors::{GatewayError, Result};
use crate::rpath;

const STREAM_BUF_BYTES: usize = 32 * 1024;

/// SFTP status code for "no such file" (SSH_FX_NO_SUCH_FILE).
const FX_NO_SUCH_FILE: i32 = 2;

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub username: String,
    pub password: String,
    pub connect_timeout: Duration,
    pub keepalive_interval: Duration,
}

pub struct SshTransport {
    session: Session,
    // Taken on close so the file handle is torn down before the command
    // channel even when callers forget to drop the transport first.
    sftp: RefCell<Option<Sftp>>,
}

impl SshTransport {
    /// Connects, authenticates, and opens the SFTP subsystem.
    pub fn connect(host: &str, port: u16, opts: &ConnectOptions) -> Result<Self> {
        let tcp = connect_tcp(host, port, opts.connect_timeout)?;

        let mut session = Session::new().map_err(map_ssh)?;
        session.set_tcp_stream(tcp);
        session.handshake().map_err(map_ssh)?;

        session
            .userauth_password(&opts.username, &opts.password)
            .map_err(|_| GatewayError::Authentication {
                username: opts.username.clone(),
            })?;
        if !session.authenticated() {
            return Err(GatewayError::Authentication {
                username: opts.username.clone(),
            });
        }

        let interval = opts.keepalive_interval.as_secs().max(1) as u32;
        session.set_keepalive(true, interval);

        let sftp = session.sftp().map_err(map_ssh)?;
        tracing::debug!(host, port, user = %opts.username, "ssh session established");

        Ok(Self {
            session,
            sftp: RefCell::new(Some(sftp)),
        })
    }

    /// Emits a due keepalive packet. `set_keepalive` only arms the interval;
    /// libssh2 sends nothing until `keepalive_send` is driven, so every
    /// operation entry point pumps it here. A send failure is the session's
    /// problem to report on the operation itself.
    fn heartbeat(&self) {
        let _ = self.session.keepalive_send();
    }

    fn with_sftp<T>(&self, f: impl FnOnce(&Sftp) -> Result<T>) -> Result<T> {
        self.heartbeat();
        let guard = self.sftp.borrow();
        let sftp = guard
            .as_ref()
            .ok_or_else(|| GatewayError::Transport("session is closed".into()))?;
        f(sftp)
    }
}

impl Transport for SshTransport {
    fn exec(&self, command: &str, timeout: Option<Duration>) -> Result<ExecOutput> {
        self.heartbeat();
        if let Some(t) = timeout {
            self.session.set_timeout(t.as_millis() as u32);
        }
        let result = run_command(&self.session, command);
        self.session.set_timeout(0);

        result.map_err(|err| map_exec_error(err, timeout))
    }

    fn stat(&self, path: &str) -> Result<Option<RemoteStat>> {
        self.with_sftp(|sftp| match sftp.stat(Path::new(path)) {
            Ok(st) => Ok(Some(RemoteStat {
                size: st.size.unwrap_or(0),
                is_dir: st.is_dir(),
            })),
            Err(err) if is_no_such_file(&err) => Ok(None),
            Err(err) => Err(map_ssh(err)),
        })
    }

    fn read_dir(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        self.with_sftp(|sftp| {
            let entries = sftp.readdir(Path::new(path)).map_err(|err| {
                if is_no_such_file(&err) {
                    GatewayError::NotFound { path: path.into() }
                } else {
                    map_ssh(err)
                }
            })?;
            Ok(entries
                .into_iter()
                .filter_map(|(p, st)| {
                    let name = p.file_name()?.to_str()?.to_string();
                    Some(RemoteEntry {
                        name,
                        size: st.size.unwrap_or(0),
                        is_dir: st.is_dir(),
                    })
                })
                .collect())
        })
    }

    fn mkdir(&self, path: &str) -> Result<()> {
        self.with_sftp(|sftp| sftp.mkdir(Path::new(path), 0o755).map_err(map_ssh))
    }

    fn remove_file(&self, path: &str) -> Result<()> {
        self.with_sftp(|sftp| {
            sftp.unlink(Path::new(path)).map_err(|err| {
                if is_no_such_file(&err) {
                    GatewayError::NotFound { path: path.into() }
                } else {
                    map_ssh(err)
                }
            })
        })
    }

    fn remove_dir(&self, path: &str) -> Result<()> {
        self.with_sftp(|sftp| {
            sftp.rmdir(Path::new(path)).map_err(|err| {
                if is_no_such_file(&err) {
                    GatewayError::NotFound { path: path.into() }
                } else {
                    map_ssh(err)
                }
            })
        })
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.with_sftp(|sftp| {
            sftp.rename(
                Path::new(from),
                Path::new(to),
                Some(RenameFlags::OVERWRITE | RenameFlags::ATOMIC | RenameFlags::NATIVE),
            )
            .map_err(map_ssh)
        })
    }

    fn realpath(&self, path: &str) -> Result<String> {
        self.with_sftp(|sftp| {
            match sftp.realpath(Path::new(path)) {
                Ok(resolved) => Ok(resolved.to_string_lossy().into_owned()),
                // Servers that refuse REALPATH on a missing final component:
                // canonicalize the parent and re-append the leaf.
                Err(err) if is_no_such_file(&err) => {
                    let parent = rpath::dirname(path);
                    let leaf = rpath::basename(path);
                    let resolved = sftp.realpath(Path::new(parent)).map_err(map_ssh)?;
                    Ok(rpath::join(&resolved.to_string_lossy(), leaf))
                }
                Err(err) => Err(map_ssh(err)),
            }
        })
    }

    fn put(&self, local: &Path, remote: &str, progress: ProgressFn) -> Result<u64> {
        let mut source = File::open(local)?;
        self.with_sftp(|sftp| {
            let mut dest = sftp
                .open_mode(
                    Path::new(remote),
                    OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
                    0o644,
                    OpenType::File,
                )
                .map_err(map_ssh)?;

            let mut buf = [0u8; STREAM_BUF_BYTES];
            let mut transferred = 0u64;
            loop {
                let n = source.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                dest.write_all(&buf[..n])
                    .map_err(|e| GatewayError::Transport(e.to_string()))?;
                transferred += n as u64;
                progress(transferred);
            }
            Ok(transferred)
        })
    }

    fn get(&self, remote: &str, local: &Path, progress: ProgressFn) -> Result<u64> {
        self.with_sftp(|sftp| {
            let mut source = sftp.open(Path::new(remote)).map_err(|err| {
                if is_no_such_file(&err) {
                    GatewayError::NotFound {
                        path: remote.into(),
                    }
                } else {
                    map_ssh(err)
                }
            })?;
            let mut dest = File::create(local)?;

            let mut buf = [0u8; STREAM_BUF_BYTES];
            let mut transferred = 0u64;
            loop {
                let n = source
                    .read(&mut buf)
                    .map_err(|e| GatewayError::Transport(e.to_string()))?;
                if n == 0 {
                    break;
                }
                dest.write_all(&buf[..n])?;
                transferred += n as u64;
                progress(transferred);
            }
            dest.flush()?;
            Ok(transferred)
        })
    }

    fn close(&self) {
        // File handle first, then the command channel. Both are best-effort.
        drop(self.sftp.borrow_mut().take());
        if let Err(err) = self.session.disconnect(None, "closing", None) {
            tracing::warn!(error = %err, "ssh disconnect reported an error");
        }
    }
}

impl Drop for SshTransport {
    fn drop(&mut self) {
        if self.sftp.borrow().is_some() {
            self.close();
        }
    }
}

fn connect_tcp(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|e| GatewayError::Transport(format!("cannot resolve {host}:{port}: {e}")))?;

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    Err(GatewayError::Transport(format!(
        "cannot connect to {host}:{port}: {}",
        last_err.map_or_else(|| "no addresses".into(), |e| e.to_string())
    )))
}

fn run_command(session: &Session, command: &str) -> std::result::Result<ExecOutput, ssh2::Error> {
    let mut channel = session.channel_session()?;
    channel.exec(command)?;

    let mut stdout = String::new();
    channel.read_to_string(&mut stdout).map_err(io_to_ssh)?;
    let mut stderr = String::new();
    channel
        .stderr()
        .read_to_string(&mut stderr)
        .map_err(io_to_ssh)?;

    channel.wait_close()?;
    let exit_code = channel.exit_status()?;

    Ok(ExecOutput {
        stdout,
        stderr,
        exit_code,
    })
}

fn io_to_ssh(err: std::io::Error) -> ssh2::Error {
    ssh2::Error::from_errno(ErrorCode::Session(err.raw_os_error().unwrap_or(-1)))
}

fn is_no_such_file(err: &ssh2::Error) -> bool {
    matches!(err.code(), ErrorCode::SFTP(FX_NO_SUCH_FILE))
}

fn map_ssh(err: ssh2::Error) -> GatewayError {
    GatewayError::Transport(err.to_string())
}

fn map_exec_error(err: ssh2::Error, timeout: Option<Duration>) -> GatewayError {
    // LIBSSH2_ERROR_TIMEOUT
    if matches!(err.code(), ErrorCode::Session(-9)) {
        return GatewayError::Timeout {
            seconds: timeout.map_or(0, |t| t.as_secs()),
        };
    }
    map_ssh(err)
}
