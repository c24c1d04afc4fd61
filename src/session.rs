//! Remote session lifecycle and the path-safety guard.
//!
//! A [`Session`] owns one authenticated [`Transport`] plus the canonical
//! storage root, uploads root, and protected-path set resolved at open time.
//! Every destructive or placement operation routes candidate paths through
//! [`Session::guard`] before touching the filesystem.

use crate::config::AppConfig;
use crate::errors::{GatewayError, Result, ViolationKind};
use crate::rpath;
use crate::transport::resolver::AddressResolver;
use crate::transport::ssh::{ConnectOptions, SshTransport};
use crate::transport::{RemoteEntry, Transport};

const UPLOADS_DIR: &str = "uploads";
const TRASH_DIR: &str = ".trash";

/// What a delete removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletedKind {
    File,
    Folder,
}

#[derive(Debug, Clone)]
pub struct Deleted {
    pub path: String,
    pub kind: DeletedKind,
}

pub struct Session {
    transport: Box<dyn Transport>,
    root: String,
    uploads: String,
    trash: String,
    protected: Vec<String>,
}

impl Session {
    /// Resolves an address, connects, authenticates, and normalizes the
    /// storage layout. The trash directory is a convenience for future
    /// soft-delete; failing to create it is logged, not fatal.
    pub fn open(config: &AppConfig, resolver: &dyn AddressResolver) -> Result<Self> {
        let (host, port) = resolver.resolve()?;
        let transport = SshTransport::connect(
            &host,
            port,
            &ConnectOptions {
                username: config.username.clone(),
                password: config.password.clone(),
                connect_timeout: config.connect_timeout(),
                keepalive_interval: config.keepalive_interval(),
            },
        )?;
        Self::with_transport(Box::new(transport), &config.root)
    }

    /// Builds a session over an already-open transport. This is the seam the
    /// integration tests use; `open` funnels through it.
    pub fn with_transport(transport: Box<dyn Transport>, root: &str) -> Result<Self> {
        let root = transport.realpath(root)?;

        let uploads_raw = rpath::join(&root, UPLOADS_DIR);
        ensure_remote_dirs(transport.as_ref(), &uploads_raw)?;
        let uploads = transport.realpath(&uploads_raw)?;

        let trash = rpath::join(&uploads, TRASH_DIR);
        if transport.stat(&trash)?.is_none() {
            if let Err(err) = transport.mkdir(&trash) {
                tracing::warn!(path = %trash, error = %err, "could not create trash directory");
            }
        }

        let protected = vec![root.clone(), uploads.clone()];
        Ok(Self {
            transport,
            root,
            uploads,
            trash,
            protected,
        })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn uploads(&self) -> &str {
        &self.uploads
    }

    pub fn trash(&self) -> &str {
        &self.trash
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Canonicalizes `candidate` on the remote host and rejects anything that
    /// escapes the root or targets a protected path. Idempotent and cheap:
    /// recursive deletes call it once per node visited.
    pub fn guard(&self, candidate: &str) -> Result<String> {
        let canonical = self.transport.realpath(candidate)?;
        if !rpath::is_within(&self.root, &canonical) {
            return Err(GatewayError::PathViolation {
                path: canonical,
                kind: ViolationKind::OutsideRoot,
            });
        }
        if self.protected.iter().any(|p| p == &canonical) {
            return Err(GatewayError::PathViolation {
                path: canonical,
                kind: ViolationKind::Protected,
            });
        }
        Ok(canonical)
    }

    /// Resolves a caller-supplied folder: absolute used as-is, relative
    /// joined under the root, absent meaning the root itself.
    pub fn resolve_dir(&self, folder: Option<&str>) -> String {
        match folder {
            Some(f) => rpath::join(&self.root, f),
            None => self.root.clone(),
        }
    }

    /// Structured listing of a folder under the root.
    pub fn list(&self, folder: Option<&str>) -> Result<Vec<RemoteEntry>> {
        let dir = self.resolve_dir(folder);
        let mut entries = self.transport.read_dir(&dir)?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Recursively deletes a file or folder, re-applying the guard at every
    /// node visited. A symlink swapped in below the top-level target between
    /// checks must still be caught, so the re-check is per node, not per call.
    pub fn delete(&self, target: &str, folder: Option<&str>) -> Result<Deleted> {
        let base = self.resolve_dir(folder);
        let raw = rpath::join(&base, target);
        let canonical = self.guard(&raw)?;

        let stat = self
            .transport
            .stat(&canonical)?
            .ok_or_else(|| GatewayError::NotFound {
                path: canonical.clone(),
            })?;

        self.delete_node(&canonical)?;
        tracing::debug!(path = %canonical, "deleted");
        Ok(Deleted {
            path: canonical,
            kind: if stat.is_dir {
                DeletedKind::Folder
            } else {
                DeletedKind::File
            },
        })
    }

    fn delete_node(&self, path: &str) -> Result<()> {
        let canonical = self.guard(path)?;
        let stat = self
            .transport
            .stat(&canonical)?
            .ok_or_else(|| GatewayError::NotFound {
                path: canonical.clone(),
            })?;

        if stat.is_dir {
            for entry in self.transport.read_dir(&canonical)? {
                self.delete_node(&rpath::join(&canonical, &entry.name))?;
            }
            self.transport.remove_dir(&canonical)
        } else {
            self.transport.remove_file(&canonical)
        }
    }

    /// Tears down the file handle then the command handle unconditionally.
    pub fn close(self) {
        self.transport.close();
    }
}

/// Creates every missing ancestor of `path`, shallowest first.
pub fn ensure_remote_dirs(transport: &dyn Transport, path: &str) -> Result<()> {
    for ancestor in rpath::ancestors(path) {
        if transport.stat(&ancestor)?.is_none() {
            transport.mkdir(&ancestor)?;
        }
    }
    Ok(())
}
