//! Typed failure taxonomy for the gateway core.
//!
//! Every operation surfaces one of these variants with enough context
//! (offending path, tool name, exit code, stderr) for the caller to render
//! a precise response. Best-effort cleanup failures are logged, never raised.

use thiserror::Error;

/// Why a path was rejected by the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    /// Canonical path escapes the storage root.
    OutsideRoot,
    /// Canonical path equals a protected path (root, uploads root).
    Protected,
}

impl ViolationKind {
    fn describe(self) -> &'static str {
        match self {
            ViolationKind::OutsideRoot => "is outside the storage root",
            ViolationKind::Protected => "is protected and may not be removed",
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("remote host rejected credentials for '{username}'")]
    Authentication { username: String },

    #[error("could not resolve a remote address: {0}")]
    AddressResolution(String),

    #[error("path '{path}' {}", .kind.describe())]
    PathViolation { path: String, kind: ViolationKind },

    #[error("not found: {path}")]
    NotFound { path: String },

    #[error("'{path}' already exists (pass overwrite to replace it)")]
    AlreadyExists { path: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("remote host has no usable '{tool}' command")]
    ToolUnavailable { tool: String },

    #[error("remote download failed (exit {exit_code}): {detail}")]
    Download { exit_code: i32, detail: String },

    #[error("extraction with {tool} failed (exit {exit_code}): {detail}")]
    Extraction {
        tool: String,
        exit_code: i32,
        detail: String,
    },

    #[error("unsupported archive format: '{name}'")]
    UnsupportedFormat { name: String },

    #[error("remote operation timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// True for the two security-relevant refusals that the boundary must
    /// map to a "forbidden" outcome rather than a generic error.
    pub fn is_forbidden(&self) -> bool {
        matches!(self, GatewayError::PathViolation { .. })
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
