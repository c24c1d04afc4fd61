//! Quoting for commands executed on the remote shell.

/// Wraps `value` in single quotes, escaping embedded single quotes with the
/// standard `'\''` dance. Safe for any byte sequence except NUL.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}
