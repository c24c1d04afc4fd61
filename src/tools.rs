//! Remote tool availability probing.

use std::time::Duration;

use crate::errors::Result;
use crate::shell;
use crate::transport::Transport;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// True when `name` resolves to a runnable command on the remote host.
pub fn has_tool(transport: &dyn Transport, name: &str) -> Result<bool> {
    let output = transport.exec(
        &format!("command -v {}", shell::quote(name)),
        Some(PROBE_TIMEOUT),
    )?;
    Ok(output.success())
}
