//! Public address discovery for the remote host.
//!
//! The host usually sits behind a TCP tunnel, so the gateway asks an external
//! resolver for the current `(host, port)` pair before connecting. A fixed
//! address from config bypasses the lookup entirely.

use std::time::Duration;

use serde::Deserialize;

use crate::errors::{GatewayError, Result};

const NGROK_TUNNELS_URL: &str = "https://api.ngrok.com/tunnels";
const RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Produces the remote endpoint to dial.
pub trait AddressResolver {
    fn resolve(&self) -> Result<(String, u16)>;
}

/// Fixed `host:port` taken from configuration.
pub struct StaticResolver {
    host: String,
    port: u16,
}

impl StaticResolver {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl AddressResolver for StaticResolver {
    fn resolve(&self) -> Result<(String, u16)> {
        Ok((self.host.clone(), self.port))
    }
}

#[derive(Debug, Deserialize)]
struct TunnelList {
    #[serde(default)]
    tunnels: Vec<Tunnel>,
}

#[derive(Debug, Deserialize)]
struct Tunnel {
    proto: String,
    public_url: String,
}

/// Queries the ngrok API for the first active TCP tunnel.
pub struct NgrokResolver {
    api_key: String,
}

impl NgrokResolver {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }
}

impl AddressResolver for NgrokResolver {
    fn resolve(&self) -> Result<(String, u16)> {
        let client = reqwest::blocking::Client::builder()
            .timeout(RESOLVE_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::AddressResolution(e.to_string()))?;

        let response = client
            .get(NGROK_TUNNELS_URL)
            .bearer_auth(&self.api_key)
            .header("Ngrok-Version", "2")
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| GatewayError::AddressResolution(format!("ngrok query failed: {e}")))?;

        let list: TunnelList = response
            .json()
            .map_err(|e| GatewayError::AddressResolution(format!("ngrok response: {e}")))?;

        let tunnel = list
            .tunnels
            .into_iter()
            .find(|t| t.proto == "tcp")
            .ok_or_else(|| GatewayError::AddressResolution("no active TCP tunnel".into()))?;

        let (host, port) = parse_tcp_url(&tunnel.public_url)?;
        tracing::debug!(host, port, "resolved tunnel address");
        Ok((host, port))
    }
}

fn parse_tcp_url(public_url: &str) -> Result<(String, u16)> {
    let address = public_url.strip_prefix("tcp://").ok_or_else(|| {
        GatewayError::AddressResolution(format!("unexpected tunnel url '{public_url}'"))
    })?;
    let (host, port) = address.split_once(':').ok_or_else(|| {
        GatewayError::AddressResolution(format!("tunnel url '{public_url}' has no port"))
    })?;
    let port = port.parse::<u16>().map_err(|_| {
        GatewayError::AddressResolution(format!("tunnel url '{public_url}' has a bad port"))
    })?;
    Ok((host.to_string(), port))
}
