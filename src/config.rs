//! Configuration schema, defaults, and layered loading.
//!
//! Precedence: defaults < config file < environment (`DRIVEBAY_` prefix).

use anyhow::{ensure, Context, Result};
use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub fn config_path() -> PathBuf {
    ProjectDirs::from("", "", "drivebay")
        .map(|p| p.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("drivebay.toml"))
}

/// Fully resolved gateway configuration after all layers merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// SSH login on the remote host.
    pub username: String,
    pub password: String,
    /// Storage root all operations are confined to.
    pub root: String,
    /// Fixed address; when set, tunnel resolution is skipped.
    pub host: Option<String>,
    pub port: u16,
    /// ngrok API key for tunnel address discovery.
    pub ngrok_api_key: Option<String>,
    pub connect_timeout_secs: u64,
    pub keepalive_interval_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            root: String::new(),
            host: None,
            port: 22,
            ngrok_api_key: None,
            connect_timeout_secs: 10,
            keepalive_interval_secs: 30,
        }
    }
}

impl AppConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    /// Rejects configs that cannot possibly open a session.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.username.is_empty() {
            missing.push("username");
        }
        if self.password.is_empty() {
            missing.push("password");
        }
        if self.root.is_empty() {
            missing.push("root");
        }
        ensure!(
            missing.is_empty(),
            "Missing required configuration: {}",
            missing.join(", ")
        );
        ensure!(
            self.root.starts_with('/'),
            "Invalid config: root must be an absolute remote path"
        );
        ensure!(
            self.host.is_some() || self.ngrok_api_key.is_some(),
            "Invalid config: set host for a direct connection or ngrok_api_key for tunnel discovery"
        );
        ensure!(
            self.connect_timeout_secs > 0,
            "Invalid config: connect_timeout_secs must be > 0"
        );
        Ok(())
    }
}

/// Loads config from defaults/file/env.
pub fn load_config() -> Result<AppConfig> {
    let path = config_path();

    let config: AppConfig = Figment::new()
        .merge(Serialized::defaults(AppConfig::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("DRIVEBAY_"))
        .extract()
        .context("Failed to load configuration")?;

    config.validate()?;

    Ok(config)
}
