use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use crate::control::{ControlChannel, ImagerSettings, RpcTransport};
use crate::stream::SessionOptions;

const DEFAULT_DEVICE_ADDR: &str = "192.168.0.69";
const DEFAULT_RPC_PORT: u16 = 8080;
const DEFAULT_CLIENT_ADDR: &str = "127.0.0.1";
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_FRAME_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Deserialize, Default)]
struct ClientConfigFile {
    device_addr: Option<String>,
    rpc_port: Option<u16>,
    client_addr: Option<String>,
    timeouts: Option<TimeoutConfigFile>,
    synchronized: Option<bool>,
    imager: Option<ImagerSettings>,
}

#[derive(Debug, Deserialize, Default)]
struct TimeoutConfigFile {
    connect_ms: Option<u64>,
    frame_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub device_addr: String,
    pub rpc_port: u16,
    pub client_addr: String,
    pub connect_timeout: Duration,
    pub frame_timeout: Duration,
    /// Transfer mode callers pass to `DeviceSession::acquire`.
    pub synchronized: bool,
    /// Settings to push before streaming, if any; see
    /// [`ClientConfig::push_imager_settings`].
    pub imager: Option<ImagerSettings>,
}

impl ClientConfig {
    /// Load from the JSON file named by `O3D_CONFIG` (optional), then apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("O3D_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ClientConfigFile) -> Self {
        let timeouts = file.timeouts.unwrap_or_default();
        Self {
            device_addr: file
                .device_addr
                .unwrap_or_else(|| DEFAULT_DEVICE_ADDR.to_string()),
            rpc_port: file.rpc_port.unwrap_or(DEFAULT_RPC_PORT),
            client_addr: file
                .client_addr
                .unwrap_or_else(|| DEFAULT_CLIENT_ADDR.to_string()),
            connect_timeout: Duration::from_millis(
                timeouts.connect_ms.unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
            ),
            frame_timeout: Duration::from_millis(
                timeouts.frame_ms.unwrap_or(DEFAULT_FRAME_TIMEOUT_MS),
            ),
            synchronized: file.synchronized.unwrap_or(false),
            imager: file.imager,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("O3D_DEVICE_ADDR") {
            if !addr.trim().is_empty() {
                self.device_addr = addr.trim().to_string();
            }
        }
        if let Ok(addr) = std::env::var("O3D_CLIENT_ADDR") {
            if !addr.trim().is_empty() {
                self.client_addr = addr.trim().to_string();
            }
        }
        if let Some(port) = env_number::<u16>("O3D_RPC_PORT")? {
            self.rpc_port = port;
        }
        if let Some(ms) = env_number::<u64>("O3D_CONNECT_TIMEOUT_MS")? {
            self.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_number::<u64>("O3D_FRAME_TIMEOUT_MS")? {
            self.frame_timeout = Duration::from_millis(ms);
        }
        if let Ok(flag) = std::env::var("O3D_SYNCHRONIZED") {
            match flag.trim().to_ascii_lowercase().as_str() {
                "" => {}
                "1" | "true" | "yes" => self.synchronized = true,
                "0" | "false" | "no" => self.synchronized = false,
                other => return Err(anyhow!("O3D_SYNCHRONIZED must be a boolean, got '{}'", other)),
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.device_ip()?;
        self.client_addr
            .parse::<IpAddr>()
            .with_context(|| format!("client_addr '{}' is not an IP address", self.client_addr))?;
        if self.rpc_port == 0 {
            return Err(anyhow!("rpc_port must be greater than zero"));
        }
        if self.connect_timeout.is_zero() {
            return Err(anyhow!("connect timeout must be greater than zero"));
        }
        if self.frame_timeout.is_zero() {
            return Err(anyhow!("frame timeout must be greater than zero"));
        }
        Ok(())
    }

    pub fn device_ip(&self) -> Result<IpAddr> {
        self.device_addr
            .parse()
            .with_context(|| format!("device_addr '{}' is not an IP address", self.device_addr))
    }

    /// Endpoint for the external RPC client.
    pub fn rpc_url(&self) -> String {
        format!("http://{}:{}", self.device_addr, self.rpc_port)
    }

    /// Write the configured imager settings to the device. Returns `false`
    /// when the config has none and nothing was sent.
    pub fn push_imager_settings<T: RpcTransport>(
        &self,
        control: &mut ControlChannel<T>,
    ) -> Result<bool> {
        let Some(settings) = &self.imager else {
            return Ok(false);
        };
        control
            .set_imager_settings(settings)
            .context("failed to apply imager settings")?;
        log::info!(
            "imager settings applied (delay {}, integration {}/{})",
            settings.delay_time,
            settings.integration_time_short,
            settings.integration_time_long
        );
        Ok(true)
    }

    pub fn session_options(&self) -> Result<SessionOptions> {
        let mut options = SessionOptions::new(self.device_ip()?, self.client_addr.clone());
        options.connect_timeout = self.connect_timeout;
        options.frame_timeout = self.frame_timeout;
        Ok(options)
    }
}

fn read_config_file(path: &Path) -> Result<ClientConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn env_number<N: std::str::FromStr>(key: &str) -> Result<Option<N>> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a non-negative integer", key)),
        _ => Ok(None),
    }
}
