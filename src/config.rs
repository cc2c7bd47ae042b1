//! Layered client configuration: serde defaults, an optional TOML file, then
//! `VENUX_*` environment variables (`__` separates nesting levels).

use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::engine::types::OrderStatus;
use crate::error::{ClientError, ClientResult};

pub const CONFIG_PATH_VAR: &str = "VENUX_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "venux";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub url: String,
    pub sender_comp_id: String,
    pub target_comp_id: String,
    pub heartbeat_secs: u64,
    // inbound events buffered between the transport and the dispatcher
    pub event_buffer: usize,
    pub price_decimals: u32,
    pub size_decimals: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: "wss://api.okcoin.cn/ws".to_string(),
            sender_comp_id: "CLIENT".to_string(),
            target_comp_id: "OKSERVER".to_string(),
            heartbeat_secs: 30,
            event_buffer: 1024,
            price_decimals: 2,
            size_decimals: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub ready_poll_interval_ms: u64,
    pub ready_timeout_secs: Option<u64>,
    pub shutdown_grace_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ready_poll_interval_ms: 1000,
            ready_timeout_secs: None,
            shutdown_grace_secs: 30,
        }
    }
}

impl SessionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.ready_poll_interval_ms)
    }

    pub fn ready_timeout(&self) -> Option<Duration> {
        self.ready_timeout_secs.map(Duration::from_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub symbol: String,
    pub first_order_id: u64,
    pub order_status: OrderStatus,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            symbol: "BTC/CNY".to_string(),
            first_order_id: 1,
            order_status: OrderStatus::New,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub transport: TransportConfig,
    pub session: SessionConfig,
    pub demo: DemoConfig,
    pub log_filter: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            session: SessionConfig::default(),
            demo: DemoConfig::default(),
            log_filter: "info".to_string(),
        }
    }
}

impl ClientConfig {
    /// Loads from `$VENUX_CONFIG` (or `venux.toml` if present) plus the environment.
    pub fn load() -> ClientResult<Self> {
        let path = std::env::var(CONFIG_PATH_VAR).ok();
        let file = match path.as_deref() {
            Some(path) => File::with_name(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        let env = Environment::with_prefix("VENUX")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true);
        Self::from_sources(file, env)
    }

    fn from_sources(
        file: File<config::FileSourceFile, config::FileFormat>,
        env: Environment,
    ) -> ClientResult<Self> {
        let cfg: ClientConfig = Config::builder()
            .add_source(file)
            .add_source(env)
            .build()?
            .try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> ClientResult<()> {
        let invalid = |msg: &str| Err(ClientError::ConfigInvalid(msg.to_string()));

        let url = self.transport.url.trim();
        if url.is_empty() {
            return invalid("transport.url is empty");
        }
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return invalid("transport.url must use ws:// or wss://");
        }
        if self.transport.sender_comp_id.is_empty() || self.transport.target_comp_id.is_empty() {
            return invalid("transport sender/target ids must be set");
        }
        if self.transport.event_buffer == 0 {
            return invalid("transport.event_buffer must be positive");
        }
        if self.transport.price_decimals > 18 || self.transport.size_decimals > 18 {
            return invalid("transport decimals must be at most 18");
        }
        if self.session.ready_poll_interval_ms == 0 {
            return invalid("session.ready_poll_interval_ms must be positive");
        }
        if self.demo.symbol.trim().is_empty() {
            return invalid("demo.symbol is empty");
        }
        Ok(())
    }
}
