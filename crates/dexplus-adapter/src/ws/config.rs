/*
[INPUT]:  Connection endpoint, queue sizes, heartbeat and backoff settings
[OUTPUT]: Validated WsConfig consumed by the connection engine
[POS]:    WebSocket layer - engine configuration surface
[UPDATE]: When adding connection options or changing defaults
*/

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{DexError, Result};

/// Configuration for the resilient WebSocket engine.
///
/// Durations are stored in milliseconds so the struct round-trips cleanly
/// through YAML/JSON; use the accessor methods to get `Duration`s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    /// WebSocket endpoint URL (`ws://` or `wss://`). Adapters fill in their
    /// public endpoint when left empty.
    #[serde(default)]
    pub url: String,

    /// Exchange label attached to every log event.
    #[serde(default)]
    pub exchange: String,

    /// Extra HTTP headers sent with the upgrade request.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Upper bound for a single dial attempt (TCP + TLS + upgrade).
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// How often a ping control frame is sent.
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,

    /// Read deadline; any received frame extends it.
    #[serde(default = "default_pong_wait_ms")]
    pub pong_wait_ms: u64,

    /// Deadline applied to every socket write.
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// How long `send` waits for a free queue slot before reporting busy.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// How long an auth handshake may stay pending before it is failed.
    #[serde(default = "default_auth_timeout_ms")]
    pub auth_timeout_ms: u64,

    /// Backoff floor between dial attempts.
    #[serde(default = "default_reconnect_backoff_min_ms")]
    pub reconnect_backoff_min_ms: u64,

    /// Backoff ceiling between dial attempts.
    #[serde(default = "default_reconnect_backoff_max_ms")]
    pub reconnect_backoff_max_ms: u64,

    /// Capacity of the inbound frame queue.
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,

    /// Capacity of the outbound data queue.
    #[serde(default = "default_write_buffer_size")]
    pub write_buffer_size: usize,

    /// Capacity of the outbound auth queue.
    #[serde(default = "default_auth_buffer_size")]
    pub auth_buffer_size: usize,

    /// Number of dispatcher workers.
    #[serde(default = "default_read_workers")]
    pub read_workers: usize,

    /// Inbound frames larger than this are dropped.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Resolve and dial IPv4 addresses only.
    #[serde(default)]
    pub ipv4_only: bool,

    /// Run the auth hook after every successful dial.
    #[serde(default)]
    pub auth_required: bool,

    /// Interval of the pending-send (dead letter) sweep.
    #[serde(default = "default_dead_letter_interval_ms")]
    pub dead_letter_interval_ms: u64,
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_ping_interval_ms() -> u64 {
    15_000
}

fn default_pong_wait_ms() -> u64 {
    45_000
}

fn default_write_timeout_ms() -> u64 {
    5_000
}

fn default_send_timeout_ms() -> u64 {
    1_000
}

fn default_auth_timeout_ms() -> u64 {
    10_000
}

fn default_reconnect_backoff_min_ms() -> u64 {
    500
}

fn default_reconnect_backoff_max_ms() -> u64 {
    10_000
}

fn default_read_buffer_size() -> usize {
    1024
}

fn default_write_buffer_size() -> usize {
    1024
}

fn default_auth_buffer_size() -> usize {
    16
}

fn default_read_workers() -> usize {
    5
}

fn default_max_message_size() -> usize {
    4 << 20
}

fn default_dead_letter_interval_ms() -> u64 {
    20_000
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            exchange: String::new(),
            headers: HashMap::new(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            ping_interval_ms: default_ping_interval_ms(),
            pong_wait_ms: default_pong_wait_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            send_timeout_ms: default_send_timeout_ms(),
            auth_timeout_ms: default_auth_timeout_ms(),
            reconnect_backoff_min_ms: default_reconnect_backoff_min_ms(),
            reconnect_backoff_max_ms: default_reconnect_backoff_max_ms(),
            read_buffer_size: default_read_buffer_size(),
            write_buffer_size: default_write_buffer_size(),
            auth_buffer_size: default_auth_buffer_size(),
            read_workers: default_read_workers(),
            max_message_size: default_max_message_size(),
            ipv4_only: false,
            auth_required: false,
            dead_letter_interval_ms: default_dead_letter_interval_ms(),
        }
    }
}

impl WsConfig {
    /// Creates a new builder.
    pub fn builder() -> WsConfigBuilder {
        WsConfigBuilder::default()
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    pub fn reconnect_backoff_min(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_min_ms)
    }

    pub fn reconnect_backoff_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_max_ms)
    }

    pub fn dead_letter_interval(&self) -> Duration {
        Duration::from_millis(self.dead_letter_interval_ms)
    }

    /// Parse the configured endpoint.
    pub fn endpoint(&self) -> Result<Url> {
        let url = Url::parse(&self.url)?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(DexError::Config(format!(
                "unsupported scheme '{other}', expected ws or wss"
            ))),
        }
    }

    /// Check the configuration for values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.endpoint()?;

        if self.read_buffer_size == 0 || self.write_buffer_size == 0 || self.auth_buffer_size == 0
        {
            return Err(DexError::Config("queue sizes must be non-zero".to_string()));
        }
        if self.read_workers == 0 {
            return Err(DexError::Config("read_workers must be non-zero".to_string()));
        }
        if self.ping_interval_ms == 0 || self.pong_wait_ms == 0 {
            return Err(DexError::Config(
                "ping interval and pong wait must be non-zero".to_string(),
            ));
        }
        if self.reconnect_backoff_min_ms == 0 {
            return Err(DexError::Config(
                "reconnect backoff floor must be non-zero".to_string(),
            ));
        }
        if self.reconnect_backoff_min_ms > self.reconnect_backoff_max_ms {
            return Err(DexError::Config(format!(
                "reconnect backoff floor {}ms exceeds ceiling {}ms",
                self.reconnect_backoff_min_ms, self.reconnect_backoff_max_ms
            )));
        }
        Ok(())
    }
}

/// Builder for `WsConfig`.
#[derive(Debug, Default)]
pub struct WsConfigBuilder {
    config: WsConfig,
}

impl WsConfigBuilder {
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.url = url.into();
        self
    }

    pub fn exchange(mut self, exchange: impl Into<String>) -> Self {
        self.config.exchange = exchange.into();
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.headers.insert(key.into(), value.into());
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.config.ping_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn pong_wait(mut self, wait: Duration) -> Self {
        self.config.pong_wait_ms = wait.as_millis() as u64;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.config.write_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.config.send_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn auth_timeout(mut self, timeout: Duration) -> Self {
        self.config.auth_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn reconnect_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.config.reconnect_backoff_min_ms = min.as_millis() as u64;
        self.config.reconnect_backoff_max_ms = max.as_millis() as u64;
        self
    }

    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    pub fn write_buffer_size(mut self, size: usize) -> Self {
        self.config.write_buffer_size = size;
        self
    }

    pub fn read_workers(mut self, workers: usize) -> Self {
        self.config.read_workers = workers;
        self
    }

    pub fn max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    pub fn ipv4_only(mut self, enabled: bool) -> Self {
        self.config.ipv4_only = enabled;
        self
    }

    pub fn auth_required(mut self, required: bool) -> Self {
        self.config.auth_required = required;
        self
    }

    pub fn dead_letter_interval(mut self, interval: Duration) -> Self {
        self.config.dead_letter_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn build(self) -> WsConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = WsConfig::default();
        assert_eq!(config.ping_interval(), Duration::from_secs(15));
        assert_eq!(config.pong_wait(), Duration::from_secs(45));
        assert_eq!(config.write_timeout(), Duration::from_secs(5));
        assert_eq!(config.reconnect_backoff_min(), Duration::from_millis(500));
        assert_eq!(config.reconnect_backoff_max(), Duration::from_secs(10));
        assert_eq!(config.read_workers, 5);
        assert_eq!(config.max_message_size, 4 * 1024 * 1024);
        assert!(!config.auth_required);
    }

    #[test]
    fn test_config_builder() {
        let config = WsConfig::builder()
            .url("wss://ws.okx.com:8443/ws/v5/public")
            .exchange("okx")
            .read_workers(8)
            .ipv4_only(true)
            .reconnect_backoff(Duration::from_millis(100), Duration::from_secs(2))
            .build();

        assert_eq!(config.exchange, "okx");
        assert_eq!(config.read_workers, 8);
        assert!(config.ipv4_only);
        assert_eq!(config.reconnect_backoff_max_ms, 2_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_bad_values() {
        let bad_scheme = WsConfig::builder().url("https://example.com").build();
        assert!(matches!(bad_scheme.validate(), Err(DexError::Config(_))));

        let bad_url = WsConfig::builder().url("not a url").build();
        assert!(matches!(bad_url.validate(), Err(DexError::UrlParse(_))));

        let inverted = WsConfig::builder()
            .url("wss://example.com/ws")
            .reconnect_backoff(Duration::from_secs(5), Duration::from_secs(1))
            .build();
        assert!(inverted.validate().is_err());

        let no_workers = WsConfig::builder()
            .url("wss://example.com/ws")
            .read_workers(0)
            .build();
        assert!(no_workers.validate().is_err());
    }

    #[test]
    fn test_config_deserialize_fills_defaults() {
        let config: WsConfig =
            serde_json::from_str(r#"{"url":"wss://stream.binance.com:9443/ws","ipv4_only":true}"#)
                .unwrap();
        assert!(config.ipv4_only);
        assert_eq!(config.write_buffer_size, 1024);
        assert_eq!(config.dead_letter_interval(), Duration::from_secs(20));
    }
}
