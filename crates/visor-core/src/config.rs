//! Configuration types for the visor runtime
//!
//! All tunable behavior lives here: channel capacities, wireless link
//! parameters, bus socket placement, lifecycle cadence, and cloud endpoint.
//! Components take an immutable snapshot of their section at construction
//! time; there is no runtime reconfiguration.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chunking::{DEFAULT_MAX_MESSAGE_SIZE, MIN_MTU};
use crate::errors::{Result, VisorError};

// ----------------------------------------------------------------------------
// Channel Configuration
// ----------------------------------------------------------------------------

/// Buffer sizes for the typed channels connecting the router to its
/// transports and embedder
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Command channel buffer size (embedder to router)
    pub command_buffer_size: usize,
    /// Event channel buffer size (transports to router)
    pub event_buffer_size: usize,
    /// Effect channel buffer size (router to transports, broadcast)
    pub effect_buffer_size: usize,
    /// App event channel buffer size (router to embedder)
    pub app_event_buffer_size: usize,
    /// Audio frame channel buffer size (embedder to cloud transport)
    pub audio_buffer_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            command_buffer_size: 32,
            event_buffer_size: 128,
            effect_buffer_size: 64,
            app_event_buffer_size: 64,
            audio_buffer_size: 32,
        }
    }
}

impl ChannelConfig {
    /// Small buffers for tests, so backpressure paths are actually exercised
    pub fn testing() -> Self {
        Self {
            command_buffer_size: 4,
            event_buffer_size: 8,
            effect_buffer_size: 8,
            app_event_buffer_size: 8,
            audio_buffer_size: 4,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.command_buffer_size == 0
            || self.event_buffer_size == 0
            || self.effect_buffer_size == 0
            || self.app_event_buffer_size == 0
            || self.audio_buffer_size == 0
        {
            return Err(VisorError::config_error("channel buffer sizes must be > 0"));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Wireless Configuration
// ----------------------------------------------------------------------------

/// Parameters for the handset-facing wireless link
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WirelessConfig {
    /// Advertised device name
    pub device_name: String,
    /// MTU assumed until the central negotiates one
    pub default_mtu: usize,
    /// Fixed delay between outbound chunks
    pub chunk_delay: Duration,
    /// Delay before restarting advertising after a rejected pairing
    pub pairing_backoff: Duration,
    /// Cap on a reassembled inbound message
    pub max_message_size: usize,
}

impl Default for WirelessConfig {
    fn default() -> Self {
        Self {
            device_name: "Visor".to_string(),
            default_mtu: 251,
            chunk_delay: Duration::from_millis(50),
            pairing_backoff: Duration::from_secs(2),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl WirelessConfig {
    /// No pacing or backoff waits, for fast tests
    pub fn testing() -> Self {
        Self {
            chunk_delay: Duration::from_millis(1),
            pairing_backoff: Duration::from_millis(10),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.device_name.is_empty() {
            return Err(VisorError::config_error("device_name must not be empty"));
        }
        if self.default_mtu < MIN_MTU {
            return Err(VisorError::config_error(format!(
                "default_mtu must be at least {}",
                MIN_MTU
            )));
        }
        if self.max_message_size == 0 {
            return Err(VisorError::config_error("max_message_size must be > 0"));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Bus Configuration
// ----------------------------------------------------------------------------

/// Parameters for the local process bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Unix socket the broker listens on
    pub socket_path: String,
    /// Package identity granted manager privileges on the bus
    pub manager_package: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            socket_path: "/tmp/visor-bus.sock".to_string(),
            manager_package: "com.visor.manager".to_string(),
        }
    }
}

impl BusConfig {
    pub fn validate(&self) -> Result<()> {
        if self.socket_path.is_empty() {
            return Err(VisorError::config_error("socket_path must not be empty"));
        }
        if self.manager_package.is_empty() {
            return Err(VisorError::config_error(
                "manager_package must not be empty",
            ));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Lifecycle Configuration
// ----------------------------------------------------------------------------

/// Cadence of app lifecycle housekeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Interval between catalog/process reconciliation passes
    pub reconcile_interval: Duration,
    /// Run app discovery once at startup
    pub discover_on_start: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(5),
            discover_on_start: true,
        }
    }
}

impl LifecycleConfig {
    pub fn testing() -> Self {
        Self {
            reconcile_interval: Duration::from_millis(50),
            discover_on_start: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.reconcile_interval.is_zero() {
            return Err(VisorError::config_error(
                "reconcile_interval must be non-zero",
            ));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Cloud Configuration
// ----------------------------------------------------------------------------

/// Parameters for the cloud session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    /// WebSocket endpoint of the cloud backend
    pub endpoint: String,
    /// Audio frames buffered while the session is down (oldest dropped first)
    pub audio_queue_capacity: usize,
    /// How long an open session may wait for `connection_ack`
    pub ack_timeout: Duration,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://localhost:8002/glasses-ws".to_string(),
            audio_queue_capacity: 100,
            ack_timeout: Duration::from_secs(10),
        }
    }
}

impl CloudConfig {
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.is_empty() {
            return Err(VisorError::config_error("endpoint must not be empty"));
        }
        let parsed = url::Url::parse(&self.endpoint)
            .map_err(|e| VisorError::config_error(format!("invalid endpoint: {}", e)))?;
        match parsed.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(VisorError::config_error(format!(
                    "endpoint scheme must be ws or wss, got {}",
                    other
                )))
            }
        }
        if self.audio_queue_capacity == 0 {
            return Err(VisorError::config_error(
                "audio_queue_capacity must be > 0",
            ));
        }
        if self.ack_timeout.is_zero() {
            return Err(VisorError::config_error("ack_timeout must be non-zero"));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Master Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for a visor instance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VisorConfig {
    pub channels: ChannelConfig,
    pub wireless: WirelessConfig,
    pub bus: BusConfig,
    pub lifecycle: LifecycleConfig,
    pub cloud: CloudConfig,
}

impl VisorConfig {
    /// Preset suitable for integration tests: small buffers, short waits
    pub fn testing() -> Self {
        Self {
            channels: ChannelConfig::testing(),
            wireless: WirelessConfig::testing(),
            bus: BusConfig::default(),
            lifecycle: LifecycleConfig::testing(),
            cloud: CloudConfig::default(),
        }
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.channels.validate()?;
        self.wireless.validate()?;
        self.bus.validate()?;
        self.lifecycle.validate()?;
        self.cloud.validate()?;
        Ok(())
    }

    /// Wrap in an `Arc` for sharing across tasks
    pub fn shared(self) -> SharedVisorConfig {
        Arc::new(self)
    }
}

/// Shared reference to an immutable configuration
pub type SharedVisorConfig = Arc<VisorConfig>;

// ----------------------------------------------------------------------------
// Builder
// ----------------------------------------------------------------------------

/// Builder for assembling a configuration section by section
#[derive(Debug, Default)]
pub struct VisorConfigBuilder {
    config: VisorConfig,
}

impl VisorConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channels(mut self, channels: ChannelConfig) -> Self {
        self.config.channels = channels;
        self
    }

    pub fn wireless(mut self, wireless: WirelessConfig) -> Self {
        self.config.wireless = wireless;
        self
    }

    pub fn bus(mut self, bus: BusConfig) -> Self {
        self.config.bus = bus;
        self
    }

    pub fn lifecycle(mut self, lifecycle: LifecycleConfig) -> Self {
        self.config.lifecycle = lifecycle;
        self
    }

    pub fn cloud(mut self, cloud: CloudConfig) -> Self {
        self.config.cloud = cloud;
        self
    }

    /// Validate and produce the final configuration
    pub fn build(self) -> Result<VisorConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(VisorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_testing_config_is_valid() {
        assert!(VisorConfig::testing().validate().is_ok());
    }

    #[test]
    fn test_testing_config_is_faster() {
        let default = VisorConfig::default();
        let testing = VisorConfig::testing();
        assert!(testing.wireless.chunk_delay < default.wireless.chunk_delay);
        assert!(testing.lifecycle.reconcile_interval < default.lifecycle.reconcile_interval);
        assert!(testing.channels.command_buffer_size < default.channels.command_buffer_size);
    }

    #[test]
    fn test_zero_channel_buffer_rejected() {
        let config = ChannelConfig {
            event_buffer_size: 0,
            ..ChannelConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_small_mtu_rejected() {
        let config = WirelessConfig {
            default_mtu: 3,
            ..WirelessConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_device_name_rejected() {
        let config = WirelessConfig {
            device_name: String::new(),
            ..WirelessConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_websocket_endpoint_rejected() {
        let config = CloudConfig {
            endpoint: "http://localhost:8002".to_string(),
            ..CloudConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unparseable_endpoint_rejected() {
        let config = CloudConfig {
            endpoint: "not a url".to_string(),
            ..CloudConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_reconcile_interval_rejected() {
        let config = LifecycleConfig {
            reconcile_interval: Duration::ZERO,
            ..LifecycleConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder_produces_valid_config() {
        let config = VisorConfigBuilder::new()
            .channels(ChannelConfig::testing())
            .wireless(WirelessConfig::testing())
            .build()
            .unwrap();
        assert_eq!(config.channels.command_buffer_size, 4);
        assert_eq!(config.wireless.chunk_delay, Duration::from_millis(1));
        // Untouched sections keep their defaults.
        assert_eq!(config.cloud.audio_queue_capacity, 100);
    }

    #[test]
    fn test_builder_rejects_invalid_section() {
        let result = VisorConfigBuilder::new()
            .bus(BusConfig {
                socket_path: String::new(),
                ..BusConfig::default()
            })
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_config_serialization_round_trip() {
        let config = VisorConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let restored: VisorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.wireless.device_name, config.wireless.device_name);
        assert_eq!(restored.cloud.endpoint, config.cloud.endpoint);
    }

    #[test]
    fn test_partial_sections_fill_in_defaults() {
        let json = r#"{"cloud": {"endpoint": "wss://cloud.example/ws"}}"#;
        let config: VisorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.cloud.endpoint, "wss://cloud.example/ws");
        assert_eq!(config.cloud.audio_queue_capacity, 100);
        assert_eq!(config.wireless.default_mtu, 251);
    }
}
