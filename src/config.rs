use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::payload::PayloadFormat;
use crate::sensor::ina219::{
    Calibration, INA219_ADDR_A0, INA219_ADDR_A1, INA219_ADDR_DEFAULT,
};

/// Publish cadence shared by every firmware variant
pub const DEFAULT_INTERVAL_MS: u64 = 5_000;

/// Fixed delay between reconnect attempts
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;

/// Longest the loop sleeps without servicing the transport
pub const DEFAULT_SERVICE_INTERVAL_MS: u64 = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("SSID too long (max 32 chars)")]
    SsidTooLong,
    #[error("password too long (max 64 chars)")]
    PasswordTooLong,
    #[error("broker host too long (max 64 chars)")]
    HostTooLong,
    #[error("client id too long (max 32 chars)")]
    ClientIdTooLong,
    #[error("no zones configured")]
    NoZones,
    #[error("publish interval must be non-zero")]
    ZeroInterval,
    #[error("service interval must be non-zero")]
    ZeroServiceInterval,
    #[error("reconnect delay must be non-zero")]
    ZeroReconnectDelay,
    #[error("duplicate zone id '{0}'")]
    DuplicateZone(String),
    #[error("two zones share sensor address {0:#04x}")]
    DuplicateAddress(u8),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiConfig {
    pub ssid: heapless::String<32>,
    pub password: heapless::String<64>,
}

impl WifiConfig {
    pub fn new(ssid: &str, password: &str) -> Result<Self, ConfigError> {
        let mut ssid_str = heapless::String::new();
        ssid_str
            .push_str(ssid)
            .map_err(|_| ConfigError::SsidTooLong)?;

        let mut password_str = heapless::String::new();
        password_str
            .push_str(password)
            .map_err(|_| ConfigError::PasswordTooLong)?;

        Ok(Self {
            ssid: ssid_str,
            password: password_str,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqttConfig {
    pub host: heapless::String<64>,
    pub port: u16,
    pub client_id: heapless::String<32>,
}

impl MqttConfig {
    pub fn new(host: &str, port: u16, client_id: &str) -> Result<Self, ConfigError> {
        let mut host_str = heapless::String::new();
        host_str
            .push_str(host)
            .map_err(|_| ConfigError::HostTooLong)?;

        let mut client_id_str = heapless::String::new();
        client_id_str
            .push_str(client_id)
            .map_err(|_| ConfigError::ClientIdTooLong)?;

        Ok(Self {
            host: host_str,
            port,
            client_id: client_id_str,
        })
    }

    /// URL in the form the ESP-IDF MQTT client expects
    pub fn broker_url(&self) -> String {
        format!("mqtt://{}:{}", self.host, self.port)
    }
}

/// One physical sensor and where its readings go.
///
/// `topic` is the full per-zone topic for structured payloads, and the
/// prefix under which each metric gets its own subtopic for per-metric
/// payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneConfig {
    pub zone_id: String,
    pub address: u8,
    pub topic: String,
}

impl ZoneConfig {
    pub fn new(zone_id: &str, address: u8, topic: &str) -> Self {
        Self {
            zone_id: zone_id.to_string(),
            address,
            topic: topic.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Delay between consecutive attempts (ms)
    pub delay_ms: u64,

    /// Give up after this many failed attempts; `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Node identifier carried in structured payloads
    pub node_id: String,

    /// Time between publish ticks (ms)
    pub interval_ms: u64,

    /// Upper bound on sleeps between transport service calls (ms)
    pub service_interval_ms: u64,

    pub reconnect: ReconnectPolicy,

    pub format: PayloadFormat,

    pub zones: Vec<ZoneConfig>,

    /// Subscribed after every successful connect, inbound messages are logged
    pub control_topic: Option<String>,

    /// INA219 range used for every zone
    pub calibration: Calibration,
}

impl TelemetryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.zones.is_empty() {
            return Err(ConfigError::NoZones);
        }
        if self.interval_ms == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        // Either one at zero keeps `run()` from ever yielding to the idle task
        if self.service_interval_ms == 0 {
            return Err(ConfigError::ZeroServiceInterval);
        }
        if self.reconnect.delay_ms == 0 {
            return Err(ConfigError::ZeroReconnectDelay);
        }

        for (i, zone) in self.zones.iter().enumerate() {
            for other in &self.zones[i + 1..] {
                if other.zone_id == zone.zone_id {
                    return Err(ConfigError::DuplicateZone(zone.zone_id.clone()));
                }
                if other.address == zone.address {
                    return Err(ConfigError::DuplicateAddress(zone.address));
                }
            }
        }

        Ok(())
    }

    fn base(node_id: &str, format: PayloadFormat, zones: Vec<ZoneConfig>) -> Self {
        Self {
            node_id: node_id.to_string(),
            interval_ms: DEFAULT_INTERVAL_MS,
            service_interval_ms: DEFAULT_SERVICE_INTERVAL_MS,
            reconnect: ReconnectPolicy::default(),
            format,
            zones,
            control_topic: None,
            calibration: Calibration::default(),
        }
    }

    /// Single sensor, five fixed-point string topics plus a status topic
    pub fn per_metric() -> Self {
        Self::base(
            "microgrid",
            PayloadFormat::PerMetric {
                status_topic: Some("microgrid/sensor/status".to_string()),
            },
            vec![ZoneConfig::new(
                "sensor",
                INA219_ADDR_DEFAULT,
                "microgrid/sensor",
            )],
        )
    }

    /// Single sensor, one JSON document per tick
    pub fn single_zone() -> Self {
        let mut config = Self::base(
            "node1",
            PayloadFormat::Structured,
            vec![ZoneConfig::new("zone1", INA219_ADDR_DEFAULT, "/node1/zone1")],
        );
        config.control_topic = Some("/node1/zone1/control".to_string());
        config
    }

    /// Three sensors on one bus, one JSON document per zone per tick
    pub fn three_zone() -> Self {
        Self::base(
            "node1",
            PayloadFormat::Structured,
            vec![
                ZoneConfig::new("zone1", INA219_ADDR_DEFAULT, "/node1/zone1"),
                ZoneConfig::new("zone2", INA219_ADDR_A0, "/node1/zone2"),
                ZoneConfig::new("zone3", INA219_ADDR_A1, "/node1/zone3"),
            ],
        )
    }
}

/// Everything a node needs at boot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub wifi: WifiConfig,
    pub mqtt: MqttConfig,
    pub telemetry: TelemetryConfig,
}

impl NodeConfig {
    pub fn per_metric() -> Result<Self, ConfigError> {
        Ok(Self {
            wifi: default_wifi()?,
            mqtt: MqttConfig::new(broker_host("10.237.57.155"), 1883, "ESP8266_NodeMCU")?,
            telemetry: TelemetryConfig::per_metric(),
        })
    }

    pub fn single_zone() -> Result<Self, ConfigError> {
        Ok(Self {
            wifi: default_wifi()?,
            mqtt: MqttConfig::new(broker_host("192.168.0.105"), 1883, "NodeMCU_Node1_Zone1")?,
            telemetry: TelemetryConfig::single_zone(),
        })
    }

    pub fn three_zone() -> Result<Self, ConfigError> {
        Ok(Self {
            wifi: default_wifi()?,
            mqtt: MqttConfig::new(broker_host("192.168.0.105"), 1883, "NodeMCU_Node1")?,
            telemetry: TelemetryConfig::three_zone(),
        })
    }

    /// Preset chosen by the enabled firmware variant feature
    pub fn from_features() -> Result<Self, ConfigError> {
        if cfg!(feature = "per-metric") {
            Self::per_metric()
        } else if cfg!(feature = "single-zone") {
            Self::single_zone()
        } else {
            Self::three_zone()
        }
    }
}

// Credentials and broker can be baked in at build time
fn default_wifi() -> Result<WifiConfig, ConfigError> {
    WifiConfig::new(
        option_env!("WIFI_SSID").unwrap_or("YOUR_SSID"),
        option_env!("WIFI_PASS").unwrap_or("YOUR_PASSWORD"),
    )
}

fn broker_host(fallback: &'static str) -> &'static str {
    option_env!("MQTT_HOST").unwrap_or(fallback)
}
