//! ESP32 INA219 Telemetry Node Library
//!
//! Reads INA219 current/power sensors over I2C and publishes the readings
//! to an MQTT broker on a fixed interval. The loop and payload logic are
//! platform independent; the WiFi and MQTT glue only builds for ESP-IDF.

pub mod clock;
pub mod config;
pub mod link;
pub mod payload;
pub mod sensor;
pub mod telemetry;

#[cfg(target_os = "espidf")]
pub mod mqtt;
#[cfg(target_os = "espidf")]
pub mod wifi;

pub use clock::{Clock, SystemClock};
pub use config::{
    ConfigError, MqttConfig, NodeConfig, ReconnectPolicy, TelemetryConfig, WifiConfig, ZoneConfig,
};
pub use link::{NetworkError, NetworkSession, TelemetryTransport, TransportError};
pub use payload::{LinkStatus, Message, Metric, PayloadError, PayloadFormat, ZonePayload};
pub use sensor::{Calibration, Ina219, Reading, SensorError, SensorReader, SimulatedSensor};
pub use telemetry::{
    Connectivity, PublishOutcome, StepOutcome, TelemetryError, TelemetryLoop, TickReport,
};

#[cfg(target_os = "espidf")]
pub use mqtt::MqttClient;
#[cfg(target_os = "espidf")]
pub use wifi::WifiManager;
