//! Seams between the telemetry loop and the network stack.
//!
//! The ESP-IDF WiFi and MQTT clients implement these on the device, tests
//! use in-memory doubles.

use thiserror::Error;

use crate::config::WifiConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    #[error("WiFi join failed: {0}")]
    JoinFailed(String),
    #[error("network interface did not come up: {0}")]
    InterfaceDown(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("broker connection failed: {0}")]
    ConnectFailed(String),
    #[error("not connected to broker")]
    NotConnected,
    #[error("publish to '{topic}' failed: {reason}")]
    PublishFailed { topic: String, reason: String },
    #[error("subscribe to '{topic}' failed: {reason}")]
    SubscribeFailed { topic: String, reason: String },
    #[error("operation not supported by this transport")]
    Unsupported,
}

/// Wireless link the broker session rides on
pub trait NetworkSession {
    fn connected(&self) -> bool;

    fn connect(&mut self, credentials: &WifiConfig) -> Result<(), NetworkError>;
}

/// Broker session used to publish readings
pub trait TelemetryTransport {
    fn connected(&self) -> bool;

    fn connect(&mut self, client_id: &str) -> Result<(), TransportError>;

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError>;

    /// Must be called regularly to move inbound and outbound session state
    fn service(&mut self);

    fn subscribe(&mut self, _topic: &str) -> Result<(), TransportError> {
        Err(TransportError::Unsupported)
    }
}
