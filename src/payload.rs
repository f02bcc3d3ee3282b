//! Payload encodings for a zone's reading.
//!
//! Two formats are supported: one fixed-point string per metric on its own
//! subtopic, or a single JSON document per zone.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ZoneConfig;
use crate::sensor::Reading;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadFormat {
    /// Five decimal strings under the zone's topic prefix, followed by an
    /// aggregate status on `status_topic` once all zones are published
    PerMetric { status_topic: Option<String> },
    /// One [`ZonePayload`] document on the zone's topic
    Structured,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    BusVoltage,
    ShuntVoltage,
    LoadVoltage,
    Current,
    Power,
}

impl Metric {
    pub const ALL: [Metric; 5] = [
        Metric::BusVoltage,
        Metric::ShuntVoltage,
        Metric::LoadVoltage,
        Metric::Current,
        Metric::Power,
    ];

    pub fn topic_suffix(self) -> &'static str {
        match self {
            Metric::BusVoltage => "bus_voltage",
            Metric::ShuntVoltage => "shunt_voltage",
            Metric::LoadVoltage => "load_voltage",
            Metric::Current => "current",
            Metric::Power => "power",
        }
    }

    pub fn value(self, reading: &Reading) -> f32 {
        match self {
            Metric::BusVoltage => reading.bus_voltage,
            Metric::ShuntVoltage => reading.shunt_voltage,
            Metric::LoadVoltage => reading.load_voltage(),
            Metric::Current => reading.current_ma,
            Metric::Power => reading.power_mw,
        }
    }
}

/// Aggregate outcome of one tick's publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Online,
    Error,
}

impl LinkStatus {
    pub fn from_success(all_published: bool) -> Self {
        if all_published {
            LinkStatus::Online
        } else {
            LinkStatus::Error
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LinkStatus::Online => "online",
            LinkStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZonePayload {
    pub node_id: String,
    pub zone_id: String,
    /// Milliseconds since boot at the start of the tick
    pub timestamp: u64,
    #[serde(rename = "current_mA")]
    pub current_ma: f32,
    #[serde(rename = "voltage_V")]
    pub voltage_v: f32,
    #[serde(rename = "power_mW")]
    pub power_mw: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Width 6, 3 fraction digits, space padded on the left
pub fn fixed_point(value: f32) -> String {
    format!("{:6.3}", value)
}

impl PayloadFormat {
    /// Messages carrying one zone's reading, in publish order
    pub fn encode(
        &self,
        node_id: &str,
        zone: &ZoneConfig,
        reading: &Reading,
        timestamp_ms: u64,
    ) -> Result<Vec<Message>, PayloadError> {
        match self {
            PayloadFormat::PerMetric { .. } => Ok(Metric::ALL
                .iter()
                .map(|metric| Message {
                    topic: format!("{}/{}", zone.topic, metric.topic_suffix()),
                    payload: fixed_point(metric.value(reading)).into_bytes(),
                })
                .collect()),
            PayloadFormat::Structured => {
                let document = ZonePayload {
                    node_id: node_id.to_string(),
                    zone_id: zone.zone_id.clone(),
                    timestamp: timestamp_ms,
                    current_ma: reading.current_ma,
                    voltage_v: reading.bus_voltage,
                    power_mw: reading.power_mw,
                };
                Ok(vec![Message {
                    topic: zone.topic.clone(),
                    payload: serde_json::to_vec(&document)?,
                }])
            }
        }
    }

    /// Status message closing a tick, only for formats that report one
    pub fn status_message(&self, status: LinkStatus) -> Option<Message> {
        match self {
            PayloadFormat::PerMetric {
                status_topic: Some(topic),
            } => Some(Message {
                topic: topic.clone(),
                payload: status.as_str().as_bytes().to_vec(),
            }),
            _ => None,
        }
    }
}
