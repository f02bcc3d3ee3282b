use anyhow::Result;
use embedded_svc::mqtt::client::{EventPayload, QoS};
use esp_idf_svc::mqtt::client::{EspMqttClient, EspMqttConnection, MqttClientConfiguration};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::link::{TelemetryTransport, TransportError};

/// How long `connect` waits for the broker to acknowledge
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_POLL: Duration = Duration::from_millis(100);

/// Broker session on the ESP-IDF MQTT client.
///
/// The client is created on the first `connect`. Its event connection is
/// pumped on a dedicated thread that tracks the connected flag and logs
/// inbound messages; the ESP-IDF client reconnects on its own after a drop.
pub struct MqttClient {
    broker_url: String,
    client: Option<EspMqttClient<'static>>,
    connected: Arc<AtomicBool>,
}

impl MqttClient {
    pub fn new(broker_url: &str) -> Self {
        Self {
            broker_url: broker_url.to_string(),
            client: None,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    fn create_client(&mut self, client_id: &str) -> Result<()> {
        info!("📡 MQTT: Initializing client...");
        info!("  Broker: {}", self.broker_url);
        info!("  Client ID: {}", client_id);

        let mqtt_config = MqttClientConfiguration {
            client_id: Some(client_id),
            keep_alive_interval: Some(Duration::from_secs(15)),
            reconnect_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        };

        let (client, connection) = EspMqttClient::new(&self.broker_url, &mqtt_config)?;
        spawn_connection_handler(connection, Arc::clone(&self.connected))?;

        self.client = Some(client);
        Ok(())
    }
}

fn spawn_connection_handler(
    mut connection: EspMqttConnection,
    connected: Arc<AtomicBool>,
) -> Result<()> {
    std::thread::Builder::new()
        .stack_size(6144)
        .name("mqtt_conn".to_string())
        .spawn(move || {
            info!("MQTT connection handler started");

            loop {
                match connection.next() {
                    Ok(event) => match event.payload() {
                        EventPayload::Connected(session_present) => {
                            info!("✅ MQTT connected (session_present: {})", session_present);
                            connected.store(true, Ordering::Relaxed);
                        }
                        EventPayload::Disconnected => {
                            warn!("❌ MQTT disconnected from broker");
                            connected.store(false, Ordering::Relaxed);
                        }
                        EventPayload::Received {
                            topic: Some(topic),
                            data,
                            ..
                        } => {
                            match std::str::from_utf8(data) {
                                Ok(text) => info!("📥 MQTT received on '{}': {}", topic, text),
                                Err(_) => info!(
                                    "📥 MQTT received on '{}': {} bytes (non-UTF8)",
                                    topic,
                                    data.len()
                                ),
                            }
                        }
                        EventPayload::Published(id) => {
                            debug!("MQTT published (message id: {})", id);
                        }
                        EventPayload::Error(e) => {
                            warn!("❌ MQTT error: {:?}", e);
                        }
                        _ => {}
                    },
                    Err(e) => {
                        // The client was dropped, nothing left to service
                        connected.store(false, Ordering::Relaxed);
                        info!("MQTT connection handler exiting: {:?}", e);
                        break;
                    }
                }
            }
        })?;

    Ok(())
}

impl TelemetryTransport for MqttClient {
    fn connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn connect(&mut self, client_id: &str) -> Result<(), TransportError> {
        if self.client.is_none() {
            self.create_client(client_id)
                .map_err(|e| TransportError::ConnectFailed(format!("{:#}", e)))?;
        }

        let started = Instant::now();
        while !self.connected() {
            if started.elapsed() >= CONNECT_TIMEOUT {
                return Err(TransportError::ConnectFailed(format!(
                    "no CONNACK from {} within {}s",
                    self.broker_url,
                    CONNECT_TIMEOUT.as_secs()
                )));
            }
            std::thread::sleep(CONNECT_POLL);
        }

        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        let client = self.client.as_mut().ok_or(TransportError::NotConnected)?;
        client
            .enqueue(topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| TransportError::PublishFailed {
                topic: topic.to_string(),
                reason: format!("{:?}", e),
            })?;

        debug!("📤 MQTT enqueued publish to '{}': {} bytes", topic, payload.len());
        Ok(())
    }

    fn service(&mut self) {
        // Events are pumped by the connection handler thread
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        let client = self.client.as_mut().ok_or(TransportError::NotConnected)?;
        client
            .subscribe(topic, QoS::AtMostOnce)
            .map_err(|e| TransportError::SubscribeFailed {
                topic: topic.to_string(),
                reason: format!("{:?}", e),
            })?;
        Ok(())
    }
}
