//! Telemetry loop
//!
//! Reads every zone's sensor once per interval and publishes the readings.
//! The loop is driven one [`TelemetryLoop::step`] at a time: each step keeps
//! the broker session alive, retries a lost connection on a fixed delay,
//! and runs a tick when one is due. [`TelemetryLoop::run`] just repeats
//! `step` and sleeps on the injected clock until the next deadline.

use core::convert::Infallible;
use log::{debug, error, info, warn};
use thiserror::Error;

use crate::clock::Clock;
use crate::config::{ConfigError, NodeConfig, ZoneConfig};
use crate::link::{NetworkError, NetworkSession, TelemetryTransport, TransportError};
use crate::payload::LinkStatus;
use crate::sensor::{Reading, SensorError, SensorReader};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("{zones} zones configured but {sensors} sensors supplied")]
    SensorCount { zones: usize, sensors: usize },
    #[error("zone '{zone_id}' expects a sensor at {expected:#04x}, got {actual:#04x}")]
    SensorAddress {
        zone_id: String,
        expected: u8,
        actual: u8,
    },
    #[error("zone '{zone_id}': {source}")]
    SensorInit {
        zone_id: String,
        #[source]
        source: SensorError,
    },
    #[error("loop halted after a fatal sensor error")]
    Halted,
    #[error("gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
}

#[derive(Debug, Error)]
enum LinkError {
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// A configured zone and the sensor it owns
struct Zone<S> {
    config: ZoneConfig,
    sensor: S,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Starting,
    Running,
    Halted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Online,
    /// `attempts` failed so far, next attempt not before `retry_at`
    Reconnecting { attempts: u32, retry_at: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    pub zone_id: String,
    pub topic: String,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub timestamp_ms: u64,
    /// Sensor reads issued this tick
    pub reads: usize,
    /// Zones whose reading could not be taken or encoded
    pub failed_zones: Vec<String>,
    pub publishes: Vec<PublishOutcome>,
    /// Aggregate status, when the payload format reports one
    pub status: Option<LinkStatus>,
}

impl TickReport {
    pub fn all_published(&self) -> bool {
        self.failed_zones.is_empty() && self.publishes.iter().all(|p| p.success)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Offline, nothing published; next attempt at `retry_at`
    Reconnecting { retry_at: u64 },
    /// Online, waiting for the next tick
    Idle { next_tick_at: u64 },
    Ticked(TickReport),
}

pub struct TelemetryLoop<N, T, S, C> {
    config: NodeConfig,
    network: N,
    transport: T,
    zones: Vec<Zone<S>>,
    clock: C,
    state: LoopState,
    link: Connectivity,
    last_tick: u64,
}

impl<N, T, S, C> TelemetryLoop<N, T, S, C>
where
    N: NetworkSession,
    T: TelemetryTransport,
    S: SensorReader,
    C: Clock,
{
    /// `sensors` are matched to the configured zones in order
    pub fn new(
        config: NodeConfig,
        network: N,
        transport: T,
        sensors: Vec<S>,
        clock: C,
    ) -> Result<Self, TelemetryError> {
        config.telemetry.validate()?;

        if sensors.len() != config.telemetry.zones.len() {
            return Err(TelemetryError::SensorCount {
                zones: config.telemetry.zones.len(),
                sensors: sensors.len(),
            });
        }

        let zones = config
            .telemetry
            .zones
            .iter()
            .cloned()
            .zip(sensors)
            .map(|(zone, sensor)| {
                if sensor.address() != zone.address {
                    return Err(TelemetryError::SensorAddress {
                        zone_id: zone.zone_id,
                        expected: zone.address,
                        actual: sensor.address(),
                    });
                }
                Ok(Zone {
                    config: zone,
                    sensor,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            config,
            network,
            transport,
            zones,
            clock,
            state: LoopState::Starting,
            link: Connectivity::Reconnecting {
                attempts: 0,
                retry_at: 0,
            },
            last_tick: 0,
        })
    }

    pub fn connectivity(&self) -> Connectivity {
        self.link
    }

    pub fn is_halted(&self) -> bool {
        self.state == LoopState::Halted
    }

    /// Only returns on a fatal error
    pub fn run(&mut self) -> Result<Infallible, TelemetryError> {
        loop {
            let outcome = self.step()?;
            let now = self.clock.now_ms();
            let wake_at = match outcome {
                // Nothing to service while offline
                StepOutcome::Reconnecting { retry_at } => retry_at,
                StepOutcome::Idle { next_tick_at } => {
                    next_tick_at.min(now + self.config.telemetry.service_interval_ms)
                }
                StepOutcome::Ticked(_) => (self.last_tick + self.config.telemetry.interval_ms)
                    .min(now + self.config.telemetry.service_interval_ms),
            };
            if wake_at > now {
                self.clock.sleep_ms(wake_at - now);
            }
        }
    }

    pub fn step(&mut self) -> Result<StepOutcome, TelemetryError> {
        match self.state {
            LoopState::Halted => return Err(TelemetryError::Halted),
            LoopState::Starting => self.start()?,
            LoopState::Running => {}
        }

        let now = self.clock.now_ms();
        if let Some(retry_at) = self.ensure_connected(now)? {
            return Ok(StepOutcome::Reconnecting { retry_at });
        }

        self.transport.service();

        let now = self.clock.now_ms();
        let next_tick_at = self.last_tick + self.config.telemetry.interval_ms;
        if now < next_tick_at {
            return Ok(StepOutcome::Idle { next_tick_at });
        }

        // Boundaries follow the tick start, not the end of its work
        self.last_tick = now;
        Ok(StepOutcome::Ticked(self.tick(now)))
    }

    fn start(&mut self) -> Result<(), TelemetryError> {
        for zone in &mut self.zones {
            if let Err(e) = zone.sensor.init() {
                error!(
                    "❌ Zone '{}': sensor init failed, halting: {}",
                    zone.config.zone_id, e
                );
                self.state = LoopState::Halted;
                return Err(TelemetryError::SensorInit {
                    zone_id: zone.config.zone_id.clone(),
                    source: e,
                });
            }
            info!(
                "✅ Zone '{}': sensor {:#04x} ready, topic '{}'",
                zone.config.zone_id, zone.config.address, zone.config.topic
            );
        }

        self.state = LoopState::Running;
        self.last_tick = self.clock.now_ms();
        info!(
            "Telemetry loop started: {} zone(s), every {} ms",
            self.zones.len(),
            self.config.telemetry.interval_ms
        );
        Ok(())
    }

    /// `None` when online, otherwise when the next attempt is due
    fn ensure_connected(&mut self, now: u64) -> Result<Option<u64>, TelemetryError> {
        let network_up = self.network.connected();
        if network_up && self.transport.connected() {
            if let Connectivity::Reconnecting { attempts, .. } = self.link {
                if attempts > 0 {
                    info!("✅ Link up after {} failed attempt(s)", attempts);
                }
                self.link = Connectivity::Online;
            }
            return Ok(None);
        }

        let attempts = match self.link {
            Connectivity::Online => {
                warn!("❌ Connection lost, reconnecting");
                0
            }
            Connectivity::Reconnecting { retry_at, .. } if now < retry_at => {
                return Ok(Some(retry_at));
            }
            Connectivity::Reconnecting { attempts, .. } => attempts,
        };

        match self.reconnect(network_up) {
            Ok(()) => {
                info!(
                    "✅ Connected to {}:{}",
                    self.config.mqtt.host, self.config.mqtt.port
                );
                self.link = Connectivity::Online;
                Ok(None)
            }
            Err(e) => {
                let attempts = attempts + 1;
                let policy = self.config.telemetry.reconnect;
                if policy.max_attempts.is_some_and(|max| attempts >= max) {
                    error!("❌ Reconnect attempt {} failed, giving up: {}", attempts, e);
                    return Err(TelemetryError::ReconnectExhausted { attempts });
                }

                warn!(
                    "❌ Reconnect attempt {} failed: {}, retrying in {} ms",
                    attempts, e, policy.delay_ms
                );
                let retry_at = now + policy.delay_ms;
                self.link = Connectivity::Reconnecting { attempts, retry_at };
                Ok(Some(retry_at))
            }
        }
    }

    fn reconnect(&mut self, network_up: bool) -> Result<(), LinkError> {
        if !network_up {
            info!("🌐 Joining WiFi '{}'", self.config.wifi.ssid);
            self.network.connect(&self.config.wifi)?;
        }

        if !self.transport.connected() {
            info!(
                "📡 Connecting to broker {}:{} as '{}'",
                self.config.mqtt.host, self.config.mqtt.port, self.config.mqtt.client_id
            );
            self.transport.connect(&self.config.mqtt.client_id)?;

            if let Some(topic) = &self.config.telemetry.control_topic {
                match self.transport.subscribe(topic) {
                    Ok(()) => info!("Subscribed to '{}'", topic),
                    Err(e) => warn!("Subscribe to '{}' failed: {}", topic, e),
                }
            }
        }

        Ok(())
    }

    fn tick(&mut self, timestamp_ms: u64) -> TickReport {
        // All reads complete before the first publish of the tick
        let readings: Vec<Result<Reading, SensorError>> = self
            .zones
            .iter_mut()
            .map(|zone| zone.sensor.read())
            .collect();

        let telemetry = &self.config.telemetry;
        let mut report = TickReport {
            timestamp_ms,
            reads: readings.len(),
            failed_zones: Vec::new(),
            publishes: Vec::new(),
            status: None,
        };

        for (zone, reading) in self.zones.iter().zip(readings) {
            let zone_id = &zone.config.zone_id;
            let reading = match reading {
                Ok(reading) => reading,
                Err(e) => {
                    error!("Zone '{}': {}", zone_id, e);
                    report.failed_zones.push(zone_id.clone());
                    continue;
                }
            };

            info!(
                "Zone '{}': bus {:.3} V, shunt {:.3} mV, load {:.3} V, {:.3} mA, {:.3} mW",
                zone_id,
                reading.bus_voltage,
                reading.shunt_voltage,
                reading.load_voltage(),
                reading.current_ma,
                reading.power_mw
            );

            let messages =
                match telemetry
                    .format
                    .encode(&telemetry.node_id, &zone.config, &reading, timestamp_ms)
                {
                    Ok(messages) => messages,
                    Err(e) => {
                        error!("Zone '{}': {}", zone_id, e);
                        report.failed_zones.push(zone_id.clone());
                        continue;
                    }
                };

            for message in messages {
                let success = match self.transport.publish(&message.topic, &message.payload) {
                    Ok(()) => {
                        debug!("📤 Published {} bytes to '{}'", message.payload.len(), message.topic);
                        true
                    }
                    Err(e) => {
                        warn!("Zone '{}': {}", zone_id, e);
                        false
                    }
                };
                report.publishes.push(PublishOutcome {
                    zone_id: zone_id.clone(),
                    topic: message.topic,
                    success,
                });
            }
        }

        let status = LinkStatus::from_success(report.all_published());
        if let Some(message) = telemetry.format.status_message(status) {
            if let Err(e) = self.transport.publish(&message.topic, &message.payload) {
                warn!("Status: {}", e);
            }
            report.status = Some(status);
        }

        if report.all_published() {
            info!("📤 Tick {} ms: all readings published", timestamp_ms);
        } else {
            warn!(
                "❌ Tick {} ms: {} zone(s) failed, {} publish(es) failed",
                timestamp_ms,
                report.failed_zones.len(),
                report.publishes.iter().filter(|p| !p.success).count()
            );
        }

        report
    }
}
