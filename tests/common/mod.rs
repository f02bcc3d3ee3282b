#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use embedded_hal::blocking::i2c::{Read, Write, WriteRead};
use ina219_telemetry::{
    Clock, NetworkError, NetworkSession, Reading, SensorError, SensorReader, TelemetryTransport,
    TransportError, WifiConfig,
};

/// Things that happened, in order, across all fakes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Read(u8),
    Publish(String),
    NetworkConnect,
    TransportConnect,
}

pub type EventLog = Rc<RefCell<Vec<Event>>>;

#[derive(Clone, Default)]
pub struct FakeClock {
    now: Rc<Cell<u64>>,
}

impl FakeClock {
    pub fn set(&self, ms: u64) {
        self.now.set(ms);
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }

    pub fn get(&self) -> u64 {
        self.now.get()
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }

    fn sleep_ms(&mut self, ms: u64) {
        self.advance(ms);
    }
}

#[derive(Default)]
pub struct NetworkState {
    pub connected: bool,
    /// Connect calls that fail before one succeeds
    pub failures_left: u32,
    pub joined_ssids: Vec<String>,
}

#[derive(Clone)]
pub struct FakeNetwork {
    pub state: Rc<RefCell<NetworkState>>,
    events: EventLog,
}

impl FakeNetwork {
    pub fn new(events: &EventLog, connected: bool) -> Self {
        Self {
            state: Rc::new(RefCell::new(NetworkState {
                connected,
                ..Default::default()
            })),
            events: Rc::clone(events),
        }
    }
}

impl NetworkSession for FakeNetwork {
    fn connected(&self) -> bool {
        self.state.borrow().connected
    }

    fn connect(&mut self, credentials: &WifiConfig) -> Result<(), NetworkError> {
        self.events.borrow_mut().push(Event::NetworkConnect);
        let mut state = self.state.borrow_mut();
        state.joined_ssids.push(credentials.ssid.to_string());
        if state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(NetworkError::JoinFailed("no AP".to_string()));
        }
        state.connected = true;
        Ok(())
    }
}

#[derive(Default)]
pub struct TransportState {
    pub connected: bool,
    /// Connect calls that fail before one succeeds
    pub failures_left: u32,
    pub client_ids: Vec<String>,
    pub published: Vec<(String, Vec<u8>)>,
    pub failing_topics: HashSet<String>,
    pub published_while_offline: usize,
    pub subscriptions: Vec<String>,
    pub service_calls: usize,
}

impl TransportState {
    pub fn topics(&self) -> Vec<&str> {
        self.published.iter().map(|(t, _)| t.as_str()).collect()
    }

    pub fn payload_on(&self, topic: &str) -> Option<&[u8]> {
        self.published
            .iter()
            .rev()
            .find(|(t, _)| t == topic)
            .map(|(_, p)| p.as_slice())
    }
}

#[derive(Clone)]
pub struct FakeTransport {
    pub state: Rc<RefCell<TransportState>>,
    events: EventLog,
}

impl FakeTransport {
    pub fn new(events: &EventLog, connected: bool) -> Self {
        Self {
            state: Rc::new(RefCell::new(TransportState {
                connected,
                ..Default::default()
            })),
            events: Rc::clone(events),
        }
    }
}

impl TelemetryTransport for FakeTransport {
    fn connected(&self) -> bool {
        self.state.borrow().connected
    }

    fn connect(&mut self, client_id: &str) -> Result<(), TransportError> {
        self.events.borrow_mut().push(Event::TransportConnect);
        let mut state = self.state.borrow_mut();
        state.client_ids.push(client_id.to_string());
        if state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(TransportError::ConnectFailed("rc=-2".to_string()));
        }
        state.connected = true;
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.events
            .borrow_mut()
            .push(Event::Publish(topic.to_string()));
        let mut state = self.state.borrow_mut();
        if !state.connected {
            state.published_while_offline += 1;
            return Err(TransportError::NotConnected);
        }
        if state.failing_topics.contains(topic) {
            return Err(TransportError::PublishFailed {
                topic: topic.to_string(),
                reason: "queue full".to_string(),
            });
        }
        state.published.push((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    fn service(&mut self) {
        self.state.borrow_mut().service_calls += 1;
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.state.borrow_mut().subscriptions.push(topic.to_string());
        Ok(())
    }
}

pub struct FakeSensor {
    address: u8,
    pub reading: Reading,
    pub fail_init: bool,
    pub fail_read: bool,
    pub reads: Rc<Cell<usize>>,
    events: EventLog,
}

impl FakeSensor {
    pub fn new(events: &EventLog, address: u8, reading: Reading) -> Self {
        Self {
            address,
            reading,
            fail_init: false,
            fail_read: false,
            reads: Rc::new(Cell::new(0)),
            events: Rc::clone(events),
        }
    }
}

impl SensorReader for FakeSensor {
    fn address(&self) -> u8 {
        self.address
    }

    fn init(&mut self) -> Result<(), SensorError> {
        if self.fail_init {
            return Err(SensorError::InitFailure {
                address: self.address,
                reason: "no ACK".to_string(),
            });
        }
        Ok(())
    }

    fn read(&mut self) -> Result<Reading, SensorError> {
        self.events.borrow_mut().push(Event::Read(self.address));
        self.reads.set(self.reads.get() + 1);
        if self.fail_read {
            return Err(SensorError::MeasurementFailure {
                address: self.address,
                reason: "bus timeout".to_string(),
            });
        }
        Ok(self.reading)
    }
}

pub fn reading(bus_voltage: f32, current_ma: f32, power_mw: f32) -> Reading {
    Reading {
        bus_voltage,
        shunt_voltage: 0.5,
        current_ma,
        power_mw,
    }
}

#[derive(Debug, PartialEq)]
pub struct Nack;

/// I2C bus with a register file and register pointer per device address
#[derive(Default)]
pub struct FakeI2c {
    pub devices: HashMap<u8, HashMap<u8, u16>>,
    pointers: HashMap<u8, u8>,
}

impl FakeI2c {
    pub fn set_register(&mut self, address: u8, register: u8, value: u16) {
        self.devices
            .entry(address)
            .or_default()
            .insert(register, value);
    }
}

impl Write for FakeI2c {
    type Error = Nack;

    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), Nack> {
        let registers = self.devices.get_mut(&address).ok_or(Nack)?;
        self.pointers.insert(address, bytes[0]);
        if let [register, hi, lo] = *bytes {
            registers.insert(register, u16::from_be_bytes([hi, lo]));
        }
        Ok(())
    }
}

impl Read for FakeI2c {
    type Error = Nack;

    fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<(), Nack> {
        let registers = self.devices.get(&address).ok_or(Nack)?;
        let pointer = self.pointers.get(&address).copied().unwrap_or(0);
        let value = registers.get(&pointer).copied().unwrap_or(0);
        buffer.copy_from_slice(&value.to_be_bytes());
        Ok(())
    }
}

impl WriteRead for FakeI2c {
    type Error = Nack;

    fn write_read(&mut self, address: u8, bytes: &[u8], buffer: &mut [u8]) -> Result<(), Nack> {
        self.write(address, bytes)?;
        self.read(address, buffer)
    }
}
