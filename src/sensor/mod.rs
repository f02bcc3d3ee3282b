//! Power sensors
//!
//! A [`SensorReader`] is bound to one bus address for its whole life. The
//! telemetry loop only sees this trait. The INA219 adapter reads real
//! hardware, the simulated sensor stands in when none is attached.

pub mod ina219;
pub mod simulated;

pub use ina219::{Calibration, Ina219};
pub use simulated::SimulatedSensor;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SensorError {
    #[error("sensor at {address:#04x} failed to initialise: {reason}")]
    InitFailure { address: u8, reason: String },
    #[error("sensor at {address:#04x} failed to measure: {reason}")]
    MeasurementFailure { address: u8, reason: String },
}

/// One sample from a current/power sensor
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Reading {
    /// Bus voltage (V)
    pub bus_voltage: f32,
    /// Voltage across the shunt (mV)
    pub shunt_voltage: f32,
    /// Current through the shunt (mA)
    pub current_ma: f32,
    /// Power delivered to the load (mW)
    pub power_mw: f32,
}

impl Reading {
    /// Voltage seen by the load (V)
    pub fn load_voltage(&self) -> f32 {
        self.bus_voltage + self.shunt_voltage / 1000.0
    }
}

pub trait SensorReader {
    /// Bus address this reader was constructed for
    fn address(&self) -> u8;

    /// Configure the device and confirm it answers
    fn init(&mut self) -> Result<(), SensorError>;

    fn read(&mut self) -> Result<Reading, SensorError>;
}

impl<S: SensorReader + ?Sized> SensorReader for Box<S> {
    fn address(&self) -> u8 {
        (**self).address()
    }

    fn init(&mut self) -> Result<(), SensorError> {
        (**self).init()
    }

    fn read(&mut self) -> Result<Reading, SensorError> {
        (**self).read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_voltage_adds_shunt_drop() {
        let reading = Reading {
            bus_voltage: 12.0,
            shunt_voltage: 250.0,
            current_ma: 0.0,
            power_mw: 0.0,
        };
        assert!((reading.load_voltage() - 12.25).abs() < 1e-5);
    }

    #[test]
    fn load_voltage_with_negative_shunt() {
        let reading = Reading {
            bus_voltage: 5.0,
            shunt_voltage: -12.5,
            ..Default::default()
        };
        assert!((reading.load_voltage() - 4.9875).abs() < 1e-5);
    }
}
