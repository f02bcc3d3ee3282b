//! Stand-in for an INA219 when no hardware is attached
//!
//! Readings random-walk around a 15 V / 1.2 A operating point so a broker
//! and dashboard see plausible, slowly drifting values.

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{Reading, SensorError, SensorReader};

const CURRENT_RANGE_MA: (f32, f32) = (900.0, 1700.0);
const VOLTAGE_RANGE_V: (f32, f32) = (13.0, 20.0);
const CURRENT_STEP_MA: f32 = 50.0;
const VOLTAGE_STEP_V: f32 = 0.25;
/// Shunt the same size as on the real boards (ohm)
const SHUNT_OHMS: f32 = 0.1;

pub struct SimulatedSensor {
    address: u8,
    rng: StdRng,
    current_ma: f32,
    bus_voltage: f32,
}

impl SimulatedSensor {
    /// Reproducible sequence for a given seed
    pub fn new(address: u8, seed: u64) -> Self {
        Self::with_rng(address, StdRng::seed_from_u64(seed))
    }

    pub fn from_entropy(address: u8) -> Self {
        Self::with_rng(address, StdRng::from_entropy())
    }

    fn with_rng(address: u8, rng: StdRng) -> Self {
        Self {
            address,
            rng,
            current_ma: 1200.0,
            bus_voltage: 15.0,
        }
    }
}

impl SensorReader for SimulatedSensor {
    fn address(&self) -> u8 {
        self.address
    }

    fn init(&mut self) -> Result<(), SensorError> {
        Ok(())
    }

    fn read(&mut self) -> Result<Reading, SensorError> {
        let current_step = self.rng.gen_range(-CURRENT_STEP_MA..=CURRENT_STEP_MA);
        let voltage_step = self.rng.gen_range(-VOLTAGE_STEP_V..=VOLTAGE_STEP_V);
        self.current_ma =
            (self.current_ma + current_step).clamp(CURRENT_RANGE_MA.0, CURRENT_RANGE_MA.1);
        self.bus_voltage =
            (self.bus_voltage + voltage_step).clamp(VOLTAGE_RANGE_V.0, VOLTAGE_RANGE_V.1);

        let reading = Reading {
            bus_voltage: self.bus_voltage,
            shunt_voltage: self.current_ma * SHUNT_OHMS,
            current_ma: self.current_ma,
            power_mw: self.current_ma * self.bus_voltage,
        };
        debug!("Simulated {:#04x}: {:?}", self.address, reading);
        Ok(reading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_within_operating_range() {
        let mut sensor = SimulatedSensor::new(0x40, 7);
        sensor.init().unwrap();
        for _ in 0..1_000 {
            let r = sensor.read().unwrap();
            assert!((900.0..=1700.0).contains(&r.current_ma));
            assert!((13.0..=20.0).contains(&r.bus_voltage));
            assert!((r.power_mw - r.current_ma * r.bus_voltage).abs() < 1e-2);
        }
    }

    #[test]
    fn successive_readings_drift_slowly() {
        let mut sensor = SimulatedSensor::new(0x41, 1);
        let mut previous = sensor.read().unwrap();
        for _ in 0..100 {
            let next = sensor.read().unwrap();
            assert!((next.current_ma - previous.current_ma).abs() <= 50.0 + 1e-3);
            assert!((next.bus_voltage - previous.bus_voltage).abs() <= 0.25 + 1e-3);
            previous = next;
        }
    }

    #[test]
    fn same_seed_same_sequence() {
        let mut a = SimulatedSensor::new(0x44, 42);
        let mut b = SimulatedSensor::new(0x44, 42);
        for _ in 0..10 {
            assert_eq!(a.read().unwrap(), b.read().unwrap());
        }
    }
}
