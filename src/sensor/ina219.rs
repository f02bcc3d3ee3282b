//! INA219 zone sensor on top of the `ina219` driver crate
//!
//! The driver returns raw register counts for shunt, current and power; the
//! scale for current and power depends on the calibration value written to
//! the chip, so [`Calibration`] carries both. Calibration is rewritten before
//! every current or power read since the chip clears it on a brown-out.

use core::fmt::Debug;
use embedded_hal::blocking::i2c::{Read, Write, WriteRead};
use ina219::INA219;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::{Reading, SensorError, SensorReader};

/// A0 and A1 tied to GND
pub const INA219_ADDR_DEFAULT: u8 = 0x40;
/// A0 bridged to VS+
pub const INA219_ADDR_A0: u8 = 0x41;
/// A1 bridged to VS+
pub const INA219_ADDR_A1: u8 = 0x44;

/// Shunt voltage register LSB (mV)
const SHUNT_VOLTAGE_LSB_MV: f32 = 0.01;

/// Ranges reachable with the chip's power-on configuration (32V bus,
/// +/-320mV shunt) and a 0.1 ohm shunt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Calibration {
    /// Up to 3.2A (resolution 0.1mA)
    #[default]
    Range32V2A,
    /// Up to 1.3A (resolution 0.04mA)
    Range32V1A,
}

impl Calibration {
    pub fn register_value(self) -> u16 {
        match self {
            Calibration::Range32V2A => 4096,
            Calibration::Range32V1A => 10240,
        }
    }

    /// Raw current counts per mA
    pub fn current_divider_ma(self) -> f32 {
        match self {
            Calibration::Range32V2A => 10.0,
            Calibration::Range32V1A => 25.0,
        }
    }

    /// mW per raw power count
    pub fn power_multiplier_mw(self) -> f32 {
        match self {
            Calibration::Range32V2A => 2.0,
            Calibration::Range32V1A => 0.8,
        }
    }
}

pub struct Ina219<I2C> {
    device: INA219<I2C>,
    address: u8,
    calibration: Calibration,
}

impl<I2C, E> Ina219<I2C>
where
    I2C: Write<Error = E> + Read<Error = E> + WriteRead<Error = E>,
    E: Debug,
{
    pub fn new(i2c: I2C, address: u8, calibration: Calibration) -> Self {
        Self {
            device: INA219::new(i2c, address),
            address,
            calibration,
        }
    }

    fn measure(&mut self) -> Result<Reading, E> {
        let shunt_raw = self.device.shunt_voltage()?;
        let bus_mv = self.device.voltage()?;

        self.device.calibrate(self.calibration.register_value())?;
        let current_raw = self.device.current()?;
        self.device.calibrate(self.calibration.register_value())?;
        let power_raw = self.device.power()?;

        Ok(Reading {
            bus_voltage: bus_mv as f32 / 1000.0,
            shunt_voltage: shunt_raw as f32 * SHUNT_VOLTAGE_LSB_MV,
            current_ma: current_raw as f32 / self.calibration.current_divider_ma(),
            power_mw: power_raw as f32 * self.calibration.power_multiplier_mw(),
        })
    }
}

impl<I2C, E> SensorReader for Ina219<I2C>
where
    I2C: Write<Error = E> + Read<Error = E> + WriteRead<Error = E>,
    E: Debug,
{
    fn address(&self) -> u8 {
        self.address
    }

    fn init(&mut self) -> Result<(), SensorError> {
        info!("INA219 {:#04x}: calibrating for {:?}", self.address, self.calibration);

        let address = self.address;
        let init_failure = |e: E| SensorError::InitFailure {
            address,
            reason: format!("{:?}", e),
        };

        self.device
            .calibrate(self.calibration.register_value())
            .map_err(init_failure)?;
        let bus_mv = self.device.voltage().map_err(init_failure)?;

        info!("✅ INA219 {:#04x}: ready, bus at {} mV", self.address, bus_mv);
        Ok(())
    }

    fn read(&mut self) -> Result<Reading, SensorError> {
        let reading = self.measure().map_err(|e| SensorError::MeasurementFailure {
            address: self.address,
            reason: format!("{:?}", e),
        })?;
        debug!("INA219 {:#04x}: {:?}", self.address, reading);
        Ok(reading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    const REG_SHUNT_VOLTAGE: u8 = 0x01;
    const REG_BUS_VOLTAGE: u8 = 0x02;
    const REG_POWER: u8 = 0x03;
    const REG_CURRENT: u8 = 0x04;
    const REG_CALIBRATION: u8 = 0x05;

    #[derive(Debug, PartialEq)]
    struct Nack;

    #[derive(Default)]
    struct Chip {
        registers: HashMap<u8, u16>,
        pointer: u8,
        writes: Vec<(u8, u8, u16)>,
        absent: bool,
    }

    /// Register file behind a cloneable handle so tests can inspect it
    /// after the driver has taken the bus
    #[derive(Clone, Default)]
    struct FakeBus(Rc<RefCell<Chip>>);

    impl FakeBus {
        fn absent() -> Self {
            let bus = Self::default();
            bus.0.borrow_mut().absent = true;
            bus
        }

        fn set(&self, register: u8, value: u16) {
            self.0.borrow_mut().registers.insert(register, value);
        }
    }

    impl Write for FakeBus {
        type Error = Nack;

        fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), Nack> {
            let mut chip = self.0.borrow_mut();
            if chip.absent {
                return Err(Nack);
            }
            chip.pointer = bytes[0];
            if let [register, hi, lo] = *bytes {
                let value = u16::from_be_bytes([hi, lo]);
                chip.writes.push((address, register, value));
                chip.registers.insert(register, value);
            }
            Ok(())
        }
    }

    impl Read for FakeBus {
        type Error = Nack;

        fn read(&mut self, _address: u8, buffer: &mut [u8]) -> Result<(), Nack> {
            let chip = self.0.borrow();
            if chip.absent {
                return Err(Nack);
            }
            let value = chip.registers.get(&chip.pointer).copied().unwrap_or(0);
            buffer.copy_from_slice(&value.to_be_bytes());
            Ok(())
        }
    }

    impl WriteRead for FakeBus {
        type Error = Nack;

        fn write_read(&mut self, address: u8, bytes: &[u8], buffer: &mut [u8]) -> Result<(), Nack> {
            self.write(address, bytes)?;
            self.read(address, buffer)
        }
    }

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn init_writes_calibration() {
        let bus = FakeBus::default();
        let mut sensor = Ina219::new(bus.clone(), INA219_ADDR_A0, Calibration::Range32V2A);
        sensor.init().unwrap();

        assert_eq!(
            bus.0.borrow().writes,
            vec![(INA219_ADDR_A0, REG_CALIBRATION, 4096)]
        );
    }

    #[test]
    fn init_fails_when_device_absent() {
        let mut sensor = Ina219::new(FakeBus::absent(), INA219_ADDR_DEFAULT, Calibration::default());
        assert_eq!(
            sensor.init(),
            Err(SensorError::InitFailure {
                address: INA219_ADDR_DEFAULT,
                reason: "Nack".to_string(),
            })
        );
    }

    #[test]
    fn scales_raw_counts_for_32v_2a() {
        let bus = FakeBus::default();
        // 12.000 V with the status bits set
        bus.set(REG_BUS_VOLTAGE, (3000 << 3) | 0b011);
        bus.set(REG_SHUNT_VOLTAGE, 250);
        bus.set(REG_CURRENT, 1234);
        bus.set(REG_POWER, 500);

        let mut sensor = Ina219::new(bus, INA219_ADDR_DEFAULT, Calibration::Range32V2A);
        let reading = sensor.read().unwrap();

        assert!(close(reading.bus_voltage, 12.0));
        assert!(close(reading.shunt_voltage, 2.5));
        assert!(close(reading.current_ma, 123.4));
        assert!(close(reading.power_mw, 1000.0));
        assert!(close(reading.load_voltage(), 12.0025));
    }

    #[test]
    fn negative_shunt_and_current_are_signed() {
        let bus = FakeBus::default();
        bus.set(REG_SHUNT_VOLTAGE, (-100i16) as u16);
        bus.set(REG_CURRENT, (-50i16) as u16);

        let mut sensor = Ina219::new(bus, INA219_ADDR_DEFAULT, Calibration::Range32V1A);
        let reading = sensor.read().unwrap();

        assert!(close(reading.shunt_voltage, -1.0));
        assert!(close(reading.current_ma, -2.0));
    }

    #[test]
    fn read_restores_calibration() {
        let bus = FakeBus::default();
        // Brown-out clears the calibration register
        bus.set(REG_CALIBRATION, 0);

        let mut sensor = Ina219::new(bus.clone(), INA219_ADDR_DEFAULT, Calibration::Range32V1A);
        sensor.read().unwrap();

        assert_eq!(bus.0.borrow().registers[&REG_CALIBRATION], 10240);
    }

    #[test]
    fn read_failure_names_address() {
        let mut sensor = Ina219::new(FakeBus::absent(), INA219_ADDR_A1, Calibration::default());
        assert!(matches!(
            sensor.read(),
            Err(SensorError::MeasurementFailure {
                address: INA219_ADDR_A1,
                ..
            })
        ));
    }
}
