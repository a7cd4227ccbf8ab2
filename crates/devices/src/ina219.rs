//! INA219 high-side current / power monitor.
//!
//! Calibrated for a 10 mΩ shunt and a 6 A full scale, so one current LSB is
//! 6 A / 32768 ≈ 183 µA. Registers are 16-bit, most significant byte first.

use embedded_hal::i2c::I2c;

use crate::error::{DriverError, DriverResult};

/// 7-bit address on the CM4 board (A0 = SDA, A1 = GND).
pub const INA219_ADDR: u8 = 0x45;

/// Configuration register.
pub const REG_CONFIG: u8 = 0x00;
/// Shunt voltage register.
pub const REG_SHUNT_VOLTAGE: u8 = 0x01;
/// Bus voltage register.
pub const REG_BUS_VOLTAGE: u8 = 0x02;
/// Power register.
pub const REG_POWER: u8 = 0x03;
/// Current register.
pub const REG_CURRENT: u8 = 0x04;
/// Calibration register.
pub const REG_CALIBRATION: u8 = 0x05;

/// 32 V bus range.
pub const CONFIG_BRNG_32V: u16 = 1 << 13;
/// PGA gain /8, ±320 mV shunt range.
pub const CONFIG_PG_320MV: u16 = 0b11 << 11;
/// Bus ADC 12-bit.
pub const CONFIG_BADC_12BIT: u16 = 0b0011 << 7;
/// Shunt ADC 12-bit.
pub const CONFIG_SADC_12BIT: u16 = 0b0011 << 3;
/// Shunt and bus, continuous.
pub const CONFIG_MODE_CONTINUOUS: u16 = 0b111;
/// Configuration written by [`Ina219::init`].
pub const CONFIG: u16 =
    CONFIG_BRNG_32V | CONFIG_PG_320MV | CONFIG_BADC_12BIT | CONFIG_SADC_12BIT | CONFIG_MODE_CONTINUOUS;

/// Full-scale current the calibration targets.
pub const MAX_CURRENT_AMPS: f32 = 6.0;
/// Shunt resistance.
pub const SHUNT_OHMS: f32 = 0.01;
/// Amps per current-register count.
pub const CURRENT_LSB_AMPS: f32 = MAX_CURRENT_AMPS / 32768.0;

/// Calibration register value: `trunc(0.04096 / (current_lsb * r_shunt))`.
pub fn calibration() -> u16 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let cal = (0.04096 / (CURRENT_LSB_AMPS * SHUNT_OHMS)) as u16;
    cal
}

/// INA219 over any embedded-hal I2C bus.
pub struct Ina219<I> {
    i2c: I,
    addr: u8,
}

impl<I: I2c> Ina219<I> {
    /// Driver at the board's default address.
    pub fn new(i2c: I) -> Self {
        Self {
            i2c,
            addr: INA219_ADDR,
        }
    }

    /// Give the bus back.
    pub fn release(self) -> I {
        self.i2c
    }

    /// Write the calibration, then the configuration.
    pub fn init(&mut self) -> DriverResult<(), I::Error> {
        self.write_reg(REG_CALIBRATION, calibration())?;
        self.write_reg(REG_CONFIG, CONFIG)?;
        tracing::debug!(addr = self.addr, cal = calibration(), "ina219 initialized");
        Ok(())
    }

    /// Signed current through the shunt, in amps.
    pub fn read_current_amps(&mut self) -> DriverResult<f32, I::Error> {
        let raw = self.read_reg(REG_CURRENT)?;
        Ok(f32::from(i16::from_be_bytes(raw.to_be_bytes())) * CURRENT_LSB_AMPS)
    }

    /// Bus voltage in volts (4 mV per count in bits 15:3).
    pub fn read_bus_voltage(&mut self) -> DriverResult<f32, I::Error> {
        let raw = self.read_reg(REG_BUS_VOLTAGE)?;
        Ok(f32::from(raw >> 3) * 0.004)
    }

    /// Raw 16-bit register.
    pub fn read_reg(&mut self, reg: u8) -> DriverResult<u16, I::Error> {
        let mut buf = [0u8; 2];
        self.i2c
            .write_read(self.addr, &[reg], &mut buf)
            .map_err(DriverError::Bus)?;
        Ok(u16::from_be_bytes(buf))
    }

    fn write_reg(&mut self, reg: u8, value: u16) -> DriverResult<(), I::Error> {
        let [hi, lo] = value.to_be_bytes();
        self.i2c
            .write(self.addr, &[reg, hi, lo])
            .map_err(DriverError::Bus)
    }
}
