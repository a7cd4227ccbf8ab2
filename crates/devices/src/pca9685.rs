//! PCA9685 16-channel, 12-bit PWM LED driver.
//!
//! Reference: NXP PCA9685 product data sheet, rev. 4.
//!
//! On the CM4 board the chip sits on I2C bus 2 at `0x47` and drives the
//! servo headers (channels 0-3) and two LEDs (channels 4-5).
//!
//! # Channel registers
//!
//! Each channel owns four consecutive registers starting at
//! `LED0_ON_L + 4 * channel`:
//!
//! | Offset | Register   | Contents                           |
//! |--------|------------|------------------------------------|
//! | +0     | LEDn_ON_L  | on count, bits 7:0                 |
//! | +1     | LEDn_ON_H  | on count, bits 11:8; bit 4 full-on |
//! | +2     | LEDn_OFF_L | off count, bits 7:0                |
//! | +3     | LEDn_OFF_H | off count, bits 11:8; bit 4 full-off |

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use crate::error::{DriverError, DriverResult};

/// Default 7-bit address on the CM4 board.
pub const PCA9685_ADDR: u8 = 0x47;
/// Internal oscillator frequency.
pub const OSC_HZ: f32 = 25_000_000.0;
/// Counter steps per PWM period.
pub const PWM_RESOLUTION: u16 = 4096;
/// Lowest output frequency the prescaler can reach.
pub const MIN_FREQ_HZ: u32 = 24;
/// Highest output frequency the prescaler can reach.
pub const MAX_FREQ_HZ: u32 = 1526;
/// Number of PWM channels.
pub const CHANNELS: u8 = 16;

/// MODE1 register.
pub const MODE1: u8 = 0x00;
/// MODE2 register.
pub const MODE2: u8 = 0x01;
/// First channel register (LED0_ON_L).
pub const LED0_ON_L: u8 = 0x06;
/// Prescaler register (writable only while asleep).
pub const PRE_SCALE: u8 = 0xFE;

/// MODE1: restart enabled.
pub const MODE1_RESTART: u8 = 1 << 7;
/// MODE1: register auto-increment.
pub const MODE1_AI: u8 = 1 << 5;
/// MODE1: low-power mode, oscillator off.
pub const MODE1_SLEEP: u8 = 1 << 4;
/// MODE2: totem-pole outputs.
pub const MODE2_OUTDRV: u8 = 1 << 2;
/// LEDn_ON_H / LEDn_OFF_H full-on / full-off bit.
pub const LED_FULL: u8 = 1 << 4;

/// Prescaler value for `freq_hz`: `round(25 MHz / (4096 * f)) - 1`.
pub fn prescale(freq_hz: u32) -> u8 {
    #[allow(clippy::cast_precision_loss)]
    let ideal = OSC_HZ / (f32::from(PWM_RESOLUTION) * freq_hz as f32) - 1.0;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let value = ideal.round().clamp(3.0, 255.0) as u8;
    value
}

/// First register of `channel`.
pub const fn channel_base(channel: u8) -> u8 {
    LED0_ON_L + 4 * channel
}

/// PCA9685 over any embedded-hal I2C bus.
pub struct Pca9685<I, D> {
    i2c: I,
    delay: D,
    addr: u8,
    initialized: bool,
}

impl<I: I2c, D: DelayNs> Pca9685<I, D> {
    /// Driver at the board's default address.
    pub fn new(i2c: I, delay: D) -> Self {
        Self::with_address(i2c, delay, PCA9685_ADDR)
    }

    /// Driver at a strapped address.
    pub fn with_address(i2c: I, delay: D, addr: u8) -> Self {
        Self {
            i2c,
            delay,
            addr,
            initialized: false,
        }
    }

    /// `true` after a successful [`init`](Self::init).
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Give the bus and delay back.
    pub fn release(self) -> (I, D) {
        (self.i2c, self.delay)
    }

    /// Program the output frequency and wake the chip.
    ///
    /// Sequence: read MODE1, sleep, write the prescaler, wake, wait for the
    /// oscillator, restart with auto-increment, totem-pole outputs.
    ///
    /// # Errors
    ///
    /// [`DriverError::InvalidArgs`] for a frequency outside 24..=1526 Hz,
    /// [`DriverError::Bus`] on a bus failure.
    pub fn init(&mut self, freq_hz: u32) -> DriverResult<(), I::Error> {
        if !(MIN_FREQ_HZ..=MAX_FREQ_HZ).contains(&freq_hz) {
            return Err(DriverError::InvalidArgs);
        }
        let mut mode1 = [0u8];
        self.i2c
            .write_read(self.addr, &[MODE1], &mut mode1)
            .map_err(DriverError::Bus)?;

        let sleep = (mode1[0] & !MODE1_RESTART) | MODE1_SLEEP;
        let awake = sleep & !MODE1_SLEEP;
        let prescale = prescale(freq_hz);
        self.write_reg(MODE1, sleep)?;
        self.write_reg(PRE_SCALE, prescale)?;
        self.write_reg(MODE1, awake)?;
        // Oscillator needs 500 us after leaving sleep.
        self.delay.delay_us(1000);
        self.write_reg(MODE1, awake | MODE1_RESTART | MODE1_AI)?;
        self.write_reg(MODE2, MODE2_OUTDRV)?;

        self.initialized = true;
        tracing::debug!(addr = self.addr, freq_hz, prescale, "pca9685 initialized");
        Ok(())
    }

    /// Set `channel` to switch on after `delay` of the period and stay on for
    /// `duty` of it. Both are fractions in `0.0..=1.0`.
    ///
    /// A duty of 0 is [`stop_channel`](Self::stop_channel); a duty of 1 is
    /// [`full_on_channel`](Self::full_on_channel).
    ///
    /// # Errors
    ///
    /// [`DriverError::InvalidArgs`] if `delay + duty > 1`, either is
    /// negative, or the channel does not exist.
    pub fn set_channel(&mut self, channel: u8, delay: f32, duty: f32) -> DriverResult<(), I::Error> {
        check_channel(channel)?;
        if !(delay >= 0.0 && duty >= 0.0 && delay + duty <= 1.0) {
            return Err(DriverError::InvalidArgs);
        }
        if duty <= 0.0 {
            return self.stop_channel(channel);
        }
        if duty >= 1.0 {
            return self.full_on_channel(channel);
        }
        let (on, off) = counts(delay, duty);
        let [on_l, on_h] = on.to_le_bytes();
        let [off_l, off_h] = off.to_le_bytes();
        self.i2c
            .write(
                self.addr,
                &[channel_base(channel), on_l, on_h & 0x0F, off_l, off_h & 0x0F],
            )
            .map_err(DriverError::Bus)
    }

    /// Hold `channel` permanently low.
    pub fn stop_channel(&mut self, channel: u8) -> DriverResult<(), I::Error> {
        check_channel(channel)?;
        self.i2c
            .write(self.addr, &[channel_base(channel), 0, 0, 0, LED_FULL])
            .map_err(DriverError::Bus)
    }

    /// Hold `channel` permanently high.
    pub fn full_on_channel(&mut self, channel: u8) -> DriverResult<(), I::Error> {
        check_channel(channel)?;
        self.i2c
            .write(self.addr, &[channel_base(channel), 0, LED_FULL, 0, 0])
            .map_err(DriverError::Bus)
    }

    fn write_reg(&mut self, reg: u8, value: u8) -> DriverResult<(), I::Error> {
        self.i2c
            .write(self.addr, &[reg, value])
            .map_err(DriverError::Bus)
    }
}

fn check_channel<E>(channel: u8) -> DriverResult<(), E> {
    if channel < CHANNELS {
        Ok(())
    } else {
        Err(DriverError::InvalidArgs)
    }
}

/// On and off counter values for a delay/duty pair. The off count wraps at
/// 4096, which the chip accepts as an output that spans the period edge.
fn counts(delay: f32, duty: f32) -> (u16, u16) {
    let resolution = f32::from(PWM_RESOLUTION);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let on = ((delay * resolution) as u16).min(PWM_RESOLUTION - 1);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let width = (duty * resolution) as u16;
    (on, (on + width) % PWM_RESOLUTION)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use embedded_hal_mock::eh1::delay::NoopDelay;
    use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction as I2cTransaction};

    const A: u8 = PCA9685_ADDR;

    #[test]
    fn prescale_matches_datasheet_examples() {
        // 200 Hz is the datasheet's worked example: 0x1E.
        assert_eq!(prescale(200), 0x1E);
        assert_eq!(prescale(50), 121);
        assert_eq!(prescale(MIN_FREQ_HZ), 253);
        assert_eq!(prescale(MAX_FREQ_HZ), 3);
    }

    #[test]
    fn init_sequence() {
        let expectations = [
            I2cTransaction::write_read(A, vec![MODE1], vec![0x11]),
            I2cTransaction::write(A, vec![MODE1, 0x11]),
            I2cTransaction::write(A, vec![PRE_SCALE, 121]),
            I2cTransaction::write(A, vec![MODE1, 0x01]),
            I2cTransaction::write(A, vec![MODE1, 0x01 | MODE1_RESTART | MODE1_AI]),
            I2cTransaction::write(A, vec![MODE2, MODE2_OUTDRV]),
        ];
        let mut pca = Pca9685::new(I2cMock::new(&expectations), NoopDelay::new());
        pca.init(50).unwrap();
        assert!(pca.is_initialized());
        let (mut i2c, _) = pca.release();
        i2c.done();
    }

    #[test]
    fn init_clears_stale_restart_bit_before_sleep() {
        let expectations = [
            I2cTransaction::write_read(A, vec![MODE1], vec![MODE1_RESTART | MODE1_AI]),
            I2cTransaction::write(A, vec![MODE1, MODE1_AI | MODE1_SLEEP]),
            I2cTransaction::write(A, vec![PRE_SCALE, 3]),
            I2cTransaction::write(A, vec![MODE1, MODE1_AI]),
            I2cTransaction::write(A, vec![MODE1, MODE1_AI | MODE1_RESTART]),
            I2cTransaction::write(A, vec![MODE2, MODE2_OUTDRV]),
        ];
        let mut pca = Pca9685::new(I2cMock::new(&expectations), NoopDelay::new());
        pca.init(MAX_FREQ_HZ).unwrap();
        let (mut i2c, _) = pca.release();
        i2c.done();
    }

    #[test]
    fn init_rejects_out_of_range_frequency() {
        let mut pca = Pca9685::new(I2cMock::new(&[]), NoopDelay::new());
        assert_eq!(pca.init(23), Err(DriverError::InvalidArgs));
        assert_eq!(pca.init(1527), Err(DriverError::InvalidArgs));
        assert!(!pca.is_initialized());
        let (mut i2c, _) = pca.release();
        i2c.done();
    }

    #[test]
    fn set_channel_encodes_on_and_off_counts() {
        // Channel 4: base 0x16. Delay 0.25 -> on 1024, duty 0.5 -> off 3072.
        let expectations = [I2cTransaction::write(
            A,
            vec![0x16, 0x00, 0x04, 0x00, 0x0C],
        )];
        let mut pca = Pca9685::new(I2cMock::new(&expectations), NoopDelay::new());
        pca.set_channel(4, 0.25, 0.5).unwrap();
        let (mut i2c, _) = pca.release();
        i2c.done();
    }

    #[test]
    fn set_channel_limits() {
        let expectations = [
            I2cTransaction::write(A, vec![0x06, 0, 0, 0, LED_FULL]),
            I2cTransaction::write(A, vec![0x0A, 0, LED_FULL, 0, 0]),
        ];
        let mut pca = Pca9685::new(I2cMock::new(&expectations), NoopDelay::new());
        pca.set_channel(0, 0.0, 0.0).unwrap();
        pca.set_channel(1, 0.0, 1.0).unwrap();
        assert_eq!(pca.set_channel(2, 0.6, 0.5), Err(DriverError::InvalidArgs));
        assert_eq!(pca.set_channel(2, -0.1, 0.5), Err(DriverError::InvalidArgs));
        assert_eq!(pca.set_channel(16, 0.0, 0.5), Err(DriverError::InvalidArgs));
        let (mut i2c, _) = pca.release();
        i2c.done();
    }

    #[test]
    fn bus_error_is_propagated() {
        use embedded_hal::i2c::ErrorKind;
        let expectations =
            [I2cTransaction::write_read(A, vec![MODE1], vec![0]).with_error(ErrorKind::Other)];
        let mut pca = Pca9685::new(I2cMock::new(&expectations), NoopDelay::new());
        assert_eq!(pca.init(50), Err(DriverError::Bus(ErrorKind::Other)));
        let (mut i2c, _) = pca.release();
        i2c.done();
    }

    #[test]
    fn counts_wrap_past_period_end() {
        assert_eq!(counts(0.0, 0.5), (0, 2048));
        assert_eq!(counts(0.75, 0.25), (3072, 0));
    }
}
