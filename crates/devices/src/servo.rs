//! Hobby servos on PCA9685 channels 0-3.
//!
//! A servo expects a 50 Hz frame whose high pulse encodes the angle:
//! 1 ms at -90°, 1.5 ms centred, 2 ms at +90°.
//!
//! [`ServoBank::move_smooth`] only records a target and a per-tick step.
//! The caller drives motion by calling [`ServoBank::tick`] at
//! [`UPDATE_HZ`] until it reports that nothing is moving.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use crate::error::{DriverError, DriverResult};
use crate::pca9685::Pca9685;

/// PWM frame rate servos expect.
pub const SERVO_PWM_HZ: u32 = 50;
/// Rate at which [`ServoBank::tick`] is meant to be called.
pub const UPDATE_HZ: f32 = 50.0;
/// Servo headers on the board (PCA9685 channels 0..4).
pub const SERVO_CHANNELS: usize = 4;
/// Lowest accepted angle.
pub const MIN_ANGLE: f32 = -90.0;
/// Highest accepted angle.
pub const MAX_ANGLE: f32 = 90.0;

const MIN_PULSE_MS: f32 = 1.0;
const MAX_PULSE_MS: f32 = 2.0;
/// Closer than this to the target counts as arrived.
const ARRIVE_EPSILON: f32 = 0.1;

/// Fraction of the 50 Hz frame that is high for `angle`.
pub fn pulse_duty(angle: f32) -> f32 {
    let centre = (MIN_PULSE_MS + MAX_PULSE_MS) / 2.0;
    let pulse_ms = centre + angle / (MAX_ANGLE - MIN_ANGLE) * (MAX_PULSE_MS - MIN_PULSE_MS);
    pulse_ms * SERVO_PWM_HZ as f32 / 1000.0
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Motion {
    target: f32,
    step: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Servo {
    angle: f32,
    motion: Option<Motion>,
}

/// The four servo headers behind one PCA9685.
pub struct ServoBank<I, D> {
    pca: Pca9685<I, D>,
    servos: [Servo; SERVO_CHANNELS],
}

impl<I: I2c, D: DelayNs> ServoBank<I, D> {
    /// Bank over `pca`. Call [`init`](Self::init) before moving anything.
    pub fn new(pca: Pca9685<I, D>) -> Self {
        Self {
            pca,
            servos: [Servo::default(); SERVO_CHANNELS],
        }
    }

    /// Reprogram the PCA9685 for the 50 Hz servo frame.
    pub fn init(&mut self) -> DriverResult<(), I::Error> {
        self.pca.init(SERVO_PWM_HZ)
    }

    /// Give the PCA9685 back.
    pub fn release(self) -> Pca9685<I, D> {
        self.pca
    }

    /// Move `channel` to `angle` immediately. Cancels any smooth move on it.
    ///
    /// # Errors
    ///
    /// [`DriverError::NotInitialized`] before `init`,
    /// [`DriverError::InvalidArgs`] for an angle outside ±90° or a channel
    /// past 3.
    pub fn set_angle(&mut self, channel: usize, angle: f32) -> DriverResult<(), I::Error> {
        self.write_angle(channel, angle)?;
        self.servos[channel].motion = None;
        Ok(())
    }

    /// Last angle written to `channel`.
    pub fn angle(&self, channel: usize) -> Option<f32> {
        self.servos.get(channel).map(|s| s.angle)
    }

    /// `true` while `channel` has a smooth move in progress.
    pub fn is_moving(&self, channel: usize) -> bool {
        self.servos.get(channel).is_some_and(|s| s.motion.is_some())
    }

    /// Start moving `channel` toward `target` at `degrees_per_second`.
    ///
    /// # Errors
    ///
    /// [`DriverError::InvalidArgs`] for a non-positive speed, a target out of
    /// range or a bad channel.
    pub fn move_smooth(
        &mut self,
        channel: usize,
        target: f32,
        degrees_per_second: f32,
    ) -> DriverResult<(), I::Error> {
        if !(degrees_per_second > 0.0) || !(MIN_ANGLE..=MAX_ANGLE).contains(&target) {
            return Err(DriverError::InvalidArgs);
        }
        let servo = self.servos.get_mut(channel).ok_or(DriverError::InvalidArgs)?;
        let magnitude = degrees_per_second / UPDATE_HZ;
        let step = if target < servo.angle { -magnitude } else { magnitude };
        servo.motion = Some(Motion { target, step });
        tracing::debug!(channel, from = servo.angle, target, step, "servo move started");
        Ok(())
    }

    /// Advance every moving servo by one step. Returns `true` while any
    /// servo is still moving.
    pub fn tick(&mut self) -> DriverResult<bool, I::Error> {
        let mut moving = false;
        for channel in 0..SERVO_CHANNELS {
            let Servo { angle, motion } = self.servos[channel];
            let Some(Motion { target, step }) = motion else {
                continue;
            };
            let remaining = target - angle;
            if remaining.abs() <= step.abs() || remaining.abs() < ARRIVE_EPSILON {
                self.write_angle(channel, target)?;
                self.servos[channel].motion = None;
                tracing::trace!(channel, target, "servo arrived");
            } else {
                self.write_angle(channel, angle + step)?;
                moving = true;
            }
        }
        Ok(moving)
    }

    fn write_angle(&mut self, channel: usize, angle: f32) -> DriverResult<(), I::Error> {
        if !self.pca.is_initialized() {
            return Err(DriverError::NotInitialized);
        }
        if channel >= SERVO_CHANNELS || !(MIN_ANGLE..=MAX_ANGLE).contains(&angle) {
            return Err(DriverError::InvalidArgs);
        }
        let pwm_channel = u8::try_from(channel).map_err(|_| DriverError::InvalidArgs)?;
        self.pca.set_channel(pwm_channel, 0.0, pulse_duty(angle))?;
        self.servos[channel].angle = angle;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::pca9685::{PCA9685_ADDR, PRE_SCALE};
    use embedded_hal_mock::eh1::delay::NoopDelay;
    use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction as I2cTransaction};

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn duty_spans_one_to_two_milliseconds() {
        assert!(approx(pulse_duty(-90.0), 0.05));
        assert!(approx(pulse_duty(0.0), 0.075));
        assert!(approx(pulse_duty(90.0), 0.10));
    }

    fn init_expectations() -> Vec<I2cTransaction> {
        vec![
            I2cTransaction::write_read(PCA9685_ADDR, vec![0x00], vec![0x00]),
            I2cTransaction::write(PCA9685_ADDR, vec![0x00, 0x10]),
            I2cTransaction::write(PCA9685_ADDR, vec![PRE_SCALE, 121]),
            I2cTransaction::write(PCA9685_ADDR, vec![0x00, 0x00]),
            I2cTransaction::write(PCA9685_ADDR, vec![0x00, 0xA0]),
            I2cTransaction::write(PCA9685_ADDR, vec![0x01, 0x04]),
        ]
    }

    /// Channel write for a duty of `off / 4096` starting at count 0.
    fn channel_write(channel: u8, off: u16) -> I2cTransaction {
        let [lo, hi] = off.to_le_bytes();
        I2cTransaction::write(PCA9685_ADDR, vec![0x06 + 4 * channel, 0, 0, lo, hi])
    }

    #[test]
    fn set_angle_before_init_is_rejected() {
        let pca = Pca9685::new(I2cMock::new(&[]), NoopDelay::new());
        let mut bank = ServoBank::new(pca);
        assert_eq!(bank.set_angle(0, 0.0), Err(DriverError::NotInitialized));
        bank.release().release().0.done();
    }

    #[test]
    fn set_angle_writes_centre_pulse() {
        let mut ex = init_expectations();
        // 0.075 * 4096 = 307.2 -> 307.
        ex.push(channel_write(2, 307));
        let mut bank = ServoBank::new(Pca9685::new(I2cMock::new(&ex), NoopDelay::new()));
        bank.init().unwrap();
        bank.set_angle(2, 0.0).unwrap();
        assert_eq!(bank.angle(2), Some(0.0));
        assert_eq!(bank.set_angle(4, 0.0), Err(DriverError::InvalidArgs));
        assert_eq!(bank.set_angle(0, 91.0), Err(DriverError::InvalidArgs));
        bank.release().release().0.done();
    }

    #[test]
    fn move_smooth_steps_then_arrives() {
        let mut ex = init_expectations();
        // 50 deg/s at 50 Hz: 1 degree per tick, 0 -> 2.5 takes three ticks.
        for angle in [1.0f32, 2.0, 2.5] {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let off = (pulse_duty(angle) * 4096.0) as u16;
            ex.push(channel_write(1, off));
        }
        let mut bank = ServoBank::new(Pca9685::new(I2cMock::new(&ex), NoopDelay::new()));
        bank.init().unwrap();
        bank.move_smooth(1, 2.5, 50.0).unwrap();
        assert!(bank.is_moving(1));
        assert!(bank.tick().unwrap());
        assert!(bank.tick().unwrap());
        assert!(!bank.tick().unwrap());
        assert!(!bank.is_moving(1));
        assert_eq!(bank.angle(1), Some(2.5));
        // Nothing left to do: no bus traffic.
        assert!(!bank.tick().unwrap());
        bank.release().release().0.done();
    }

    proptest::proptest! {
        /// Every accepted angle maps into the 1-2 ms pulse window.
        #[test]
        fn duty_stays_in_pulse_window(angle in MIN_ANGLE..=MAX_ANGLE) {
            let duty = pulse_duty(angle);
            proptest::prop_assert!((0.05 - 1e-6..=0.10 + 1e-6).contains(&duty));
        }
    }

    #[test]
    fn move_smooth_rejects_bad_arguments() {
        let mut bank = ServoBank::new(Pca9685::new(I2cMock::new(&[]), NoopDelay::new()));
        assert_eq!(bank.move_smooth(0, 10.0, 0.0), Err(DriverError::InvalidArgs));
        assert_eq!(bank.move_smooth(0, 100.0, 10.0), Err(DriverError::InvalidArgs));
        assert_eq!(bank.move_smooth(9, 10.0, 10.0), Err(DriverError::InvalidArgs));
        bank.release().release().0.done();
    }
}
