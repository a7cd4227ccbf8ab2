//! MAX30102 pulse oximeter: I2C register driver and interrupt watcher.
//!
//! The sensor pulls its open-drain INT line (GPIO 14 on the CM4 board) low
//! when a sample is ready or the FIFO is almost full. [`InterruptWatcher`]
//! turns the GPIO block's sticky falling-edge event into a latched flag on
//! a 1 kHz polling thread; [`Max30102`] reads and decodes the FIFO.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use embedded_hal::i2c::I2c;
use platform::gpio::{Edge, GpioController, GpioMode};
use platform::{HalError, HalResult, RegisterMapper};

use crate::error::{DriverError, DriverResult};

/// 7-bit I2C address (fixed).
pub const MAX30102_ADDR: u8 = 0x57;
/// Value of [`REG_PART_ID`].
pub const PART_ID: u8 = 0x15;
/// Primary interrupt pin on the CM4 board.
pub const INT_PIN: u8 = 14;
/// Secondary interrupt pin on the CM4 board.
pub const INT_PIN_2: u8 = 15;
/// Edge-event polling rate of the watcher thread.
pub const WATCH_HZ: u32 = 1000;

/// Interrupt status 1.
pub const REG_INT_STATUS_1: u8 = 0x00;
/// Interrupt status 2.
pub const REG_INT_STATUS_2: u8 = 0x01;
/// Interrupt enable 1.
pub const REG_INT_ENABLE_1: u8 = 0x02;
/// FIFO write pointer.
pub const REG_FIFO_WR_PTR: u8 = 0x04;
/// FIFO overflow counter.
pub const REG_OVF_COUNTER: u8 = 0x05;
/// FIFO read pointer.
pub const REG_FIFO_RD_PTR: u8 = 0x06;
/// FIFO data window.
pub const REG_FIFO_DATA: u8 = 0x07;
/// FIFO configuration.
pub const REG_FIFO_CONFIG: u8 = 0x08;
/// Mode configuration.
pub const REG_MODE_CONFIG: u8 = 0x09;
/// SpO2 configuration.
pub const REG_SPO2_CONFIG: u8 = 0x0A;
/// LED1 (red) pulse amplitude.
pub const REG_LED1_PA: u8 = 0x0C;
/// LED2 (IR) pulse amplitude.
pub const REG_LED2_PA: u8 = 0x0D;
/// Part id.
pub const REG_PART_ID: u8 = 0xFF;

/// FIFO slots.
pub const FIFO_DEPTH: usize = 32;
/// Bytes per red + IR sample.
pub const SAMPLE_BYTES: usize = 6;
const SAMPLE_MASK: u32 = 0x3_FFFF;

const FIFO_CONFIG: u8 = (0b010 << 5) | (1 << 4); // average 4, rollover
const MODE_SPO2: u8 = 0b011;
const SPO2_CONFIG: u8 = (0b01 << 5) | (0b001 << 2) | 0b11; // 4096 nA, 100 sps, 18-bit
const LED_AMPLITUDE: u8 = 0x24; // about 7 mA
const INT_A_FULL_PPG_RDY: u8 = (1 << 7) | (1 << 6);

/// One red + IR reading, 18 bits each.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sample {
    /// LED1 channel.
    pub red: u32,
    /// LED2 channel.
    pub ir: u32,
}

impl Sample {
    /// Decode one FIFO sample: three bytes red, three bytes IR, MSB first.
    pub fn decode(bytes: &[u8; SAMPLE_BYTES]) -> Self {
        let channel = |b: &[u8]| {
            (u32::from(b[0]) << 16 | u32::from(b[1]) << 8 | u32::from(b[2])) & SAMPLE_MASK
        };
        Self {
            red: channel(&bytes[..3]),
            ir: channel(&bytes[3..]),
        }
    }
}

/// MAX30102 over any embedded-hal I2C bus.
pub struct Max30102<I> {
    i2c: I,
}

impl<I: I2c> Max30102<I> {
    /// Driver at the fixed address.
    pub fn new(i2c: I) -> Self {
        Self { i2c }
    }

    /// Give the bus back.
    pub fn release(self) -> I {
        self.i2c
    }

    /// Read the part id register.
    pub fn part_id(&mut self) -> DriverResult<u8, I::Error> {
        self.read_reg(REG_PART_ID)
    }

    /// Check the part id, then configure SpO2 mode with FIFO averaging and
    /// sample-ready interrupts, and reset the FIFO pointers.
    ///
    /// # Errors
    ///
    /// [`DriverError::UnexpectedId`] if something else answers at `0x57`.
    pub fn init(&mut self) -> DriverResult<(), I::Error> {
        let id = self.part_id()?;
        if id != PART_ID {
            tracing::warn!(id, "max30102 part id mismatch");
            return Err(DriverError::UnexpectedId(id));
        }
        for (reg, value) in [
            (REG_FIFO_CONFIG, FIFO_CONFIG),
            (REG_MODE_CONFIG, MODE_SPO2),
            (REG_SPO2_CONFIG, SPO2_CONFIG),
            (REG_LED1_PA, LED_AMPLITUDE),
            (REG_LED2_PA, LED_AMPLITUDE),
            (REG_INT_ENABLE_1, INT_A_FULL_PPG_RDY),
            (REG_FIFO_WR_PTR, 0),
            (REG_OVF_COUNTER, 0),
            (REG_FIFO_RD_PTR, 0),
        ] {
            self.write_reg(reg, value)?;
        }
        Ok(())
    }

    /// Read both interrupt status registers. Reading clears them and
    /// releases the INT line.
    pub fn interrupt_status(&mut self) -> DriverResult<[u8; 2], I::Error> {
        let mut status = [0u8; 2];
        self.i2c
            .write_read(MAX30102_ADDR, &[REG_INT_STATUS_1], &mut status)
            .map_err(DriverError::Bus)?;
        Ok(status)
    }

    /// Samples waiting in the FIFO.
    pub fn available(&mut self) -> DriverResult<usize, I::Error> {
        let wr = self.read_reg(REG_FIFO_WR_PTR)?;
        let rd = self.read_reg(REG_FIFO_RD_PTR)?;
        Ok(usize::from(wr.wrapping_sub(rd)) % FIFO_DEPTH)
    }

    /// Drain up to `out.len()` samples. Returns how many were read.
    pub fn read_fifo(&mut self, out: &mut [Sample]) -> DriverResult<usize, I::Error> {
        let n = self.available()?.min(out.len());
        if n == 0 {
            return Ok(0);
        }
        let mut raw = [0u8; FIFO_DEPTH * SAMPLE_BYTES];
        let raw = &mut raw[..n * SAMPLE_BYTES];
        self.i2c
            .write_read(MAX30102_ADDR, &[REG_FIFO_DATA], raw)
            .map_err(DriverError::Bus)?;
        for (slot, chunk) in out.iter_mut().zip(raw.chunks_exact(SAMPLE_BYTES)) {
            let mut bytes = [0u8; SAMPLE_BYTES];
            bytes.copy_from_slice(chunk);
            *slot = Sample::decode(&bytes);
        }
        Ok(n)
    }

    fn read_reg(&mut self, reg: u8) -> DriverResult<u8, I::Error> {
        let mut buf = [0u8];
        self.i2c
            .write_read(MAX30102_ADDR, &[reg], &mut buf)
            .map_err(DriverError::Bus)?;
        Ok(buf[0])
    }

    fn write_reg(&mut self, reg: u8, value: u8) -> DriverResult<(), I::Error> {
        self.i2c
            .write(MAX30102_ADDR, &[reg, value])
            .map_err(DriverError::Bus)
    }
}

/// Latches falling edges on the INT pin from a background thread.
pub struct InterruptWatcher<M: RegisterMapper + 'static> {
    gpio: Arc<GpioController<M>>,
    pin: u8,
    fired: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl<M: RegisterMapper + 'static> InterruptWatcher<M> {
    /// Configure `pin` as a falling-edge input and start polling it.
    ///
    /// # Errors
    ///
    /// GPIO errors from configuring the pin, or
    /// [`HalError::ThreadFailure`] if the thread cannot be spawned.
    pub fn start(gpio: Arc<GpioController<M>>, pin: u8) -> HalResult<Self> {
        gpio.set_mode(pin, GpioMode::Input)?;
        gpio.set_edge(pin, Edge::Falling)?;

        let fired = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(true));
        let thread = {
            let gpio = Arc::clone(&gpio);
            let fired = Arc::clone(&fired);
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("max30102-int".into())
                .spawn(move || watch(&gpio, pin, &fired, &running))
                .map_err(|e| {
                    tracing::error!(error = %e, "failed to spawn interrupt watcher");
                    HalError::ThreadFailure
                })?
        };
        tracing::debug!(pin, "interrupt watcher started");
        Ok(Self {
            gpio,
            pin,
            fired,
            running,
            thread: Some(thread),
        })
    }

    /// `true` if an edge was seen since the last call. Clears the flag.
    pub fn interrupt_fired(&self) -> bool {
        self.fired.swap(false, Ordering::AcqRel)
    }

    /// `true` until [`deinit`](Self::deinit).
    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Stop and join the polling thread and disable edge detection.
    /// Idempotent.
    pub fn deinit(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.running.store(false, Ordering::Release);
        if thread.join().is_err() {
            tracing::error!("interrupt watcher panicked");
        }
        if let Err(e) = self.gpio.set_edge(self.pin, Edge::None) {
            tracing::debug!(error = %e, "could not disable edge detect");
        }
        tracing::debug!(pin = self.pin, "interrupt watcher stopped");
    }
}

impl<M: RegisterMapper + 'static> Drop for InterruptWatcher<M> {
    fn drop(&mut self) {
        self.deinit();
    }
}

fn watch<M: RegisterMapper>(gpio: &GpioController<M>, pin: u8, fired: &AtomicBool, running: &AtomicBool) {
    let period = Duration::from_micros(1_000_000 / u64::from(WATCH_HZ));
    let mut reported = false;
    while running.load(Ordering::Acquire) {
        match gpio.get_edge_event(pin) {
            Ok(true) => {
                fired.store(true, Ordering::Release);
                if let Err(e) = gpio.clear_edge(pin) {
                    tracing::warn!(pin, error = %e, "failed to clear edge event");
                }
            }
            Ok(false) => {}
            Err(e) => {
                if !reported {
                    tracing::warn!(pin, error = %e, "edge event poll failed");
                    reported = true;
                }
            }
        }
        thread::sleep(period);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction as I2cTransaction};

    const A: u8 = MAX30102_ADDR;

    #[test]
    fn decode_masks_to_18_bits() {
        let s = Sample::decode(&[0xFF, 0x12, 0x34, 0x01, 0x00, 0x02]);
        assert_eq!(s.red, 0x3_1234);
        assert_eq!(s.ir, 0x1_0002);
    }

    #[test]
    fn init_rejects_wrong_part() {
        let expectations = [I2cTransaction::write_read(A, vec![REG_PART_ID], vec![0x11])];
        let mut max = Max30102::new(I2cMock::new(&expectations));
        assert_eq!(max.init(), Err(DriverError::UnexpectedId(0x11)));
        max.release().done();
    }

    #[test]
    fn init_configures_spo2_mode() {
        let mut expectations = vec![I2cTransaction::write_read(A, vec![REG_PART_ID], vec![PART_ID])];
        for (reg, value) in [
            (REG_FIFO_CONFIG, 0x50),
            (REG_MODE_CONFIG, 0x03),
            (REG_SPO2_CONFIG, 0x27),
            (REG_LED1_PA, 0x24),
            (REG_LED2_PA, 0x24),
            (REG_INT_ENABLE_1, 0xC0),
            (REG_FIFO_WR_PTR, 0),
            (REG_OVF_COUNTER, 0),
            (REG_FIFO_RD_PTR, 0),
        ] {
            expectations.push(I2cTransaction::write(A, vec![reg, value]));
        }
        let mut max = Max30102::new(I2cMock::new(&expectations));
        max.init().unwrap();
        max.release().done();
    }

    #[test]
    fn read_fifo_handles_pointer_wrap() {
        // Write pointer wrapped to 1, read pointer at 31: two samples.
        let expectations = [
            I2cTransaction::write_read(A, vec![REG_FIFO_WR_PTR], vec![1]),
            I2cTransaction::write_read(A, vec![REG_FIFO_RD_PTR], vec![31]),
            I2cTransaction::write_read(
                A,
                vec![REG_FIFO_DATA],
                vec![0, 0, 1, 0, 0, 2, 0, 0, 3, 0, 0, 4],
            ),
        ];
        let mut max = Max30102::new(I2cMock::new(&expectations));
        let mut out = [Sample::default(); 8];
        assert_eq!(max.read_fifo(&mut out).unwrap(), 2);
        assert_eq!(out[0], Sample { red: 1, ir: 2 });
        assert_eq!(out[1], Sample { red: 3, ir: 4 });
        max.release().done();
    }

    #[test]
    fn empty_fifo_reads_nothing() {
        let expectations = [
            I2cTransaction::write_read(A, vec![REG_FIFO_WR_PTR], vec![7]),
            I2cTransaction::write_read(A, vec![REG_FIFO_RD_PTR], vec![7]),
        ];
        let mut max = Max30102::new(I2cMock::new(&expectations));
        let mut out = [Sample::default(); 4];
        assert_eq!(max.read_fifo(&mut out).unwrap(), 0);
        max.release().done();
    }
}
