//! GPIO pin multiplexer for the BCM2711.
//!
//! Register-level control of pin function, output level, input level and edge
//! detection. The controller owns its register window; every operation before
//! [`GpioController::init`] returns [`HalError::NotInitialized`].
//!
//! ```text
//! GPFSEL0..5   3-bit function field per pin, 10 pins per register
//! GPSET0/1     write 1 to drive high
//! GPCLR0/1     write 1 to drive low
//! GPLEV0/1     current input level
//! GPEDS0/1     sticky edge event, write 1 to clear
//! GPREN0/1     rising-edge detect enable
//! GPFEN0/1     falling-edge detect enable
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::{GPIO_BASE, GPIO_BLOCK_LEN, GPIO_MAX_PIN};
use crate::error::{HalError, HalResult};
use crate::register::{RegisterBlock, RegisterMapper};

// ── Register map (word indices) ─────────────────────────────────────────────

/// GPFSEL0: function select for pins 0–9.
pub const GPFSEL0: usize = 0;
/// GPSET0: output set, pins 0–31.
pub const GPSET0: usize = 7;
/// GPCLR0: output clear, pins 0–31.
pub const GPCLR0: usize = 10;
/// GPLEV0: pin level, pins 0–31.
pub const GPLEV0: usize = 13;
/// GPEDS0: event detect status, pins 0–31.
pub const GPEDS0: usize = 16;
/// GPREN0: rising-edge detect enable, pins 0–31.
pub const GPREN0: usize = 19;
/// GPFEN0: falling-edge detect enable, pins 0–31.
pub const GPFEN0: usize = 22;

// ── Pin types ───────────────────────────────────────────────────────────────

/// A validated BCM GPIO number (`0..=53`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pin(u8);

impl Pin {
    /// Validate a raw pin number.
    ///
    /// # Errors
    ///
    /// [`HalError::InvalidArgs`] if `n > 53`.
    pub const fn new(n: u8) -> HalResult<Self> {
        if n > GPIO_MAX_PIN {
            Err(HalError::InvalidArgs)
        } else {
            Ok(Self(n))
        }
    }

    /// The raw BCM number.
    #[must_use]
    pub const fn number(self) -> u8 {
        self.0
    }

    /// Function-select register and bit shift of this pin's 3-bit field.
    #[must_use]
    pub const fn fsel_slot(self) -> (usize, u32) {
        let n = self.0 as usize;
        (GPFSEL0 + n / 10, ((n % 10) * 3) as u32)
    }

    /// Bank (`0` or `1`) and bit mask for the 32-pin banked registers.
    #[must_use]
    pub const fn bank_bit(self) -> (usize, u32) {
        let n = self.0 as usize;
        (n / 32, 1 << (n % 32))
    }
}

impl TryFrom<u8> for Pin {
    type Error = HalError;

    fn try_from(value: u8) -> HalResult<Self> {
        Self::new(value)
    }
}

/// Pin function. Discriminants are the 3-bit GPFSEL codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GpioMode {
    /// `000`
    Input = 0b000,
    /// `001`
    Output = 0b001,
    /// `100`
    Alt0 = 0b100,
    /// `101`
    Alt1 = 0b101,
    /// `110`
    Alt2 = 0b110,
    /// `111`
    Alt3 = 0b111,
    /// `011`
    Alt4 = 0b011,
    /// `010`
    Alt5 = 0b010,
}

impl GpioMode {
    /// The 3-bit function-select code.
    #[must_use]
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Decode a 3-bit function-select field.
    #[must_use]
    pub const fn from_code(code: u32) -> Self {
        match code & 0b111 {
            0b000 => Self::Input,
            0b001 => Self::Output,
            0b100 => Self::Alt0,
            0b101 => Self::Alt1,
            0b110 => Self::Alt2,
            0b111 => Self::Alt3,
            0b011 => Self::Alt4,
            _ => Self::Alt5,
        }
    }
}

/// Logic level of a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    /// Logic 0
    Low,
    /// Logic 1
    High,
}

impl From<bool> for Level {
    fn from(value: bool) -> Self {
        if value {
            Self::High
        } else {
            Self::Low
        }
    }
}

impl From<Level> for bool {
    fn from(value: Level) -> Self {
        matches!(value, Level::High)
    }
}

impl core::ops::Not for Level {
    type Output = Self;

    fn not(self) -> Self {
        match self {
            Self::Low => Self::High,
            Self::High => Self::Low,
        }
    }
}

/// Edge-detect configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    /// Detection disabled
    None,
    /// Rising edges only
    Rising,
    /// Falling edges only
    Falling,
    /// Both edges
    Both,
}

impl Edge {
    const fn rising(self) -> bool {
        matches!(self, Self::Rising | Self::Both)
    }

    const fn falling(self) -> bool {
        matches!(self, Self::Falling | Self::Both)
    }
}

// ── Controller ──────────────────────────────────────────────────────────────

/// Owner of the GPIO register window.
///
/// Shared between the I2C controller (pin muxing) and device drivers through
/// an `Arc`. Register sequences are serialized by an internal lock.
pub struct GpioController<M: RegisterMapper> {
    mapper: M,
    regs: Mutex<Option<M::Block>>,
}

impl<M: RegisterMapper> GpioController<M> {
    /// Controller that will map its registers through `mapper` on [`init`](Self::init).
    pub fn new(mapper: M) -> Self {
        Self {
            mapper,
            regs: Mutex::new(None),
        }
    }

    /// Convenience: wrap in an `Arc` for sharing with other controllers.
    pub fn shared(mapper: M) -> Arc<Self> {
        Arc::new(Self::new(mapper))
    }

    /// The mapper backing this controller.
    pub fn mapper(&self) -> &M {
        &self.mapper
    }

    /// Map the GPIO register block.
    ///
    /// # Errors
    ///
    /// [`HalError::AlreadyInitialized`] if already mapped (the existing
    /// mapping is left intact), [`HalError::MemAccessFailure`] if mapping fails.
    pub fn init(&self) -> HalResult<()> {
        let mut regs = self.lock();
        if regs.is_some() {
            tracing::warn!("gpio already initialized");
            return Err(HalError::AlreadyInitialized);
        }
        *regs = Some(self.mapper.map(GPIO_BASE, GPIO_BLOCK_LEN)?);
        tracing::info!("gpio initialized");
        Ok(())
    }

    /// Unmap the register block. Idempotent.
    pub fn deinit(&self) {
        if self.lock().take().is_some() {
            tracing::info!("gpio deinitialized");
        }
    }

    /// `true` while the register block is mapped.
    pub fn is_initialized(&self) -> bool {
        self.lock().is_some()
    }

    /// Set the function of `pin`.
    ///
    /// # Errors
    ///
    /// [`HalError::NotInitialized`] or [`HalError::InvalidArgs`].
    pub fn set_mode(&self, pin: u8, mode: GpioMode) -> HalResult<()> {
        self.with_pin(pin, |regs, pin| {
            let (index, shift) = pin.fsel_slot();
            regs.modify(index, |v| (v & !(0b111 << shift)) | (mode.code() << shift));
            tracing::trace!(pin = pin.number(), ?mode, "gpio mode");
        })
    }

    /// Current function of `pin`.
    ///
    /// # Errors
    ///
    /// [`HalError::NotInitialized`] or [`HalError::InvalidArgs`].
    pub fn mode(&self, pin: u8) -> HalResult<GpioMode> {
        self.with_pin(pin, |regs, pin| {
            let (index, shift) = pin.fsel_slot();
            GpioMode::from_code(regs.read(index) >> shift)
        })
    }

    /// Drive `pin` to `level` (through GPSET/GPCLR, no read-modify-write).
    ///
    /// # Errors
    ///
    /// [`HalError::NotInitialized`] or [`HalError::InvalidArgs`].
    pub fn write(&self, pin: u8, level: Level) -> HalResult<()> {
        self.with_pin(pin, |regs, pin| {
            let (bank, bit) = pin.bank_bit();
            let base = match level {
                Level::High => GPSET0,
                Level::Low => GPCLR0,
            };
            regs.write(base + bank, bit);
        })
    }

    /// Sample the level of `pin`.
    ///
    /// # Errors
    ///
    /// [`HalError::NotInitialized`] or [`HalError::InvalidArgs`].
    pub fn read(&self, pin: u8) -> HalResult<Level> {
        self.with_pin(pin, |regs, pin| {
            let (bank, bit) = pin.bank_bit();
            Level::from(regs.read(GPLEV0 + bank) & bit != 0)
        })
    }

    /// Invert the level of `pin`, returning the new level.
    ///
    /// # Errors
    ///
    /// [`HalError::NotInitialized`] or [`HalError::InvalidArgs`].
    pub fn toggle(&self, pin: u8) -> HalResult<Level> {
        self.with_pin(pin, |regs, pin| {
            let (bank, bit) = pin.bank_bit();
            let next = !Level::from(regs.read(GPLEV0 + bank) & bit != 0);
            let base = match next {
                Level::High => GPSET0,
                Level::Low => GPCLR0,
            };
            regs.write(base + bank, bit);
            next
        })
    }

    /// Configure edge detection on `pin`.
    ///
    /// Any pending event and both existing enables are cleared first, so the
    /// pin ends up with exactly the requested configuration.
    ///
    /// # Errors
    ///
    /// [`HalError::NotInitialized`] or [`HalError::InvalidArgs`].
    pub fn set_edge(&self, pin: u8, edge: Edge) -> HalResult<()> {
        self.with_pin(pin, |regs, pin| {
            let (bank, bit) = pin.bank_bit();
            regs.write(GPEDS0 + bank, bit);
            regs.modify(GPREN0 + bank, |v| if edge.rising() { v | bit } else { v & !bit });
            regs.modify(GPFEN0 + bank, |v| if edge.falling() { v | bit } else { v & !bit });
            tracing::trace!(pin = pin.number(), ?edge, "gpio edge");
        })
    }

    /// `true` if an enabled edge has been seen on `pin` since the last clear.
    ///
    /// The event stays latched until [`clear_edge`](Self::clear_edge).
    ///
    /// # Errors
    ///
    /// [`HalError::NotInitialized`] or [`HalError::InvalidArgs`].
    pub fn get_edge_event(&self, pin: u8) -> HalResult<bool> {
        self.with_pin(pin, |regs, pin| {
            let (bank, bit) = pin.bank_bit();
            regs.read(GPEDS0 + bank) & bit != 0
        })
    }

    /// Clear a latched edge event on `pin`.
    ///
    /// # Errors
    ///
    /// [`HalError::NotInitialized`] or [`HalError::InvalidArgs`].
    pub fn clear_edge(&self, pin: u8) -> HalResult<()> {
        self.with_pin(pin, |regs, pin| {
            let (bank, bit) = pin.bank_bit();
            regs.write(GPEDS0 + bank, bit);
        })
    }

    fn with_pin<R>(&self, pin: u8, f: impl FnOnce(&M::Block, Pin) -> R) -> HalResult<R> {
        let pin = Pin::new(pin)?;
        let regs = self.lock();
        let block = regs.as_ref().ok_or(HalError::NotInitialized)?;
        Ok(f(block, pin))
    }

    fn lock(&self) -> MutexGuard<'_, Option<M::Block>> {
        // A poisoned lock only means another thread panicked mid-sequence;
        // the register block itself is still valid.
        self.regs.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<M: RegisterMapper> core::fmt::Debug for GpioController<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GpioController")
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

// ── embedded-hal pin handle ─────────────────────────────────────────────────

/// A single pin borrowed from a shared [`GpioController`], usable wherever an
/// `embedded_hal::digital` pin is expected.
pub struct GpioPin<M: RegisterMapper> {
    gpio: Arc<GpioController<M>>,
    pin: Pin,
}

impl<M: RegisterMapper> GpioPin<M> {
    /// Handle for `pin`. Does not change the pin's mode.
    ///
    /// # Errors
    ///
    /// [`HalError::InvalidArgs`] for a pin outside `0..=53`.
    pub fn new(gpio: Arc<GpioController<M>>, pin: u8) -> HalResult<Self> {
        Ok(Self {
            gpio,
            pin: Pin::new(pin)?,
        })
    }

    /// Handle for `pin`, configured as an output.
    ///
    /// # Errors
    ///
    /// As [`GpioController::set_mode`].
    pub fn output(gpio: Arc<GpioController<M>>, pin: u8) -> HalResult<Self> {
        gpio.set_mode(pin, GpioMode::Output)?;
        Self::new(gpio, pin)
    }

    /// Handle for `pin`, configured as an input.
    ///
    /// # Errors
    ///
    /// As [`GpioController::set_mode`].
    pub fn input(gpio: Arc<GpioController<M>>, pin: u8) -> HalResult<Self> {
        gpio.set_mode(pin, GpioMode::Input)?;
        Self::new(gpio, pin)
    }

    /// The pin number.
    #[must_use]
    pub fn pin(&self) -> Pin {
        self.pin
    }
}

impl<M: RegisterMapper> embedded_hal::digital::ErrorType for GpioPin<M> {
    type Error = HalError;
}

impl<M: RegisterMapper> embedded_hal::digital::OutputPin for GpioPin<M> {
    fn set_low(&mut self) -> HalResult<()> {
        self.gpio.write(self.pin.number(), Level::Low)
    }

    fn set_high(&mut self) -> HalResult<()> {
        self.gpio.write(self.pin.number(), Level::High)
    }
}

impl<M: RegisterMapper> embedded_hal::digital::StatefulOutputPin for GpioPin<M> {
    fn is_set_high(&mut self) -> HalResult<bool> {
        self.gpio.read(self.pin.number()).map(bool::from)
    }

    fn is_set_low(&mut self) -> HalResult<bool> {
        self.is_set_high().map(|v| !v)
    }
}

impl<M: RegisterMapper> embedded_hal::digital::InputPin for GpioPin<M> {
    fn is_high(&mut self) -> HalResult<bool> {
        self.gpio.read(self.pin.number()).map(bool::from)
    }

    fn is_low(&mut self) -> HalResult<bool> {
        self.is_high().map(|v| !v)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::sim::SimGpio;

    fn gpio() -> GpioController<SimGpio> {
        let gpio = GpioController::new(SimGpio::new());
        gpio.init().unwrap();
        gpio
    }

    #[test]
    fn fsel_slot_layout() {
        assert_eq!(Pin::new(0).unwrap().fsel_slot(), (0, 0));
        assert_eq!(Pin::new(9).unwrap().fsel_slot(), (0, 27));
        assert_eq!(Pin::new(10).unwrap().fsel_slot(), (1, 0));
        assert_eq!(Pin::new(53).unwrap().fsel_slot(), (5, 9));
    }

    #[test]
    fn bank_bit_layout() {
        assert_eq!(Pin::new(31).unwrap().bank_bit(), (0, 1 << 31));
        assert_eq!(Pin::new(32).unwrap().bank_bit(), (1, 1));
        assert_eq!(Pin::new(53).unwrap().bank_bit(), (1, 1 << 21));
    }

    #[test]
    fn mode_codes_match_datasheet() {
        assert_eq!(GpioMode::Alt0.code(), 0b100);
        assert_eq!(GpioMode::Alt4.code(), 0b011);
        assert_eq!(GpioMode::Alt5.code(), 0b010);
        for mode in [
            GpioMode::Input,
            GpioMode::Output,
            GpioMode::Alt0,
            GpioMode::Alt1,
            GpioMode::Alt2,
            GpioMode::Alt3,
            GpioMode::Alt4,
            GpioMode::Alt5,
        ] {
            assert_eq!(GpioMode::from_code(mode.code()), mode);
        }
    }

    #[test]
    fn rejects_pin_54() {
        let gpio = gpio();
        assert_eq!(gpio.set_mode(54, GpioMode::Output), Err(HalError::InvalidArgs));
        assert_eq!(gpio.read(54), Err(HalError::InvalidArgs));
    }

    #[test]
    fn operations_before_init_fail() {
        let gpio = GpioController::new(SimGpio::new());
        assert_eq!(gpio.write(17, Level::High), Err(HalError::NotInitialized));
        assert_eq!(gpio.get_edge_event(14), Err(HalError::NotInitialized));
    }

    #[test]
    fn set_mode_preserves_neighbours() {
        let gpio = gpio();
        gpio.set_mode(2, GpioMode::Alt0).unwrap();
        gpio.set_mode(3, GpioMode::Alt0).unwrap();
        gpio.set_mode(4, GpioMode::Output).unwrap();
        assert_eq!(gpio.mode(2).unwrap(), GpioMode::Alt0);
        assert_eq!(gpio.mode(3).unwrap(), GpioMode::Alt0);
        assert_eq!(gpio.mode(4).unwrap(), GpioMode::Output);
        assert_eq!(gpio.mode(5).unwrap(), GpioMode::Input);
    }

    #[test]
    fn toggle_flips_level() {
        let gpio = gpio();
        gpio.set_mode(17, GpioMode::Output).unwrap();
        assert_eq!(gpio.toggle(17).unwrap(), Level::High);
        assert_eq!(gpio.read(17).unwrap(), Level::High);
        assert_eq!(gpio.toggle(17).unwrap(), Level::Low);
    }

    #[test]
    fn set_edge_replaces_previous_configuration() {
        let gpio = gpio();
        gpio.set_edge(14, Edge::Both).unwrap();
        gpio.set_edge(14, Edge::Falling).unwrap();
        gpio.mapper().with_registers(|regs| {
            assert_eq!(regs[GPREN0] & (1 << 14), 0);
            assert_ne!(regs[GPFEN0] & (1 << 14), 0);
        });
    }

    #[test]
    fn set_edge_clears_pending_event() {
        let gpio = gpio();
        gpio.set_mode(14, GpioMode::Output).unwrap();
        gpio.set_edge(14, Edge::Rising).unwrap();
        gpio.write(14, Level::High).unwrap();
        assert!(gpio.get_edge_event(14).unwrap());
        gpio.set_edge(14, Edge::Falling).unwrap();
        assert!(!gpio.get_edge_event(14).unwrap());
    }
}
