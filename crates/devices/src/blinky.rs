//! Status LED.

use embedded_hal::digital::{OutputPin, PinState, StatefulOutputPin};

/// Default status LED pin on the CM4 board.
pub const LED_PIN: u8 = 17;

/// One LED on a stateful output pin.
pub struct Blinky<P> {
    pin: P,
}

impl<P: OutputPin + StatefulOutputPin> Blinky<P> {
    /// Wrap `pin`, leaving its level alone.
    pub fn new(pin: P) -> Self {
        Self { pin }
    }

    /// Give the pin back.
    pub fn release(self) -> P {
        self.pin
    }

    /// Toggle the LED and return the new level (`true` = lit).
    pub fn step(&mut self) -> Result<bool, P::Error> {
        self.pin.toggle()?;
        self.pin.is_set_high()
    }

    /// Drive the LED to `on`.
    pub fn set(&mut self, on: bool) -> Result<(), P::Error> {
        self.pin.set_state(PinState::from(on))
    }
}
