//! `embedded_hal::i2c::I2c` adapter over one controller bus.

use embedded_hal::i2c::{ErrorType, I2c, Operation, SevenBitAddress};

use super::{Bus, I2cController};
use crate::error::{HalError, HalResult};
use crate::register::RegisterMapper;

/// One bus of an [`I2cController`], seen as an embedded-hal I2C device.
///
/// Supports the three operation shapes the BSC can express in a single
/// transaction: `[Write]`, `[Read]` and `[Write, Read]`. Anything else is
/// rejected with [`HalError::InvalidArgs`].
pub struct BusDevice<'a, M: RegisterMapper, G: RegisterMapper> {
    controller: &'a I2cController<M, G>,
    bus: Bus,
}

impl<'a, M: RegisterMapper, G: RegisterMapper> BusDevice<'a, M, G> {
    pub(super) fn new(controller: &'a I2cController<M, G>, bus: Bus) -> Self {
        Self { controller, bus }
    }

    /// The bus this handle drives.
    #[must_use]
    pub fn bus(&self) -> Bus {
        self.bus
    }
}

impl<M: RegisterMapper, G: RegisterMapper> ErrorType for BusDevice<'_, M, G> {
    type Error = HalError;
}

impl<M: RegisterMapper, G: RegisterMapper> I2c<SevenBitAddress> for BusDevice<'_, M, G> {
    fn transaction(&mut self, address: u8, operations: &mut [Operation<'_>]) -> HalResult<()> {
        match operations {
            [Operation::Write(w)] => self.controller.write(self.bus, address, w),
            [Operation::Read(r)] => self.controller.read_into(self.bus, address, r),
            [Operation::Write(w), Operation::Read(r)] => {
                self.controller.write_then_read_into(self.bus, address, w, r)
            }
            _ => {
                tracing::warn!(ops = operations.len(), "unsupported i2c operation sequence");
                Err(HalError::InvalidArgs)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::gpio::GpioController;
    use crate::sim::{SimDevice, SimGpio, SimI2c};

    #[test]
    fn embedded_hal_write_read() {
        let sim = SimI2c::new();
        sim.bsc(Bus::Bus1)
            .attach(0x45, SimDevice::with_registers(&[(0x04, 0xAB), (0x05, 0xCD)]));
        let gpio = GpioController::shared(SimGpio::new());
        gpio.init().unwrap();
        let i2c = I2cController::new(sim, gpio);
        i2c.init(Bus::Bus1, 100_000).unwrap();

        let mut dev = i2c.device(Bus::Bus1);
        let mut buf = [0u8; 2];
        dev.write_read(0x45, &[0x04], &mut buf).unwrap();
        assert_eq!(buf, [0xAB, 0xCD]);

        dev.write(0x45, &[0x06, 0x01]).unwrap();
        let mut one = [0u8; 1];
        dev.read(0x45, &mut one).unwrap();
        // The register pointer advanced past 0x06 after the write.
        assert_eq!(one, [0x00]);
    }

    #[test]
    fn unsupported_shape_is_invalid() {
        let sim = SimI2c::new();
        let gpio = GpioController::shared(SimGpio::new());
        gpio.init().unwrap();
        let i2c = I2cController::new(sim, gpio);
        i2c.init(Bus::Bus1, 100_000).unwrap();

        let mut dev = i2c.device(Bus::Bus1);
        let mut a = [0u8; 1];
        let mut b = [0u8; 1];
        let err = dev
            .transaction(0x10, &mut [Operation::Read(&mut a), Operation::Read(&mut b)])
            .unwrap_err();
        assert_eq!(err, HalError::InvalidArgs);
    }
}
