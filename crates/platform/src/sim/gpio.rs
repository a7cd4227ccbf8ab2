//! GPIO register file with level and edge-event latching.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::{GPIO_BASE, GPIO_BLOCK_LEN};
use crate::error::{HalError, HalResult};
use crate::gpio::{Level, Pin, GPCLR0, GPEDS0, GPFEN0, GPLEV0, GPREN0, GPSET0};
use crate::register::{RegisterBlock, RegisterMapper};

#[derive(Debug, Default)]
struct Shared {
    regs: Mutex<Vec<u32>>,
    maps: AtomicUsize,
}

/// Simulated GPIO block. Clones share the same register file.
#[derive(Debug, Clone, Default)]
pub struct SimGpio {
    shared: Arc<Shared>,
}

impl SimGpio {
    /// Register file with every pin an input at logic low.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                regs: Mutex::new(vec![0; GPIO_BLOCK_LEN / 4]),
                maps: AtomicUsize::new(0),
            }),
        }
    }

    /// Inspect the raw register words.
    pub fn with_registers<R>(&self, f: impl FnOnce(&[u32]) -> R) -> R {
        f(&self.lock())
    }

    /// Drive an external signal onto `pin`, latching edge events where enabled.
    ///
    /// Out-of-range pins are ignored.
    pub fn drive_input(&self, pin: u8, level: Level) {
        if let Ok(pin) = Pin::new(pin) {
            let (bank, bit) = pin.bank_bit();
            set_level(&mut self.lock(), bank, bit, level);
        }
    }

    /// Current level of `pin` as seen in GPLEV.
    #[must_use]
    pub fn level(&self, pin: u8) -> Level {
        match Pin::new(pin) {
            Ok(pin) => {
                let (bank, bit) = pin.bank_bit();
                Level::from(self.lock()[GPLEV0 + bank] & bit != 0)
            }
            Err(_) => Level::Low,
        }
    }

    /// How many times the block has been mapped.
    #[must_use]
    pub fn map_count(&self) -> usize {
        self.shared.maps.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u32>> {
        self.shared.regs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RegisterMapper for SimGpio {
    type Block = SimGpioBlock;

    fn map(&self, physical_base: u64, length: usize) -> HalResult<SimGpioBlock> {
        if physical_base != GPIO_BASE || length > GPIO_BLOCK_LEN {
            return Err(HalError::MemAccessFailure);
        }
        self.shared.maps.fetch_add(1, Ordering::Relaxed);
        Ok(SimGpioBlock { sim: self.clone() })
    }
}

/// A mapped view of a [`SimGpio`].
#[derive(Debug)]
pub struct SimGpioBlock {
    sim: SimGpio,
}

impl RegisterBlock for SimGpioBlock {
    fn read(&self, index: usize) -> u32 {
        self.sim.lock().get(index).copied().unwrap_or(0)
    }

    fn write(&self, index: usize, value: u32) {
        let mut regs = self.sim.lock();
        match index {
            i if i == GPSET0 || i == GPSET0 + 1 => {
                for_each_bit(value, |bit| set_level(&mut regs, i - GPSET0, bit, Level::High));
            }
            i if i == GPCLR0 || i == GPCLR0 + 1 => {
                for_each_bit(value, |bit| set_level(&mut regs, i - GPCLR0, bit, Level::Low));
            }
            i if i == GPLEV0 || i == GPLEV0 + 1 => {}
            i if i == GPEDS0 || i == GPEDS0 + 1 => regs[i] &= !value,
            i if i < regs.len() => regs[i] = value,
            _ => {}
        }
    }
}

fn for_each_bit(value: u32, mut f: impl FnMut(u32)) {
    (0..32).map(|n| 1u32 << n).filter(|b| value & b != 0).for_each(|b| f(b));
}

fn set_level(regs: &mut [u32], bank: usize, bit: u32, level: Level) {
    let was_high = regs[GPLEV0 + bank] & bit != 0;
    let high = bool::from(level);
    if was_high == high {
        return;
    }
    if high {
        regs[GPLEV0 + bank] |= bit;
        if regs[GPREN0 + bank] & bit != 0 {
            regs[GPEDS0 + bank] |= bit;
        }
    } else {
        regs[GPLEV0 + bank] &= !bit;
        if regs[GPFEN0 + bank] & bit != 0 {
            regs[GPEDS0 + bank] |= bit;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn set_and_clear_update_level() {
        let sim = SimGpio::new();
        let block = sim.map(GPIO_BASE, GPIO_BLOCK_LEN).unwrap();
        block.write(GPSET0 + 1, 1 << 3);
        assert_eq!(sim.level(35), Level::High);
        block.write(GPCLR0 + 1, 1 << 3);
        assert_eq!(sim.level(35), Level::Low);
    }

    #[test]
    fn edge_events_latch_and_clear_on_write_one() {
        let sim = SimGpio::new();
        let block = sim.map(GPIO_BASE, GPIO_BLOCK_LEN).unwrap();
        block.write(GPFEN0, 1 << 14);
        sim.drive_input(14, Level::High);
        assert_eq!(block.read(GPEDS0), 0);
        sim.drive_input(14, Level::Low);
        assert_eq!(block.read(GPEDS0), 1 << 14);
        block.write(GPEDS0, 1 << 14);
        assert_eq!(block.read(GPEDS0), 0);
    }

    #[test]
    fn rejects_foreign_base() {
        assert_eq!(
            SimGpio::new().map(0xFE80_4000, 0x20).unwrap_err(),
            HalError::MemAccessFailure
        );
    }
}
