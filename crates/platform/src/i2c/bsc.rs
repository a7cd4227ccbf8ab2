//! BSC (Broadcom Serial Controller) register map.
//!
//! Word indices into the 0x20-byte register block, plus the control and
//! status bits the driver uses. `DONE`, `ERR` and `CLKT` are sticky and
//! cleared by writing 1.

/// Control register.
pub const C: usize = 0;
/// Status register.
pub const S: usize = 1;
/// Data length.
pub const DLEN: usize = 2;
/// Slave address.
pub const A: usize = 3;
/// Data FIFO.
pub const FIFO: usize = 4;
/// Clock divider.
pub const DIV: usize = 5;
/// Data delay.
pub const DEL: usize = 6;
/// Clock-stretch timeout.
pub const CLKT: usize = 7;

/// C: controller enable.
pub const C_I2CEN: u32 = 1 << 15;
/// C: start transfer.
pub const C_ST: u32 = 1 << 7;
/// C: clear FIFO (one-shot).
pub const C_CLEAR: u32 = 1 << 4;
/// C: read transfer.
pub const C_READ: u32 = 1 << 0;

/// S: clock-stretch timeout (sticky).
pub const S_CLKT: u32 = 1 << 9;
/// S: slave did not acknowledge (sticky).
pub const S_ERR: u32 = 1 << 8;
/// S: FIFO full.
pub const S_RXF: u32 = 1 << 7;
/// S: FIFO empty.
pub const S_TXE: u32 = 1 << 6;
/// S: FIFO holds received data.
pub const S_RXD: u32 = 1 << 5;
/// S: FIFO can accept data.
pub const S_TXD: u32 = 1 << 4;
/// S: FIFO needs reading.
pub const S_RXR: u32 = 1 << 3;
/// S: FIFO needs writing.
pub const S_TXW: u32 = 1 << 2;
/// S: transfer done (sticky).
pub const S_DONE: u32 = 1 << 1;
/// S: transfer active.
pub const S_TA: u32 = 1 << 0;

/// All write-1-to-clear status bits.
pub const S_STICKY: u32 = S_CLKT | S_ERR | S_DONE;

/// Hardware FIFO depth in bytes.
pub const FIFO_DEPTH: usize = 16;

/// Largest value the 16-bit DLEN field holds.
pub const DLEN_MAX: usize = 0xFFFF;

/// Clock divisor for a target bus frequency.
///
/// `core_clock_hz / hz`, clamped to the hardware range `2..=0xFFFF`.
#[must_use]
pub fn divisor(core_clock_hz: u32, hz: u32) -> u16 {
    let raw = core_clock_hz / hz.max(1);
    u16::try_from(raw.clamp(2, 0xFFFF)).unwrap_or(u16::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{khz, CORE_CLOCK_HZ};

    #[test]
    fn divisor_for_standard_rates() {
        assert_eq!(divisor(CORE_CLOCK_HZ, khz(100)), 15_000);
        assert_eq!(divisor(CORE_CLOCK_HZ, khz(400)), 3_750);
    }

    #[test]
    fn divisor_clamps_low_and_high() {
        assert_eq!(divisor(CORE_CLOCK_HZ, CORE_CLOCK_HZ), 2);
        assert_eq!(divisor(CORE_CLOCK_HZ, 1), 0xFFFF);
    }

    #[test]
    fn sticky_mask() {
        assert_eq!(S_STICKY, 0x302);
    }
}
