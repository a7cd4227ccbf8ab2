//! Board constants for the BCM2711 (Compute Module 4).
//!
//! All register offsets elsewhere in the crate are expressed relative to the
//! physical bases defined here. Bus addresses in the datasheet (`0x7E…`) map
//! to `PERIPH_BASE` in the low-peripheral ARM physical address space.

/// ARM physical address of the legacy peripheral block.
pub const PERIPH_BASE: u64 = 0xFE00_0000;

/// Core clock feeding the BSC divider, in Hz.
pub const CORE_CLOCK_HZ: u32 = 1_500_000_000;

/// GPIO register block (function select, set/clear, level, edge detect).
pub const GPIO_BASE: u64 = PERIPH_BASE + 0x20_0000;
/// Bytes mapped for the GPIO block (one page, as exposed by `/dev/gpiomem`).
pub const GPIO_BLOCK_LEN: usize = 4096;

/// BSC1 controller (header pins GPIO 2/3).
pub const BSC1_BASE: u64 = PERIPH_BASE + 0x80_4000;
/// BSC3 controller (GPIO 4/5, exposed here as bus 2).
pub const BSC2_BASE: u64 = PERIPH_BASE + 0x20_5600;
/// Bytes spanned by one BSC register set (eight 32-bit registers).
pub const BSC_LEN: usize = 0x20;

/// Full physical memory device; the mapping offset is the physical address.
pub const DEV_MEM_PATH: &str = "/dev/mem";
/// GPIO-only memory device; offset 0 is always the GPIO block.
pub const DEV_GPIOMEM_PATH: &str = "/dev/gpiomem";

/// Highest addressable GPIO pin on the BCM2711.
pub const GPIO_MAX_PIN: u8 = 53;

/// Convenience: `khz(100) == 100_000`.
#[must_use]
pub const fn khz(x: u32) -> u32 {
    x * 1_000
}

/// Convenience: `mhz(25) == 25_000_000`.
#[must_use]
pub const fn mhz(x: u32) -> u32 {
    x * 1_000_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bsc_bases_sit_inside_peripheral_block() {
        assert_eq!(BSC1_BASE, 0xFE80_4000);
        assert_eq!(BSC2_BASE, 0xFE20_5600);
        assert_eq!(BSC_LEN / 4, 8);
    }

    #[test]
    fn frequency_helpers() {
        assert_eq!(khz(100), 100_000);
        assert_eq!(mhz(25), 25_000_000);
    }
}
