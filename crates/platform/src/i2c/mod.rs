//! I2C bus controller.
//!
//! Two independent BSC buses, each owning its register window behind a
//! per-bus lock. Every public transfer runs the [`protocol::advance`] state
//! machine to completion while holding that lock, so address programming
//! and data transfer are never interleaved between threads.
//!
//! | Bus        | Pins      | Function | Base         |
//! |------------|-----------|----------|--------------|
//! | [`Bus::Bus1`] | GPIO 2/3 | ALT0 | `0xFE80_4000` |
//! | [`Bus::Bus2`] | GPIO 4/5 | ALT5 | `0xFE20_5600` |
//!
//! A kernel `/dev/i2c-N` backend lives in [`linux_dev`].

pub mod bsc;
mod device;
pub mod linux_dev;
pub mod protocol;

use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::{BSC1_BASE, BSC2_BASE, BSC_LEN, CORE_CLOCK_HZ};
use crate::error::{HalError, HalResult};
use crate::gpio::{GpioController, GpioMode};
use crate::register::{RegisterBlock, RegisterMapper};

pub use device::BusDevice;
pub use protocol::Outcome;
use protocol::{advance, Action, State, Transfer};

/// Lowest address probed by [`I2cController::scan`].
pub const SCAN_FIRST: u8 = 0x03;
/// Highest address probed by [`I2cController::scan`].
pub const SCAN_LAST: u8 = 0x77;

// ── Bus selection ───────────────────────────────────────────────────────────

/// One of the two BSC buses exposed by the HAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bus {
    /// BSC1 on GPIO 2/3.
    Bus1,
    /// BSC3 on GPIO 4/5.
    Bus2,
}

impl Bus {
    /// Both buses, in index order.
    pub const ALL: [Self; 2] = [Self::Bus1, Self::Bus2];

    /// Physical base of the bus's register block.
    #[must_use]
    pub const fn base(self) -> u64 {
        match self {
            Self::Bus1 => BSC1_BASE,
            Self::Bus2 => BSC2_BASE,
        }
    }

    /// SDA and SCL GPIO numbers.
    #[must_use]
    pub const fn pins(self) -> (u8, u8) {
        match self {
            Self::Bus1 => (2, 3),
            Self::Bus2 => (4, 5),
        }
    }

    /// Alternate function that routes the pins to this controller.
    #[must_use]
    pub const fn alt_function(self) -> GpioMode {
        match self {
            Self::Bus1 => GpioMode::Alt0,
            Self::Bus2 => GpioMode::Alt5,
        }
    }

    const fn index(self) -> usize {
        match self {
            Self::Bus1 => 0,
            Self::Bus2 => 1,
        }
    }
}

impl TryFrom<u8> for Bus {
    type Error = HalError;

    fn try_from(value: u8) -> HalResult<Self> {
        match value {
            1 => Ok(Self::Bus1),
            2 => Ok(Self::Bus2),
            _ => Err(HalError::InvalidArgs),
        }
    }
}

// ── Configuration ───────────────────────────────────────────────────────────

/// Controller-wide settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct I2cConfig {
    /// Clock feeding the BSC divider.
    pub core_clock_hz: u32,
    /// Maximum consecutive status polls without progress before a transfer
    /// is abandoned. `None` waits forever.
    pub poll_limit: Option<u32>,
}

impl I2cConfig {
    /// Same configuration with a bounded busy-wait.
    #[must_use]
    pub const fn with_poll_limit(mut self, limit: u32) -> Self {
        self.poll_limit = Some(limit);
        self
    }
}

impl Default for I2cConfig {
    fn default() -> Self {
        Self {
            core_clock_hz: CORE_CLOCK_HZ,
            poll_limit: None,
        }
    }
}

// ── Scan result ─────────────────────────────────────────────────────────────

/// Addresses that acknowledged a probe, in ascending order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    found: heapless::Vec<u8, 128>,
}

impl ScanResult {
    /// Responding addresses.
    #[must_use]
    pub fn addresses(&self) -> &[u8] {
        &self.found
    }

    /// `true` if `addr` responded.
    #[must_use]
    pub fn contains(&self, addr: u8) -> bool {
        self.found.contains(&addr)
    }

    /// Number of responding addresses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.found.len()
    }

    /// `true` if nothing responded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.found.is_empty()
    }

    fn record(&mut self, addr: u8) {
        // 7-bit addresses always fit in 128 slots.
        let _ = self.found.push(addr);
    }
}

impl<'a> IntoIterator for &'a ScanResult {
    type Item = &'a u8;
    type IntoIter = core::slice::Iter<'a, u8>;

    fn into_iter(self) -> Self::IntoIter {
        self.found.iter()
    }
}

// ── Controller ──────────────────────────────────────────────────────────────

struct BusState<B> {
    regs: B,
    divisor: u16,
}

/// Register-level driver for both BSC buses.
///
/// `M` maps the BSC blocks, `G` is the mapper of the shared GPIO controller
/// used for pin muxing.
pub struct I2cController<M: RegisterMapper, G: RegisterMapper> {
    mapper: M,
    gpio: Arc<GpioController<G>>,
    config: I2cConfig,
    buses: [Mutex<Option<BusState<M::Block>>>; 2],
}

impl<M: RegisterMapper, G: RegisterMapper> I2cController<M, G> {
    /// Controller with the default configuration.
    pub fn new(mapper: M, gpio: Arc<GpioController<G>>) -> Self {
        Self::with_config(mapper, gpio, I2cConfig::default())
    }

    /// Controller with an explicit configuration.
    pub fn with_config(mapper: M, gpio: Arc<GpioController<G>>, config: I2cConfig) -> Self {
        Self {
            mapper,
            gpio,
            config,
            buses: [Mutex::new(None), Mutex::new(None)],
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &I2cConfig {
        &self.config
    }

    /// The mapper backing the BSC blocks.
    pub fn mapper(&self) -> &M {
        &self.mapper
    }

    /// Bring up `bus` at `hz`.
    ///
    /// Maps the registers, muxes SDA/SCL, programs the divisor, enables the
    /// controller and runs a [`scan`](Self::scan) as a self-test.
    ///
    /// # Errors
    ///
    /// - [`HalError::InvalidArgs`] if `hz == 0`
    /// - [`HalError::AlreadyInitialized`] if the bus is already mapped
    /// - [`HalError::NotInitialized`] if the GPIO controller is not initialized
    /// - [`HalError::MemAccessFailure`] if mapping fails
    pub fn init(&self, bus: Bus, hz: u32) -> HalResult<()> {
        if hz == 0 {
            return Err(HalError::InvalidArgs);
        }
        let mut slot = self.lock(bus);
        if slot.is_some() {
            tracing::warn!(?bus, "i2c bus already initialized");
            return Err(HalError::AlreadyInitialized);
        }
        if !self.gpio.is_initialized() {
            return Err(HalError::NotInitialized);
        }

        let regs = self.mapper.map(bus.base(), BSC_LEN)?;
        let (sda, scl) = bus.pins();
        self.gpio.set_mode(sda, bus.alt_function())?;
        self.gpio.set_mode(scl, bus.alt_function())?;

        let divisor = bsc::divisor(self.config.core_clock_hz, hz);
        regs.write(bsc::DIV, u32::from(divisor));
        regs.write(bsc::C, bsc::C_I2CEN);

        let found = self.scan_locked(bus, &regs);
        tracing::info!(?bus, hz, divisor, devices = ?found.addresses(), "i2c bus initialized");
        *slot = Some(BusState { regs, divisor });
        Ok(())
    }

    /// Disable and unmap `bus`. Idempotent.
    pub fn deinit(&self, bus: Bus) {
        if let Some(state) = self.lock(bus).take() {
            state.regs.write(bsc::C, 0);
            tracing::info!(?bus, "i2c bus deinitialized");
        }
    }

    /// `true` while `bus` is mapped.
    pub fn is_initialized(&self, bus: Bus) -> bool {
        self.lock(bus).is_some()
    }

    /// Divisor programmed at init, if the bus is up.
    pub fn divisor(&self, bus: Bus) -> Option<u16> {
        self.lock(bus).as_ref().map(|s| s.divisor)
    }

    /// Probe every address in `0x03..=0x77` with a one-byte read.
    ///
    /// The BSC cannot issue a zero-length transfer (`DLEN = 0` never
    /// completes), so the SMBus quick-write probe is not available here.
    /// A read can pop a byte from slaves with FIFO or clear-on-read
    /// registers; use [`linux_dev`] for a quick-write scan on such buses.
    ///
    /// NACK, clock-stretch timeout and a probe abandoned by the poll limit
    /// all mean "absent" and never stop the scan.
    ///
    /// # Errors
    ///
    /// [`HalError::NotInitialized`] if the bus is not up.
    pub fn scan(&self, bus: Bus) -> HalResult<ScanResult> {
        let slot = self.lock(bus);
        let state = slot.as_ref().ok_or(HalError::NotInitialized)?;
        Ok(self.scan_locked(bus, &state.regs))
    }

    /// Write `bytes` to `addr`.
    ///
    /// # Errors
    ///
    /// [`HalError::InvalidArgs`] for an empty or oversized payload or an
    /// address above `0x7F`, [`HalError::NotInitialized`], or
    /// [`HalError::Failed`] on NACK / clock-stretch timeout.
    pub fn write(&self, bus: Bus, addr: u8, bytes: &[u8]) -> HalResult<()> {
        check_addr(addr)?;
        check_len(bytes.len())?;
        self.execute(bus, &Transfer::write(addr, bytes), &mut [])
    }

    /// Write a single byte to `addr`.
    ///
    /// # Errors
    ///
    /// As [`write`](Self::write).
    pub fn write_byte(&self, bus: Bus, addr: u8, byte: u8) -> HalResult<()> {
        self.write(bus, addr, &[byte])
    }

    /// Read `len` bytes from `addr`.
    ///
    /// # Errors
    ///
    /// As [`write`](Self::write).
    pub fn read(&self, bus: Bus, addr: u8, len: usize) -> HalResult<Vec<u8>> {
        check_len(len)?;
        let mut buf = vec![0; len];
        self.read_into(bus, addr, &mut buf)?;
        Ok(buf)
    }

    /// Fill `buf` from `addr`.
    ///
    /// # Errors
    ///
    /// As [`write`](Self::write).
    pub fn read_into(&self, bus: Bus, addr: u8, buf: &mut [u8]) -> HalResult<()> {
        check_addr(addr)?;
        check_len(buf.len())?;
        self.execute(bus, &Transfer::read(addr, buf.len()), buf)
    }

    /// Write `wbytes` then read `rlen` bytes after a repeated start.
    ///
    /// # Errors
    ///
    /// [`HalError::InvalidArgs`] unless `1 <= wbytes.len() <= 16` and
    /// `rlen >= 1`, checked before any register is touched. Otherwise as
    /// [`write`](Self::write).
    pub fn write_then_read(
        &self,
        bus: Bus,
        addr: u8,
        wbytes: &[u8],
        rlen: usize,
    ) -> HalResult<Vec<u8>> {
        check_combined(wbytes.len(), rlen)?;
        let mut buf = vec![0; rlen];
        self.write_then_read_into(bus, addr, wbytes, &mut buf)?;
        Ok(buf)
    }

    /// Write `wbytes` then fill `buf` after a repeated start.
    ///
    /// # Errors
    ///
    /// As [`write_then_read`](Self::write_then_read).
    pub fn write_then_read_into(
        &self,
        bus: Bus,
        addr: u8,
        wbytes: &[u8],
        buf: &mut [u8],
    ) -> HalResult<()> {
        check_addr(addr)?;
        check_combined(wbytes.len(), buf.len())?;
        self.execute(bus, &Transfer::write_read(addr, wbytes, buf.len()), buf)
    }

    /// An `embedded_hal::i2c::I2c` handle bound to `bus`.
    pub fn device(&self, bus: Bus) -> BusDevice<'_, M, G> {
        BusDevice::new(self, bus)
    }

    // ── internals ──────────────────────────────────────────────────────────

    fn execute(&self, bus: Bus, transfer: &Transfer<'_>, buf: &mut [u8]) -> HalResult<()> {
        let slot = self.lock(bus);
        let state = slot.as_ref().ok_or(HalError::NotInitialized)?;
        match self.run(&state.regs, transfer, buf)? {
            Outcome::Done => Ok(()),
            Outcome::Nack => {
                tracing::warn!(?bus, addr = format_args!("{:#04x}", transfer.addr), "i2c nack");
                Err(HalError::Failed)
            }
            Outcome::ClockStretchTimeout => {
                tracing::warn!(
                    ?bus,
                    addr = format_args!("{:#04x}", transfer.addr),
                    "i2c clock stretch timeout"
                );
                Err(HalError::Failed)
            }
        }
    }

    fn scan_locked(&self, bus: Bus, regs: &M::Block) -> ScanResult {
        let mut result = ScanResult::default();
        let mut probe = [0u8; 1];
        for addr in SCAN_FIRST..=SCAN_LAST {
            match self.run(regs, &Transfer::read(addr, 1), &mut probe) {
                Ok(Outcome::Done) => result.record(addr),
                Ok(Outcome::Nack) => {
                    tracing::trace!(?bus, addr = format_args!("{addr:#04x}"), "scan: no ack");
                }
                Ok(Outcome::ClockStretchTimeout) => {
                    tracing::warn!(?bus, addr = format_args!("{addr:#04x}"), "scan: clock stretch timeout");
                }
                Err(e) => {
                    tracing::warn!(?bus, addr = format_args!("{addr:#04x}"), error = %e, "scan: probe abandoned");
                }
            }
        }
        tracing::debug!(?bus, found = result.len(), "scan complete");
        result
    }

    /// Drive one transfer to completion against `regs`.
    fn run(&self, regs: &M::Block, transfer: &Transfer<'_>, buf: &mut [u8]) -> HalResult<Outcome> {
        let wbytes = transfer.write_bytes();
        let mut state = State::Idle;
        let mut idle_polls: u32 = 0;
        let mut status = 0;

        loop {
            let (next, action) = advance(state, transfer, status);
            match action {
                Action::Program { addr, len } => {
                    regs.write(bsc::S, bsc::S_STICKY);
                    regs.write(bsc::C, bsc::C_I2CEN | bsc::C_CLEAR);
                    regs.write(bsc::A, u32::from(addr));
                    regs.write(bsc::DLEN, u32::from(len));
                }
                Action::PushByte { index } => {
                    let byte = wbytes.get(index).copied().unwrap_or(0);
                    regs.write(bsc::FIFO, u32::from(byte));
                }
                Action::PopByte { index } => {
                    let byte = regs.read(bsc::FIFO).to_le_bytes()[0];
                    if let Some(slot) = buf.get_mut(index) {
                        *slot = byte;
                    }
                }
                Action::Start { read } => {
                    let dir = if read { bsc::C_READ } else { 0 };
                    regs.write(bsc::C, bsc::C_I2CEN | bsc::C_ST | dir);
                }
                Action::Pivot { len } => {
                    regs.write(bsc::S, bsc::S_DONE);
                    regs.write(bsc::DLEN, u32::from(len));
                    regs.write(bsc::C, bsc::C_I2CEN | bsc::C_ST | bsc::C_READ);
                }
                Action::Poll => {
                    idle_polls += 1;
                    if self.config.poll_limit.is_some_and(|limit| idle_polls > limit) {
                        clear(regs);
                        tracing::warn!(
                            addr = format_args!("{:#04x}", transfer.addr),
                            polls = idle_polls,
                            "i2c transfer abandoned: poll limit exceeded"
                        );
                        return Err(HalError::Failed);
                    }
                }
                Action::Finish(outcome) => {
                    clear(regs);
                    return Ok(outcome);
                }
            }
            if !matches!(action, Action::Poll) {
                idle_polls = 0;
            }
            state = next;
            status = regs.read(bsc::S);
        }
    }

    fn lock(&self, bus: Bus) -> MutexGuard<'_, Option<BusState<M::Block>>> {
        self.buses[bus.index()]
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<M: RegisterMapper, G: RegisterMapper> core::fmt::Debug for I2cController<M, G> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("I2cController")
            .field("config", &self.config)
            .field("bus1", &self.is_initialized(Bus::Bus1))
            .field("bus2", &self.is_initialized(Bus::Bus2))
            .finish_non_exhaustive()
    }
}

fn clear<B: RegisterBlock>(regs: &B) {
    regs.write(bsc::C, bsc::C_I2CEN | bsc::C_CLEAR);
    regs.write(bsc::S, bsc::S_STICKY);
}

fn check_addr(addr: u8) -> HalResult<()> {
    if addr > 0x7F {
        return Err(HalError::InvalidArgs);
    }
    Ok(())
}

fn check_len(len: usize) -> HalResult<()> {
    if len == 0 || len > bsc::DLEN_MAX {
        return Err(HalError::InvalidArgs);
    }
    Ok(())
}

fn check_combined(wlen: usize, rlen: usize) -> HalResult<()> {
    if !(1..=bsc::FIFO_DEPTH).contains(&wlen) {
        return Err(HalError::InvalidArgs);
    }
    check_len(rlen)
}
