//! Behavioural BSC controller model.
//!
//! Status and FIFO advance one tick per read of the status register, so the
//! controller's busy-wait loops drive the simulated slaves. Slaves are
//! register files, or fault models for NACK, clock stretch and a bus that
//! never completes.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::BSC_LEN;
use crate::error::{HalError, HalResult};
use crate::i2c::bsc::{
    A, C, CLKT, C_CLEAR, C_READ, C_ST, DEL, DIV, DLEN, FIFO, FIFO_DEPTH, S, S_CLKT, S_DONE,
    S_ERR, S_RXD, S_RXF, S_STICKY, S_TA, S_TXD, S_TXE,
};
use crate::i2c::Bus;
use crate::register::{RegisterBlock, RegisterMapper};

/// Bytes a read transfer moves into the FIFO per status poll.
const READ_BYTES_PER_TICK: usize = 2;

/// A 256-byte register file with an auto-incrementing pointer.
///
/// The first byte of every write sets the pointer; later bytes store and
/// advance. Reads return from the pointer and advance.
#[derive(Debug, Clone)]
pub struct RegisterFile {
    regs: [u8; 256],
    pointer: u8,
}

impl RegisterFile {
    /// Zeroed register file.
    #[must_use]
    pub fn new() -> Self {
        Self {
            regs: [0; 256],
            pointer: 0,
        }
    }

    /// Value of register `reg`.
    #[must_use]
    pub fn get(&self, reg: u8) -> u8 {
        self.regs[usize::from(reg)]
    }

    /// Preload register `reg`.
    pub fn set(&mut self, reg: u8, value: u8) {
        self.regs[usize::from(reg)] = value;
    }

    fn receive(&mut self, byte: u8, first: bool) {
        if first {
            self.pointer = byte;
        } else {
            self.regs[usize::from(self.pointer)] = byte;
            self.pointer = self.pointer.wrapping_add(1);
        }
    }

    fn transmit(&mut self) -> u8 {
        let byte = self.regs[usize::from(self.pointer)];
        self.pointer = self.pointer.wrapping_add(1);
        byte
    }
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

/// Behaviour of a simulated slave.
#[derive(Debug, Clone)]
pub enum SimDevice {
    /// Acknowledges and serves a register file.
    Ack(RegisterFile),
    /// Never acknowledges (`ERR`).
    Nack,
    /// Holds SCL low until the controller gives up (`CLKT`).
    Wedged,
    /// Keeps the transfer active forever.
    Stuck,
}

impl SimDevice {
    /// Acknowledging device with the given registers preloaded.
    #[must_use]
    pub fn with_registers(init: &[(u8, u8)]) -> Self {
        let mut file = RegisterFile::new();
        for &(reg, value) in init {
            file.set(reg, value);
        }
        Self::Ack(file)
    }
}

#[derive(Debug, Clone, Copy)]
struct Active {
    addr: u8,
    read: bool,
    remaining: u32,
    first: bool,
}

#[derive(Debug, Default)]
struct Model {
    regs: [u32; 8],
    sticky: u32,
    fifo: VecDeque<u8>,
    active: Option<Active>,
    devices: HashMap<u8, SimDevice>,
    writes: Vec<(usize, u32)>,
    probed: Vec<u8>,
}

impl Model {
    fn status(&self) -> u32 {
        let mut s = self.sticky;
        if self.active.is_some() {
            s |= S_TA;
        }
        if self.fifo.is_empty() {
            s |= S_TXE;
        } else {
            s |= S_RXD;
        }
        if self.fifo.len() < FIFO_DEPTH {
            s |= S_TXD;
        } else {
            s |= S_RXF;
        }
        s
    }

    fn tick(&mut self) {
        let Self {
            sticky,
            fifo,
            active,
            devices,
            ..
        } = self;
        let Some(xfer) = active.as_mut() else {
            return;
        };
        match devices.get_mut(&xfer.addr) {
            None | Some(SimDevice::Nack) => {
                *sticky |= S_ERR | S_DONE;
                *active = None;
            }
            Some(SimDevice::Wedged) => {
                *sticky |= S_CLKT | S_DONE;
                *active = None;
            }
            Some(SimDevice::Stuck) => {}
            Some(SimDevice::Ack(file)) => {
                if xfer.read {
                    for _ in 0..READ_BYTES_PER_TICK {
                        if xfer.remaining == 0 || fifo.len() >= FIFO_DEPTH {
                            break;
                        }
                        fifo.push_back(file.transmit());
                        xfer.remaining -= 1;
                    }
                } else if let Some(byte) = fifo.pop_front() {
                    file.receive(byte, xfer.first);
                    xfer.first = false;
                    xfer.remaining -= 1;
                }
                if xfer.remaining == 0 {
                    *sticky |= S_DONE;
                    *active = None;
                }
            }
        }
    }

    /// Deliver whatever write bytes are queued, ahead of a repeated start.
    fn flush_write(&mut self) {
        let Some(xfer) = self.active else {
            return;
        };
        if xfer.read {
            return;
        }
        let mut xfer = xfer;
        while xfer.remaining > 0 {
            let Some(byte) = self.fifo.pop_front() else {
                break;
            };
            if let Some(SimDevice::Ack(file)) = self.devices.get_mut(&xfer.addr) {
                file.receive(byte, xfer.first);
            }
            xfer.first = false;
            xfer.remaining -= 1;
        }
        self.active = None;
    }

    fn start(&mut self, read: bool) {
        self.flush_write();
        let addr = self.regs[A].to_le_bytes()[0] & 0x7F;
        self.probed.push(addr);
        self.active = Some(Active {
            addr,
            read,
            remaining: self.regs[DLEN] & 0xFFFF,
            first: true,
        });
    }
}

/// Handle to one simulated BSC controller; also its mapped register block.
#[derive(Debug, Clone, Default)]
pub struct SimBsc {
    model: Arc<Mutex<Model>>,
}

impl SimBsc {
    /// Attach a slave at `addr`, replacing any existing one.
    pub fn attach(&self, addr: u8, device: SimDevice) {
        self.lock().devices.insert(addr, device);
    }

    /// Remove the slave at `addr`.
    pub fn detach(&self, addr: u8) {
        self.lock().devices.remove(&addr);
    }

    /// Register `reg` of the slave at `addr`, if it serves a register file.
    #[must_use]
    pub fn device_register(&self, addr: u8, reg: u8) -> Option<u8> {
        match self.lock().devices.get(&addr) {
            Some(SimDevice::Ack(file)) => Some(file.get(reg)),
            _ => None,
        }
    }

    /// Set register `reg` of the slave at `addr`.
    pub fn set_device_register(&self, addr: u8, reg: u8, value: u8) {
        if let Some(SimDevice::Ack(file)) = self.lock().devices.get_mut(&addr) {
            file.set(reg, value);
        }
    }

    /// Current value of a controller register, without advancing time.
    #[must_use]
    pub fn register(&self, index: usize) -> u32 {
        let model = self.lock();
        match index {
            S => model.status(),
            i => model.regs.get(i).copied().unwrap_or(0),
        }
    }

    /// Every `(register, value)` written since the last [`clear_log`](Self::clear_log).
    #[must_use]
    pub fn register_writes(&self) -> Vec<(usize, u32)> {
        self.lock().writes.clone()
    }

    /// Slave addresses targeted by each start condition, in order.
    #[must_use]
    pub fn probed(&self) -> Vec<u8> {
        self.lock().probed.clone()
    }

    /// Forget logged writes and probes.
    pub fn clear_log(&self) {
        let mut model = self.lock();
        model.writes.clear();
        model.probed.clear();
    }

    fn lock(&self) -> MutexGuard<'_, Model> {
        self.model.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RegisterBlock for SimBsc {
    fn read(&self, index: usize) -> u32 {
        let mut model = self.lock();
        match index {
            S => {
                let status = model.status();
                model.tick();
                status
            }
            FIFO => model.fifo.pop_front().map_or(0, u32::from),
            i => model.regs.get(i).copied().unwrap_or(0),
        }
    }

    fn write(&self, index: usize, value: u32) {
        let mut model = self.lock();
        model.writes.push((index, value));
        match index {
            C => {
                model.regs[C] = value & !(C_ST | C_CLEAR);
                if value & C_CLEAR != 0 {
                    model.fifo.clear();
                }
                if value & C_ST != 0 {
                    model.start(value & C_READ != 0);
                }
            }
            S => model.sticky &= !(value & S_STICKY),
            FIFO => {
                if model.fifo.len() < FIFO_DEPTH {
                    model.fifo.push_back(value.to_le_bytes()[0]);
                }
            }
            DLEN | A | DIV | DEL | CLKT => model.regs[index] = value,
            _ => {}
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    buses: [SimBsc; 2],
    maps: AtomicUsize,
}

/// Simulated pair of BSC controllers, usable as the I2C register mapper.
///
/// Clones share the same controllers.
#[derive(Debug, Clone, Default)]
pub struct SimI2c {
    shared: Arc<Shared>,
}

impl SimI2c {
    /// Two idle controllers with no slaves attached.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The controller behind `bus`.
    #[must_use]
    pub fn bsc(&self, bus: Bus) -> SimBsc {
        match bus {
            Bus::Bus1 => self.shared.buses[0].clone(),
            Bus::Bus2 => self.shared.buses[1].clone(),
        }
    }

    /// Successful `map` calls so far.
    #[must_use]
    pub fn map_count(&self) -> usize {
        self.shared.maps.load(Ordering::Relaxed)
    }
}

impl RegisterMapper for SimI2c {
    type Block = SimBsc;

    fn map(&self, physical_base: u64, length: usize) -> HalResult<SimBsc> {
        let bus = Bus::ALL
            .into_iter()
            .find(|b| b.base() == physical_base)
            .ok_or(HalError::MemAccessFailure)?;
        if length > BSC_LEN {
            return Err(HalError::MemAccessFailure);
        }
        self.shared.maps.fetch_add(1, Ordering::Relaxed);
        Ok(self.bsc(bus))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn unattached_address_nacks_after_one_tick() {
        let bsc = SimBsc::default();
        bsc.write(A, 0x30);
        bsc.write(DLEN, 1);
        bsc.write(C, C_ST | C_READ);
        assert_ne!(bsc.read(S) & S_TA, 0);
        let s = bsc.read(S);
        assert_ne!(s & S_ERR, 0);
        assert_ne!(s & S_DONE, 0);
        bsc.write(S, S_STICKY);
        assert_eq!(bsc.read(S) & S_STICKY, 0);
    }

    #[test]
    fn read_fills_fifo_from_register_file() {
        let bsc = SimBsc::default();
        bsc.attach(0x31, SimDevice::with_registers(&[(0, 7), (1, 8), (2, 9)]));
        bsc.write(A, 0x31);
        bsc.write(DLEN, 3);
        bsc.write(C, C_ST | C_READ);
        while bsc.read(S) & S_DONE == 0 {}
        assert_eq!(bsc.read(FIFO), 7);
        assert_eq!(bsc.read(FIFO), 8);
        assert_eq!(bsc.read(FIFO), 9);
        assert_eq!(bsc.probed(), vec![0x31]);
    }

    #[test]
    fn mapper_only_knows_bsc_bases() {
        let sim = SimI2c::new();
        assert!(sim.map(Bus::Bus1.base(), BSC_LEN).is_ok());
        assert_eq!(sim.map(0x1000, BSC_LEN).unwrap_err(), HalError::MemAccessFailure);
        assert_eq!(sim.map_count(), 1);
    }
}
