//! BSC transaction state machine.
//!
//! [`advance`] is a pure function of the current [`State`], the
//! [`Transfer`] being executed and the last value read from the status
//! register. It returns the next state and one [`Action`] for the driver to
//! perform against the registers. Keeping register I/O out of this module
//! makes every transition testable with plain status words.
//!
//! ```text
//! Idle ──Program──▶ Addressed ──Start──▶ Transferring ──Finish──▶ Complete ──▶ Idle
//!                       │                     ▲
//!                       └─Start─▶ AwaitActive ┘ Pivot   (write-then-read only)
//! ```
//!
//! Error flags are checked before FIFO service, and FIFO service before
//! `DONE`, so a NACK is never mistaken for completion and a read always
//! drains the bytes that arrived alongside `DONE`.

use super::bsc::{S_CLKT, S_DONE, S_ERR, S_RXD, S_TA, S_TXD};

/// Shape of a single bus transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation<'a> {
    /// Write all bytes.
    Write(&'a [u8]),
    /// Read this many bytes.
    Read(usize),
    /// Write the bytes, then read `n` bytes after a repeated start.
    WriteRead(&'a [u8], usize),
}

/// A transaction in flight: 7-bit address plus operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer<'a> {
    /// 7-bit slave address.
    pub addr: u8,
    /// What to do once addressed.
    pub op: Operation<'a>,
}

impl<'a> Transfer<'a> {
    /// Plain write.
    #[must_use]
    pub const fn write(addr: u8, bytes: &'a [u8]) -> Self {
        Self {
            addr,
            op: Operation::Write(bytes),
        }
    }

    /// Plain read of `len` bytes.
    #[must_use]
    pub const fn read(addr: u8, len: usize) -> Self {
        Self {
            addr,
            op: Operation::Read(len),
        }
    }

    /// Write `bytes` then read `len` bytes.
    #[must_use]
    pub const fn write_read(addr: u8, bytes: &'a [u8], len: usize) -> Self {
        Self {
            addr,
            op: Operation::WriteRead(bytes, len),
        }
    }

    /// Bytes sent before any read phase.
    #[must_use]
    pub fn write_bytes(&self) -> &'a [u8] {
        match self.op {
            Operation::Write(w) | Operation::WriteRead(w, _) => w,
            Operation::Read(_) => &[],
        }
    }

    /// Bytes received in the read phase.
    #[must_use]
    pub fn read_len(&self) -> usize {
        match self.op {
            Operation::Read(n) | Operation::WriteRead(_, n) => n,
            Operation::Write(_) => 0,
        }
    }
}

/// How a transaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// `DONE` with no error flag.
    Done,
    /// `ERR`: the slave did not acknowledge.
    Nack,
    /// `CLKT`: the slave held SCL longer than the timeout.
    ClockStretchTimeout,
}

/// Position in the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// No transaction in flight.
    Idle,
    /// Address and length programmed; pre-filling the FIFO for writes.
    Addressed {
        /// Bytes pushed into the FIFO so far.
        pushed: usize,
    },
    /// Write phase of a write-then-read started; waiting for `TA`.
    AwaitActive,
    /// Start asserted; servicing the FIFO until `DONE`.
    Transferring {
        /// Bytes pushed into the FIFO so far.
        pushed: usize,
        /// Bytes popped from the FIFO so far.
        popped: usize,
        /// `true` once the read phase is running.
        reading: bool,
    },
    /// Finished; sticky flags cleared.
    Complete(Outcome),
}

/// Register-level step for the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Clear sticky flags and FIFO, then program `A = addr` and `DLEN = len`.
    Program {
        /// 7-bit address for `A`.
        addr: u8,
        /// Value for `DLEN`.
        len: u16,
    },
    /// Write `write_bytes()[index]` to the FIFO.
    PushByte {
        /// Index into the transfer's write bytes.
        index: usize,
    },
    /// Read the FIFO into `buffer[index]`.
    PopByte {
        /// Index into the caller's read buffer.
        index: usize,
    },
    /// Assert start, with `READ` when `read` is set.
    Start {
        /// Direction bit.
        read: bool,
    },
    /// Clear `DONE`, set `DLEN = len` and assert `READ|ST` (repeated start).
    Pivot {
        /// Value for `DLEN`.
        len: u16,
    },
    /// Nothing to do; read the status register again.
    Poll,
    /// Clear sticky flags and FIFO; the transaction is over.
    Finish(Outcome),
}

/// One step of the state machine.
///
/// `status` is the latest value of the `S` register. Lengths are assumed to
/// have been validated by the caller (non-empty, within `DLEN`).
#[must_use]
pub fn advance(state: State, transfer: &Transfer<'_>, status: u32) -> (State, Action) {
    let wlen = transfer.write_bytes().len();
    let rlen = transfer.read_len();

    match state {
        State::Idle => {
            let len = match transfer.op {
                Operation::Write(w) | Operation::WriteRead(w, _) => w.len(),
                Operation::Read(n) => n,
            };
            (
                State::Addressed { pushed: 0 },
                Action::Program {
                    addr: transfer.addr,
                    len: dlen(len),
                },
            )
        }

        State::Addressed { pushed } => match transfer.op {
            Operation::Read(_) => (
                State::Transferring {
                    pushed: 0,
                    popped: 0,
                    reading: true,
                },
                Action::Start { read: true },
            ),
            Operation::Write(_) if pushed < wlen && status & S_TXD != 0 => (
                State::Addressed { pushed: pushed + 1 },
                Action::PushByte { index: pushed },
            ),
            Operation::Write(_) => (
                State::Transferring {
                    pushed,
                    popped: 0,
                    reading: false,
                },
                Action::Start { read: false },
            ),
            Operation::WriteRead(..) if pushed < wlen => {
                if status & S_TXD != 0 {
                    (
                        State::Addressed { pushed: pushed + 1 },
                        Action::PushByte { index: pushed },
                    )
                } else {
                    (state, Action::Poll)
                }
            }
            Operation::WriteRead(..) => (State::AwaitActive, Action::Start { read: false }),
        },

        State::AwaitActive => {
            if let Some(outcome) = error_outcome(status) {
                (State::Complete(outcome), Action::Finish(outcome))
            } else if status & (S_TA | S_DONE) != 0 {
                (
                    State::Transferring {
                        pushed: wlen,
                        popped: 0,
                        reading: true,
                    },
                    Action::Pivot { len: dlen(rlen) },
                )
            } else {
                (state, Action::Poll)
            }
        }

        State::Transferring {
            pushed,
            popped,
            reading,
        } => {
            if let Some(outcome) = error_outcome(status) {
                return (State::Complete(outcome), Action::Finish(outcome));
            }
            if reading && popped < rlen && status & S_RXD != 0 {
                return (
                    State::Transferring {
                        pushed,
                        popped: popped + 1,
                        reading,
                    },
                    Action::PopByte { index: popped },
                );
            }
            if !reading && pushed < wlen && status & S_TXD != 0 {
                return (
                    State::Transferring {
                        pushed: pushed + 1,
                        popped,
                        reading,
                    },
                    Action::PushByte { index: pushed },
                );
            }
            if status & S_DONE != 0 {
                (
                    State::Complete(Outcome::Done),
                    Action::Finish(Outcome::Done),
                )
            } else {
                (state, Action::Poll)
            }
        }

        State::Complete(_) => (State::Idle, Action::Poll),
    }
}

fn error_outcome(status: u32) -> Option<Outcome> {
    if status & S_ERR != 0 {
        Some(Outcome::Nack)
    } else if status & S_CLKT != 0 {
        Some(Outcome::ClockStretchTimeout)
    } else {
        None
    }
}

fn dlen(len: usize) -> u16 {
    u16::try_from(len).unwrap_or(u16::MAX)
}
