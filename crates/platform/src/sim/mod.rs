//! Simulation backends for host-side testing.
//!
//! Behavioural models that stand in for `/dev/mem` and the codec:
//!
//! - [`SimGpio`]: GPIO register file with set/clear, level and sticky
//!   edge-event semantics.
//! - [`SimI2c`]: two tick-driven BSC controllers with attachable
//!   [`SimDevice`] slaves. Every register write and every addressed slave is
//!   logged.
//! - [`SimPcmDevice`]: synthetic capture, recorded playback, an open-stream
//!   counter and optional XRUN injection.
//!
//! Exported to other crates with the `sim` feature.

mod bsc;
mod gpio;
mod pcm;

pub use bsc::{RegisterFile, SimBsc, SimDevice, SimI2c};
pub use gpio::{SimGpio, SimGpioBlock};
pub use pcm::{SimPcmDevice, SimPcmStream};
