//! Peripheral HAL for the CM4 (BCM2711)
//!
//! Register-level access to the SoC blocks the rest of the workspace builds
//! on, plus the codec interface used by the audio engine.
//!
//! # Architecture Layers
//!
//! ```text
//! Collaborators (devices crate: PCA9685, INA219, MAX30102, servo, LED)
//!         ↓  embedded-hal traits
//! Audio engine (audio crate: ring buffer, record/playback workers)
//!         ↓  PcmDevice / PcmStream
//! Platform HAL (this crate)
//!   gpio ── i2c (BSC state machine) ── pcm
//!         ↓  RegisterBlock / RegisterMapper
//! Register windows (/dev/mem, /dev/gpiomem) or simulation (sim)
//! ```
//!
//! # Modules
//!
//! - [`register`] - owned `mmap` register windows and the mapper seam
//! - [`gpio`] - pin function, level and edge-detect control
//! - [`i2c`] - two BSC buses driven by an explicit state machine
//! - [`pcm`] - capture/playback stream interface (ALSA behind `alsa`)
//! - `sim` - behavioural register and codec models (`sim` feature or tests)
//!
//! # Features
//!
//! - `alsa`: ALSA codec backend (needs libasound)
//! - `sim`: export the simulation backends to other crates
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use platform::gpio::GpioController;
//! use platform::i2c::{Bus, I2cController};
//! use platform::register::{DevMemMapper, GpioMemMapper};
//!
//! # fn main() -> platform::HalResult<()> {
//! let gpio = Arc::new(GpioController::new(GpioMemMapper::new()));
//! gpio.init()?;
//! let i2c = I2cController::new(DevMemMapper::new(), Arc::clone(&gpio));
//! i2c.init(Bus::Bus1, 100_000)?;
//! i2c.write(Bus::Bus1, 0x47, &[0x00, 0x20])?;
//! # Ok(())
//! # }
//! ```

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)] // no .unwrap() in production code
#![deny(clippy::expect_used)] // no .expect() in production code
#![deny(clippy::panic)] // no panic!() in production code
#![deny(clippy::unreachable)] // no unreachable!() that isn't documented
#![deny(unused_must_use)]
// all Results must be handled
// ────────────────────────────────────────────────────────────────────────────
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(unsafe_op_in_unsafe_fn)] // unsafe fn body is not implicitly unsafe block
#![warn(clippy::print_stdout)] // prefer tracing over println! in lib code
// Pedantic lints suppressed for this hardware HAL crate:
#![allow(clippy::doc_markdown)] // hex addresses and register names in doc comments
#![allow(clippy::must_use_candidate)] // hardware accessors, callers decide
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod config;
pub mod error;
pub mod gpio;
pub mod i2c;
pub mod pcm;
pub mod register;
#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use error::{status_code, HalError, HalResult};
pub use gpio::{Edge, GpioController, GpioMode, GpioPin, Level};
pub use i2c::{Bus, I2cConfig, I2cController, ScanResult};
pub use pcm::{AbortHandle, PcmDevice, PcmError, PcmStream, SampleFormat, StreamParams};
pub use register::{RegisterBlock, RegisterMapper};
