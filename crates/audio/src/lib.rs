//! Audio capture and playback over the platform PCM interface.
//!
//! # Pipeline
//!
//! ```text
//! codec capture (S32LE, 2 ch)
//!   → record worker: read period, recover xrun, downmix to mono S16LE × gain
//!   → RingBuffer (lock-free SPSC, drop-newest when full)
//!   → AudioEngine::pop_capture
//!
//! play_file / play_raw
//!   → playback worker: chunk, whole frames, write loop, drain at EOF
//!   → codec playback (S16LE, 1 ch)
//! ```
//!
//! Each worker owns its stream and buffers. The engine talks to it through
//! an `mpsc` command channel, reads its [`WorkerState`], and can abort the
//! stream it is blocked on. A new playback request preempts the current one.
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "alsa")]
//! # fn main() -> platform::HalResult<()> {
//! use audio::{AudioConfig, AudioEngine};
//! use platform::pcm::alsa_backend::AlsaDevice;
//!
//! let engine = AudioEngine::new(AlsaDevice, AudioConfig::default())?;
//! engine.init()?;
//! engine.play_file("/tmp/prompt.raw")?;
//! engine.record_to_file("/tmp/take.raw", 2.0)?;
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "alsa"))]
//! # fn main() {}
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod config;
pub mod convert;
mod engine;
mod playback;
mod record;
pub mod ring_buffer;
mod worker;

pub use config::AudioConfig;
pub use engine::AudioEngine;
pub use playback::PlaybackSource;
pub use ring_buffer::{Consumer, Full, Producer, RingBuffer};
pub use worker::WorkerState;
