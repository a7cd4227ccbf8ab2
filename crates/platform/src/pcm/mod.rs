//! PCM codec interface.
//!
//! The audio engine talks to capture and playback devices only through
//! [`PcmDevice`] / [`PcmStream`]. Hardware builds use the ALSA backend in
//! [`alsa_backend`] (feature `alsa`); tests use `sim::SimPcmDevice`.
//!
//! Streams are blocking and interleaved. A blocked read or write can be cut
//! short from another thread through the stream's [`AbortHandle`], which is
//! how workers are preempted and shut down.

#[cfg(feature = "alsa")]
pub mod alsa_backend;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

/// Stream direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Microphone / line in.
    Capture,
    /// Speaker / line out.
    Playback,
}

/// Interleaved sample format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    /// Signed 16-bit little-endian.
    S16Le,
    /// Signed 32-bit little-endian.
    S32Le,
}

impl SampleFormat {
    /// Bytes per sample.
    #[must_use]
    pub const fn bytes(self) -> usize {
        match self {
            Self::S16Le => 2,
            Self::S32Le => 4,
        }
    }
}

/// Parameters for opening a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamParams {
    /// Backend device name, e.g. `plughw:2,0`.
    pub device: String,
    /// Capture or playback.
    pub direction: Direction,
    /// Frames per second.
    pub sample_rate: u32,
    /// Interleaved channels per frame.
    pub channels: u16,
    /// Sample encoding.
    pub format: SampleFormat,
    /// Frames per hardware period.
    pub period_frames: usize,
}

impl StreamParams {
    /// Bytes in one interleaved frame.
    #[must_use]
    pub fn bytes_per_frame(&self) -> usize {
        usize::from(self.channels) * self.format.bytes()
    }

    /// Bytes in one period.
    #[must_use]
    pub fn period_bytes(&self) -> usize {
        self.period_frames * self.bytes_per_frame()
    }
}

/// Codec-level failure.
#[derive(Debug, Error)]
pub enum PcmError {
    /// Buffer overrun (capture) or underrun (playback).
    #[error("xrun")]
    Xrun,
    /// Device suspended by power management.
    #[error("stream suspended")]
    Suspended,
    /// The stream's [`AbortHandle`] fired.
    #[error("stream aborted")]
    Aborted,
    /// Backend rejected the device or its configuration.
    #[error("pcm device error: {0}")]
    Device(String),
    /// OS-level failure.
    #[error("pcm i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl PcmError {
    /// `true` for failures that [`PcmStream::recover`] can clear.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Xrun | Self::Suspended)
    }
}

/// Clonable flag that makes a stream's blocked calls return
/// [`PcmError::Aborted`].
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    /// A fresh, un-fired handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the abort.
    pub fn abort(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// `true` once [`abort`](Self::abort) was called.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A source of PCM streams.
pub trait PcmDevice: Send + Sync + 'static {
    /// Stream type produced by [`open`](Self::open).
    type Stream: PcmStream;

    /// Open and prepare a stream.
    ///
    /// # Errors
    ///
    /// Backend-specific [`PcmError`].
    fn open(&self, params: &StreamParams) -> Result<Self::Stream, PcmError>;
}

/// An open, prepared PCM stream. Closing happens on drop.
pub trait PcmStream: Send {
    /// Parameters the stream was opened with.
    fn params(&self) -> &StreamParams;

    /// Read whole interleaved frames into `buf`, returning the frame count.
    ///
    /// `buf.len()` must be a multiple of the frame size.
    ///
    /// # Errors
    ///
    /// [`PcmError::Xrun`] / [`PcmError::Suspended`] (recoverable),
    /// [`PcmError::Aborted`], or a fatal error.
    fn read_frames(&mut self, buf: &mut [u8]) -> Result<usize, PcmError>;

    /// Write whole interleaved frames from `buf`, returning the frame count
    /// accepted (possibly fewer than offered).
    ///
    /// # Errors
    ///
    /// As [`read_frames`](Self::read_frames).
    fn write_frames(&mut self, buf: &[u8]) -> Result<usize, PcmError>;

    /// Return the stream to a running state after a recoverable error.
    ///
    /// # Errors
    ///
    /// `err` itself, or a new error, if recovery failed.
    fn recover(&mut self, err: &PcmError) -> Result<(), PcmError>;

    /// Block until queued playback data has been played.
    ///
    /// # Errors
    ///
    /// Backend-specific [`PcmError`].
    fn drain(&mut self) -> Result<(), PcmError>;

    /// Handle that aborts this stream's blocking calls.
    fn abort_handle(&self) -> AbortHandle;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_geometry() {
        let p = StreamParams {
            device: "plughw:2,0".into(),
            direction: Direction::Capture,
            sample_rate: 24_000,
            channels: 2,
            format: SampleFormat::S32Le,
            period_frames: 1024,
        };
        assert_eq!(p.bytes_per_frame(), 8);
        assert_eq!(p.period_bytes(), 8192);
    }

    #[test]
    fn recoverable_classification() {
        assert!(PcmError::Xrun.is_recoverable());
        assert!(PcmError::Suspended.is_recoverable());
        assert!(!PcmError::Aborted.is_recoverable());
        assert!(!PcmError::Device("gone".into()).is_recoverable());
    }

    #[test]
    fn abort_handle_is_shared() {
        let a = AbortHandle::new();
        let b = a.clone();
        assert!(!a.is_aborted());
        b.abort();
        assert!(a.is_aborted());
    }
}
