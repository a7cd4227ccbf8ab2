//! Audio engine configuration.
//!
//! # Default stream layout
//!
//! | Direction | Device        | Format | Channels | Rate     | Period |
//! |-----------|---------------|--------|----------|----------|--------|
//! | Capture   | `plughw:2,0`  | S32LE  | 2        | 24 kHz   | 1024   |
//! | Playback  | `plughw:2,1`  | S16LE  | 1        | 24 kHz   | 1024   |
//!
//! Captured frames are reduced to mono S16LE (one channel, high 16 bits,
//! gain 4) before they reach the ring buffer or a recording file.

use std::time::Duration;

use platform::pcm::Direction;
use platform::{HalError, HalResult, SampleFormat, StreamParams};

/// Capture device on the CM4 audio HAT.
pub const DEFAULT_CAPTURE_DEVICE: &str = "plughw:2,0";
/// Playback device on the CM4 audio HAT.
pub const DEFAULT_PLAYBACK_DEVICE: &str = "plughw:2,1";
/// Default frames per second.
pub const DEFAULT_SAMPLE_RATE: u32 = 24_000;
/// Default frames per period.
pub const DEFAULT_PERIOD_FRAMES: usize = 1024;
/// Default capture ring size in bytes (about 1.4 s of mono S16 at 24 kHz).
pub const DEFAULT_RING_CAPACITY: usize = 64 * 1024;
/// Default integer gain applied to the captured high half-word.
pub const DEFAULT_GAIN: i32 = 4;

/// Engine-wide audio settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioConfig {
    /// Backend name of the capture device.
    pub capture_device: String,
    /// Backend name of the playback device.
    pub playback_device: String,
    /// Frames per second, shared by capture and playback.
    pub sample_rate: u32,
    /// Interleaved channels delivered by the capture device.
    pub capture_channels: u16,
    /// Capture sample encoding.
    pub capture_format: SampleFormat,
    /// Which capture channel is kept by the downmix.
    pub capture_channel: u16,
    /// Interleaved channels accepted by the playback device.
    pub playback_channels: u16,
    /// Playback sample encoding.
    pub playback_format: SampleFormat,
    /// Frames per read/write call.
    pub period_frames: usize,
    /// Capture ring size in bytes (rounded up to a power of two).
    pub ring_capacity: usize,
    /// Integer gain applied during the downmix.
    pub gain: i32,
    /// How long an idle worker waits for a command before re-checking state.
    pub poll_interval: Duration,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_device: DEFAULT_CAPTURE_DEVICE.into(),
            playback_device: DEFAULT_PLAYBACK_DEVICE.into(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            capture_channels: 2,
            capture_format: SampleFormat::S32Le,
            capture_channel: 0,
            playback_channels: 1,
            playback_format: SampleFormat::S16Le,
            period_frames: DEFAULT_PERIOD_FRAMES,
            ring_capacity: DEFAULT_RING_CAPACITY,
            gain: DEFAULT_GAIN,
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl AudioConfig {
    /// The audio HAT layout at 48 kHz.
    pub fn hat_48khz() -> Self {
        Self {
            sample_rate: 48_000,
            ring_capacity: 128 * 1024,
            ..Self::default()
        }
    }

    /// Mono S16 in both directions at unit gain, for codecs that already
    /// deliver the final format.
    pub fn mono_s16(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            capture_channels: 1,
            capture_format: SampleFormat::S16Le,
            gain: 1,
            ..Self::default()
        }
    }

    /// Builder: replace the worker poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Builder: replace the period size.
    #[must_use]
    pub fn with_period_frames(mut self, frames: usize) -> Self {
        self.period_frames = frames;
        self
    }

    /// Builder: replace the ring capacity.
    #[must_use]
    pub fn with_ring_capacity(mut self, bytes: usize) -> Self {
        self.ring_capacity = bytes;
        self
    }

    /// Reject settings no stream can be opened with.
    ///
    /// # Errors
    ///
    /// [`HalError::InvalidArgs`] for a zero rate, period, channel count or
    /// ring, a capture channel outside the capture layout, a non-positive
    /// gain, a zero poll interval, or a ring smaller than one converted
    /// period.
    pub fn validate(&self) -> HalResult<()> {
        let ok = self.sample_rate > 0
            && self.period_frames > 0
            && self.capture_channels > 0
            && self.playback_channels > 0
            && self.capture_channel < self.capture_channels
            && self.gain > 0
            && !self.poll_interval.is_zero()
            && self.ring_capacity >= self.period_frames * SampleFormat::S16Le.bytes()
            && !self.capture_device.is_empty()
            && !self.playback_device.is_empty();
        if ok {
            Ok(())
        } else {
            tracing::warn!(?self, "rejecting audio configuration");
            Err(HalError::InvalidArgs)
        }
    }

    /// Stream parameters for the capture device.
    pub fn capture_params(&self) -> StreamParams {
        StreamParams {
            device: self.capture_device.clone(),
            direction: Direction::Capture,
            sample_rate: self.sample_rate,
            channels: self.capture_channels,
            format: self.capture_format,
            period_frames: self.period_frames,
        }
    }

    /// Stream parameters for the playback device.
    pub fn playback_params(&self) -> StreamParams {
        StreamParams {
            device: self.playback_device.clone(),
            direction: Direction::Playback,
            sample_rate: self.sample_rate,
            channels: self.playback_channels,
            format: self.playback_format,
            period_frames: self.period_frames,
        }
    }

    /// Bytes of mono S16 produced by converting one capture period.
    pub fn converted_period_bytes(&self) -> usize {
        self.period_frames * SampleFormat::S16Le.bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_hat_layout() {
        let c = AudioConfig::default();
        assert_eq!(c.sample_rate, 24_000);
        assert_eq!(c.capture_params().device, "plughw:2,0");
        assert_eq!(c.capture_params().bytes_per_frame(), 8);
        assert_eq!(c.playback_params().device, "plughw:2,1");
        assert_eq!(c.playback_params().bytes_per_frame(), 2);
        assert_eq!(c.gain, 4);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn presets_validate() {
        assert!(AudioConfig::hat_48khz().validate().is_ok());
        assert!(AudioConfig::mono_s16(16_000).validate().is_ok());
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let bad = [
            AudioConfig { sample_rate: 0, ..AudioConfig::default() },
            AudioConfig { period_frames: 0, ..AudioConfig::default() },
            AudioConfig { capture_channel: 2, ..AudioConfig::default() },
            AudioConfig { gain: 0, ..AudioConfig::default() },
            AudioConfig::default().with_poll_interval(Duration::ZERO),
            AudioConfig::default().with_ring_capacity(16),
        ];
        for c in bad {
            assert_eq!(c.validate(), Err(HalError::InvalidArgs), "{c:?}");
        }
    }
}
