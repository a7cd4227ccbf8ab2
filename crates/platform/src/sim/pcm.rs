//! Synthetic codec: generated capture, counted playback, fault injection.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::pcm::{AbortHandle, Direction, PcmDevice, PcmError, PcmStream, SampleFormat, StreamParams};

#[derive(Debug, Default)]
struct Shared {
    open_streams: AtomicUsize,
    opened_total: AtomicUsize,
    recoveries: AtomicUsize,
    hold_playback: AtomicBool,
    fail_open: AtomicBool,
    played: Mutex<Vec<u8>>,
    xrun_every: Option<usize>,
    call_delay: Option<Duration>,
    max_write_frames: Option<usize>,
}

/// Simulated codec.
///
/// Capture produces a ramp on channel 0 (the inverted ramp on other
/// channels), playback appends to an in-memory sink. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct SimPcmDevice {
    shared: Arc<Shared>,
}

impl SimPcmDevice {
    /// Device with no pacing or fault injection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `n`-th read or write on a stream fails with [`PcmError::Xrun`].
    #[must_use]
    pub fn with_xrun_every(self, n: usize) -> Self {
        self.reconfigure(|s| s.xrun_every = Some(n.max(1)))
    }

    /// Sleep this long inside every read and write, like a real period wait.
    #[must_use]
    pub fn with_call_delay(self, delay: Duration) -> Self {
        self.reconfigure(|s| s.call_delay = Some(delay))
    }

    /// Accept at most `frames` per write call (short writes).
    #[must_use]
    pub fn with_max_write_frames(self, frames: usize) -> Self {
        self.reconfigure(|s| s.max_write_frames = Some(frames.max(1)))
    }

    /// While set, playback writes block until their stream is aborted.
    pub fn hold_playback(&self, hold: bool) {
        self.shared.hold_playback.store(hold, Ordering::Release);
    }

    /// While set, `open` fails with [`PcmError::Device`].
    pub fn fail_open(&self, fail: bool) {
        self.shared.fail_open.store(fail, Ordering::Release);
    }

    /// Streams currently open.
    #[must_use]
    pub fn open_streams(&self) -> usize {
        self.shared.open_streams.load(Ordering::Acquire)
    }

    /// Streams opened over the device's lifetime.
    #[must_use]
    pub fn opened_total(&self) -> usize {
        self.shared.opened_total.load(Ordering::Acquire)
    }

    /// Successful `recover` calls.
    #[must_use]
    pub fn recoveries(&self) -> usize {
        self.shared.recoveries.load(Ordering::Acquire)
    }

    /// Bytes written by every playback stream so far.
    #[must_use]
    pub fn played(&self) -> Vec<u8> {
        self.shared
            .played
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn reconfigure(self, f: impl FnOnce(&mut Shared)) -> Self {
        let mut shared = Arc::try_unwrap(self.shared).unwrap_or_else(|arc| Shared {
            xrun_every: arc.xrun_every,
            call_delay: arc.call_delay,
            max_write_frames: arc.max_write_frames,
            ..Shared::default()
        });
        f(&mut shared);
        Self {
            shared: Arc::new(shared),
        }
    }
}

impl PcmDevice for SimPcmDevice {
    type Stream = SimPcmStream;

    fn open(&self, params: &StreamParams) -> Result<SimPcmStream, PcmError> {
        if self.shared.fail_open.load(Ordering::Acquire) {
            return Err(PcmError::Device(format!("cannot open {}", params.device)));
        }
        self.shared.open_streams.fetch_add(1, Ordering::AcqRel);
        self.shared.opened_total.fetch_add(1, Ordering::AcqRel);
        Ok(SimPcmStream {
            shared: Arc::clone(&self.shared),
            params: params.clone(),
            abort: AbortHandle::new(),
            calls: 0,
            position: 0,
        })
    }
}

/// Stream handed out by [`SimPcmDevice`].
#[derive(Debug)]
pub struct SimPcmStream {
    shared: Arc<Shared>,
    params: StreamParams,
    abort: AbortHandle,
    calls: usize,
    position: u64,
}

impl SimPcmStream {
    fn enter(&mut self) -> Result<(), PcmError> {
        if self.abort.is_aborted() {
            return Err(PcmError::Aborted);
        }
        if let Some(delay) = self.shared.call_delay {
            std::thread::sleep(delay);
        }
        self.calls += 1;
        if self.shared.xrun_every.is_some_and(|n| self.calls % n == 0) {
            return Err(PcmError::Xrun);
        }
        Ok(())
    }

    fn sample(&self, frame: u64, channel: u16) -> i16 {
        let ramp = i16::try_from(frame % 1000).unwrap_or(0);
        if channel == 0 {
            ramp
        } else {
            -ramp
        }
    }
}

impl PcmStream for SimPcmStream {
    fn params(&self) -> &StreamParams {
        &self.params
    }

    fn read_frames(&mut self, buf: &mut [u8]) -> Result<usize, PcmError> {
        if self.params.direction != Direction::Capture {
            return Err(PcmError::Device("not a capture stream".into()));
        }
        self.enter()?;
        let frame_bytes = self.params.bytes_per_frame();
        let frames = buf.len() / frame_bytes;
        let sample_bytes = self.params.format.bytes();
        for (i, frame) in buf.chunks_exact_mut(frame_bytes).enumerate() {
            let n = self.position + i as u64;
            for (ch, slot) in frame.chunks_exact_mut(sample_bytes).enumerate() {
                let v = self.sample(n, u16::try_from(ch).unwrap_or(0));
                match self.params.format {
                    SampleFormat::S16Le => slot.copy_from_slice(&v.to_le_bytes()),
                    SampleFormat::S32Le => {
                        slot.copy_from_slice(&(i32::from(v) << 16).to_le_bytes());
                    }
                }
            }
        }
        self.position += frames as u64;
        Ok(frames)
    }

    fn write_frames(&mut self, buf: &[u8]) -> Result<usize, PcmError> {
        if self.params.direction != Direction::Playback {
            return Err(PcmError::Device("not a playback stream".into()));
        }
        while self.shared.hold_playback.load(Ordering::Acquire) {
            if self.abort.is_aborted() {
                return Err(PcmError::Aborted);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        self.enter()?;
        let frame_bytes = self.params.bytes_per_frame();
        let mut frames = buf.len() / frame_bytes;
        if let Some(max) = self.shared.max_write_frames {
            frames = frames.min(max);
        }
        self.shared
            .played
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(&buf[..frames * frame_bytes]);
        self.position += frames as u64;
        Ok(frames)
    }

    fn recover(&mut self, err: &PcmError) -> Result<(), PcmError> {
        if err.is_recoverable() {
            self.shared.recoveries.fetch_add(1, Ordering::AcqRel);
            Ok(())
        } else {
            Err(PcmError::Device(err.to_string()))
        }
    }

    fn drain(&mut self) -> Result<(), PcmError> {
        if self.abort.is_aborted() {
            return Err(PcmError::Aborted);
        }
        Ok(())
    }

    fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }
}

impl Drop for SimPcmStream {
    fn drop(&mut self) {
        self.shared.open_streams.fetch_sub(1, Ordering::AcqRel);
    }
}
