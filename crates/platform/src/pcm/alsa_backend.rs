//! ALSA PCM backend.
//!
//! Streams are opened non-blocking and driven by a `wait` loop with a short
//! timeout, so an [`AbortHandle`] is honoured within one poll interval even
//! when the codec stops producing or consuming frames.

use std::time::Duration;

use alsa::pcm::{Access, Format, HwParams, State, PCM};
use alsa::ValueOr;

use super::{AbortHandle, Direction, PcmDevice, PcmError, PcmStream, SampleFormat, StreamParams};

/// Milliseconds per `snd_pcm_wait` before re-checking the abort flag.
const WAIT_MS: u32 = 100;

/// Opens ALSA PCM streams by device name.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlsaDevice;

impl AlsaDevice {
    /// New device factory.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl PcmDevice for AlsaDevice {
    type Stream = AlsaStream;

    fn open(&self, params: &StreamParams) -> Result<AlsaStream, PcmError> {
        let dir = match params.direction {
            Direction::Capture => alsa::Direction::Capture,
            Direction::Playback => alsa::Direction::Playback,
        };
        let pcm = PCM::new(&params.device, dir, true).map_err(|e| device_err(params, &e))?;

        {
            let hw = HwParams::any(&pcm).map_err(|e| device_err(params, &e))?;
            hw.set_access(Access::RWInterleaved)
                .map_err(|e| device_err(params, &e))?;
            hw.set_format(match params.format {
                SampleFormat::S16Le => Format::S16LE,
                SampleFormat::S32Le => Format::S32LE,
            })
            .map_err(|e| device_err(params, &e))?;
            hw.set_channels(u32::from(params.channels))
                .map_err(|e| device_err(params, &e))?;
            let rate = hw
                .set_rate_near(params.sample_rate, ValueOr::Nearest)
                .map_err(|e| device_err(params, &e))?;
            let period = alsa::pcm::Frames::try_from(params.period_frames)
                .map_err(|_| PcmError::Device("period too large".into()))?;
            let period = hw
                .set_period_size_near(period, ValueOr::Nearest)
                .map_err(|e| device_err(params, &e))?;
            pcm.hw_params(&hw).map_err(|e| device_err(params, &e))?;
            if rate != params.sample_rate {
                tracing::warn!(
                    device = %params.device,
                    requested = params.sample_rate,
                    actual = rate,
                    "pcm rate adjusted"
                );
            }
            tracing::debug!(device = %params.device, rate, period, "pcm configured");
        }
        pcm.prepare().map_err(|e| device_err(params, &e))?;

        Ok(AlsaStream {
            pcm,
            params: params.clone(),
            abort: AbortHandle::new(),
        })
    }
}

/// An open ALSA PCM handle.
pub struct AlsaStream {
    pcm: PCM,
    params: StreamParams,
    abort: AbortHandle,
}

impl AlsaStream {
    fn wait(&self) -> Result<(), PcmError> {
        if self.abort.is_aborted() {
            return Err(PcmError::Aborted);
        }
        match self.pcm.wait(Some(WAIT_MS)) {
            Ok(_) => Ok(()),
            Err(e) => Err(classify(&e)),
        }
    }
}

impl PcmStream for AlsaStream {
    fn params(&self) -> &StreamParams {
        &self.params
    }

    fn read_frames(&mut self, buf: &mut [u8]) -> Result<usize, PcmError> {
        loop {
            if self.abort.is_aborted() {
                return Err(PcmError::Aborted);
            }
            match self.pcm.io_bytes().readi(buf) {
                Ok(frames) if frames > 0 => return Ok(frames),
                Ok(_) => self.wait()?,
                Err(e) if e.errno() == libc::EAGAIN => self.wait()?,
                Err(e) => return Err(classify(&e)),
            }
        }
    }

    fn write_frames(&mut self, buf: &[u8]) -> Result<usize, PcmError> {
        loop {
            if self.abort.is_aborted() {
                return Err(PcmError::Aborted);
            }
            match self.pcm.io_bytes().writei(buf) {
                Ok(frames) if frames > 0 => return Ok(frames),
                Ok(_) => self.wait()?,
                Err(e) if e.errno() == libc::EAGAIN => self.wait()?,
                Err(e) => return Err(classify(&e)),
            }
        }
    }

    fn recover(&mut self, err: &PcmError) -> Result<(), PcmError> {
        match err {
            PcmError::Xrun => {
                tracing::warn!(device = %self.params.device, "pcm xrun");
                self.pcm.prepare().map_err(|e| classify(&e))
            }
            PcmError::Suspended => {
                tracing::warn!(device = %self.params.device, "pcm suspended");
                loop {
                    match self.pcm.resume() {
                        Ok(()) => return Ok(()),
                        Err(e) if e.errno() == libc::EAGAIN => {
                            std::thread::sleep(Duration::from_millis(1));
                        }
                        Err(_) => return self.pcm.prepare().map_err(|e| classify(&e)),
                    }
                }
            }
            PcmError::Aborted => Err(PcmError::Aborted),
            PcmError::Device(msg) => Err(PcmError::Device(msg.clone())),
            PcmError::Io(e) => Err(PcmError::Device(e.to_string())),
        }
    }

    fn drain(&mut self) -> Result<(), PcmError> {
        match self.pcm.drain() {
            Ok(()) => return Ok(()),
            Err(e) if e.errno() == libc::EAGAIN => {}
            Err(e) => return Err(classify(&e)),
        }
        // Non-blocking drain returns immediately; wait for the state change.
        while self.pcm.state() == State::Draining {
            if self.abort.is_aborted() {
                return Err(PcmError::Aborted);
            }
            std::thread::sleep(Duration::from_millis(u64::from(WAIT_MS) / 10));
        }
        Ok(())
    }

    fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }
}

fn classify(e: &alsa::Error) -> PcmError {
    match e.errno() {
        libc::EPIPE => PcmError::Xrun,
        libc::ESTRPIPE => PcmError::Suspended,
        _ => PcmError::Device(e.to_string()),
    }
}

fn device_err(params: &StreamParams, e: &alsa::Error) -> PcmError {
    tracing::error!(device = %params.device, error = %e, "pcm open failed");
    PcmError::Device(e.to_string())
}
