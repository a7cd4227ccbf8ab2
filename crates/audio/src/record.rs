//! Capture: the record worker and blocking record-to-writer.

use std::io::Write;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use platform::{HalError, HalResult, PcmDevice, PcmError, PcmStream};

use crate::config::AudioConfig;
use crate::convert;
use crate::ring_buffer::Producer;
use crate::worker::WorkerContext;

/// Commands understood by the record worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecordCommand {
    Start,
    Stop,
    Shutdown,
}

/// Open capture stream plus its working buffers.
struct RecordSession<S> {
    stream: S,
    raw: Vec<u8>,
    converted: Vec<u8>,
}

/// State owned by the record thread.
pub(crate) struct RecordWorker<D: PcmDevice> {
    pub(crate) device: Arc<D>,
    pub(crate) config: AudioConfig,
    pub(crate) producer: Producer,
    pub(crate) dropped: Arc<AtomicU64>,
}

impl<D: PcmDevice> RecordWorker<D> {
    pub(crate) fn run(mut self, ctx: WorkerContext<RecordCommand>) {
        let mut session: Option<RecordSession<D::Stream>> = None;
        loop {
            if let Some(cmd) = ctx.next_command(session.is_some(), || RecordCommand::Shutdown) {
                match cmd {
                    RecordCommand::Start => {
                        if session.is_none() {
                            session = self.open(&ctx);
                        }
                    }
                    RecordCommand::Stop => release(&ctx, &mut session),
                    RecordCommand::Shutdown => {
                        release(&ctx, &mut session);
                        break;
                    }
                }
                // Drain queued commands before blocking on the stream.
                continue;
            }
            if let Some(active) = session.as_mut() {
                if self.step(active).is_break() {
                    release(&ctx, &mut session);
                }
            }
        }
        ctx.state.set(crate::WorkerState::Stopped);
        tracing::debug!("record worker exiting");
    }

    fn open(&self, ctx: &WorkerContext<RecordCommand>) -> Option<RecordSession<D::Stream>> {
        let params = self.config.capture_params();
        match self.device.open(&params) {
            Ok(stream) => {
                ctx.activate(stream.abort_handle());
                tracing::info!(device = %params.device, rate = params.sample_rate, "recording started");
                Some(RecordSession {
                    stream,
                    raw: vec![0; params.period_bytes()],
                    converted: Vec::with_capacity(self.config.converted_period_bytes()),
                })
            }
            Err(e) => {
                tracing::error!(device = %params.device, error = %e, "cannot open capture stream");
                None
            }
        }
    }

    /// One period: read, recover on xrun, convert, push.
    fn step(&mut self, s: &mut RecordSession<D::Stream>) -> ControlFlow<()> {
        let frames = match s.stream.read_frames(&mut s.raw) {
            Ok(frames) => frames,
            Err(e) => return recover_or_stop(&mut s.stream, &e, "capture"),
        };
        let bpf = s.stream.params().bytes_per_frame();
        s.converted.clear();
        convert::to_mono_s16(
            &s.raw[..frames * bpf],
            self.config.capture_format,
            self.config.capture_channels,
            self.config.capture_channel,
            self.config.gain,
            &mut s.converted,
        );
        if let Err(full) = self.producer.push(&s.converted) {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(
                requested = full.requested,
                free = full.free,
                dropped_total = total,
                "capture ring full, dropping chunk"
            );
        }
        ControlFlow::Continue(())
    }
}

fn release<S>(ctx: &WorkerContext<RecordCommand>, session: &mut Option<RecordSession<S>>) {
    if let Some(s) = session.take() {
        drop(s);
        ctx.deactivate();
        tracing::info!("recording stopped");
    }
}

/// Shared xrun/suspend handling for both directions.
pub(crate) fn recover_or_stop<S: PcmStream>(stream: &mut S, err: &PcmError, what: &str) -> ControlFlow<()> {
    match err {
        PcmError::Aborted => {
            tracing::debug!(stream = what, "stream aborted");
            ControlFlow::Break(())
        }
        e if e.is_recoverable() => {
            tracing::warn!(stream = what, error = %e, "recovering stream");
            match stream.recover(e) {
                Ok(()) => ControlFlow::Continue(()),
                Err(e) => {
                    tracing::error!(stream = what, error = %e, "stream recovery failed");
                    ControlFlow::Break(())
                }
            }
        }
        e => {
            tracing::error!(stream = what, error = %e, "stream failed");
            ControlFlow::Break(())
        }
    }
}

/// Number of frames in `seconds` of audio at `rate`.
pub(crate) fn total_frames(seconds: f64, rate: u32) -> HalResult<u64> {
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(HalError::InvalidArgs);
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok((seconds * f64::from(rate)) as u64)
}

/// Capture `seconds` of audio from a fresh stream, writing mono S16LE to
/// `out`. Returns the number of frames written.
pub(crate) fn record_to_writer<D: PcmDevice, W: Write>(
    device: &D,
    config: &AudioConfig,
    out: &mut W,
    seconds: f64,
) -> HalResult<u64> {
    let total = total_frames(seconds, config.sample_rate)?;
    let params = config.capture_params();
    let mut stream = device.open(&params).map_err(|e| {
        tracing::error!(device = %params.device, error = %e, "cannot open capture stream");
        HalError::Failed
    })?;
    let bpf = params.bytes_per_frame();
    let mut raw = vec![0u8; params.period_bytes()];
    let mut converted = Vec::with_capacity(config.converted_period_bytes());
    let mut done = 0u64;

    tracing::info!(seconds, frames = total, device = %params.device, "recording to writer");
    while done < total {
        let wanted = usize::try_from(total - done)
            .unwrap_or(usize::MAX)
            .min(params.period_frames);
        let frames = match stream.read_frames(&mut raw[..wanted * bpf]) {
            Ok(frames) => frames,
            Err(e) => {
                if recover_or_stop(&mut stream, &e, "capture").is_break() {
                    return Err(HalError::Failed);
                }
                continue;
            }
        };
        converted.clear();
        convert::to_mono_s16(
            &raw[..frames * bpf],
            config.capture_format,
            config.capture_channels,
            config.capture_channel,
            config.gain,
            &mut converted,
        );
        out.write_all(&converted).map_err(|e| {
            tracing::error!(error = %e, "recording write failed");
            HalError::Failed
        })?;
        done += frames as u64;
    }
    out.flush().map_err(|e| {
        tracing::error!(error = %e, "recording flush failed");
        HalError::Failed
    })?;
    tracing::info!(frames = done, "recording finished");
    Ok(done)
}
