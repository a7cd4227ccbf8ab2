//! Playback worker.
//!
//! A session streams one [`PlaybackSource`] to a freshly opened playback
//! stream, one period at a time. Only whole frames are written; short
//! writes are retried with the remaining frames. At end of input the stream
//! is drained and released.

use std::fs::File;
use std::io::{self, BufReader, Cursor, Read};
use std::ops::ControlFlow;
use std::sync::Arc;

use platform::{PcmDevice, PcmStream};

use crate::config::AudioConfig;
use crate::record::recover_or_stop;
use crate::worker::WorkerContext;

/// Raw interleaved PCM to play, already in the playback format.
pub enum PlaybackSource {
    /// Headerless PCM file.
    File(BufReader<File>),
    /// In-memory PCM.
    Memory(Cursor<Vec<u8>>),
}

impl PlaybackSource {
    /// Fill `buf` as far as the source allows, returning the byte count.
    /// Fewer than `buf.len()` bytes means end of input.
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

impl Read for PlaybackSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::File(f) => f.read(buf),
            Self::Memory(c) => c.read(buf),
        }
    }
}

impl core::fmt::Debug for PlaybackSource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::File(_) => f.write_str("PlaybackSource::File"),
            Self::Memory(c) => write!(f, "PlaybackSource::Memory({} bytes)", c.get_ref().len()),
        }
    }
}

/// Commands understood by the playback worker.
#[derive(Debug)]
pub(crate) enum PlaybackCommand {
    Play(PlaybackSource),
    Stop,
    Shutdown,
}

struct PlaybackSession<S> {
    stream: S,
    source: PlaybackSource,
    chunk: Vec<u8>,
}

/// State owned by the playback thread.
pub(crate) struct PlaybackWorker<D: PcmDevice> {
    pub(crate) device: Arc<D>,
    pub(crate) config: AudioConfig,
}

impl<D: PcmDevice> PlaybackWorker<D> {
    pub(crate) fn run(self, ctx: WorkerContext<PlaybackCommand>) {
        let mut session: Option<PlaybackSession<D::Stream>> = None;
        loop {
            if let Some(cmd) = ctx.next_command(session.is_some(), || PlaybackCommand::Shutdown) {
                match cmd {
                    PlaybackCommand::Play(source) => {
                        // No queueing: a new request replaces the current one.
                        release(&ctx, &mut session);
                        session = self.open(&ctx, source);
                    }
                    PlaybackCommand::Stop => release(&ctx, &mut session),
                    PlaybackCommand::Shutdown => {
                        release(&ctx, &mut session);
                        break;
                    }
                }
                continue;
            }
            if let Some(active) = session.as_mut() {
                if step(active).is_break() {
                    release(&ctx, &mut session);
                }
            }
        }
        ctx.state.set(crate::WorkerState::Stopped);
        tracing::debug!("playback worker exiting");
    }

    fn open(
        &self,
        ctx: &WorkerContext<PlaybackCommand>,
        source: PlaybackSource,
    ) -> Option<PlaybackSession<D::Stream>> {
        let params = self.config.playback_params();
        match self.device.open(&params) {
            Ok(stream) => {
                ctx.activate(stream.abort_handle());
                tracing::info!(device = %params.device, ?source, "playback started");
                Some(PlaybackSession {
                    stream,
                    source,
                    chunk: vec![0; params.period_bytes()],
                })
            }
            Err(e) => {
                tracing::error!(device = %params.device, error = %e, "cannot open playback stream");
                None
            }
        }
    }
}

/// One chunk: read, write whole frames, drain at end of input.
fn step<S: PcmStream>(s: &mut PlaybackSession<S>) -> ControlFlow<()> {
    let filled = match s.source.fill(&mut s.chunk) {
        Ok(n) => n,
        Err(e) => {
            tracing::error!(error = %e, "playback source read failed");
            return ControlFlow::Break(());
        }
    };
    let bpf = s.stream.params().bytes_per_frame();
    let frames = filled / bpf;
    if filled % bpf != 0 {
        tracing::debug!(bytes = filled % bpf, "dropping partial trailing frame");
    }
    if frames == 0 {
        if let Err(e) = s.stream.drain() {
            tracing::warn!(error = %e, "drain failed");
        }
        tracing::info!("playback finished");
        return ControlFlow::Break(());
    }

    let mut written = 0;
    while written < frames {
        match s.stream.write_frames(&s.chunk[written * bpf..frames * bpf]) {
            Ok(n) => written += n,
            Err(e) => recover_or_stop(&mut s.stream, &e, "playback")?,
        }
    }
    ControlFlow::Continue(())
}

fn release<S>(ctx: &WorkerContext<PlaybackCommand>, session: &mut Option<PlaybackSession<S>>) {
    if let Some(s) = session.take() {
        drop(s);
        ctx.deactivate();
        tracing::debug!("playback session released");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn fill_reads_until_full_or_eof() {
        let mut src = PlaybackSource::Memory(Cursor::new(vec![1, 2, 3, 4, 5]));
        let mut buf = [0u8; 4];
        assert_eq!(src.fill(&mut buf).unwrap(), 4);
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(src.fill(&mut buf).unwrap(), 1);
        assert_eq!(src.fill(&mut buf).unwrap(), 0);
    }

    #[test]
    fn debug_does_not_dump_contents() {
        let src = PlaybackSource::Memory(Cursor::new(vec![0; 10]));
        assert_eq!(format!("{src:?}"), "PlaybackSource::Memory(10 bytes)");
    }
}
