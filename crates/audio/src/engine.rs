//! `AudioEngine`: lifecycle and request surface for the two workers.

use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use platform::{HalError, HalResult, PcmDevice};

use crate::config::AudioConfig;
use crate::playback::{PlaybackCommand, PlaybackSource, PlaybackWorker};
use crate::record::{self, RecordCommand, RecordWorker};
use crate::ring_buffer::{Consumer, RingBuffer};
use crate::worker::{StateCell, Worker, WorkerState};

struct Running {
    record: Worker<RecordCommand>,
    playback: Worker<PlaybackCommand>,
}

/// Record and playback workers over one codec.
///
/// `init` spawns both workers idle. Recording pushes converted audio into
/// a lock-free ring drained with [`pop_capture`](Self::pop_capture);
/// playback takes a file or buffer and preempts whatever was playing.
/// `deinit` (also run on drop) stops, waits for and joins both workers.
pub struct AudioEngine<D: PcmDevice> {
    device: Arc<D>,
    config: AudioConfig,
    running: Mutex<Option<Running>>,
    consumer: Mutex<Option<Consumer>>,
    dropped: Arc<AtomicU64>,
    record_state: Arc<StateCell>,
    playback_state: Arc<StateCell>,
}

impl<D: PcmDevice> AudioEngine<D> {
    /// Engine over `device`. Nothing is opened or spawned until
    /// [`init`](Self::init).
    ///
    /// # Errors
    ///
    /// [`HalError::InvalidArgs`] if `config` does not validate.
    pub fn new(device: D, config: AudioConfig) -> HalResult<Self> {
        config.validate()?;
        Ok(Self {
            device: Arc::new(device),
            config,
            running: Mutex::new(None),
            consumer: Mutex::new(None),
            dropped: Arc::new(AtomicU64::new(0)),
            record_state: Arc::new(StateCell::new(WorkerState::Stopped)),
            playback_state: Arc::new(StateCell::new(WorkerState::Stopped)),
        })
    }

    /// The configuration in use.
    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    /// The codec.
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Allocate the capture ring and spawn both workers.
    ///
    /// # Errors
    ///
    /// - [`HalError::AlreadyInitialized`] if already running.
    /// - [`HalError::ThreadFailure`] if a worker cannot be spawned. Nothing
    ///   is left running in that case.
    pub fn init(&self) -> HalResult<()> {
        let mut running = self.lock_running();
        if running.is_some() {
            tracing::warn!("audio engine already initialized");
            return Err(HalError::AlreadyInitialized);
        }

        let (producer, consumer) = RingBuffer::with_capacity(self.config.ring_capacity);
        let recorder = RecordWorker {
            device: Arc::clone(&self.device),
            config: self.config.clone(),
            producer,
            dropped: Arc::clone(&self.dropped),
        };
        let record = Worker::spawn(
            "audio-record",
            Arc::clone(&self.record_state),
            self.config.poll_interval,
            move |ctx| recorder.run(ctx),
        )?;

        let player = PlaybackWorker {
            device: Arc::clone(&self.device),
            config: self.config.clone(),
        };
        let playback = match Worker::spawn(
            "audio-playback",
            Arc::clone(&self.playback_state),
            self.config.poll_interval,
            move |ctx| player.run(ctx),
        ) {
            Ok(w) => w,
            Err(e) => {
                record.shutdown(RecordCommand::Shutdown, self.config.poll_interval);
                return Err(e);
            }
        };

        self.dropped.store(0, Ordering::Relaxed);
        *self.lock_consumer() = Some(consumer);
        *running = Some(Running { record, playback });
        tracing::info!(
            rate = self.config.sample_rate,
            ring = self.config.ring_capacity,
            "audio engine initialized"
        );
        Ok(())
    }

    /// Stop both workers, release their streams and join them. Safe to call
    /// when not initialized.
    pub fn deinit(&self) {
        let Some(running) = self.lock_running().take() else {
            return;
        };
        let poll = self.config.poll_interval;
        running.record.shutdown(RecordCommand::Shutdown, poll);
        running.playback.shutdown(PlaybackCommand::Shutdown, poll);
        *self.lock_consumer() = None;
        tracing::info!("audio engine deinitialized");
    }

    /// `true` between `init` and `deinit`.
    pub fn is_initialized(&self) -> bool {
        self.lock_running().is_some()
    }

    /// Ask the record worker to open the capture stream and start filling
    /// the ring. A no-op if it is already recording.
    ///
    /// # Errors
    ///
    /// [`HalError::NotInitialized`] before `init`.
    pub fn start_recording(&self) -> HalResult<()> {
        self.with_running(|r| r.record.send(RecordCommand::Start))
    }

    /// Stop recording and release the capture stream.
    ///
    /// # Errors
    ///
    /// [`HalError::NotInitialized`] before `init`.
    pub fn stop_recording(&self) -> HalResult<()> {
        self.with_running(|r| {
            r.record.send(RecordCommand::Stop)?;
            r.record.abort_stream();
            Ok(())
        })
    }

    /// Play a headerless PCM file in the playback format, replacing any
    /// current playback.
    ///
    /// # Errors
    ///
    /// - [`HalError::NotInitialized`] before `init`.
    /// - [`HalError::Failed`] if the file cannot be opened.
    pub fn play_file(&self, path: impl AsRef<Path>) -> HalResult<()> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "cannot open playback file");
            HalError::Failed
        })?;
        self.play(PlaybackSource::File(BufReader::new(file)))
    }

    /// Play an in-memory PCM buffer in the playback format, replacing any
    /// current playback.
    ///
    /// # Errors
    ///
    /// - [`HalError::InvalidArgs`] for an empty buffer.
    /// - [`HalError::NotInitialized`] before `init`.
    pub fn play_raw(&self, data: impl Into<Vec<u8>>) -> HalResult<()> {
        let data = data.into();
        if data.is_empty() {
            return Err(HalError::InvalidArgs);
        }
        self.play(PlaybackSource::Memory(Cursor::new(data)))
    }

    /// Abort current playback, if any.
    ///
    /// # Errors
    ///
    /// [`HalError::NotInitialized`] before `init`.
    pub fn stop_playback(&self) -> HalResult<()> {
        self.with_running(|r| {
            r.playback.abort_stream();
            r.playback.send(PlaybackCommand::Stop)
        })
    }

    /// Copy up to `out.len()` captured bytes (mono S16LE) into `out`.
    /// Never blocks; returns 0 when nothing is buffered.
    ///
    /// # Errors
    ///
    /// [`HalError::NotInitialized`] before `init`.
    pub fn pop_capture(&self, out: &mut [u8]) -> HalResult<usize> {
        self.lock_consumer()
            .as_mut()
            .map(|c| c.pop(out))
            .ok_or(HalError::NotInitialized)
    }

    /// Captured bytes waiting in the ring.
    pub fn capture_available(&self) -> usize {
        self.lock_consumer().as_ref().map_or(0, Consumer::available)
    }

    /// Record worker lifecycle state.
    pub fn record_state(&self) -> WorkerState {
        self.record_state.get()
    }

    /// Playback worker lifecycle state.
    pub fn playback_state(&self) -> WorkerState {
        self.playback_state.get()
    }

    /// Capture chunks dropped because the ring was full since `init`.
    pub fn dropped_chunks(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Record `seconds` of audio on the calling thread into `out` as raw
    /// mono S16LE. Opens its own capture stream and does not need `init`.
    /// Returns the number of frames written.
    ///
    /// # Errors
    ///
    /// - [`HalError::InvalidArgs`] for a non-positive or non-finite duration.
    /// - [`HalError::Failed`] if the stream cannot be opened, fails beyond
    ///   recovery, or `out` rejects a write.
    #[tracing::instrument(skip(self, out))]
    pub fn record_to_writer<W: Write>(&self, out: &mut W, seconds: f64) -> HalResult<u64> {
        record::record_to_writer(&*self.device, &self.config, out, seconds)
    }

    /// [`record_to_writer`](Self::record_to_writer) into a newly created
    /// file at `path`.
    ///
    /// # Errors
    ///
    /// As `record_to_writer`, plus [`HalError::Failed`] if the file cannot
    /// be created.
    pub fn record_to_file(&self, path: impl AsRef<Path>, seconds: f64) -> HalResult<u64> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "cannot create recording file");
            HalError::Failed
        })?;
        self.record_to_writer(&mut BufWriter::new(file), seconds)
    }

    /// Play `source`, replacing any current playback: the open stream is
    /// aborted and the worker is idle before the new session is queued.
    ///
    /// # Errors
    ///
    /// [`HalError::NotInitialized`] before `init`.
    pub fn play(&self, source: PlaybackSource) -> HalResult<()> {
        self.with_running(|r| {
            r.playback.preempt(self.config.poll_interval);
            r.playback.send(PlaybackCommand::Play(source))
        })
    }

    fn with_running<T>(&self, f: impl FnOnce(&Running) -> HalResult<T>) -> HalResult<T> {
        match self.lock_running().as_ref() {
            Some(r) => f(r),
            None => Err(HalError::NotInitialized),
        }
    }

    fn lock_running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_consumer(&self) -> MutexGuard<'_, Option<Consumer>> {
        self.consumer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<D: PcmDevice> Drop for AudioEngine<D> {
    fn drop(&mut self) {
        self.deinit();
    }
}

impl<D: PcmDevice> core::fmt::Debug for AudioEngine<D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AudioEngine")
            .field("config", &self.config)
            .field("record", &self.record_state())
            .field("playback", &self.playback_state())
            .field("dropped_chunks", &self.dropped_chunks())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use platform::sim::SimPcmDevice;

    fn engine() -> AudioEngine<SimPcmDevice> {
        let config = AudioConfig::default().with_poll_interval(std::time::Duration::from_millis(5));
        AudioEngine::new(SimPcmDevice::new(), config).unwrap()
    }

    #[test]
    fn requests_before_init_are_rejected() {
        let e = engine();
        assert_eq!(e.start_recording(), Err(HalError::NotInitialized));
        assert_eq!(e.play_raw(vec![0; 4]), Err(HalError::NotInitialized));
        assert_eq!(e.stop_playback(), Err(HalError::NotInitialized));
        let mut buf = [0u8; 4];
        assert_eq!(e.pop_capture(&mut buf), Err(HalError::NotInitialized));
        assert_eq!(e.record_state(), WorkerState::Stopped);
    }

    #[test]
    fn init_twice_is_rejected_and_deinit_is_idempotent() {
        let e = engine();
        e.init().unwrap();
        assert_eq!(e.init(), Err(HalError::AlreadyInitialized));
        assert_eq!(e.record_state(), WorkerState::Idle);
        assert_eq!(e.playback_state(), WorkerState::Idle);
        e.deinit();
        e.deinit();
        assert_eq!(e.record_state(), WorkerState::Stopped);
        assert_eq!(e.playback_state(), WorkerState::Stopped);
        e.init().unwrap();
    }

    #[test]
    fn empty_play_is_invalid() {
        let e = engine();
        e.init().unwrap();
        assert_eq!(e.play_raw(Vec::new()), Err(HalError::InvalidArgs));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = AudioConfig {
            sample_rate: 0,
            ..AudioConfig::default()
        };
        assert!(matches!(
            AudioEngine::new(SimPcmDevice::new(), config),
            Err(HalError::InvalidArgs)
        ));
    }
}
