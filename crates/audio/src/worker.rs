//! Plumbing shared by the record and playback workers.
//!
//! A worker is a named OS thread that owns its session (open stream plus
//! working buffers) and takes commands over an `mpsc` channel. The engine
//! only ever sees three things: the command sender, the published
//! [`WorkerState`], and an [`ActiveStream`] slot through which it can abort
//! the stream the worker is currently blocked on.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use platform::{AbortHandle, HalError, HalResult};

/// Longest single sleep while waiting for a worker to leave `Active`.
const WAIT_STEP: Duration = Duration::from_millis(5);

/// Published lifecycle of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WorkerState {
    /// No thread (before init, after deinit).
    Stopped = 0,
    /// Thread alive, no stream open.
    Idle = 1,
    /// Thread alive with an open stream.
    Active = 2,
}

impl WorkerState {
    const fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Idle,
            2 => Self::Active,
            _ => Self::Stopped,
        }
    }
}

/// Atomic cell holding a [`WorkerState`].
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: WorkerState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn get(&self) -> WorkerState {
        WorkerState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: WorkerState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Abort handle of the stream a worker currently has open, if any.
///
/// The worker fills the slot before it publishes `Active` and empties it
/// after the stream is dropped.
#[derive(Debug, Clone, Default)]
pub(crate) struct ActiveStream(Arc<Mutex<Option<AbortHandle>>>);

impl ActiveStream {
    pub(crate) fn set(&self, handle: AbortHandle) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    pub(crate) fn clear(&self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Fire the open stream's abort. Returns `false` when nothing was open.
    pub(crate) fn abort(&self) -> bool {
        match self.0.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

/// What a worker thread is handed at spawn.
pub(crate) struct WorkerContext<C> {
    pub(crate) commands: Receiver<C>,
    pub(crate) state: Arc<StateCell>,
    pub(crate) stream: ActiveStream,
    pub(crate) poll_interval: Duration,
}

impl<C> WorkerContext<C> {
    /// Next command, without blocking while a session is running and
    /// blocking up to the poll interval otherwise. A closed channel reads
    /// as `shutdown`.
    pub(crate) fn next_command(&self, session_open: bool, shutdown: impl FnOnce() -> C) -> Option<C> {
        if session_open {
            match self.commands.try_recv() {
                Ok(cmd) => Some(cmd),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => Some(shutdown()),
            }
        } else {
            match self.commands.recv_timeout(self.poll_interval) {
                Ok(cmd) => Some(cmd),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => Some(shutdown()),
            }
        }
    }

    /// Publish a freshly opened stream: slot first, then `Active`.
    pub(crate) fn activate(&self, handle: AbortHandle) {
        self.stream.set(handle);
        self.state.set(WorkerState::Active);
    }

    /// Publish that the stream has been dropped.
    pub(crate) fn deactivate(&self) {
        self.stream.clear();
        self.state.set(WorkerState::Idle);
    }
}

/// Engine-side handle to a running worker.
#[derive(Debug)]
pub(crate) struct Worker<C> {
    name: &'static str,
    commands: Sender<C>,
    state: Arc<StateCell>,
    stream: ActiveStream,
    thread: Option<JoinHandle<()>>,
}

impl<C: Send + 'static> Worker<C> {
    /// Spawn `body` on a thread called `name`.
    ///
    /// `state` is set to `Idle` before the thread starts and back to
    /// `Stopped` if the spawn fails.
    pub(crate) fn spawn<F>(
        name: &'static str,
        state: Arc<StateCell>,
        poll_interval: Duration,
        body: F,
    ) -> HalResult<Self>
    where
        F: FnOnce(WorkerContext<C>) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let stream = ActiveStream::default();
        let ctx = WorkerContext {
            commands: rx,
            state: Arc::clone(&state),
            stream: stream.clone(),
            poll_interval,
        };
        state.set(WorkerState::Idle);
        let thread = thread::Builder::new()
            .name(name.into())
            .spawn(move || body(ctx))
            .map_err(|e| {
                tracing::error!(worker = name, error = %e, "failed to spawn worker thread");
                state.set(WorkerState::Stopped);
                HalError::ThreadFailure
            })?;
        tracing::debug!(worker = name, "worker started");
        Ok(Self {
            name,
            commands: tx,
            state,
            stream,
            thread: Some(thread),
        })
    }

    /// Queue a command.
    pub(crate) fn send(&self, cmd: C) -> HalResult<()> {
        self.commands.send(cmd).map_err(|_| {
            tracing::error!(worker = self.name, "worker thread is gone");
            HalError::Failed
        })
    }

    /// Abort whatever stream the worker has open.
    pub(crate) fn abort_stream(&self) -> bool {
        self.stream.abort()
    }

    /// Block until the worker is no longer `Active`.
    pub(crate) fn wait_not_active(&self, poll_interval: Duration) {
        let step = poll_interval.min(WAIT_STEP);
        while self.state.get() == WorkerState::Active {
            // A stream opened after the first abort must be aborted too.
            self.stream.abort();
            thread::sleep(step);
        }
    }

    /// Abort the current stream and wait for the worker to go idle.
    pub(crate) fn preempt(&self, poll_interval: Duration) {
        if self.abort_stream() {
            tracing::debug!(worker = self.name, "preempting active stream");
        }
        self.wait_not_active(poll_interval);
    }

    /// Stop and join: queue `shutdown`, abort, wait for not-active, join.
    pub(crate) fn shutdown(mut self, shutdown: C, poll_interval: Duration) {
        // A send error means the thread already exited.
        let _ = self.commands.send(shutdown);
        self.abort_stream();
        self.wait_not_active(poll_interval);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!(worker = self.name, "worker thread panicked");
            }
        }
        self.state.set(WorkerState::Stopped);
        tracing::debug!(worker = self.name, "worker joined");
    }
}
