//! # Decode Driver
//!
//! Runs a [`CodecEngine`] on a background thread and exposes its output as a
//! blocking stream of interleaved 16-bit little-endian PCM.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │       Decode worker (background thread)   │
//! │                                           │
//! │  CodecEngine::run ──input──> InputFeeder ─┼──> byte source
//! │        │          ──header─> MetadataSink │
//! │        │          ──output─> Converter    │
//! │        ▼                        │         │
//! └─────────────────────────────────┼─────────┘
//!                                   ▼
//! ┌───────────────────────────────────────────┐
//! │     OutputAccumulator (bounded, shared)   │
//! └────────────┬──────────────────────────────┘
//!              │ PCM bytes
//!              ▼
//! ┌───────────────────────────────────────────┐
//! │   Consumer: try_read / std::io::Read      │
//! └───────────────────────────────────────────┘
//! ```
//!
//! ## Lifecycle
//!
//! `new` → [`DriverState::Created`] → `start` → [`DriverState::Running`] →
//! [`DriverState::Finished`]. The engine is released exactly once on every
//! path, including a panic inside the engine and a session that is dropped
//! without ever being started. Dropping a running session cancels it and
//! joins the worker.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use core_decode::{DecodeSession, DecoderConfig};
//! use std::fs::File;
//! use std::io::Read;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let file = File::open("song.mp3")?;
//! let mut session = DecodeSession::mpeg(file, DecoderConfig::default())?;
//!
//! let mut pcm = Vec::new();
//! session.read_to_end(&mut pcm)?;
//! println!("{:?}", session.metadata());
//! # Ok(())
//! # }
//! ```

use crate::accumulator::{OutputAccumulator, ReadOutcome};
use crate::config::{DecoderConfig, DriverState, DriverStats, FinishReason};
use crate::engine::{
    CodecEngine, EngineError, FrameHandler, FrameHeader, Flow, InputStream, PcmBlock, RunOutcome,
};
use crate::error::{DecodeError, Result};
use crate::feeder::InputFeeder;
use crate::metadata::{MetadataSink, StreamMetadata};
use crate::sample_converter::SampleConverter;
use parking_lot::Mutex;
use std::io::{self, Read};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

// ============================================================================
// Shared State
// ============================================================================

/// State shared between the session handle and its worker.
struct Shared {
    accumulator: OutputAccumulator,
    metadata: MetadataSink,
    state: Mutex<DriverState>,
    cancel: CancellationToken,
}

impl Shared {
    /// Record the terminal outcome. Only the first call has any effect.
    fn complete(&self, reason: FinishReason) {
        let mut state = self.state.lock();
        if state.is_terminal() {
            return;
        }

        match &reason {
            FinishReason::Failed(err) => error!(error = %err, "Decode session failed"),
            other => info!(reason = ?other, "Decode session finished"),
        }

        let failure = match &reason {
            FinishReason::Failed(err) => Some(err.clone()),
            _ => None,
        };
        *state = DriverState::Finished(reason);
        drop(state);

        self.accumulator.finish(failure);
    }
}

/// Releases the engine exactly once, however the worker exits.
struct EngineHandle {
    engine: Box<dyn CodecEngine>,
    released: bool,
}

impl EngineHandle {
    fn new(engine: Box<dyn CodecEngine>) -> Self {
        Self {
            engine,
            released: false,
        }
    }

    fn run(&mut self, handler: &mut dyn FrameHandler) -> RunOutcome {
        self.engine.run(handler)
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.engine.finish();
            debug!("Codec engine released");
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Marks the session failed if the worker unwinds before completing it.
struct FinishOnDrop<'a> {
    shared: &'a Shared,
}

impl Drop for FinishOnDrop<'_> {
    fn drop(&mut self) {
        self.shared
            .complete(FinishReason::Failed(DecodeError::WorkerTerminated));
    }
}

/// Everything the worker takes ownership of when the session starts.
struct WorkerParts {
    engine: EngineHandle,
    feeder: InputFeeder,
    converter: SampleConverter,
}

// ============================================================================
// Engine Callbacks
// ============================================================================

/// Typed session context handed to the engine's run loop.
struct SessionCallbacks<'a> {
    shared: &'a Shared,
    feeder: &'a mut InputFeeder,
    converter: &'a mut SampleConverter,
    failure: Option<DecodeError>,
}

impl SessionCallbacks<'_> {
    fn fail(&mut self, err: DecodeError) -> Flow {
        if self.failure.is_none() {
            self.failure = Some(err);
        }
        Flow::Break
    }
}

impl FrameHandler for SessionCallbacks<'_> {
    fn input(&mut self, stream: &mut InputStream) -> Flow {
        match self.feeder.feed(stream) {
            Ok(flow) => flow,
            Err(err) => self.fail(err),
        }
    }

    fn header(&mut self, header: &FrameHeader) -> Flow {
        self.shared.metadata.record(header);
        Flow::Continue
    }

    fn output(&mut self, _header: &FrameHeader, pcm: &PcmBlock) -> Flow {
        match self.shared.accumulator.push_block(pcm, self.converter) {
            Ok(frames) => {
                trace!(frames, "Frame appended");
                if self.shared.cancel.is_cancelled() {
                    debug!("Cancellation requested, stopping after frame");
                    return Flow::Stop;
                }
                Flow::Continue
            }
            Err(err) => self.fail(err),
        }
    }

    fn error(&mut self, err: &EngineError) -> Flow {
        if err.is_recoverable() {
            warn!(error = %err, "Recoverable stream error, skipping frame");
            return Flow::Continue;
        }

        self.fail(DecodeError::FatalStreamError {
            code: err.code.code(),
            message: err.to_string(),
        })
    }
}

/// Map the engine's run result to a terminal outcome.
fn classify(outcome: RunOutcome, failure: Option<DecodeError>, cancelled: bool) -> FinishReason {
    match (failure, outcome) {
        (Some(err), _) => FinishReason::Failed(err),
        (None, RunOutcome::Aborted) => FinishReason::Failed(DecodeError::EngineAborted(
            "run loop aborted without a recorded error".to_string(),
        )),
        (None, RunOutcome::Completed) if cancelled => FinishReason::Cancelled,
        (None, RunOutcome::Completed) => FinishReason::EndOfStream,
    }
}

#[instrument(skip_all, name = "decode_worker")]
fn run_worker(shared: Arc<Shared>, parts: WorkerParts) {
    let _unwind_guard = FinishOnDrop { shared: &shared };
    let WorkerParts {
        mut engine,
        mut feeder,
        mut converter,
    } = parts;

    info!("Decode worker started");

    let (outcome, failure) = {
        let mut callbacks = SessionCallbacks {
            shared: &shared,
            feeder: &mut feeder,
            converter: &mut converter,
            failure: None,
        };
        let outcome = engine.run(&mut callbacks);
        (outcome, callbacks.failure)
    };
    engine.release();

    debug!(?outcome, "Engine run loop returned");
    shared.complete(classify(outcome, failure, shared.cancel.is_cancelled()));
}

// ============================================================================
// DecodeSession
// ============================================================================

/// One decode of one byte source.
pub struct DecodeSession {
    shared: Arc<Shared>,
    parts: Option<WorkerParts>,
    worker: Option<JoinHandle<()>>,
    worker_name: String,
}

impl DecodeSession {
    /// Create a session around `engine`, reading compressed bytes from
    /// `source`. Nothing runs until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::InvalidConfig`] if `config` fails validation.
    pub fn new<R, E>(source: R, engine: E, config: DecoderConfig) -> Result<Self>
    where
        R: Read + Send + 'static,
        E: CodecEngine + 'static,
    {
        let config = config.validated()?;

        let cancel = CancellationToken::new();
        let accumulator = OutputAccumulator::new(config.output_buffer_bytes);
        let feeder = InputFeeder::new(
            Box::new(source),
            config.working_buffer_bytes,
            cancel.clone(),
            Arc::clone(accumulator.counters()),
        );

        debug!(
            working_buffer = config.working_buffer_bytes,
            output_buffer = config.output_buffer_bytes,
            conversion = ?config.conversion,
            "Decode session created"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                accumulator,
                metadata: MetadataSink::new(),
                state: Mutex::new(DriverState::Created),
                cancel,
            }),
            parts: Some(WorkerParts {
                engine: EngineHandle::new(Box::new(engine)),
                feeder,
                converter: SampleConverter::new(config.conversion),
            }),
            worker: None,
            worker_name: config.worker_name,
        })
    }

    /// Create and immediately start a session.
    pub fn spawn<R, E>(source: R, engine: E, config: DecoderConfig) -> Result<Self>
    where
        R: Read + Send + 'static,
        E: CodecEngine + 'static,
    {
        let mut session = Self::new(source, engine, config)?;
        session.start()?;
        Ok(session)
    }

    /// Create and start a session decoding an MPEG audio stream.
    #[cfg(feature = "mpeg-engine")]
    pub fn mpeg<R>(source: R, config: DecoderConfig) -> Result<Self>
    where
        R: Read + Send + 'static,
    {
        Self::spawn(source, crate::engine::MpegEngine::new(), config)
    }

    /// Start the background decode worker.
    ///
    /// # Errors
    ///
    /// - [`DecodeError::AlreadyStarted`] if called more than once.
    /// - [`DecodeError::SpawnFailed`] if the thread could not be created; the
    ///   session is then finished with that error.
    pub fn start(&mut self) -> Result<()> {
        let parts = self.parts.take().ok_or(DecodeError::AlreadyStarted)?;

        *self.shared.state.lock() = DriverState::Running;

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(self.worker_name.clone())
            .spawn(move || run_worker(shared, parts));

        match spawned {
            Ok(handle) => {
                info!(worker = %self.worker_name, "Decode session started");
                self.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                let err = DecodeError::SpawnFailed(e.to_string());
                self.shared.complete(FinishReason::Failed(err.clone()));
                Err(err)
            }
        }
    }

    /// Read decoded PCM without blocking on a session that has not received
    /// any input yet.
    ///
    /// Blocks while the decoder is running but has no output ready. Buffered
    /// output is always delivered before end-of-stream or a failure.
    pub fn try_read(&self, buf: &mut [u8]) -> Result<ReadOutcome> {
        self.shared.accumulator.try_read(buf)
    }

    /// Request cooperative cancellation.
    ///
    /// The worker stops at its next frame or feed boundary. Output already
    /// buffered can still be read, followed by end-of-stream.
    pub fn cancel(&self) {
        if !self.shared.cancel.is_cancelled() {
            info!("Decode session cancellation requested");
        }
        self.shared.cancel.cancel();
        self.shared.accumulator.release_producer();
    }

    /// Stream properties from the most recent frame header.
    pub fn metadata(&self) -> StreamMetadata {
        self.shared.metadata.snapshot()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DriverState {
        self.shared.state.lock().clone()
    }

    /// Progress counters.
    pub fn stats(&self) -> DriverStats {
        let counters = self.shared.accumulator.counters();
        DriverStats {
            bytes_fed: counters.bytes_fed(),
            frames_produced: counters.frames_produced(),
            pending_bytes: self.shared.accumulator.pending_bytes(),
            clipped_samples: counters.clipped_samples(),
        }
    }

    /// Wait for the worker to exit and return the final state.
    ///
    /// Pending output must be drained by the consumer for a worker blocked on
    /// backpressure to finish.
    pub fn join(&mut self) -> DriverState {
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("Decode worker panicked");
            }
        }
        self.state()
    }
}

impl Read for DecodeSession {
    /// Blocking read. Starts the session on first use, returns `Ok(0)` at end
    /// of stream and maps failures to [`io::Error`].
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        if self.parts.is_some() {
            self.start()?;
        }

        match self.shared.accumulator.read_blocking(buf)? {
            ReadOutcome::Read(n) => Ok(n),
            ReadOutcome::EndOfStream | ReadOutcome::NotYetStarted => Ok(0),
        }
    }
}

impl Drop for DecodeSession {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.take() {
            self.cancel();
            if handle.join().is_err() {
                warn!("Decode worker panicked");
            }
        }
        debug!("Decode session dropped");
    }
}
