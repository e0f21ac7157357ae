//! # Output Accumulator
//!
//! Bounded FIFO of converted PCM bytes shared between the decode worker
//! (producer) and the stream consumer.
//!
//! ## Design
//!
//! - **Locking**: one `parking_lot::Mutex` guards the pending bytes and the
//!   terminal outcome; two condition variables signal "data ready" to the
//!   consumer and "space ready" to the producer.
//! - **Backpressure**: the producer blocks while the pending buffer holds at
//!   least `capacity` bytes, then appends a whole frame. Pending output can
//!   therefore exceed the capacity by at most one frame.
//! - **Counters**: `bytes_fed` / `frames_produced` live in [`StreamCounters`]
//!   so the Input Feeder can update them without taking the lock.
//!
//! ## Usage
//!
//! ```rust
//! use core_decode::accumulator::{OutputAccumulator, ReadOutcome};
//! use core_decode::engine::PcmBlock;
//! use core_decode::fixed::Fixed;
//! use core_decode::sample_converter::SampleConverter;
//! use core_decode::config::ConversionMode;
//!
//! let accumulator = OutputAccumulator::new(4096);
//! let mut converter = SampleConverter::new(ConversionMode::Scale);
//! accumulator.counters().record_fed(417);
//!
//! let block = PcmBlock::new(vec![vec![Fixed::ZERO; 4], vec![Fixed::ZERO; 4]]);
//! accumulator.push_block(&block, &mut converter).unwrap();
//!
//! let mut out = [0u8; 64];
//! assert_eq!(accumulator.try_read(&mut out).unwrap(), ReadOutcome::Read(16));
//! ```

use crate::engine::PcmBlock;
use crate::error::{DecodeError, Result};
use crate::sample_converter::SampleConverter;
use bytes::{Buf, BytesMut};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Result of a consumer read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were copied into the caller's buffer.
    Read(usize),
    /// The stream ended and every byte has been drained.
    EndOfStream,
    /// No compressed input has reached the engine yet; try again shortly.
    NotYetStarted,
}

/// Progress counters shared between the worker and observers.
#[derive(Debug, Default)]
pub struct StreamCounters {
    bytes_fed: AtomicU64,
    frames_produced: AtomicU64,
    clipped_samples: AtomicU64,
}

impl StreamCounters {
    /// Add compressed bytes handed to the engine.
    pub fn record_fed(&self, bytes: u64) {
        self.bytes_fed.fetch_add(bytes, Ordering::AcqRel);
    }

    pub fn bytes_fed(&self) -> u64 {
        self.bytes_fed.load(Ordering::Acquire)
    }

    pub fn frames_produced(&self) -> u64 {
        self.frames_produced.load(Ordering::Acquire)
    }

    pub fn clipped_samples(&self) -> u64 {
        self.clipped_samples.load(Ordering::Acquire)
    }
}

struct Pending {
    bytes: BytesMut,
    /// `Some` once the stream has ended; `Some(Some(err))` for a failure.
    outcome: Option<Option<DecodeError>>,
}

/// Bounded PCM buffer between the decode worker and the consumer.
pub struct OutputAccumulator {
    pending: Mutex<Pending>,
    data_ready: Condvar,
    space_ready: Condvar,
    capacity: usize,
    released: AtomicBool,
    counters: Arc<StreamCounters>,
}

impl OutputAccumulator {
    /// Create an accumulator that applies backpressure at `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: Mutex::new(Pending {
                bytes: BytesMut::with_capacity(capacity),
                outcome: None,
            }),
            data_ready: Condvar::new(),
            space_ready: Condvar::new(),
            capacity,
            released: AtomicBool::new(false),
            counters: Arc::new(StreamCounters::default()),
        }
    }

    /// Shared progress counters.
    pub fn counters(&self) -> &Arc<StreamCounters> {
        &self.counters
    }

    /// Backpressure threshold in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes waiting for the consumer.
    pub fn pending_bytes(&self) -> usize {
        self.pending.lock().bytes.len()
    }

    /// Returns `true` once the stream has ended (output may still be pending).
    pub fn is_ended(&self) -> bool {
        self.pending.lock().outcome.is_some()
    }

    /// Convert a decoded block and append it as interleaved PCM.
    ///
    /// Blocks while the pending buffer is at capacity, unless the producer has
    /// been released. Returns the number of sample frames appended.
    pub fn push_block(&self, block: &PcmBlock, converter: &mut SampleConverter) -> Result<usize> {
        if !block.is_consistent() {
            return Err(DecodeError::InvariantViolation(format!(
                "engine produced a malformed block ({} channels)",
                block.channels()
            )));
        }

        // Convert outside the lock.
        let mut encoded = Vec::new();
        let frames = converter.write_interleaved(block, &mut encoded);

        let mut pending = self.pending.lock();
        while pending.bytes.len() >= self.capacity
            && pending.outcome.is_none()
            && !self.released.load(Ordering::Acquire)
        {
            trace!(pending = pending.bytes.len(), "Output buffer full, waiting for consumer");
            self.space_ready.wait(&mut pending);
        }

        if pending.outcome.is_some() {
            return Err(DecodeError::InvariantViolation(
                "output appended after the stream ended".to_string(),
            ));
        }

        pending.bytes.extend_from_slice(&encoded);
        self.counters
            .frames_produced
            .fetch_add(frames as u64, Ordering::AcqRel);
        self.counters
            .clipped_samples
            .store(converter.stats().clipped_samples, Ordering::Release);
        drop(pending);

        self.data_ready.notify_all();
        Ok(frames)
    }

    /// Stop applying backpressure so a blocked producer can run to its next
    /// feed request.
    pub fn release_producer(&self) {
        self.released.store(true, Ordering::Release);
        // Take the lock so a producer between its check and its wait cannot
        // miss the notification.
        let _pending = self.pending.lock();
        self.space_ready.notify_all();
    }

    /// Mark the stream as ended. Only the first call has any effect.
    ///
    /// Returns `true` if this call ended the stream.
    pub fn finish(&self, failure: Option<DecodeError>) -> bool {
        let mut pending = self.pending.lock();
        if pending.outcome.is_some() {
            debug!("Output accumulator already finished");
            return false;
        }
        pending.outcome = Some(failure);
        drop(pending);

        self.data_ready.notify_all();
        self.space_ready.notify_all();
        true
    }

    /// Read pending PCM without waiting for the decoder to start.
    ///
    /// - Pending bytes are drained first, even after the stream ended.
    /// - Empty and ended: `EndOfStream`, or the failure, every time.
    /// - Empty, running, nothing fed yet: `NotYetStarted`.
    /// - Empty, running: blocks until output arrives or the stream ends.
    pub fn try_read(&self, buf: &mut [u8]) -> Result<ReadOutcome> {
        self.read_inner(buf, false)
    }

    /// Read pending PCM, blocking until data is available or the stream ends.
    ///
    /// Never returns [`ReadOutcome::NotYetStarted`].
    pub fn read_blocking(&self, buf: &mut [u8]) -> Result<ReadOutcome> {
        self.read_inner(buf, true)
    }

    fn read_inner(&self, buf: &mut [u8], wait_for_start: bool) -> Result<ReadOutcome> {
        let mut pending = self.pending.lock();
        loop {
            if !pending.bytes.is_empty() {
                let n = buf.len().min(pending.bytes.len());
                buf[..n].copy_from_slice(&pending.bytes[..n]);
                pending.bytes.advance(n);
                drop(pending);

                self.space_ready.notify_all();
                return Ok(ReadOutcome::Read(n));
            }

            match &pending.outcome {
                Some(None) => return Ok(ReadOutcome::EndOfStream),
                Some(Some(err)) => return Err(err.clone()),
                None => {}
            }

            if !wait_for_start && self.counters.bytes_fed() == 0 {
                return Ok(ReadOutcome::NotYetStarted);
            }

            self.data_ready.wait(&mut pending);
        }
    }
}
