//! # Input Feeder
//!
//! Answers the engine's feed requests from a blocking byte source.
//!
//! Each request carries the engine's unconsumed bytes: the start of a frame
//! that straddled the end of the previous buffer. The feeder compacts that
//! tail to the front of the stream's working buffer and reads directly into
//! the rest with one call, so the engine always sees `[preserved tail][newly read]` and never loses or
//! repeats a partial frame.
//!
//! | Source result | Tail | Answer |
//! |---------------|------|--------|
//! | `n > 0` bytes | any | hand `tail + n` bytes, `Continue` |
//! | EOF | empty | `Stop` |
//! | EOF | non-empty | hand the tail once more, `Continue`; `Stop` next time |
//! | error | any | `SourceReadFailure` (engine is aborted) |

use crate::accumulator::StreamCounters;
use crate::engine::{Flow, InputStream};
use crate::error::{DecodeError, Result};
use std::io::{self, Read};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Refills the engine's input from a byte source.
pub struct InputFeeder {
    source: Box<dyn Read + Send>,
    capacity: usize,
    cancel: CancellationToken,
    counters: Arc<StreamCounters>,
    source_exhausted: bool,
}

impl InputFeeder {
    /// Create a feeder with a working buffer of `capacity` bytes.
    pub fn new(
        source: Box<dyn Read + Send>,
        capacity: usize,
        cancel: CancellationToken,
        counters: Arc<StreamCounters>,
    ) -> Self {
        Self {
            source,
            capacity,
            cancel,
            counters,
            source_exhausted: false,
        }
    }

    /// Working buffer capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns `true` once the source has reported EOF.
    pub fn is_exhausted(&self) -> bool {
        self.source_exhausted
    }

    /// Answer one feed request.
    ///
    /// `Ok` carries the flow to report to the engine. `Err` means the engine
    /// must be aborted and the error surfaced to the consumer.
    pub fn feed(&mut self, stream: &mut InputStream) -> Result<Flow> {
        if self.cancel.is_cancelled() {
            debug!("Cancellation requested, stopping engine");
            return Ok(Flow::Stop);
        }

        if self.source_exhausted {
            debug!(unconsumed = stream.remaining(), "Source exhausted, stopping engine");
            return Ok(Flow::Stop);
        }

        let preserved = stream.remaining();
        if preserved >= self.capacity {
            return Err(DecodeError::InvariantViolation(format!(
                "undecoded tail of {} bytes leaves no room in a {} byte working buffer",
                preserved, self.capacity
            )));
        }
        stream.compact();

        let read = loop {
            match self.source.read(stream.spare_mut(self.capacity)) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "Source read failed");
                    return Err(DecodeError::source_failure(&e));
                }
            }
        };

        if read == 0 {
            self.source_exhausted = true;
            if preserved == 0 {
                info!(bytes_fed = self.counters.bytes_fed(), "Source exhausted");
                return Ok(Flow::Stop);
            }

            info!(preserved, "Source exhausted, handing final tail to engine");
            return Ok(Flow::Continue);
        }

        stream.commit(read);
        let len = stream.remaining();
        self.counters.record_fed(read as u64);

        debug!(preserved, read, len, "Fed engine");
        Ok(Flow::Continue)
    }
}
