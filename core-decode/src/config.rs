//! # Decoder Configuration
//!
//! Configuration and status types for a decode session.

use crate::engine::header::MAX_FRAME_LEN;
use crate::error::DecodeError;
use serde::{Deserialize, Serialize};

/// How native samples are reduced to 16 bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionMode {
    /// Saturate and truncate.
    #[default]
    Scale,
    /// Noise-shaped triangular dither.
    Dither,
}

/// Decode session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Capacity of the compressed-byte working buffer.
    ///
    /// Must exceed the largest possible compressed frame, since the undecoded
    /// tail of one refill is carried to the front of the next.
    ///
    /// Default: 1 MiB.
    #[serde(default = "default_working_buffer_bytes")]
    pub working_buffer_bytes: usize,

    /// Pending PCM bytes the worker may buffer ahead of the consumer.
    ///
    /// The worker blocks once this many bytes are pending; a single decoded
    /// frame is always appended whole, so the buffer can overshoot by at most
    /// one frame.
    ///
    /// Default: 100 000 bytes (50 000 samples).
    #[serde(default = "default_output_buffer_bytes")]
    pub output_buffer_bytes: usize,

    /// Sample conversion mode.
    ///
    /// Default: [`ConversionMode::Scale`].
    #[serde(default)]
    pub conversion: ConversionMode,

    /// Name given to the background decode thread.
    #[serde(default = "default_worker_name")]
    pub worker_name: String,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            working_buffer_bytes: default_working_buffer_bytes(),
            output_buffer_bytes: default_output_buffer_bytes(),
            conversion: ConversionMode::default(),
            worker_name: default_worker_name(),
        }
    }
}

impl DecoderConfig {
    /// Small buffers for interactive use.
    pub fn low_latency() -> Self {
        Self {
            working_buffer_bytes: 16 * 1024,
            output_buffer_bytes: 4608 * 2, // two stereo Layer III frames
            ..Default::default()
        }
    }

    /// Dithered output with generous buffering.
    pub fn high_fidelity() -> Self {
        Self {
            output_buffer_bytes: 1024 * 1024,
            conversion: ConversionMode::Dither,
            ..Default::default()
        }
    }

    /// Set the conversion mode.
    pub fn with_conversion(mut self, conversion: ConversionMode) -> Self {
        self.conversion = conversion;
        self
    }

    /// Set the working buffer capacity.
    pub fn with_working_buffer(mut self, bytes: usize) -> Self {
        self.working_buffer_bytes = bytes;
        self
    }

    /// Set the pending output capacity.
    pub fn with_output_buffer(mut self, bytes: usize) -> Self {
        self.output_buffer_bytes = bytes;
        self
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.working_buffer_bytes <= MAX_FRAME_LEN {
            return Err(format!(
                "working_buffer_bytes must exceed the largest frame ({} bytes)",
                MAX_FRAME_LEN
            ));
        }

        if self.output_buffer_bytes == 0 {
            return Err("output_buffer_bytes must be > 0".to_string());
        }

        if self.worker_name.is_empty() {
            return Err("worker_name must not be empty".to_string());
        }

        Ok(())
    }

    /// Validate, mapping failures to [`DecodeError::InvalidConfig`].
    pub fn validated(self) -> Result<Self, DecodeError> {
        self.validate().map_err(DecodeError::InvalidConfig)?;
        Ok(self)
    }
}

// ============================================================================
// Default Functions (for serde)
// ============================================================================

fn default_working_buffer_bytes() -> usize {
    1024 * 1024 // 1 MiB
}

fn default_output_buffer_bytes() -> usize {
    50_000 * 2 // 50k 16-bit samples
}

fn default_worker_name() -> String {
    "pcm-decode".to_string()
}

// ============================================================================
// Driver State
// ============================================================================

/// Why a session finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    /// The source was exhausted and everything decodable was decoded.
    EndOfStream,
    /// The consumer cancelled the session.
    Cancelled,
    /// Decoding stopped on an error that is surfaced to the consumer.
    Failed(DecodeError),
}

/// Lifecycle state of a decode session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverState {
    /// Engine initialised, no background worker yet.
    Created,
    /// Background worker is running the engine.
    Running,
    /// Run loop returned and engine resources were released.
    Finished(FinishReason),
}

impl DriverState {
    /// Returns `true` while the worker is running.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Returns `true` once the session can no longer produce output.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished(_))
    }
}

/// Counters describing a session's progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStats {
    /// Compressed bytes handed to the engine.
    pub bytes_fed: u64,
    /// PCM sample frames produced.
    pub frames_produced: u64,
    /// PCM bytes waiting for the consumer.
    pub pending_bytes: usize,
    /// Samples clipped during conversion.
    pub clipped_samples: u64,
}
