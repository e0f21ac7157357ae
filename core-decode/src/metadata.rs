//! # Metadata Sink
//!
//! Tracks the stream properties announced by the most recent frame header.

use crate::engine::FrameHeader;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Stream properties as of the last decoded header.
///
/// All fields are zero until the first header arrives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMetadata {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Output channels (1 or 2).
    pub channels: u8,
    /// Bitrate in bits per second. Changes frame to frame in VBR streams.
    pub bitrate: u64,
}

impl StreamMetadata {
    /// Returns `true` once a header has been observed.
    pub fn is_known(&self) -> bool {
        self.sample_rate != 0
    }

    /// Bytes per second of the 16-bit PCM output.
    pub fn pcm_byte_rate(&self) -> u64 {
        u64::from(self.sample_rate) * u64::from(self.channels) * 2
    }
}

/// Shared, overwrite-on-every-header metadata store.
#[derive(Debug, Default)]
pub struct MetadataSink {
    current: RwLock<StreamMetadata>,
}

impl MetadataSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a decoded header, overwriting the previous values.
    pub fn record(&self, header: &FrameHeader) {
        let next = StreamMetadata {
            sample_rate: header.sample_rate,
            channels: header.channels(),
            bitrate: u64::from(header.bitrate),
        };

        let mut current = self.current.write();
        if current.sample_rate != next.sample_rate || current.channels != next.channels {
            debug!(
                sample_rate = next.sample_rate,
                channels = next.channels,
                "Stream format changed"
            );
        }
        *current = next;
    }

    /// Current metadata.
    pub fn snapshot(&self) -> StreamMetadata {
        *self.current.read()
    }
}
