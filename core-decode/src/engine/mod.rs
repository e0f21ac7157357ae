//! # Codec Engine Boundary
//!
//! The decode driver never parses bitstreams itself. It drives an opaque
//! [`CodecEngine`] whose synchronous run loop calls back into a
//! [`FrameHandler`] through four slots:
//!
//! | Slot | When | Driver component |
//! |------|------|------------------|
//! | [`FrameHandler::input`] | engine ran out of bytes | Input Feeder |
//! | [`FrameHandler::header`] | a frame header was decoded | Metadata Sink |
//! | [`FrameHandler::output`] | a frame was decoded to PCM | Output Accumulator |
//! | [`FrameHandler::error`] | a frame failed to decode | error classification |
//!
//! ```text
//! ┌──────────────┐  input(stream)   ┌──────────────────┐
//! │              │ ───────────────> │                  │
//! │ CodecEngine  │  header(hdr)     │   FrameHandler   │
//! │  run loop    │ ───────────────> │ (session context)│
//! │              │  output(hdr,pcm) │                  │
//! │              │ ───────────────> │                  │
//! │              │  error(err)      │                  │
//! └──────────────┘ ───────────────> └──────────────────┘
//! ```
//!
//! The handler is a typed context object handed to `run` by mutable
//! reference; callbacks never recover it from an untyped pointer.

pub mod header;
#[cfg(feature = "mpeg-engine")]
pub mod mpeg;

pub use header::{ChannelMode, Emphasis, FrameHeader, HeaderError, Layer, MpegVersion};
#[cfg(feature = "mpeg-engine")]
pub use mpeg::MpegEngine;

use crate::fixed::Fixed;
use std::fmt;

// ============================================================================
// Flow Control
// ============================================================================

/// Answer a callback gives the engine's run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep decoding.
    Continue,
    /// Stop gracefully; `run` returns [`RunOutcome::Completed`].
    Stop,
    /// Abort; `run` returns [`RunOutcome::Aborted`].
    Break,
}

/// How the engine's run loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// A callback answered [`Flow::Stop`].
    Completed,
    /// A callback answered [`Flow::Break`].
    Aborted,
}

// ============================================================================
// Engine Errors
// ============================================================================

/// Engine error codes.
///
/// Codes with any bit of `0xff00` set describe a damaged frame the engine can
/// resynchronise past; the rest are unrecoverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    /// Input buffer too small (or EOF)
    BufLen = 0x0001,
    /// Invalid (null) buffer pointer
    BufPtr = 0x0002,
    /// Not enough memory
    NoMem = 0x0031,
    /// Engine could not decode the stream at all
    Unsupported = 0x0041,
    /// Lost synchronisation
    LostSync = 0x0101,
    /// Reserved header layer value
    BadLayer = 0x0102,
    /// Forbidden bitrate value
    BadBitrate = 0x0103,
    /// Reserved sample frequency value
    BadSampleRate = 0x0104,
    /// Reserved emphasis value
    BadEmphasis = 0x0105,
    /// CRC check failed
    BadCrc = 0x0201,
    /// Forbidden bit allocation value
    BadBitAlloc = 0x0211,
    /// Bad scalefactor index
    BadScaleFactor = 0x0221,
    /// Bad bitrate/mode combination
    BadMode = 0x0222,
    /// Bad frame length
    BadFrameLen = 0x0231,
    /// Bad big_values count
    BadBigValues = 0x0232,
    /// Reserved block_type
    BadBlockType = 0x0233,
    /// Bad scalefactor selection info
    BadScfsi = 0x0234,
    /// Bad main_data_begin pointer
    BadDataPtr = 0x0235,
    /// Bad audio data length
    BadPart3Len = 0x0236,
    /// Bad Huffman table select
    BadHuffTable = 0x0237,
    /// Huffman data overrun
    BadHuffData = 0x0238,
    /// Incompatible block_type for JS
    BadStereo = 0x0239,
}

impl ErrorCode {
    /// Numeric code.
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Whether the engine can resynchronise after this error.
    pub fn is_recoverable(self) -> bool {
        self.code() & 0xff00 != 0
    }

    /// Short human readable description.
    pub fn description(self) -> &'static str {
        match self {
            ErrorCode::BufLen => "input buffer too small (or EOF)",
            ErrorCode::BufPtr => "invalid (null) buffer pointer",
            ErrorCode::NoMem => "not enough memory",
            ErrorCode::Unsupported => "stream not supported by the engine",
            ErrorCode::LostSync => "lost synchronization",
            ErrorCode::BadLayer => "reserved header layer value",
            ErrorCode::BadBitrate => "forbidden bitrate value",
            ErrorCode::BadSampleRate => "reserved sample frequency value",
            ErrorCode::BadEmphasis => "reserved emphasis value",
            ErrorCode::BadCrc => "CRC check failed",
            ErrorCode::BadBitAlloc => "forbidden bit allocation value",
            ErrorCode::BadScaleFactor => "bad scalefactor index",
            ErrorCode::BadMode => "bad bitrate/mode combination",
            ErrorCode::BadFrameLen => "bad frame length",
            ErrorCode::BadBigValues => "bad big_values count",
            ErrorCode::BadBlockType => "reserved block_type",
            ErrorCode::BadScfsi => "bad scalefactor selection info",
            ErrorCode::BadDataPtr => "bad main_data_begin pointer",
            ErrorCode::BadPart3Len => "bad audio data length",
            ErrorCode::BadHuffTable => "bad Huffman table select",
            ErrorCode::BadHuffData => "Huffman data overrun",
            ErrorCode::BadStereo => "incompatible block_type for JS",
        }
    }
}

impl From<HeaderError> for ErrorCode {
    fn from(err: HeaderError) -> Self {
        match err {
            HeaderError::NoSync => ErrorCode::LostSync,
            HeaderError::BadLayer => ErrorCode::BadLayer,
            HeaderError::BadBitrate => ErrorCode::BadBitrate,
            HeaderError::BadSampleRate => ErrorCode::BadSampleRate,
            HeaderError::BadEmphasis => ErrorCode::BadEmphasis,
        }
    }
}

/// Error reported through [`FrameHandler::error`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    pub code: ErrorCode,
    /// Extra context from the engine, if any.
    pub detail: Option<String>,
}

impl EngineError {
    pub fn new(code: ErrorCode) -> Self {
        Self { code, detail: None }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Severity as classified by the engine.
    pub fn is_recoverable(&self) -> bool {
        self.code.is_recoverable()
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x} ({})", self.code.code(), self.code.description())?;
        if let Some(detail) = &self.detail {
            write!(f, ": {}", detail)?;
        }
        Ok(())
    }
}

// ============================================================================
// Stream and Sample Types
// ============================================================================

/// Compressed bytes the engine is currently working through.
///
/// The engine advances [`InputStream::consume`] past every byte it has
/// finished with; whatever remains in [`InputStream::unconsumed`] when it
/// asks for more input belongs to a frame that has not been decoded yet.
///
/// The stream owns the working buffer. A refill compacts the unconsumed tail
/// to the front and reads new bytes straight into the space behind it, so
/// fed bytes are never copied between buffers.
#[derive(Debug, Default)]
pub struct InputStream {
    buffer: Vec<u8>,
    end: usize,
    next_frame: usize,
}

impl InputStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes not yet consumed by the engine.
    pub fn unconsumed(&self) -> &[u8] {
        &self.buffer[self.next_frame..self.end]
    }

    /// Number of unconsumed bytes.
    pub fn remaining(&self) -> usize {
        self.end - self.next_frame
    }

    /// Replace the stream contents with `data`.
    pub fn set_buffer(&mut self, data: &[u8]) {
        self.buffer.clear();
        self.buffer.extend_from_slice(data);
        self.end = data.len();
        self.next_frame = 0;
    }

    /// Mark `count` bytes as consumed. Saturates at the end of the data.
    pub fn consume(&mut self, count: usize) {
        self.next_frame = (self.next_frame + count).min(self.end);
    }

    /// Move the unconsumed bytes to the front of the buffer and return how
    /// many there are.
    pub fn compact(&mut self) -> usize {
        let tail = self.remaining();
        if self.next_frame > 0 {
            self.buffer.copy_within(self.next_frame..self.end, 0);
        }
        self.next_frame = 0;
        self.end = tail;
        tail
    }

    /// Free space behind the data, up to a total of `capacity` bytes.
    ///
    /// Grows the buffer on first use; later refills reuse the allocation.
    pub fn spare_mut(&mut self, capacity: usize) -> &mut [u8] {
        if self.buffer.len() < capacity {
            self.buffer.resize(capacity, 0);
        }
        let start = self.end.min(capacity);
        &mut self.buffer[start..capacity]
    }

    /// Append `count` bytes previously written into [`spare_mut`](Self::spare_mut).
    pub fn commit(&mut self, count: usize) {
        self.end = (self.end + count).min(self.buffer.len());
    }

    /// Bytes allocated for the working buffer.
    pub fn allocated(&self) -> usize {
        self.buffer.len()
    }
}

/// Planar block of native samples for one decoded frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PcmBlock {
    planes: Vec<Vec<Fixed>>,
}

impl PcmBlock {
    /// Create a block from one sample plane per channel.
    pub fn new(planes: Vec<Vec<Fixed>>) -> Self {
        Self { planes }
    }

    /// Number of channels.
    pub fn channels(&self) -> usize {
        self.planes.len()
    }

    /// Sample frames per channel. Uses the shortest plane.
    pub fn len(&self) -> usize {
        self.planes.iter().map(Vec::len).min().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Samples of one channel.
    pub fn plane(&self, channel: usize) -> &[Fixed] {
        &self.planes[channel]
    }

    /// `true` when at least one channel is present and all planes have the
    /// same length.
    pub fn is_consistent(&self) -> bool {
        match self.planes.first() {
            Some(first) => self.planes.iter().all(|p| p.len() == first.len()),
            None => false,
        }
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Callback slots the engine invokes from inside [`CodecEngine::run`].
pub trait FrameHandler {
    /// The engine needs more compressed bytes.
    ///
    /// `stream` still holds the unconsumed tail of the previous buffer; the
    /// handler replaces it via [`InputStream::set_buffer`].
    fn input(&mut self, stream: &mut InputStream) -> Flow;

    /// A frame header was decoded; called before that frame's samples.
    fn header(&mut self, _header: &FrameHeader) -> Flow {
        Flow::Continue
    }

    /// A frame was decoded.
    fn output(&mut self, header: &FrameHeader, pcm: &PcmBlock) -> Flow;

    /// A frame could not be decoded.
    fn error(&mut self, error: &EngineError) -> Flow;
}

/// An external decoding engine driven through a synchronous run loop.
pub trait CodecEngine: Send {
    /// Run until a callback answers `Stop` or `Break`.
    fn run(&mut self, handler: &mut dyn FrameHandler) -> RunOutcome;

    /// Release engine resources. Called exactly once after `run` returns.
    fn finish(&mut self);
}

impl<E: CodecEngine + ?Sized> CodecEngine for Box<E> {
    fn run(&mut self, handler: &mut dyn FrameHandler) -> RunOutcome {
        (**self).run(handler)
    }

    fn finish(&mut self) {
        (**self).finish()
    }
}
