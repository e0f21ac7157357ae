//! Shared harness for decode driver integration tests.
//!
//! `ScriptedEngine` implements a tiny synthetic frame format so the driver
//! can be exercised without real MPEG data:
//!
//! ```text
//! audio frame: A5 5A | channels u8 | rate code u8 | samples u16 LE | planar i32 LE samples
//! error frame: A5 EE | code u16 LE
//! ```
//!
//! Rate codes: 0 = 44100, 1 = 48000, 2 = 32000.

#![allow(dead_code)]

use core_decode::engine::{
    ChannelMode, CodecEngine, Emphasis, EngineError, ErrorCode, Flow, FrameHandler, FrameHeader,
    InputStream, Layer, MpegVersion, PcmBlock, RunOutcome,
};
use core_decode::Fixed;
use parking_lot::Mutex;
use std::io::{self, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;

const MAGIC: u8 = 0xA5;
const AUDIO: u8 = 0x5A;
const ERROR: u8 = 0xEE;
const AUDIO_HEADER_LEN: usize = 6;
const ERROR_FRAME_LEN: usize = 4;

pub fn init_logging() {
    core_runtime::logging::init_test_logging(core_runtime::sink::LogLevel::Debug);
}

// ============================================================================
// Frame Encoding
// ============================================================================

/// Sample value whose plain 16-bit conversion is exactly `value`.
pub fn fixed_for(value: i16) -> i32 {
    i32::from(value) << 13
}

/// Encode one audio frame from per-channel 16-bit target values.
pub fn audio_frame(rate_code: u8, planes: &[Vec<i16>]) -> Vec<u8> {
    let samples = planes.first().map_or(0, Vec::len);
    let mut out = vec![MAGIC, AUDIO, planes.len() as u8, rate_code];
    out.extend_from_slice(&(samples as u16).to_le_bytes());
    for plane in planes {
        for &value in plane {
            out.extend_from_slice(&fixed_for(value).to_le_bytes());
        }
    }
    out
}

/// Encode a frame carrying raw fixed-point samples.
pub fn raw_audio_frame(rate_code: u8, planes: &[Vec<i32>]) -> Vec<u8> {
    let samples = planes.first().map_or(0, Vec::len);
    let mut out = vec![MAGIC, AUDIO, planes.len() as u8, rate_code];
    out.extend_from_slice(&(samples as u16).to_le_bytes());
    for plane in planes {
        for &value in plane {
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
    out
}

/// Encode an error frame.
pub fn error_frame(code: ErrorCode) -> Vec<u8> {
    let mut out = vec![MAGIC, ERROR];
    out.extend_from_slice(&code.code().to_le_bytes());
    out
}

/// Stereo frame `index` with distinct, predictable samples.
pub fn numbered_stereo_frame(index: usize, samples: usize) -> Vec<u8> {
    let base = (index * samples) as i16;
    let left: Vec<i16> = (0..samples).map(|i| base.wrapping_add(i as i16)).collect();
    let right: Vec<i16> = left.iter().map(|v| v.wrapping_neg()).collect();
    audio_frame(0, &[left, right])
}

/// Interleaved little-endian PCM the driver should produce for `frames`
/// encoded with [`audio_frame`].
pub fn expected_pcm(planes_per_frame: &[Vec<Vec<i16>>]) -> Vec<u8> {
    let mut out = Vec::new();
    for planes in planes_per_frame {
        let samples = planes.first().map_or(0, Vec::len);
        for i in 0..samples {
            for plane in planes {
                out.extend_from_slice(&plane[i].to_le_bytes());
            }
        }
    }
    out
}

fn code_from(raw: u16) -> ErrorCode {
    [
        ErrorCode::BufLen,
        ErrorCode::BufPtr,
        ErrorCode::NoMem,
        ErrorCode::Unsupported,
        ErrorCode::LostSync,
        ErrorCode::BadCrc,
        ErrorCode::BadHuffData,
    ]
    .into_iter()
    .find(|c| c.code() == raw)
    .unwrap_or(ErrorCode::Unsupported)
}

fn header_for(channels: u8, rate_code: u8) -> FrameHeader {
    FrameHeader {
        version: MpegVersion::Mpeg1,
        layer: Layer::III,
        mode: if channels == 1 {
            ChannelMode::SingleChannel
        } else {
            ChannelMode::Stereo
        },
        bitrate: 128_000,
        sample_rate: match rate_code {
            1 => 48000,
            2 => 32000,
            _ => 44100,
        },
        crc_protected: false,
        padding: false,
        emphasis: Emphasis::None,
    }
}

// ============================================================================
// ScriptedEngine
// ============================================================================

/// Observations shared between a test and its engine.
#[derive(Default)]
pub struct EngineProbe {
    /// Every complete frame the engine parsed, in order.
    pub parsed: Mutex<Vec<u8>>,
    pub finish_calls: AtomicUsize,
    pub input_calls: AtomicUsize,
}

impl EngineProbe {
    pub fn finish_calls(&self) -> usize {
        self.finish_calls.load(Ordering::SeqCst)
    }
}

/// Engine over the synthetic frame format.
pub struct ScriptedEngine {
    stream: InputStream,
    probe: Arc<EngineProbe>,
}

impl ScriptedEngine {
    pub fn new() -> (Self, Arc<EngineProbe>) {
        let probe = Arc::new(EngineProbe::default());
        (
            Self {
                stream: InputStream::new(),
                probe: Arc::clone(&probe),
            },
            probe,
        )
    }
}

fn settle(flow: Flow) -> Option<RunOutcome> {
    match flow {
        Flow::Continue => None,
        Flow::Stop => Some(RunOutcome::Completed),
        Flow::Break => Some(RunOutcome::Aborted),
    }
}

impl CodecEngine for ScriptedEngine {
    fn run(&mut self, handler: &mut dyn FrameHandler) -> RunOutcome {
        loop {
            let data = self.stream.unconsumed();

            let need_more = if data.len() < 2 {
                true
            } else if data[0] != MAGIC {
                self.stream.consume(1);
                let err = EngineError::new(ErrorCode::LostSync);
                if let Some(outcome) = settle(handler.error(&err)) {
                    return outcome;
                }
                continue;
            } else if data[1] == ERROR {
                if data.len() < ERROR_FRAME_LEN {
                    true
                } else {
                    let code = code_from(u16::from_le_bytes([data[2], data[3]]));
                    self.probe
                        .parsed
                        .lock()
                        .extend_from_slice(&data[..ERROR_FRAME_LEN]);
                    self.stream.consume(ERROR_FRAME_LEN);
                    if let Some(outcome) = settle(handler.error(&EngineError::new(code))) {
                        return outcome;
                    }
                    continue;
                }
            } else if data.len() < AUDIO_HEADER_LEN {
                true
            } else {
                let channels = data[2];
                let samples = usize::from(u16::from_le_bytes([data[4], data[5]]));
                let len = AUDIO_HEADER_LEN + usize::from(channels) * samples * 4;
                if data.len() < len {
                    true
                } else {
                    let header = header_for(channels, data[3]);
                    let planes = (0..usize::from(channels))
                        .map(|ch| {
                            let start = AUDIO_HEADER_LEN + ch * samples * 4;
                            data[start..start + samples * 4]
                                .chunks_exact(4)
                                .map(|b| Fixed(i32::from_le_bytes([b[0], b[1], b[2], b[3]])))
                                .collect()
                        })
                        .collect();
                    let block = PcmBlock::new(planes);

                    self.probe.parsed.lock().extend_from_slice(&data[..len]);
                    self.stream.consume(len);

                    if let Some(outcome) = settle(handler.header(&header)) {
                        return outcome;
                    }
                    if let Some(outcome) = settle(handler.output(&header, &block)) {
                        return outcome;
                    }
                    continue;
                }
            };

            if need_more {
                self.probe.input_calls.fetch_add(1, Ordering::SeqCst);
                if let Some(outcome) = settle(handler.input(&mut self.stream)) {
                    return outcome;
                }
            }
        }
    }

    fn finish(&mut self) {
        self.probe.finish_calls.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Byte Sources
// ============================================================================

/// Serves `data` in reads of at most `chunk` bytes.
pub struct ChunkedSource {
    data: Vec<u8>,
    pos: usize,
    chunk: usize,
}

impl ChunkedSource {
    pub fn new(data: Vec<u8>, chunk: usize) -> Self {
        Self { data, pos: 0, chunk }
    }
}

impl Read for ChunkedSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.chunk.min(buf.len()).min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Serves `data`, then fails every read with `kind`.
pub struct FailingSource {
    inner: ChunkedSource,
    kind: io::ErrorKind,
}

impl FailingSource {
    pub fn new(data: Vec<u8>, kind: io::ErrorKind) -> Self {
        let chunk = data.len().max(1);
        Self {
            inner: ChunkedSource::new(data, chunk),
            kind,
        }
    }
}

impl Read for FailingSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.read(buf)? {
            0 => Err(io::Error::new(self.kind, "source went away")),
            n => Ok(n),
        }
    }
}

/// Blocks until the test releases chunks through a channel; EOF once the
/// sender is dropped.
pub struct GatedSource {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

impl GatedSource {
    pub fn new() -> (Self, Sender<Vec<u8>>) {
        let (tx, rx) = std::sync::mpsc::channel();
        (
            Self {
                rx,
                pending: Vec::new(),
            },
            tx,
        )
    }
}

impl Read for GatedSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv() {
                Ok(chunk) => self.pending = chunk,
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

/// Repeats one frame forever.
pub struct InfiniteSource {
    frame: Vec<u8>,
    pos: usize,
}

impl InfiniteSource {
    pub fn new(frame: Vec<u8>) -> Self {
        Self { frame, pos: 0 }
    }
}

impl Read for InfiniteSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        for byte in buf.iter_mut() {
            *byte = self.frame[self.pos];
            self.pos = (self.pos + 1) % self.frame.len();
        }
        Ok(buf.len())
    }
}
