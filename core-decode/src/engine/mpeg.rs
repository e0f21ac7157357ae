//! # MPEG Audio Engine
//!
//! [`CodecEngine`] for MPEG-1/2/2.5 Layer I, II and III streams.
//!
//! The engine finds frames in the fed bytes itself (skipping ID3 tags and
//! junk, validating headers, computing frame lengths) and hands each complete
//! frame to a Symphonia decoder. Decoded samples are delivered to the handler
//! as planar [`Fixed`] blocks.
//!
//! Error reporting follows the usual MPEG decoder conventions: lost sync,
//! invalid headers and damaged frame data are recoverable; a stream the codec
//! library cannot handle at all is not.

use super::header::{FrameHeader, Layer, HEADER_LEN};
use super::{CodecEngine, EngineError, ErrorCode, Flow, FrameHandler, InputStream, PcmBlock, RunOutcome};
use crate::fixed::Fixed;
use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Channels, Signal};
use symphonia::core::codecs::{
    CodecParameters, CodecType, Decoder, DecoderOptions, CODEC_TYPE_MP1, CODEC_TYPE_MP2,
    CODEC_TYPE_MP3,
};
use symphonia::core::conv::IntoSample;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::Packet;
use symphonia::core::sample::Sample;
use tracing::{debug, trace};

const ID3V2_HEADER_LEN: usize = 10;
const ID3V1_TAG_LEN: usize = 128;

/// What the frame scanner found at the front of the input.
enum Scan {
    /// Not enough bytes to decide; ask for more input.
    NeedMore,
    /// A frame of `len` bytes starts at the front of the input.
    Frame { header: FrameHeader, len: usize },
    /// Bytes were skipped; report this error.
    Skipped(EngineError),
    /// Bytes were skipped silently (tags).
    Tag,
}

/// Parameters a decoder instance was created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DecoderKey {
    layer: Layer,
    sample_rate: u32,
    channels: u8,
}

impl DecoderKey {
    fn of(header: &FrameHeader) -> Self {
        Self {
            layer: header.layer,
            sample_rate: header.sample_rate,
            channels: header.channels(),
        }
    }

    fn codec(&self) -> CodecType {
        match self.layer {
            Layer::I => CODEC_TYPE_MP1,
            Layer::II => CODEC_TYPE_MP2,
            Layer::III => CODEC_TYPE_MP3,
        }
    }

    fn channel_layout(&self) -> Channels {
        if self.channels == 1 {
            Channels::FRONT_LEFT
        } else {
            Channels::FRONT_LEFT | Channels::FRONT_RIGHT
        }
    }
}

/// Frame-synchronising MPEG audio engine backed by Symphonia.
pub struct MpegEngine {
    stream: InputStream,
    decoder: Option<(DecoderKey, Box<dyn Decoder>)>,
    tag_remaining: usize,
    synced: bool,
    frames_decoded: u64,
}

impl Default for MpegEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MpegEngine {
    pub fn new() -> Self {
        Self {
            stream: InputStream::new(),
            decoder: None,
            tag_remaining: 0,
            synced: false,
            frames_decoded: 0,
        }
    }

    /// Frames successfully decoded so far.
    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    fn scan(&mut self) -> Scan {
        if self.tag_remaining > 0 {
            let skip = self.tag_remaining.min(self.stream.remaining());
            self.stream.consume(skip);
            self.tag_remaining -= skip;
            return if self.tag_remaining > 0 {
                Scan::NeedMore
            } else {
                Scan::Tag
            };
        }

        let data = self.stream.unconsumed();
        if data.len() < HEADER_LEN {
            return Scan::NeedMore;
        }

        if data.starts_with(b"ID3") {
            if data.len() < ID3V2_HEADER_LEN {
                return Scan::NeedMore;
            }
            let size = id3v2_tag_len(&data[..ID3V2_HEADER_LEN]);
            debug!(size, "Skipping ID3v2 tag");
            self.tag_remaining = size;
            return Scan::Tag;
        }

        if self.synced && data.starts_with(b"TAG") {
            trace!("Skipping ID3v1 tag");
            self.tag_remaining = ID3V1_TAG_LEN;
            return Scan::Tag;
        }

        match FrameHeader::parse(data) {
            Ok(header) => {
                let len = header.frame_len();
                if data.len() < len {
                    return Scan::NeedMore;
                }

                // Before the first frame, require what follows to be a matching
                // header or a tag, so junk that happens to look like a header is
                // not decoded.
                if !self.synced && data.len() >= len + HEADER_LEN {
                    let agrees = followed_by_frame_or_tag(&header, &data[len..]);
                    if !agrees {
                        self.stream.consume(1);
                        return Scan::Skipped(
                            EngineError::new(ErrorCode::LostSync)
                                .with_detail("false sync word"),
                        );
                    }
                }

                Scan::Frame { header, len }
            }
            Err(err) => {
                let skip = next_sync_candidate(data);
                self.stream.consume(skip);

                self.synced = false;
                Scan::Skipped(
                    EngineError::new(ErrorCode::from(err))
                        .with_detail(format!("skipped {} bytes", skip)),
                )
            }
        }
    }

    fn decoder_for(&mut self, header: &FrameHeader) -> Result<&mut Box<dyn Decoder>, EngineError> {
        let key = DecoderKey::of(header);
        let stale = match &self.decoder {
            Some((current, _)) => *current != key,
            None => true,
        };

        if stale {
            let mut params = CodecParameters::new();
            params
                .for_codec(key.codec())
                .with_sample_rate(key.sample_rate)
                .with_channels(key.channel_layout());

            let decoder = symphonia::default::get_codecs()
                .make(&params, &DecoderOptions::default())
                .map_err(|e| EngineError::new(ErrorCode::Unsupported).with_detail(e.to_string()))?;

            debug!(
                layer = ?key.layer,
                sample_rate = key.sample_rate,
                channels = key.channels,
                "Created MPEG audio decoder"
            );
            self.decoder = Some((key, decoder));
        }

        match &mut self.decoder {
            Some((_, decoder)) => Ok(decoder),
            None => Err(EngineError::new(ErrorCode::Unsupported)),
        }
    }

    fn decode(&mut self, header: &FrameHeader, frame: &[u8]) -> Result<PcmBlock, EngineError> {
        let samples = header.samples_per_frame() as u64;
        let ts = self.frames_decoded * samples;
        let packet = Packet::new_from_slice(0, ts, samples, frame);

        let decoder = self.decoder_for(header)?;
        let decoded = match decoder.decode(&packet) {
            Ok(buffer) => Ok(to_planes(&buffer)),
            Err(err) => Err(err),
        };

        let result = match decoded {
            Ok(block) => Ok(block),
            Err(SymphoniaError::DecodeError(msg)) => {
                Err(EngineError::new(ErrorCode::BadHuffData).with_detail(msg))
            }
            Err(SymphoniaError::IoError(e)) => {
                Err(EngineError::new(ErrorCode::BadFrameLen).with_detail(e.to_string()))
            }
            Err(SymphoniaError::ResetRequired) => {
                self.decoder = None;
                Err(EngineError::new(ErrorCode::BadDataPtr).with_detail("decoder reset"))
            }
            Err(other) => {
                Err(EngineError::new(ErrorCode::Unsupported).with_detail(other.to_string()))
            }
        };

        if result.is_ok() {
            self.frames_decoded += 1;
        }
        result
    }
}

/// Settle a callback answer: `None` to keep going, `Some` to leave the loop.
fn settle(flow: Flow) -> Option<RunOutcome> {
    match flow {
        Flow::Continue => None,
        Flow::Stop => Some(RunOutcome::Completed),
        Flow::Break => Some(RunOutcome::Aborted),
    }
}

impl CodecEngine for MpegEngine {
    fn run(&mut self, handler: &mut dyn FrameHandler) -> RunOutcome {
        loop {
            match self.scan() {
                Scan::NeedMore => {
                    if let Some(outcome) = settle(handler.input(&mut self.stream)) {
                        return outcome;
                    }
                }
                Scan::Tag => {}
                Scan::Skipped(err) => {
                    if let Some(outcome) = settle(handler.error(&err)) {
                        return outcome;
                    }
                }
                Scan::Frame { header, len } => {
                    self.synced = true;
                    let frame = self.stream.unconsumed()[..len].to_vec();
                    self.stream.consume(len);

                    if let Some(outcome) = settle(handler.header(&header)) {
                        return outcome;
                    }

                    let flow = match self.decode(&header, &frame) {
                        Ok(block) if block.is_empty() => Flow::Continue,
                        Ok(block) => handler.output(&header, &block),
                        Err(err) => handler.error(&err),
                    };
                    if let Some(outcome) = settle(flow) {
                        return outcome;
                    }
                }
            }
        }
    }

    fn finish(&mut self) {
        debug!(frames = self.frames_decoded, "MPEG engine finished");
        self.decoder = None;
        self.stream = InputStream::new();
        self.tag_remaining = 0;
        self.synced = false;
    }
}

/// Whether `rest`, the bytes after a candidate first frame, starts with a
/// header of the same stream or with an ID3 tag.
fn followed_by_frame_or_tag(header: &FrameHeader, rest: &[u8]) -> bool {
    if rest.starts_with(b"TAG") || rest.starts_with(b"ID3") {
        return true;
    }
    FrameHeader::parse(rest)
        .map(|next| {
            next.version == header.version
                && next.layer == header.layer
                && next.sample_rate == header.sample_rate
        })
        .unwrap_or(false)
}

/// Total ID3v2 tag length (header, body and optional footer).
fn id3v2_tag_len(header: &[u8]) -> usize {
    let body = header[6..10]
        .iter()
        .fold(0usize, |acc, &b| (acc << 7) | usize::from(b & 0x7f));
    let footer = if header[5] & 0x10 != 0 { ID3V2_HEADER_LEN } else { 0 };
    ID3V2_HEADER_LEN + body + footer
}

/// Offset of the next byte that could start a frame header, never zero.
fn next_sync_candidate(data: &[u8]) -> usize {
    (1..data.len())
        .find(|&i| data[i] == 0xff && data.get(i + 1).map_or(true, |&b| b & 0xe0 == 0xe0))
        .unwrap_or(data.len())
}

fn to_planes(buffer: &AudioBufferRef<'_>) -> PcmBlock {
    match buffer {
        AudioBufferRef::F32(buf) => planes(&**buf, |s: f32| s),
        AudioBufferRef::F64(buf) => planes(&**buf, |s: f64| s.into_sample()),
        AudioBufferRef::S32(buf) => planes(&**buf, |s: i32| s.into_sample()),
        AudioBufferRef::S16(buf) => planes(&**buf, |s: i16| s.into_sample()),
        AudioBufferRef::S24(buf) => planes(&**buf, |s| IntoSample::into_sample(s)),
        AudioBufferRef::S8(buf) => planes(&**buf, |s: i8| s.into_sample()),
        AudioBufferRef::U32(buf) => planes(&**buf, |s: u32| s.into_sample()),
        AudioBufferRef::U16(buf) => planes(&**buf, |s: u16| s.into_sample()),
        AudioBufferRef::U24(buf) => planes(&**buf, |s| IntoSample::into_sample(s)),
        AudioBufferRef::U8(buf) => planes(&**buf, |s: u8| s.into_sample()),
    }
}

fn planes<T>(buf: &AudioBuffer<T>, convert: fn(T) -> f32) -> PcmBlock
where
    T: Sample + Copy,
{
    let channels = buf.spec().channels.count();
    let frames = buf.frames();
    let planes = (0..channels)
        .map(|ch| {
            buf.chan(ch)[..frames]
                .iter()
                .map(|&s| Fixed::from_f32(convert(s)))
                .collect()
        })
        .collect();
    PcmBlock::new(planes)
}
