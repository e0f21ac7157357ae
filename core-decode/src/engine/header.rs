//! # MPEG Audio Frame Headers
//!
//! Parses the 32-bit header that starts every MPEG-1/2/2.5 audio frame and
//! derives the values the driver cares about: sample rate, channel count,
//! bitrate and frame length.

use serde::{Deserialize, Serialize};

/// Length of a frame header in bytes.
pub const HEADER_LEN: usize = 4;

/// Largest possible frame (MPEG-2.5 Layer II, 160 kbps at 8 kHz, padded).
pub const MAX_FRAME_LEN: usize = 2881;

/// MPEG audio version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MpegVersion {
    /// MPEG-1 (ISO/IEC 11172-3)
    Mpeg1,
    /// MPEG-2 low sampling frequencies (ISO/IEC 13818-3)
    Mpeg2,
    /// Unofficial MPEG-2.5 extension
    Mpeg25,
}

/// Audio layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Layer {
    /// Layer I
    I,
    /// Layer II
    II,
    /// Layer III
    III,
}

/// Channel mode from the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelMode {
    /// Independent left/right channels
    Stereo,
    /// Joint stereo (intensity and/or M/S)
    JointStereo,
    /// Two independent mono channels
    DualChannel,
    /// Mono
    SingleChannel,
}

impl ChannelMode {
    /// Number of output channels this mode decodes to.
    pub fn channel_count(self) -> u8 {
        match self {
            ChannelMode::SingleChannel => 1,
            _ => 2,
        }
    }
}

/// De-emphasis requested by the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Emphasis {
    None,
    FiftyFifteenMicros,
    Reserved,
    CcittJ17,
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameHeader {
    pub version: MpegVersion,
    pub layer: Layer,
    pub mode: ChannelMode,
    /// Bitrate in bits per second.
    pub bitrate: u32,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Whether a 16-bit CRC follows the header.
    pub crc_protected: bool,
    pub padding: bool,
    pub emphasis: Emphasis,
}

/// Why a candidate header was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderError {
    /// No sync word at this position.
    NoSync,
    /// Reserved layer value.
    BadLayer,
    /// Reserved or free-format bitrate index.
    BadBitrate,
    /// Reserved sample rate index.
    BadSampleRate,
    /// Reserved emphasis value.
    BadEmphasis,
}

const BITRATES_V1: [[u32; 15]; 3] = [
    [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448],
    [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384],
    [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320],
];

const BITRATES_V2: [[u32; 15]; 2] = [
    [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256],
    [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
];

const SAMPLE_RATES: [u32; 3] = [44100, 48000, 32000];

impl FrameHeader {
    /// Parse a header from the first four bytes of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Self, HeaderError> {
        if bytes.len() < HEADER_LEN {
            return Err(HeaderError::NoSync);
        }
        let word = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);

        if word >> 21 != 0x7ff {
            return Err(HeaderError::NoSync);
        }

        let version = match (word >> 19) & 0b11 {
            0b00 => MpegVersion::Mpeg25,
            0b10 => MpegVersion::Mpeg2,
            0b11 => MpegVersion::Mpeg1,
            _ => return Err(HeaderError::NoSync),
        };

        let layer = match (word >> 17) & 0b11 {
            0b01 => Layer::III,
            0b10 => Layer::II,
            0b11 => Layer::I,
            _ => return Err(HeaderError::BadLayer),
        };

        let crc_protected = (word >> 16) & 1 == 0;

        let bitrate_index = ((word >> 12) & 0xf) as usize;
        if bitrate_index == 0 || bitrate_index == 15 {
            return Err(HeaderError::BadBitrate);
        }
        let kbps = match version {
            MpegVersion::Mpeg1 => {
                let row = match layer {
                    Layer::I => 0,
                    Layer::II => 1,
                    Layer::III => 2,
                };
                BITRATES_V1[row][bitrate_index]
            }
            MpegVersion::Mpeg2 | MpegVersion::Mpeg25 => {
                let row = if layer == Layer::I { 0 } else { 1 };
                BITRATES_V2[row][bitrate_index]
            }
        };

        let rate_index = ((word >> 10) & 0b11) as usize;
        if rate_index == 3 {
            return Err(HeaderError::BadSampleRate);
        }
        let sample_rate = match version {
            MpegVersion::Mpeg1 => SAMPLE_RATES[rate_index],
            MpegVersion::Mpeg2 => SAMPLE_RATES[rate_index] / 2,
            MpegVersion::Mpeg25 => SAMPLE_RATES[rate_index] / 4,
        };

        let padding = (word >> 9) & 1 == 1;

        let mode = match (word >> 6) & 0b11 {
            0b00 => ChannelMode::Stereo,
            0b01 => ChannelMode::JointStereo,
            0b10 => ChannelMode::DualChannel,
            _ => ChannelMode::SingleChannel,
        };

        let emphasis = match word & 0b11 {
            0b00 => Emphasis::None,
            0b01 => Emphasis::FiftyFifteenMicros,
            0b11 => Emphasis::CcittJ17,
            _ => return Err(HeaderError::BadEmphasis),
        };

        Ok(Self {
            version,
            layer,
            mode,
            bitrate: kbps * 1000,
            sample_rate,
            crc_protected,
            padding,
            emphasis,
        })
    }

    /// Number of output channels.
    pub fn channels(&self) -> u8 {
        self.mode.channel_count()
    }

    /// PCM samples per channel produced by one frame.
    pub fn samples_per_frame(&self) -> usize {
        match (self.layer, self.version) {
            (Layer::I, _) => 384,
            (Layer::II, _) => 1152,
            (Layer::III, MpegVersion::Mpeg1) => 1152,
            (Layer::III, _) => 576,
        }
    }

    /// Total frame length in bytes, header included.
    pub fn frame_len(&self) -> usize {
        let bitrate = self.bitrate as usize;
        let rate = self.sample_rate as usize;
        let padding = usize::from(self.padding);
        match (self.layer, self.version) {
            (Layer::I, _) => (12 * bitrate / rate + padding) * 4,
            (Layer::II, _) | (Layer::III, MpegVersion::Mpeg1) => 144 * bitrate / rate + padding,
            (Layer::III, _) => 72 * bitrate / rate + padding,
        }
    }
}
