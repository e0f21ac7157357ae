//! # Sample Format Converter
//!
//! Converts the engine's native fixed-point samples into signed 16-bit PCM.
//!
//! Two paths are available:
//! - [`scale`]: clamp to full scale and truncate. Cheap, stateless.
//! - [`audio_linear_dither`]: second-order noise-shaped error feedback with
//!   triangular dither. Needs one [`DitherState`] per channel that persists
//!   for the whole session.

use crate::config::ConversionMode;
use crate::engine::PcmBlock;
use crate::fixed::Fixed;

/// Output bit depth produced by the converter.
pub const OUTPUT_BITS: u32 = 16;

const FULL_SCALE_MIN: i64 = -(Fixed::ONE.0 as i64);
const FULL_SCALE_MAX: i64 = Fixed::ONE.0 as i64 - 1;

/// Convert a fixed-point sample to 16 bits by saturating and truncating.
///
/// Values at or beyond full scale saturate to `i16::MAX` / `i16::MIN`.
pub fn scale(sample: Fixed) -> i16 {
    let clamped = i64::from(sample.0).clamp(FULL_SCALE_MIN, FULL_SCALE_MAX);
    (clamped >> (Fixed::FRAC_BITS + 1 - OUTPUT_BITS)) as i16
}

/// Per-channel noise shaping registers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DitherState {
    /// Quantisation error history, most recent first.
    pub error: [i32; 3],
    /// Last pseudo-random value.
    pub random: u32,
}

/// Clipping counters collected while converting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClipStats {
    /// Number of samples that had to be clipped.
    pub clipped_samples: u64,
    /// Largest overshoot beyond full scale, in fixed-point units.
    pub peak_clipping: i64,
}

impl ClipStats {
    fn record(&mut self, overshoot: i64) {
        self.clipped_samples += 1;
        if overshoot > self.peak_clipping {
            self.peak_clipping = overshoot;
        }
    }
}

fn prng(state: u32) -> u32 {
    state.wrapping_mul(0x0019_660d).wrapping_add(0x3c6e_f35f)
}

/// Requantise a fixed-point sample to `bits` with noise-shaped dither.
///
/// Returns the quantised value scaled down to `bits` (e.g. `i16` range for
/// 16 bits). `bits` must be in `2..=FRAC_BITS`.
pub fn audio_linear_dither(
    bits: u32,
    sample: Fixed,
    dither: &mut DitherState,
    stats: &mut ClipStats,
) -> i32 {
    debug_assert!((2..=Fixed::FRAC_BITS).contains(&bits));

    let mut sample = i64::from(sample.0);

    // noise shape
    sample += i64::from(dither.error[0]) - i64::from(dither.error[1]) + i64::from(dither.error[2]);
    dither.error[2] = dither.error[1];
    dither.error[1] = dither.error[0] / 2;

    let scalebits = Fixed::FRAC_BITS + 1 - bits;
    let mask: i64 = (1 << scalebits) - 1;

    // bias
    let mut output = sample + (1 << (scalebits - 1));

    // dither
    let random = prng(dither.random);
    output += (i64::from(random) & mask) - (i64::from(dither.random) & mask);
    dither.random = random;

    // clip
    if output > FULL_SCALE_MAX {
        stats.record(output - FULL_SCALE_MAX);
        output = FULL_SCALE_MAX;
    } else if output < FULL_SCALE_MIN {
        stats.record(FULL_SCALE_MIN - output);
        output = FULL_SCALE_MIN;
    }
    sample = sample.clamp(FULL_SCALE_MIN, FULL_SCALE_MAX);

    // quantize
    output &= !mask;

    // error feedback
    dither.error[0] = (sample - output) as i32;

    (output >> scalebits) as i32
}

/// Stateful converter owned by the decode worker.
///
/// Holds one dither state per channel so that noise shaping carries across
/// frame boundaries. States are only reset by creating a new converter.
#[derive(Debug, Clone)]
pub struct SampleConverter {
    mode: ConversionMode,
    dither: Vec<DitherState>,
    stats: ClipStats,
}

impl SampleConverter {
    /// Create a converter for the given mode.
    pub fn new(mode: ConversionMode) -> Self {
        Self {
            mode,
            dither: Vec::new(),
            stats: ClipStats::default(),
        }
    }

    /// Conversion mode in use.
    pub fn mode(&self) -> ConversionMode {
        self.mode
    }

    /// Clipping counters accumulated so far.
    pub fn stats(&self) -> ClipStats {
        self.stats
    }

    /// Dither registers for a channel, if that channel has been converted.
    pub fn dither_state(&self, channel: usize) -> Option<&DitherState> {
        self.dither.get(channel)
    }

    /// Convert one sample of the given channel.
    pub fn convert(&mut self, channel: usize, sample: Fixed) -> i16 {
        match self.mode {
            ConversionMode::Scale => {
                let raw = i64::from(sample.0);
                if raw > FULL_SCALE_MAX {
                    self.stats.record(raw - FULL_SCALE_MAX);
                } else if raw < FULL_SCALE_MIN {
                    self.stats.record(FULL_SCALE_MIN - raw);
                }
                scale(sample)
            }
            ConversionMode::Dither => {
                if channel >= self.dither.len() {
                    self.dither.resize(channel + 1, DitherState::default());
                }
                let value = audio_linear_dither(
                    OUTPUT_BITS,
                    sample,
                    &mut self.dither[channel],
                    &mut self.stats,
                );
                value as i16
            }
        }
    }

    /// Convert a planar block and append it as interleaved little-endian
    /// 16-bit PCM (L, R, L, R, ... for stereo).
    ///
    /// Returns the number of sample frames appended.
    pub fn write_interleaved(&mut self, block: &PcmBlock, out: &mut Vec<u8>) -> usize {
        let channels = block.channels();
        let frames = block.len();
        out.reserve(frames * channels * 2);

        for frame_idx in 0..frames {
            for chan_idx in 0..channels {
                let sample = block.plane(chan_idx)[frame_idx];
                let pcm = self.convert(chan_idx, sample);
                out.extend_from_slice(&pcm.to_le_bytes());
            }
        }

        frames
    }
}
