//! # Streaming PCM Decode Driver
//!
//! Turns a callback-driven MPEG audio engine into a blocking byte stream of
//! interleaved 16-bit little-endian PCM.
//!
//! ## Overview
//!
//! This crate handles:
//! - Feeding compressed bytes to the engine across frame boundaries
//! - Tracking stream metadata from frame headers
//! - Converting fixed-point samples to 16-bit PCM (plain or dithered)
//! - Buffering output between a background decode worker and the consumer
//! - An MPEG Layer I/II/III engine backed by symphonia (`mpeg-engine` feature)

pub mod accumulator;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod feeder;
pub mod fixed;
pub mod metadata;
pub mod sample_converter;

pub use accumulator::{OutputAccumulator, ReadOutcome, StreamCounters};
pub use config::{ConversionMode, DecoderConfig, DriverState, DriverStats, FinishReason};
pub use driver::DecodeSession;
pub use engine::{
    CodecEngine, EngineError, ErrorCode, Flow, FrameHandler, FrameHeader, InputStream, PcmBlock,
    RunOutcome,
};
#[cfg(feature = "mpeg-engine")]
pub use engine::MpegEngine;
pub use error::{DecodeError, Result};
pub use fixed::Fixed;
pub use metadata::{MetadataSink, StreamMetadata};
pub use sample_converter::SampleConverter;
