//! End-to-end tests for the decode driver using the scripted engine.

mod common;

use common::*;
use core_decode::engine::ErrorCode;
use core_decode::{
    ConversionMode, DecodeError, DecodeSession, DecoderConfig, DriverState, FinishReason, Fixed,
    ReadOutcome,
};
use std::io::{self, Read};
use std::thread;
use std::time::Duration;

fn numbered_planes(index: usize, samples: usize) -> Vec<Vec<i16>> {
    let base = (index * samples) as i16;
    let left: Vec<i16> = (0..samples).map(|i| base.wrapping_add(i as i16)).collect();
    let right: Vec<i16> = left.iter().map(|v| v.wrapping_neg()).collect();
    vec![left, right]
}

fn numbered_stream(frames: usize, samples: usize) -> (Vec<u8>, Vec<u8>) {
    let input: Vec<u8> = (0..frames)
        .flat_map(|i| numbered_stereo_frame(i, samples))
        .collect();
    let planes: Vec<_> = (0..frames).map(|i| numbered_planes(i, samples)).collect();
    (input, expected_pcm(&planes))
}

/// Drain with `try_read`, returning the PCM and the terminal result.
fn drain_try_read(session: &DecodeSession) -> (Vec<u8>, Result<(), DecodeError>) {
    let mut pcm = Vec::new();
    let mut buf = [0u8; 999];
    loop {
        match session.try_read(&mut buf) {
            Ok(ReadOutcome::Read(n)) => pcm.extend_from_slice(&buf[..n]),
            Ok(ReadOutcome::NotYetStarted) => thread::sleep(Duration::from_millis(1)),
            Ok(ReadOutcome::EndOfStream) => return (pcm, Ok(())),
            Err(err) => return (pcm, Err(err)),
        }
    }
}

#[test]
fn test_output_is_independent_of_source_chunking() {
    init_logging();
    let (input, expected) = numbered_stream(10, 37);

    for chunk in [1, 7, 4096, input.len()] {
        let (engine, probe) = ScriptedEngine::new();
        let mut session = DecodeSession::spawn(
            ChunkedSource::new(input.clone(), chunk),
            engine,
            DecoderConfig::default(),
        )
        .unwrap();

        let mut pcm = Vec::new();
        session.read_to_end(&mut pcm).unwrap();

        assert_eq!(pcm, expected, "chunk size {}", chunk);
        assert_eq!(*probe.parsed.lock(), input, "chunk size {}", chunk);
        assert_eq!(session.stats().bytes_fed, input.len() as u64);
        assert_eq!(session.stats().frames_produced, 10 * 37);
        assert_eq!(session.join(), DriverState::Finished(FinishReason::EndOfStream));
        drop(session);
        assert_eq!(probe.finish_calls(), 1);
    }
}

#[test]
fn test_ten_frames_of_cd_audio() {
    init_logging();
    let (input, expected) = numbered_stream(10, 1152);
    let (engine, _probe) = ScriptedEngine::new();

    let mut session =
        DecodeSession::spawn(ChunkedSource::new(input, 4000), engine, DecoderConfig::default())
            .unwrap();

    let mut pcm = Vec::new();
    session.read_to_end(&mut pcm).unwrap();

    assert_eq!(pcm.len(), 10 * 1152 * 2 * 2);
    assert_eq!(pcm, expected);

    let metadata = session.metadata();
    assert_eq!(metadata.sample_rate, 44100);
    assert_eq!(metadata.channels, 2);
    assert_eq!(session.stats().frames_produced, 11520);
}

#[test]
fn test_mono_channel_count_comes_from_header() {
    let mono: Vec<i16> = (0..100).collect();
    let input = audio_frame(1, &[mono.clone()]);
    let (engine, _probe) = ScriptedEngine::new();

    let mut session =
        DecodeSession::spawn(ChunkedSource::new(input, 64), engine, DecoderConfig::default())
            .unwrap();

    let mut pcm = Vec::new();
    session.read_to_end(&mut pcm).unwrap();

    assert_eq!(pcm, expected_pcm(&[vec![mono]]));
    assert_eq!(session.metadata().channels, 1);
    assert_eq!(session.metadata().sample_rate, 48000);
}

#[test]
fn test_source_error_surfaces_after_buffered_output() {
    init_logging();
    let (input, expected) = numbered_stream(3, 50);
    let (engine, probe) = ScriptedEngine::new();

    let mut session = DecodeSession::spawn(
        FailingSource::new(input, io::ErrorKind::ConnectionReset),
        engine,
        DecoderConfig::default(),
    )
    .unwrap();

    let (pcm, result) = drain_try_read(&session);
    assert_eq!(pcm, expected);

    let err = result.unwrap_err();
    assert!(matches!(
        err,
        DecodeError::SourceReadFailure { kind: io::ErrorKind::ConnectionReset, .. }
    ));

    // Repeats on every subsequent read.
    let mut buf = [0u8; 16];
    assert_eq!(session.try_read(&mut buf), Err(err.clone()));
    let io_err = session.read(&mut buf).unwrap_err();
    assert_eq!(io_err.kind(), io::ErrorKind::ConnectionReset);

    assert_eq!(session.join(), DriverState::Finished(FinishReason::Failed(err)));
    drop(session);
    assert_eq!(probe.finish_calls(), 1);
}

#[test]
fn test_end_of_stream_is_idempotent() {
    let (input, _) = numbered_stream(2, 10);
    let (engine, _probe) = ScriptedEngine::new();
    let mut session =
        DecodeSession::spawn(ChunkedSource::new(input, 5), engine, DecoderConfig::default())
            .unwrap();

    let (pcm, result) = drain_try_read(&session);
    assert!(result.is_ok());
    assert_eq!(pcm.len(), 2 * 10 * 4);

    let mut buf = [0u8; 16];
    for _ in 0..3 {
        assert_eq!(session.try_read(&mut buf), Ok(ReadOutcome::EndOfStream));
        assert_eq!(session.read(&mut buf).unwrap(), 0);
    }
}

#[test]
fn test_empty_source_ends_cleanly() {
    let (engine, probe) = ScriptedEngine::new();
    let mut session =
        DecodeSession::spawn(ChunkedSource::new(Vec::new(), 1), engine, DecoderConfig::default())
            .unwrap();

    assert_eq!(session.join(), DriverState::Finished(FinishReason::EndOfStream));

    let mut buf = [0u8; 16];
    assert_eq!(session.try_read(&mut buf), Ok(ReadOutcome::EndOfStream));
    assert!(!session.metadata().is_known());
    assert_eq!(probe.finish_calls(), 1);
}

#[test]
fn test_not_yet_started_until_first_bytes_arrive() {
    init_logging();
    let (source, gate) = GatedSource::new();
    let (engine, _probe) = ScriptedEngine::new();
    let mut session = DecodeSession::spawn(source, engine, DecoderConfig::default()).unwrap();

    let mut buf = [0u8; 64];
    assert_eq!(session.try_read(&mut buf), Ok(ReadOutcome::NotYetStarted));
    assert!(session.state().is_running());
    assert_eq!(session.stats().bytes_fed, 0);

    let (input, expected) = numbered_stream(4, 16);
    gate.send(input).unwrap();
    drop(gate);

    let mut pcm = Vec::new();
    session.read_to_end(&mut pcm).unwrap();
    assert_eq!(pcm, expected);
}

#[test]
fn test_read_starts_a_created_session() {
    let (input, expected) = numbered_stream(3, 8);
    let (engine, _probe) = ScriptedEngine::new();
    let mut session =
        DecodeSession::new(ChunkedSource::new(input, 3), engine, DecoderConfig::default())
            .unwrap();

    let mut buf = [0u8; 8];
    assert_eq!(session.try_read(&mut buf), Ok(ReadOutcome::NotYetStarted));
    assert_eq!(session.state(), DriverState::Created);

    let mut pcm = Vec::new();
    session.read_to_end(&mut pcm).unwrap();
    assert_eq!(pcm, expected);
    assert_eq!(session.start(), Err(DecodeError::AlreadyStarted));
}

#[test]
fn test_cancel_stops_an_endless_stream() {
    init_logging();
    let (engine, probe) = ScriptedEngine::new();
    let config = DecoderConfig::default().with_output_buffer(4096);
    let mut session =
        DecodeSession::spawn(InfiniteSource::new(numbered_stereo_frame(0, 64)), engine, config)
            .unwrap();

    let mut head = vec![0u8; 1000];
    session.read_exact(&mut head).unwrap();

    session.cancel();
    let (_rest, result) = drain_try_read(&session);
    assert!(result.is_ok());

    assert_eq!(session.join(), DriverState::Finished(FinishReason::Cancelled));
    drop(session);
    assert_eq!(probe.finish_calls(), 1);
}

#[test]
fn test_drop_joins_a_blocked_worker() {
    let (engine, probe) = ScriptedEngine::new();
    let config = DecoderConfig::default().with_output_buffer(512);
    let session =
        DecodeSession::spawn(InfiniteSource::new(numbered_stereo_frame(0, 64)), engine, config)
            .unwrap();

    // Let the worker fill the output buffer and park on backpressure.
    thread::sleep(Duration::from_millis(50));
    assert!(session.state().is_running());

    drop(session);
    assert_eq!(probe.finish_calls(), 1);
}

#[test]
fn test_recoverable_errors_are_skipped() {
    let mut input = numbered_stereo_frame(0, 20);
    input.extend(error_frame(ErrorCode::BadCrc));
    input.push(0x00); // junk byte, lost sync
    input.extend(numbered_stereo_frame(1, 20));

    let (engine, _probe) = ScriptedEngine::new();
    let mut session =
        DecodeSession::spawn(ChunkedSource::new(input, 16), engine, DecoderConfig::default())
            .unwrap();

    let mut pcm = Vec::new();
    session.read_to_end(&mut pcm).unwrap();

    assert_eq!(
        pcm,
        expected_pcm(&[numbered_planes(0, 20), numbered_planes(1, 20)])
    );
    assert_eq!(session.join(), DriverState::Finished(FinishReason::EndOfStream));
}

#[test]
fn test_fatal_error_stops_decoding() {
    let mut input = numbered_stereo_frame(0, 20);
    input.extend(error_frame(ErrorCode::NoMem));
    input.extend(numbered_stereo_frame(1, 20));

    let (engine, _probe) = ScriptedEngine::new();
    let mut session =
        DecodeSession::spawn(ChunkedSource::new(input, 16), engine, DecoderConfig::default())
            .unwrap();

    let (pcm, result) = drain_try_read(&session);
    assert_eq!(pcm, expected_pcm(&[numbered_planes(0, 20)]));
    assert!(matches!(
        result,
        Err(DecodeError::FatalStreamError { code: 0x0031, .. })
    ));

    let mut buf = [0u8; 4];
    assert_eq!(
        session.read(&mut buf).unwrap_err().kind(),
        io::ErrorKind::InvalidData
    );
}

#[test]
fn test_oversized_tail_is_invariant_violation() {
    // One frame is larger than the whole working buffer.
    let (input, _) = numbered_stream(1, 1152);
    let (engine, probe) = ScriptedEngine::new();
    let config = DecoderConfig::default().with_working_buffer(4096);

    let mut session =
        DecodeSession::spawn(ChunkedSource::new(input, 4096), engine, config).unwrap();

    assert!(matches!(
        session.join(),
        DriverState::Finished(FinishReason::Failed(DecodeError::InvariantViolation(_)))
    ));
    let (pcm, result) = drain_try_read(&session);
    assert!(pcm.is_empty());
    assert!(matches!(result, Err(DecodeError::InvariantViolation(_))));
    assert_eq!(probe.finish_calls(), 1);
}

#[test]
fn test_backpressure_bounds_pending_output() {
    let capacity = 256;
    let block_bytes = 64 * 2 * 2;
    let (input, expected) = numbered_stream(50, 64);
    let (engine, _probe) = ScriptedEngine::new();
    let config = DecoderConfig::default().with_output_buffer(capacity);

    let session =
        DecodeSession::spawn(ChunkedSource::new(input, 1000), engine, config).unwrap();

    let mut pcm = Vec::new();
    let mut buf = [0u8; 100];
    loop {
        assert!(session.stats().pending_bytes < capacity + block_bytes);
        match session.try_read(&mut buf).unwrap() {
            ReadOutcome::Read(n) => pcm.extend_from_slice(&buf[..n]),
            ReadOutcome::NotYetStarted => thread::yield_now(),
            ReadOutcome::EndOfStream => break,
        }
        if pcm.len() % 1000 < 100 {
            thread::sleep(Duration::from_millis(1));
        }
    }

    assert_eq!(pcm, expected);
}

#[test]
fn test_dithered_output_tracks_input() {
    let value = Fixed::from_f32(0.25).raw();
    let samples = 2000;
    let input = raw_audio_frame(0, &[vec![value; samples], vec![value; samples]]);
    let (engine, _probe) = ScriptedEngine::new();
    let config = DecoderConfig::default().with_conversion(ConversionMode::Dither);

    let mut session =
        DecodeSession::spawn(ChunkedSource::new(input, 512), engine, config).unwrap();

    let mut pcm = Vec::new();
    session.read_to_end(&mut pcm).unwrap();
    assert_eq!(pcm.len(), samples * 2 * 2);

    let decoded: Vec<i16> = pcm
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect();
    assert!(decoded.iter().all(|&s| (i32::from(s) - 8192).abs() <= 6));

    let mean = decoded.iter().map(|&s| f64::from(s)).sum::<f64>() / decoded.len() as f64;
    assert!((mean - 8192.0).abs() < 0.25, "mean {}", mean);
    assert_eq!(session.stats().clipped_samples, 0);
}

#[test]
fn test_plain_conversion_saturates_hot_samples() {
    let input = raw_audio_frame(0, &[vec![Fixed::ONE.raw() * 2, -Fixed::ONE.raw() * 3]]);
    let (engine, _probe) = ScriptedEngine::new();

    let mut session =
        DecodeSession::spawn(ChunkedSource::new(input, 64), engine, DecoderConfig::default())
            .unwrap();

    let mut pcm = Vec::new();
    session.read_to_end(&mut pcm).unwrap();

    assert_eq!(pcm, [i16::MAX.to_le_bytes(), i16::MIN.to_le_bytes()].concat());
    assert_eq!(session.stats().clipped_samples, 2);
}
