// Copyright 2025-2026 CEMAXECUTER LLC

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use num_complex::Complex32;
use parking_lot::Mutex;

use tx_dsp::Converter;
use tx_sdr::file::FileSink;
use tx_sdr::sink::TRAILING_SILENCE_SLOTS;
use tx_sdr::{SinkConfig, SinkState, TransferEngine, TxSink};

const SLOT: usize = 8;

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn tone(n: usize) -> Vec<Complex32> {
    // Never zero after scaling, so data slots are distinguishable from silence
    (0..n)
        .map(|i| {
            let phase = i as f32 * 0.7;
            Complex32::new(0.2 + 0.7 * phase.cos().abs(), -0.2 - 0.7 * phase.sin().abs())
        })
        .collect()
}

fn cs8(input: &[Complex32]) -> Vec<u8> {
    let mut out = vec![0i8; input.len() * 2];
    Converter::scalar().convert(input, &mut out);
    out.into_iter().map(|b| b as u8).collect()
}

fn run_session(num_samples: usize) -> (Vec<u8>, TxSink<FileSink<Capture>>) {
    let capture = Capture::default();
    let engine = FileSink::new(capture.clone(), SLOT).with_sample_rate(40_000);
    let config = SinkConfig {
        buffer_count: 4,
        slot_size: SLOT,
        stop_timeout: Some(Duration::from_secs(10)),
    };
    let mut sink = TxSink::new(config, engine).unwrap();

    sink.start().unwrap();
    assert_eq!(sink.state(), SinkState::Streaming);

    sink.work_all(&tone(num_samples)).unwrap();
    sink.stop().unwrap();

    assert_eq!(sink.state(), SinkState::Stopped);
    assert!(!sink.engine().unwrap().is_streaming());

    let bytes = capture.0.lock().clone();
    (bytes, sink)
}

/// Data slots in stream order, with underrun and trailing silence removed.
fn data_slots(stream: &[u8]) -> Vec<&[u8]> {
    stream
        .chunks(SLOT)
        .filter(|slot| slot.iter().any(|&b| b != 0))
        .collect()
}

fn trailing_zero_slots(stream: &[u8]) -> usize {
    stream
        .chunks(SLOT)
        .rev()
        .take_while(|slot| slot.iter().all(|&b| b == 0))
        .count()
}

#[test]
fn test_stop_flushes_partial_slot_and_silence() {
    let (stream, sink) = run_session(10);
    assert_eq!(stream.len() % SLOT, 0);

    // 10 samples = two full slots plus a half slot padded with zeros
    let expected = cs8(&tone(10));
    let slots = data_slots(&stream);
    assert_eq!(slots.len(), 3);
    assert_eq!(slots[0], &expected[0..8]);
    assert_eq!(slots[1], &expected[8..16]);
    assert_eq!(&slots[2][..4], &expected[16..20]);
    assert_eq!(&slots[2][4..], &[0, 0, 0, 0]);

    assert!(trailing_zero_slots(&stream) >= TRAILING_SILENCE_SLOTS);

    let stats = sink.stats();
    assert_eq!(stats.slots_pushed, 3 + TRAILING_SILENCE_SLOTS as u64);
    assert_eq!(stats.slots_drained, stats.slots_pushed);
}

#[test]
fn test_stop_on_slot_boundary_sends_six_silent_slots() {
    let (stream, _sink) = run_session(8);

    let expected = cs8(&tone(8));
    let slots = data_slots(&stream);
    assert_eq!(slots.concat(), expected);

    // Empty flush slot plus the trailing silence
    assert!(trailing_zero_slots(&stream) >= 1 + TRAILING_SILENCE_SLOTS);
}

#[test]
fn test_long_stream_keeps_order() {
    let capture = Capture::default();
    let engine: Box<dyn TransferEngine> =
        Box::new(FileSink::new(capture.clone(), SLOT).with_sample_rate(400_000));
    let config = SinkConfig {
        buffer_count: 3,
        slot_size: SLOT,
        stop_timeout: None,
    };
    let mut sink = TxSink::new(config, engine).unwrap();
    sink.start().unwrap();

    let input = tone(4 * 250);
    for block in input.chunks(37) {
        sink.work_all(block).unwrap();
    }
    sink.stop().unwrap();

    let stream = capture.0.lock().clone();
    assert_eq!(data_slots(&stream).concat(), cs8(&input));
}

#[test]
fn test_restart_after_stop() {
    let capture = Capture::default();
    let engine = FileSink::new(capture.clone(), SLOT).with_sample_rate(40_000);
    let config = SinkConfig {
        buffer_count: 4,
        slot_size: SLOT,
        stop_timeout: None,
    };
    let mut sink = TxSink::new(config, engine).unwrap();

    for _ in 0..2 {
        sink.start().unwrap();
        sink.work_all(&tone(4)).unwrap();
        sink.stop().unwrap();
    }

    let stream = capture.0.lock().clone();
    let expected = cs8(&tone(4));
    let slots = data_slots(&stream);
    assert_eq!(slots, vec![&expected[..], &expected[..]]);
}
