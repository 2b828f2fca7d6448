use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::PathBuf;
use std::time::Instant;

use crossbeam::channel;
use num_complex::Complex32;

use tx_sdr::file::FileSink;
use tx_sdr::{SinkConfig, TransferEngine, TxSink, TxStatsSnapshot};

/// Complex samples per block handed from the reader thread
const BLOCK_SIZE: usize = 65536;

/// IQ sample format for file input
#[derive(Debug, Clone, Copy)]
pub enum InputFormat {
    /// Complex float32 (CF32): pairs of f32, little-endian
    Cf32,
    /// Complex int16 (CS16): pairs of i16, little-endian
    Ci16,
}

impl InputFormat {
    fn bytes_per_sample(self) -> usize {
        match self {
            InputFormat::Cf32 => 8,
            InputFormat::Ci16 => 4,
        }
    }

    fn decode(self, bytes: &[u8]) -> Vec<Complex32> {
        match self {
            InputFormat::Cf32 => bytes
                .chunks_exact(8)
                .map(|b| {
                    Complex32::new(
                        f32::from_le_bytes([b[0], b[1], b[2], b[3]]),
                        f32::from_le_bytes([b[4], b[5], b[6], b[7]]),
                    )
                })
                .collect(),
            InputFormat::Ci16 => bytes
                .chunks_exact(4)
                .map(|b| {
                    Complex32::new(
                        i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0,
                        i16::from_le_bytes([b[2], b[3]]) as f32 / 32768.0,
                    )
                })
                .collect(),
        }
    }
}

pub struct TxOptions {
    pub input: PathBuf,
    pub format: InputFormat,
    pub output: Option<PathBuf>,
    pub device: String,
    pub center_freq_hz: u64,
    pub sample_rate: u32,
    pub if_gain: u32,
    pub rf_gain: u32,
    pub bias: bool,
    pub print_stats: bool,
}

/// Fill `buf` as far as the reader allows. Returns the byte count, 0 at EOF.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn open_engine(opts: &TxOptions, slot_size: usize) -> Result<Box<dyn TransferEngine>, String> {
    if let Some(ref path) = opts.output {
        let sink = FileSink::create(path, slot_size)?.with_sample_rate(opts.sample_rate);
        return Ok(Box::new(sink));
    }
    open_hackrf(opts)
}

#[cfg(feature = "hackrf")]
fn open_hackrf(opts: &TxOptions) -> Result<Box<dyn TransferEngine>, String> {
    use tx_sdr::hackrf::{HackrfSink, HackrfTxConfig};

    let config = HackrfTxConfig {
        sample_rate: opts.sample_rate,
        center_freq: opts.center_freq_hz,
        if_gain: opts.if_gain,
        rf_gain: opts.rf_gain,
        bias: opts.bias,
    };
    Ok(Box::new(HackrfSink::open(&opts.device, config)?))
}

#[cfg(not(feature = "hackrf"))]
fn open_hackrf(opts: &TxOptions) -> Result<Box<dyn TransferEngine>, String> {
    Err(format!(
        "cannot open '{}': built without HackRF support (use --output or --features hackrf)",
        opts.device
    ))
}

fn print_stats(label: &str, elapsed: f64, samples: u64, stats: &TxStatsSnapshot) {
    eprintln!(
        "{} ({:.1}s): samples: {} slots: {} underruns: {} deferred: {}",
        label, elapsed, samples, stats.slots_drained, stats.underruns, stats.deferred_pushes,
    );
}

/// Transmit an IQ file, end to end.
pub fn run_file(opts: &TxOptions, sink_config: SinkConfig) -> Result<(), String> {
    let engine = open_engine(opts, sink_config.slot_size)?;
    let mut sink = TxSink::new(sink_config, engine).map_err(|e| e.to_string())?;

    let file = File::open(&opts.input)
        .map_err(|e| format!("failed to open {}: {}", opts.input.display(), e))?;
    let mut reader = BufReader::with_capacity(1024 * 1024, file);
    let format = opts.format;
    let input_name = opts.input.display().to_string();

    let (tx, rx) = channel::bounded::<Vec<Complex32>>(16);

    // File reader in a separate thread
    let reader_thread = std::thread::spawn(move || -> Result<(), String> {
        let mut buf = vec![0u8; BLOCK_SIZE * format.bytes_per_sample()];
        loop {
            let n = read_full(&mut reader, &mut buf).map_err(|e| format!("read error: {}", e))?;
            if n == 0 {
                log::info!("end of file: {}", input_name);
                return Ok(());
            }
            if tx.send(format.decode(&buf[..n])).is_err() {
                return Ok(()); // receiver dropped
            }
        }
    });

    sink.start().map_err(|e| e.to_string())?;

    let mut total_samples: u64 = 0;
    let stats_start = Instant::now();
    let mut last_stats = Instant::now();

    let mut fed = Ok(());
    for block in rx.iter() {
        if let Err(e) = sink.work_all(&block) {
            fed = Err(e.to_string());
            break;
        }
        total_samples += block.len() as u64;

        // Print stats every 5 seconds
        if opts.print_stats && last_stats.elapsed().as_secs() >= 5 {
            print_stats(
                "tx",
                stats_start.elapsed().as_secs_f64(),
                total_samples,
                &sink.stats(),
            );
            last_stats = Instant::now();
        }
    }

    // Unblocks the reader if we bailed out early
    drop(rx);

    let stopped = sink.stop().map_err(|e| e.to_string());

    if opts.print_stats {
        print_stats(
            "done",
            stats_start.elapsed().as_secs_f64(),
            total_samples,
            &sink.stats(),
        );
    }

    // Wait for reader thread
    let read_result = reader_thread
        .join()
        .map_err(|_| "reader thread panicked".to_string())?;

    fed?;
    stopped?;
    read_result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_cf32() {
        let mut bytes = Vec::new();
        for v in [0.5f32, -0.25, 1.0, 0.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        // Trailing partial sample is dropped
        bytes.push(0xaa);

        let samples = InputFormat::Cf32.decode(&bytes);
        assert_eq!(samples, vec![Complex32::new(0.5, -0.25), Complex32::new(1.0, 0.0)]);
    }

    #[test]
    fn test_decode_ci16() {
        let mut bytes = Vec::new();
        for v in [16384i16, -32768, 0, 32767] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let samples = InputFormat::Ci16.decode(&bytes);
        assert_eq!(samples[0], Complex32::new(0.5, -1.0));
        assert_eq!(samples[1].re, 0.0);
        assert!((samples[1].im - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_read_full_handles_short_reads() {
        struct Trickle(Vec<u8>);
        impl Read for Trickle {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                if self.0.is_empty() || buf.is_empty() {
                    return Ok(0);
                }
                buf[0] = self.0.remove(0);
                Ok(1)
            }
        }

        let mut src = Trickle(vec![1, 2, 3, 4, 5]);
        let mut buf = [0u8; 4];
        assert_eq!(read_full(&mut src, &mut buf).unwrap(), 4);
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(read_full(&mut src, &mut buf).unwrap(), 1);
        assert_eq!(read_full(&mut src, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_file_round_trip_through_sink() {
        let dir = std::env::temp_dir().join(format!("hackrf-tx-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let input = dir.join("in.cf32");
        let output = dir.join("out.cs8");

        let samples: Vec<Complex32> = (0..100)
            .map(|i| Complex32::new(0.5, -0.5 + i as f32 * 0.001))
            .collect();
        let mut bytes = Vec::new();
        for s in &samples {
            bytes.extend_from_slice(&s.re.to_le_bytes());
            bytes.extend_from_slice(&s.im.to_le_bytes());
        }
        std::fs::write(&input, &bytes).unwrap();

        let opts = TxOptions {
            input: input.clone(),
            format: InputFormat::Cf32,
            output: Some(output.clone()),
            device: "hackrf".into(),
            center_freq_hz: 2_450_000_000,
            sample_rate: 1_000_000,
            if_gain: 16,
            rf_gain: 0,
            bias: false,
            print_stats: false,
        };
        let config = SinkConfig {
            buffer_count: 4,
            slot_size: 64,
            stop_timeout: None,
        };
        run_file(&opts, config).unwrap();

        let written = std::fs::read(&output).unwrap();
        assert_eq!(written.len() % 64, 0);
        let data: Vec<u8> = written
            .chunks(64)
            .filter(|slot| slot.iter().any(|&b| b != 0))
            .flatten()
            .copied()
            .collect();

        let mut expected = vec![0i8; 200];
        tx_dsp::Converter::scalar().convert(&samples, &mut expected);
        let expected: Vec<u8> = expected.into_iter().map(|b| b as u8).collect();
        // 100 samples fill three 32-sample slots and part of a fourth
        assert_eq!(&data[..200], &expected[..]);
        assert!(data[200..].iter().all(|&b| b == 0));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
