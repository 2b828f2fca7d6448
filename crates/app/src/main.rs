mod pipeline;

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use tx_sdr::sink::{DEFAULT_BUFFER_COUNT, DEFAULT_SLOT_SIZE};
use tx_sdr::SinkConfig;

use pipeline::{InputFormat, TxOptions};

#[derive(Parser, Debug)]
#[command(name = "hackrf-tx")]
#[command(about = "Transmit an IQ file through a HackRF")]
struct Cli {
    /// IQ file to transmit
    input: PathBuf,

    /// Sample format of the input: cf32, ci16
    #[arg(long, default_value = "cf32")]
    format: String,

    /// Write CS8 to this file instead of transmitting
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Device: hackrf or hackrf-SERIAL
    #[arg(short = 'd', long, default_value = "hackrf")]
    device: String,

    /// Center frequency in MHz
    #[arg(short = 'c', long, default_value = "2450")]
    freq: f64,

    /// Sample rate in samples per second
    #[arg(short = 'r', long, default_value = "8000000")]
    rate: u32,

    /// TX VGA (IF) gain in dB, 0-47
    #[arg(long, default_value = "16")]
    if_gain: u32,

    /// RF amp gain in dB, 0 or 14
    #[arg(long, default_value = "0")]
    rf_gain: u32,

    /// Enable antenna bias power
    #[arg(long)]
    bias: bool,

    /// Number of queued transfer buffers
    #[arg(short = 'b', long, default_value_t = DEFAULT_BUFFER_COUNT)]
    buffers: usize,

    /// Bytes per transfer buffer
    #[arg(long, default_value_t = DEFAULT_SLOT_SIZE)]
    slot_size: usize,

    /// Give up on stop after this many milliseconds (default: wait forever)
    #[arg(long)]
    stop_timeout_ms: Option<u64>,

    /// Verbose output
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Print statistics
    #[arg(long)]
    stats: bool,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if cli.verbose {
        log::info!("hackrf-tx starting");
        log::info!("center frequency: {} MHz", cli.freq);
        log::info!("sample rate: {} S/s", cli.rate);
    }

    let format = match cli.format.as_str() {
        "cf32" => InputFormat::Cf32,
        "ci16" => InputFormat::Ci16,
        other => {
            eprintln!("unknown sample format: {} (use cf32 or ci16)", other);
            std::process::exit(1);
        }
    };

    let sink_config = SinkConfig {
        buffer_count: cli.buffers,
        slot_size: cli.slot_size,
        stop_timeout: cli.stop_timeout_ms.map(Duration::from_millis),
    };

    let options = TxOptions {
        input: cli.input,
        format,
        output: cli.output,
        device: cli.device,
        center_freq_hz: (cli.freq * 1e6).round() as u64,
        sample_rate: cli.rate,
        if_gain: cli.if_gain,
        rf_gain: cli.rf_gain,
        bias: cli.bias,
        print_stats: cli.stats,
    };

    if let Err(e) = pipeline::run_file(&options, sink_config) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
