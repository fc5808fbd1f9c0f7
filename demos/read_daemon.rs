// Continuous ADC read daemon
//
// The classic acquisition surface: three positional numeric parameters,
// records streamed to stderr as `<micros>,<value>;`, a throughput summary
// at the end. Runs against the deterministic simulated engine with a
// synthetic ramp loaded into the capture buffer.

use bitbang_adc::{AdcModel, Mcp3202Input, Sampler, SimEngine, TextStreamSink, WaveRequest};
use clap::Parser;

/// MISO line of the single simulated MCP3202.
const MISO: u8 = 17;

/// Reading slots in the circular wave. Generally make this as large as the
/// engine will grant.
const BUFFER: u32 = 250;

#[derive(Parser)]
#[command(name = "read_daemon")]
#[command(version = "1.0")]
#[command(about = "Continuously sample an MCP3202 over bit-banged SPI")]
#[command(
    long_about = "Builds a repeating bit-banged SPI waveform, lets the engine execute it, \
and drains readings from the capture buffer in real time. Records go to stderr as \
`<micros>,<value>;` followed by a throughput summary."
)]
struct Args {
    /// Microseconds between consecutive readings
    #[arg(default_value_t = 40)]
    repeat_micros: u64,

    /// Number of samples to take
    #[arg(default_value_t = 10_000)]
    samples: u64,

    /// Nominal sample-set frequency in Hz (informational only)
    #[arg(default_value_t = 30)]
    sample_set_frequency: u32,

    /// Show debug information and detailed logs
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::init();
    }

    eprintln!(
        "REPEAT_MICROS {} SAMPLES {} SAMPLE_SET_FREQUENCY {}",
        args.repeat_micros, args.samples, args.sample_set_frequency
    );

    let request = WaveRequest::new(
        AdcModel::mcp3202(Mcp3202Input::SingleCh0),
        &[MISO],
        BUFFER,
        args.repeat_micros,
    )?;

    let mut armed = Sampler::build(SimEngine::new(), request)?;
    // Synthetic ramp standing in for a real analog input.
    for slot in 0..BUFFER {
        armed
            .engine_mut()
            .load_slot_value(slot, MISO, ((slot * 16) % 4096) as u16);
    }

    let mut running = armed.start()?;
    let mut sink = TextStreamSink::new(std::io::stderr().lock());
    let stats = running.drain_until(args.samples, &mut sink)?;
    running.stop();

    println!(
        "# {} samples in {:.1} seconds ({:.0}/s), {} dropped",
        stats.emitted,
        stats.elapsed_secs,
        stats.throughput(),
        stats.dropped
    );
    Ok(())
}
