// Resource and layout inspection
//
// Builds a waveform on the simulated engine and prints the resource ranges
// the engine assigned plus the derived slot layout. Handy for sanity-checking
// how many control blocks and capture addresses a configuration consumes
// before committing to real hardware.

use bitbang_adc::{AdcModel, Mcp3202Input, SimEngine, WaveEngine, WaveLayout, WaveRequest};
use clap::Parser;

#[derive(Parser)]
#[command(name = "layout_probe")]
#[command(about = "Inspect the resource layout of a waveform configuration")]
struct Args {
    /// Reading slots in the circular wave
    #[arg(default_value_t = 250)]
    slots: u32,

    /// Microseconds between consecutive readings
    #[arg(default_value_t = 40)]
    repeat_micros: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let request = WaveRequest::new(
        AdcModel::mcp3202(Mcp3202Input::SingleCh0),
        &[17],
        args.slots,
        args.repeat_micros,
    )?;

    let mut engine = SimEngine::new();
    let handle = engine.build_waveform(
        &request.build_transactions(),
        request.trailing_delay_micros(),
    )?;
    let report = engine.resource_report(handle)?;

    println!(
        "# cb {}-{} capture {}-{} ncb={}",
        report.bot_cb, report.top_cb, report.bot_capture, report.top_capture, report.num_cb
    );

    let layout = WaveLayout::from_report(&report, request.slots, request.model.capture_bits);
    println!(
        "# {} slots, {} bits each, {:.2} cbs per reading",
        layout.slots(),
        layout.bits_per_reading(),
        layout.cbs_per_reading()
    );

    for slot in [0, 1, args.slots - 1] {
        println!(
            "# slot {:>4}: capture base {} (bits down to {})",
            slot,
            layout.slot_capture_base(slot),
            layout.capture_addr(slot, layout.bits_per_reading() - 1)
        );
    }

    engine.stop();
    Ok(())
}
