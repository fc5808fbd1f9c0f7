//! # bitbang-adc
//!
//! Continuous analog-to-digital sampling over a precisely-timed, repeating
//! bit-banged SPI waveform.
//!
//! The waveform itself is executed by an external, hardware-clocked
//! "waveform engine" (on a Raspberry Pi this would be pigpio's DMA raw-wave
//! machinery) behind the [`WaveEngine`] trait. This crate builds the
//! repeating SPI program, tracks which slot of the engine's circular capture
//! buffer is currently in flight, reassembles per-device readings from the
//! captured signal levels, and drains them fast enough that the wave never
//! overwrites an unread reading.
//!
//! ## Features
//!
//! - **Microsecond-accurate waveform programs**: one SPI transaction per
//!   reading slot, spaced by an exact repeat period
//! - **Multiple ADCs per transaction**: devices share clock, MOSI and select
//!   but each has its own data-out line, read simultaneously
//! - **Typestate pipeline**: build, arm, run; an armed wave cannot be
//!   drained and a running wave cannot be rebuilt
//! - **Lap accounting**: overwritten readings are detected and either
//!   counted or treated as fatal ([`LapPolicy`]), instead of silently lost
//! - **Deterministic simulation**: [`SimEngine`] executes the full pipeline
//!   in-process for tests and demos
//!
//! ## Reading an MCP3202 ring
//!
//! ```rust
//! use bitbang_adc::{
//!     AdcModel, Mcp3202Input, Sampler, SimEngine, TextStreamSink, WaveRequest,
//! };
//!
//! // 250 buffered readings, one every 40us, MISO on line 17.
//! let request = WaveRequest::new(
//!     AdcModel::mcp3202(Mcp3202Input::SingleCh0),
//!     &[17],
//!     250,
//!     40,
//! )?;
//!
//! let mut running = Sampler::build(SimEngine::new(), request)?.start()?;
//! let mut sink = TextStreamSink::new(Vec::new());
//! let stats = running.drain_until(1000, &mut sink)?;
//! println!("{} samples at {:.0}/s", stats.emitted, stats.throughput());
//! running.stop();
//! # Ok::<(), bitbang_adc::SamplerError>(())
//! ```
//!
//! ## Cancellation
//!
//! ```rust
//! use bitbang_adc::{
//!     AdcModel, CancelToken, Mcp3202Input, Sampler, SimEngine, TextStreamSink, WaveRequest,
//! };
//!
//! let request = WaveRequest::new(AdcModel::mcp3202(Mcp3202Input::SingleCh0), &[17], 250, 40)?;
//! let token = CancelToken::new();
//! token.cancel(); // e.g. from a signal handler thread
//!
//! let mut running = Sampler::build(SimEngine::new(), request)?
//!     .with_cancel_token(token)
//!     .start()?;
//! let stats = running.drain_until(u64::MAX, &mut TextStreamSink::new(std::io::sink()))?;
//! assert_eq!(stats.emitted, 0);
//! # Ok::<(), bitbang_adc::SamplerError>(())
//! ```
//!
//! ## Custom protocols
//!
//! The decode step is protocol-defined, not generic: a model names which
//! frame bits are captured and how the raw shift value is masked down to a
//! sample.
//!
//! ```rust
//! use bitbang_adc::AdcModel;
//!
//! // 16 captured bits, bottom 4 are don't-care, 12-bit samples.
//! let model = AdcModel {
//!     name: "padded",
//!     command: heapless::Vec::from_slice(&[0xC0, 0x00]).unwrap(),
//!     frame_bits: 18,
//!     capture_first_bit: 2,
//!     capture_bits: 16,
//!     trailing_pad: 4,
//!     value_bits: 12,
//! };
//! assert_eq!(model.decode(0b1010_1100_1111_0000), 0b1010_1100_1111);
//! ```

pub mod engine;
pub mod layout;
pub mod sampler;
pub mod sim_engine;
pub mod sink;
pub mod wave_builder;

// Re-export the main types for convenience
pub use engine::{EngineError, ResourceReport, SpiTransaction, WaveEngine, WaveHandle};

pub use layout::WaveLayout;

pub use sampler::{
    ArmedSampler, CancelToken, LapPolicy, RunStats, RunningSampler, Sampler, SamplerError,
};

pub use sim_engine::SimEngine;

pub use sink::{MicrosClock, Sample, SampleSink, TextStreamSink};

pub use wave_builder::{
    AdcModel, ClkPhase, ConfigError, Mcp3202Input, SpiTiming, WaveRequest, MAX_COMMAND_BYTES,
    MAX_DEVICES,
};
