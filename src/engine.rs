use crate::wave_builder::{SpiTiming, MAX_COMMAND_BYTES};

/// Identifier for a waveform registered with an engine.
///
/// Handles are only meaningful for the engine that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaveHandle(pub(crate) u32);

/// Resource ranges an engine assigned to a built waveform.
///
/// Control blocks are allocated bottom-up from the engine's pool, capture
/// addresses top-down. Both ranges are fixed for the lifetime of the wave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceReport {
    /// First control block of the wave (inclusive).
    pub bot_cb: u32,
    /// Last control block of the wave (inclusive).
    pub top_cb: u32,
    /// Total control blocks consumed by the wave.
    pub num_cb: u32,
    /// Lowest capture address used by the wave (inclusive).
    pub bot_capture: u32,
    /// Capture addresses run downward starting just below this address.
    pub top_capture: u32,
}

/// One bit-banged SPI transaction within the repeating waveform.
///
/// The command bytes are driven out on MOSI while the same clock edges
/// capture the device's response full-duplex; the captured bit range is
/// stored one signal-level snapshot per capture address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpiTransaction {
    /// Offset of this transaction from the start of the wave, in microseconds.
    pub offset_micros: u64,
    pub timing: SpiTiming,
    pub command: heapless::Vec<u8, MAX_COMMAND_BYTES>,
    /// Total bits clocked per frame.
    pub frame_bits: u16,
    /// First captured bit position within the frame (inclusive).
    pub capture_first_bit: u16,
    /// Last captured bit position within the frame (inclusive).
    pub capture_last_bit: u16,
}

impl SpiTransaction {
    /// Number of capture addresses this transaction consumes.
    pub fn capture_bits(&self) -> u16 {
        self.capture_last_bit - self.capture_first_bit + 1
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("waveform needs {needed} control blocks but only {available} are available")]
    ControlBlocksExhausted { needed: u32, available: u32 },

    #[error("waveform needs {needed} capture addresses but only {available} are available")]
    CaptureExhausted { needed: u32, available: u32 },

    #[error("waveform engine is not initialized")]
    NotInitialized,

    #[error("unknown waveform handle")]
    UnknownHandle,

    #[error("no waveform is executing")]
    NotRunning,
}

/// The waveform-execution substrate the acquisition core runs against.
///
/// An engine turns a transaction sequence into a hardware-clocked repeating
/// waveform, exposes where its execution cursor currently is, and lets the
/// consumer read back captured signal levels. The core assumes nothing about
/// an engine beyond this contract; [`crate::SimEngine`] is a deterministic
/// in-process implementation, a pigpio-backed one would drive real GPIOs.
pub trait WaveEngine {
    /// Register a waveform made of `transactions` followed by a trailing
    /// delay of `trailing_delay_micros`, so that the total cycle time is
    /// exact when the wave repeats. Nothing executes yet.
    fn build_waveform(
        &mut self,
        transactions: &[SpiTransaction],
        trailing_delay_micros: u64,
    ) -> Result<WaveHandle, EngineError>;

    /// Resource ranges assigned to a built waveform.
    fn resource_report(&self, handle: WaveHandle) -> Result<ResourceReport, EngineError>;

    /// Begin infinite repeated execution of the waveform.
    fn start_repeating(&mut self, handle: WaveHandle) -> Result<(), EngineError>;

    /// The control block currently executing. Monotonically increasing
    /// within a lap, wrapping back to the bottom of the wave's range at the
    /// end of each lap. Racy by nature: the hardware may have advanced by
    /// the time the caller acts on the value.
    fn current_control_block(&self) -> u32;

    /// Raw signal levels captured at a capture address, one bit per line id.
    fn capture_level_at(&self, addr: u32) -> u32;

    /// Halt execution and release the wave's hardware resources.
    fn stop(&mut self);
}
