use crate::engine::{EngineError, ResourceReport, SpiTransaction, WaveEngine, WaveHandle};
use std::cell::Cell;
use std::collections::HashMap;

/// Control blocks the simulator charges per transaction: select assert and
/// release, one delay block, and two clock edges per frame bit.
fn cbs_per_transaction(frame_bits: u16) -> u32 {
    3 + 2 * u32::from(frame_bits)
}

#[derive(Debug, Clone, Copy)]
struct SimWave {
    handle: WaveHandle,
    report: ResourceReport,
    cbs_per_tx: u32,
    bits_per_tx: u16,
    slots: u32,
}

/// Deterministic in-process [`WaveEngine`].
///
/// Models the engine's resource accounting (control blocks bottom-up,
/// capture addresses top-down, finite pools) and replaces the hardware
/// clock with a scripted cursor that advances a fixed number of control
/// blocks per [`WaveEngine::current_control_block`] query. Capture levels
/// are injected with [`Self::load_slot_value`], which lets tests and demos
/// round-trip known readings through the extraction pipeline.
#[derive(Debug)]
pub struct SimEngine {
    cb_pool: u32,
    capture_pool: u32,
    next_handle: u32,
    wave: Option<SimWave>,
    running: bool,
    ticks: Cell<u64>,
    cursor_step: u32,
    levels: HashMap<u32, u32>,
}

impl SimEngine {
    pub fn new() -> Self {
        Self::with_capacity(25_000, 4096)
    }

    /// A simulator with explicit resource pool sizes, for exercising
    /// capacity failures.
    pub fn with_capacity(cb_pool: u32, capture_pool: u32) -> Self {
        Self {
            cb_pool,
            capture_pool,
            next_handle: 0,
            wave: None,
            running: false,
            ticks: Cell::new(0),
            cursor_step: 0,
            levels: HashMap::new(),
        }
    }

    /// Control blocks the cursor advances per query. Defaults to one
    /// transaction's worth after a build, i.e. one reading per poll.
    pub fn set_cursor_step(&mut self, cbs: u32) {
        self.cursor_step = cbs;
    }

    /// Advance the cursor by hand, in control blocks.
    pub fn advance(&mut self, cbs: u32) {
        self.ticks.set(self.ticks.get() + u64::from(cbs));
    }

    /// Encode a raw reading into the capture addresses of `slot` as seen on
    /// `line`, MSB first, the way the wave would have captured it.
    pub fn load_slot_value(&mut self, slot: u32, line: u8, raw: u16) {
        let Some(wave) = self.wave else { return };
        let bits = wave.bits_per_tx;
        let base = wave.report.top_capture - (slot % wave.slots) * u32::from(bits) - 1;
        for i in 0..bits {
            let addr = base - u32::from(i);
            let level = self.levels.entry(addr).or_insert(0);
            if (raw >> (bits - 1 - i)) & 1 == 1 {
                *level |= 1 << line;
            } else {
                *level &= !(1 << line);
            }
        }
    }
}

impl Default for SimEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl WaveEngine for SimEngine {
    fn build_waveform(
        &mut self,
        transactions: &[SpiTransaction],
        _trailing_delay_micros: u64,
    ) -> Result<WaveHandle, EngineError> {
        let Some(first) = transactions.first() else {
            return Err(EngineError::NotInitialized);
        };
        let slots = transactions.len() as u32;
        let cbs_per_tx = cbs_per_transaction(first.frame_bits);
        let num_cb = slots * cbs_per_tx;
        if num_cb > self.cb_pool {
            return Err(EngineError::ControlBlocksExhausted {
                needed: num_cb,
                available: self.cb_pool,
            });
        }
        let bits_per_tx = first.capture_bits();
        let num_capture = slots * u32::from(bits_per_tx);
        if num_capture > self.capture_pool {
            return Err(EngineError::CaptureExhausted {
                needed: num_capture,
                available: self.capture_pool,
            });
        }

        let handle = WaveHandle(self.next_handle);
        self.next_handle += 1;
        let bot_cb = 128;
        let report = ResourceReport {
            bot_cb,
            top_cb: bot_cb + num_cb - 1,
            num_cb,
            bot_capture: self.capture_pool - num_capture,
            top_capture: self.capture_pool,
        };
        log::debug!(
            "sim wave {:?}: cb {}..{} ({} total), capture {}..{}",
            handle,
            report.bot_cb,
            report.top_cb,
            report.num_cb,
            report.bot_capture,
            report.top_capture
        );
        self.wave = Some(SimWave {
            handle,
            report,
            cbs_per_tx,
            bits_per_tx,
            slots,
        });
        self.running = false;
        self.ticks.set(0);
        self.cursor_step = cbs_per_tx;
        self.levels.clear();
        Ok(handle)
    }

    fn resource_report(&self, handle: WaveHandle) -> Result<ResourceReport, EngineError> {
        match self.wave {
            Some(wave) if wave.handle == handle => Ok(wave.report),
            Some(_) => Err(EngineError::UnknownHandle),
            None => Err(EngineError::NotInitialized),
        }
    }

    fn start_repeating(&mut self, handle: WaveHandle) -> Result<(), EngineError> {
        match self.wave {
            Some(wave) if wave.handle == handle => {
                self.running = true;
                self.ticks.set(0);
                log::debug!("sim wave {handle:?} repeating");
                Ok(())
            }
            Some(_) => Err(EngineError::UnknownHandle),
            None => Err(EngineError::NotInitialized),
        }
    }

    fn current_control_block(&self) -> u32 {
        let Some(wave) = self.wave else { return 0 };
        let t = self.ticks.get();
        if self.running {
            self.ticks.set(t + u64::from(self.cursor_step));
        }
        wave.report.bot_cb + (t % u64::from(wave.report.num_cb)) as u32
    }

    fn capture_level_at(&self, addr: u32) -> u32 {
        self.levels.get(&addr).copied().unwrap_or(0)
    }

    fn stop(&mut self) {
        if self.running {
            log::debug!("sim engine stopped");
        }
        self.running = false;
    }
}
