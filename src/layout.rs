use crate::engine::ResourceReport;

/// Mapping from logical reading slots to the hardware resources holding
/// their bits, derived once from a built wave's [`ResourceReport`] and
/// immutable afterwards.
///
/// Control blocks are handed out bottom-up, capture addresses top-down, so
/// slot `s` occupies `cbs_per_reading` control blocks starting at
/// `bot_cb + s * cbs_per_reading` and `bits_per_reading` capture addresses
/// running downward from `top_capture - s * bits_per_reading - 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaveLayout {
    bot_cb: u32,
    top_capture: u32,
    slots: u32,
    bits_per_reading: u16,
    cbs_per_reading: f64,
}

impl WaveLayout {
    pub fn from_report(report: &ResourceReport, slots: u32, bits_per_reading: u16) -> Self {
        Self {
            bot_cb: report.bot_cb,
            top_capture: report.top_capture,
            slots,
            bits_per_reading,
            // Real-valued: readings need not align to a control block
            // boundary, though they are all the same size.
            cbs_per_reading: f64::from(report.num_cb) / f64::from(slots),
        }
    }

    pub fn slots(&self) -> u32 {
        self.slots
    }

    pub fn bits_per_reading(&self) -> u16 {
        self.bits_per_reading
    }

    pub fn cbs_per_reading(&self) -> f64 {
        self.cbs_per_reading
    }

    /// Capture address of slot `s`'s most significant captured bit; bit `i`
    /// (counted MSB-first) lives at `slot_capture_base(s) - i`.
    pub fn slot_capture_base(&self, slot: u32) -> u32 {
        self.top_capture - (slot % self.slots) * u32::from(self.bits_per_reading) - 1
    }

    /// Capture address of bit `i` (MSB-first) of slot `s`.
    pub fn capture_addr(&self, slot: u32, bit: u16) -> u32 {
        self.slot_capture_base(slot) - u32::from(bit)
    }

    /// Logical slot a control-block cursor falls into.
    pub fn slot_of_cursor(&self, cursor: u32) -> u32 {
        let rel = f64::from(cursor.saturating_sub(self.bot_cb));
        let slot = (rel / self.cbs_per_reading) as u32;
        // Float edge effects at the very top of a lap must not
        // produce an out-of-range slot.
        slot.min(self.slots.saturating_sub(1))
    }
}
