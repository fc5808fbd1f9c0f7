use crate::engine::SpiTransaction;

/// Upper bound on simultaneously tracked ADCs.
pub const MAX_DEVICES: usize = 8;

/// Upper bound on command bytes driven out per transaction.
pub const MAX_COMMAND_BYTES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClkPhase {
    /// Sample on the first clock edge.
    FirstEdge,
    /// Sample on the second clock edge.
    SecondEdge,
}

/// Wiring and bit timing of the bit-banged SPI bus.
///
/// Constructed once at startup and passed by reference from then on; there
/// are no process-wide tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiTiming {
    pub clk_line: u8,
    pub mosi_line: u8,
    pub select_line: u8,
    /// Select resting level.
    pub select_idle_high: bool,
    /// Settle time after asserting select, in microseconds.
    pub select_settle_micros: u64,
    /// Clock resting level.
    pub clk_idle_high: bool,
    pub clk_phase: ClkPhase,
    /// Half of one clock period, in microseconds. Two edges per bit.
    pub clk_half_period_micros: u64,
}

impl Default for SpiTiming {
    /// The reference MCP3202 wiring: clock on line 2, MOSI on line 3,
    /// select on line 4 resting high, 1 us settle, clock resting low,
    /// sample on the first edge, 1 us half period (500 kbps).
    fn default() -> Self {
        Self {
            clk_line: 2,
            mosi_line: 3,
            select_line: 4,
            select_idle_high: true,
            select_settle_micros: 1,
            clk_idle_high: false,
            clk_phase: ClkPhase::FirstEdge,
            clk_half_period_micros: 1,
        }
    }
}

impl SpiTiming {
    /// Wall time one transaction of `frame_bits` occupies on the bus:
    /// select settle on each side plus two clock edges per bit.
    pub fn transaction_micros(&self, frame_bits: u16) -> u64 {
        2 * self.select_settle_micros
            + u64::from(frame_bits) * 2 * self.clk_half_period_micros
    }
}

/// Input selection for the MCP3202's two channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mcp3202Input {
    SingleCh0,
    SingleCh1,
    /// Differential, CH0 = IN+, CH1 = IN-.
    Differential,
    /// Differential, CH1 = IN+, CH0 = IN-.
    DifferentialSwapped,
}

impl Mcp3202Input {
    /// First command byte: start bit, single/differential select, channel
    /// select, then MSB-first ordering. The remaining frame is don't-care.
    pub fn command_byte(self) -> u8 {
        match self {
            Self::SingleCh0 => 0xC0,
            Self::SingleCh1 => 0xE0,
            Self::Differential => 0x80,
            Self::DifferentialSwapped => 0xA0,
        }
    }
}

/// Protocol description of one ADC model: what to send, which frame bits to
/// capture, and how to mask the raw shift value down to a sample.
///
/// The masking step is protocol-defined, not generic; a model that captures
/// trailing don't-care bits drops them here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdcModel {
    pub name: &'static str,
    pub command: heapless::Vec<u8, MAX_COMMAND_BYTES>,
    /// Total bits clocked per frame.
    pub frame_bits: u16,
    /// First captured bit position within the frame.
    pub capture_first_bit: u16,
    /// Captured bits per reading; one capture address each.
    pub capture_bits: u16,
    /// Trailing don't-care bits dropped by [`Self::decode`].
    pub trailing_pad: u16,
    /// Width of the decoded sample.
    pub value_bits: u16,
}

impl AdcModel {
    /// MCP3202: 12-bit two-channel ADC. The response starts at frame bit 6
    /// (null bit after start/select/mode), B11 down to B0, no padding.
    pub fn mcp3202(input: Mcp3202Input) -> Self {
        let mut command = heapless::Vec::new();
        // Two command bytes always fit.
        let _ = command.push(input.command_byte());
        let _ = command.push(0x00);
        Self {
            name: "MCP3202",
            command,
            frame_bits: 18,
            capture_first_bit: 6,
            capture_bits: 12,
            trailing_pad: 0,
            value_bits: 12,
        }
    }

    /// Last captured bit position within the frame (inclusive).
    pub fn capture_last_bit(&self) -> u16 {
        self.capture_first_bit + self.capture_bits - 1
    }

    /// Mask the raw shift value down to the true sample: drop the trailing
    /// pad bits, keep the top `value_bits`.
    pub fn decode(&self, raw: u16) -> u16 {
        let mask = ((1u32 << self.value_bits) - 1) as u16;
        (raw >> self.trailing_pad) & mask
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "repeat period of {repeat_micros}us does not cover one \
         {transaction_micros}us SPI transaction"
    )]
    RepeatTooShort {
        repeat_micros: u64,
        transaction_micros: u64,
    },

    #[error("at least one ADC data line must be tracked")]
    NoDevices,

    #[error("at most {MAX_DEVICES} ADC data lines can be tracked, got {0}")]
    TooManyDevices(usize),

    #[error("at least one reading slot is required")]
    NoSlots,

    #[error("decode keeps {kept} bits but only {captured} bits are captured")]
    DecodeWiderThanCapture { kept: u16, captured: u16 },

    #[error("must capture between 1 and 16 bits per reading, got {0}")]
    CaptureWidthOutOfRange(u16),

    #[error("capture window ends at frame bit {end} but the frame is only {frame_bits} bits")]
    CaptureOutsideFrame { end: u16, frame_bits: u16 },
}

/// A complete "read these ADCs every `repeat_micros` microseconds" request.
#[derive(Debug, Clone)]
pub struct WaveRequest {
    pub timing: SpiTiming,
    pub model: AdcModel,
    /// Lines carrying each tracked device's serial data out, in device order.
    pub miso_lines: heapless::Vec<u8, MAX_DEVICES>,
    /// Reading slots in the circular wave. Generally: as many as the engine
    /// will grant, to ride out scheduling hiccups on the consumer side.
    pub slots: u32,
    /// Period between consecutive readings, in microseconds.
    pub repeat_micros: u64,
}

impl WaveRequest {
    pub fn new(
        model: AdcModel,
        miso_lines: &[u8],
        slots: u32,
        repeat_micros: u64,
    ) -> Result<Self, ConfigError> {
        let lines = heapless::Vec::from_slice(miso_lines)
            .map_err(|()| ConfigError::TooManyDevices(miso_lines.len()))?;
        let request = Self {
            timing: SpiTiming::default(),
            model,
            miso_lines: lines,
            slots,
            repeat_micros,
        };
        request.validate()?;
        Ok(request)
    }

    pub fn with_timing(mut self, timing: SpiTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Check the timing invariant: the repeat period must exceed the time
    /// one full SPI transaction takes, or consecutive readings corrupt each
    /// other on the bus.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slots == 0 {
            return Err(ConfigError::NoSlots);
        }
        if self.miso_lines.is_empty() {
            return Err(ConfigError::NoDevices);
        }
        // Readings accumulate into a 16-bit shift register.
        if self.model.capture_bits == 0 || self.model.capture_bits > 16 {
            return Err(ConfigError::CaptureWidthOutOfRange(self.model.capture_bits));
        }
        let end = self.model.capture_first_bit + self.model.capture_bits;
        if end > self.model.frame_bits {
            return Err(ConfigError::CaptureOutsideFrame {
                end,
                frame_bits: self.model.frame_bits,
            });
        }
        let kept = self.model.trailing_pad + self.model.value_bits;
        if kept > self.model.capture_bits {
            return Err(ConfigError::DecodeWiderThanCapture {
                kept,
                captured: self.model.capture_bits,
            });
        }
        let transaction_micros = self.timing.transaction_micros(self.model.frame_bits);
        if self.repeat_micros <= transaction_micros {
            return Err(ConfigError::RepeatTooShort {
                repeat_micros: self.repeat_micros,
                transaction_micros,
            });
        }
        Ok(())
    }

    /// One transaction per reading slot, each offset `repeat_micros` from
    /// the previous.
    pub fn build_transactions(&self) -> Vec<SpiTransaction> {
        let mut offset = 0;
        let mut transactions = Vec::with_capacity(self.slots as usize);
        for _ in 0..self.slots {
            transactions.push(SpiTransaction {
                offset_micros: offset,
                timing: self.timing,
                command: self.model.command.clone(),
                frame_bits: self.model.frame_bits,
                capture_first_bit: self.model.capture_first_bit,
                capture_last_bit: self.model.capture_last_bit(),
            });
            offset += self.repeat_micros;
        }
        transactions
    }

    /// Delay forced after the last reading so the repeating cycle is exactly
    /// `slots * repeat_micros` long.
    pub fn trailing_delay_micros(&self) -> u64 {
        self.repeat_micros
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mcp3202_command_bytes() {
        assert_eq!(Mcp3202Input::SingleCh0.command_byte(), 0xC0);
        assert_eq!(Mcp3202Input::SingleCh1.command_byte(), 0xE0);
        assert_eq!(Mcp3202Input::Differential.command_byte(), 0x80);
        assert_eq!(Mcp3202Input::DifferentialSwapped.command_byte(), 0xA0);

        let model = AdcModel::mcp3202(Mcp3202Input::SingleCh0);
        assert_eq!(model.command.as_slice(), &[0xC0, 0x00]);
        assert_eq!(model.capture_last_bit(), 17);
    }

    #[test]
    fn test_mcp3202_decode_is_identity_over_12_bits() {
        let model = AdcModel::mcp3202(Mcp3202Input::SingleCh0);
        assert_eq!(model.decode(0x0FFF), 0x0FFF);
        assert_eq!(model.decode(0x0ACF), 0x0ACF);
    }

    #[test]
    fn test_padded_model_drops_trailing_bits() {
        // A 16-bit capture whose bottom 4 bits are don't-care.
        let model = AdcModel {
            name: "padded",
            command: heapless::Vec::from_slice(&[0xC0, 0x00]).unwrap(),
            frame_bits: 18,
            capture_first_bit: 2,
            capture_bits: 16,
            trailing_pad: 4,
            value_bits: 12,
        };
        assert_eq!(model.decode(0b1010_1100_1111_0000), 0b1010_1100_1111);
    }

    #[test]
    fn test_transaction_timing() {
        // 18 frame bits at 1us half period plus 1us settle per side.
        let timing = SpiTiming::default();
        assert_eq!(timing.transaction_micros(18), 38);
    }

    #[test]
    fn test_repeat_period_must_cover_transaction() {
        let model = AdcModel::mcp3202(Mcp3202Input::SingleCh0);
        let err = WaveRequest::new(model.clone(), &[17], 250, 38).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::RepeatTooShort {
                repeat_micros: 38,
                transaction_micros: 38,
            }
        ));

        assert!(WaveRequest::new(model, &[17], 250, 40).is_ok());
    }

    #[test]
    fn test_capture_window_must_fit_the_shift_register() {
        // Wider than the 16-bit accumulator: would corrupt extraction if
        // it ever got past validation.
        let mut model = AdcModel {
            name: "wide",
            command: heapless::Vec::from_slice(&[0xC0, 0x00]).unwrap(),
            frame_bits: 24,
            capture_first_bit: 2,
            capture_bits: 20,
            trailing_pad: 8,
            value_bits: 12,
        };
        assert!(matches!(
            WaveRequest::new(model.clone(), &[17], 4, 1000),
            Err(ConfigError::CaptureWidthOutOfRange(20))
        ));

        model.capture_bits = 0;
        assert!(matches!(
            WaveRequest::new(model.clone(), &[17], 4, 1000),
            Err(ConfigError::CaptureWidthOutOfRange(0))
        ));

        // Window sticking out past the end of the frame.
        model.capture_bits = 16;
        model.capture_first_bit = 10;
        assert!(matches!(
            WaveRequest::new(model, &[17], 4, 1000),
            Err(ConfigError::CaptureOutsideFrame {
                end: 26,
                frame_bits: 24,
            })
        ));
    }

    #[test]
    fn test_request_rejects_empty_and_oversized_device_sets() {
        let model = AdcModel::mcp3202(Mcp3202Input::SingleCh0);
        assert!(matches!(
            WaveRequest::new(model.clone(), &[], 250, 40),
            Err(ConfigError::NoDevices)
        ));
        let too_many = [1u8; MAX_DEVICES + 1];
        assert!(matches!(
            WaveRequest::new(model, &too_many, 250, 40),
            Err(ConfigError::TooManyDevices(9))
        ));
    }

    #[test]
    fn test_transactions_are_spaced_by_repeat_period() {
        let model = AdcModel::mcp3202(Mcp3202Input::SingleCh0);
        let request = WaveRequest::new(model, &[17], 4, 40).unwrap();
        let transactions = request.build_transactions();
        assert_eq!(transactions.len(), 4);
        let offsets: Vec<u64> = transactions.iter().map(|t| t.offset_micros).collect();
        assert_eq!(offsets, vec![0, 40, 80, 120]);
        assert_eq!(transactions[0].capture_bits(), 12);
        assert_eq!(request.trailing_delay_micros(), 40);
    }
}
