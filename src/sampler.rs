use crate::engine::{EngineError, WaveEngine, WaveHandle};
use crate::layout::WaveLayout;
use crate::sink::{MicrosClock, Sample, SampleSink};
use crate::wave_builder::{AdcModel, ConfigError, WaveRequest, MAX_DEVICES};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum SamplerError {
    #[error("invalid acquisition configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("waveform engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("waveform lapped the drain loop, {dropped} readings overwritten before they were read")]
    DataLoss { dropped: u64 },

    #[error("output sink error: {0}")]
    Sink(#[from] std::io::Error),
}

/// What to do when the hardware gets a full buffer ahead of the drain loop
/// and starts overwriting unread readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LapPolicy {
    /// Skip past the overwritten readings, count them, keep going.
    #[default]
    Skip,
    /// Abort the run with [`SamplerError::DataLoss`].
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunStats {
    /// Records emitted to the sink.
    pub emitted: u64,
    /// Readings lost to lapping (always 0 under [`LapPolicy::Fail`]).
    pub dropped: u64,
    /// Producer laps observed over the run.
    pub laps: u64,
    pub elapsed_secs: f64,
}

impl RunStats {
    /// Achieved drain rate in records per second.
    pub fn throughput(&self) -> f64 {
        if self.elapsed_secs > 0.0 {
            self.emitted as f64 / self.elapsed_secs
        } else {
            0.0
        }
    }
}

/// Cooperative stop flag checked once per poll iteration.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Entry point of the acquisition pipeline.
pub struct Sampler;

impl Sampler {
    /// Validate the request, register the repeating waveform with the
    /// engine and derive its layout. Nothing executes yet.
    pub fn build<E: WaveEngine>(
        mut engine: E,
        request: WaveRequest,
    ) -> Result<ArmedSampler<E>, SamplerError> {
        request.validate()?;
        let transactions = request.build_transactions();
        let handle = match engine.build_waveform(&transactions, request.trailing_delay_micros()) {
            Ok(handle) => handle,
            Err(e) => {
                engine.stop();
                return Err(e.into());
            }
        };
        let report = match engine.resource_report(handle) {
            Ok(report) => report,
            Err(e) => {
                engine.stop();
                return Err(e.into());
            }
        };
        let layout = WaveLayout::from_report(&report, request.slots, request.model.capture_bits);
        log::debug!(
            "wave armed: cb {}..{} ({} total, {:.2} per reading), capture below {}",
            report.bot_cb,
            report.top_cb,
            report.num_cb,
            layout.cbs_per_reading(),
            report.top_capture
        );
        Ok(ArmedSampler {
            engine,
            handle,
            layout,
            request,
            lap_policy: LapPolicy::default(),
            cancel: None,
        })
    }
}

/// A built waveform that has not started executing.
pub struct ArmedSampler<E: WaveEngine> {
    engine: E,
    handle: WaveHandle,
    layout: WaveLayout,
    request: WaveRequest,
    lap_policy: LapPolicy,
    cancel: Option<CancelToken>,
}

impl<E: WaveEngine> ArmedSampler<E> {
    pub fn with_lap_policy(mut self, policy: LapPolicy) -> Self {
        self.lap_policy = policy;
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn layout(&self) -> &WaveLayout {
        &self.layout
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Begin infinite repeated execution.
    pub fn start(mut self) -> Result<RunningSampler<E>, SamplerError> {
        if let Err(e) = self.engine.start_repeating(self.handle) {
            self.engine.stop();
            return Err(e.into());
        }
        log::debug!(
            "wave repeating, {} slots every {}us",
            self.request.slots,
            self.request.repeat_micros
        );
        Ok(RunningSampler {
            engine: self.engine,
            layout: self.layout,
            model: self.request.model,
            miso_lines: self.request.miso_lines,
            repeat_micros: self.request.repeat_micros,
            clock: MicrosClock::start(),
            started: Instant::now(),
            lap_policy: self.lap_policy,
            cancel: self.cancel,
            last_seen_slot: 0,
            wrap_laps: 0,
            in_flight_abs: 0,
            drained_abs: 0,
            emitted: 0,
            dropped: 0,
        })
    }

    /// Release the wave's resources without ever starting it.
    pub fn teardown(mut self) {
        self.engine.stop();
    }
}

/// An executing waveform being drained.
///
/// The hardware is the producer and cannot be slowed down or signaled; the
/// only shared state it exposes is the execution cursor. Everything mutable
/// on the consumer side lives here and is touched by this thread alone.
pub struct RunningSampler<E: WaveEngine> {
    engine: E,
    layout: WaveLayout,
    model: AdcModel,
    miso_lines: heapless::Vec<u8, MAX_DEVICES>,
    repeat_micros: u64,
    clock: MicrosClock,
    started: Instant,
    lap_policy: LapPolicy,
    cancel: Option<CancelToken>,
    last_seen_slot: u32,
    wrap_laps: u64,
    /// Highest absolute reading index observed in flight.
    in_flight_abs: u64,
    /// Absolute index of the next reading to drain.
    drained_abs: u64,
    emitted: u64,
    dropped: u64,
}

impl<E: WaveEngine> RunningSampler<E> {
    /// The reading slot currently being produced by the hardware.
    ///
    /// A lower bound only: the hardware may advance between the query and
    /// its use. Every slot strictly before it (in cyclic order, within one
    /// lap) has completed; the returned slot itself must not be read.
    pub fn current_slot(&self) -> u32 {
        self.layout.slot_of_cursor(self.engine.current_control_block())
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Absolute (lap-unfolded) index of the reading in flight.
    ///
    /// Cursor wraps give an exact lap count while polls happen at least
    /// once per lap. Across longer gaps the wrap counter is blind, so the
    /// repeat period provides an independent floor on producer progress;
    /// whichever estimate is larger wins.
    fn observe(&mut self) -> u64 {
        let slot = self.current_slot();
        if slot < self.last_seen_slot {
            self.wrap_laps += 1;
        }
        self.last_seen_slot = slot;

        let slots = u64::from(self.layout.slots());
        let elapsed_readings =
            self.started.elapsed().as_micros() as u64 / self.repeat_micros;
        let time_laps = elapsed_readings.saturating_sub(u64::from(slot)) / slots;

        let laps = self.wrap_laps.max(time_laps);
        self.in_flight_abs = self.in_flight_abs.max(laps * slots + u64::from(slot));
        self.in_flight_abs
    }

    /// Raw shift values (framing bits included) for every tracked device at
    /// a completed slot. Read-only with respect to the engine.
    pub fn extract_raw(&self, slot: u32) -> heapless::Vec<u16, MAX_DEVICES> {
        extract_slot(&self.engine, &self.layout, slot, &self.miso_lines)
    }

    /// Tight busy-poll drain: repeatedly advance from the last drained
    /// reading up to (but not including) the reading in flight, decoding,
    /// timestamping and emitting each one, until `target` records have been
    /// emitted in total.
    ///
    /// No blocking and no sleeps: the producer runs on an independent clock
    /// with no notify primitive, so waiting is spinning on the cursor. The
    /// very first poll may already find several completed slots pending;
    /// they are drained in order. If the producer ever gets a whole buffer
    /// ahead, the overwritten readings are handled per [`LapPolicy`].
    pub fn drain_until<S: SampleSink>(
        &mut self,
        target: u64,
        sink: &mut S,
    ) -> Result<RunStats, SamplerError> {
        #[cfg(feature = "cpu-profiling")]
        let _span = tracy_client::span!("drain_until");

        sink.begin().map_err(|e| self.fail(e))?;

        let slots = u64::from(self.layout.slots());
        while self.emitted < target {
            if let Some(token) = &self.cancel {
                if token.is_cancelled() {
                    log::info!("drain cancelled after {} records", self.emitted);
                    break;
                }
            }

            let in_flight = self.observe();

            if in_flight - self.drained_abs >= slots {
                // The reading we were about to drain is being overwritten.
                let oldest_safe = in_flight - slots + 1;
                let lost = oldest_safe - self.drained_abs;
                match self.lap_policy {
                    LapPolicy::Fail => {
                        self.engine.stop();
                        return Err(SamplerError::DataLoss { dropped: lost });
                    }
                    LapPolicy::Skip => {
                        log::warn!("drain lapped by the waveform, skipping {lost} overwritten readings");
                        self.dropped += lost;
                        self.drained_abs = oldest_safe;
                    }
                }
            }

            while self.drained_abs < in_flight && self.emitted < target {
                let slot = (self.drained_abs % slots) as u32;
                let raw = self.extract_raw(slot);
                for (device, shift_value) in raw.iter().enumerate() {
                    if self.emitted >= target {
                        break;
                    }
                    let sample = Sample {
                        micros: self.clock.now_micros(),
                        value: self.model.decode(*shift_value),
                        device: device as u8,
                        slot,
                    };
                    sink.emit(&sample).map_err(|e| self.fail(e))?;
                    self.emitted += 1;
                }
                self.drained_abs += 1;
            }
        }

        let stats = self.stats();
        sink.finish(&stats).map_err(|e| self.fail(e))?;
        Ok(stats)
    }

    fn fail(&mut self, e: std::io::Error) -> SamplerError {
        self.engine.stop();
        SamplerError::Sink(e)
    }

    pub fn stats(&self) -> RunStats {
        RunStats {
            emitted: self.emitted,
            dropped: self.dropped,
            laps: self.wrap_laps,
            elapsed_secs: self.started.elapsed().as_secs_f64(),
        }
    }

    /// Halt the waveform, release its resources and report the run.
    pub fn stop(mut self) -> RunStats {
        self.engine.stop();
        let stats = self.stats();
        log::debug!(
            "run stopped: {} records, {} dropped, {:.0}/s",
            stats.emitted,
            stats.dropped,
            stats.throughput()
        );
        stats
    }
}

/// Reassemble one raw shift value per device from the captured levels of a
/// completed slot, most significant captured bit first.
fn extract_slot<E: WaveEngine>(
    engine: &E,
    layout: &WaveLayout,
    slot: u32,
    miso_lines: &[u8],
) -> heapless::Vec<u16, MAX_DEVICES> {
    let mut raw: heapless::Vec<u16, MAX_DEVICES> = heapless::Vec::new();
    for _ in miso_lines {
        // Device count is bounded by construction.
        let _ = raw.push(0);
    }

    let bits = layout.bits_per_reading();
    let base = layout.slot_capture_base(slot);
    for i in 0..bits {
        let level = engine.capture_level_at(base - u32::from(i));
        for (accum, line) in raw.iter_mut().zip(miso_lines) {
            if level & (1u32 << u32::from(*line)) != 0 {
                *accum |= 1 << (bits - 1 - i);
            }
        }
    }
    raw
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim_engine::SimEngine;
    use crate::wave_builder::Mcp3202Input;
    use std::io;
    use std::time::Duration;

    /// Repeat period long enough that the time-based lap floor can never
    /// trip during a test run.
    const SLOW_REPEAT: u64 = 100_000_000;

    #[derive(Default)]
    struct RecordingSink {
        samples: Vec<Sample>,
        finished: Option<RunStats>,
    }

    impl SampleSink for RecordingSink {
        fn emit(&mut self, sample: &Sample) -> io::Result<()> {
            self.samples.push(*sample);
            Ok(())
        }

        fn finish(&mut self, stats: &RunStats) -> io::Result<()> {
            self.finished = Some(*stats);
            Ok(())
        }
    }

    fn armed_ring_of_four(values: [u16; 4]) -> ArmedSampler<SimEngine> {
        let request = WaveRequest::new(
            AdcModel::mcp3202(Mcp3202Input::SingleCh0),
            &[17],
            4,
            SLOW_REPEAT,
        )
        .unwrap();
        let mut armed = Sampler::build(SimEngine::new(), request).unwrap();
        for (slot, value) in values.into_iter().enumerate() {
            armed.engine_mut().load_slot_value(slot as u32, 17, value);
        }
        armed
    }

    #[test]
    fn test_ring_of_four_drains_in_slot_order() {
        let mut running = armed_ring_of_four([100, 200, 300, 400]).start().unwrap();
        let mut sink = RecordingSink::default();

        let stats = running.drain_until(6, &mut sink).unwrap();
        assert_eq!(stats.emitted, 6);
        assert_eq!(stats.dropped, 0);

        let values: Vec<u16> = sink.samples.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![100, 200, 300, 400, 100, 200]);
        let slots: Vec<u32> = sink.samples.iter().map(|s| s.slot).collect();
        assert_eq!(slots, vec![0, 1, 2, 3, 0, 1]);

        let stamps: Vec<u64> = sink.samples.iter().map(|s| s.micros).collect();
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));

        running.stop();
    }

    #[test]
    fn test_target_count_is_exact() {
        let mut running = armed_ring_of_four([1, 2, 3, 4]).start().unwrap();
        let mut sink = RecordingSink::default();
        let stats = running.drain_until(5, &mut sink).unwrap();
        assert_eq!(stats.emitted, 5);
        assert_eq!(sink.samples.len(), 5);
        assert_eq!(sink.finished.unwrap().emitted, 5);
    }

    #[test]
    fn test_extraction_round_trips_through_protocol_masking() {
        // 16 captured bits with 4 trailing don't-cares, as on devices that
        // clock out padding after B0.
        let model = AdcModel {
            name: "padded",
            command: heapless::Vec::from_slice(&[0xC0, 0x00]).unwrap(),
            frame_bits: 18,
            capture_first_bit: 2,
            capture_bits: 16,
            trailing_pad: 4,
            value_bits: 12,
        };
        let request = WaveRequest::new(model, &[17], 4, SLOW_REPEAT).unwrap();
        let mut armed = Sampler::build(SimEngine::new(), request).unwrap();
        armed
            .engine_mut()
            .load_slot_value(0, 17, 0b1010_1100_1111_0000);
        let running = armed.start().unwrap();

        let raw = running.extract_raw(0);
        assert_eq!(raw.as_slice(), &[0b1010_1100_1111_0000]);

        let mut running = running;
        let mut sink = RecordingSink::default();
        // First poll reports slot 0 in flight; the second frees it.
        running.drain_until(1, &mut sink).unwrap();
        assert_eq!(sink.samples[0].value, 0b1010_1100_1111);
        running.stop();
    }

    #[test]
    fn test_two_devices_drain_in_device_order() {
        let request = WaveRequest::new(
            AdcModel::mcp3202(Mcp3202Input::SingleCh0),
            &[17, 22],
            4,
            SLOW_REPEAT,
        )
        .unwrap();
        let mut armed = Sampler::build(SimEngine::new(), request).unwrap();
        for slot in 0..4u32 {
            armed.engine_mut().load_slot_value(slot, 17, 1000 + slot as u16);
            armed.engine_mut().load_slot_value(slot, 22, 2000 + slot as u16);
        }
        let mut running = armed.start().unwrap();
        let mut sink = RecordingSink::default();
        running.drain_until(4, &mut sink).unwrap();

        let got: Vec<(u8, u16)> = sink.samples.iter().map(|s| (s.device, s.value)).collect();
        assert_eq!(got, vec![(0, 1000), (1, 2000), (0, 1001), (1, 2001)]);
        running.stop();
    }

    #[test]
    fn test_lap_policy_fail_raises_data_loss() {
        let request = WaveRequest::new(
            AdcModel::mcp3202(Mcp3202Input::SingleCh0),
            &[17],
            4,
            50,
        )
        .unwrap();
        let running = Sampler::build(SimEngine::new(), request)
            .unwrap()
            .with_lap_policy(LapPolicy::Fail)
            .start()
            .unwrap();

        // Four slots at 50us repeat is one lap per 200us; by the time the
        // first poll happens the producer is many laps ahead.
        std::thread::sleep(Duration::from_millis(5));

        let mut running = running;
        let mut sink = RecordingSink::default();
        let err = running.drain_until(1, &mut sink).unwrap_err();
        assert!(matches!(err, SamplerError::DataLoss { dropped } if dropped > 0));
    }

    #[test]
    fn test_lap_policy_skip_counts_dropped_and_recovers() {
        let request = WaveRequest::new(
            AdcModel::mcp3202(Mcp3202Input::SingleCh0),
            &[17],
            4,
            50,
        )
        .unwrap();
        let mut armed = Sampler::build(SimEngine::new(), request).unwrap();
        for slot in 0..4u32 {
            armed.engine_mut().load_slot_value(slot, 17, 7);
        }
        let mut running = armed.start().unwrap();

        std::thread::sleep(Duration::from_millis(5));

        let mut sink = RecordingSink::default();
        let stats = running.drain_until(4, &mut sink).unwrap();
        assert_eq!(stats.emitted, 4);
        assert!(stats.dropped > 0);
        assert!(sink.samples.iter().all(|s| s.value == 7));
        running.stop();
    }

    #[test]
    fn test_cancel_token_stops_the_drain() {
        let token = CancelToken::new();
        token.cancel();
        let mut running = armed_ring_of_four([1, 2, 3, 4])
            .with_cancel_token(token)
            .start()
            .unwrap();
        let mut sink = RecordingSink::default();
        let stats = running.drain_until(100, &mut sink).unwrap();
        assert_eq!(stats.emitted, 0);
        assert!(sink.samples.is_empty());
    }

    #[test]
    fn test_build_propagates_engine_capacity_errors() {
        let request = WaveRequest::new(
            AdcModel::mcp3202(Mcp3202Input::SingleCh0),
            &[17],
            250,
            SLOW_REPEAT,
        )
        .unwrap();
        let result = Sampler::build(SimEngine::with_capacity(100, 4096), request);
        assert!(matches!(
            result.err(),
            Some(SamplerError::Engine(EngineError::ControlBlocksExhausted { .. }))
        ));
    }
}
