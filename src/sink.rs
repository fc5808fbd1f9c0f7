use crate::sampler::RunStats;
use std::io::{self, Write};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// One decoded reading from one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    /// Capture timestamp in microseconds since the Unix epoch, anchored at
    /// run start and monotonically non-decreasing in drain order.
    pub micros: u64,
    /// Decoded sample value.
    pub value: u16,
    /// Index of the device within the tracked set.
    pub device: u8,
    /// Reading slot the sample was drained from.
    pub slot: u32,
}

/// Microsecond clock anchored to wall time once and advanced monotonically.
///
/// Readings carry wall-meaningful timestamps, but a wall clock stepping
/// backwards mid-run cannot make them go backwards.
#[derive(Debug, Clone, Copy)]
pub struct MicrosClock {
    wall_base_micros: u64,
    origin: Instant,
}

impl MicrosClock {
    pub fn start() -> Self {
        let wall_base_micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_micros() as u64);
        Self {
            wall_base_micros,
            origin: Instant::now(),
        }
    }

    pub fn now_micros(&self) -> u64 {
        self.wall_base_micros + self.origin.elapsed().as_micros() as u64
    }
}

/// Where drained samples go, in drain order.
///
/// `emit` must stay cheap: the drain loop calls it between polls, and a slow
/// sink is exactly what lets the hardware lap the consumer.
pub trait SampleSink {
    /// Called once when draining starts.
    fn begin(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// One ordered record per drained reading.
    fn emit(&mut self, sample: &Sample) -> io::Result<()>;

    /// Called once after the run with the final figures.
    fn finish(&mut self, stats: &RunStats) -> io::Result<()> {
        let _ = stats;
        Ok(())
    }
}

/// Line-oriented text stream: a `DS;` marker, then one `<micros>,<value>;`
/// record per sample on a single line, then a summary line.
#[derive(Debug)]
pub struct TextStreamSink<W: Write> {
    out: W,
}

impl<W: Write> TextStreamSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> SampleSink for TextStreamSink<W> {
    fn begin(&mut self) -> io::Result<()> {
        write!(self.out, "DS;")
    }

    fn emit(&mut self, sample: &Sample) -> io::Result<()> {
        write!(self.out, "{},{};", sample.micros, sample.value)
    }

    fn finish(&mut self, stats: &RunStats) -> io::Result<()> {
        writeln!(self.out)?;
        writeln!(
            self.out,
            "# {} samples in {:.1} seconds ({:.0}/s)",
            stats.emitted,
            stats.elapsed_secs,
            stats.throughput()
        )?;
        if stats.dropped > 0 {
            writeln!(self.out, "# {} readings lost to lapping", stats.dropped)?;
        }
        self.out.flush()
    }
}
