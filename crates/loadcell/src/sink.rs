//! Where readings go.

use std::io::{self, Write};
use std::time::Duration;

use ads1256::Input;
use chrono::{DateTime, Local};

use crate::engine::rounded_div;

/// One tared sample from one load cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// Position of the channel in the configuration, 0 or 1.
    pub slot: usize,
    /// Analog input index.
    pub channel: u8,
    pub raw: i32,
    pub tare: i32,
    /// `raw - tare`.
    pub value: i32,
    pub timestamp: DateTime<Local>,
    /// Time since the engine first entered `Running`.
    pub elapsed: Duration,
}

/// Receives the reading stream. `end_cycle` is called once both channels
/// have been visited, whether or not each produced a reading, with the
/// engine's elapsed running time.
pub trait Sink {
    fn emit(&mut self, reading: &Reading);

    fn end_cycle(&mut self, _elapsed: Duration) {}
}

impl Sink for Vec<Reading> {
    fn emit(&mut self, reading: &Reading) {
        self.push(reading.clone());
    }
}

impl<S: Sink + ?Sized> Sink for &mut S {
    fn emit(&mut self, reading: &Reading) {
        (**self).emit(reading);
    }

    fn end_cycle(&mut self, elapsed: Duration) {
        (**self).end_cycle(elapsed);
    }
}

/// Adapts a closure into a [`Sink`].
pub struct FnSink<F>(pub F);

impl<F: FnMut(&Reading)> Sink for FnSink<F> {
    fn emit(&mut self, reading: &Reading) {
        (self.0)(reading);
    }
}

/// Mean of one slot over a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Averaged {
    raw: i32,
    value: i32,
}

#[derive(Debug, Clone, Copy, Default)]
struct Sums {
    raw: i64,
    value: i64,
    count: i64,
    /// Skipped in at least one cycle of the window.
    missed: bool,
}

impl Sums {
    fn averaged(&self) -> Option<Averaged> {
        if self.missed || self.count == 0 {
            return None;
        }

        Some(Averaged {
            raw: rounded_div(self.raw, self.count),
            value: rounded_div(self.value, self.count),
        })
    }
}

/// Cycles folded into one output line or row. A slot skipped in any of them
/// is invalid for the whole window.
#[derive(Debug, Default)]
struct Window {
    slots: [Sums; 2],
    seen: [bool; 2],
    cycles: usize,
    latest: Option<DateTime<Local>>,
}

impl Window {
    fn put(&mut self, reading: &Reading) {
        if let Some(sums) = self.slots.get_mut(reading.slot) {
            sums.raw += i64::from(reading.raw);
            sums.value += i64::from(reading.value);
            sums.count += 1;
            self.seen[reading.slot] = true;
            self.latest = Some(reading.timestamp);
        }
    }

    fn end_cycle(&mut self) {
        for (sums, seen) in self.slots.iter_mut().zip(&mut self.seen) {
            if !std::mem::take(seen) {
                sums.missed = true;
            }
        }

        self.cycles += 1;
    }

    fn take(&mut self) -> ([Option<Averaged>; 2], Option<DateTime<Local>>) {
        let window = std::mem::take(self);
        let [a, b] = window.slots;

        ([a.averaged(), b.averaged()], window.latest)
    }
}

/// Console output, one line per window of cycles:
///
/// ```text
/// LC1 (AIN0): 1015 (Δ +15)   |   LC2 (AIN1): 1988 (Δ -12)
/// ```
///
/// Each line shows the mean over at least `samples` cycles (5 by default)
/// and at most one line is printed per `period` of engine time. A channel
/// skipped in any folded cycle shows as `invalid`.
pub struct PrintSink<W> {
    out: W,
    channels: [Input; 2],
    window: Window,
    samples: usize,
    period: Duration,
    last_print: Option<Duration>,
}

impl<W: Write> PrintSink<W> {
    pub const SAMPLES: usize = 5;

    pub fn new(out: W, channels: [Input; 2]) -> Self {
        Self {
            out,
            channels,
            window: Window::default(),
            samples: Self::SAMPLES,
            period: Duration::ZERO,
            last_print: None,
        }
    }

    /// Average at least `samples` cycles into each line.
    pub fn with_samples(mut self, samples: usize) -> Self {
        self.samples = samples.max(1);
        self
    }

    /// Print at most once per `period` of engine time.
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&self, cells: &[Option<Averaged>; 2]) -> String {
        cells
            .iter()
            .zip(self.channels)
            .enumerate()
            .map(|(slot, (cell, input))| {
                let value = match cell {
                    Some(mean) => format!("{} (Δ {:+})", mean.raw, mean.value),
                    None => "invalid".to_owned(),
                };
                format!("LC{} (AIN{}): {}", slot + 1, input.index(), value)
            })
            .collect::<Vec<_>>()
            .join("   |   ")
    }
}

impl<W: Write> Sink for PrintSink<W> {
    fn emit(&mut self, reading: &Reading) {
        self.window.put(reading);
    }

    fn end_cycle(&mut self, elapsed: Duration) {
        self.window.end_cycle();

        if self.window.cycles < self.samples {
            return;
        }

        if let Some(last) = self.last_print {
            if elapsed.saturating_sub(last) < self.period {
                return;
            }
        }

        let (cells, _) = self.window.take();
        let line = self.line(&cells);

        if let Err(err) = writeln!(self.out, "{line}") {
            log::warn!("console write failed: {err}");
        }

        self.last_print = Some(elapsed);
    }
}

/// `load_cell_data_<YYYYmmdd_HHMMSS>.csv` for the current local time.
pub fn timestamped_file_name() -> String {
    Local::now().format("load_cell_data_%Y%m%d_%H%M%S.csv").to_string()
}

/// CSV recorder with columns
/// `Timestamp,Time_Seconds,LoadCell1_Raw,LoadCell1_Delta,LoadCell2_Raw,LoadCell2_Delta`.
///
/// Each row is the mean of `samples` cycles (3 by default). Windows in which
/// either channel was skipped produce no row. Where the file goes and how
/// long the recording lasts is up to the caller; the `pi` binary records until
/// stopped unless `CELLRS_DURATION` is set. The first write error stops
/// recording and is returned by [`CsvSink::finish`].
pub struct CsvSink<W> {
    out: W,
    window: Window,
    samples: usize,
    rows: u64,
    error: Option<io::Error>,
}

impl<W: Write> CsvSink<W> {
    pub const HEADER: &'static str =
        "Timestamp,Time_Seconds,LoadCell1_Raw,LoadCell1_Delta,LoadCell2_Raw,LoadCell2_Delta";

    pub const SAMPLES: usize = 3;

    /// Writes the header immediately.
    pub fn new(mut out: W) -> io::Result<Self> {
        writeln!(out, "{}", Self::HEADER)?;

        Ok(Self { out, window: Window::default(), samples: Self::SAMPLES, rows: 0, error: None })
    }

    /// Average `samples` cycles into each row.
    pub fn with_samples(mut self, samples: usize) -> Self {
        self.samples = samples.max(1);
        self
    }

    /// Data rows written so far.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn finish(mut self) -> io::Result<W> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }

        self.out.flush()?;

        Ok(self.out)
    }

    fn write_row(&mut self, elapsed: Duration) -> io::Result<()> {
        let ([Some(first), Some(second)], Some(timestamp)) = self.window.take() else {
            return Ok(());
        };

        writeln!(
            self.out,
            "{},{:.3},{},{},{},{}",
            timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            elapsed.as_secs_f64(),
            first.raw,
            first.value,
            second.raw,
            second.value,
        )?;

        self.rows += 1;

        Ok(())
    }
}

impl<W: Write> Sink for CsvSink<W> {
    fn emit(&mut self, reading: &Reading) {
        self.window.put(reading);
    }

    fn end_cycle(&mut self, elapsed: Duration) {
        self.window.end_cycle();

        if self.window.cycles < self.samples {
            return;
        }

        if self.error.is_some() {
            self.window = Window::default();
            return;
        }

        if let Err(err) = self.write_row(elapsed) {
            log::error!("recording stopped: {err}");
            self.error = Some(err);
        }
    }
}

/// Feeds every reading to two sinks, e.g. the console and a recorder.
pub struct Tee<A, B>(pub A, pub B);

impl<A: Sink, B: Sink> Sink for Tee<A, B> {
    fn emit(&mut self, reading: &Reading) {
        self.0.emit(reading);
        self.1.emit(reading);
    }

    fn end_cycle(&mut self, elapsed: Duration) {
        self.0.end_cycle(elapsed);
        self.1.end_cycle(elapsed);
    }
}
