//! The sampling state machine.
//!
//! ```text
//! Uninitialized -> Calibrating -> Taring -> Running -> Stopped
//!                        (any) -> Faulted
//! ```
//!
//! Bus errors are fatal in every state. Everything else is retried a bounded
//! number of times before calibration or taring gives up, and skipped for the
//! cycle once the engine is running.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use ads1256::{Ads1256, Input};
use chrono::Local;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::InputPin;
use embedded_hal::spi::SpiDevice;
use log::{debug, error, info, warn};

use crate::config::{DeviceConfig, Tuning};
use crate::error::{Error, ErrorKind, Fault};
use crate::sink::{Reading, Sink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Uninitialized,
    Calibrating,
    Taring,
    Running,
    Stopped,
    Faulted,
}

/// Per load cell bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelState {
    pub input: Input,
    /// Zero reference, set by the last successful tare.
    pub tare: Option<i32>,
    pub last_sample: Option<i32>,
    /// Population standard deviation of the tare window, in counts.
    pub tare_noise: f64,
}

impl ChannelState {
    fn new(input: Input) -> Self {
        Self { input, tare: None, last_sample: None, tare_noise: 0.0 }
    }

    /// Latest sample relative to the tare.
    pub fn reading(&self) -> Option<i32> {
        Some(self.last_sample? - self.tare?)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub cycles: u64,
    pub readings: u64,
    /// Reads that failed once and were restarted.
    pub retries: u64,
    /// Channel visits that produced no reading.
    pub skipped: u64,
}

/// A channel that produced no reading in a cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Skipped {
    pub channel: u8,
    pub error: Error,
}

/// Outcome of one [`Engine::cycle`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cycle {
    /// Tared value per slot.
    pub values: [Option<i32>; 2],
    pub skipped: Vec<Skipped>,
}

/// Drives one ADS1256 through calibration, taring and continuous sampling of
/// two load cells.
pub struct Engine<SPI, DRDY, D> {
    adc: Ads1256<SPI, DRDY, D>,
    tuning: Tuning,
    state: State,
    config: DeviceConfig,
    channels: [ChannelState; 2],
    stats: Stats,
    fault: Option<Fault>,
    /// When the current run first entered [`State::Running`].
    running_since: Option<Instant>,
}

impl<SPI, DRDY, D> Engine<SPI, DRDY, D>
where
    SPI: SpiDevice,
    DRDY: InputPin,
    D: DelayNs,
{
    pub fn new(adc: Ads1256<SPI, DRDY, D>) -> Self {
        let config = DeviceConfig::default();
        let [a, b] = config.channels();

        Self {
            adc,
            tuning: Tuning::default(),
            state: State::Uninitialized,
            config,
            channels: [ChannelState::new(a), ChannelState::new(b)],
            stats: Stats::default(),
            fault: None,
            running_since: None,
        }
    }

    pub fn with_tuning(mut self, tuning: Tuning) -> Result<Self, Error> {
        tuning.validate()?;
        self.tuning = tuning;

        Ok(self)
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Why the engine is [`State::Faulted`].
    pub fn fault(&self) -> Option<&Fault> {
        self.fault.as_ref()
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn channels(&self) -> &[ChannelState; 2] {
        &self.channels
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Start of the current run. Re-taring does not move it.
    pub fn running_since(&self) -> Option<Instant> {
        self.running_since
    }

    /// Give back the driver.
    pub fn release(self) -> Ads1256<SPI, DRDY, D> {
        self.adc
    }

    /// Configure and calibrate the converter, tare both channels, and enter
    /// [`State::Running`].
    pub fn start(&mut self, config: DeviceConfig) -> Result<(), Error> {
        match self.state {
            State::Uninitialized | State::Stopped | State::Faulted => {}
            state => return Err(Error::InvalidState(state)),
        }

        let [a, b] = config.channels();
        self.config = config;
        self.channels = [ChannelState::new(a), ChannelState::new(b)];
        self.stats = Stats::default();
        self.fault = None;
        self.running_since = None;

        self.calibrate()?;
        self.tare()
    }

    /// Take a new zero reference for both channels.
    pub fn retare(&mut self) -> Result<(), Error> {
        self.expect_state(&[State::Running, State::Stopped])?;
        self.tare()
    }

    /// Sample each channel once and hand the readings to `sink`.
    ///
    /// A channel that fails twice in a row is skipped for this cycle. Only a
    /// bus error ends the cycle early, leaving the engine faulted.
    pub fn cycle(&mut self, sink: &mut impl Sink) -> Result<Cycle, Error> {
        self.expect_state(&[State::Running])?;

        let timeout = self.read_timeout();
        let mut cycle = Cycle::default();

        for slot in 0..self.channels.len() {
            let input = self.channels[slot].input;

            match self.acquire_with_retry(input, timeout) {
                Ok(raw) => {
                    let channel = &mut self.channels[slot];
                    channel.last_sample = Some(raw);

                    let tare = channel.tare.unwrap_or_default();
                    let reading = Reading {
                        slot,
                        channel: input.index(),
                        raw,
                        tare,
                        value: raw - tare,
                        timestamp: Local::now(),
                        elapsed: self.elapsed(),
                    };

                    sink.emit(&reading);
                    cycle.values[slot] = Some(reading.value);
                    self.stats.readings += 1;
                }
                Err(err) if err.is_fatal() => {
                    sink.end_cycle(self.elapsed());
                    return Err(self.fail(err));
                }
                Err(err) => {
                    warn!("AIN{} skipped this cycle: {err}", input.index());
                    self.stats.skipped += 1;
                    cycle.skipped.push(Skipped { channel: input.index(), error: err });
                }
            }
        }

        sink.end_cycle(self.elapsed());
        self.stats.cycles += 1;

        Ok(cycle)
    }

    /// Cycle until `stop` is set, then [`stop`](Self::stop).
    ///
    /// The flag is checked between cycles only.
    pub fn run(&mut self, mut sink: impl Sink, stop: &AtomicBool) -> Result<Stats, Error> {
        while !stop.load(Ordering::Relaxed) {
            self.cycle(&mut sink)?;
        }

        self.stop()?;

        Ok(self.stats)
    }

    /// Leave [`State::Running`] and put the converter in standby.
    pub fn stop(&mut self) -> Result<(), Error> {
        self.expect_state(&[State::Running])?;

        if let Err(err) = self.adc.standby() {
            return Err(self.fail(err.into()));
        }

        self.enter(State::Stopped);
        info!(
            "{} readings in {} cycles, {} retried, {} skipped",
            self.stats.readings, self.stats.cycles, self.stats.retries, self.stats.skipped
        );

        Ok(())
    }

    fn calibrate(&mut self) -> Result<(), Error> {
        self.enter(State::Calibrating);

        let settings = self.config.adc_settings();
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self.adc.initialize(&settings).map_err(Error::from) {
                Ok(()) => {
                    info!(
                        "converter calibrated: {:?}, gain x{}, buffer {}",
                        settings.data_rate,
                        settings.gain.factor(),
                        if settings.buffer { "on" } else { "off" }
                    );
                    return Ok(());
                }
                Err(err) if err.is_fatal() || attempt >= self.tuning.calibration_attempts => {
                    return Err(self.fail(err));
                }
                Err(err) => warn!("calibration attempt {attempt} failed: {err}"),
            }
        }
    }

    /// Tares both channels. Offsets are only committed once both succeed.
    fn tare(&mut self) -> Result<(), Error> {
        self.enter(State::Taring);

        let mut results = [(0, 0.0); 2];

        for (slot, result) in results.iter_mut().enumerate() {
            *result = self.tare_channel(slot).map_err(|err| self.fail(err))?;
        }

        for (channel, (offset, noise)) in self.channels.iter_mut().zip(results) {
            channel.tare = Some(offset);
            channel.tare_noise = noise;
            channel.last_sample = None;
        }

        self.running_since.get_or_insert_with(Instant::now);
        self.enter(State::Running);

        Ok(())
    }

    fn tare_channel(&mut self, slot: usize) -> Result<(i32, f64), Error> {
        let input = self.channels[slot].input;
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self.collect_tare(input) {
                Ok((offset, noise, valid)) => {
                    info!("AIN{} tare {offset} (σ {noise:.1}, {} samples)", input.index(), valid);

                    if noise > self.tuning.noisy_tare {
                        warn!("AIN{} tare is noisy (σ {noise:.1}); check load and wiring", input.index());
                    }

                    return Ok((offset, noise));
                }
                Err(err) if err.is_fatal() || attempt >= self.tuning.tare_attempts => return Err(err),
                Err(err) => warn!("AIN{} tare attempt {attempt} failed: {err}", input.index()),
            }
        }
    }

    /// Offset and noise of one tare window.
    fn collect_tare(&mut self, input: Input) -> Result<(i32, f64, usize), Error> {
        let timeout = self.read_timeout();
        let mut samples = Vec::with_capacity(self.tuning.tare_samples);

        self.adc.select_channel(input, timeout)?;

        for _ in 0..self.tuning.tare_samples {
            match self.read(timeout) {
                Ok(raw) => samples.push(raw),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    debug!("AIN{} tare sample lost: {err}", input.index());
                    self.adc.sync_wakeup()?;
                }
            }
        }

        let too_few = Error::Tare {
            channel: input.index(),
            valid: samples.len(),
            required: self.tuning.tare_min_valid.max(1),
        };

        if samples.len() < self.tuning.tare_min_valid {
            return Err(too_few);
        }

        let Some(offset) = rounded_mean(&samples) else {
            return Err(too_few);
        };

        Ok((offset, std_dev(&samples), samples.len()))
    }

    fn acquire_with_retry(&mut self, input: Input, timeout: Duration) -> Result<i32, Error> {
        match self.acquire(input, timeout) {
            Err(err) if !err.is_fatal() => {
                debug!("AIN{} read failed, restarting conversion: {err}", input.index());
                self.stats.retries += 1;
                self.adc.sync_wakeup()?;
                self.acquire(input, timeout)
            }
            result => result,
        }
    }

    fn acquire(&mut self, input: Input, timeout: Duration) -> Result<i32, Error> {
        self.adc.select_channel(input, timeout)?;
        self.read(timeout)
    }

    fn read(&mut self, timeout: Duration) -> Result<i32, Error> {
        self.adc.wait_data_ready(timeout)?;
        Ok(self.adc.read_conversion()?)
    }

    fn elapsed(&self) -> Duration {
        self.running_since.map_or(Duration::ZERO, |since| since.elapsed())
    }

    /// A faulted engine reports its recorded fault rather than its state.
    fn expect_state(&self, allowed: &[State]) -> Result<(), Error> {
        if allowed.contains(&self.state) {
            return Ok(());
        }

        match (&self.fault, self.state) {
            (Some(fault), State::Faulted) => Err(Error::Faulted(fault.clone())),
            (_, state) => Err(Error::InvalidState(state)),
        }
    }

    fn read_timeout(&self) -> Duration {
        self.tuning.read_timeout(self.config.data_rate())
    }

    fn enter(&mut self, state: State) {
        if self.state != state {
            info!("{:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    /// Record `err` as the reason for entering [`State::Faulted`].
    fn fail(&mut self, err: Error) -> Error {
        let fault = Fault {
            kind: err.kind().unwrap_or(ErrorKind::Protocol),
            state: self.state,
            message: err.to_string(),
        };

        error!("{fault}");

        self.fault = Some(fault);
        self.enter(State::Faulted);

        err
    }
}

/// `sum / n` rounded half away from zero. `n` must be positive.
pub(crate) fn rounded_div(sum: i64, n: i64) -> i32 {
    let half = n / 2;
    let mean = if sum >= 0 { (sum + half) / n } else { (sum - half) / n };

    mean as i32
}

/// Mean rounded half away from zero, `None` for no samples.
fn rounded_mean(samples: &[i32]) -> Option<i32> {
    if samples.is_empty() {
        return None;
    }

    let sum = samples.iter().copied().map(i64::from).sum();

    Some(rounded_div(sum, samples.len() as i64))
}

fn std_dev(samples: &[i32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }

    let n = samples.len() as f64;
    let mean = samples.iter().copied().map(f64::from).sum::<f64>() / n;
    let variance = samples.iter().map(|&s| (f64::from(s) - mean).powi(2)).sum::<f64>() / n;

    variance.sqrt()
}
