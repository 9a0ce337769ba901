//! Run configuration: the validated converter setup, engine tuning, and the
//! settings the binaries read from the environment.

use std::path::PathBuf;
use std::time::Duration;

use ads1256::{DataRate, Gain, Input};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown data rate code {0:#04x}")]
    DataRate(u8),
    #[error("unknown gain code {0}")]
    Gain(u8),
    #[error("channel {0} is not an analog input (AIN0-AIN7)")]
    Channel(u8),
    #[error("both load cells are on AIN{0}")]
    SameChannel(u8),
    #[error("{name}={value:?} is not valid")]
    Env { name: &'static str, value: String },
    #[error("invalid tuning: {0}")]
    Tuning(&'static str),
}

/// Converter setup for one run. Validated on construction and immutable
/// afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    data_rate: DataRate,
    gain: Gain,
    buffer: bool,
    channels: [Input; 2],
}

impl Default for DeviceConfig {
    /// 100 SPS, unity gain (the strain-gauge amplifiers provide the gain),
    /// load cells on AIN0 and AIN1.
    fn default() -> Self {
        Self {
            data_rate: DataRate::Sps100,
            gain: Gain::X1,
            buffer: false,
            channels: [Input::Ain0, Input::Ain1],
        }
    }
}

impl DeviceConfig {
    /// Build from raw register codes and input indices.
    pub fn new(data_rate: u8, gain: u8, channels: [u8; 2]) -> Result<Self, ConfigError> {
        let data_rate = DataRate::try_from(data_rate).map_err(ConfigError::DataRate)?;
        let gain = Gain::try_from(gain).map_err(ConfigError::Gain)?;
        let [first, second] = channels;
        let first = Input::try_from(first).map_err(ConfigError::Channel)?;
        let second = Input::try_from(second).map_err(ConfigError::Channel)?;

        Self::from_parts(data_rate, gain, [first, second])
    }

    pub fn from_parts(data_rate: DataRate, gain: Gain, channels: [Input; 2]) -> Result<Self, ConfigError> {
        if channels[0] == channels[1] {
            return Err(ConfigError::SameChannel(channels[0].index()));
        }

        Ok(Self { data_rate, gain, buffer: false, channels })
    }

    pub fn with_buffer(mut self, buffer: bool) -> Self {
        self.buffer = buffer;
        self
    }

    pub fn data_rate(&self) -> DataRate {
        self.data_rate
    }

    pub fn gain(&self) -> Gain {
        self.gain
    }

    pub fn buffer(&self) -> bool {
        self.buffer
    }

    pub fn channels(&self) -> [Input; 2] {
        self.channels
    }

    pub fn adc_settings(&self) -> ads1256::Settings {
        ads1256::Settings {
            data_rate: self.data_rate,
            gain: self.gain,
            buffer: self.buffer,
        }
    }
}

/// Engine retry and timing policy.
#[derive(Debug, Clone, PartialEq)]
pub struct Tuning {
    /// Samples averaged into a tare offset.
    pub tare_samples: usize,
    /// Fewer valid samples than this fails the tare attempt.
    pub tare_min_valid: usize,
    pub tare_attempts: u32,
    pub calibration_attempts: u32,
    /// Data-ready timeout while sampling, in conversion periods.
    pub read_timeout_periods: u32,
    pub min_read_timeout: Duration,
    /// Tare standard deviation, in counts, above which the load is reported
    /// as unstable.
    pub noisy_tare: f64,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            tare_samples: 20,
            tare_min_valid: 15,
            tare_attempts: 3,
            calibration_attempts: 3,
            read_timeout_periods: 4,
            min_read_timeout: Duration::from_millis(10),
            noisy_tare: 100.0,
        }
    }
}

impl Tuning {
    /// Reject policies that could tare against an empty window or never
    /// attempt an operation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tare_samples == 0 {
            return Err(ConfigError::Tuning("tare_samples must be at least 1"));
        }

        if self.tare_min_valid == 0 || self.tare_min_valid > self.tare_samples {
            return Err(ConfigError::Tuning("tare_min_valid must be between 1 and tare_samples"));
        }

        if self.tare_attempts == 0 || self.calibration_attempts == 0 {
            return Err(ConfigError::Tuning("attempt counts must be at least 1"));
        }

        if self.read_timeout_periods == 0 && self.min_read_timeout.is_zero() {
            return Err(ConfigError::Tuning("read timeout must be positive"));
        }

        Ok(())
    }

    pub fn read_timeout(&self, data_rate: DataRate) -> Duration {
        (data_rate.period() * self.read_timeout_periods).max(self.min_read_timeout)
    }
}

const DATA_RATES: [(&str, DataRate); 16] = [
    ("30000", DataRate::Sps30000),
    ("15000", DataRate::Sps15000),
    ("7500", DataRate::Sps7500),
    ("3750", DataRate::Sps3750),
    ("2000", DataRate::Sps2000),
    ("1000", DataRate::Sps1000),
    ("500", DataRate::Sps500),
    ("100", DataRate::Sps100),
    ("60", DataRate::Sps60),
    ("50", DataRate::Sps50),
    ("30", DataRate::Sps30),
    ("25", DataRate::Sps25),
    ("15", DataRate::Sps15),
    ("10", DataRate::Sps10),
    ("5", DataRate::Sps5),
    ("2.5", DataRate::Sps2_5),
];

/// Everything the binaries need to wire up and run a device.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// BCM number of the chip-select GPIO.
    pub cs_pin: u8,
    /// BCM number of the DRDY GPIO.
    pub drdy_pin: u8,
    pub spi_clock_hz: u32,
    pub device: DeviceConfig,
    /// Console lines per second.
    pub print_hz: u32,
    /// Also record readings to this CSV file.
    pub record: Option<PathBuf>,
    /// Stop after this long. `None` runs until stopped.
    pub duration: Option<Duration>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cs_pin: 22,
            drdy_pin: 17,
            spi_clock_hz: 1_000_000,
            device: DeviceConfig::default(),
            print_hz: 10,
            record: None,
            duration: None,
        }
    }
}

impl Settings {
    /// Read `CELLRS_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build settings from `lookup`, falling back to the defaults for unset
    /// variables.
    ///
    /// | Variable | Meaning | Default |
    /// |----------|---------|---------|
    /// | `CELLRS_CS_PIN` | chip-select GPIO | 22 |
    /// | `CELLRS_DRDY_PIN` | data-ready GPIO | 17 |
    /// | `CELLRS_SPI_HZ` | SPI clock | 1000000 |
    /// | `CELLRS_CHANNELS` | two inputs, e.g. `0,1` | `0,1` |
    /// | `CELLRS_DATA_RATE` | samples per second | 100 |
    /// | `CELLRS_GAIN` | PGA factor | 1 |
    /// | `CELLRS_BUFFER` | input buffer on | false |
    /// | `CELLRS_PRINT_HZ` | console lines per second | 10 |
    /// | `CELLRS_RECORD` | CSV output path | none |
    /// | `CELLRS_DURATION` | seconds, 0 = until stopped | 0 |
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let var = |name: &'static str| lookup(name).map(|value| (name, value.trim().to_owned()));

        let number = |name: &'static str, default: u32| -> Result<u32, ConfigError> {
            match var(name) {
                Some((name, value)) => value.parse().map_err(|_| ConfigError::Env { name, value }),
                None => Ok(default),
            }
        };

        let pin = |name: &'static str, default: u8| -> Result<u8, ConfigError> {
            match var(name) {
                Some((name, value)) => value.parse().map_err(|_| ConfigError::Env { name, value }),
                None => Ok(default),
            }
        };

        let channels = match var("CELLRS_CHANNELS") {
            Some((name, value)) => parse_channels(&value).ok_or(ConfigError::Env { name, value })??,
            None => defaults.device.channels(),
        };

        let data_rate = match var("CELLRS_DATA_RATE") {
            Some((name, value)) => DATA_RATES
                .iter()
                .find(|(sps, _)| *sps == value)
                .map(|&(_, rate)| rate)
                .ok_or(ConfigError::Env { name, value })?,
            None => defaults.device.data_rate(),
        };

        let gain = match var("CELLRS_GAIN") {
            Some((name, value)) => value
                .parse::<u8>()
                .ok()
                .and_then(|factor| {
                    (0..7u8)
                        .filter_map(|code| Gain::try_from(code).ok())
                        .find(|gain| gain.factor() == factor)
                })
                .ok_or(ConfigError::Env { name, value })?,
            None => defaults.device.gain(),
        };

        let buffer = match var("CELLRS_BUFFER") {
            Some((name, value)) => match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => return Err(ConfigError::Env { name, value }),
            },
            None => defaults.device.buffer(),
        };

        let print_hz = number("CELLRS_PRINT_HZ", defaults.print_hz)?;
        if print_hz == 0 {
            return Err(ConfigError::Env { name: "CELLRS_PRINT_HZ", value: "0".into() });
        }

        let duration = match number("CELLRS_DURATION", 0)? {
            0 => None,
            seconds => Some(Duration::from_secs(u64::from(seconds))),
        };

        Ok(Self {
            cs_pin: pin("CELLRS_CS_PIN", defaults.cs_pin)?,
            drdy_pin: pin("CELLRS_DRDY_PIN", defaults.drdy_pin)?,
            spi_clock_hz: number("CELLRS_SPI_HZ", defaults.spi_clock_hz)?,
            device: DeviceConfig::from_parts(data_rate, gain, channels)?.with_buffer(buffer),
            print_hz,
            record: var("CELLRS_RECORD").map(|(_, path)| PathBuf::from(path)),
            duration,
        })
    }

    pub fn print_period(&self) -> Duration {
        Duration::from_secs(1) / self.print_hz
    }
}

/// `"0,1"` into two inputs. `None` if the text is not two numbers.
fn parse_channels(text: &str) -> Option<Result<[Input; 2], ConfigError>> {
    let (first, second) = text.split_once(',')?;
    let first: u8 = first.trim().parse().ok()?;
    let second: u8 = second.trim().parse().ok()?;

    let inputs = Input::try_from(first)
        .and_then(|first| Input::try_from(second).map(|second| [first, second]))
        .map_err(ConfigError::Channel);

    Some(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();

        move |name| vars.get(name).cloned()
    }

    #[test]
    fn device_config_validates_codes() {
        assert!(DeviceConfig::new(0x82, 0, [0, 1]).is_ok());
        assert_eq!(DeviceConfig::new(0x81, 0, [0, 1]), Err(ConfigError::DataRate(0x81)));
        assert_eq!(DeviceConfig::new(0x82, 7, [0, 1]), Err(ConfigError::Gain(7)));
        assert_eq!(DeviceConfig::new(0x82, 0, [0, 8]), Err(ConfigError::Channel(8)));
        assert_eq!(DeviceConfig::new(0x82, 0, [3, 3]), Err(ConfigError::SameChannel(3)));
    }

    #[test]
    fn device_config_accepts_every_distinct_pair() {
        for first in 0..8 {
            for second in (0..8).filter(|&s| s != first) {
                let config = DeviceConfig::new(0x03, 6, [first, second]).unwrap();
                assert_eq!(config.channels()[1].index(), second);
            }
        }
    }

    #[test]
    fn read_timeout_scales_with_rate() {
        let tuning = Tuning::default();

        assert_eq!(tuning.read_timeout(DataRate::Sps100), Duration::from_millis(40));
        assert_eq!(tuning.read_timeout(DataRate::Sps30000), Duration::from_millis(10));
        assert_eq!(tuning.read_timeout(DataRate::Sps2_5), Duration::from_millis(1600));
    }

    #[test]
    fn tuning_rejects_empty_tare_window() {
        assert_eq!(Tuning::default().validate(), Ok(()));

        let empty = Tuning { tare_samples: 0, tare_min_valid: 0, ..Tuning::default() };
        assert!(matches!(empty.validate(), Err(ConfigError::Tuning(_))));

        let unreachable = Tuning { tare_min_valid: 21, ..Tuning::default() };
        assert!(matches!(unreachable.validate(), Err(ConfigError::Tuning(_))));

        let no_attempts = Tuning { calibration_attempts: 0, ..Tuning::default() };
        assert!(matches!(no_attempts.validate(), Err(ConfigError::Tuning(_))));

        let all_valid = Tuning { tare_min_valid: 20, ..Tuning::default() };
        assert_eq!(all_valid.validate(), Ok(()));
    }

    #[test]
    fn defaults_without_environment() {
        let settings = Settings::from_lookup(lookup(&[])).unwrap();

        assert_eq!(settings, Settings::default());
        assert_eq!(settings.print_period(), Duration::from_millis(100));
    }

    #[test]
    fn environment_overrides() {
        let settings = Settings::from_lookup(lookup(&[
            ("CELLRS_CS_PIN", "8"),
            ("CELLRS_CHANNELS", "2, 5"),
            ("CELLRS_DATA_RATE", "2.5"),
            ("CELLRS_GAIN", "64"),
            ("CELLRS_BUFFER", "on"),
            ("CELLRS_RECORD", "out.csv"),
            ("CELLRS_DURATION", "60"),
        ]))
        .unwrap();

        assert_eq!(settings.cs_pin, 8);
        assert_eq!(settings.device.channels(), [Input::Ain2, Input::Ain5]);
        assert_eq!(settings.device.data_rate(), DataRate::Sps2_5);
        assert_eq!(settings.device.gain(), Gain::X64);
        assert!(settings.device.buffer());
        assert_eq!(settings.record, Some(PathBuf::from("out.csv")));
        assert_eq!(settings.duration, Some(Duration::from_secs(60)));
    }

    #[test]
    fn environment_errors_name_the_variable() {
        let err = Settings::from_lookup(lookup(&[("CELLRS_GAIN", "3")])).unwrap_err();
        assert_eq!(err, ConfigError::Env { name: "CELLRS_GAIN", value: "3".into() });

        let err = Settings::from_lookup(lookup(&[("CELLRS_CHANNELS", "1,1")])).unwrap_err();
        assert_eq!(err, ConfigError::SameChannel(1));

        let err = Settings::from_lookup(lookup(&[("CELLRS_CHANNELS", "0,9")])).unwrap_err();
        assert_eq!(err, ConfigError::Channel(9));

        let err = Settings::from_lookup(lookup(&[("CELLRS_PRINT_HZ", "fast")])).unwrap_err();
        assert_eq!(err, ConfigError::Env { name: "CELLRS_PRINT_HZ", value: "fast".into() });
    }
}
