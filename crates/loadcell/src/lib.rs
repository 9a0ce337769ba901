//! Two-channel load-cell sampling on an ADS1256.
//!
//! [`Engine`] owns an [`ads1256::Ads1256`] driver, calibrates it, takes a
//! zero reference for each load cell and then alternates between the two
//! inputs, handing tared [`Reading`]s to a [`Sink`].

pub mod config;
pub mod engine;
pub mod error;
pub mod signal;
pub mod sim;
pub mod sink;

pub use config::{ConfigError, DeviceConfig, Settings, Tuning};
pub use engine::{ChannelState, Cycle, Engine, Skipped, State, Stats};
pub use error::{Error, ErrorKind, Fault};
pub use signal::StopSignal;
pub use sink::{timestamped_file_name, CsvSink, FnSink, PrintSink, Reading, Sink, Tee};
