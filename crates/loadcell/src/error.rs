use std::fmt;
use std::time::Duration;

use crate::config::ConfigError;
use crate::engine::State;

/// What went wrong, independent of where.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The SPI link or a control line is unusable. Never retried.
    Bus,
    /// Data-ready or calibration completion was not observed in time.
    Timeout,
    /// The converter was driven out of protocol.
    Protocol,
    /// Register read-back mismatch or failed self-calibration.
    Calibration,
    /// Too few valid samples to establish a zero reference.
    Tare,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("bus error: {0}")]
    Bus(String),
    #[error("data-ready not asserted within {0:?}")]
    Timeout(Duration),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("calibration failed: {0}")]
    Calibration(String),
    #[error("tare of AIN{channel} failed: {valid} of {required} samples valid")]
    Tare { channel: u8, valid: usize, required: usize },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("not allowed while {0:?}")]
    InvalidState(State),
    #[error("engine faulted: {0}")]
    Faulted(Fault),
}

impl Error {
    /// `None` for errors that are about the caller rather than the device.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Error::Bus(_) => Some(ErrorKind::Bus),
            Error::Timeout(_) => Some(ErrorKind::Timeout),
            Error::Protocol(_) => Some(ErrorKind::Protocol),
            Error::Calibration(_) => Some(ErrorKind::Calibration),
            Error::Tare { .. } => Some(ErrorKind::Tare),
            Error::Faulted(fault) => Some(fault.kind),
            Error::Config(_) | Error::InvalidState(_) => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind() == Some(ErrorKind::Bus)
    }
}

impl<S: fmt::Debug, P: fmt::Debug> From<ads1256::Error<S, P>> for Error {
    fn from(err: ads1256::Error<S, P>) -> Self {
        let message = err.to_string();

        match err {
            ads1256::Error::Bus(_) | ads1256::Error::Pin(_) => Error::Bus(message),
            ads1256::Error::Timeout(timeout) => Error::Timeout(timeout),
            ads1256::Error::NotReady => Error::Protocol(message),
            ads1256::Error::Mismatch { .. } => Error::Calibration(message),
        }
    }
}

/// Why the engine entered [`State::Faulted`], and from where.
#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    pub kind: ErrorKind,
    /// State the engine was in when the error occurred.
    pub state: State,
    pub message: String,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} error while {:?}: {}", self.kind, self.state, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ads1256::Register;

    type DriverError = ads1256::Error<&'static str, ()>;

    #[test]
    fn driver_errors_keep_their_kind() {
        let bus: Error = DriverError::Bus("ENODEV").into();
        assert_eq!(bus.kind(), Some(ErrorKind::Bus));
        assert!(bus.is_fatal());
        assert!(bus.to_string().contains("ENODEV"));

        let pin: Error = DriverError::Pin(()).into();
        assert_eq!(pin.kind(), Some(ErrorKind::Bus));

        let timeout: Error = DriverError::Timeout(Duration::from_millis(40)).into();
        assert_eq!(timeout, Error::Timeout(Duration::from_millis(40)));

        let protocol: Error = DriverError::NotReady.into();
        assert_eq!(protocol.kind(), Some(ErrorKind::Protocol));
        assert!(!protocol.is_fatal());

        let mismatch: Error = DriverError::Mismatch { register: Register::Adcon, wrote: 0x21, read: 0x20 }.into();
        assert_eq!(mismatch.kind(), Some(ErrorKind::Calibration));
    }

    #[test]
    fn fault_reports_kind_and_state() {
        let fault = Fault {
            kind: ErrorKind::Tare,
            state: State::Taring,
            message: "tare of AIN1 failed: 3 of 15 samples valid".into(),
        };

        assert_eq!(
            fault.to_string(),
            "Tare error while Taring: tare of AIN1 failed: 3 of 15 samples valid"
        );
        assert_eq!(Error::Faulted(fault).kind(), Some(ErrorKind::Tare));
    }
}
