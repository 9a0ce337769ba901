//! Provides a driver for a Texas Instruments ADS1256 24-bit ADC via the `embedded-hal` ecosystem.
//!
//! The driver is layered: [`Transport`] owns the SPI device and the data-ready
//! line, [`Ads1256`] speaks the command protocol on top of it, and the
//! configuration methods ([`Ads1256::initialize`], [`Ads1256::select_channel`])
//! bring the converter into a calibrated, measuring state.
//!
//! Chip-select is owned by the [`SpiDevice`](embedded_hal::spi::SpiDevice):
//! every command is a single transaction, so the line is released even when a
//! transfer inside it fails.

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

use core::time::Duration;

pub mod command;
mod calibration;
mod device;
mod register;
mod transport;

pub use calibration::{Probe, Settings};
pub use device::{Ads1256, RESET_SETTLE_MS};
pub use register::{DataRate, Gain, Input, Register, Status};
pub use transport::{Transport, POLL_INTERVAL_US};

/// Driver error, generic over the SPI and data-ready pin error types.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error<S, P> {
    #[error("SPI bus fault: {0:?}")]
    Bus(S),
    #[error("data-ready line fault: {0:?}")]
    Pin(P),
    #[error("data-ready not asserted within {0:?}")]
    Timeout(Duration),
    #[error("conversion read while data-ready is not asserted")]
    NotReady,
    #[error("{register:?} read back {read:#04x} after writing {wrote:#04x}")]
    Mismatch { register: Register, wrote: u8, read: u8 },
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The physical link is unusable.
    Bus,
    /// Data-ready (or calibration completion) was not observed in time.
    Timeout,
    /// The converter was driven out of protocol.
    Protocol,
    /// A register did not hold the value written to it.
    Calibration,
}

impl<S, P> Error<S, P> {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Bus(_) | Error::Pin(_) => ErrorKind::Bus,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::NotReady => ErrorKind::Protocol,
            Error::Mismatch { .. } => ErrorKind::Calibration,
        }
    }
}

/// Reassemble a conversion result clocked out MSB first into a sign-extended
/// 24-bit two's-complement value.
pub fn decode_sample(bytes: [u8; 3]) -> i32 {
    i32::from_be_bytes([bytes[0], bytes[1], bytes[2], 0]) >> 8
}

/// Inverse of [`decode_sample`]. Values outside the 24-bit range are truncated.
pub fn encode_sample(value: i32) -> [u8; 3] {
    let [high, mid, low, _] = (value << 8).to_be_bytes();
    [high, mid, low]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_extension() {
        assert_eq!(decode_sample([0x7F, 0xFF, 0xFF]), 8_388_607);
        assert_eq!(decode_sample([0xFF, 0x00, 0x00]), -65_536);
        assert_eq!(decode_sample([0x80, 0x00, 0x00]), -8_388_608);
        assert_eq!(decode_sample([0xFF, 0xFF, 0xFF]), -1);
        assert_eq!(decode_sample([0x00, 0x03, 0xE8]), 1000);
    }

    #[test]
    fn encode_matches_wire_order() {
        assert_eq!(encode_sample(-12), [0xFF, 0xFF, 0xF4]);
        assert_eq!(decode_sample(encode_sample(-8_388_608)), -8_388_608);
    }

    #[test]
    fn error_kinds() {
        type E = Error<(), ()>;

        assert_eq!(E::Bus(()).kind(), ErrorKind::Bus);
        assert_eq!(E::Pin(()).kind(), ErrorKind::Bus);
        assert_eq!(E::Timeout(Duration::from_millis(1)).kind(), ErrorKind::Timeout);
        assert_eq!(E::NotReady.kind(), ErrorKind::Protocol);
        assert_eq!(
            E::Mismatch { register: Register::Drate, wrote: 0x82, read: 0xF0 }.kind(),
            ErrorKind::Calibration
        );
    }
}
