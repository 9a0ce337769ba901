use core::time::Duration;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::InputPin;
use embedded_hal::spi::{Operation, SpiDevice};

use crate::Error;

/// How often [`Transport::wait_data_ready`] samples the DRDY line.
pub const POLL_INTERVAL_US: u32 = 100;

/// The physical link: an SPI device with its chip-select, the DRDY input, and
/// a delay provider for protocol timing.
///
/// Knows nothing about the converter's commands.
pub struct Transport<SPI, DRDY, D> {
    spi: SPI,
    drdy: DRDY,
    delay: D,
}

impl<SPI, DRDY, D> Transport<SPI, DRDY, D>
where
    SPI: SpiDevice,
    DRDY: InputPin,
    D: DelayNs,
{
    /// Please ensure the SPI bus is in SPI mode 1, aka (0, 1).
    pub fn new(spi: SPI, drdy: DRDY, delay: D) -> Self {
        Self { spi, drdy, delay }
    }

    /// Full-duplex exchange: clocks `buffer` out and replaces it with the
    /// bytes clocked in.
    pub fn exchange(&mut self, buffer: &mut [u8]) -> Result<(), Error<SPI::Error, DRDY::Error>> {
        self.spi.transfer_in_place(buffer).map_err(Error::Bus)
    }

    /// Run `operations` with chip-select asserted, releasing it afterwards
    /// whether or not they succeed.
    pub fn transaction(
        &mut self,
        operations: &mut [Operation<'_, u8>],
    ) -> Result<(), Error<SPI::Error, DRDY::Error>> {
        self.spi.transaction(operations).map_err(Error::Bus)
    }

    /// DRDY is active low.
    pub fn data_ready(&mut self) -> Result<bool, Error<SPI::Error, DRDY::Error>> {
        self.drdy.is_low().map_err(Error::Pin)
    }

    /// Block until DRDY asserts, or fail with [`Error::Timeout`] once
    /// `timeout` has elapsed.
    pub fn wait_data_ready(&mut self, timeout: Duration) -> Result<(), Error<SPI::Error, DRDY::Error>> {
        let budget = timeout.as_micros();
        let mut waited: u128 = 0;

        loop {
            if self.data_ready()? {
                return Ok(());
            }

            if waited >= budget {
                return Err(Error::Timeout(timeout));
            }

            self.delay.delay_us(POLL_INTERVAL_US);
            waited += u128::from(POLL_INTERVAL_US);
        }
    }

    pub fn delay_ms(&mut self, ms: u32) {
        self.delay.delay_ms(ms);
    }

    /// Give back the underlying peripherals.
    pub fn release(self) -> (SPI, DRDY, D) {
        (self.spi, self.drdy, self.delay)
    }
}
