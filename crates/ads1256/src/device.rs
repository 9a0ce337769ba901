use core::time::Duration;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::InputPin;
use embedded_hal::spi::{Operation, SpiDevice};

use crate::register::{Input, Register, Status};
use crate::{command, decode_sample, Error, Transport};

/// Settle time after a RESET command before the converter accepts commands.
pub const RESET_SETTLE_MS: u32 = 500;

/// DIN to DOUT delay (t6, 50 master clock periods at 7.68 MHz) between a
/// read command and its data.
const T6_NS: u32 = 6_600;

/// SYNC to WAKEUP delay (t11, 24 master clock periods).
const T11_NS: u32 = 3_200;

/// ADS1256 driver
pub struct Ads1256<SPI, DRDY, D> {
    pub(crate) bus: Transport<SPI, DRDY, D>,
    /// Input whose post-switch conversion has already been discarded.
    pub(crate) selected: Option<Input>,
}

impl<SPI, DRDY, D> Ads1256<SPI, DRDY, D>
where
    SPI: SpiDevice,
    DRDY: InputPin,
    D: DelayNs,
{
    /// Creates a new driver from an SPI device, the DRDY input and a delay.
    /// Please ensure the SPI bus is in SPI mode 1, aka (0, 1).
    pub fn new(spi: SPI, drdy: DRDY, delay: D) -> Self {
        Transport::new(spi, drdy, delay).into()
    }

    /// Input currently measured, if a switch to it has completed.
    pub fn selected(&self) -> Option<Input> {
        self.selected
    }

    pub fn data_ready(&mut self) -> Result<bool, Error<SPI::Error, DRDY::Error>> {
        self.bus.data_ready()
    }

    pub fn wait_data_ready(&mut self, timeout: Duration) -> Result<(), Error<SPI::Error, DRDY::Error>> {
        self.bus.wait_data_ready(timeout)
    }

    /// Issue the RESET command and wait for the converter to settle.
    pub fn reset(&mut self) -> Result<(), Error<SPI::Error, DRDY::Error>> {
        self.selected = None;
        self.command(command::RESET)?;
        self.bus.delay_ms(RESET_SETTLE_MS);

        Ok(())
    }

    pub fn write_register(&mut self, register: Register, value: u8) -> Result<(), Error<SPI::Error, DRDY::Error>> {
        if register == Register::Mux {
            self.selected = None;
        }

        self.bus.transaction(&mut [Operation::Write(&[
            command::WREG | register.address(),
            0x00,
            value,
        ])])
    }

    pub fn read_register(&mut self, register: Register) -> Result<u8, Error<SPI::Error, DRDY::Error>> {
        let mut value = [0];

        self.bus.transaction(&mut [
            Operation::Write(&[command::RREG | register.address(), 0x00]),
            Operation::DelayNs(T6_NS),
            Operation::Read(&mut value),
        ])?;

        Ok(value[0])
    }

    pub fn read_status(&mut self) -> Result<Status, Error<SPI::Error, DRDY::Error>> {
        self.read_register(Register::Status).map(Status)
    }

    /// Measure `positive` against AINCOM from the next conversion on.
    ///
    /// The conversion in flight still belongs to the previous input; use
    /// [`Ads1256::select_channel`] to restart and discard it.
    pub fn set_mux(&mut self, positive: Input) -> Result<(), Error<SPI::Error, DRDY::Error>> {
        self.write_register(Register::Mux, positive.single_ended_mux())
    }

    /// Restart the digital filter and begin a fresh conversion.
    pub fn sync_wakeup(&mut self) -> Result<(), Error<SPI::Error, DRDY::Error>> {
        self.bus.transaction(&mut [
            Operation::Write(&[command::SYNC]),
            Operation::DelayNs(T11_NS),
            Operation::Write(&[command::WAKEUP]),
        ])
    }

    /// Start a self-calibration. DRDY deasserts until it completes.
    pub fn self_calibrate(&mut self) -> Result<(), Error<SPI::Error, DRDY::Error>> {
        self.command(command::SELFCAL)
    }

    /// Leave read-data-continuous mode so registers can be accessed.
    pub fn stop_continuous(&mut self) -> Result<(), Error<SPI::Error, DRDY::Error>> {
        self.command(command::SDATAC)
    }

    /// Power down the modulator until the next WAKEUP.
    pub fn standby(&mut self) -> Result<(), Error<SPI::Error, DRDY::Error>> {
        self.selected = None;
        self.command(command::STANDBY)
    }

    /// Read the latest conversion result. DRDY must already be asserted.
    pub fn read_conversion(&mut self) -> Result<i32, Error<SPI::Error, DRDY::Error>> {
        if !self.bus.data_ready()? {
            return Err(Error::NotReady);
        }

        let mut data = [0; 3];

        self.bus.transaction(&mut [
            Operation::Write(&[command::RDATA]),
            Operation::DelayNs(T6_NS),
            Operation::Read(&mut data),
        ])?;

        Ok(decode_sample(data))
    }

    /// Give back the SPI device, DRDY input and delay.
    pub fn release(self) -> (SPI, DRDY, D) {
        self.bus.release()
    }

    fn command(&mut self, opcode: u8) -> Result<(), Error<SPI::Error, DRDY::Error>> {
        self.bus.transaction(&mut [Operation::Write(&[opcode])])
    }
}

impl<SPI, DRDY, D> From<Transport<SPI, DRDY, D>> for Ads1256<SPI, DRDY, D> {
    fn from(bus: Transport<SPI, DRDY, D>) -> Self {
        Self { bus, selected: None }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::POLL_INTERVAL_US;
    use core::convert::Infallible;
    use embedded_hal::spi::{Error as SpiError, ErrorKind, ErrorType};
    use std::collections::VecDeque;
    use std::vec::Vec;

    #[derive(Debug, Clone, PartialEq)]
    pub struct MockError;

    impl SpiError for MockError {
        fn kind(&self) -> ErrorKind {
            ErrorKind::Other
        }
    }

    /// Records every write and answers reads from a queue.
    #[derive(Default)]
    pub struct MockSpi {
        pub transactions: Vec<Vec<u8>>,
        pub replies: VecDeque<u8>,
        pub delay_ns: u64,
        pub broken: bool,
    }

    impl ErrorType for MockSpi {
        type Error = MockError;
    }

    impl SpiDevice for MockSpi {
        fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), MockError> {
            if self.broken {
                return Err(MockError);
            }

            let mut written = Vec::new();

            for operation in operations {
                match operation {
                    Operation::Write(words) => written.extend_from_slice(words),
                    Operation::Read(words) => {
                        for word in words.iter_mut() {
                            *word = self.replies.pop_front().unwrap_or(0);
                        }
                    }
                    Operation::Transfer(read, write) => {
                        written.extend_from_slice(write);
                        for word in read.iter_mut() {
                            *word = self.replies.pop_front().unwrap_or(0);
                        }
                    }
                    Operation::TransferInPlace(words) => {
                        written.extend_from_slice(words);
                        for word in words.iter_mut() {
                            *word = self.replies.pop_front().unwrap_or(0);
                        }
                    }
                    Operation::DelayNs(ns) => self.delay_ns += u64::from(*ns),
                }
            }

            self.transactions.push(written);

            Ok(())
        }
    }

    /// DRDY pin held at a fixed level.
    pub struct Drdy(pub bool);

    impl embedded_hal::digital::ErrorType for Drdy {
        type Error = Infallible;
    }

    impl InputPin for Drdy {
        fn is_high(&mut self) -> Result<bool, Infallible> {
            Ok(!self.0)
        }

        fn is_low(&mut self) -> Result<bool, Infallible> {
            Ok(self.0)
        }
    }

    /// Counts requested delay instead of sleeping.
    #[derive(Default)]
    pub struct Elapsed(pub u64);

    impl DelayNs for Elapsed {
        fn delay_ns(&mut self, ns: u32) {
            self.0 += u64::from(ns);
        }
    }

    pub fn adc(ready: bool) -> Ads1256<MockSpi, Drdy, Elapsed> {
        Ads1256::new(MockSpi::default(), Drdy(ready), Elapsed::default())
    }

    #[test]
    fn register_framing() {
        let mut adc = adc(true);

        adc.write_register(Register::Drate, 0x82).unwrap();

        let (spi, _, _) = adc.release();
        assert_eq!(spi.transactions, [[0x53, 0x00, 0x82]]);
    }

    #[test]
    fn read_register_waits_t6() {
        let mut spi = MockSpi::default();
        spi.replies.push_back(0x20);

        let mut adc = Ads1256::new(spi, Drdy(true), Elapsed::default());
        assert_eq!(adc.read_register(Register::Adcon), Ok(0x20));

        let (spi, _, _) = adc.release();
        assert_eq!(spi.transactions, [[0x12, 0x00]]);
        assert_eq!(spi.delay_ns, u64::from(T6_NS));
    }

    #[test]
    fn read_conversion_sign_extends() {
        let mut spi = MockSpi::default();
        spi.replies.extend([0xFF, 0xFF, 0xF4]);

        let mut adc = Ads1256::new(spi, Drdy(true), Elapsed::default());
        assert_eq!(adc.read_conversion(), Ok(-12));

        let (spi, _, _) = adc.release();
        assert_eq!(spi.transactions, [[command::RDATA]]);
    }

    #[test]
    fn read_conversion_requires_data_ready() {
        let mut adc = adc(false);

        assert_eq!(adc.read_conversion(), Err(Error::NotReady));

        let (spi, _, _) = adc.release();
        assert!(spi.transactions.is_empty(), "nothing may be clocked without DRDY");
    }

    #[test]
    fn sync_then_wakeup() {
        let mut adc = adc(true);

        adc.sync_wakeup().unwrap();

        let (spi, _, _) = adc.release();
        assert_eq!(spi.transactions, [[command::SYNC, command::WAKEUP]]);
        assert_eq!(spi.delay_ns, u64::from(T11_NS));
    }

    #[test]
    fn reset_settles() {
        let mut adc = adc(true);

        adc.reset().unwrap();

        let (spi, _, elapsed) = adc.release();
        assert_eq!(spi.transactions, [[command::RESET]]);
        assert_eq!(elapsed.0, u64::from(RESET_SETTLE_MS) * 1_000_000);
    }

    #[test]
    fn wait_data_ready_times_out() {
        let mut adc = adc(false);
        let timeout = Duration::from_millis(5);

        assert_eq!(adc.wait_data_ready(timeout), Err(Error::Timeout(timeout)));

        let (_, _, elapsed) = adc.release();
        let bound = timeout.as_nanos() as u64 + u64::from(POLL_INTERVAL_US) * 1_000;
        assert!(elapsed.0 <= bound, "waited {}ns", elapsed.0);
        assert!(elapsed.0 >= timeout.as_nanos() as u64);
    }

    #[test]
    fn exchange_is_full_duplex() {
        let mut spi = MockSpi::default();
        spi.replies.extend([0xAA, 0xBB, 0xCC]);

        let mut bus = Transport::new(spi, Drdy(true), Elapsed::default());
        let mut buffer = [command::RREG | 0x03, 0x00, 0xFF];

        bus.exchange(&mut buffer).unwrap();

        assert_eq!(buffer, [0xAA, 0xBB, 0xCC]);

        let (spi, _, _) = bus.release();
        assert_eq!(spi.transactions, [[0x13, 0x00, 0xFF]]);
    }

    #[test]
    fn exchange_on_broken_bus() {
        let spi = MockSpi { broken: true, ..MockSpi::default() };
        let mut bus = Transport::new(spi, Drdy(true), Elapsed::default());

        assert_eq!(bus.exchange(&mut [0; 4]), Err(Error::Bus(MockError)));
    }

    #[test]
    fn bus_faults_are_reported() {
        let mut spi = MockSpi::default();
        spi.broken = true;

        let mut adc = Ads1256::new(spi, Drdy(true), Elapsed::default());
        assert_eq!(adc.write_register(Register::Mux, 0x08), Err(Error::Bus(MockError)));
    }
}
