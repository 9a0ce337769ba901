use core::time::Duration;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::InputPin;
use embedded_hal::spi::SpiDevice;

use crate::register::{DataRate, Gain, Input, Register, Status};
use crate::{Ads1256, Error};

/// Converter configuration applied by [`Ads1256::initialize`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Settings {
    pub data_rate: DataRate,
    pub gain: Gain,
    /// Enable the analog input buffer.
    pub buffer: bool,
}

/// Result of [`Ads1256::probe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Probe {
    pub status: Status,
    pub adcon: u8,
    /// DRDY level when the probe ran.
    pub data_ready: bool,
    /// DRATE as read back after writing 100 SPS to it.
    pub drate_echo: u8,
}

impl Probe {
    /// Register writes stick, so the converter is talking to us.
    pub fn responding(&self) -> bool {
        self.drate_echo == DataRate::Sps100.code()
    }

    /// PGA factor currently programmed. Code 0b111 also selects x64.
    pub fn gain_factor(&self) -> u8 {
        Gain::try_from(self.adcon & Gain::MASK)
            .map(Gain::factor)
            .unwrap_or(64)
    }
}

impl<SPI, DRDY, D> Ads1256<SPI, DRDY, D>
where
    SPI: SpiDevice,
    DRDY: InputPin,
    D: DelayNs,
{
    /// Bring the converter from any state into a configured, self-calibrated
    /// one, then confirm every written register by reading it back.
    ///
    /// Offset and gain correction do not survive a power cycle, so this runs
    /// the self-calibration unconditionally.
    pub fn initialize(&mut self, settings: &Settings) -> Result<(), Error<SPI::Error, DRDY::Error>> {
        self.reset()?;
        self.stop_continuous()?;

        // MSB first, auto-calibration off.
        let status = if settings.buffer { Status::BUFEN } else { 0 };
        self.write_register(Register::Status, status)?;
        self.write_register(Register::Drate, settings.data_rate.code())?;

        let adcon = settings.gain.apply(self.read_register(Register::Adcon)?);
        self.write_register(Register::Adcon, adcon)?;

        self.self_calibrate()?;
        self.wait_data_ready(settings.data_rate.calibration_timeout())?;

        self.verify(Register::Status, status)?;
        self.verify(Register::Drate, settings.data_rate.code())?;
        self.verify(Register::Adcon, adcon)?;

        Ok(())
    }

    /// Switch the multiplexer to `input` and throw away the first conversion,
    /// which was integrated partly on the previous input.
    ///
    /// Returns `false` without touching the bus if `input` is already
    /// selected. If any step fails the selection is left unknown, so the next
    /// call performs the full switch again.
    pub fn select_channel(
        &mut self,
        input: Input,
        timeout: Duration,
    ) -> Result<bool, Error<SPI::Error, DRDY::Error>> {
        if self.selected == Some(input) {
            return Ok(false);
        }

        self.set_mux(input)?;
        self.sync_wakeup()?;
        self.wait_data_ready(timeout)?;
        let _stale = self.read_conversion()?;

        self.selected = Some(input);

        Ok(true)
    }

    /// Basic communication check: reset, dump STATUS and ADCON, sample DRDY,
    /// and verify a DRATE write sticks.
    pub fn probe(&mut self) -> Result<Probe, Error<SPI::Error, DRDY::Error>> {
        self.reset()?;

        let status = self.read_status()?;
        let adcon = self.read_register(Register::Adcon)?;
        let data_ready = self.data_ready()?;

        self.write_register(Register::Drate, DataRate::Sps100.code())?;
        self.bus.delay_ms(10);
        let drate_echo = self.read_register(Register::Drate)?;

        Ok(Probe { status, adcon, data_ready, drate_echo })
    }

    fn verify(&mut self, register: Register, wrote: u8) -> Result<(), Error<SPI::Error, DRDY::Error>> {
        let read = self.read_register(register)?;
        let mask = register.writable_mask();

        if read & mask != wrote & mask {
            return Err(Error::Mismatch { register, wrote, read });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command;
    use crate::device::tests::{Drdy, Elapsed, MockError};
    use embedded_hal::spi::{ErrorType, Operation};
    use std::vec::Vec;

    /// Register file answering WREG/RREG, optionally with one register that
    /// ignores writes.
    struct RegisterFile {
        registers: [u8; 11],
        pending: u8,
        stuck: Option<Register>,
        commands: Vec<u8>,
    }

    impl RegisterFile {
        fn new() -> Self {
            Self {
                registers: [0x30, 0x01, 0x20, 0xF0, 0xE0, 0, 0, 0, 0, 0, 0],
                pending: 0,
                stuck: None,
                commands: Vec::new(),
            }
        }
    }

    impl ErrorType for RegisterFile {
        type Error = MockError;
    }

    impl SpiDevice for RegisterFile {
        fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), MockError> {
            for operation in operations {
                match operation {
                    Operation::Write(words) => {
                        let address = (words[0] & 0x0F) as usize;
                        self.commands.push(words[0]);

                        match words[0] & 0xF0 {
                            command::WREG if self.stuck.map(|r| r as usize) != Some(address) => {
                                self.registers[address] = words[2];
                            }
                            command::RREG => self.pending = self.registers[address],
                            _ => {}
                        }
                    }
                    Operation::Read(words) => words[0] = self.pending,
                    _ => {}
                }
            }

            Ok(())
        }
    }

    #[test]
    fn write_then_read_every_register() {
        let mut adc = Ads1256::new(RegisterFile::new(), Drdy(true), Elapsed::default());

        for register in Register::all() {
            let mask = register.writable_mask();

            for value in [0x00, 0x5A, 0xA5, 0xFF] {
                adc.write_register(register, value).unwrap();
                let read = adc.read_register(register).unwrap();
                assert_eq!(read & mask, value & mask, "{register:?}");
            }
        }
    }

    #[test]
    fn initialize_programs_and_calibrates() {
        let mut adc = Ads1256::new(RegisterFile::new(), Drdy(true), Elapsed::default());
        let settings = Settings { data_rate: DataRate::Sps100, gain: Gain::X8, buffer: true };

        adc.initialize(&settings).unwrap();

        let (spi, _, _) = adc.release();
        assert_eq!(spi.registers[Register::Drate as usize], 0x82);
        assert_eq!(spi.registers[Register::Adcon as usize], 0x23);
        assert_eq!(spi.registers[Register::Status as usize], Status::BUFEN);

        let order: Vec<u8> = spi
            .commands
            .iter()
            .copied()
            .filter(|c| !matches!(c & 0xF0, command::RREG | command::WREG))
            .collect();
        assert_eq!(order, [command::RESET, command::SDATAC, command::SELFCAL]);
    }

    #[test]
    fn initialize_detects_read_back_mismatch() {
        let mut spi = RegisterFile::new();
        spi.stuck = Some(Register::Drate);

        let mut adc = Ads1256::new(spi, Drdy(true), Elapsed::default());
        let result = adc.initialize(&Settings::default());

        assert_eq!(
            result,
            Err(Error::Mismatch { register: Register::Drate, wrote: 0x82, read: 0xF0 })
        );
    }

    #[test]
    fn initialize_times_out_without_calibration_done() {
        let mut adc = Ads1256::new(RegisterFile::new(), Drdy(false), Elapsed::default());
        let settings = Settings { data_rate: DataRate::Sps2_5, ..Settings::default() };

        assert_eq!(
            adc.initialize(&settings),
            Err(Error::Timeout(DataRate::Sps2_5.calibration_timeout()))
        );
    }

    #[test]
    fn reselecting_is_free() {
        let mut adc = Ads1256::new(RegisterFile::new(), Drdy(true), Elapsed::default());
        let timeout = Duration::from_millis(10);

        assert_eq!(adc.select_channel(Input::Ain1, timeout), Ok(true));
        assert_eq!(adc.select_channel(Input::Ain1, timeout), Ok(false));

        let (spi, _, _) = adc.release();
        let reads = spi.commands.iter().filter(|&&c| c == command::RDATA).count();
        assert_eq!(reads, 1, "only the first selection discards a conversion");
        assert_eq!(spi.registers[Register::Mux as usize], 0x18);
    }

    #[test]
    fn failed_switch_is_retried_in_full() {
        let mut adc = Ads1256::new(RegisterFile::new(), Drdy(false), Elapsed::default());
        let timeout = Duration::from_millis(1);

        assert!(adc.select_channel(Input::Ain2, timeout).is_err());
        assert_eq!(adc.selected(), None);
    }

    #[test]
    fn probe_reports_echo() {
        let mut adc = Ads1256::new(RegisterFile::new(), Drdy(true), Elapsed::default());

        let probe = adc.probe().unwrap();

        assert!(probe.responding());
        assert!(probe.data_ready);
        assert_eq!(probe.status.id(), 3);
        assert_eq!(probe.gain_factor(), 1);
    }
}
