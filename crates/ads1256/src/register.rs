//! Register map and the typed values written into it.

use core::time::Duration;

/// Register addresses.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Register {
    Status = 0x00,
    Mux = 0x01,
    Adcon = 0x02,
    Drate = 0x03,
    Io = 0x04,
    Ofc0 = 0x05,
    Ofc1 = 0x06,
    Ofc2 = 0x07,
    Fsc0 = 0x08,
    Fsc1 = 0x09,
    Fsc2 = 0x0A,
}

impl Register {
    /// Every register, in address order.
    pub fn all() -> impl Iterator<Item = Self> {
        [
            Self::Status,
            Self::Mux,
            Self::Adcon,
            Self::Drate,
            Self::Io,
            Self::Ofc0,
            Self::Ofc1,
            Self::Ofc2,
            Self::Fsc0,
            Self::Fsc1,
            Self::Fsc2,
        ]
        .into_iter()
    }

    /// Bits that hold what was last written. The rest are read-only status,
    /// reserved, or reflect input pins.
    pub const fn writable_mask(self) -> u8 {
        match self {
            // ID nibble and DRDY are read-only.
            Self::Status => 0b0000_1110,
            // Bit 7 is reserved.
            Self::Adcon => 0b0111_1111,
            // Low nibble reads the pin level, not the output latch.
            Self::Io => 0b1111_0000,
            _ => 0xFF,
        }
    }

    pub const fn address(self) -> u8 {
        self as u8
    }
}

/// STATUS register contents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Status(pub u8);

impl Status {
    pub const ORDER: u8 = 1 << 3;
    pub const ACAL: u8 = 1 << 2;
    pub const BUFEN: u8 = 1 << 1;
    pub const DRDY: u8 = 1 << 0;

    /// Factory programmed identification bits.
    pub fn id(&self) -> u8 {
        self.0 >> 4
    }

    pub fn msb_first(&self) -> bool {
        self.0 & Self::ORDER == 0
    }

    pub fn auto_calibration(&self) -> bool {
        self.0 & Self::ACAL != 0
    }

    pub fn buffer_enabled(&self) -> bool {
        self.0 & Self::BUFEN != 0
    }

    /// Mirrors the DRDY pin, which is active low.
    pub fn data_ready(&self) -> bool {
        self.0 & Self::DRDY == 0
    }
}

/// Programmable gain amplifier setting, the low three bits of ADCON.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Gain {
    #[default]
    X1 = 0b000,
    X2 = 0b001,
    X4 = 0b010,
    X8 = 0b011,
    X16 = 0b100,
    X32 = 0b101,
    X64 = 0b110,
}

impl Gain {
    pub const MASK: u8 = 0b0000_0111;

    /// Amplification factor.
    pub const fn factor(self) -> u8 {
        1 << self as u8
    }

    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Replace the gain bits of an ADCON value, keeping clock-out and
    /// sensor-detect settings.
    pub const fn apply(self, adcon: u8) -> u8 {
        (adcon & !Self::MASK) | self as u8
    }
}

impl TryFrom<u8> for Gain {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, u8> {
        Ok(match code {
            0b000 => Self::X1,
            0b001 => Self::X2,
            0b010 => Self::X4,
            0b011 => Self::X8,
            0b100 => Self::X16,
            0b101 => Self::X32,
            0b110 => Self::X64,
            _ => return Err(code),
        })
    }
}

/// Output data rate, the DRATE register code.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DataRate {
    Sps30000 = 0xF0,
    Sps15000 = 0xE0,
    Sps7500 = 0xD0,
    Sps3750 = 0xC0,
    Sps2000 = 0xB0,
    Sps1000 = 0xA1,
    Sps500 = 0x92,
    #[default]
    Sps100 = 0x82,
    Sps60 = 0x72,
    Sps50 = 0x63,
    Sps30 = 0x53,
    Sps25 = 0x43,
    Sps15 = 0x33,
    Sps10 = 0x23,
    Sps5 = 0x13,
    Sps2_5 = 0x03,
}

impl DataRate {
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Samples per thousand seconds, so that 2.5 SPS stays integral.
    pub const fn millisamples_per_second(self) -> u32 {
        match self {
            Self::Sps30000 => 30_000_000,
            Self::Sps15000 => 15_000_000,
            Self::Sps7500 => 7_500_000,
            Self::Sps3750 => 3_750_000,
            Self::Sps2000 => 2_000_000,
            Self::Sps1000 => 1_000_000,
            Self::Sps500 => 500_000,
            Self::Sps100 => 100_000,
            Self::Sps60 => 60_000,
            Self::Sps50 => 50_000,
            Self::Sps30 => 30_000,
            Self::Sps25 => 25_000,
            Self::Sps15 => 15_000,
            Self::Sps10 => 10_000,
            Self::Sps5 => 5_000,
            Self::Sps2_5 => 2_500,
        }
    }

    /// Time between two conversions.
    pub const fn period(self) -> Duration {
        Duration::from_nanos(1_000_000_000_000 / self.millisamples_per_second() as u64)
    }

    /// Upper bound for a self-calibration to complete at this rate.
    pub fn calibration_timeout(self) -> Duration {
        const FLOOR: Duration = Duration::from_millis(200);

        (self.period() * 10).max(FLOOR)
    }
}

impl TryFrom<u8> for DataRate {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, u8> {
        Ok(match code {
            0xF0 => Self::Sps30000,
            0xE0 => Self::Sps15000,
            0xD0 => Self::Sps7500,
            0xC0 => Self::Sps3750,
            0xB0 => Self::Sps2000,
            0xA1 => Self::Sps1000,
            0x92 => Self::Sps500,
            0x82 => Self::Sps100,
            0x72 => Self::Sps60,
            0x63 => Self::Sps50,
            0x53 => Self::Sps30,
            0x43 => Self::Sps25,
            0x33 => Self::Sps15,
            0x23 => Self::Sps10,
            0x13 => Self::Sps5,
            0x03 => Self::Sps2_5,
            _ => return Err(code),
        })
    }
}

/// Analog inputs usable as the positive side of a single-ended measurement.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Input {
    Ain0 = 0,
    Ain1 = 1,
    Ain2 = 2,
    Ain3 = 3,
    Ain4 = 4,
    Ain5 = 5,
    Ain6 = 6,
    Ain7 = 7,
}

impl Input {
    /// MUX nibble selecting AINCOM.
    pub const COMMON: u8 = 0x8;

    /// Iterate over all inputs.
    pub fn all() -> impl Iterator<Item = Self> {
        [
            Self::Ain0,
            Self::Ain1,
            Self::Ain2,
            Self::Ain3,
            Self::Ain4,
            Self::Ain5,
            Self::Ain6,
            Self::Ain7,
        ]
        .into_iter()
    }

    pub const fn index(self) -> u8 {
        self as u8
    }

    /// MUX value measuring this input against AINCOM.
    pub const fn single_ended_mux(self) -> u8 {
        (self as u8) << 4 | Self::COMMON
    }
}

impl TryFrom<u8> for Input {
    type Error = u8;

    fn try_from(index: u8) -> Result<Self, u8> {
        Input::all().nth(index as usize).ok_or(index)
    }
}
