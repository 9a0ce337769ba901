//! Command opcodes.
//!
//! `RREG` and `WREG` carry the register address in their low nibble, followed
//! on the wire by a byte holding the register count minus one.

pub const WAKEUP: u8 = 0x00;
pub const RDATA: u8 = 0x01;
pub const SDATAC: u8 = 0x0F;
pub const RREG: u8 = 0x10;
pub const WREG: u8 = 0x50;
pub const SELFCAL: u8 = 0xF0;
pub const SYNC: u8 = 0xFC;
pub const STANDBY: u8 = 0xFD;
pub const RESET: u8 = 0xFE;
