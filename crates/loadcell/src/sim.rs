//! A simulated ADS1256 behind the `embedded-hal` traits.
//!
//! The chip keeps a register file, decodes the command stream, and drives
//! DRDY from a virtual clock advanced only by the delays the driver requests,
//! so waits that would take seconds on hardware finish instantly. Each input
//! returns a constant level or a scripted sequence. The first conversion
//! after a MUX change still reports the previous input, as the real
//! converter's filter does.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::rc::Rc;
use std::time::Duration;

use ads1256::{command, encode_sample, Ads1256, DataRate, Input, Register, Status};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{self, InputPin};
use embedded_hal::spi::{self, ErrorKind, Operation, SpiDevice};

/// Register contents after power-up or RESET.
const RESET_REGISTERS: [u8; 11] = [0x30, 0x01, 0x20, 0xF0, 0xE0, 0x00, 0x00, 0x00, 0x24, 0x90, 0x67];

/// Returned by [`SimSpi`] once the simulated link is unplugged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unplugged;

impl spi::Error for Unplugged {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

struct Chip {
    registers: [u8; 11],
    now_ns: u64,
    ready_at: Option<u64>,
    replies: VecDeque<u8>,
    levels: [i32; 8],
    scripts: [VecDeque<i32>; 8],
    /// Input the filter was integrating before the last MUX change.
    stale_from: Option<usize>,
    stalled: bool,
    missed: usize,
    /// Inputs whose DRDY stays deasserted after each read until a WAKEUP.
    flaky: [bool; 8],
    unplugged: bool,
    stuck: Option<Register>,
    served: [usize; 8],
    syncs: usize,
    calibrations: usize,
    standby: bool,
}

impl Chip {
    fn new() -> Self {
        Self {
            registers: RESET_REGISTERS,
            now_ns: 0,
            ready_at: None,
            replies: VecDeque::new(),
            levels: [0; 8],
            scripts: Default::default(),
            stale_from: None,
            stalled: false,
            missed: 0,
            flaky: [false; 8],
            unplugged: false,
            stuck: None,
            served: [0; 8],
            syncs: 0,
            calibrations: 0,
            standby: false,
        }
    }

    fn period_ns(&self) -> u64 {
        DataRate::try_from(self.registers[Register::Drate as usize])
            .unwrap_or(DataRate::Sps30000)
            .period()
            .as_nanos() as u64
    }

    fn data_ready(&self) -> bool {
        !self.stalled && self.ready_at.is_some_and(|at| self.now_ns >= at)
    }

    /// Next DRDY edge `periods` conversions from now, unless a miss was
    /// injected.
    fn schedule(&mut self, periods: u64) {
        if self.missed > 0 {
            self.missed -= 1;
            self.ready_at = None;
        } else {
            self.ready_at = Some(self.now_ns + self.period_ns() * periods);
        }
    }

    fn mux_input(&self) -> usize {
        let positive = (self.registers[Register::Mux as usize] >> 4) as usize;
        positive.min(7)
    }

    fn sample(&mut self, input: usize) -> i32 {
        self.scripts[input].pop_front().unwrap_or(self.levels[input])
    }

    fn write(&mut self, words: &[u8]) {
        let Some(&opcode) = words.first() else {
            return;
        };

        match opcode {
            command::RESET => {
                self.registers = RESET_REGISTERS;
                self.stale_from = None;
                self.standby = false;
                self.schedule(1);
            }
            command::SDATAC => {}
            command::SELFCAL => {
                self.calibrations += 1;
                self.schedule(2);
            }
            command::SYNC => {
                self.syncs += 1;
                self.ready_at = None;
            }
            command::WAKEUP | 0xFF => {
                self.standby = false;
                self.schedule(1);
            }
            command::STANDBY => {
                self.standby = true;
                self.ready_at = None;
            }
            command::RDATA => {
                let input = self.stale_from.take().unwrap_or_else(|| self.mux_input());
                let value = self.sample(input);
                self.served[input] += 1;
                self.replies.extend(encode_sample(value));
                self.schedule(1);

                if self.flaky[self.mux_input()] {
                    self.ready_at = None;
                }
            }
            _ if opcode & 0xF0 == command::WREG => {
                let first = (opcode & 0x0F) as usize;
                let values = words.get(2..).unwrap_or_default();

                for (address, &value) in (first..self.registers.len()).zip(values) {
                    self.write_register(address, value);
                }
            }
            _ if opcode & 0xF0 == command::RREG => {
                let first = (opcode & 0x0F) as usize;
                let count = words.get(1).map_or(1, |&n| n as usize + 1);

                for address in (first..self.registers.len()).take(count) {
                    let mut value = self.registers[address];
                    if address == Register::Status as usize && !self.data_ready() {
                        value |= Status::DRDY;
                    }
                    self.replies.push_back(value);
                }
            }
            _ => {}
        }
    }

    fn write_register(&mut self, address: usize, value: u8) {
        let Some(register) = Register::all().nth(address) else {
            return;
        };

        if self.stuck == Some(register) {
            return;
        }

        if register == Register::Mux {
            let before = self.mux_input();
            if before != ((value >> 4) as usize).min(7) {
                self.stale_from = Some(before);
            }
        }

        let mask = register.writable_mask();
        self.registers[address] = (self.registers[address] & !mask) | (value & mask);
    }
}

/// Handle to a simulated converter. Clones share the same chip.
#[derive(Clone)]
pub struct SimulatedAdc {
    chip: Rc<RefCell<Chip>>,
}

impl Default for SimulatedAdc {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedAdc {
    pub fn new() -> Self {
        Self { chip: Rc::new(RefCell::new(Chip::new())) }
    }

    /// A driver talking to this chip.
    pub fn driver(&self) -> Ads1256<SimSpi, SimDrdy, SimDelay> {
        Ads1256::new(
            SimSpi { chip: self.chip.clone() },
            SimDrdy { chip: self.chip.clone() },
            SimDelay { chip: self.chip.clone() },
        )
    }

    /// Every conversion of `input` returns `raw` once its script runs out.
    pub fn set_level(&self, input: Input, raw: i32) {
        self.chip.borrow_mut().levels[input.index() as usize] = raw;
    }

    /// Return these values for the next conversions of `input`.
    pub fn queue(&self, input: Input, samples: impl IntoIterator<Item = i32>) {
        self.chip.borrow_mut().scripts[input.index() as usize].extend(samples);
    }

    /// Hold DRDY deasserted.
    pub fn stall(&self, stalled: bool) {
        self.chip.borrow_mut().stalled = stalled;
    }

    /// Drop the next `count` scheduled conversions, as if DRDY never fired.
    pub fn miss_conversions(&self, count: usize) {
        self.chip.borrow_mut().missed = count;
    }

    /// While `input` is selected, every conversion read out is followed by
    /// one that never completes unless the converter is woken again.
    pub fn flaky(&self, input: Input, flaky: bool) {
        self.chip.borrow_mut().flaky[input.index() as usize] = flaky;
    }

    /// Fail every following SPI transaction.
    pub fn unplug(&self) {
        self.chip.borrow_mut().unplugged = true;
    }

    /// Make `register` ignore writes.
    pub fn stick_register(&self, register: Option<Register>) {
        self.chip.borrow_mut().stuck = register;
    }

    pub fn register(&self, register: Register) -> u8 {
        self.chip.borrow().registers[register as usize]
    }

    /// Conversions read out of `input`, including discarded ones.
    pub fn conversions(&self, input: Input) -> usize {
        self.chip.borrow().served[input.index() as usize]
    }

    pub fn syncs(&self) -> usize {
        self.chip.borrow().syncs
    }

    pub fn calibrations(&self) -> usize {
        self.chip.borrow().calibrations
    }

    pub fn in_standby(&self) -> bool {
        self.chip.borrow().standby
    }

    /// Virtual time elapsed through driver delays.
    pub fn now(&self) -> Duration {
        Duration::from_nanos(self.chip.borrow().now_ns)
    }
}

/// SPI side of the simulated chip. Chip-select framing is implicit: each
/// transaction is one command.
pub struct SimSpi {
    chip: Rc<RefCell<Chip>>,
}

impl spi::ErrorType for SimSpi {
    type Error = Unplugged;
}

impl SpiDevice for SimSpi {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Unplugged> {
        let mut chip = self.chip.borrow_mut();

        if chip.unplugged {
            return Err(Unplugged);
        }

        chip.replies.clear();

        for operation in operations {
            match operation {
                Operation::Write(words) => chip.write(words),
                Operation::Read(words) => {
                    for word in words.iter_mut() {
                        *word = chip.replies.pop_front().unwrap_or(0xFF);
                    }
                }
                Operation::Transfer(read, write) => {
                    chip.write(write);
                    read.fill(0xFF);
                }
                Operation::TransferInPlace(words) => {
                    chip.write(words);
                    words.fill(0xFF);
                }
                Operation::DelayNs(ns) => chip.now_ns += u64::from(*ns),
            }
        }

        Ok(())
    }
}

/// DRDY output of the simulated chip, active low.
pub struct SimDrdy {
    chip: Rc<RefCell<Chip>>,
}

impl digital::ErrorType for SimDrdy {
    type Error = Infallible;
}

impl InputPin for SimDrdy {
    fn is_high(&mut self) -> Result<bool, Infallible> {
        Ok(!self.chip.borrow().data_ready())
    }

    fn is_low(&mut self) -> Result<bool, Infallible> {
        Ok(self.chip.borrow().data_ready())
    }
}

/// Advances the simulated chip's clock instead of sleeping.
pub struct SimDelay {
    chip: Rc<RefCell<Chip>>,
}

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.chip.borrow_mut().now_ns += u64::from(ns);
    }
}
