//! Synthetic 1-Wire bus for exercising the `onewire-master` driver without
//! hardware.
//!
//! [SynthBus] implements the driver's [PulseGenerator] seam and plays the
//! electrical side of the bus: it interprets the programmed channel widths as
//! reset pulses, write-0/write-1 pulses or read slots, resolves the line as
//! the wired-AND of the master pulse and every slave's output, and feeds the
//! latched levels back as timing events. [SynthSlave] is a small 1-Wire
//! device model (presence, ROM commands, Search ROM arbitration with
//! drop-out, scratchpad with CRC) sufficient to drive every code path of the
//! master.

use std::collections::VecDeque;
use std::convert::Infallible;

use embedded_hal::delay::DelayNs;
use fixed::types::I12F4;
use onewire_master::timings::{RESET_LOW_US, WRITE_ONE_LOW_US};
use onewire_master::{
    ONEWIRE_CONVERT_TEMP_CMD, ONEWIRE_MATCH_ROM_CMD, ONEWIRE_READ_ROM_CMD,
    ONEWIRE_READ_SCRATCHPAD_CMD, ONEWIRE_SEARCH_ROM_CMD, ONEWIRE_SKIP_ROM_CMD, OneWireCrc,
    PulseEvent, PulseGenerator, RomCode,
};

/// Write scratchpad function command understood by the slave model.
pub const WRITE_SCRATCHPAD_CMD: u8 = 0x4e;

const CHANNELS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlavePhase {
    /// Powered up, nothing heard yet.
    WaitReset,
    /// Shifting in a ROM command after a reset.
    RomCommand,
    /// Participating in a Search ROM pass.
    SearchRom,
    /// Shifting out the own ROM code.
    ReadRom,
    /// Comparing an incoming ROM code against the own one.
    MatchRom,
    /// Selected; shifting in a function command.
    Function,
    /// Shifting out the scratchpad.
    ReadScratchpad,
    /// Shifting in th/tl/configuration scratchpad bytes.
    WriteScratchpad,
    /// Lost arbitration or unaddressed; mute until the next reset.
    Dropped,
}

/// A simulated 1-Wire slave device.
#[derive(Debug, Clone)]
pub struct SynthSlave {
    rom: RomCode,
    scratchpad: [u8; 9],
    shift: u8,
    shift_bits: u8,
    bitpos: u8,
    step: u8,
    phase: SlavePhase,
}

impl SynthSlave {
    /// Creates a slave with the given ROM code, taken as-is.
    pub fn new(rom: RomCode) -> Self {
        let mut slave = Self {
            rom,
            // thermometer power-on scratchpad, +85 degC
            scratchpad: [0x50, 0x05, 0x4b, 0x46, 0x7f, 0xff, 0x0c, 0x10, 0],
            shift: 0,
            shift_bits: 0,
            bitpos: 0,
            step: 0,
            phase: SlavePhase::WaitReset,
        };
        slave.seal_scratchpad();
        slave
    }

    /// Creates a slave from a family byte and serial, sealing the ROM code
    /// with its CRC.
    pub fn with_serial(family: u8, serial: [u8; 6]) -> Self {
        let mut rom = [0u8; 8];
        rom[0] = family;
        rom[1..7].copy_from_slice(&serial);
        rom[7] = OneWireCrc::compute(&rom[..7]);
        Self::new(rom)
    }

    /// Loads a temperature into the scratchpad.
    pub fn with_temperature(mut self, temp: I12F4) -> Self {
        let bytes = temp.to_le_bytes();
        self.scratchpad[0] = bytes[0];
        self.scratchpad[1] = bytes[1];
        self.seal_scratchpad();
        self
    }

    /// The slave's ROM code.
    pub fn rom(&self) -> RomCode {
        self.rom
    }

    /// The slave's scratchpad, last byte the CRC of the first eight.
    pub fn scratchpad(&self) -> [u8; 9] {
        self.scratchpad
    }

    fn seal_scratchpad(&mut self) {
        self.scratchpad[8] = OneWireCrc::compute(&self.scratchpad[..8]);
    }

    fn rom_bit(&self, idx: u8) -> bool {
        (self.rom[idx as usize / 8] >> (idx % 8)) & 0x1 != 0
    }

    fn reset(&mut self) {
        self.phase = SlavePhase::RomCommand;
        self.shift = 0;
        self.shift_bits = 0;
        self.bitpos = 0;
        self.step = 0;
    }

    fn shift_in(&mut self, bit: bool) -> Option<u8> {
        if bit {
            self.shift |= 1 << self.shift_bits;
        }
        self.shift_bits += 1;
        if self.shift_bits < 8 {
            return None;
        }
        let cmd = self.shift;
        self.shift = 0;
        self.shift_bits = 0;
        Some(cmd)
    }

    fn advance(&mut self, total: u8, next: SlavePhase) {
        self.bitpos += 1;
        if self.bitpos == total {
            self.bitpos = 0;
            self.phase = next;
        }
    }

    /// Runs one data slot. `master_bit` is the bit the master's pulse width
    /// encodes (a read slot carries a 1). Returns the level this slave lets
    /// the line float to: `false` means it pulls the line low.
    fn slot(&mut self, master_bit: bool) -> bool {
        match self.phase {
            SlavePhase::WaitReset | SlavePhase::Dropped => true,
            SlavePhase::RomCommand => {
                if let Some(cmd) = self.shift_in(master_bit) {
                    self.bitpos = 0;
                    self.step = 0;
                    self.phase = match cmd {
                        ONEWIRE_SEARCH_ROM_CMD => SlavePhase::SearchRom,
                        ONEWIRE_READ_ROM_CMD => SlavePhase::ReadRom,
                        ONEWIRE_MATCH_ROM_CMD => SlavePhase::MatchRom,
                        ONEWIRE_SKIP_ROM_CMD => SlavePhase::Function,
                        _ => SlavePhase::Dropped,
                    };
                }
                true
            }
            SlavePhase::SearchRom => self.search_slot(master_bit),
            SlavePhase::ReadRom => {
                let bit = self.rom_bit(self.bitpos);
                self.advance(64, SlavePhase::Function);
                bit
            }
            SlavePhase::MatchRom => {
                if master_bit != self.rom_bit(self.bitpos) {
                    self.phase = SlavePhase::Dropped;
                } else {
                    self.advance(64, SlavePhase::Function);
                }
                true
            }
            SlavePhase::Function => {
                if let Some(cmd) = self.shift_in(master_bit) {
                    self.bitpos = 0;
                    self.phase = match cmd {
                        ONEWIRE_READ_SCRATCHPAD_CMD => SlavePhase::ReadScratchpad,
                        WRITE_SCRATCHPAD_CMD => SlavePhase::WriteScratchpad,
                        // conversions finish instantly in simulation
                        ONEWIRE_CONVERT_TEMP_CMD => SlavePhase::Function,
                        _ => SlavePhase::Dropped,
                    };
                }
                true
            }
            SlavePhase::ReadScratchpad => {
                let idx = self.bitpos as usize;
                let bit = (self.scratchpad[idx / 8] >> (idx % 8)) & 0x1 != 0;
                self.advance(72, SlavePhase::Function);
                bit
            }
            SlavePhase::WriteScratchpad => {
                // th, tl and configuration land in scratchpad bytes 2..5
                let idx = self.bitpos as usize;
                let byte = 2 + idx / 8;
                if master_bit {
                    self.scratchpad[byte] |= 1 << (idx % 8);
                } else {
                    self.scratchpad[byte] &= !(1 << (idx % 8));
                }
                self.advance(24, SlavePhase::Function);
                if self.phase == SlavePhase::Function {
                    self.seal_scratchpad();
                }
                true
            }
        }
    }

    /// One slot of the search triplet: drive the own bit, drive its
    /// complement, then read back the master's decision and drop off the
    /// pass when it went the other way.
    fn search_slot(&mut self, master_bit: bool) -> bool {
        let own = self.rom_bit(self.bitpos);
        match self.step {
            0 => {
                self.step = 1;
                own
            }
            1 => {
                self.step = 2;
                !own
            }
            _ => {
                self.step = 0;
                if master_bit != own {
                    self.phase = SlavePhase::Dropped;
                } else {
                    self.advance(64, SlavePhase::Function);
                }
                true
            }
        }
    }
}

/// A synthetic pulse generator plus the bus line it drives.
pub struct SynthBus {
    slaves: Vec<SynthSlave>,
    master_channel: usize,
    sample_channel: usize,
    period_us: u16,
    widths: [Option<u16>; CHANNELS],
    running: bool,
    pending: VecDeque<PulseEvent>,
    loopback: Option<VecDeque<bool>>,
    force_presence: bool,
    strong_pullup: bool,
    pullup_active: bool,
    pullup_asserts: u32,
    pullup_releases: u32,
}

impl SynthBus {
    /// Creates an empty bus with the given channel assignment.
    pub fn new(master_channel: usize, sample_channel: usize) -> Self {
        assert!(master_channel < CHANNELS && sample_channel < CHANNELS);
        assert!(master_channel != sample_channel);
        Self {
            slaves: Vec::new(),
            master_channel,
            sample_channel,
            period_us: 0,
            widths: [None; CHANNELS],
            running: false,
            pending: VecDeque::new(),
            loopback: None,
            force_presence: false,
            strong_pullup: false,
            pullup_active: false,
            pullup_asserts: 0,
            pullup_releases: 0,
        }
    }

    /// Creates a slaveless bus that echoes every written bit back on the
    /// following read slots.
    pub fn loopback(master_channel: usize, sample_channel: usize) -> Self {
        let mut bus = Self::new(master_channel, sample_channel);
        bus.loopback = Some(VecDeque::new());
        bus.force_presence = true;
        bus
    }

    /// Attaches a slave device to the bus.
    pub fn with_slave(mut self, slave: SynthSlave) -> Self {
        self.slaves.push(slave);
        self
    }

    /// Wires a strong pull-up circuit to the generator.
    pub fn with_strong_pullup(mut self) -> Self {
        self.strong_pullup = true;
        self
    }

    /// Answers resets with a presence pulse even when no slave would. Models
    /// an electrical fault: the search probes then read (1, 1).
    pub fn with_forced_presence(mut self) -> Self {
        self.force_presence = true;
        self
    }

    /// The attached slaves.
    pub fn slaves(&self) -> &[SynthSlave] {
        &self.slaves
    }

    /// How often the strong pull-up was asserted.
    pub fn pullup_asserts(&self) -> u32 {
        self.pullup_asserts
    }

    /// How often the strong pull-up was released.
    pub fn pullup_releases(&self) -> u32 {
        self.pullup_releases
    }

    /// Whether the strong pull-up is asserted right now.
    pub fn pullup_active(&self) -> bool {
        self.pullup_active
    }

    /// Simulates one generator period and queues its events in time order.
    fn run_slot(&mut self) {
        let width = self.widths[self.master_channel].unwrap_or(0);
        let sample = self.widths[self.sample_channel];
        let (master_level, sample_level) = if width >= RESET_LOW_US {
            for slave in &mut self.slaves {
                slave.reset();
            }
            let presence = !self.slaves.is_empty() || self.force_presence;
            if let Some(echo) = self.loopback.as_mut() {
                echo.clear();
            }
            log::trace!("reset slot, presence {presence}");
            (true, !presence)
        } else if width == 0 {
            // quiet slot, the line stays at the pull-up level
            (true, true)
        } else {
            let master_bit = width <= WRITE_ONE_LOW_US;
            let mut line = true;
            for slave in &mut self.slaves {
                line &= slave.slot(master_bit);
            }
            if let Some(echo) = self.loopback.as_mut() {
                if sample.is_some() {
                    line &= echo.pop_front().unwrap_or(true);
                } else {
                    echo.push_back(master_bit);
                }
            }
            // a long write pulse still covers the sample point
            let sampled = match sample {
                Some(offset) if width > offset => false,
                _ => line,
            };
            (line, sampled)
        };
        let master = PulseEvent {
            channel: self.master_channel,
            level: master_level,
        };
        match sample {
            Some(offset) if offset < width => {
                self.pending.push_back(PulseEvent {
                    channel: self.sample_channel,
                    level: sample_level,
                });
                self.pending.push_back(master);
            }
            Some(_) => {
                self.pending.push_back(master);
                self.pending.push_back(PulseEvent {
                    channel: self.sample_channel,
                    level: sample_level,
                });
            }
            None => self.pending.push_back(master),
        }
    }
}

impl PulseGenerator for SynthBus {
    type Error = Infallible;

    fn set_period(&mut self, period_us: u16) -> Result<(), Infallible> {
        self.period_us = period_us;
        Ok(())
    }

    fn set_channel(&mut self, channel: usize, width_us: u16) -> Result<(), Infallible> {
        assert!(channel < CHANNELS, "no such channel");
        self.widths[channel] = Some(width_us);
        Ok(())
    }

    fn disable_channel(&mut self, channel: usize) -> Result<(), Infallible> {
        assert!(channel < CHANNELS, "no such channel");
        self.widths[channel] = None;
        Ok(())
    }

    fn start(&mut self) -> Result<(), Infallible> {
        log::trace!("start, period {} us", self.period_us);
        self.pending.clear();
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Infallible> {
        self.pending.clear();
        self.running = false;
        Ok(())
    }

    fn next_event(&mut self) -> Result<PulseEvent, Infallible> {
        assert!(self.running, "pulse generator not started");
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(event);
            }
            self.run_slot();
        }
    }

    fn has_strong_pullup(&self) -> bool {
        self.strong_pullup
    }

    fn pullup_assert(&mut self) {
        self.pullup_active = true;
        self.pullup_asserts += 1;
    }

    fn pullup_release(&mut self) {
        self.pullup_active = false;
        self.pullup_releases += 1;
    }
}

/// A delay provider that only keeps book of the time asked for.
#[derive(Debug, Default)]
pub struct SynthDelay {
    elapsed_ns: u64,
}

impl SynthDelay {
    /// Total delay requested so far, in nanoseconds.
    pub fn elapsed_ns(&self) -> u64 {
        self.elapsed_ns
    }
}

impl DelayNs for SynthDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.elapsed_ns += u64::from(ns);
    }
}
