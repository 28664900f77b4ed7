use embedded_hal::delay::DelayNs;

use crate::driver::{OneWireDriver, bit_low_width};
use crate::registers::{SearchIteration, SearchRegistry, SearchResult};
use crate::timings::{READ_LOW_US, SAMPLE_OFFSET_US, SLOT_PERIOD_US};
use crate::traits::PulseGenerator;
use crate::{ONEWIRE_SEARCH_ROM_CMD, OneWireCrc, OneWireResult, RomCode};

/// Branch marker value naming the root of the device tree.
pub(crate) const TREE_ROOT: i8 = -1;

/// What the engine wants from the slot after the one just sampled.
pub(crate) enum SearchStep {
    /// Run another slot with this master low width.
    Continue(u16),
    /// The pass is over, let the current slot finish and tear down.
    Done,
}

/// Scratch state of one Search ROM enumeration.
///
/// The enumeration walks the binary tree of device addresses depth first,
/// one full 64-bit path per pass. Its frontier memory is exactly one
/// unvisited sibling: `last_zero_branch` remembers the deepest bit position
/// where the running pass took the 0 side of a fork while the 1 side also
/// answered, `prev_zero_branch` carries that marker into the next pass, and
/// `prev_path` is the previously discovered ROM used to retrace the walk
/// down to the fork being resolved.
pub(crate) struct SearchRom {
    pub(crate) reg: SearchRegistry,
    /// ROM code currently being assembled.
    pub(crate) rom: RomCode,
    /// ROM code discovered by the previous pass.
    pub(crate) prev_path: RomCode,
    pub(crate) last_zero_branch: i8,
    pub(crate) prev_zero_branch: i8,
}

impl SearchRom {
    pub(crate) fn new() -> Self {
        Self {
            reg: SearchRegistry::new().with_single_device(true),
            rom: [0; 8],
            prev_path: [0; 8],
            last_zero_branch: TREE_ROOT,
            prev_zero_branch: TREE_ROOT,
        }
    }

    /// Clean start of a whole enumeration.
    pub(crate) fn start(&mut self) {
        self.reg = SearchRegistry::new().with_single_device(true);
        self.rom = [0; 8];
        self.prev_path = [0; 8];
        self.last_zero_branch = TREE_ROOT;
        self.prev_zero_branch = TREE_ROOT;
    }

    /// Rewind the per-pass fields, keeping the branch markers and the
    /// previous path.
    pub(crate) fn next_pass(&mut self) {
        self.reg.set_bit_step(0);
        self.reg.set_bit_buf(0);
        self.reg.set_rombit(0);
        self.reg.set_result(SearchResult::Success);
        self.reg.set_single_device(true);
        self.rom = [0; 8];
    }

    /// Advance the pass by one sampled slot.
    pub(crate) fn step(&mut self, level: bool) -> SearchStep {
        match self.reg.bit_step() {
            0 => {
                // direct probe: remaining devices drive their true bit
                self.reg.set_bit_buf(level as u8);
                self.reg.set_bit_step(1);
                SearchStep::Continue(READ_LOW_US)
            }
            1 => {
                // complement probe
                let probes = self.reg.bit_buf() | (level as u8) << 1;
                self.reg.set_bit_buf(probes);
                if probes == 0b11 {
                    // nobody answered this bit
                    self.reg.set_result(SearchResult::Error);
                    return SearchStep::Done;
                }
                self.reg.set_bit_step(2);
                let bit = match probes {
                    // the wired-AND bus is dominant zero: a released line on
                    // the direct probe means every remaining device carries 1
                    0b01 => true,
                    0b10 => false,
                    _ => self.branch_decision(),
                };
                if bit {
                    let rombit = self.reg.rombit() as usize;
                    self.rom[rombit / 8] |= 1 << (rombit % 8);
                }
                SearchStep::Continue(bit_low_width(u8::from(bit)))
            }
            _ => {
                // decision written, devices on the other branch dropped off
                let next = self.reg.rombit() + 1;
                self.reg.set_rombit(next);
                self.reg.set_bit_step(0);
                self.reg.set_bit_buf(0);
                if next == 64 {
                    SearchStep::Done
                } else {
                    SearchStep::Continue(READ_LOW_US)
                }
            }
        }
    }

    /// Pick a side at a fork where both bit values answered.
    fn branch_decision(&mut self) -> bool {
        self.reg.set_single_device(false);
        let rombit = i16::from(self.reg.rombit());
        if rombit < i16::from(self.prev_zero_branch) {
            // retrace the previous pass through an already known fork
            let bit = (self.prev_path[(rombit / 8) as usize] >> (rombit % 8)) & 0x1 != 0;
            if !bit {
                self.last_zero_branch = rombit as i8;
            }
            bit
        } else if rombit == i16::from(self.prev_zero_branch) {
            // the fork this pass was steered to resolve, turn to the 1 side
            self.prev_zero_branch = TREE_ROOT;
            true
        } else {
            // a fresh fork, take the 0 side and keep its 1 side for later
            self.last_zero_branch = rombit as i8;
            false
        }
    }

    /// Validate the assembled ROM and rotate the branch markers.
    pub(crate) fn finish_pass(&mut self) -> SearchResult {
        if self.reg.result() == SearchResult::Error {
            return SearchResult::Error;
        }
        if self.rom[0] == 0 || !OneWireCrc::validate(&self.rom) {
            // a zero family byte means a stuck line walked the all-zero path
            self.reg.set_result(SearchResult::Error);
            return SearchResult::Error;
        }
        self.prev_path = self.rom;
        let outcome = if self.reg.single_device() || self.last_zero_branch == TREE_ROOT {
            SearchResult::Last
        } else {
            SearchResult::Success
        };
        self.reg.set_result(outcome);
        self.prev_zero_branch = self.last_zero_branch;
        self.last_zero_branch = TREE_ROOT;
        outcome
    }
}

impl<B: PulseGenerator, D: DelayNs> OneWireDriver<B, D> {
    /// Enumerates the bus, writing each discovered ROM code into `result`.
    ///
    /// Runs Search ROM passes until the device tree is exhausted, a pass
    /// fails, the bus stops answering resets, or `result` is full, and
    /// returns the number of codes written. Codes already written stay valid
    /// when the enumeration ends early; a failed pass is not an `Err`, the
    /// caller sees it as a shorter count. Panics if the driver is not
    /// started or `result` is empty or longer than 255 entries.
    pub fn search_rom(&mut self, result: &mut [RomCode]) -> OneWireResult<usize, B::Error> {
        let _ = self.op_config();
        assert!(!result.is_empty(), "zero length buffer");
        assert!(result.len() <= u8::MAX as usize, "result buffer too large");
        self.search.start();
        loop {
            self.search.next_pass();
            if !self.reset()? {
                break;
            }
            self.write(&[ONEWIRE_SEARCH_ROM_CMD], 0)?;
            self.run_search_pass()?;
            match self.search.finish_pass() {
                SearchResult::Error => break,
                outcome => {
                    let found = self.search.reg.devices_found() as usize;
                    if found == result.len() {
                        // a code was discovered but the caller is out of room
                        break;
                    }
                    result[found] = self.search.rom;
                    self.search.reg.set_devices_found(found as u8 + 1);
                    if outcome == SearchResult::Last {
                        break;
                    }
                    self.search.reg.set_iteration(SearchIteration::Next);
                }
            }
        }
        Ok(self.search.reg.devices_found() as usize)
    }

    /// One pass of triplet slots following the reset and command byte.
    fn run_search_pass(&mut self) -> OneWireResult<(), B::Error> {
        let cfg = self.op_config();
        self.reg.set_final_timeslot(false);
        self.pulses.set_period(SLOT_PERIOD_US)?;
        self.pulses.set_channel(cfg.master_channel, READ_LOW_US)?;
        self.pulses
            .set_channel(cfg.sample_channel, SAMPLE_OFFSET_US)?;
        self.pulses.start()?;
        loop {
            let event = self.pulses.next_event()?;
            if event.channel != cfg.sample_channel {
                continue;
            }
            if self.reg.final_timeslot() {
                break;
            }
            match self.search.step(event.level) {
                SearchStep::Continue(width) => {
                    self.pulses.set_channel(cfg.master_channel, width)?;
                }
                SearchStep::Done => {
                    self.pulses.set_channel(cfg.master_channel, 0)?;
                    self.reg.set_final_timeslot(true);
                }
            }
        }
        self.pulses.stop()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{SearchRom, SearchStep, TREE_ROOT};
    use crate::OneWireCrc;
    use crate::registers::SearchResult;
    use crate::timings::WRITE_ONE_LOW_US;

    fn rom_with_crc(family: u8, serial: [u8; 6]) -> [u8; 8] {
        let mut rom = [family, 0, 0, 0, 0, 0, 0, 0];
        rom[1..7].copy_from_slice(&serial);
        rom[7] = OneWireCrc::compute(&rom[..7]);
        rom
    }

    fn rom_bit(rom: &[u8; 8], idx: usize) -> bool {
        (rom[idx / 8] >> (idx % 8)) & 0x1 != 0
    }

    /// Run one pass against ideal wired-AND devices, mirroring the
    /// arbitration drop-out a real bus performs.
    fn run_pass(sr: &mut SearchRom, roms: &[[u8; 8]], active: &mut u8) -> SearchResult {
        sr.next_pass();
        *active = (1u8 << roms.len()) - 1;
        loop {
            let rombit = sr.reg.rombit() as usize;
            let mut direct = true;
            let mut complement = true;
            for (i, rom) in roms.iter().enumerate() {
                if *active & (1 << i) == 0 {
                    continue;
                }
                if rom_bit(rom, rombit) {
                    complement = false;
                } else {
                    direct = false;
                }
            }
            match sr.step(direct) {
                SearchStep::Continue(_) => {}
                SearchStep::Done => break,
            }
            let written = match sr.step(complement) {
                SearchStep::Continue(width) => width == WRITE_ONE_LOW_US,
                SearchStep::Done => break,
            };
            for (i, rom) in roms.iter().enumerate() {
                if *active & (1 << i) != 0 && rom_bit(rom, rombit) != written {
                    *active &= !(1 << i);
                }
            }
            match sr.step(true) {
                SearchStep::Continue(_) => {}
                SearchStep::Done => break,
            }
        }
        sr.finish_pass()
    }

    #[test]
    fn single_device_pass_is_last() {
        let rom = rom_with_crc(0x28, [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        let mut sr = SearchRom::new();
        let mut active = 0;
        sr.start();
        assert_eq!(run_pass(&mut sr, &[rom], &mut active), SearchResult::Last);
        assert_eq!(sr.rom, rom);
        assert!(sr.reg.single_device());
        assert_eq!(sr.last_zero_branch, TREE_ROOT);
    }

    #[test]
    fn unanswered_probe_pair_fails_the_pass() {
        let mut sr = SearchRom::new();
        sr.start();
        sr.next_pass();
        assert!(matches!(sr.step(true), SearchStep::Continue(_)));
        assert!(matches!(sr.step(true), SearchStep::Done));
        assert_eq!(sr.finish_pass(), SearchResult::Error);
        assert_eq!(sr.reg.rombit(), 0);
    }

    #[test]
    fn two_devices_resolve_across_two_passes() {
        // serials diverge first at ROM bit 8
        let zero_side = rom_with_crc(0x28, [0x02, 0x11, 0x22, 0x33, 0x44, 0x55]);
        let one_side = rom_with_crc(0x28, [0x03, 0x11, 0x22, 0x33, 0x44, 0x55]);
        let roms = [one_side, zero_side];
        let mut sr = SearchRom::new();
        let mut active = 0;
        sr.start();

        assert_eq!(
            run_pass(&mut sr, &roms, &mut active),
            SearchResult::Success
        );
        assert_eq!(sr.rom, zero_side);
        assert!(!sr.reg.single_device());
        assert_eq!(sr.prev_zero_branch, 8);

        assert_eq!(run_pass(&mut sr, &roms, &mut active), SearchResult::Last);
        assert_eq!(sr.rom, one_side);
        assert_eq!(sr.prev_zero_branch, TREE_ROOT);
    }

    #[test]
    fn corrupt_rom_fails_validation() {
        let mut rom = rom_with_crc(0x28, [1, 2, 3, 4, 5, 6]);
        rom[7] ^= 0x01;
        let mut sr = SearchRom::new();
        let mut active = 0;
        sr.start();
        assert_eq!(run_pass(&mut sr, &[rom], &mut active), SearchResult::Error);
    }
}
