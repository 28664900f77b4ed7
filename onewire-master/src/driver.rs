use embedded_hal::delay::DelayNs;

use crate::OneWireResult;
use crate::registers::{DriverState, OneWireRegistry};
use crate::search::SearchRom;
use crate::timings::{
    READ_LOW_US, RESET_LOW_US, RESET_PERIOD_US, RESET_SAMPLE_OFFSET_US, SAMPLE_OFFSET_US,
    SLOT_PERIOD_US, WRITE_ONE_LOW_US, WRITE_ZERO_LOW_US,
};
use crate::traits::PulseGenerator;

/// Immutable bus configuration handed to [OneWireDriver::start].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OneWireConfig {
    /// Pulse generator channel producing the master low pulses.
    pub master_channel: usize,
    /// Pulse generator channel marking the in-slot sample point.
    pub sample_channel: usize,
    /// The bus has a strong pull-up circuit; powered writes are allowed.
    pub strong_pullup: bool,
}

/// A 1-Wire bus master.
///
/// Owns a [PulseGenerator] producing the slot timing and a
/// [DelayNs](embedded_hal::delay::DelayNs) timer for the strong pull-up hold
/// phase. One instance drives one bus; operations take `&mut self` and run to
/// completion, so they are serialized by construction.
pub struct OneWireDriver<B, D> {
    pub(crate) pulses: B,
    pub(crate) delay: D,
    pub(crate) config: Option<OneWireConfig>,
    pub(crate) reg: OneWireRegistry,
    pub(crate) search: SearchRom,
}

/// Low time of a write slot carrying `bit`.
pub(crate) fn bit_low_width(bit: u8) -> u16 {
    if bit != 0 { WRITE_ONE_LOW_US } else { WRITE_ZERO_LOW_US }
}

impl<B, D> OneWireDriver<B, D> {
    /// Creates a stopped driver around the given collaborators.
    pub fn new(pulses: B, delay: D) -> Self {
        Self {
            pulses,
            delay,
            config: None,
            reg: OneWireRegistry::new().with_state(DriverState::Stop),
            search: SearchRom::new(),
        }
    }

    /// Current driver state.
    pub fn state(&self) -> DriverState {
        self.reg.state()
    }

    /// Whether the last reset saw a presence pulse.
    pub fn slave_present(&self) -> bool {
        self.reg.slave_present()
    }

    /// Tears the driver down and returns its collaborators.
    pub fn release(self) -> (B, D) {
        (self.pulses, self.delay)
    }
}

impl<B: PulseGenerator, D: DelayNs> OneWireDriver<B, D> {
    /// Activates the driver with the given configuration.
    ///
    /// Panics if the driver is mid-operation, if both roles share one pulse
    /// channel, or if a strong pull-up is requested that the generator does
    /// not provide.
    pub fn start(&mut self, config: OneWireConfig) {
        assert!(
            matches!(self.reg.state(), DriverState::Stop | DriverState::Ready),
            "invalid driver state"
        );
        assert!(
            config.master_channel != config.sample_channel,
            "pulse channels must be distinct"
        );
        if config.strong_pullup {
            assert!(
                self.pulses.has_strong_pullup(),
                "strong pull-up not available"
            );
        }
        self.config = Some(config);
        self.reg.set_state(DriverState::Ready);
    }

    /// Deactivates the driver, releasing the pulse generator.
    pub fn stop(&mut self) -> OneWireResult<(), B::Error> {
        self.pulses.stop()?;
        self.config = None;
        self.reg.set_slave_present(false);
        self.reg.set_state(DriverState::Stop);
        Ok(())
    }

    /// Checks the operation precondition and returns the active config.
    pub(crate) fn op_config(&self) -> OneWireConfig {
        assert!(
            self.reg.state() == DriverState::Ready,
            "invalid driver state"
        );
        self.config.expect("ready driver carries a config")
    }

    /// Drives a reset pulse and samples for a slave presence pulse.
    ///
    /// Returns whether at least one device answered. An empty bus is a valid
    /// bus state, not a failure. Panics if the driver is not started.
    pub fn reset(&mut self) -> OneWireResult<bool, B::Error> {
        let cfg = self.op_config();
        self.reg.set_slave_present(false);
        self.reg.set_bit(0);
        self.reg.set_final_timeslot(false);
        self.pulses.set_period(RESET_PERIOD_US)?;
        self.pulses.set_channel(cfg.master_channel, RESET_LOW_US)?;
        self.pulses
            .set_channel(cfg.sample_channel, RESET_SAMPLE_OFFSET_US)?;
        self.pulses.start()?;
        loop {
            let event = self.pulses.next_event()?;
            if event.channel == cfg.master_channel {
                let periods = self.reg.bit() + 1;
                self.reg.set_bit(periods);
                if periods == 1 {
                    // one quiet period after the pulse, then tear down
                    self.pulses.set_channel(cfg.master_channel, 0)?;
                } else {
                    break;
                }
            } else if event.channel == cfg.sample_channel && self.reg.bit() == 1 && !event.level {
                // a slave holds the line low at the presence sample point
                self.reg.set_slave_present(true);
            }
        }
        self.pulses.stop()?;
        Ok(self.reg.slave_present())
    }

    /// Reads `rxbuf.len()` bytes from the bus, least significant bit first.
    ///
    /// Blocks until the last slot has run its full duration. Panics if the
    /// driver is not started or the buffer is empty.
    pub fn read(&mut self, rxbuf: &mut [u8]) -> OneWireResult<(), B::Error> {
        let cfg = self.op_config();
        assert!(!rxbuf.is_empty(), "zero length buffer");
        assert!(rxbuf.len() <= u16::MAX as usize, "transaction too long");
        rxbuf.fill(0);
        self.reg.set_bit(0);
        self.reg.set_bytes(rxbuf.len() as u16);
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
            let index = rxbuf.len() - self.reg.bytes() as usize;
            if event.level {
                rxbuf[index] |= 1 << self.reg.bit();
            }
            let bit = self.reg.bit() + 1;
            if bit < 8 {
                self.reg.set_bit(bit);
                continue;
            }
            self.reg.set_bit(0);
            let remaining = self.reg.bytes() - 1;
            self.reg.set_bytes(remaining);
            if remaining == 0 {
                // no further slot pulses, let the last slot finish
                self.pulses.set_channel(cfg.master_channel, 0)?;
                self.reg.set_final_timeslot(true);
            }
        }
        self.pulses.stop()?;
        Ok(())
    }

    /// Writes `txbuf` to the bus, least significant bit first per byte.
    ///
    /// With `pullup_us > 0` the strong pull-up is asserted right after the
    /// final slot, held for that many microseconds and released again;
    /// requesting it without [OneWireConfig::strong_pullup] is a panic.
    /// Blocks until the last slot (and the pull-up phase) has completed.
    pub fn write(&mut self, txbuf: &[u8], pullup_us: u32) -> OneWireResult<(), B::Error> {
        let cfg = self.op_config();
        assert!(!txbuf.is_empty(), "zero length buffer");
        assert!(txbuf.len() <= u16::MAX as usize, "transaction too long");
        if pullup_us > 0 {
            assert!(cfg.strong_pullup, "strong pull-up not configured");
            self.reg.set_need_pullup(true);
        }
        self.reg.set_bit(0);
        self.reg.set_bytes(txbuf.len() as u16);
        self.reg.set_final_timeslot(false);
        self.pulses.set_period(SLOT_PERIOD_US)?;
        self.pulses
            .set_channel(cfg.master_channel, bit_low_width(txbuf[0] & 0x1))?;
        self.pulses.disable_channel(cfg.sample_channel)?;
        self.pulses.start()?;
        loop {
            let event = self.pulses.next_event()?;
            if event.channel != cfg.master_channel {
                continue;
            }
            if self.reg.final_timeslot() {
                if self.reg.need_pullup() {
                    self.reg.set_need_pullup(false);
                    self.reg.set_state(DriverState::PullUp);
                    self.pulses.pullup_assert();
                }
                break;
            }
            let mut bit = self.reg.bit() + 1;
            let mut bytes = self.reg.bytes();
            if bit == 8 {
                bit = 0;
                bytes -= 1;
                self.reg.set_bytes(bytes);
            }
            self.reg.set_bit(bit);
            if bytes == 0 {
                self.pulses.set_channel(cfg.master_channel, 0)?;
                self.reg.set_final_timeslot(true);
            } else {
                let index = txbuf.len() - bytes as usize;
                self.pulses
                    .set_channel(cfg.master_channel, bit_low_width((txbuf[index] >> bit) & 0x1))?;
            }
        }
        self.pulses.stop()?;
        if self.reg.state() == DriverState::PullUp {
            // hold time runs in thread context, the generator is already idle
            self.delay.delay_us(pullup_us);
            self.pulses.pullup_release();
            self.reg.set_state(DriverState::Ready);
        }
        Ok(())
    }
}
