//! 1-Wire slot timings, in microseconds.
//!
//! Standard-speed figures. Every time slot is one pulse-generator period: the
//! master holds the line low for the programmed channel width, the line then
//! recovers to the pull-up level for the rest of the period. The sample
//! channel fires partway into the slot, after a write-1/read pulse has been
//! released but before a write-0 pulse ends.

/// Low time encoding a 0 bit.
pub const WRITE_ZERO_LOW_US: u16 = 60;

/// Low time encoding a 1 bit. The same short pulse opens a read slot.
pub const WRITE_ONE_LOW_US: u16 = 6;

/// Low time opening a read slot.
pub const READ_LOW_US: u16 = WRITE_ONE_LOW_US;

/// Offset of the sample point into a read slot.
pub const SAMPLE_OFFSET_US: u16 = 15;

/// Bus recovery time between slots.
pub const RECOVERY_US: u16 = 10;

/// Total duration of one data slot.
pub const SLOT_PERIOD_US: u16 = WRITE_ZERO_LOW_US + RECOVERY_US;

/// Reset pulse low time.
pub const RESET_LOW_US: u16 = 480;

/// Offset of the presence sample into a reset slot.
pub const RESET_SAMPLE_OFFSET_US: u16 = 550;

/// Total duration of a reset slot.
pub const RESET_PERIOD_US: u16 = 960;
