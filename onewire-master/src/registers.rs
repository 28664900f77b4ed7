use bitfield_struct::bitfield;

/// Driver state machine possible states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DriverState {
    /// Not initialized.
    #[default]
    Uninit = 0,
    /// Stopped; no bus operation may run.
    Stop = 1,
    /// Ready for bus operations.
    Ready = 2,
    /// Ready, with the strong pull-up asserted after a powered write.
    PullUp = 3,
}

impl DriverState {
    const fn into_bits(self) -> u8 {
        self as _
    }

    const fn from_bits(value: u8) -> Self {
        match value {
            0 => Self::Uninit,
            1 => Self::Stop,
            2 => Self::Ready,
            _ => Self::PullUp,
        }
    }
}

/// Search ROM pass outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum SearchResult {
    /// A ROM code was discovered and unexplored branches remain.
    #[default]
    Success = 0,
    /// A ROM code was discovered and the device tree is exhausted.
    Last = 1,
    /// The pass failed: no device answered a probe, the assembled code did
    /// not validate, or capacity ran out.
    Error = 2,
}

impl SearchResult {
    const fn into_bits(self) -> u8 {
        self as _
    }

    const fn from_bits(value: u8) -> Self {
        match value {
            0 => Self::Success,
            1 => Self::Last,
            _ => Self::Error,
        }
    }
}

/// Search ROM pass kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum SearchIteration {
    /// First pass of an enumeration.
    #[default]
    First = 0,
    /// Any following pass, steered by the previous pass's branch markers.
    Next = 1,
}

impl SearchIteration {
    const fn into_bits(self) -> u8 {
        self as _
    }

    const fn from_bits(value: u8) -> Self {
        match value {
            0 => Self::First,
            _ => Self::Next,
        }
    }
}

/// Driver registry. Small per-operation variables packed into a single
/// machine word.
#[bitfield(u32)]
pub struct OneWireRegistry {
    /// Asks the terminal event of the running write to assert the strong
    /// pull-up.
    pub need_pullup: bool,
    /// At least one device answered the last reset with a presence pulse.
    pub slave_present: bool,
    /// Driver state machine state.
    #[bits(2)]
    pub state: DriverState,
    /// Bit cursor within the byte currently on the wire. Holds 8 at a byte
    /// boundary.
    #[bits(4)]
    pub bit: u8,
    /// The last slot of the operation is running; hold the engine until its
    /// full duration elapses.
    pub final_timeslot: bool,
    /// Bytes remaining in the current transaction.
    #[bits(16)]
    pub bytes: u16,
    #[bits(7)]
    __: u8,
}

/// Search ROM registry. Scratch variables of one enumeration, each bounded
/// to its minimum width.
#[bitfield(u32)]
pub struct SearchRegistry {
    /// No conflict seen so far in this pass; a lone device is on the bus.
    pub single_device: bool,
    /// Pass kind.
    #[bits(1)]
    pub iteration: SearchIteration,
    /// Outcome of the pass.
    #[bits(2)]
    pub result: SearchResult,
    /// Phase of the current bit probe: 0 direct read, 1 complement read,
    /// 2 decision write.
    #[bits(2)]
    pub bit_step: u8,
    /// The two probe levels of the current bit, direct in bit 0, complement
    /// in bit 1.
    #[bits(2)]
    pub bit_buf: u8,
    /// ROM bit currently being resolved. Holds 64 when a pass completes.
    #[bits(7)]
    pub rombit: u8,
    /// Devices discovered so far in this enumeration.
    #[bits(8)]
    pub devices_found: u8,
    #[bits(9)]
    __: u16,
}
