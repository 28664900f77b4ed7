/// A timing event produced by the pulse generator.
///
/// One event is delivered for every enabled channel in every period, in time
/// order. The line level is latched at the compare instant by the interrupt
/// side of the implementation, so the driver observes the bus exactly at the
/// sample point even though it processes the event later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseEvent {
    /// Channel whose compare point elapsed.
    pub channel: usize,
    /// Bus line level latched at the compare instant.
    pub level: bool,
}

/// The periodic pulse generator driving the bus line.
///
/// This is the hardware seam of the driver: a timer producing one time slot
/// per period. One channel (the "master" channel) drives the line low for
/// its programmed width at the start of each period; a second channel marks
/// the sample point partway into the slot. Each enabled channel delivers a
/// [PulseEvent] when its compare point elapses.
///
/// ## Width semantics
///
/// Channel widths reprogrammed while the generator runs take effect from the
/// next period, never the current one. A width of zero keeps the channel's
/// compare event but suppresses the electrical pulse; this is how the driver
/// lets the final time slot of an operation run to its full duration before
/// tearing it down. [disable_channel](PulseGenerator::disable_channel) stops
/// both the pulse and the event.
///
/// ## Concurrency contract
///
/// [next_event](PulseGenerator::next_event) is the suspend point: it parks
/// the calling thread until the interrupt side hands over the next event.
/// The interrupt side must only latch the line level and queue the event;
/// all protocol state lives in the driver and is mutated in thread context
/// strictly between suspensions. Events must be delivered in the order the
/// compare points elapse, and the generator is never reentered for the same
/// bus.
pub trait PulseGenerator {
    /// The error type reported by the timing hardware.
    type Error;

    /// Set the slot period applied from the next (re)start.
    fn set_period(&mut self, period_us: u16) -> Result<(), Self::Error>;

    /// Program a channel's compare point: the low width for the master
    /// channel, the sample offset for the sample channel.
    fn set_channel(&mut self, channel: usize, width_us: u16) -> Result<(), Self::Error>;

    /// Stop a channel's pulse and event delivery.
    fn disable_channel(&mut self, channel: usize) -> Result<(), Self::Error>;

    /// Start generating slots with the current configuration.
    fn start(&mut self) -> Result<(), Self::Error>;

    /// Stop the generator and drop any undelivered events. Stopping an idle
    /// generator is a no-op.
    fn stop(&mut self) -> Result<(), Self::Error>;

    /// Park the calling thread until the next timing event.
    fn next_event(&mut self) -> Result<PulseEvent, Self::Error>;

    /// Whether a strong pull-up circuit is wired to this generator.
    fn has_strong_pullup(&self) -> bool {
        false
    }

    /// Assert the strong pull-up. Called from the terminal event of a
    /// powered write; must not block.
    fn pullup_assert(&mut self) {}

    /// Release the strong pull-up.
    fn pullup_release(&mut self) {}
}
