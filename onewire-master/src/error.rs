/// 1-Wire driver error type.
///
/// Bus-level conditions are not errors in this driver: a reset that finds no
/// device reports `false`, and a failed search pass ends the enumeration with
/// the partial device count. What remains is the underlying timing hardware
/// failing.
#[derive(Debug)]
pub enum OneWireError<E> {
    /// The pulse generator reported a failure.
    Pulse(E),
}

impl<E> From<E> for OneWireError<E> {
    fn from(other: E) -> Self {
        Self::Pulse(other)
    }
}
