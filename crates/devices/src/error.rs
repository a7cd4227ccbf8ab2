//! Driver error type.

use thiserror::Error;

/// Failure from a collaborator driver, generic over the bus error `E`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DriverError<E> {
    /// The underlying bus or pin reported an error.
    #[error("bus error: {0:?}")]
    Bus(E),
    /// Argument outside the device's accepted range.
    #[error("invalid arguments")]
    InvalidArgs,
    /// Operation needs `init` first.
    #[error("device not initialized")]
    NotInitialized,
    /// The device answered with an unexpected identity.
    #[error("unexpected device id {0:#04x}")]
    UnexpectedId(u8),
}

/// Result alias for driver operations.
pub type DriverResult<T, E> = Result<T, DriverError<E>>;
