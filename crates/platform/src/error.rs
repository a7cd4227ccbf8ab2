//! Crate-wide status taxonomy.
//!
//! Every public operation in the HAL collapses its low-level cause (errno,
//! NACK vs. clock-stretch, codec XRUN) into one of these six variants. The
//! distinct cause is logged through `tracing` at the point it is detected;
//! callers branch only on the coarse status.

use thiserror::Error;

/// Coarse failure status returned by every HAL operation.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HalError {
    /// Bad pin, bus, length or range argument.
    #[error("invalid arguments")]
    InvalidArgs,
    /// Operation attempted before the owning peripheral was initialized.
    #[error("peripheral not initialized")]
    NotInitialized,
    /// `init` called twice without an intervening `deinit`.
    #[error("peripheral already initialized")]
    AlreadyInitialized,
    /// A background worker could not be spawned.
    #[error("worker thread failure")]
    ThreadFailure,
    /// Device file could not be opened or the register window could not be mapped.
    #[error("memory access failure")]
    MemAccessFailure,
    /// Generic runtime failure (I2C NACK, clock-stretch timeout, codec error).
    #[error("operation failed")]
    Failed,
}

/// Result alias used throughout the HAL.
pub type HalResult<T> = Result<T, HalError>;

impl HalError {
    /// Integer status code for callers that speak the legacy C-style
    /// convention (`0` is success, failures are negative).
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::InvalidArgs => -1,
            Self::NotInitialized => -2,
            Self::AlreadyInitialized => -3,
            Self::ThreadFailure => -4,
            Self::MemAccessFailure => -5,
            Self::Failed => -6,
        }
    }

    /// Map a legacy status code back to a result (`0` → `Ok(())`).
    ///
    /// Unknown codes collapse to [`HalError::Failed`].
    pub const fn from_code(code: i32) -> HalResult<()> {
        match code {
            0 => Ok(()),
            -1 => Err(Self::InvalidArgs),
            -2 => Err(Self::NotInitialized),
            -3 => Err(Self::AlreadyInitialized),
            -4 => Err(Self::ThreadFailure),
            -5 => Err(Self::MemAccessFailure),
            _ => Err(Self::Failed),
        }
    }
}

/// Status code for a whole result, `0` on success.
#[must_use]
pub fn status_code<T>(result: &HalResult<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => e.code(),
    }
}

impl embedded_hal::i2c::Error for HalError {
    fn kind(&self) -> embedded_hal::i2c::ErrorKind {
        use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};
        match self {
            // NACK and clock-stretch are deliberately indistinguishable here.
            Self::Failed => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Unknown),
            _ => ErrorKind::Other,
        }
    }
}

impl embedded_hal::digital::Error for HalError {
    fn kind(&self) -> embedded_hal::digital::ErrorKind {
        embedded_hal::digital::ErrorKind::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for e in [
            HalError::InvalidArgs,
            HalError::NotInitialized,
            HalError::AlreadyInitialized,
            HalError::ThreadFailure,
            HalError::MemAccessFailure,
            HalError::Failed,
        ] {
            assert_eq!(HalError::from_code(e.code()), Err(e));
        }
        assert_eq!(HalError::from_code(0), Ok(()));
    }

    #[test]
    fn unknown_code_is_failed() {
        assert_eq!(HalError::from_code(-42), Err(HalError::Failed));
    }

    #[test]
    fn status_code_of_ok_is_zero() {
        assert_eq!(status_code(&Ok::<u8, HalError>(1)), 0);
        assert_eq!(status_code::<()>(&Err(HalError::NotInitialized)), -2);
    }

    #[test]
    fn display_is_lowercase_message() {
        assert_eq!(HalError::Failed.to_string(), "operation failed");
    }
}
