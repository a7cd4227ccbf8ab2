//! Drivers for the peripherals wired to the CM4 board.
//!
//! Everything here is generic over `embedded-hal` traits, so the same
//! driver runs on `platform::i2c` bus handles, the kernel `/dev/i2c-N`
//! backend, or an `embedded-hal-mock` in tests.
//!
//! | Module        | Part      | Bus / pin          | Address |
//! |---------------|-----------|--------------------|---------|
//! | [`pca9685`]   | PCA9685   | I2C bus 2          | 0x47    |
//! | [`servo`]     | servos    | PCA9685 ch 0-3     |         |
//! | [`ina219`]    | INA219    | I2C bus 2          | 0x45    |
//! | [`max30102`]  | MAX30102  | I2C + INT on GPIO 14 | 0x57  |
//! | [`blinky`]    | LED       | GPIO 17            |         |

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(missing_docs)]
#![allow(clippy::missing_errors_doc)]

pub mod blinky;
pub mod error;
pub mod ina219;
pub mod max30102;
pub mod pca9685;
pub mod servo;

pub use blinky::Blinky;
pub use error::{DriverError, DriverResult};
pub use ina219::Ina219;
pub use max30102::{InterruptWatcher, Max30102, Sample};
pub use pca9685::Pca9685;
pub use servo::ServoBank;
