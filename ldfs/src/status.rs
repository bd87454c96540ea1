//! Integer status convention for callers that cannot take a `Result`, such as a
//! command shell. Successful reads and writes may return 0, so compare against
//! [`STATUS_ERROR`] explicitly.

use std::fmt::Display;

use log::debug;

pub const STATUS_SUCCESS: i64 = 1;
pub const STATUS_ERROR: i64 = -3;

pub trait IntoStatus {
    fn into_status(self) -> i64;
}

impl<E: Display> IntoStatus for Result<(), E> {
    fn into_status(self) -> i64 {
        match self {
            Ok(()) => STATUS_SUCCESS,
            Err(e) => {
                debug!("operation failed: {}", e);
                STATUS_ERROR
            }
        }
    }
}

/// Slot indices and byte counts pass through unchanged.
impl<E: Display> IntoStatus for Result<usize, E> {
    fn into_status(self) -> i64 {
        match self {
            Ok(n) => n as i64,
            Err(e) => {
                debug!("operation failed: {}", e);
                STATUS_ERROR
            }
        }
    }
}
