//! Containment of uncontrolled failures in provider code.
//!
//! Provider code runs on worker threads shared by every open file of a
//! mount. A panic in one operation must not take the thread or the
//! process down; it is caught at the boundary and reported as a fixed
//! status instead.

use crate::error::FsResult;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use userfs_types::NtStatus;

/// An uncontrolled failure caught at a boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{what} panicked: {message}")]
pub struct Fault {
    pub what: String,
    pub message: String,
}

/// Run `f`, catching any panic.
pub fn catch<T>(what: &str, f: impl FnOnce() -> T) -> Result<T, Fault> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let fault = Fault {
            what: what.to_string(),
            message: panic_message(payload.as_ref()).to_string(),
        };
        log::error!("{fault}");

        fault
    })
}

/// Run the provider operation `f` and convert its outcome to a status.
///
/// Errors are converted with [crate::FsError::log_and_convert] and a
/// panic becomes `fault_status`.
pub fn contain<T>(
    what: &str,
    fault_status: NtStatus,
    f: impl FnOnce() -> FsResult<T>,
) -> Result<T, NtStatus> {
    match catch(what, f) {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(err)) => Err(err.log_and_convert()),
        Err(_) => Err(fault_status),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FsError;

    #[test]
    fn passes_through_results() {
        assert_eq!(Ok(3), contain("op", NtStatus::UNEXPECTED_IO_ERROR, || Ok(3)));
        assert_eq!(
            Err(NtStatus::INVALID_DEVICE_REQUEST),
            contain::<()>("op", NtStatus::UNEXPECTED_IO_ERROR, || Err(
                FsError::NotSupported
            ))
        );
    }

    #[test]
    fn contains_panics() {
        let _ = env_logger::try_init();

        assert_eq!(
            Err(NtStatus::UNEXPECTED_IO_ERROR),
            contain::<()>("op", NtStatus::UNEXPECTED_IO_ERROR, || panic!("boom"))
        );
        assert_eq!(
            Err(NtStatus::SERVICE_FAULT),
            contain::<()>("op", NtStatus::SERVICE_FAULT, || panic!(
                "boom {}",
                42
            ))
        );
    }

    #[test]
    fn fault_message() {
        let fault = catch("Read", || -> u32 { panic!("bad {}", "read") }).unwrap_err();
        assert_eq!("Read", fault.what);
        assert_eq!("bad read", fault.message);
        assert_eq!("Read panicked: bad read", fault.to_string());

        let fault = catch("Close", || -> u32 { std::panic::panic_any(12) }).unwrap_err();
        assert_eq!("unknown panic payload", fault.message);
    }
}
