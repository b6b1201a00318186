//! Error returned by providers and converted to a status at the
//! dispatch boundary.

use userfs_types::{NtStatus, WireError};

/// Error type of every provider operation.
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    /// The operation isn't implemented by this provider.
    #[error("operation not supported")]
    NotSupported,

    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),

    #[error("out of resources")]
    ResourceExhaustion,

    #[error("no such file")]
    NotFound,

    #[error("path not found")]
    PathNotFound,

    #[error("invalid handle")]
    InvalidHandle,

    #[error("not a reparse point")]
    NotAReparsePoint,

    #[error("too many reparse points while resolving path")]
    ReparseHopLimit,

    #[error("reparse tag 0x{0:08x} can't be resolved")]
    ForeignReparseTag(u32),

    #[error("invalid reparse data")]
    InvalidReparseData,

    #[error("reparse tag mismatch")]
    ReparseTagMismatch,

    #[error("reparse GUID mismatch")]
    ReparseGuidMismatch,

    #[error("I/O error")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("status {0}")]
    Status(NtStatus),
}

/// Result type of provider operations.
pub type FsResult<T> = Result<T, FsError>;

impl FsError {
    /// Status reported to the host for this error.
    pub fn status(&self) -> NtStatus {
        match self {
            FsError::NotSupported => NtStatus::INVALID_DEVICE_REQUEST,
            FsError::InvalidRequest(_) => NtStatus::INVALID_PARAMETER,
            FsError::ResourceExhaustion => NtStatus::INSUFFICIENT_RESOURCES,
            FsError::NotFound => NtStatus::OBJECT_NAME_NOT_FOUND,
            FsError::PathNotFound => NtStatus::OBJECT_PATH_NOT_FOUND,
            FsError::InvalidHandle => NtStatus::INVALID_HANDLE,
            FsError::NotAReparsePoint => NtStatus::NOT_A_REPARSE_POINT,
            FsError::ReparseHopLimit => NtStatus::REPARSE_POINT_NOT_RESOLVED,
            FsError::ForeignReparseTag(_) => NtStatus::REPARSE_POINT_NOT_RESOLVED,
            FsError::InvalidReparseData => NtStatus::IO_REPARSE_DATA_INVALID,
            FsError::ReparseTagMismatch => NtStatus::IO_REPARSE_TAG_MISMATCH,
            FsError::ReparseGuidMismatch => NtStatus::REPARSE_ATTRIBUTE_CONFLICT,
            FsError::Io(err) => io_status(err.kind()),
            FsError::Wire(_) => NtStatus::INVALID_PARAMETER,
            FsError::Status(status) => *status,
        }
    }

    /// Convert into a status, logging the error.
    pub fn log_and_convert(self) -> NtStatus {
        let status = self.status();

        log::debug!("operation error: {self:?} -> {status}");

        status
    }
}

impl From<NtStatus> for FsError {
    fn from(value: NtStatus) -> Self {
        FsError::Status(value)
    }
}

impl From<std::collections::TryReserveError> for FsError {
    fn from(_: std::collections::TryReserveError) -> Self {
        FsError::ResourceExhaustion
    }
}

/// Convert a Rust [std::io::ErrorKind] into a status.
fn io_status(kind: std::io::ErrorKind) -> NtStatus {
    use std::io::ErrorKind;

    match kind {
        ErrorKind::NotFound => NtStatus::OBJECT_NAME_NOT_FOUND,
        ErrorKind::PermissionDenied => NtStatus::ACCESS_DENIED,
        ErrorKind::AlreadyExists => NtStatus::OBJECT_NAME_COLLISION,
        ErrorKind::NotADirectory => NtStatus::NOT_A_DIRECTORY,
        ErrorKind::IsADirectory => NtStatus::FILE_IS_A_DIRECTORY,
        ErrorKind::DirectoryNotEmpty => NtStatus::DIRECTORY_NOT_EMPTY,
        ErrorKind::ReadOnlyFilesystem => NtStatus::MEDIA_WRITE_PROTECTED,
        ErrorKind::InvalidInput => NtStatus::INVALID_PARAMETER,
        ErrorKind::InvalidData => NtStatus::INVALID_PARAMETER,
        ErrorKind::InvalidFilename => NtStatus::OBJECT_NAME_INVALID,
        ErrorKind::TimedOut => NtStatus::IO_TIMEOUT,
        ErrorKind::StorageFull => NtStatus::DISK_FULL,
        ErrorKind::QuotaExceeded => NtStatus::DISK_FULL,
        ErrorKind::ResourceBusy => NtStatus::SHARING_VIOLATION,
        ErrorKind::UnexpectedEof => NtStatus::END_OF_FILE,
        ErrorKind::Interrupted => NtStatus::CANCELLED,
        ErrorKind::Unsupported => NtStatus::NOT_SUPPORTED,
        ErrorKind::OutOfMemory => NtStatus::INSUFFICIENT_RESOURCES,
        _ => NtStatus::UNEXPECTED_IO_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use userfs_types::StatusClass;

    #[test]
    fn taxonomy() {
        assert_eq!(StatusClass::NotSupported, FsError::NotSupported.status().class());
        assert_eq!(
            StatusClass::InvalidRequest,
            FsError::InvalidRequest("bad").status().class()
        );
        assert_eq!(
            StatusClass::ResourceExhaustion,
            FsError::ResourceExhaustion.status().class()
        );
        assert_eq!(
            StatusClass::ReparseChain,
            FsError::ReparseHopLimit.status().class()
        );
        assert_eq!(
            StatusClass::ReparseChain,
            FsError::ForeignReparseTag(0x1234).status().class()
        );
    }

    #[test]
    fn io_errors() {
        let err = FsError::from(std::io::Error::from(std::io::ErrorKind::NotFound));
        assert_eq!(NtStatus::OBJECT_NAME_NOT_FOUND, err.status());

        let err = FsError::from(std::io::Error::from(std::io::ErrorKind::Other));
        assert_eq!(NtStatus::UNEXPECTED_IO_ERROR, err.log_and_convert());
    }

    #[test]
    fn raw_status() {
        assert_eq!(
            NtStatus::DELETE_PENDING,
            FsError::from(NtStatus::DELETE_PENDING).status()
        );
    }
}
