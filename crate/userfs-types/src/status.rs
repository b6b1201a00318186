use std::fmt;

/// Status word exchanged with the host for every operation.
///
/// The layout follows NT conventions: the two high bits carry the
/// severity, so any value with bit 31 set is a failure and anything
/// else (including informational codes such as [NtStatus::REPARSE])
/// counts as success.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NtStatus(pub u32);

impl NtStatus {
    pub const SUCCESS: NtStatus = NtStatus(0x0000_0000);
    pub const REPARSE: NtStatus = NtStatus(0x0000_0104);
    pub const BUFFER_OVERFLOW: NtStatus = NtStatus(0x8000_0005);
    pub const INVALID_HANDLE: NtStatus = NtStatus(0xC000_0008);
    pub const INVALID_PARAMETER: NtStatus = NtStatus(0xC000_000D);
    pub const INVALID_DEVICE_REQUEST: NtStatus = NtStatus(0xC000_0010);
    pub const END_OF_FILE: NtStatus = NtStatus(0xC000_0011);
    pub const ACCESS_DENIED: NtStatus = NtStatus(0xC000_0022);
    pub const BUFFER_TOO_SMALL: NtStatus = NtStatus(0xC000_0023);
    pub const OBJECT_NAME_INVALID: NtStatus = NtStatus(0xC000_0033);
    pub const OBJECT_NAME_NOT_FOUND: NtStatus = NtStatus(0xC000_0034);
    pub const OBJECT_NAME_COLLISION: NtStatus = NtStatus(0xC000_0035);
    pub const OBJECT_PATH_NOT_FOUND: NtStatus = NtStatus(0xC000_003A);
    pub const SHARING_VIOLATION: NtStatus = NtStatus(0xC000_0043);
    pub const DELETE_PENDING: NtStatus = NtStatus(0xC000_0056);
    pub const DISK_FULL: NtStatus = NtStatus(0xC000_007F);
    pub const INSUFFICIENT_RESOURCES: NtStatus = NtStatus(0xC000_009A);
    pub const MEDIA_WRITE_PROTECTED: NtStatus = NtStatus(0xC000_00A2);
    pub const IO_TIMEOUT: NtStatus = NtStatus(0xC000_00B5);
    pub const FILE_IS_A_DIRECTORY: NtStatus = NtStatus(0xC000_00BA);
    pub const NOT_SUPPORTED: NtStatus = NtStatus(0xC000_00BB);
    pub const UNEXPECTED_IO_ERROR: NtStatus = NtStatus(0xC000_00E9);
    pub const DIRECTORY_NOT_EMPTY: NtStatus = NtStatus(0xC000_0101);
    pub const NOT_A_DIRECTORY: NtStatus = NtStatus(0xC000_0103);
    pub const CANCELLED: NtStatus = NtStatus(0xC000_0120);
    pub const INVALID_DEVICE_STATE: NtStatus = NtStatus(0xC000_0184);
    pub const NOT_A_REPARSE_POINT: NtStatus = NtStatus(0xC000_0275);
    pub const IO_REPARSE_TAG_MISMATCH: NtStatus = NtStatus(0xC000_0277);
    pub const IO_REPARSE_DATA_INVALID: NtStatus = NtStatus(0xC000_0278);
    pub const REPARSE_POINT_NOT_RESOLVED: NtStatus = NtStatus(0xC000_0280);
    pub const REPARSE_ATTRIBUTE_CONFLICT: NtStatus = NtStatus(0xC000_02B2);

    /// Status reported by a service whose start or stop callback
    /// failed in an uncontrolled way.
    pub const SERVICE_FAULT: NtStatus = NtStatus(0xE06D_7363);

    /// Facility used to wrap Win32 error codes that have no direct
    /// NT equivalent.
    const FACILITY_NTWIN32: u32 = 0xC007_0000;

    pub fn is_success(self) -> bool {
        (self.0 as i32) >= 0
    }

    pub fn is_error(self) -> bool {
        (self.0 >> 30) == 0b11
    }

    /// Convert into a [Result], keeping failures as the error.
    pub fn ok(self) -> Result<(), NtStatus> {
        if self.is_success() { Ok(()) } else { Err(self) }
    }

    /// Classify this status in the error taxonomy.
    pub fn class(self) -> StatusClass {
        match self {
            s if s.is_success() => StatusClass::Success,
            NtStatus::INVALID_DEVICE_REQUEST | NtStatus::NOT_SUPPORTED => StatusClass::NotSupported,
            NtStatus::INVALID_PARAMETER
            | NtStatus::INVALID_HANDLE
            | NtStatus::OBJECT_NAME_INVALID
            | NtStatus::BUFFER_TOO_SMALL
            | NtStatus::IO_REPARSE_DATA_INVALID => StatusClass::InvalidRequest,
            NtStatus::UNEXPECTED_IO_ERROR | NtStatus::SERVICE_FAULT => StatusClass::ProviderFault,
            NtStatus::INSUFFICIENT_RESOURCES => StatusClass::ResourceExhaustion,
            NtStatus::REPARSE_POINT_NOT_RESOLVED
            | NtStatus::IO_REPARSE_TAG_MISMATCH
            | NtStatus::REPARSE_ATTRIBUTE_CONFLICT => StatusClass::ReparseChain,
            _ => StatusClass::Other,
        }
    }

    /// Symbolic name of well-known statuses.
    pub fn name(self) -> Option<&'static str> {
        KNOWN.iter().find(|k| k.0 == self).map(|k| k.1)
    }

    /// Map to the Win32 error code a process would report.
    ///
    /// Unknown statuses map to ERROR_MR_MID_NOT_FOUND, except
    /// wrapped Win32 codes, which are unwrapped.
    pub fn to_win32(self) -> u32 {
        if let Some(known) = KNOWN.iter().find(|k| k.0 == self) {
            return known.2;
        }
        if self.0 & 0xFFFF_0000 == Self::FACILITY_NTWIN32 {
            return self.0 & 0xFFFF;
        }

        ERROR_MR_MID_NOT_FOUND
    }

    /// Map a Win32 error code to a status.
    pub fn from_win32(error: u32) -> NtStatus {
        if error == 0 {
            return NtStatus::SUCCESS;
        }
        if let Some(known) = KNOWN
            .iter()
            .find(|k| k.2 == error && k.2 != ERROR_MR_MID_NOT_FOUND)
        {
            return known.0;
        }

        NtStatus(Self::FACILITY_NTWIN32 | (error & 0xFFFF))
    }
}

impl fmt::Display for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} ({:#010x})", self.0),
            None => write!(f, "{:#010x}", self.0),
        }
    }
}

impl fmt::Debug for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NtStatus({self})")
    }
}

impl std::error::Error for NtStatus {}

impl From<NtStatus> for u32 {
    fn from(value: NtStatus) -> Self {
        value.0
    }
}

/// Position of a status in the error taxonomy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusClass {
    Success,

    /// The operation is not implemented by the provider.
    NotSupported,

    /// Malformed arguments.
    InvalidRequest,

    /// Provider code failed in an uncontrolled way.
    ProviderFault,

    /// Memory or other resources ran out.
    ResourceExhaustion,

    /// Reparse resolution gave up, or reparse data is incompatible.
    ReparseChain,

    /// Any other, ordinary, filesystem failure.
    Other,
}

const ERROR_MR_MID_NOT_FOUND: u32 = 317;

// (status, name, win32 error)
const KNOWN: &[(NtStatus, &str, u32)] = &[
    (NtStatus::SUCCESS, "STATUS_SUCCESS", 0),
    (NtStatus::REPARSE, "STATUS_REPARSE", 0),
    (NtStatus::BUFFER_OVERFLOW, "STATUS_BUFFER_OVERFLOW", 234),
    (NtStatus::INVALID_HANDLE, "STATUS_INVALID_HANDLE", 6),
    (NtStatus::INVALID_PARAMETER, "STATUS_INVALID_PARAMETER", 87),
    (NtStatus::INVALID_DEVICE_REQUEST, "STATUS_INVALID_DEVICE_REQUEST", 1),
    (NtStatus::END_OF_FILE, "STATUS_END_OF_FILE", 38),
    (NtStatus::ACCESS_DENIED, "STATUS_ACCESS_DENIED", 5),
    (NtStatus::BUFFER_TOO_SMALL, "STATUS_BUFFER_TOO_SMALL", 122),
    (NtStatus::OBJECT_NAME_INVALID, "STATUS_OBJECT_NAME_INVALID", 123),
    (NtStatus::OBJECT_NAME_NOT_FOUND, "STATUS_OBJECT_NAME_NOT_FOUND", 2),
    (NtStatus::OBJECT_NAME_COLLISION, "STATUS_OBJECT_NAME_COLLISION", 183),
    (NtStatus::OBJECT_PATH_NOT_FOUND, "STATUS_OBJECT_PATH_NOT_FOUND", 3),
    (NtStatus::SHARING_VIOLATION, "STATUS_SHARING_VIOLATION", 32),
    (NtStatus::DELETE_PENDING, "STATUS_DELETE_PENDING", 303),
    (NtStatus::DISK_FULL, "STATUS_DISK_FULL", 112),
    (NtStatus::INSUFFICIENT_RESOURCES, "STATUS_INSUFFICIENT_RESOURCES", 1450),
    (NtStatus::MEDIA_WRITE_PROTECTED, "STATUS_MEDIA_WRITE_PROTECTED", 19),
    (NtStatus::IO_TIMEOUT, "STATUS_IO_TIMEOUT", 1460),
    (NtStatus::FILE_IS_A_DIRECTORY, "STATUS_FILE_IS_A_DIRECTORY", 336),
    (NtStatus::NOT_SUPPORTED, "STATUS_NOT_SUPPORTED", 50),
    (NtStatus::UNEXPECTED_IO_ERROR, "STATUS_UNEXPECTED_IO_ERROR", 59),
    (NtStatus::DIRECTORY_NOT_EMPTY, "STATUS_DIRECTORY_NOT_EMPTY", 145),
    (NtStatus::NOT_A_DIRECTORY, "STATUS_NOT_A_DIRECTORY", 267),
    (NtStatus::CANCELLED, "STATUS_CANCELLED", 995),
    (NtStatus::INVALID_DEVICE_STATE, "STATUS_INVALID_DEVICE_STATE", 5023),
    (NtStatus::NOT_A_REPARSE_POINT, "STATUS_NOT_A_REPARSE_POINT", 4390),
    (NtStatus::IO_REPARSE_TAG_MISMATCH, "STATUS_IO_REPARSE_TAG_MISMATCH", 4394),
    (NtStatus::IO_REPARSE_DATA_INVALID, "STATUS_IO_REPARSE_DATA_INVALID", 4392),
    (NtStatus::REPARSE_POINT_NOT_RESOLVED, "STATUS_REPARSE_POINT_NOT_RESOLVED", 1921),
    (NtStatus::REPARSE_ATTRIBUTE_CONFLICT, "STATUS_REPARSE_ATTRIBUTE_CONFLICT", 4391),
    (NtStatus::SERVICE_FAULT, "STATUS_CPP_EH_EXCEPTION", ERROR_MR_MID_NOT_FOUND),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity() {
        assert!(NtStatus::SUCCESS.is_success());
        assert!(NtStatus::REPARSE.is_success());
        assert!(!NtStatus::BUFFER_OVERFLOW.is_success());
        assert!(!NtStatus::BUFFER_OVERFLOW.is_error());
        assert!(NtStatus::ACCESS_DENIED.is_error());
        assert!(NtStatus::SERVICE_FAULT.is_error());
    }

    #[test]
    fn ok() {
        assert_eq!(Ok(()), NtStatus::SUCCESS.ok());
        assert_eq!(Err(NtStatus::ACCESS_DENIED), NtStatus::ACCESS_DENIED.ok());
    }

    #[test]
    fn classify() {
        assert_eq!(StatusClass::Success, NtStatus::SUCCESS.class());
        assert_eq!(
            StatusClass::NotSupported,
            NtStatus::INVALID_DEVICE_REQUEST.class()
        );
        assert_eq!(
            StatusClass::ProviderFault,
            NtStatus::UNEXPECTED_IO_ERROR.class()
        );
        assert_eq!(
            StatusClass::ResourceExhaustion,
            NtStatus::INSUFFICIENT_RESOURCES.class()
        );
        assert_eq!(
            StatusClass::ReparseChain,
            NtStatus::REPARSE_POINT_NOT_RESOLVED.class()
        );
        assert_eq!(
            StatusClass::InvalidRequest,
            NtStatus::INVALID_PARAMETER.class()
        );
        assert_eq!(StatusClass::Other, NtStatus::OBJECT_NAME_NOT_FOUND.class());
    }

    #[test]
    fn win32_mapping() {
        assert_eq!(0, NtStatus::SUCCESS.to_win32());
        assert_eq!(2, NtStatus::OBJECT_NAME_NOT_FOUND.to_win32());
        assert_eq!(1, NtStatus::INVALID_DEVICE_REQUEST.to_win32());
        assert_eq!(ERROR_MR_MID_NOT_FOUND, NtStatus(0xC0DE_0001).to_win32());

        assert_eq!(NtStatus::ACCESS_DENIED, NtStatus::from_win32(5));
        assert_eq!(NtStatus::SUCCESS, NtStatus::from_win32(0));
    }

    #[test]
    fn win32_wrapping() {
        // ERROR_NOT_READY has no entry in the table.
        let status = NtStatus::from_win32(21);
        assert_eq!(NtStatus(0xC007_0015), status);
        assert!(status.is_error());
        assert_eq!(21, status.to_win32());
    }

    #[test]
    fn display() {
        assert_eq!(
            "STATUS_ACCESS_DENIED (0xc0000022)",
            NtStatus::ACCESS_DENIED.to_string()
        );
        assert_eq!("0xc0de0001", NtStatus(0xC0DE_0001).to_string());
    }
}
