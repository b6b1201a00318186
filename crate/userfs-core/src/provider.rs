//! The filesystem a provider implements.

use crate::error::{FsError, FsResult};
use crate::reparse;
use crate::transfer::TransferBuffer;
use userfs_types::{
    CleanupFlags, FileAttributes, FileContext, FileInfo, FileTime, NtStatus, OpenFileInfo,
    ReparseBuffer, SecurityDescriptor, VolumeInfo,
};

/// Answer of [FileSystem::get_security_by_name].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NameLookup {
    /// The file exists.
    Found {
        file_attributes: FileAttributes,

        /// Only filled in if asked for.
        security: Option<SecurityDescriptor>,
    },

    /// A component of the path is a reparse point. `index` is the
    /// position of that component, in UTF-16 code units, as returned
    /// by [reparse::find_reparse_point].
    Reparse { index: usize },
}

/// A file opened by [FileSystem::create] or [FileSystem::open].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Opened {
    /// Context passed back to every later operation on this open.
    pub context: FileContext,
    pub info: OpenFileInfo,
}

impl Opened {
    pub fn new(context: FileContext, info: impl Into<OpenFileInfo>) -> Self {
        Self {
            context,
            info: info.into(),
        }
    }
}

/// Result of [FileSystem::write].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Written {
    pub bytes_transferred: usize,
    pub file_info: FileInfo,
}

/// Changes requested by SetBasicInfo. `None` leaves the value as is.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BasicInfo {
    pub file_attributes: Option<FileAttributes>,
    pub creation_time: Option<FileTime>,
    pub last_access_time: Option<FileTime>,
    pub last_write_time: Option<FileTime>,
    pub change_time: Option<FileTime>,
}

/// A user-mode filesystem.
///
/// Every operation has a default implementation that fails with
/// [FsError::NotSupported], so a provider only implements what it
/// supports. A read-only filesystem, for example, can leave out every
/// operation that modifies files.
///
/// Operations may be called concurrently from several threads. What
/// is serialized depends on the [crate::GuardStrategy] of the mount.
///
/// Panics in operations are caught and reported to the host as
/// [FileSystem::fault_status].
#[allow(unused_variables)]
pub trait FileSystem: Send + Sync {
    /// Status reported for an operation that panicked.
    fn fault_status(&self) -> NtStatus {
        NtStatus::UNEXPECTED_IO_ERROR
    }

    fn get_volume_info(&self) -> FsResult<VolumeInfo> {
        Err(FsError::NotSupported)
    }

    fn set_volume_label(&self, volume_label: &str) -> FsResult<VolumeInfo> {
        Err(FsError::NotSupported)
    }

    /// Look up a file by name, before it is opened.
    ///
    /// Called to check access. Providers that support reparse points
    /// report a reparse point along the path instead of the file.
    fn get_security_by_name(&self, file_name: &str, want_security: bool) -> FsResult<NameLookup> {
        Err(FsError::NotSupported)
    }

    #[allow(clippy::too_many_arguments)]
    fn create(
        &self,
        file_name: &str,
        create_options: u32,
        granted_access: u32,
        file_attributes: FileAttributes,
        security: Option<&SecurityDescriptor>,
        allocation_size: u64,
    ) -> FsResult<Opened> {
        Err(FsError::NotSupported)
    }

    fn open(&self, file_name: &str, create_options: u32, granted_access: u32) -> FsResult<Opened> {
        Err(FsError::NotSupported)
    }

    fn overwrite(
        &self,
        context: FileContext,
        file_attributes: FileAttributes,
        replace_file_attributes: bool,
        allocation_size: u64,
    ) -> FsResult<FileInfo> {
        Err(FsError::NotSupported)
    }

    /// Called when the last handle of an open is closed.
    ///
    /// `flags` tell the provider what to do, such as deleting the
    /// file. There is no way to report failure: the provider must
    /// handle errors itself.
    fn cleanup(&self, context: FileContext, file_name: Option<&str>, flags: CleanupFlags) {}

    /// Called once the open is gone. The provider releases `context`.
    fn close(&self, context: FileContext) {}

    /// Read into `buf`, returning the number of bytes read.
    fn read(&self, context: FileContext, buf: &mut [u8], offset: u64) -> FsResult<usize> {
        Err(FsError::NotSupported)
    }

    fn write(
        &self,
        context: FileContext,
        buf: &[u8],
        offset: u64,
        write_to_end_of_file: bool,
        constrained_io: bool,
    ) -> FsResult<Written> {
        Err(FsError::NotSupported)
    }

    /// Flush a file, or the whole volume for the null context.
    fn flush(&self, context: FileContext) -> FsResult<FileInfo> {
        Err(FsError::NotSupported)
    }

    fn get_file_info(&self, context: FileContext) -> FsResult<FileInfo> {
        Err(FsError::NotSupported)
    }

    fn set_basic_info(&self, context: FileContext, info: &BasicInfo) -> FsResult<FileInfo> {
        Err(FsError::NotSupported)
    }

    fn set_file_size(
        &self,
        context: FileContext,
        new_size: u64,
        set_allocation_size: bool,
    ) -> FsResult<FileInfo> {
        Err(FsError::NotSupported)
    }

    fn can_delete(&self, context: FileContext, file_name: &str) -> FsResult<()> {
        Err(FsError::NotSupported)
    }

    fn rename(
        &self,
        context: FileContext,
        file_name: &str,
        new_file_name: &str,
        replace_if_exists: bool,
    ) -> FsResult<()> {
        Err(FsError::NotSupported)
    }

    fn get_security(&self, context: FileContext) -> FsResult<SecurityDescriptor> {
        Err(FsError::NotSupported)
    }

    fn set_security(
        &self,
        context: FileContext,
        security_information: u32,
        modification: &SecurityDescriptor,
    ) -> FsResult<()> {
        Err(FsError::NotSupported)
    }

    /// Fill `buffer` with the entries following `marker`.
    ///
    /// Providers usually answer from a [crate::DirectoryBuffer] kept
    /// with the open.
    fn read_directory(
        &self,
        context: FileContext,
        pattern: Option<&str>,
        marker: Option<&str>,
        buffer: &mut TransferBuffer<'_>,
    ) -> FsResult<()> {
        Err(FsError::NotSupported)
    }

    /// Resolve the reparse points of `file_name`, returning the path
    /// to open instead.
    ///
    /// The default implementation follows symbolic links reported by
    /// [FileSystem::get_reparse_point_by_name].
    fn resolve_reparse_points(
        &self,
        file_name: &str,
        reparse_point_index: usize,
        resolve_last_component: bool,
        max_hops: u32,
    ) -> FsResult<String> {
        reparse::resolve_reparse_points(
            file_name,
            reparse_point_index,
            resolve_last_component,
            max_hops,
            |name, is_directory| self.get_reparse_point_by_name(name, is_directory),
        )
    }

    /// Return the reparse point at `file_name`, or fail with
    /// [FsError::NotAReparsePoint].
    fn get_reparse_point_by_name(
        &self,
        file_name: &str,
        is_directory: bool,
    ) -> FsResult<ReparseBuffer> {
        Err(FsError::NotSupported)
    }

    fn get_reparse_point(&self, context: FileContext, file_name: &str) -> FsResult<ReparseBuffer> {
        Err(FsError::NotSupported)
    }

    fn set_reparse_point(
        &self,
        context: FileContext,
        file_name: &str,
        reparse: &ReparseBuffer,
    ) -> FsResult<()> {
        Err(FsError::NotSupported)
    }

    fn delete_reparse_point(
        &self,
        context: FileContext,
        file_name: &str,
        reparse: &ReparseBuffer,
    ) -> FsResult<()> {
        Err(FsError::NotSupported)
    }

    fn get_stream_info(&self, context: FileContext, buffer: &mut TransferBuffer<'_>) -> FsResult<()> {
        Err(FsError::NotSupported)
    }
}
