//! Operation table bound to one mount.
//!
//! The host calls [FileSystemInterface] with raw contexts, buffers and
//! flags. [Dispatcher] converts them for the provider, runs the
//! provider under the mount's guard and fault containment, then
//! converts the result back.

use crate::error::{FsError, FsResult};
use crate::fault;
use crate::provider::{BasicInfo, FileSystem, NameLookup};
use crate::reparse::DEFAULT_MAX_REPARSE_HOPS;
use crate::transfer::TransferBuffer;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fmt;
use std::sync::Arc;
use userfs_types::{
    CleanupFlags, FileAttributes, FileContext, FileInfo, FileTime, FullContext, NtStatus,
    OpenFileInfo, ReparseBuffer, SecurityDescriptor, VolumeInfo,
};

/// The operations of the host interface, in table order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u32)]
pub enum Operation {
    GetVolumeInfo = 0,
    SetVolumeLabel,
    GetSecurityByName,
    Create,
    Open,
    Overwrite,
    Cleanup,
    Close,
    Read,
    Write,
    Flush,
    GetFileInfo,
    SetBasicInfo,
    SetFileSize,
    CanDelete,
    Rename,
    GetSecurity,
    SetSecurity,
    ReadDirectory,
    ResolveReparsePoints,
    GetReparsePoint,
    SetReparsePoint,
    DeleteReparsePoint,
    GetStreamInfo,
}

impl Operation {
    pub const ALL: [Operation; 24] = [
        Operation::GetVolumeInfo,
        Operation::SetVolumeLabel,
        Operation::GetSecurityByName,
        Operation::Create,
        Operation::Open,
        Operation::Overwrite,
        Operation::Cleanup,
        Operation::Close,
        Operation::Read,
        Operation::Write,
        Operation::Flush,
        Operation::GetFileInfo,
        Operation::SetBasicInfo,
        Operation::SetFileSize,
        Operation::CanDelete,
        Operation::Rename,
        Operation::GetSecurity,
        Operation::SetSecurity,
        Operation::ReadDirectory,
        Operation::ResolveReparsePoints,
        Operation::GetReparsePoint,
        Operation::SetReparsePoint,
        Operation::DeleteReparsePoint,
        Operation::GetStreamInfo,
    ];

    /// Position of the operation in the table.
    pub fn ordinal(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            Operation::GetVolumeInfo => "GetVolumeInfo",
            Operation::SetVolumeLabel => "SetVolumeLabel",
            Operation::GetSecurityByName => "GetSecurityByName",
            Operation::Create => "Create",
            Operation::Open => "Open",
            Operation::Overwrite => "Overwrite",
            Operation::Cleanup => "Cleanup",
            Operation::Close => "Close",
            Operation::Read => "Read",
            Operation::Write => "Write",
            Operation::Flush => "Flush",
            Operation::GetFileInfo => "GetFileInfo",
            Operation::SetBasicInfo => "SetBasicInfo",
            Operation::SetFileSize => "SetFileSize",
            Operation::CanDelete => "CanDelete",
            Operation::Rename => "Rename",
            Operation::GetSecurity => "GetSecurity",
            Operation::SetSecurity => "SetSecurity",
            Operation::ReadDirectory => "ReadDirectory",
            Operation::ResolveReparsePoints => "ResolveReparsePoints",
            Operation::GetReparsePoint => "GetReparsePoint",
            Operation::SetReparsePoint => "SetReparsePoint",
            Operation::DeleteReparsePoint => "DeleteReparsePoint",
            Operation::GetStreamInfo => "GetStreamInfo",
        }
    }

    /// Mount-wide lock taken under [GuardStrategy::Fine].
    fn fine_lock(self) -> LockMode {
        match self {
            Operation::SetVolumeLabel | Operation::Create | Operation::Rename => {
                LockMode::Exclusive
            }
            Operation::GetVolumeInfo
            | Operation::Open
            | Operation::CanDelete
            | Operation::ReadDirectory
            | Operation::ResolveReparsePoints => LockMode::Shared,
            _ => LockMode::None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How concurrent operations of a mount are serialized.
///
/// Chosen at mount time, fixed until unmount.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardStrategy {
    /// One operation at a time.
    Coarse,

    /// Operations on different files run concurrently. Only operations
    /// that affect the namespace as a whole are serialized.
    #[default]
    Fine,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum LockMode {
    Exclusive,
    Shared,
    None,
}

/// Operations to trace, as a bitmask indexed by [Operation::ordinal].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, serde::Deserialize, serde::Serialize)]
#[serde(transparent)]
pub struct DebugFlags(pub u32);

impl DebugFlags {
    pub const NONE: DebugFlags = DebugFlags(0);
    pub const ALL: DebugFlags = DebugFlags(u32::MAX);

    pub fn of(ops: &[Operation]) -> Self {
        DebugFlags(ops.iter().fold(0, |acc, op| acc | (1 << op.ordinal())))
    }

    pub fn traces(self, op: Operation) -> bool {
        self.0 & (1 << op.ordinal()) != 0
    }
}

/// The operation table, as called by the host.
///
/// Failures are reported as a status. Nothing a provider does can
/// make these calls panic.
pub trait FileSystemInterface: Send + Sync {
    fn get_volume_info(&self) -> Result<VolumeInfo, NtStatus>;

    fn set_volume_label(&self, volume_label: &str) -> Result<VolumeInfo, NtStatus>;

    fn get_security_by_name(
        &self,
        file_name: &str,
        want_security: bool,
    ) -> Result<NameLookup, NtStatus>;

    /// Create a file. On success `context` is filled in with the
    /// provider's context; on failure it is cleared.
    #[allow(clippy::too_many_arguments)]
    fn create(
        &self,
        file_name: &str,
        create_options: u32,
        granted_access: u32,
        file_attributes: u32,
        security: Option<&[u8]>,
        allocation_size: u64,
        context: &mut FullContext,
    ) -> Result<OpenFileInfo, NtStatus>;

    /// Open a file. `context` is handled as in
    /// [FileSystemInterface::create].
    fn open(
        &self,
        file_name: &str,
        create_options: u32,
        granted_access: u32,
        context: &mut FullContext,
    ) -> Result<OpenFileInfo, NtStatus>;

    fn overwrite(
        &self,
        context: FullContext,
        file_attributes: u32,
        replace_file_attributes: bool,
        allocation_size: u64,
    ) -> Result<FileInfo, NtStatus>;

    fn cleanup(&self, context: FullContext, file_name: Option<&str>, flags: u32);

    fn close(&self, context: FullContext);

    fn read(&self, context: FullContext, buf: &mut [u8], offset: u64) -> Result<usize, NtStatus>;

    /// Returns the number of bytes written and the updated file info.
    fn write(
        &self,
        context: FullContext,
        buf: &[u8],
        offset: u64,
        write_to_end_of_file: bool,
        constrained_io: bool,
    ) -> Result<(usize, FileInfo), NtStatus>;

    fn flush(&self, context: FullContext) -> Result<FileInfo, NtStatus>;

    fn get_file_info(&self, context: FullContext) -> Result<FileInfo, NtStatus>;

    /// Attributes [FileAttributes::UNCHANGED] and times 0 are left
    /// unchanged.
    fn set_basic_info(
        &self,
        context: FullContext,
        file_attributes: u32,
        creation_time: u64,
        last_access_time: u64,
        last_write_time: u64,
        change_time: u64,
    ) -> Result<FileInfo, NtStatus>;

    fn set_file_size(
        &self,
        context: FullContext,
        new_size: u64,
        set_allocation_size: bool,
    ) -> Result<FileInfo, NtStatus>;

    fn can_delete(&self, context: FullContext, file_name: &str) -> Result<(), NtStatus>;

    fn rename(
        &self,
        context: FullContext,
        file_name: &str,
        new_file_name: &str,
        replace_if_exists: bool,
    ) -> Result<(), NtStatus>;

    fn get_security(&self, context: FullContext) -> Result<Vec<u8>, NtStatus>;

    fn set_security(
        &self,
        context: FullContext,
        security_information: u32,
        modification: &[u8],
    ) -> Result<(), NtStatus>;

    /// Returns the number of bytes written into `buf`.
    fn read_directory(
        &self,
        context: FullContext,
        pattern: Option<&str>,
        marker: Option<&str>,
        buf: &mut [u8],
    ) -> Result<usize, NtStatus>;

    /// Returns reparse data pointing to the resolved path, which the
    /// host reports with [NtStatus::REPARSE].
    fn resolve_reparse_points(
        &self,
        file_name: &str,
        reparse_point_index: u32,
        resolve_last_component: bool,
    ) -> Result<Vec<u8>, NtStatus>;

    fn get_reparse_point(&self, context: FullContext, file_name: &str)
    -> Result<Vec<u8>, NtStatus>;

    fn set_reparse_point(
        &self,
        context: FullContext,
        file_name: &str,
        data: &[u8],
    ) -> Result<(), NtStatus>;

    fn delete_reparse_point(
        &self,
        context: FullContext,
        file_name: &str,
        data: &[u8],
    ) -> Result<(), NtStatus>;

    /// Returns the number of bytes written into `buf`.
    fn get_stream_info(&self, context: FullContext, buf: &mut [u8]) -> Result<usize, NtStatus>;
}

/// Dispatch options, fixed when a mount starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispatchOptions {
    pub guard: GuardStrategy,
    pub debug_flags: DebugFlags,
    pub max_reparse_hops: u32,

    /// Worker threads of the host dispatcher, 0 for its default.
    pub threads: u32,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            guard: GuardStrategy::default(),
            debug_flags: DebugFlags::NONE,
            max_reparse_hops: DEFAULT_MAX_REPARSE_HOPS,
            threads: 0,
        }
    }
}

/// [FileSystemInterface] implemented on top of a provider.
pub struct Dispatcher<P: ?Sized> {
    options: DispatchOptions,
    fault_status: NtStatus,
    lock: RwLock<()>,
    provider: Arc<P>,
}

enum LockGuard<'a> {
    Exclusive(#[allow(dead_code)] RwLockWriteGuard<'a, ()>),
    Shared(#[allow(dead_code)] RwLockReadGuard<'a, ()>),
    None,
}

impl<P: FileSystem + ?Sized> Dispatcher<P> {
    pub fn new(provider: Arc<P>, options: DispatchOptions) -> Self {
        let fault_status = fault::catch("fault_status", || provider.fault_status())
            .unwrap_or(NtStatus::UNEXPECTED_IO_ERROR);

        Self {
            options,
            fault_status,
            lock: RwLock::new(()),
            provider,
        }
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    pub fn options(&self) -> &DispatchOptions {
        &self.options
    }

    fn lock(&self, op: Operation) -> LockGuard<'_> {
        let mode = match self.options.guard {
            GuardStrategy::Coarse => LockMode::Exclusive,
            GuardStrategy::Fine => op.fine_lock(),
        };
        match mode {
            LockMode::Exclusive => LockGuard::Exclusive(self.lock.write()),
            LockMode::Shared => LockGuard::Shared(self.lock.read()),
            LockMode::None => LockGuard::None,
        }
    }

    /// Run one provider operation.
    fn call<T>(
        &self,
        op: Operation,
        request: &dyn fmt::Debug,
        f: impl FnOnce(&P) -> FsResult<T>,
    ) -> Result<T, NtStatus> {
        let result = {
            let _guard = self.lock(op);
            fault::contain(op.name(), self.fault_status, || f(&*self.provider))
        };
        if self.options.debug_flags.traces(op) {
            let status = match &result {
                Ok(_) => NtStatus::SUCCESS,
                Err(status) => *status,
            };
            log::debug!("{op}{request:?} -> {status}");
        }

        result
    }

    fn open_result(
        result: Result<crate::provider::Opened, NtStatus>,
        context: &mut FullContext,
    ) -> Result<OpenFileInfo, NtStatus> {
        match result {
            Ok(opened) => {
                *context = FullContext::from(opened.context);
                Ok(opened.info)
            }
            Err(status) => {
                *context = FullContext::default();
                Err(status)
            }
        }
    }
}

fn decode_reparse(data: &[u8]) -> FsResult<ReparseBuffer> {
    ReparseBuffer::from_bytes(data).map_err(|err| {
        log::debug!("malformed reparse data: {err}");
        FsError::InvalidReparseData
    })
}

impl<P: FileSystem + ?Sized> FileSystemInterface for Dispatcher<P> {
    fn get_volume_info(&self) -> Result<VolumeInfo, NtStatus> {
        self.call(Operation::GetVolumeInfo, &(), |p| p.get_volume_info())
    }

    fn set_volume_label(&self, volume_label: &str) -> Result<VolumeInfo, NtStatus> {
        self.call(Operation::SetVolumeLabel, &(volume_label,), |p| {
            p.set_volume_label(volume_label)
        })
    }

    fn get_security_by_name(
        &self,
        file_name: &str,
        want_security: bool,
    ) -> Result<NameLookup, NtStatus> {
        self.call(
            Operation::GetSecurityByName,
            &(file_name, want_security),
            |p| p.get_security_by_name(file_name, want_security),
        )
    }

    fn create(
        &self,
        file_name: &str,
        create_options: u32,
        granted_access: u32,
        file_attributes: u32,
        security: Option<&[u8]>,
        allocation_size: u64,
        context: &mut FullContext,
    ) -> Result<OpenFileInfo, NtStatus> {
        let security = security.map(SecurityDescriptor::from);
        let result = self.call(
            Operation::Create,
            &(file_name, create_options, granted_access, file_attributes),
            |p| {
                p.create(
                    file_name,
                    create_options,
                    granted_access,
                    FileAttributes::from_bits_retain(file_attributes),
                    security.as_ref(),
                    allocation_size,
                )
            },
        );

        Self::open_result(result, context)
    }

    fn open(
        &self,
        file_name: &str,
        create_options: u32,
        granted_access: u32,
        context: &mut FullContext,
    ) -> Result<OpenFileInfo, NtStatus> {
        let result = self.call(
            Operation::Open,
            &(file_name, create_options, granted_access),
            |p| p.open(file_name, create_options, granted_access),
        );

        Self::open_result(result, context)
    }

    fn overwrite(
        &self,
        context: FullContext,
        file_attributes: u32,
        replace_file_attributes: bool,
        allocation_size: u64,
    ) -> Result<FileInfo, NtStatus> {
        self.call(
            Operation::Overwrite,
            &(context, file_attributes, replace_file_attributes),
            |p| {
                p.overwrite(
                    FileContext::from(context),
                    FileAttributes::from_bits_retain(file_attributes),
                    replace_file_attributes,
                    allocation_size,
                )
            },
        )
    }

    fn cleanup(&self, context: FullContext, file_name: Option<&str>, flags: u32) {
        let flags = CleanupFlags::from_bits_retain(flags);
        let _ = self.call(Operation::Cleanup, &(context, file_name, flags), |p| {
            p.cleanup(FileContext::from(context), file_name, flags);
            Ok(())
        });
    }

    fn close(&self, context: FullContext) {
        let _ = self.call(Operation::Close, &(context,), |p| {
            p.close(FileContext::from(context));
            Ok(())
        });
    }

    fn read(&self, context: FullContext, buf: &mut [u8], offset: u64) -> Result<usize, NtStatus> {
        let len = buf.len();
        self.call(Operation::Read, &(context, offset, len), |p| {
            p.read(FileContext::from(context), buf, offset)
        })
    }

    fn write(
        &self,
        context: FullContext,
        buf: &[u8],
        offset: u64,
        write_to_end_of_file: bool,
        constrained_io: bool,
    ) -> Result<(usize, FileInfo), NtStatus> {
        self.call(
            Operation::Write,
            &(context, offset, buf.len(), write_to_end_of_file, constrained_io),
            |p| {
                p.write(
                    FileContext::from(context),
                    buf,
                    offset,
                    write_to_end_of_file,
                    constrained_io,
                )
            },
        )
        .map(|w| (w.bytes_transferred, w.file_info))
    }

    fn flush(&self, context: FullContext) -> Result<FileInfo, NtStatus> {
        self.call(Operation::Flush, &(context,), |p| {
            p.flush(FileContext::from(context))
        })
    }

    fn get_file_info(&self, context: FullContext) -> Result<FileInfo, NtStatus> {
        self.call(Operation::GetFileInfo, &(context,), |p| {
            p.get_file_info(FileContext::from(context))
        })
    }

    fn set_basic_info(
        &self,
        context: FullContext,
        file_attributes: u32,
        creation_time: u64,
        last_access_time: u64,
        last_write_time: u64,
        change_time: u64,
    ) -> Result<FileInfo, NtStatus> {
        let info = BasicInfo {
            file_attributes: if file_attributes == FileAttributes::UNCHANGED {
                None
            } else {
                Some(FileAttributes::from_bits_retain(file_attributes))
            },
            creation_time: FileTime(creation_time).to_option(),
            last_access_time: FileTime(last_access_time).to_option(),
            last_write_time: FileTime(last_write_time).to_option(),
            change_time: FileTime(change_time).to_option(),
        };
        self.call(Operation::SetBasicInfo, &(context, &info), |p| {
            p.set_basic_info(FileContext::from(context), &info)
        })
    }

    fn set_file_size(
        &self,
        context: FullContext,
        new_size: u64,
        set_allocation_size: bool,
    ) -> Result<FileInfo, NtStatus> {
        self.call(
            Operation::SetFileSize,
            &(context, new_size, set_allocation_size),
            |p| p.set_file_size(FileContext::from(context), new_size, set_allocation_size),
        )
    }

    fn can_delete(&self, context: FullContext, file_name: &str) -> Result<(), NtStatus> {
        self.call(Operation::CanDelete, &(context, file_name), |p| {
            p.can_delete(FileContext::from(context), file_name)
        })
    }

    fn rename(
        &self,
        context: FullContext,
        file_name: &str,
        new_file_name: &str,
        replace_if_exists: bool,
    ) -> Result<(), NtStatus> {
        self.call(
            Operation::Rename,
            &(context, file_name, new_file_name, replace_if_exists),
            |p| {
                p.rename(
                    FileContext::from(context),
                    file_name,
                    new_file_name,
                    replace_if_exists,
                )
            },
        )
    }

    fn get_security(&self, context: FullContext) -> Result<Vec<u8>, NtStatus> {
        self.call(Operation::GetSecurity, &(context,), |p| {
            p.get_security(FileContext::from(context))
        })
        .map(|sd| sd.0)
    }

    fn set_security(
        &self,
        context: FullContext,
        security_information: u32,
        modification: &[u8],
    ) -> Result<(), NtStatus> {
        let modification = SecurityDescriptor::from(modification);
        self.call(
            Operation::SetSecurity,
            &(context, security_information),
            |p| p.set_security(FileContext::from(context), security_information, &modification),
        )
    }

    fn read_directory(
        &self,
        context: FullContext,
        pattern: Option<&str>,
        marker: Option<&str>,
        buf: &mut [u8],
    ) -> Result<usize, NtStatus> {
        let len = buf.len();
        self.call(
            Operation::ReadDirectory,
            &(context, pattern, marker, len),
            |p| {
                let mut transfer = TransferBuffer::new(buf);
                p.read_directory(FileContext::from(context), pattern, marker, &mut transfer)?;

                Ok(transfer.bytes_transferred())
            },
        )
    }

    fn resolve_reparse_points(
        &self,
        file_name: &str,
        reparse_point_index: u32,
        resolve_last_component: bool,
    ) -> Result<Vec<u8>, NtStatus> {
        let max_hops = self.options.max_reparse_hops;
        self.call(
            Operation::ResolveReparsePoints,
            &(file_name, reparse_point_index, resolve_last_component),
            |p| {
                let path = p.resolve_reparse_points(
                    file_name,
                    reparse_point_index as usize,
                    resolve_last_component,
                    max_hops,
                )?;

                Ok(ReparseBuffer::symlink(&path, false)?.to_bytes()?)
            },
        )
    }

    fn get_reparse_point(
        &self,
        context: FullContext,
        file_name: &str,
    ) -> Result<Vec<u8>, NtStatus> {
        self.call(Operation::GetReparsePoint, &(context, file_name), |p| {
            Ok(p.get_reparse_point(FileContext::from(context), file_name)?
                .to_bytes()?)
        })
    }

    fn set_reparse_point(
        &self,
        context: FullContext,
        file_name: &str,
        data: &[u8],
    ) -> Result<(), NtStatus> {
        self.call(
            Operation::SetReparsePoint,
            &(context, file_name, data.len()),
            |p| {
                let reparse = decode_reparse(data)?;
                p.set_reparse_point(FileContext::from(context), file_name, &reparse)
            },
        )
    }

    fn delete_reparse_point(
        &self,
        context: FullContext,
        file_name: &str,
        data: &[u8],
    ) -> Result<(), NtStatus> {
        self.call(
            Operation::DeleteReparsePoint,
            &(context, file_name, data.len()),
            |p| {
                let reparse = decode_reparse(data)?;
                p.delete_reparse_point(FileContext::from(context), file_name, &reparse)
            },
        )
    }

    fn get_stream_info(&self, context: FullContext, buf: &mut [u8]) -> Result<usize, NtStatus> {
        let len = buf.len();
        self.call(Operation::GetStreamInfo, &(context, len), |p| {
            let mut transfer = TransferBuffer::new(buf);
            p.get_stream_info(FileContext::from(context), &mut transfer)?;

            Ok(transfer.bytes_transferred())
        })
    }
}
