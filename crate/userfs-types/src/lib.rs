pub mod context;
pub mod info;
pub mod reparse;
pub mod status;
pub mod time;
pub mod volume;
pub mod wire;

pub use context::{DescriptorHandle, FileContext, FullContext, NodeHandle};
pub use info::{
    CleanupFlags, DirInfo, FileAttributes, FileInfo, OpenFileInfo, SecurityDescriptor,
    StreamInfo, VolumeInfo,
};
pub use reparse::{ReparseBuffer, ReparseTag, SymlinkTarget};
pub use status::{NtStatus, StatusClass};
pub use time::FileTime;
pub use volume::{DeviceClass, VolumeParams};
pub use wire::{Listing, Record, WireError};
