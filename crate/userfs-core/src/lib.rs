pub mod config;
pub mod dirbuffer;
pub mod dispatch;
pub mod error;
pub mod fault;
pub mod handles;
pub mod host;
pub mod provider;
pub mod reparse;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transfer;

pub use config::MountConfig;
pub use dirbuffer::{DirectoryBuffer, DirectoryFiller};
pub use dispatch::{
    DebugFlags, DispatchOptions, Dispatcher, FileSystemInterface, GuardStrategy, Operation,
};
pub use error::{FsError, FsResult};
pub use handles::ContextArena;
pub use host::{Driver, DriverBinding, Volume};
pub use provider::{BasicInfo, FileSystem, NameLookup, Opened, Written};
pub use transfer::TransferBuffer;
