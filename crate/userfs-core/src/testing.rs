//! In-process driver and in-memory provider, for tests.
//!
//! [LoopbackDriver] stands in for the host driver: it keeps track of
//! the volumes it registers and hands out the operation table of the
//! running volume so that tests can call it from any number of
//! threads, as the host's worker threads would. [MemFs] is a small
//! provider keeping everything in memory.

use crate::dirbuffer::DirectoryBuffer;
use crate::dispatch::FileSystemInterface;
use crate::error::{FsError, FsResult};
use crate::handles::ContextArena;
use crate::host::{Driver, DriverBinding};
use crate::provider::{BasicInfo, FileSystem, NameLookup, Opened, Written};
use crate::reparse;
use crate::transfer::TransferBuffer;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use userfs_types::{
    CleanupFlags, DeviceClass, DirInfo, FileAttributes, FileContext, FileInfo, FileTime,
    NodeHandle, NtStatus, OpenFileInfo, ReparseBuffer, SecurityDescriptor, StreamInfo,
    VolumeInfo, VolumeParams,
};

/// Steps of a mount that [LoopbackDriver] can be told to fail.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum LoopbackStep {
    Preflight,
    Create,
    SetMountPoint,
    StartDispatcher,
}

/// A driver that runs everything in the current process.
#[derive(Clone, Default)]
pub struct LoopbackDriver {
    state: Arc<Mutex<LoopbackState>>,
}

#[derive(Default)]
struct LoopbackState {
    failures: BTreeMap<u8, NtStatus>,
    live_bindings: usize,
    mount_points: HashSet<String>,
    running: Option<Arc<dyn FileSystemInterface>>,
    last_device_class: Option<DeviceClass>,
    last_params: Option<VolumeParams>,
    debug_flags: u32,
    dispatcher_threads: u32,
}

impl LoopbackState {
    fn check(&mut self, step: LoopbackStep) -> Result<(), NtStatus> {
        match self.failures.remove(&(step as u8)) {
            Some(status) => Err(status),
            None => Ok(()),
        }
    }
}

impl LoopbackDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next execution of `step` fail with `status`.
    pub fn fail_next(&self, step: LoopbackStep, status: NtStatus) {
        self.state.lock().failures.insert(step as u8, status);
    }

    /// Number of volumes currently registered.
    pub fn live_bindings(&self) -> usize {
        self.state.lock().live_bindings
    }

    /// Operation table of the volume whose dispatcher is running.
    pub fn interface(&self) -> Option<Arc<dyn FileSystemInterface>> {
        self.state.lock().running.clone()
    }

    pub fn last_device_class(&self) -> Option<DeviceClass> {
        self.state.lock().last_device_class
    }

    /// Parameters of the last volume registered.
    pub fn last_params(&self) -> Option<VolumeParams> {
        self.state.lock().last_params.clone()
    }

    pub fn debug_flags(&self) -> u32 {
        self.state.lock().debug_flags
    }

    pub fn dispatcher_threads(&self) -> u32 {
        self.state.lock().dispatcher_threads
    }
}

impl Driver for LoopbackDriver {
    type Binding = LoopbackBinding;

    fn preflight(
        &self,
        device_class: DeviceClass,
        mount_point: Option<&str>,
    ) -> Result<(), NtStatus> {
        let mut state = self.state.lock();
        state.check(LoopbackStep::Preflight)?;
        if let Some(mount_point) = mount_point
            && state.mount_points.contains(mount_point)
        {
            return Err(NtStatus::OBJECT_NAME_COLLISION);
        }
        log::debug!("preflight {device_class:?} at {mount_point:?}: ok");

        Ok(())
    }

    fn create(
        &self,
        device_class: DeviceClass,
        params: &VolumeParams,
        interface: Arc<dyn FileSystemInterface>,
    ) -> Result<LoopbackBinding, NtStatus> {
        let mut state = self.state.lock();
        state.check(LoopbackStep::Create)?;
        state.live_bindings += 1;
        state.last_device_class = Some(device_class);
        state.last_params = Some(params.clone());

        Ok(LoopbackBinding {
            driver: self.clone(),
            interface,
            mount_point: None,
            running: false,
        })
    }
}

/// A volume registered with [LoopbackDriver].
pub struct LoopbackBinding {
    driver: LoopbackDriver,
    interface: Arc<dyn FileSystemInterface>,
    mount_point: Option<String>,
    running: bool,
}

impl DriverBinding for LoopbackBinding {
    fn set_debug_log(&mut self, flags: u32) {
        self.driver.state.lock().debug_flags = flags;
    }

    fn set_mount_point(
        &mut self,
        mount_point: Option<&str>,
        _security: Option<&SecurityDescriptor>,
    ) -> Result<(), NtStatus> {
        let mut state = self.driver.state.lock();
        state.check(LoopbackStep::SetMountPoint)?;
        let mount_point = match mount_point {
            Some(m) => m.to_string(),
            None => ('D'..='Z')
                .rev()
                .map(|c| format!("{c}:"))
                .find(|m| !state.mount_points.contains(m))
                .ok_or(NtStatus::OBJECT_NAME_COLLISION)?,
        };
        if !state.mount_points.insert(mount_point.clone()) {
            return Err(NtStatus::OBJECT_NAME_COLLISION);
        }
        self.mount_point = Some(mount_point);

        Ok(())
    }

    fn mount_point(&self) -> Option<&str> {
        self.mount_point.as_deref()
    }

    fn start_dispatcher(&mut self, threads: u32) -> Result<(), NtStatus> {
        let mut state = self.driver.state.lock();
        state.check(LoopbackStep::StartDispatcher)?;
        state.running = Some(Arc::clone(&self.interface));
        state.dispatcher_threads = threads;
        self.running = true;

        Ok(())
    }

    fn stop_dispatcher(&mut self) {
        if self.running {
            self.driver.state.lock().running = None;
            self.running = false;
        }
    }
}

impl Drop for LoopbackBinding {
    fn drop(&mut self) {
        self.stop_dispatcher();
        let mut state = self.driver.state.lock();
        state.live_bindings -= 1;
        if let Some(mount_point) = &self.mount_point {
            state.mount_points.remove(mount_point);
        }
    }
}

/// Create option requesting a directory.
pub const FILE_DIRECTORY_FILE: u32 = 0x0000_0001;

const ALLOCATION_UNIT: u64 = 4096;

/// A file or directory of [MemFs].
pub struct MemNode {
    index_number: u64,
    data: Mutex<Vec<u8>>,
    meta: Mutex<MemMeta>,
}

struct MemMeta {
    file_attributes: FileAttributes,
    creation_time: FileTime,
    last_access_time: FileTime,
    last_write_time: FileTime,
    change_time: FileTime,
    security: SecurityDescriptor,
    reparse: Option<ReparseBuffer>,
    panic_on_read: bool,
    deleted: bool,
}

/// State of one open of a [MemNode].
#[derive(Default)]
pub struct MemOpen {
    dir_buffer: DirectoryBuffer,
}

impl MemNode {
    fn new(index_number: u64, file_attributes: FileAttributes) -> Self {
        let now = FileTime::now();
        Self {
            index_number,
            data: Mutex::new(vec![]),
            meta: Mutex::new(MemMeta {
                file_attributes,
                creation_time: now,
                last_access_time: now,
                last_write_time: now,
                change_time: now,
                security: SecurityDescriptor::default(),
                reparse: None,
                panic_on_read: false,
                deleted: false,
            }),
        }
    }

    fn is_dir(&self) -> bool {
        self.meta.lock().file_attributes.is_directory()
    }

    fn file_info(&self) -> FileInfo {
        let size = self.data.lock().len() as u64;
        let meta = self.meta.lock();
        let mut file_attributes = meta.file_attributes;
        let reparse_tag = match &meta.reparse {
            Some(reparse) => {
                file_attributes |= FileAttributes::REPARSE_POINT;
                reparse.tag.0
            }
            None => 0,
        };

        FileInfo {
            file_attributes,
            reparse_tag,
            allocation_size: size.div_ceil(ALLOCATION_UNIT) * ALLOCATION_UNIT,
            file_size: size,
            creation_time: meta.creation_time,
            last_access_time: meta.last_access_time,
            last_write_time: meta.last_write_time,
            change_time: meta.change_time,
            index_number: self.index_number,
            hard_links: 0,
            ea_size: 0,
        }
    }

    fn touch(&self) {
        let now = FileTime::now();
        let mut meta = self.meta.lock();
        meta.last_write_time = now;
        meta.change_time = now;
    }
}

/// In-memory filesystem, with symbolic links.
pub struct MemFs {
    arena: ContextArena<MemNode, MemOpen>,
    tree: Mutex<BTreeMap<String, NodeHandle>>,
    /// Index number of the next node. Never reused.
    next_index: AtomicU64,
    volume_label: Mutex<String>,
    total_size: u64,
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('\\') {
        Some(0) | None => "\\",
        Some(idx) => &path[..idx],
    }
}

fn file_name_of(path: &str) -> &str {
    path.rsplit('\\').next().unwrap_or(path)
}

fn is_child(parent: &str, path: &str) -> bool {
    path != "\\" && parent_of(path) == parent
}

impl MemFs {
    pub fn new() -> Self {
        let arena = ContextArena::new();
        let root = arena.add_node(MemNode::new(1, FileAttributes::DIRECTORY));
        let mut tree = BTreeMap::new();
        tree.insert("\\".to_string(), root);

        Self {
            arena,
            tree: Mutex::new(tree),
            next_index: AtomicU64::new(2),
            volume_label: Mutex::new("memfs".to_string()),
            total_size: 1 << 30,
        }
    }

    fn lookup(&self, path: &str) -> Option<(NodeHandle, Arc<MemNode>)> {
        let handle = *self.tree.lock().get(path)?;
        let node = self.arena.node(handle)?;

        Some((handle, node))
    }

    fn insert(&self, path: &str, file_attributes: FileAttributes) -> FsResult<NodeHandle> {
        let mut tree = self.tree.lock();
        if tree.contains_key(path) {
            return Err(FsError::Status(NtStatus::OBJECT_NAME_COLLISION));
        }
        let parent = tree.get(parent_of(path)).ok_or(FsError::PathNotFound)?;
        let parent = self.arena.node(*parent).ok_or(FsError::PathNotFound)?;
        if !parent.is_dir() {
            return Err(FsError::PathNotFound);
        }
        let index_number = self.next_index.fetch_add(1, Ordering::Relaxed);
        let handle = self
            .arena
            .add_node(MemNode::new(index_number, file_attributes));
        tree.insert(path.to_string(), handle);

        Ok(handle)
    }

    /// Create a directory.
    pub fn mkdir(&self, path: &str) -> FsResult<()> {
        self.insert(path, FileAttributes::DIRECTORY)?;

        Ok(())
    }

    /// Create a file with the given content.
    pub fn add_file(&self, path: &str, content: &[u8]) -> FsResult<()> {
        let handle = self.insert(path, FileAttributes::ARCHIVE)?;
        if let Some(node) = self.arena.node(handle) {
            node.data.lock().extend_from_slice(content);
        }

        Ok(())
    }

    /// Create a symbolic link.
    pub fn symlink(&self, path: &str, target: &str) -> FsResult<()> {
        let link = ReparseBuffer::symlink(target, !target.starts_with('\\'))?;
        let handle = self.insert(path, FileAttributes::ARCHIVE)?;
        if let Some(node) = self.arena.node(handle) {
            node.meta.lock().reparse = Some(link);
        }

        Ok(())
    }

    /// Make every read of `path` panic.
    pub fn panic_on_read(&self, path: &str) -> FsResult<()> {
        let (_, node) = self.lookup(path).ok_or(FsError::NotFound)?;
        node.meta.lock().panic_on_read = true;

        Ok(())
    }

    pub fn exists(&self, path: &str) -> bool {
        self.tree.lock().contains_key(path)
    }

    /// Number of opens not yet closed.
    pub fn open_count(&self) -> usize {
        self.arena.open_count()
    }

    fn open_node(&self, handle: NodeHandle, node: &MemNode) -> FsResult<Opened> {
        let context = self.arena.open(handle, MemOpen::default())?;

        Ok(Opened::new(context, OpenFileInfo::from(node.file_info())))
    }

    fn free_size(&self) -> u64 {
        let tree = self.tree.lock();
        let used = tree
            .values()
            .filter_map(|h| self.arena.node(*h))
            .map(|n| n.data.lock().len() as u64)
            .sum::<u64>();

        self.total_size.saturating_sub(used)
    }
}

impl FileSystem for MemFs {
    fn get_volume_info(&self) -> FsResult<VolumeInfo> {
        Ok(VolumeInfo::new(
            self.total_size,
            self.free_size(),
            &self.volume_label.lock(),
        ))
    }

    fn set_volume_label(&self, volume_label: &str) -> FsResult<VolumeInfo> {
        *self.volume_label.lock() = volume_label.to_string();

        self.get_volume_info()
    }

    fn get_security_by_name(&self, file_name: &str, want_security: bool) -> FsResult<NameLookup> {
        match self.lookup(file_name) {
            Some((_, node)) => {
                let info = node.file_info();
                let security = if want_security {
                    Some(node.meta.lock().security.clone())
                } else {
                    None
                };

                Ok(NameLookup::Found {
                    file_attributes: info.file_attributes,
                    security,
                })
            }
            None => {
                match reparse::find_reparse_point(file_name, |name, is_dir| {
                    self.get_reparse_point_by_name(name, is_dir)
                }) {
                    Some(index) => Ok(NameLookup::Reparse { index }),
                    None => Err(FsError::NotFound),
                }
            }
        }
    }

    fn create(
        &self,
        file_name: &str,
        create_options: u32,
        _granted_access: u32,
        file_attributes: FileAttributes,
        security: Option<&SecurityDescriptor>,
        _allocation_size: u64,
    ) -> FsResult<Opened> {
        let mut file_attributes = file_attributes;
        if create_options & FILE_DIRECTORY_FILE != 0 {
            file_attributes |= FileAttributes::DIRECTORY;
        } else {
            file_attributes |= FileAttributes::ARCHIVE;
        }
        let handle = self.insert(file_name, file_attributes)?;
        let node = self.arena.node(handle).ok_or(FsError::InvalidHandle)?;
        if let Some(security) = security {
            node.meta.lock().security = security.clone();
        }

        self.open_node(handle, &node)
    }

    fn open(&self, file_name: &str, _create_options: u32, _granted_access: u32) -> FsResult<Opened> {
        let (handle, node) = self.lookup(file_name).ok_or(FsError::NotFound)?;

        self.open_node(handle, &node)
    }

    fn overwrite(
        &self,
        context: FileContext,
        file_attributes: FileAttributes,
        replace_file_attributes: bool,
        _allocation_size: u64,
    ) -> FsResult<FileInfo> {
        let (node, _) = self.arena.get(context)?;
        node.data.lock().clear();
        {
            let mut meta = node.meta.lock();
            if replace_file_attributes {
                meta.file_attributes = file_attributes | FileAttributes::ARCHIVE;
            } else {
                meta.file_attributes |= file_attributes | FileAttributes::ARCHIVE;
            }
        }
        node.touch();

        Ok(node.file_info())
    }

    fn cleanup(&self, context: FileContext, file_name: Option<&str>, flags: CleanupFlags) {
        let Ok((node, _)) = self.arena.get(context) else {
            return;
        };
        if flags.contains(CleanupFlags::DELETE)
            && let Some(file_name) = file_name
        {
            self.tree.lock().remove(file_name);
            node.meta.lock().deleted = true;
        }
        if flags.contains(CleanupFlags::SET_LAST_WRITE_TIME) {
            node.touch();
        }
    }

    fn close(&self, context: FileContext) {
        if self.arena.close(context).is_none() {
            return;
        }
        if let Some(node) = self.arena.node(context.node)
            && node.meta.lock().deleted
        {
            self.arena.remove_node(context.node);
        }
    }

    fn read(&self, context: FileContext, buf: &mut [u8], offset: u64) -> FsResult<usize> {
        let (node, _) = self.arena.get(context)?;
        if node.meta.lock().panic_on_read {
            panic!("read of {context:?}");
        }
        let data = node.data.lock();
        let offset = usize::try_from(offset).map_err(|_| FsError::InvalidRequest("offset"))?;
        if offset >= data.len() {
            return Err(FsError::Status(NtStatus::END_OF_FILE));
        }
        let len = buf.len().min(data.len() - offset);
        buf[..len].copy_from_slice(&data[offset..offset + len]);

        Ok(len)
    }

    fn write(
        &self,
        context: FileContext,
        buf: &[u8],
        offset: u64,
        write_to_end_of_file: bool,
        constrained_io: bool,
    ) -> FsResult<Written> {
        let (node, _) = self.arena.get(context)?;
        let bytes_transferred = {
            let mut data = node.data.lock();
            let offset = if write_to_end_of_file {
                data.len()
            } else {
                usize::try_from(offset).map_err(|_| FsError::InvalidRequest("offset"))?
            };
            let mut len = buf.len();
            if constrained_io {
                len = len.min(data.len().saturating_sub(offset));
            }
            if len > 0 {
                let end = offset
                    .checked_add(len)
                    .ok_or(FsError::InvalidRequest("offset"))?;
                if end as u64 > self.total_size {
                    return Err(FsError::Status(NtStatus::DISK_FULL));
                }
                if end > data.len() {
                    let cur_len = data.len();
                    data.try_reserve(end - cur_len)?;
                    data.resize(end, 0);
                }
                data[offset..end].copy_from_slice(&buf[..len]);
            }

            len
        };
        node.touch();

        Ok(Written {
            bytes_transferred,
            file_info: node.file_info(),
        })
    }

    fn flush(&self, context: FileContext) -> FsResult<FileInfo> {
        if context.is_null() {
            return Ok(FileInfo::default());
        }
        let (node, _) = self.arena.get(context)?;

        Ok(node.file_info())
    }

    fn get_file_info(&self, context: FileContext) -> FsResult<FileInfo> {
        let (node, _) = self.arena.get(context)?;

        Ok(node.file_info())
    }

    fn set_basic_info(&self, context: FileContext, info: &BasicInfo) -> FsResult<FileInfo> {
        let (node, _) = self.arena.get(context)?;
        {
            let mut meta = node.meta.lock();
            if let Some(attrs) = info.file_attributes {
                meta.file_attributes =
                    attrs | (meta.file_attributes & FileAttributes::DIRECTORY);
            }
            if let Some(t) = info.creation_time {
                meta.creation_time = t;
            }
            if let Some(t) = info.last_access_time {
                meta.last_access_time = t;
            }
            if let Some(t) = info.last_write_time {
                meta.last_write_time = t;
            }
            if let Some(t) = info.change_time {
                meta.change_time = t;
            }
        }

        Ok(node.file_info())
    }

    fn set_file_size(
        &self,
        context: FileContext,
        new_size: u64,
        set_allocation_size: bool,
    ) -> FsResult<FileInfo> {
        let (node, _) = self.arena.get(context)?;
        let new_size = usize::try_from(new_size).map_err(|_| FsError::ResourceExhaustion)?;
        {
            let mut data = node.data.lock();
            if !set_allocation_size || new_size < data.len() {
                if new_size > data.len() {
                    let cur_len = data.len();
                    data.try_reserve(new_size - cur_len)?;
                }
                data.resize(new_size, 0);
            }
        }
        node.touch();

        Ok(node.file_info())
    }

    fn can_delete(&self, context: FileContext, file_name: &str) -> FsResult<()> {
        let (node, _) = self.arena.get(context)?;
        if node.is_dir() && self.tree.lock().keys().any(|p| is_child(file_name, p)) {
            return Err(FsError::Status(NtStatus::DIRECTORY_NOT_EMPTY));
        }

        Ok(())
    }

    fn rename(
        &self,
        context: FileContext,
        file_name: &str,
        new_file_name: &str,
        replace_if_exists: bool,
    ) -> FsResult<()> {
        self.arena.get(context)?;
        let mut tree = self.tree.lock();
        if let Some(existing) = tree.get(new_file_name) {
            if !replace_if_exists {
                return Err(FsError::Status(NtStatus::OBJECT_NAME_COLLISION));
            }
            if self.arena.node(*existing).is_some_and(|n| n.is_dir()) {
                return Err(FsError::Status(NtStatus::ACCESS_DENIED));
            }
        }
        let prefix = format!("{file_name}\\");
        let moved = tree
            .keys()
            .filter(|p| *p == file_name || p.starts_with(&prefix))
            .cloned()
            .collect::<Vec<_>>();
        if moved.is_empty() {
            return Err(FsError::NotFound);
        }
        for old in moved {
            if let Some(handle) = tree.remove(&old) {
                let new = format!("{new_file_name}{}", &old[file_name.len()..]);
                tree.insert(new, handle);
            }
        }

        Ok(())
    }

    fn get_security(&self, context: FileContext) -> FsResult<SecurityDescriptor> {
        let (node, _) = self.arena.get(context)?;

        Ok(node.meta.lock().security.clone())
    }

    fn set_security(
        &self,
        context: FileContext,
        _security_information: u32,
        modification: &SecurityDescriptor,
    ) -> FsResult<()> {
        let (node, _) = self.arena.get(context)?;
        node.meta.lock().security = modification.clone();

        Ok(())
    }

    fn read_directory(
        &self,
        context: FileContext,
        _pattern: Option<&str>,
        marker: Option<&str>,
        buffer: &mut TransferBuffer<'_>,
    ) -> FsResult<()> {
        let (node, open) = self.arena.get(context)?;
        if !node.is_dir() {
            return Err(FsError::Status(NtStatus::NOT_A_DIRECTORY));
        }
        let dir = self
            .tree
            .lock()
            .iter()
            .find(|(_, h)| **h == context.node)
            .map(|(p, _)| p.clone())
            .ok_or(FsError::NotFound)?;
        if let Some(mut filler) = open.dir_buffer.acquire(marker.is_none()) {
            let children = self
                .tree
                .lock()
                .iter()
                .filter(|(p, _)| is_child(&dir, p))
                .map(|(p, h)| (file_name_of(p).to_string(), *h))
                .collect::<Vec<_>>();
            for (name, handle) in children {
                if let Some(child) = self.arena.node(handle) {
                    filler.fill(&DirInfo::new(&name, child.file_info()))?;
                }
            }
        }
        open.dir_buffer.read(marker, buffer);

        Ok(())
    }

    fn get_reparse_point_by_name(&self, file_name: &str, _is_directory: bool) -> FsResult<ReparseBuffer> {
        let (_, node) = self.lookup(file_name).ok_or(FsError::NotFound)?;
        let meta = node.meta.lock();

        meta.reparse.clone().ok_or(FsError::NotAReparsePoint)
    }

    fn get_reparse_point(&self, context: FileContext, _file_name: &str) -> FsResult<ReparseBuffer> {
        let (node, _) = self.arena.get(context)?;
        let meta = node.meta.lock();

        meta.reparse.clone().ok_or(FsError::NotAReparsePoint)
    }

    fn set_reparse_point(
        &self,
        context: FileContext,
        _file_name: &str,
        reparse: &ReparseBuffer,
    ) -> FsResult<()> {
        let (node, _) = self.arena.get(context)?;
        let mut meta = node.meta.lock();
        if let Some(current) = &meta.reparse {
            reparse::can_replace_reparse_point(&current.to_bytes()?, &reparse.to_bytes()?)?;
        }
        meta.reparse = Some(reparse.clone());

        Ok(())
    }

    fn delete_reparse_point(
        &self,
        context: FileContext,
        _file_name: &str,
        reparse: &ReparseBuffer,
    ) -> FsResult<()> {
        let (node, _) = self.arena.get(context)?;
        let mut meta = node.meta.lock();
        let current = meta.reparse.as_ref().ok_or(FsError::NotAReparsePoint)?;
        reparse::can_replace_reparse_point(&current.to_bytes()?, &reparse.to_bytes()?)?;
        meta.reparse = None;

        Ok(())
    }

    fn get_stream_info(&self, context: FileContext, buffer: &mut TransferBuffer<'_>) -> FsResult<()> {
        let (node, _) = self.arena.get(context)?;
        if !node.is_dir() {
            let info = node.file_info();
            let stream = StreamInfo::new("::$DATA", info.file_size, info.allocation_size);
            if !buffer.add_stream_info(&stream)? {
                return Ok(());
            }
        }
        buffer.end();

        Ok(())
    }
}
