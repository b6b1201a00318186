//! Paged enumeration buffer.
//!
//! A provider fills the buffer once per listing, then answers each
//! ReadDirectory call by copying the part of the buffer that follows
//! the marker sent by the host.

use crate::error::FsResult;
use crate::transfer::TransferBuffer;
use parking_lot::{RwLock, RwLockWriteGuard};
use userfs_types::Record;

/// Per-descriptor store of encoded directory or stream records.
#[derive(Default)]
pub struct DirectoryBuffer {
    state: RwLock<BufferState>,
}

#[derive(Default)]
struct BufferState {
    entries: Vec<Entry>,

    /// Set once a fill has been released.
    filled: bool,
}

struct Entry {
    name: String,
    bytes: Vec<u8>,
}

impl DirectoryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start filling the buffer.
    ///
    /// Returns `None` if the buffer was already filled and `reset` is
    /// false: the content is current and can be read directly. With
    /// `reset`, previous content is discarded.
    ///
    /// Only one filler can exist at a time; other callers, readers
    /// included, wait until it is released.
    pub fn acquire(&self, reset: bool) -> Option<DirectoryFiller<'_>> {
        let mut state = self.state.write();
        if reset {
            state.entries.clear();
            state.filled = false;
        }
        if state.filled {
            return None;
        }

        Some(DirectoryFiller { state })
    }

    /// Copy whole records following the record named `marker` into
    /// `dest`, until `dest` is full.
    ///
    /// With no marker, copy from the start. An unknown marker copies
    /// nothing. The end-of-listing record is added once the last
    /// record has been copied. Returns the number of records copied.
    pub fn read(&self, marker: Option<&str>, dest: &mut TransferBuffer<'_>) -> usize {
        let state = self.state.read();
        let start = match marker {
            None | Some("") => 0,
            Some(marker) => match state.entries.iter().position(|e| e.name == marker) {
                Some(idx) => idx + 1,
                None => {
                    log::debug!("unknown marker {marker:?}");
                    return 0;
                }
            },
        };

        let mut count = 0;
        for entry in &state.entries[start..] {
            if !dest.add_bytes(&entry.bytes) {
                return count;
            }
            count += 1;
        }
        dest.end();

        count
    }

    /// Number of records in the buffer.
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discard the content and its storage.
    ///
    /// The next [DirectoryBuffer::acquire] starts a new fill.
    pub fn delete(&self) {
        *self.state.write() = BufferState::default();
    }
}

/// Exclusive access to a [DirectoryBuffer] being filled.
///
/// Dropping the filler releases the buffer for reading.
pub struct DirectoryFiller<'a> {
    state: RwLockWriteGuard<'a, BufferState>,
}

impl DirectoryFiller<'_> {
    /// Append a record.
    ///
    /// Fails with [crate::FsError::ResourceExhaustion] if memory runs
    /// out, leaving the records appended so far in place.
    pub fn fill<R: Record>(&mut self, record: &R) -> FsResult<()> {
        let bytes = record.to_bytes()?;
        let mut name = String::new();
        name.try_reserve_exact(record.name().len())?;
        name.push_str(record.name());
        self.state.entries.try_reserve(1)?;
        self.state.entries.push(Entry { name, bytes });

        Ok(())
    }

    /// End the fill, making the content readable.
    pub fn release(self) {}
}

impl Drop for DirectoryFiller<'_> {
    fn drop(&mut self) {
        self.state.filled = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use userfs_types::{DirInfo, FileInfo, Listing};

    fn fill(buffer: &DirectoryBuffer, names: &[&str]) -> anyhow::Result<()> {
        let mut filler = buffer.acquire(true).unwrap();
        for name in names {
            filler.fill(&DirInfo::new(name, FileInfo::default()))?;
        }
        filler.release();

        Ok(())
    }

    fn read(buffer: &DirectoryBuffer, marker: Option<&str>, size: usize) -> Listing<DirInfo> {
        let mut buf = vec![0u8; size];
        let mut transfer = TransferBuffer::new(&mut buf);
        buffer.read(marker, &mut transfer);
        let len = transfer.bytes_transferred();

        Listing::decode(&buf[..len]).unwrap()
    }

    #[test]
    fn paging() -> anyhow::Result<()> {
        let buffer = DirectoryBuffer::new();
        fill(&buffer, &["a", "b", "c"])?;

        // Room for exactly two records.
        let first = read(&buffer, None, 224);
        assert_eq!(vec!["a", "b"], first.names());
        assert!(!first.end_of_listing);

        let second = read(&buffer, Some("b"), 224);
        assert_eq!(vec!["c"], second.names());
        assert!(second.end_of_listing);

        Ok(())
    }

    #[test]
    fn empty_marker_reads_from_start() -> anyhow::Result<()> {
        let buffer = DirectoryBuffer::new();
        fill(&buffer, &["a", "b"])?;

        assert_eq!(vec!["a", "b"], read(&buffer, Some(""), 1024).names());

        Ok(())
    }

    #[test]
    fn unknown_marker() -> anyhow::Result<()> {
        let buffer = DirectoryBuffer::new();
        fill(&buffer, &["a", "b"])?;

        let listing = read(&buffer, Some("zz"), 1024);
        assert!(listing.entries.is_empty());
        assert!(!listing.end_of_listing);

        Ok(())
    }

    #[test]
    fn order_is_kept() -> anyhow::Result<()> {
        let buffer = DirectoryBuffer::new();
        fill(&buffer, &["c", "a", "b"])?;

        assert_eq!(vec!["c", "a", "b"], read(&buffer, None, 1024).names());
        assert_eq!(vec!["b"], read(&buffer, Some("a"), 1024).names());

        Ok(())
    }

    #[test]
    fn acquire_without_reset() -> anyhow::Result<()> {
        let buffer = DirectoryBuffer::new();
        assert!(buffer.acquire(false).is_some());
        fill(&buffer, &["a"])?;

        assert!(buffer.acquire(false).is_none());
        assert_eq!(1, buffer.len());

        assert!(buffer.acquire(true).is_some());
        assert!(buffer.is_empty());

        Ok(())
    }

    #[test]
    fn delete() -> anyhow::Result<()> {
        let buffer = DirectoryBuffer::new();
        fill(&buffer, &["a"])?;
        buffer.delete();

        assert!(buffer.is_empty());
        assert!(buffer.acquire(false).is_some());

        Ok(())
    }

    #[test]
    fn reader_waits_for_filler() -> anyhow::Result<()> {
        let buffer = std::sync::Arc::new(DirectoryBuffer::new());
        let mut filler = buffer.acquire(true).unwrap();

        let reader = {
            let buffer = std::sync::Arc::clone(&buffer);
            std::thread::spawn(move || read(&buffer, None, 1024).names().len())
        };
        std::thread::sleep(std::time::Duration::from_millis(50));
        filler.fill(&DirInfo::new("a", FileInfo::default()))?;
        filler.fill(&DirInfo::new("b", FileInfo::default()))?;
        filler.release();

        assert_eq!(2, reader.join().unwrap());

        Ok(())
    }
}
