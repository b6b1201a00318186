use crate::error::FsResult;
use userfs_types::wire::align_record;
use userfs_types::{DirInfo, Record, StreamInfo};

/// Reply buffer of ReadDirectory and GetStreamInfo.
///
/// Records are written at 8-byte aligned offsets. A record is only
/// written if it fits whole, including its alignment padding.
pub struct TransferBuffer<'a> {
    buf: &'a mut [u8],
    transferred: usize,
}

impl<'a> TransferBuffer<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf,
            transferred: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Number of bytes written so far, padding included.
    pub fn bytes_transferred(&self) -> usize {
        self.transferred
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.transferred]
    }

    /// Append a record.
    ///
    /// Returns false, without writing anything, if the record doesn't
    /// fit. The caller is expected to stop there.
    pub fn add<R: Record>(&mut self, record: &R) -> FsResult<bool> {
        Ok(self.add_bytes(&record.to_bytes()?))
    }

    pub fn add_dir_info(&mut self, info: &DirInfo) -> FsResult<bool> {
        self.add(info)
    }

    pub fn add_stream_info(&mut self, info: &StreamInfo) -> FsResult<bool> {
        self.add(info)
    }

    /// Append the end-of-listing record, if it fits.
    pub fn end(&mut self) -> bool {
        if self.buf.len() - self.transferred < 2 {
            return false;
        }
        self.buf[self.transferred..self.transferred + 2].fill(0);
        self.transferred += 2;

        true
    }

    /// Append an already encoded record.
    pub(crate) fn add_bytes(&mut self, bytes: &[u8]) -> bool {
        let aligned = align_record(bytes.len());
        if self.buf.len() - self.transferred < aligned {
            return false;
        }
        let start = self.transferred;
        self.buf[start..start + bytes.len()].copy_from_slice(bytes);
        self.buf[start + bytes.len()..start + aligned].fill(0);
        self.transferred += aligned;

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use userfs_types::{FileInfo, Listing};

    #[test]
    fn records_are_aligned() -> anyhow::Result<()> {
        let mut buf = [0xffu8; 512];
        let mut transfer = TransferBuffer::new(&mut buf);
        assert!(transfer.add_dir_info(&DirInfo::new("a", FileInfo::default()))?);
        assert_eq!(112, transfer.bytes_transferred());
        assert!(transfer.add_dir_info(&DirInfo::new("bcd", FileInfo::default()))?);
        assert_eq!(224, transfer.bytes_transferred());
        assert!(transfer.end());

        let listing = Listing::<DirInfo>::decode(transfer.as_bytes())?;
        assert_eq!(vec!["a", "bcd"], listing.names());
        assert!(listing.end_of_listing);

        Ok(())
    }

    #[test]
    fn stops_when_full() -> anyhow::Result<()> {
        let mut buf = [0u8; 150];
        let mut transfer = TransferBuffer::new(&mut buf);
        assert!(transfer.add_dir_info(&DirInfo::new("a", FileInfo::default()))?);
        assert!(!transfer.add_dir_info(&DirInfo::new("b", FileInfo::default()))?);
        assert_eq!(112, transfer.bytes_transferred());

        Ok(())
    }

    #[test]
    fn end_needs_room() {
        let mut buf = [0u8; 1];
        let mut transfer = TransferBuffer::new(&mut buf);
        assert!(!transfer.end());
        assert_eq!(0, transfer.bytes_transferred());
    }

    #[test]
    fn stream_info() -> anyhow::Result<()> {
        let mut buf = [0u8; 128];
        let mut transfer = TransferBuffer::new(&mut buf);
        assert!(transfer.add_stream_info(&StreamInfo::new("::$DATA", 1, 4096))?);
        assert!(transfer.end());

        let listing = Listing::<StreamInfo>::decode(transfer.as_bytes())?;
        assert_eq!(vec!["::$DATA"], listing.names());

        Ok(())
    }
}
