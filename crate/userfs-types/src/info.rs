use crate::time::FileTime;
use crate::wire::{self, Reader, Record, WireError};

bitflags::bitflags! {
    /// File attributes, as stored in FileInfo.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct FileAttributes: u32 {
        const READONLY = 0x0000_0001;
        const HIDDEN = 0x0000_0002;
        const SYSTEM = 0x0000_0004;
        const DIRECTORY = 0x0000_0010;
        const ARCHIVE = 0x0000_0020;
        const DEVICE = 0x0000_0040;
        const NORMAL = 0x0000_0080;
        const TEMPORARY = 0x0000_0100;
        const SPARSE_FILE = 0x0000_0200;
        const REPARSE_POINT = 0x0000_0400;
        const COMPRESSED = 0x0000_0800;
        const OFFLINE = 0x0000_1000;
        const NOT_CONTENT_INDEXED = 0x0000_2000;
        const ENCRYPTED = 0x0000_4000;
    }
}

impl FileAttributes {
    /// Raw value the host sends to mean "leave attributes unchanged".
    pub const UNCHANGED: u32 = u32::MAX;

    pub fn is_directory(&self) -> bool {
        self.contains(FileAttributes::DIRECTORY)
    }
}

bitflags::bitflags! {
    /// Actions the provider must apply itself during Cleanup.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct CleanupFlags: u32 {
        const DELETE = 0x01;
        const SET_ALLOCATION_SIZE = 0x02;
        const SET_ARCHIVE_BIT = 0x10;
        const SET_LAST_ACCESS_TIME = 0x20;
        const SET_LAST_WRITE_TIME = 0x40;
        const SET_CHANGE_TIME = 0x80;
    }
}

/// Metadata of a file, returned by most operations.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileInfo {
    pub file_attributes: FileAttributes,
    pub reparse_tag: u32,
    pub allocation_size: u64,
    pub file_size: u64,
    pub creation_time: FileTime,
    pub last_access_time: FileTime,
    pub last_write_time: FileTime,
    pub change_time: FileTime,
    pub index_number: u64,
    pub hard_links: u32,
    pub ea_size: u32,
}

impl FileInfo {
    pub const SIZE: usize = 72;

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.file_attributes.bits().to_le_bytes());
        out.extend_from_slice(&self.reparse_tag.to_le_bytes());
        out.extend_from_slice(&self.allocation_size.to_le_bytes());
        out.extend_from_slice(&self.file_size.to_le_bytes());
        out.extend_from_slice(&self.creation_time.0.to_le_bytes());
        out.extend_from_slice(&self.last_access_time.0.to_le_bytes());
        out.extend_from_slice(&self.last_write_time.0.to_le_bytes());
        out.extend_from_slice(&self.change_time.0.to_le_bytes());
        out.extend_from_slice(&self.index_number.to_le_bytes());
        out.extend_from_slice(&self.hard_links.to_le_bytes());
        out.extend_from_slice(&self.ea_size.to_le_bytes());
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        self.write_to(&mut out);

        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, WireError> {
        FileInfo::read(&mut Reader::new(data))
    }

    pub(crate) fn read(r: &mut Reader<'_>) -> Result<Self, WireError> {
        Ok(FileInfo {
            file_attributes: FileAttributes::from_bits_retain(r.u32()?),
            reparse_tag: r.u32()?,
            allocation_size: r.u64()?,
            file_size: r.u64()?,
            creation_time: FileTime(r.u64()?),
            last_access_time: FileTime(r.u64()?),
            last_write_time: FileTime(r.u64()?),
            change_time: FileTime(r.u64()?),
            index_number: r.u64()?,
            hard_links: r.u32()?,
            ea_size: r.u32()?,
        })
    }
}

/// Result of Create and Open.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OpenFileInfo {
    pub file_info: FileInfo,

    /// Name of the file as stored, if it differs from the requested
    /// name, for case-insensitive filesystems.
    pub normalized_name: Option<String>,
}

impl From<FileInfo> for OpenFileInfo {
    fn from(file_info: FileInfo) -> Self {
        OpenFileInfo {
            file_info,
            normalized_name: None,
        }
    }
}

/// Size and label of the volume.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VolumeInfo {
    pub total_size: u64,
    pub free_size: u64,
    volume_label: String,
}

impl VolumeInfo {
    pub const SIZE: usize = 88;

    /// Maximum label length, in UTF-16 code units.
    pub const LABEL_MAX: usize = 32;

    pub fn new(total_size: u64, free_size: u64, label: &str) -> Self {
        VolumeInfo {
            total_size,
            free_size,
            volume_label: wire::truncate_utf16(label, Self::LABEL_MAX),
        }
    }

    pub fn volume_label(&self) -> &str {
        &self.volume_label
    }

    /// Set the label, truncating it to [VolumeInfo::LABEL_MAX].
    pub fn set_volume_label(&mut self, label: &str) {
        self.volume_label = wire::truncate_utf16(label, Self::LABEL_MAX);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let label = wire::utf16_bytes(&self.volume_label);
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&self.total_size.to_le_bytes());
        out.extend_from_slice(&self.free_size.to_le_bytes());
        out.extend_from_slice(&(label.len() as u16).to_le_bytes());
        out.extend_from_slice(&label);
        out.resize(Self::SIZE, 0);

        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < Self::SIZE {
            return Err(WireError::Truncated {
                needed: Self::SIZE,
                available: data.len(),
            });
        }
        let mut r = Reader::new(data);
        let total_size = r.u64()?;
        let free_size = r.u64()?;
        let label_len = r.u16()? as usize;
        if label_len > Self::LABEL_MAX * 2 {
            return Err(WireError::InvalidSize(label_len));
        }
        let volume_label = wire::string_from_utf16(r.bytes(label_len)?)?;

        Ok(VolumeInfo {
            total_size,
            free_size,
            volume_label,
        })
    }
}

/// One entry of a directory listing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirInfo {
    pub file_info: FileInfo,
    pub file_name: String,
}

impl DirInfo {
    pub const HEADER_SIZE: usize = 104;

    pub fn new(file_name: &str, file_info: FileInfo) -> Self {
        DirInfo {
            file_info,
            file_name: file_name.to_string(),
        }
    }
}

impl Record for DirInfo {
    fn name(&self) -> &str {
        &self.file_name
    }

    fn record_len(&self) -> usize {
        Self::HEADER_SIZE + wire::utf16_len(&self.file_name) * 2
    }

    fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        let len = self.record_len();
        let size = u16::try_from(len).map_err(|_| WireError::InvalidSize(len))?;
        let mut out = Vec::with_capacity(len);
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&[0; 6]);
        self.file_info.write_to(&mut out);
        out.extend_from_slice(&[0; 24]);
        out.extend_from_slice(&wire::utf16_bytes(&self.file_name));

        Ok(out)
    }

    fn from_bytes(data: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(data);
        let size = r.u16()? as usize;
        if size < Self::HEADER_SIZE || size > data.len() {
            return Err(WireError::InvalidSize(size));
        }
        r.skip(6)?;
        let file_info = FileInfo::read(&mut r)?;
        r.skip(24)?;
        let file_name = wire::string_from_utf16(r.bytes(size - Self::HEADER_SIZE)?)?;

        Ok(DirInfo {
            file_info,
            file_name,
        })
    }
}

/// One named stream of a file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamInfo {
    pub stream_size: u64,
    pub stream_allocation_size: u64,
    pub stream_name: String,
}

impl StreamInfo {
    pub const HEADER_SIZE: usize = 24;

    pub fn new(stream_name: &str, stream_size: u64, stream_allocation_size: u64) -> Self {
        StreamInfo {
            stream_size,
            stream_allocation_size,
            stream_name: stream_name.to_string(),
        }
    }
}

impl Record for StreamInfo {
    fn name(&self) -> &str {
        &self.stream_name
    }

    fn record_len(&self) -> usize {
        Self::HEADER_SIZE + wire::utf16_len(&self.stream_name) * 2
    }

    fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        let len = self.record_len();
        let size = u16::try_from(len).map_err(|_| WireError::InvalidSize(len))?;
        let mut out = Vec::with_capacity(len);
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&[0; 6]);
        out.extend_from_slice(&self.stream_size.to_le_bytes());
        out.extend_from_slice(&self.stream_allocation_size.to_le_bytes());
        out.extend_from_slice(&wire::utf16_bytes(&self.stream_name));

        Ok(out)
    }

    fn from_bytes(data: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(data);
        let size = r.u16()? as usize;
        if size < Self::HEADER_SIZE || size > data.len() {
            return Err(WireError::InvalidSize(size));
        }
        r.skip(6)?;
        let stream_size = r.u64()?;
        let stream_allocation_size = r.u64()?;
        let stream_name = wire::string_from_utf16(r.bytes(size - Self::HEADER_SIZE)?)?;

        Ok(StreamInfo {
            stream_size,
            stream_allocation_size,
            stream_name,
        })
    }
}

/// Opaque security descriptor, transported but never interpreted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct SecurityDescriptor(pub Vec<u8>);

impl SecurityDescriptor {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&[u8]> for SecurityDescriptor {
    fn from(value: &[u8]) -> Self {
        SecurityDescriptor(value.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info() -> FileInfo {
        FileInfo {
            file_attributes: FileAttributes::ARCHIVE | FileAttributes::READONLY,
            reparse_tag: 0,
            allocation_size: 4096,
            file_size: 1234,
            creation_time: FileTime(1),
            last_access_time: FileTime(2),
            last_write_time: FileTime(3),
            change_time: FileTime(4),
            index_number: 42,
            hard_links: 1,
            ea_size: 0,
        }
    }

    #[test]
    fn file_info_layout() -> anyhow::Result<()> {
        let bytes = sample_info().to_bytes();
        assert_eq!(FileInfo::SIZE, bytes.len());
        assert_eq!(&[0x21, 0, 0, 0], &bytes[0..4]);
        assert_eq!(1234u64.to_le_bytes(), bytes[16..24]);
        assert_eq!(42u64.to_le_bytes(), bytes[56..64]);
        assert_eq!(sample_info(), FileInfo::from_bytes(&bytes)?);

        Ok(())
    }

    #[test]
    fn file_info_keeps_unknown_attributes() -> anyhow::Result<()> {
        let mut bytes = FileInfo::default().to_bytes();
        bytes[2] = 0x08;
        let info = FileInfo::from_bytes(&bytes)?;
        assert_eq!(0x0008_0000, info.file_attributes.bits());

        Ok(())
    }

    #[test]
    fn dir_info_layout() -> anyhow::Result<()> {
        let entry = DirInfo::new("foo.txt", sample_info());
        let bytes = entry.to_bytes()?;
        assert_eq!(DirInfo::HEADER_SIZE + 14, bytes.len());
        assert_eq!(entry.record_len(), bytes.len());
        assert_eq!(118u16.to_le_bytes(), bytes[0..2]);
        assert_eq!(&sample_info().to_bytes()[..], &bytes[8..80]);
        assert_eq!(entry, DirInfo::from_bytes(&bytes)?);

        Ok(())
    }

    #[test]
    fn dir_info_rejects_short_size() {
        let mut bytes = DirInfo::new("x", FileInfo::default())
            .to_bytes()
            .unwrap();
        bytes[0] = 10;
        assert_eq!(
            Err(WireError::InvalidSize(10)),
            DirInfo::from_bytes(&bytes)
        );
    }

    #[test]
    fn stream_info_layout() -> anyhow::Result<()> {
        let entry = StreamInfo::new("::$DATA", 10, 4096);
        let bytes = entry.to_bytes()?;
        assert_eq!(StreamInfo::HEADER_SIZE + 14, bytes.len());
        assert_eq!(10u64.to_le_bytes(), bytes[8..16]);
        assert_eq!(entry, StreamInfo::from_bytes(&bytes)?);

        Ok(())
    }

    #[test]
    fn volume_info_label_truncated() -> anyhow::Result<()> {
        let long = "L".repeat(40);
        let info = VolumeInfo::new(100, 50, &long);
        assert_eq!(32, info.volume_label().len());

        let bytes = info.to_bytes();
        assert_eq!(VolumeInfo::SIZE, bytes.len());
        assert_eq!(64u16.to_le_bytes(), bytes[16..18]);
        assert_eq!(info, VolumeInfo::from_bytes(&bytes)?);

        Ok(())
    }

    #[test]
    fn listing_decode() -> anyhow::Result<()> {
        let mut buf = vec![];
        for name in ["a", "bb"] {
            let bytes = DirInfo::new(name, FileInfo::default()).to_bytes()?;
            buf.extend_from_slice(&bytes);
            buf.resize(wire::align_record(buf.len()), 0);
        }
        let listing = wire::Listing::<DirInfo>::decode(&buf)?;
        assert_eq!(vec!["a", "bb"], listing.names());
        assert!(!listing.end_of_listing);

        buf.extend_from_slice(&[0, 0]);
        let listing = wire::Listing::<DirInfo>::decode(&buf)?;
        assert!(listing.end_of_listing);

        Ok(())
    }
}
