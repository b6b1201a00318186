use crate::wire::{self, Reader, WireError};
use uuid::Uuid;

/// Tag identifying the kind of a reparse point.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ReparseTag(pub u32);

impl ReparseTag {
    pub const MOUNT_POINT: ReparseTag = ReparseTag(0xA000_0003);
    pub const SYMLINK: ReparseTag = ReparseTag(0xA000_000C);

    /// Microsoft tags carry no GUID in their reparse buffer.
    pub fn is_microsoft(self) -> bool {
        self.0 & 0x8000_0000 != 0
    }
}

/// Flag of symbolic link data, set for targets relative to the
/// directory containing the link.
pub const SYMLINK_FLAG_RELATIVE: u32 = 0x0000_0001;

/// Content of a reparse point.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReparseBuffer {
    pub tag: ReparseTag,

    /// Set for non-Microsoft tags only.
    pub guid: Option<Uuid>,

    pub data: Vec<u8>,
}

/// Decoded target of a symbolic link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SymlinkTarget {
    pub substitute_name: String,
    pub print_name: String,
    pub relative: bool,
}

impl ReparseBuffer {
    pub const HEADER_SIZE: usize = 8;
    pub const GUID_HEADER_SIZE: usize = 24;
    /// Offsets, lengths and flags ahead of the symlink names.
    const SYMLINK_HEADER_SIZE: usize = 12;

    /// Create a buffer for a Microsoft tag.
    pub fn new(tag: ReparseTag, data: Vec<u8>) -> Self {
        ReparseBuffer {
            tag,
            guid: None,
            data,
        }
    }

    /// Create a buffer for a third-party tag.
    pub fn with_guid(tag: ReparseTag, guid: Uuid, data: Vec<u8>) -> Self {
        ReparseBuffer {
            tag,
            guid: Some(guid),
            data,
        }
    }

    /// Create a symbolic link to `target`.
    ///
    /// Relative targets are interpreted relative to the directory
    /// containing the link.
    ///
    /// Fails if `target` doesn't fit into reparse data.
    pub fn symlink(target: &str, relative: bool) -> Result<Self, WireError> {
        let path = wire::utf16_bytes(target);
        let len = u16::try_from(path.len())
            .map_err(|_| WireError::InvalidReparseData("symlink target too long"))?;
        let data_len = Self::SYMLINK_HEADER_SIZE + 2 * path.len();
        if data_len > u16::MAX as usize {
            return Err(WireError::InvalidReparseData("symlink target too long"));
        }
        let mut data = Vec::with_capacity(data_len);
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&len.to_le_bytes());
        let flags = if relative { SYMLINK_FLAG_RELATIVE } else { 0 };
        data.extend_from_slice(&flags.to_le_bytes());
        data.extend_from_slice(&path);
        data.extend_from_slice(&path);

        Ok(ReparseBuffer::new(ReparseTag::SYMLINK, data))
    }

    /// Decode symbolic link data.
    ///
    /// Returns `None` if this isn't a symbolic link.
    pub fn symlink_target(&self) -> Result<Option<SymlinkTarget>, WireError> {
        if self.tag != ReparseTag::SYMLINK {
            return Ok(None);
        }
        let mut r = Reader::new(&self.data);
        let sub_offset = r.u16()? as usize;
        let sub_len = r.u16()? as usize;
        let print_offset = r.u16()? as usize;
        let print_len = r.u16()? as usize;
        let flags = r.u32()?;
        let path_buffer = r.rest();
        let slice = |offset: usize, len: usize| {
            path_buffer
                .get(offset..offset + len)
                .ok_or(WireError::InvalidReparseData("name outside of path buffer"))
        };

        Ok(Some(SymlinkTarget {
            substitute_name: wire::string_from_utf16(slice(sub_offset, sub_len)?)?,
            print_name: wire::string_from_utf16(slice(print_offset, print_len)?)?,
            relative: flags & SYMLINK_FLAG_RELATIVE != 0,
        }))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        let data_len = u16::try_from(self.data.len())
            .map_err(|_| WireError::InvalidSize(self.data.len()))?;
        let mut out = Vec::with_capacity(Self::GUID_HEADER_SIZE + self.data.len());
        out.extend_from_slice(&self.tag.0.to_le_bytes());
        out.extend_from_slice(&data_len.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        if !self.tag.is_microsoft() {
            let guid = self
                .guid
                .ok_or(WireError::InvalidReparseData("missing GUID"))?;
            out.extend_from_slice(&guid.to_bytes_le());
        }
        out.extend_from_slice(&self.data);

        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(bytes);
        let tag = ReparseTag(r.u32()?);
        let data_len = r.u16()? as usize;
        r.skip(2)?;
        let guid = if tag.is_microsoft() {
            None
        } else {
            let mut arr = [0u8; 16];
            arr.copy_from_slice(r.bytes(16)?);
            Some(Uuid::from_bytes_le(arr))
        };
        let data = r.bytes(data_len)?.to_vec();

        Ok(ReparseBuffer { tag, guid, data })
    }
}

/// Read the tag at the start of a raw reparse buffer.
pub fn peek_tag(bytes: &[u8]) -> Result<ReparseTag, WireError> {
    Ok(ReparseTag(Reader::new(bytes).u32()?))
}
