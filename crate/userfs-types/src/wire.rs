//! Little-endian helpers for the fixed records exchanged with the host.

/// Records in reply buffers start at offsets aligned to this value.
pub const RECORD_ALIGN: usize = 8;

/// Round `len` up to the next record boundary.
pub fn align_record(len: usize) -> usize {
    (len + RECORD_ALIGN - 1) & !(RECORD_ALIGN - 1)
}

/// Error reported when a wire record can't be built or parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("record truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("invalid record size {0}")]
    InvalidSize(usize),

    #[error("invalid UTF-16 name")]
    InvalidName,

    #[error("invalid reparse data: {0}")]
    InvalidReparseData(&'static str),
}

/// A record that can be appended to a directory or stream listing.
pub trait Record: Sized {
    /// Name used to locate the record when resuming a listing.
    fn name(&self) -> &str;

    /// Byte length of the record, before alignment.
    fn record_len(&self) -> usize;

    fn to_bytes(&self) -> Result<Vec<u8>, WireError>;

    fn from_bytes(data: &[u8]) -> Result<Self, WireError>;
}

/// Records decoded from a reply buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing<T> {
    pub entries: Vec<T>,

    /// True if the buffer ended with the end-of-listing marker.
    pub end_of_listing: bool,
}

impl<T: Record> Listing<T> {
    /// Decode all records of a reply buffer.
    ///
    /// Parsing stops at the end-of-listing marker, a record whose
    /// size is 0, or at the end of the buffer.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut entries = vec![];
        let mut offset = 0;
        while buf.len() >= offset + 2 {
            let size = u16::from_le_bytes([buf[offset], buf[offset + 1]]) as usize;
            if size == 0 {
                return Ok(Listing {
                    entries,
                    end_of_listing: true,
                });
            }
            let end = offset + size;
            if end > buf.len() {
                return Err(WireError::Truncated {
                    needed: end,
                    available: buf.len(),
                });
            }
            entries.push(T::from_bytes(&buf[offset..end])?);
            offset += align_record(size);
        }

        Ok(Listing {
            entries,
            end_of_listing: false,
        })
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name()).collect()
    }
}

pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn bytes(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        let end = self.pos + len;
        if end > self.buf.len() {
            return Err(WireError::Truncated {
                needed: end,
                available: self.buf.len(),
            });
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;

        Ok(slice)
    }

    pub(crate) fn skip(&mut self, len: usize) -> Result<(), WireError> {
        self.bytes(len)?;
        Ok(())
    }

    pub(crate) fn u16(&mut self) -> Result<u16, WireError> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn u32(&mut self) -> Result<u32, WireError> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn u64(&mut self) -> Result<u64, WireError> {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(self.bytes(8)?);
        Ok(u64::from_le_bytes(arr))
    }

    pub(crate) fn rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();

        rest
    }
}

/// Encode a string as little-endian UTF-16, without terminator.
pub(crate) fn utf16_bytes(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

pub(crate) fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

/// Decode little-endian UTF-16 bytes.
pub(crate) fn string_from_utf16(b: &[u8]) -> Result<String, WireError> {
    if b.len() % 2 != 0 {
        return Err(WireError::InvalidName);
    }
    let units = b
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect::<Vec<_>>();

    String::from_utf16(&units).map_err(|_| WireError::InvalidName)
}

/// Shorten `s` so that it fits in `max_units` UTF-16 code units.
///
/// Never splits a character.
pub fn truncate_utf16(s: &str, max_units: usize) -> String {
    let mut units = 0;
    let mut end = 0;
    for (idx, c) in s.char_indices() {
        units += c.len_utf16();
        if units > max_units {
            break;
        }
        end = idx + c.len_utf8();
    }

    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align() {
        assert_eq!(0, align_record(0));
        assert_eq!(8, align_record(1));
        assert_eq!(8, align_record(8));
        assert_eq!(112, align_record(106));
    }

    #[test]
    fn truncate_ascii() {
        assert_eq!("abc", truncate_utf16("abcdef", 3));
        assert_eq!("abc", truncate_utf16("abc", 3));
        assert_eq!("", truncate_utf16("abc", 0));
    }

    #[test]
    fn truncate_keeps_surrogate_pairs_whole() {
        // U+1F600 takes two UTF-16 units.
        assert_eq!("a", truncate_utf16("a\u{1F600}b", 2));
        assert_eq!("a\u{1F600}", truncate_utf16("a\u{1F600}b", 3));
    }

    #[test]
    fn utf16_round_trip() -> anyhow::Result<()> {
        let bytes = utf16_bytes("h\u{e9}llo");
        assert_eq!(10, bytes.len());
        assert_eq!("h\u{e9}llo", string_from_utf16(&bytes)?);
        assert_eq!(Err(WireError::InvalidName), string_from_utf16(&[0x41]));

        Ok(())
    }

    #[test]
    fn reader_truncated() {
        let mut reader = Reader::new(&[1, 0, 0]);
        assert_eq!(Ok(1), reader.u16());
        assert_eq!(
            Err(WireError::Truncated {
                needed: 6,
                available: 3
            }),
            reader.u32()
        );
    }
}
