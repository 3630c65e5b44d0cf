mod read_write;

use crate::{
    file_id::{Cookie, NeedleKey},
    ttl::Ttl,
    Error, Result,
};

/// Fixed size of the needle header (cookie + id + size)
pub const NEEDLE_HEADER_SIZE: u32 = 16;

/// Alignment of needle records inside the data file
pub const NEEDLE_PADDING_SIZE: u32 = 8;

/// Size of the trailing CRC-32
pub const NEEDLE_CHECKSUM_SIZE: u32 = 4;

/// Largest data file the 32-bit aligned offsets can address (32 GiB)
pub const MAX_POSSIBLE_VOLUME_SIZE: u64 = 4 * 1024 * 1024 * 1024 * 8;

/// Bytes of the last-modified timestamp kept on disk (low 40 bits)
pub(crate) const LAST_MODIFIED_BYTES_LENGTH: usize = 5;

const FLAG_GZIP: u8 = 0x01;
const FLAG_HAS_NAME: u8 = 0x02;
const FLAG_HAS_MIME: u8 = 0x04;
const FLAG_HAS_LAST_MODIFIED: u8 = 0x08;
const FLAG_HAS_TTL: u8 = 0x10;
const FLAG_IS_CHUNK_MANIFEST: u8 = 0x80;

/// One stored blob: header, payload and CRC, padded to 8 bytes on disk
///
/// A needle is immutable once appended. Deleting a key appends a second
/// needle with empty data and tombstones the index entry; the bytes are
/// only reclaimed by compaction.
#[derive(Clone, Debug, Default)]
pub struct Needle {
    /// Random tag checked on lookup to mitigate key enumeration
    pub cookie: Cookie,

    /// Needle key within the volume
    pub id: NeedleKey,

    /// Total payload size as stored in the header; set by
    /// [`Needle::append`] and by the read paths
    pub size: u32,

    /// User bytes
    pub data: Vec<u8>,

    /// Flag bitset (name, mime, gzip, last-modified, TTL, chunk manifest)
    pub flags: u8,

    /// Original file name, at most 255 bytes
    pub name: Vec<u8>,

    /// Content type, at most 255 bytes
    pub mime: Vec<u8>,

    /// Unix seconds; only the low 40 bits go to disk
    pub last_modified: u64,

    /// Time-to-live
    pub ttl: Ttl,

    /// CRC-32 (IEEE) over `data`
    pub checksum: u32,
}

impl Needle {
    /// Creates a needle carrying plain user bytes.
    #[must_use]
    pub fn new(id: NeedleKey, cookie: Cookie, data: Vec<u8>) -> Self {
        Self {
            id,
            cookie,
            data,
            ..Self::default()
        }
    }

    /// Whether the data is gzip compressed.
    #[must_use]
    pub fn is_gzipped(&self) -> bool {
        self.flags & FLAG_GZIP > 0
    }

    /// Marks the data as gzip compressed.
    pub fn set_gzipped(&mut self) {
        self.flags |= FLAG_GZIP;
    }

    /// Whether a file name is stored.
    #[must_use]
    pub fn has_name(&self) -> bool {
        self.flags & FLAG_HAS_NAME > 0
    }

    /// Stores a file name. Names of 256 bytes or more are dropped.
    pub fn set_name(&mut self, name: &[u8]) {
        if name.len() < 256 {
            self.name = name.to_vec();
            self.flags |= FLAG_HAS_NAME;
        }
    }

    /// Whether a mime type is stored.
    #[must_use]
    pub fn has_mime(&self) -> bool {
        self.flags & FLAG_HAS_MIME > 0
    }

    /// Stores a mime type. Types of 256 bytes or more are dropped.
    pub fn set_mime(&mut self, mime: &[u8]) {
        if mime.len() < 256 {
            self.mime = mime.to_vec();
            self.flags |= FLAG_HAS_MIME;
        }
    }

    /// Whether a last-modified timestamp is stored.
    #[must_use]
    pub fn has_last_modified(&self) -> bool {
        self.flags & FLAG_HAS_LAST_MODIFIED > 0
    }

    /// Stores a last-modified timestamp (Unix seconds).
    pub fn set_last_modified(&mut self, unix_seconds: u64) {
        self.last_modified = unix_seconds;
        self.flags |= FLAG_HAS_LAST_MODIFIED;
    }

    /// Whether a TTL is stored.
    #[must_use]
    pub fn has_ttl(&self) -> bool {
        self.flags & FLAG_HAS_TTL > 0
    }

    /// Stores a TTL. The empty TTL is not stored.
    pub fn set_ttl(&mut self, ttl: Ttl) {
        if !ttl.is_empty() {
            self.ttl = ttl;
            self.flags |= FLAG_HAS_TTL;
        }
    }

    /// Whether the data is a chunk manifest instead of user bytes.
    #[must_use]
    pub fn is_chunk_manifest(&self) -> bool {
        self.flags & FLAG_IS_CHUNK_MANIFEST > 0
    }

    /// Marks the data as a chunk manifest.
    pub fn set_is_chunk_manifest(&mut self) {
        self.flags |= FLAG_IS_CHUNK_MANIFEST;
    }

    /// Fills `id` and `cookie` from the path part of a file id
    /// (everything after the comma).
    ///
    /// An optional `_<delta>` suffix is split off and added to the key.
    /// The suffix exists so that one uploaded file can be addressed as a
    /// run of consecutive keys; nothing prevents the sum from colliding
    /// with an independently assigned key, so treat it with care.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the hex part has an invalid length or the
    /// delta is not a decimal number.
    pub fn parse_path(&mut self, fid: &str) -> Result<()> {
        if fid.len() <= 8 {
            return Err(Error::InvalidArgument(format!("invalid fid: {fid:?}")));
        }

        let (fid, delta) = match fid.rfind('_') {
            Some(at) if at > 0 => (&fid[..at], Some(&fid[at + 1..])),
            _ => (fid, None),
        };

        let (key, cookie) = crate::file_id::parse_key_hash(fid)?;
        self.id = key;
        self.cookie = cookie;

        if let Some(delta) = delta {
            let delta = delta
                .parse::<u64>()
                .map_err(|e| Error::InvalidArgument(format!("parse delta error: {e}")))?;
            self.id += delta;
        }
        Ok(())
    }
}

impl std::fmt::Display for Needle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cookie:{}, Id:{}, Size:{}, DataSize:{}, Name:{}, Mime:{}",
            self.cookie,
            self.id,
            self.size,
            self.data.len(),
            String::from_utf8_lossy(&self.name),
            String::from_utf8_lossy(&self.mime),
        )
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use test_log::test;

    #[test]
    fn parse_path_key_and_cookie() -> crate::Result<()> {
        let mut n = Needle::default();
        n.parse_path("01637037d6")?;
        assert_eq!(0x01, n.id);
        assert_eq!(0x6370_37d6, n.cookie);
        Ok(())
    }

    #[test]
    fn parse_path_applies_delta() -> crate::Result<()> {
        let mut n = Needle::default();
        n.parse_path("01637037d6_3")?;
        assert_eq!(0x01 + 3, n.id);
        assert_eq!(0x6370_37d6, n.cookie);
        Ok(())
    }

    #[test]
    fn parse_path_rejects_short_fids() {
        let mut n = Needle::default();
        assert!(n.parse_path("").is_err());
        assert!(n.parse_path("01").is_err());
        assert!(n.parse_path("01637037d6_x").is_err());
    }

    #[test]
    fn flags_are_independent() {
        let mut n = Needle::default();
        n.set_gzipped();
        n.set_name(b"a.txt");
        n.set_ttl("3m".parse().unwrap());
        assert!(n.is_gzipped());
        assert!(n.has_name());
        assert!(n.has_ttl());
        assert!(!n.has_mime());
        assert!(!n.has_last_modified());
        assert!(!n.is_chunk_manifest());
    }
}
