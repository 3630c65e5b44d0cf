use crate::{needle::Needle, Error, Result};

/// Key of a needle, unique within one volume
pub type NeedleKey = u64;

/// Random per-needle tag that mitigates key enumeration
pub type Cookie = u32;

/// Identifier of one volume, unique within the cluster
#[derive(Copy, Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct VolumeId(
    /// Raw 32-bit value
    pub u32,
);

impl VolumeId {
    /// Returns the next volume id.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for VolumeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for VolumeId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<u32>()
            .map(Self)
            .map_err(|_| Error::InvalidArgument(format!("invalid volume id: {s:?}")))
    }
}

/// Globally unique identifier of one stored needle
///
/// The wire form is `<vid>,<hex>` where the hex part is the
/// concatenation of the 8-byte key and the 4-byte cookie, with leading
/// zero *bytes* stripped.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub struct FileId {
    /// Volume the needle lives on
    pub volume_id: VolumeId,

    /// Needle key within the volume
    pub key: NeedleKey,

    /// Random tag that must match on lookup
    pub cookie: Cookie,
}

impl FileId {
    /// Creates a file id from its parts.
    #[must_use]
    pub fn new(volume_id: VolumeId, key: NeedleKey, cookie: Cookie) -> Self {
        Self {
            volume_id,
            key,
            cookie,
        }
    }

    /// Creates the file id under which a needle is addressable.
    #[must_use]
    pub fn from_needle(volume_id: VolumeId, needle: &Needle) -> Self {
        Self::new(volume_id, needle.id, needle.cookie)
    }
}

impl std::str::FromStr for FileId {
    type Err = Error;

    fn from_str(fid: &str) -> Result<Self> {
        let mut parts = fid.split(',');
        let (Some(vid), Some(key_hash), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(Error::InvalidArgument(format!("invalid fid: {fid:?}")));
        };
        let volume_id = vid.parse::<VolumeId>()?;
        let (key, cookie) = parse_key_hash(key_hash)?;
        Ok(Self {
            volume_id,
            key,
            cookie,
        })
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut bytes = [0u8; 12];
        bytes[..8].copy_from_slice(&self.key.to_be_bytes());
        bytes[8..].copy_from_slice(&self.cookie.to_be_bytes());

        // Strip leading zero bytes, keeping at least one byte
        let nonzero_index = bytes.iter().position(|b| *b != 0).unwrap_or(11);

        write!(f, "{},", self.volume_id)?;
        for b in &bytes[nonzero_index..] {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Splits the hex half of a file id into `(key, cookie)`.
///
/// The cookie is always the last 8 hex characters; everything before it
/// is the key. The hex half of a valid file id is longer than 8 and at
/// most 24 characters.
///
/// # Errors
///
/// Will return `Err` if the length is out of range or the characters
/// are not hex digits.
pub fn parse_key_hash(key_hash: &str) -> Result<(NeedleKey, Cookie)> {
    if key_hash.len() <= 8 || key_hash.len() > 24 {
        return Err(Error::InvalidArgument(format!(
            "key hash {key_hash:?} has invalid length {}",
            key_hash.len()
        )));
    }

    let split = key_hash.len() - 8;
    let key = u64::from_str_radix(&key_hash[..split], 16)
        .map_err(|e| Error::InvalidArgument(format!("parse key error: {e}")))?;
    let cookie = u32::from_str_radix(&key_hash[split..], 16)
        .map_err(|e| Error::InvalidArgument(format!("parse cookie error: {e}")))?;
    Ok((key, cookie))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn file_id_parse() -> crate::Result<()> {
        let fid = "3,01637037d6".parse::<FileId>()?;
        assert_eq!(VolumeId(3), fid.volume_id);
        assert_eq!(0x01, fid.key);
        assert_eq!(0x6370_37d6, fid.cookie);
        Ok(())
    }

    #[test]
    fn file_id_rejects_malformed() {
        assert!("3".parse::<FileId>().is_err());
        assert!("3,".parse::<FileId>().is_err());
        assert!("3,01".parse::<FileId>().is_err());
        assert!("3,1,2".parse::<FileId>().is_err());
        assert!("x,01637037d6".parse::<FileId>().is_err());
        assert!("3,zz637037d6".parse::<FileId>().is_err());
        // 25 hex chars is one too many
        assert!("3,1234567890123456789012345".parse::<FileId>().is_err());
    }

    #[test]
    fn file_id_round_trip() -> crate::Result<()> {
        let ids = [
            FileId::new(VolumeId(3), 0x01, 0x6370_37d6),
            FileId::new(VolumeId(1), 1, 1),
            FileId::new(VolumeId(u32::MAX), u64::MAX, u32::MAX),
            FileId::new(VolumeId(7), 0x0123_4567_89ab_cdef, 0xd6),
        ];
        for fid in ids {
            assert_eq!(fid, fid.to_string().parse::<FileId>()?);
        }
        Ok(())
    }

    #[test]
    fn file_id_strips_leading_zero_bytes() {
        let fid = FileId::new(VolumeId(3), 0x01, 0x6370_37d6);
        assert_eq!("3,01637037d6", fid.to_string());

        // Zeros inside the cookie survive once a nonzero byte was seen
        let fid = FileId::new(VolumeId(1), 1, 1);
        assert_eq!("1,0100000001", fid.to_string());
    }
}
