/// Disk format version of a volume's needle records
///
/// The version is stored in the first byte of the volume superblock.
/// New volumes are always written with the current version; version 1
/// volumes can still be read.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Version {
    /// Legacy format: bare data records without metadata fields
    V1,

    /// Current format: records carry name, mime, flags, TTL and
    /// last-modified metadata
    V2,
}

/// Version new volumes are created with
pub const CURRENT_VERSION: Version = Version::V2;

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

impl From<Version> for u8 {
    fn from(value: Version) -> Self {
        match value {
            Version::V1 => 1,
            Version::V2 => 2,
        }
    }
}

impl TryFrom<u8> for Version {
    type Error = ();
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::V1),
            2 => Ok(Self::V2),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn version_round_trip() {
        for version in [Version::V1, Version::V2] {
            assert_eq!(Ok(version), Version::try_from(u8::from(version)));
        }
    }

    #[test]
    fn version_unknown_byte() {
        assert!(Version::try_from(0).is_err());
        assert!(Version::try_from(3).is_err());
    }
}
