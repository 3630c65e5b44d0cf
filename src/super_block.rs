use crate::{
    replica_placement::ReplicaPlacement,
    ttl::Ttl,
    version::{Version, CURRENT_VERSION},
    Error, Result,
};
use byteorder::{BigEndian, ByteOrder};

/// Size of the superblock at the start of every data file
pub const SUPER_BLOCK_SIZE: usize = 8;

/// First 8 bytes of a volume's data file
///
/// Byte 0 is the record format version, byte 1 the packed replica
/// placement, bytes 2-3 the volume TTL, bytes 4-5 the compaction
/// revision. The remaining bytes are reserved.
#[derive(Copy, Clone, Debug)]
pub struct SuperBlock {
    /// Record format version of the data file
    pub version: Version,

    /// Replication strategy the volume was created with
    pub replica_placement: ReplicaPlacement,

    /// TTL shared by all needles in the volume; empty for none
    pub ttl: Ttl,

    /// How many times the volume has been compacted
    pub compact_revision: u16,
}

impl Default for SuperBlock {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            replica_placement: ReplicaPlacement::default(),
            ttl: Ttl::EMPTY,
            compact_revision: 0,
        }
    }
}

impl SuperBlock {
    /// Creates a superblock for a new volume.
    #[must_use]
    pub fn new(replica_placement: ReplicaPlacement, ttl: Ttl) -> Self {
        Self {
            replica_placement,
            ttl,
            ..Self::default()
        }
    }

    /// Returns the on-disk byte form.
    #[must_use]
    pub fn as_bytes(&self) -> [u8; SUPER_BLOCK_SIZE] {
        let mut header = [0u8; SUPER_BLOCK_SIZE];
        header[0] = u8::from(self.version);
        header[1] = self.replica_placement.byte();
        header[2..4].copy_from_slice(&self.ttl.as_bytes());
        BigEndian::write_u16(&mut header[4..6], self.compact_revision);
        header
    }

    /// Parses the on-disk byte form.
    ///
    /// # Errors
    ///
    /// Will return `Err` on an unknown version byte or a bad replica
    /// placement digit.
    pub fn parse(header: [u8; SUPER_BLOCK_SIZE]) -> Result<Self> {
        let version = Version::try_from(header[0])
            .map_err(|()| Error::CorruptData(format!("unknown volume version {}", header[0])))?;
        let replica_placement = ReplicaPlacement::from_byte(header[1])?;
        let ttl = Ttl::from_bytes([header[2], header[3]]);
        let compact_revision = BigEndian::read_u16(&header[4..6]);
        Ok(Self {
            version,
            replica_placement,
            ttl,
            compact_revision,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn super_block_round_trip() -> crate::Result<()> {
        let sb = SuperBlock {
            version: CURRENT_VERSION,
            replica_placement: "012".parse()?,
            ttl: "5d".parse()?,
            compact_revision: 7,
        };
        let parsed = SuperBlock::parse(sb.as_bytes())?;
        assert_eq!(u8::from(sb.version), u8::from(parsed.version));
        assert_eq!(sb.replica_placement, parsed.replica_placement);
        assert_eq!(sb.ttl, parsed.ttl);
        assert_eq!(sb.compact_revision, parsed.compact_revision);
        Ok(())
    }

    #[test]
    fn super_block_rejects_unknown_version() {
        let mut header = SuperBlock::default().as_bytes();
        header[0] = 9;
        assert!(matches!(
            SuperBlock::parse(header),
            Err(Error::CorruptData(_))
        ));
    }
}
