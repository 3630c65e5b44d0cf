//! Volume storage engine for a distributed blob store.
//!
//! Blobs ("needles") are packed into large append-only volume files
//! instead of living as individual files, so one disk can hold
//! millions of them without drowning in metadata:
//!
//! [superblock][needle][needle][needle]...
//!
//! Every needle is addressed by a [`FileId`] - volume id, 64-bit key
//! and a random cookie. The volume keeps an in-memory (or embedded-KV)
//! index from key to `(offset, size)`; the append-only `.idx` file is
//! the source of truth from which any index back-end can be rebuilt.
//!
//! Records are 8-byte aligned and carry a CRC-32 over the user data,
//! so reads verify integrity and crashes are detected on the next
//! load. Deletes are logical: a tombstone record is appended and the
//! index entry is cleared; bytes come back only through compaction.
//!
//! On top of the storage layer sits the placement [`topology`]: a
//! four-level tree (topology, data center, rack, data node) whose
//! counters aggregate up to the root, with random placement across
//! eligible nodes and dead-node detection.
//!
//! Use this crate when:
//! - you are storing many small-to-medium immutable blobs
//! - your writes are append-heavy and deletes are rare
//! - your reads are point lookups by an opaque id the store hands out

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]
#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]

mod clock;
mod compact_map;
mod disk_location;
mod error;
mod file_id;
mod needle;
mod needle_map;
mod replica_placement;
mod sequence;
mod super_block;
pub mod topology;
mod ttl;
mod version;
mod volume;

pub use {
    compact_map::{CompactMap, NeedleValue},
    disk_location::DiskLocation,
    error::{Error, Result},
    file_id::{parse_key_hash, Cookie, FileId, NeedleKey, VolumeId},
    needle::{
        Needle, MAX_POSSIBLE_VOLUME_SIZE, NEEDLE_CHECKSUM_SIZE, NEEDLE_HEADER_SIZE,
        NEEDLE_PADDING_SIZE,
    },
    needle_map::{
        walk_index_file, BTreeNeedleMap, LsmNeedleMap, MemoryNeedleMap, NeedleMapKind,
        NeedleMapper, NEEDLE_INDEX_SIZE,
    },
    replica_placement::ReplicaPlacement,
    sequence::{MemorySequencer, Sequencer},
    super_block::{SuperBlock, SUPER_BLOCK_SIZE},
    ttl::{Ttl, TtlUnit},
    version::{Version, CURRENT_VERSION},
    volume::{scan_volume_file, sort_volume_infos, Volume, VolumeInfo},
};
