use crate::{
    needle::{Needle, NEEDLE_HEADER_SIZE},
    needle_map::{index_entry, NEEDLE_INDEX_SIZE},
    version::Version,
    Error, Result,
};
use std::{fs::File, os::unix::fs::FileExt};

/// Verifies that the index file and the data file agree, before the
/// index back-end is built.
///
/// The index file size must be a multiple of the entry size; the last
/// live entry must point at a needle whose id matches and whose record
/// ends exactly at the end of the data file. Any trailing bytes the
/// index does not know about mean the index lost a tail, so the caller
/// marks the volume read-only.
pub(crate) fn check_volume_data_integrity(
    data_file: &File,
    version: Version,
    index_file: &File,
) -> Result<()> {
    let index_size = verify_index_file_integrity(index_file)?;
    if index_size == 0 {
        return Ok(());
    }

    let mut last_entry = [0u8; NEEDLE_INDEX_SIZE as usize];
    index_file.read_exact_at(&mut last_entry, index_size - u64::from(NEEDLE_INDEX_SIZE))?;
    let (key, offset, size) = index_entry(&last_entry);

    // A tombstone entry cannot point at anything verifiable
    if offset == 0 {
        return Ok(());
    }

    verify_needle_integrity(
        data_file,
        version,
        u64::from(offset) * u64::from(crate::needle::NEEDLE_PADDING_SIZE),
        key,
        size,
    )
}

fn verify_index_file_integrity(index_file: &File) -> Result<u64> {
    let index_size = index_file.metadata()?.len();
    if index_size % u64::from(NEEDLE_INDEX_SIZE) != 0 {
        return Err(Error::CorruptData(format!(
            "index file size is {index_size} bytes, maybe corrupted"
        )));
    }
    Ok(index_size)
}

fn verify_needle_integrity(
    data_file: &File,
    version: Version,
    offset: u64,
    key: u64,
    size: u32,
) -> Result<()> {
    let mut n = Needle::default();
    n.read_data(data_file, offset, size, version)?;
    if n.id != key {
        return Err(Error::CorruptData(format!(
            "index key {key:#x} does not match needle id {:#x}",
            n.id
        )));
    }

    // The last indexed record has to be the last record on disk;
    // anything after it was appended without surviving index entries
    let expected_end = offset + u64::from(NEEDLE_HEADER_SIZE) + u64::from(size_on_disk(size));
    let data_size = data_file.metadata()?.len();
    if data_size != expected_end {
        return Err(Error::CorruptData(format!(
            "data file has {data_size} bytes, last indexed record ends at {expected_end}"
        )));
    }
    Ok(())
}

/// Bytes the record body (payload, CRC and padding) occupies on disk.
fn size_on_disk(size: u32) -> u32 {
    use crate::needle::{NEEDLE_CHECKSUM_SIZE, NEEDLE_PADDING_SIZE};

    let unpadded = NEEDLE_HEADER_SIZE + size + NEEDLE_CHECKSUM_SIZE;
    unpadded.div_ceil(NEEDLE_PADDING_SIZE) * NEEDLE_PADDING_SIZE - NEEDLE_HEADER_SIZE
}
