use super::Volume;
use crate::{
    file_id::VolumeId,
    needle::{Needle, NEEDLE_CHECKSUM_SIZE, NEEDLE_HEADER_SIZE, NEEDLE_PADDING_SIZE},
    super_block::{SuperBlock, SUPER_BLOCK_SIZE},
    Error, Result,
};
use std::path::Path;

/// Walks every record of a volume's data file in order, without
/// touching any index.
///
/// `visit_super_block` is called once, then `visit_needle` once per
/// record with the needle and its byte offset. With `read_needle_body`
/// set, the full record is decoded; otherwise only the 16-byte header
/// fields are filled in. Body decode failures are logged and skipped,
/// the way recovery wants it; visitor errors abort the scan. A record
/// whose body declares at least as much user data as its whole payload
/// is visited with size 0 and the scan realigns past its true extent.
///
/// # Errors
///
/// Will return `Err` if the volume cannot be opened, a header is
/// unreadable, or a visitor fails.
pub fn scan_volume_file<VS, VN>(
    dirname: &Path,
    collection: &str,
    id: VolumeId,
    visit_super_block: VS,
    read_needle_body: bool,
    mut visit_needle: VN,
) -> Result<()>
where
    VS: FnOnce(&SuperBlock) -> Result<()>,
    VN: FnMut(&Needle, u64) -> Result<()>,
{
    let volume = Volume::load_without_index(dirname, collection, id)
        .map_err(|e| Error::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("failed to load volume {id}: {e}"),
        )))?;
    visit_super_block(volume.super_block())?;

    let version = volume.version();
    let mut offset = SUPER_BLOCK_SIZE as u64;

    loop {
        let (mut needle, mut rest) = match Needle::read_header(volume.data_file(), offset) {
            Ok(pair) => pair,
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => {
                return Err(Error::CorruptData(format!(
                    "cannot read needle header at {offset}: {e}"
                )))
            }
        };

        if read_needle_body {
            match needle.read_body(
                volume.data_file(),
                offset + u64::from(NEEDLE_HEADER_SIZE),
                rest,
                version,
            ) {
                Ok(data_size) => {
                    if data_size >= needle.size {
                        // A record declaring at least as much user data
                        // as its whole payload was written damaged;
                        // scan it as empty and realign to where its
                        // bytes actually ended
                        let padding = NEEDLE_PADDING_SIZE
                            - ((needle.size + NEEDLE_HEADER_SIZE + NEEDLE_CHECKSUM_SIZE)
                                % NEEDLE_PADDING_SIZE);
                        let (old_rest, old_size) = (rest, needle.size);
                        needle.size = 0;
                        rest = needle.size + NEEDLE_CHECKSUM_SIZE + padding;
                        if rest % NEEDLE_PADDING_SIZE != 0 {
                            rest += NEEDLE_PADDING_SIZE - rest % NEEDLE_PADDING_SIZE;
                        }
                        log::trace!(
                            "adjusting needle {} size {old_size}=>0 rest {old_rest}=>{rest}",
                            needle.id
                        );
                    }
                }
                Err(e) => log::warn!("cannot read needle body at {offset}: {e}"),
            }
        }

        visit_needle(&needle, offset)?;
        offset += u64::from(NEEDLE_HEADER_SIZE) + u64::from(rest);
    }
}
