use super::{seek_to_aligned_end, Volume};
use crate::{
    clock,
    file_id::NeedleKey,
    needle::{Needle, NEEDLE_PADDING_SIZE},
    Error, Result,
};
use std::io::Write;

impl Volume {
    /// Checks whether the needle to write is identical to what is
    /// already stored under its key, so a retried upload does not eat
    /// disk space. Requires the write lock. Volumes with a TTL always
    /// rewrite, since the fresh timestamp matters there.
    fn is_file_unchanged(&self, n: &Needle) -> Option<u32> {
        if !self.ttl().is_empty() {
            return None;
        }
        let nv = self.mapper().ok()?.get(n.id)?;
        if nv.offset == 0 {
            return None;
        }

        let mut old_needle = Needle::default();
        if let Err(e) = old_needle.read_data(
            self.data_file(),
            u64::from(nv.offset) * u64::from(NEEDLE_PADDING_SIZE),
            nv.size,
            self.version(),
        ) {
            log::debug!("failed to check updated file: {e}");
            return None;
        }

        if old_needle.checksum == crc32fast::hash(&n.data) && old_needle.data == n.data {
            Some(old_needle.size)
        } else {
            None
        }
    }

    /// Appends a needle and records it in the index.
    ///
    /// Returns the total payload size written. If the identical
    /// `(key, data)` pair is already the live entry of a TTL-less
    /// volume, nothing is written and the stored size is returned.
    ///
    /// # Errors
    ///
    /// Will return [`Error::ReadOnly`] on a read-only volume. On an IO
    /// error the data file is truncated back to its previous end and
    /// the index is left untouched.
    pub fn write_needle(&self, n: &mut Needle) -> Result<u32> {
        if self.is_read_only() {
            return Err(Error::ReadOnly(self.file_name().display().to_string()));
        }
        let _guard = self.write_lock.lock().expect("lock is poisoned");

        if let Some(size) = self.is_file_unchanged(n) {
            log::trace!("needle {} is unchanged", n.id);
            return Ok(size);
        }

        let offset = seek_to_aligned_end(self.data_file())?;

        let mut writer = self.data_file();
        let size = match n.append(&mut writer, self.version()) {
            Ok(size) => size,
            Err(e) => {
                if let Err(te) = self.data_file().set_len(offset) {
                    log::error!(
                        "cannot truncate {} back to {offset}: {te}",
                        self.file_name().display()
                    );
                }
                return Err(e);
            }
        };

        let nm = self.mapper()?;
        let aligned_offset = to_aligned_offset(offset)?;
        let stale = nm
            .get(n.id)
            .is_some_and(|nv| u64::from(nv.offset) >= aligned_offset.into());
        if !stale {
            nm.put(n.id, aligned_offset, n.size)?;
        }

        self.last_modified
            .fetch_max(n.last_modified, std::sync::atomic::Ordering::Release);
        Ok(size)
    }

    /// Tombstones a key: rewrites its index entry and appends a
    /// zero-size needle as an on-disk marker.
    ///
    /// Returns the payload size that was freed, or 0 when the key was
    /// not live.
    ///
    /// # Errors
    ///
    /// Will return [`Error::ReadOnly`] on a read-only volume, or the
    /// first IO error.
    pub fn delete_needle(&self, n: &Needle) -> Result<u32> {
        if self.is_read_only() {
            return Err(Error::ReadOnly(self.file_name().display().to_string()));
        }
        let _guard = self.write_lock.lock().expect("lock is poisoned");

        let Some(nv) = self.mapper()?.get(n.id) else {
            return Ok(0);
        };

        self.mapper()?.delete(n.id)?;

        let mut tombstone = Needle {
            id: n.id,
            cookie: n.cookie,
            ..Needle::default()
        };
        seek_to_aligned_end(self.data_file())?;
        let mut writer = self.data_file();
        tombstone.append(&mut writer, self.version())?;
        Ok(nv.size)
    }

    /// Reads and verifies the needle stored under `key`.
    ///
    /// # Errors
    ///
    /// Will return [`Error::NotFound`] for unknown, tombstoned and
    /// TTL-expired keys alike, [`Error::CorruptData`] if verification
    /// fails, or the IO error.
    pub fn read_needle(&self, key: NeedleKey) -> Result<Needle> {
        let nv = self.mapper()?.get(key).ok_or(Error::NotFound)?;
        if nv.offset == 0 {
            return Err(Error::NotFound);
        }

        let mut n = Needle::default();
        n.read_data(
            self.data_file(),
            u64::from(nv.offset) * u64::from(NEEDLE_PADDING_SIZE),
            nv.size,
            self.version(),
        )?;

        if !n.has_ttl() || n.ttl.minutes() == 0 || !n.has_last_modified() {
            return Ok(n);
        }
        if clock::unix_seconds() < n.last_modified + u64::from(n.ttl.minutes()) * 60 {
            return Ok(n);
        }
        Err(Error::NotFound)
    }

    /// Appends a pre-encoded record during replication, without
    /// touching the index.
    ///
    /// Returns the aligned offset the record was written at.
    ///
    /// # Errors
    ///
    /// Will return [`Error::ReadOnly`] on a read-only volume, or the
    /// IO error.
    pub fn append_blob(&self, b: &[u8]) -> Result<u64> {
        if self.is_read_only() {
            return Err(Error::ReadOnly(self.file_name().display().to_string()));
        }
        let _guard = self.write_lock.lock().expect("lock is poisoned");

        let offset = seek_to_aligned_end(self.data_file())?;
        let mut writer = self.data_file();
        writer.write_all(b)?;
        Ok(offset)
    }
}

/// Divides a byte offset by the record alignment, refusing volumes
/// that outgrew the 32-bit offset range.
fn to_aligned_offset(offset: u64) -> Result<u32> {
    u32::try_from(offset / u64::from(NEEDLE_PADDING_SIZE)).map_err(|_| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "volume outgrew the addressable offset range",
        ))
    })
}
