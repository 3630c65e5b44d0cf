use super::{
    Needle, LAST_MODIFIED_BYTES_LENGTH, NEEDLE_CHECKSUM_SIZE, NEEDLE_HEADER_SIZE,
    NEEDLE_PADDING_SIZE,
};
use crate::{ttl::Ttl, version::Version, Error, Result};
use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use std::{fs::File, io::{Read, Write}, os::unix::fs::FileExt};

/// Rounds a record length up to the next alignment boundary.
pub(crate) fn aligned_length(unpadded: u32) -> u32 {
    unpadded.div_ceil(NEEDLE_PADDING_SIZE) * NEEDLE_PADDING_SIZE
}

fn truncated_body() -> Error {
    Error::CorruptData("needle body is shorter than its header declares".to_string())
}

impl Needle {
    /// Serializes the needle (header, payload, CRC and padding) into
    /// `writer` and returns the total payload size.
    ///
    /// `size` and `checksum` are refreshed from the current field
    /// values. The caller is responsible for starting at an 8-byte
    /// aligned offset and for truncating the file back on failure.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    ///
    /// # Panics
    ///
    /// Panics if the data is larger than 2^32 bytes, or a name or mime
    /// type longer than 255 bytes slipped past the setters.
    pub fn append<W: Write>(&mut self, writer: &mut W, version: Version) -> Result<u32> {
        assert!(u32::try_from(self.data.len()).is_ok());

        // NOTE: Truncation is checked above
        #[allow(clippy::cast_possible_truncation)]
        let data_size = self.data.len() as u32;

        self.size = match version {
            Version::V1 => data_size,
            Version::V2 => {
                assert!(self.name.len() <= u8::MAX.into());
                assert!(self.mime.len() <= u8::MAX.into());

                let mut size = 4 + data_size + 1;
                if self.has_name() {
                    size += 1 + self.name.len() as u32;
                }
                if self.has_mime() {
                    size += 1 + self.mime.len() as u32;
                }
                if self.has_last_modified() {
                    size += LAST_MODIFIED_BYTES_LENGTH as u32;
                }
                if self.has_ttl() {
                    size += 2;
                }
                size
            }
        };
        self.checksum = crc32fast::hash(&self.data);

        let unpadded = NEEDLE_HEADER_SIZE + self.size + NEEDLE_CHECKSUM_SIZE;
        let mut buf = Vec::with_capacity(aligned_length(unpadded) as usize);

        buf.write_u32::<BigEndian>(self.cookie)?;
        buf.write_u64::<BigEndian>(self.id)?;
        buf.write_u32::<BigEndian>(self.size)?;

        match version {
            Version::V1 => buf.extend_from_slice(&self.data),
            Version::V2 => {
                buf.write_u32::<BigEndian>(data_size)?;
                buf.extend_from_slice(&self.data);
                buf.write_u8(self.flags)?;
                if self.has_name() {
                    // NOTE: Length fits, asserted above
                    #[allow(clippy::cast_possible_truncation)]
                    buf.write_u8(self.name.len() as u8)?;
                    buf.extend_from_slice(&self.name);
                }
                if self.has_mime() {
                    // NOTE: Length fits, asserted above
                    #[allow(clippy::cast_possible_truncation)]
                    buf.write_u8(self.mime.len() as u8)?;
                    buf.extend_from_slice(&self.mime);
                }
                if self.has_last_modified() {
                    buf.extend_from_slice(&self.last_modified.to_be_bytes()[3..]);
                }
                if self.has_ttl() {
                    buf.extend_from_slice(&self.ttl.as_bytes());
                }
            }
        }

        buf.write_u32::<BigEndian>(self.checksum)?;
        buf.resize(aligned_length(unpadded) as usize, 0);

        writer.write_all(&buf)?;
        Ok(self.size)
    }

    /// Reads and verifies the needle stored at `offset` in the data
    /// file. `size` must be the total payload size from the index.
    ///
    /// # Errors
    ///
    /// Will return `Err` on IO failure, or [`Error::CorruptData`] when
    /// the header disagrees with the index entry or the CRC does not
    /// match.
    pub fn read_data(&mut self, file: &File, offset: u64, size: u32, version: Version) -> Result<()> {
        let total = (NEEDLE_HEADER_SIZE + size + NEEDLE_CHECKSUM_SIZE) as usize;
        let mut bytes = vec![0u8; total];
        file.read_exact_at(&mut bytes, offset)?;

        let (mut header, rest) = bytes.split_at(NEEDLE_HEADER_SIZE as usize);
        self.cookie = header.read_u32::<BigEndian>()?;
        self.id = header.read_u64::<BigEndian>()?;
        self.size = header.read_u32::<BigEndian>()?;
        if self.size != size {
            return Err(Error::CorruptData(format!(
                "needle at offset {offset} has size {}, index says {size}",
                self.size
            )));
        }

        let (body, mut trailer) = rest.split_at(size as usize);
        match version {
            Version::V1 => self.data = body.to_vec(),
            Version::V2 => self.read_body_v2(body)?,
        }

        self.checksum = trailer.read_u32::<BigEndian>()?;
        let expected = crc32fast::hash(&self.data);
        if self.checksum != expected {
            return Err(Error::CorruptData(format!(
                "needle {} CRC mismatch: stored {:08x}, computed {expected:08x}",
                self.id, self.checksum
            )));
        }
        Ok(())
    }

    fn read_body_v2(&mut self, body: &[u8]) -> Result<()> {
        let mut r = body;

        let data_size = r.read_u32::<BigEndian>().map_err(|_| truncated_body())?;
        let mut data = vec![0u8; data_size as usize];
        r.read_exact(&mut data).map_err(|_| truncated_body())?;
        self.data = data;
        self.flags = r.read_u8().map_err(|_| truncated_body())?;

        if self.has_name() {
            let name_size = r.read_u8().map_err(|_| truncated_body())?;
            let mut name = vec![0u8; name_size.into()];
            r.read_exact(&mut name).map_err(|_| truncated_body())?;
            self.name = name;
        }
        if self.has_mime() {
            let mime_size = r.read_u8().map_err(|_| truncated_body())?;
            let mut mime = vec![0u8; mime_size.into()];
            r.read_exact(&mut mime).map_err(|_| truncated_body())?;
            self.mime = mime;
        }
        if self.has_last_modified() {
            let mut stamp = [0u8; 8];
            r.read_exact(&mut stamp[8 - LAST_MODIFIED_BYTES_LENGTH..])
                .map_err(|_| truncated_body())?;
            self.last_modified = u64::from_be_bytes(stamp);
        }
        if self.has_ttl() {
            let mut ttl = [0u8; 2];
            r.read_exact(&mut ttl).map_err(|_| truncated_body())?;
            self.ttl = Ttl::from_bytes(ttl);
        }
        Ok(())
    }

    /// Reads the 16-byte header of the record at `offset`.
    ///
    /// Returns the partially filled needle and the number of bytes the
    /// aligned record occupies past the header, which is how far a scan
    /// has to skip to reach the next record.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs; an
    /// [`std::io::ErrorKind::UnexpectedEof`] signals the end of the
    /// data file.
    pub fn read_header(file: &File, offset: u64) -> Result<(Self, u32)> {
        let mut header = [0u8; NEEDLE_HEADER_SIZE as usize];
        file.read_exact_at(&mut header, offset)?;

        let mut r = &header[..];
        let needle = Self {
            cookie: r.read_u32::<BigEndian>()?,
            id: r.read_u64::<BigEndian>()?,
            size: r.read_u32::<BigEndian>()?,
            ..Self::default()
        };

        let rest = aligned_length(NEEDLE_HEADER_SIZE + needle.size + NEEDLE_CHECKSUM_SIZE)
            - NEEDLE_HEADER_SIZE;
        Ok((needle, rest))
    }

    /// Reads the record body during a scan. `offset` points just past
    /// the header and `body_length` is the value returned by
    /// [`Needle::read_header`].
    ///
    /// Returns the user-data length the body declares (0 for legacy
    /// records). A declaration that overruns the record is reported
    /// back instead of failing, with `data` left empty, so the scan
    /// can recognize the damage and realign.
    ///
    /// The CRC is read but not verified here; scans decide per record
    /// how to treat damage.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs or the body is shorter
    /// than the header declares.
    pub fn read_body(
        &mut self,
        file: &File,
        offset: u64,
        body_length: u32,
        version: Version,
    ) -> Result<u32> {
        if body_length == 0 {
            return Ok(0);
        }
        if self.size + NEEDLE_CHECKSUM_SIZE > body_length {
            return Err(truncated_body());
        }

        let mut bytes = vec![0u8; body_length as usize];
        file.read_exact_at(&mut bytes, offset)?;

        let (body, mut trailer) = bytes.split_at(self.size as usize);
        let data_size = match version {
            Version::V1 => {
                self.data = body.to_vec();
                0
            }
            Version::V2 => {
                if self.size == 0 {
                    0
                } else {
                    let declared =
                        BigEndian::read_u32(body.get(0..4).ok_or_else(truncated_body)?);
                    if u64::from(declared) + 4 > u64::from(self.size) {
                        // The declaration overruns the record; leave the
                        // fields empty and let the scan deal with it
                        declared
                    } else {
                        self.read_body_v2(body)?;
                        declared
                    }
                }
            }
        };
        self.checksum = trailer.read_u32::<BigEndian>()?;
        Ok(data_size)
    }

    /// Total number of bytes the needle occupies on disk, padding
    /// included.
    #[must_use]
    pub fn disk_size(&self) -> u64 {
        u64::from(aligned_length(
            NEEDLE_HEADER_SIZE + self.size + NEEDLE_CHECKSUM_SIZE,
        ))
    }
}
