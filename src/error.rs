/// Represents errors that can occur in the volume store
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// On-disk bytes failed an integrity check
    ///
    /// CRC mismatch, a needle id that does not match its index entry,
    /// an index file whose size is not a multiple of the entry size, or
    /// a record shorter than its header declares.
    CorruptData(String),

    /// Key is absent, tombstoned or expired
    NotFound,

    /// Mutation was attempted on a read-only volume
    ReadOnly(String),

    /// Malformed input (file id, TTL literal, replica placement code, ...)
    InvalidArgument(String),

    /// Not enough eligible nodes to satisfy a placement request
    CapacityExhausted(String),

    /// Cluster state disagrees with what the caller assumed
    Consistency(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VolumeStoreError: {self:?}")
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<redb::Error> for Error {
    fn from(value: redb::Error) -> Self {
        Self::Io(std::io::Error::new(std::io::ErrorKind::Other, value))
    }
}

impl From<redb::DatabaseError> for Error {
    fn from(value: redb::DatabaseError) -> Self {
        redb::Error::from(value).into()
    }
}

impl From<redb::TransactionError> for Error {
    fn from(value: redb::TransactionError) -> Self {
        redb::Error::from(value).into()
    }
}

impl From<redb::TableError> for Error {
    fn from(value: redb::TableError) -> Self {
        redb::Error::from(value).into()
    }
}

impl From<redb::StorageError> for Error {
    fn from(value: redb::StorageError) -> Self {
        redb::Error::from(value).into()
    }
}

impl From<redb::CommitError> for Error {
    fn from(value: redb::CommitError) -> Self {
        redb::Error::from(value).into()
    }
}

impl From<sled::Error> for Error {
    fn from(value: sled::Error) -> Self {
        Self::Io(std::io::Error::new(std::io::ErrorKind::Other, value))
    }
}

/// Volume store result
pub type Result<T> = std::result::Result<T, Error>;
