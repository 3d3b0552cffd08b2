use core::{
    error::Error as CoreError,
    fmt::{Display, Formatter},
};

pub type Result<T> = core::result::Result<T, Error>;

/// Error type for container-level operations.
///
/// Byte-count operations (`read`, `write`, `insert`, `remove`) do not
/// use this type: they report shortfalls through their return count.
#[derive(Debug)]
pub enum Error {
    /// The magic bytes are missing where a shiftable file was expected.
    BadSignature,

    /// Version, endianness, word size or block size mismatch.
    Incompatible,

    /// The file was not closed cleanly and cannot be trusted.
    NotClosedCleanly,

    /// The requested size exceeds what a 32-bit offset can address.
    TooLarge,

    /// The container was force-closed by an earlier storage failure.
    Closed,

    /// The operating system refused an open, resize or map operation.
    Storage(std::io::Error),
}

impl CoreError for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::BadSignature => write!(f, "missing shiftable file signature"),
            Error::Incompatible => write!(f, "incompatible shiftable file format"),
            Error::NotClosedCleanly => write!(f, "file was not closed cleanly"),
            Error::TooLarge => write!(f, "requested size exceeds the addressable maximum"),
            Error::Closed => write!(f, "container is closed"),
            Error::Storage(err) => write!(f, "storage operation failed: {err}"),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Storage(err)
    }
}

#[cfg(unix)]
impl From<nix::Error> for Error {
    fn from(err: nix::Error) -> Self {
        Error::Storage(std::io::Error::from_raw_os_error(err as i32))
    }
}
