use thiserror::Error;

/// Errors that can surface from any part of the remote-zip core.
#[derive(Error, Debug)]
pub enum RemoteZipError {
    /// The remote server did not return a `Content-Range` header for a range
    /// request, i.e. it doesn't actually support byte ranges the way we need.
    #[error("remote server did not return Content-Range for a range request")]
    RangeNotSupported,

    /// A transport-level failure: connection, non-2xx status, truncated body.
    #[error("remote I/O error: {0}")]
    RemoteIo(#[source] std::io::Error),

    /// A read tried to cross a zip-member boundary with no map entry to
    /// bound it, or a malformed seek was attempted against the logical file.
    #[error("out of bound: {0}")]
    OutOfBound(String),

    /// The bootstrap scanner could not find a valid end-of-central-directory
    /// record, or the central directory it points to is malformed.
    #[error("could not locate a valid zip central directory: {0}")]
    CentralDirectory(String),

    /// Propagated from the `zip` crate during parsing, decompression or CRC
    /// validation of a member.
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl From<reqwest::Error> for RemoteZipError {
    fn from(err: reqwest::Error) -> Self {
        RemoteZipError::RemoteIo(std::io::Error::new(std::io::ErrorKind::Other, err))
    }
}

impl From<RemoteZipError> for std::io::Error {
    fn from(err: RemoteZipError) -> Self {
        match err {
            RemoteZipError::RemoteIo(e) => e,
            other => std::io::Error::new(std::io::ErrorKind::Other, other),
        }
    }
}
