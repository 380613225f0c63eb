//! Error taxonomy for the drive core.
//!
//! Tree, cache and façade operations return typed errors; only the façade
//! boundary converts them to the signed errno convention via [`FsError::errno`].

use thiserror::Error;

/// Result alias used throughout the tree and façade layers.
pub type FsResult<T> = Result<T, FsError>;

/// Error kinds surfaced by tree and façade operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FsError {
    #[error("no such file or directory")]
    NotFound,
    #[error("entry already exists")]
    AlreadyExists,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("directory not empty")]
    NotEmpty,
    #[error("operation not supported")]
    NotSupported,
    #[error("bad file handle")]
    BadHandle,
    #[error("operation canceled")]
    Canceled,
    #[error("input/output failure")]
    Io,
}

impl FsError {
    /// Signed POSIX error code for the transport boundary (always negative).
    pub fn errno(self) -> i32 {
        let code = match self {
            FsError::NotFound => libc::ENOENT,
            FsError::AlreadyExists => libc::EEXIST,
            FsError::NotADirectory => libc::ENOTDIR,
            FsError::IsADirectory => libc::EISDIR,
            FsError::NotEmpty => libc::ENOTEMPTY,
            FsError::NotSupported => libc::EOPNOTSUPP,
            FsError::BadHandle => libc::EBADF,
            FsError::Canceled => libc::EINTR,
            FsError::Io => libc::EIO,
        };
        -code
    }
}

/// Error kinds surfaced by the cache adaptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The identity was never registered (or already closed).
    #[error("identity not registered with the cache")]
    NotFound,
    /// The backing store reported total failure on the first chunk.
    #[error("backing store transfer failed")]
    FileFailure,
    /// The transfer was canceled cooperatively at a chunk boundary.
    #[error("transfer canceled")]
    Canceled,
    /// The request falls outside the negotiated capability flags.
    #[error("request outside negotiated capabilities")]
    Unsupported,
}

impl From<CacheError> for FsError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::NotFound => FsError::NotFound,
            CacheError::FileFailure => FsError::Io,
            CacheError::Canceled => FsError::Canceled,
            CacheError::Unsupported => FsError::NotSupported,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_is_negative_posix() {
        assert_eq!(FsError::NotFound.errno(), -libc::ENOENT);
        assert_eq!(FsError::AlreadyExists.errno(), -libc::EEXIST);
        assert_eq!(FsError::NotADirectory.errno(), -libc::ENOTDIR);
        assert_eq!(FsError::IsADirectory.errno(), -libc::EISDIR);
        assert_eq!(FsError::NotEmpty.errno(), -libc::ENOTEMPTY);
        assert_eq!(FsError::NotSupported.errno(), -libc::EOPNOTSUPP);
        assert_eq!(FsError::Canceled.errno(), -libc::EINTR);
        assert_eq!(FsError::Io.errno(), -libc::EIO);
        assert!(FsError::BadHandle.errno() < 0);
    }

    #[test]
    fn cache_errors_map_into_fs_kinds() {
        assert_eq!(FsError::from(CacheError::NotFound), FsError::NotFound);
        assert_eq!(FsError::from(CacheError::FileFailure), FsError::Io);
        assert_eq!(FsError::from(CacheError::Canceled), FsError::Canceled);
        assert_eq!(FsError::from(CacheError::Unsupported), FsError::NotSupported);
    }
}
