//! Error types for TreeFS Core

use std::io;

/// Core filesystem error type
#[derive(thiserror::Error, Debug)]
pub enum FsError {
    #[error("not found")]
    NotFound,
    #[error("not a directory")]
    NotADirectory,
    /// A caller-supplied entry appeared in the ancestor chain of a path.
    #[error("forbidden ancestor in path")]
    ForbiddenAncestor,
    #[error("already exists")]
    AlreadyExists,
    #[error("is a directory")]
    IsADirectory,
    #[error("directory not empty")]
    NotEmpty,
    #[error("busy")]
    Busy,
    #[error("name not allowed")]
    InvalidName,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("no space left")]
    NoSpace,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl FsError {
    /// POSIX error number for this error, as returned by the syscall layer.
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::NotADirectory => libc::ENOTDIR,
            FsError::ForbiddenAncestor => libc::EINVAL,
            FsError::AlreadyExists => libc::EEXIST,
            FsError::IsADirectory => libc::EISDIR,
            FsError::NotEmpty => libc::ENOTEMPTY,
            FsError::Busy => libc::EBUSY,
            FsError::InvalidName => libc::EINVAL,
            FsError::InvalidArgument => libc::EINVAL,
            FsError::NoSpace => libc::ENOSPC,
            FsError::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

pub type FsResult<T> = Result<T, FsError>;
