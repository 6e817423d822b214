use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FsError {
    #[error("no such file or directory")]
    NotFound,
    #[error("not a directory")]
    NotDirectory,
    #[error("is a directory")]
    IsDirectory,
    #[error("file exists")]
    AlreadyExists,
    #[error("directory not empty")]
    DirectoryNotEmpty,
    #[error("file name too long")]
    NameTooLong,
    #[error("no space left on device")]
    NoSpace,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("filesystem is corrupt")]
    Corrupt,
    #[error("no such device")]
    NoDevice,
    #[error("device or resource busy")]
    Busy,
    #[error("i/o error")]
    Io,
    #[error("block id out of range")]
    InvalidBlockId,
}

impl FsError {
    /// Negative errno handed back across the vnode operation boundary.
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound => -2,
            FsError::NotDirectory => -20,
            FsError::IsDirectory => -21,
            FsError::AlreadyExists => -17,
            FsError::DirectoryNotEmpty => -39,
            FsError::NameTooLong => -36,
            FsError::NoSpace => -28,
            FsError::InvalidArgument | FsError::Corrupt => -22,
            FsError::NoDevice => -6,
            FsError::Busy => -16,
            FsError::Io | FsError::InvalidBlockId => -5,
        }
    }
}

pub type Result<T> = core::result::Result<T, FsError>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_errno() {
        assert_eq!(FsError::NotFound.errno(), -2);
        assert_eq!(FsError::NoSpace.errno(), -28);
        assert_eq!(FsError::DirectoryNotEmpty.errno(), -39);
        assert_eq!(FsError::Busy.errno(), -16);
        assert!(FsError::Corrupt.errno() < 0);
    }
}
