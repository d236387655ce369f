use core::fmt;

/// Every way building a new process image can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecError {
    /// Bad call-time input: empty path, interior NUL, oversized copy request.
    InvalidArgument,

    /// No executable at the given path.
    NotFound,

    /// Storage failed while reading the executable.
    IoError,

    /// The executable exists but may not be opened for execution.
    PermissionDenied,

    /// The executable is not a loadable image for this architecture.
    BadFormat,

    /// Address space creation, segment mapping or stack definition ran out
    /// of pages.
    OutOfMemory,

    /// A copy into user memory targeted an address the active space does not
    /// map writable.
    BadAddress,
}

impl ExecError {
    /// POSIX errno reported at the syscall boundary.
    pub fn errno(&self) -> i32 {
        match self {
            ExecError::InvalidArgument => 22, // EINVAL
            ExecError::NotFound => 2,         // ENOENT
            ExecError::IoError => 5,          // EIO
            ExecError::PermissionDenied => 13, // EACCES
            ExecError::BadFormat => 8,        // ENOEXEC
            ExecError::OutOfMemory => 12,     // ENOMEM
            ExecError::BadAddress => 14,      // EFAULT
        }
    }
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument => f.write_str("invalid argument"),
            Self::NotFound => f.write_str("no such executable"),
            Self::IoError => f.write_str("I/O error while reading executable"),
            Self::PermissionDenied => f.write_str("permission denied"),
            Self::BadFormat => f.write_str("executable format error"),
            Self::OutOfMemory => f.write_str("out of memory while building address space"),
            Self::BadAddress => f.write_str("bad address in user memory"),
        }
    }
}

pub type ExecResult<T> = Result<T, ExecError>;

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_errno_values() {
        assert_eq!(ExecError::BadAddress.errno(), 14);
        assert_eq!(ExecError::NotFound.errno(), 2);
        assert_eq!(ExecError::OutOfMemory.errno(), 12);
    }

    #[test]
    fn test_display() {
        assert_eq!(ExecError::BadFormat.to_string(), "executable format error");
        assert_eq!(ExecError::InvalidArgument.to_string(), "invalid argument");
    }
}
