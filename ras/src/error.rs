//! Error taxonomy shared by the storage engine, the emitter and the backends.
//!
//! Synchronous failures (`Fault`, `InvalidArgument`, `CapacityExceeded`, ...)
//! are returned from the call that caused them. `Backend` codes travel
//! through the completion pipeline and reach the caller's callback verbatim.

use crate::request::RequestKind;

/// Integer codes reported by [`Error::code`].
pub mod errno {
    pub const EPERM: i32 = 1;
    pub const ENOENT: i32 = 2;
    pub const EIO: i32 = 5;
    pub const EBADF: i32 = 9;
    pub const EFAULT: i32 = 14;
    pub const EINVAL: i32 = 22;
    pub const ENOSPC: i32 = 28;
    pub const ERANGE: i32 = 34;
    pub const ENOTSUP: i32 = 95;
    pub const ECANCELED: i32 = 125;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Missing storage, destroyed storage, or a refused allocation.
    #[error("storage or request is not usable")]
    Fault,

    /// Request is bound to a different storage than the one it was handed to.
    #[error("request belongs to a different storage")]
    InvalidArgument,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("backend does not support {0}")]
    Unsupported(RequestKind),

    /// Data operation attempted while the storage is not open.
    #[error("storage is not open")]
    NotReady,

    #[error("{resource} is full (capacity {capacity})")]
    CapacityExceeded {
        resource: &'static str,
        capacity: usize,
    },

    /// Code reported by a backend through its completion call.
    #[error("backend failed with code {0}")]
    Backend(i32),

    /// The request was dropped by the backend without being completed.
    #[error("request was dropped before completion")]
    Abandoned,
}

impl Error {
    /// Positive integer code for this error.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Error::Fault => errno::EFAULT,
            Error::InvalidArgument | Error::InvalidConfig(_) => errno::EINVAL,
            Error::Unsupported(_) => errno::ENOTSUP,
            Error::NotReady => errno::EPERM,
            Error::CapacityExceeded { .. } => errno::ENOSPC,
            Error::Backend(code) => *code,
            Error::Abandoned => errno::ECANCELED,
        }
    }

    #[must_use]
    pub fn is_fault(&self) -> bool {
        matches!(self, Error::Fault)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Backend(err.raw_os_error().unwrap_or(errno::EIO))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_positive() {
        let all = [
            Error::Fault,
            Error::InvalidArgument,
            Error::InvalidConfig("x".into()),
            Error::Unsupported(RequestKind::Read),
            Error::NotReady,
            Error::CapacityExceeded {
                resource: "queue",
                capacity: 1,
            },
            Error::Backend(7),
            Error::Abandoned,
        ];
        for err in all {
            assert!(err.code() > 0, "{err} has code {}", err.code());
        }
    }

    #[test]
    fn io_errors_keep_os_code() {
        let err = Error::from(std::io::Error::from_raw_os_error(errno::ENOSPC));
        assert_eq!(err, Error::Backend(errno::ENOSPC));

        let err = Error::from(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert_eq!(err, Error::Backend(errno::EIO));
    }

    #[test]
    fn display_names_the_operation() {
        assert_eq!(
            Error::Unsupported(RequestKind::Stat).to_string(),
            "backend does not support stat"
        );
    }
}
