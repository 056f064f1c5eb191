//! Status codes returned across the host boundary

use thiserror::Error;

/// Result of every host-facing operation
pub type JsvmResult<T> = Result<T, Status>;

/// Status codes
///
/// Discriminants are part of the ABI: new codes are only ever appended.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum Status {
    /// Success. Never produced as an `Err`
    #[error("ok")]
    Ok = 0,
    /// Invalid argument
    #[error("Invalid argument")]
    InvalidArg = 1,
    /// An object was expected
    #[error("An object was expected")]
    ObjectExpected = 2,
    /// A string was expected
    #[error("A string was expected")]
    StringExpected = 3,
    /// A string or symbol was expected
    #[error("A string or symbol was expected")]
    NameExpected = 4,
    /// A function was expected
    #[error("A function was expected")]
    FunctionExpected = 5,
    /// A number was expected
    #[error("A number was expected")]
    NumberExpected = 6,
    /// A boolean was expected
    #[error("A boolean was expected")]
    BooleanExpected = 7,
    /// An array was expected
    #[error("An array was expected")]
    ArrayExpected = 8,
    /// Unknown failure
    #[error("Unknown failure")]
    GenericFailure = 9,
    /// An exception is pending
    #[error("An exception is pending")]
    PendingException = 10,
    /// The operation was cancelled
    #[error("The operation was cancelled")]
    Cancelled = 11,
    /// Escape was already called on this scope
    #[error("Escape already called on this scope")]
    EscapeCalledTwice = 12,
    /// Handle scopes were closed out of order
    #[error("Invalid handle scope usage")]
    HandleScopeMismatch = 13,
    /// Callback scopes were closed out of order
    #[error("Invalid callback scope usage")]
    CallbackScopeMismatch = 14,
    /// A bounded queue is full
    #[error("Queue is full")]
    QueueFull = 15,
    /// The VM or Env is shutting down
    #[error("Handle is closing")]
    Closing = 16,
    /// A bigint was expected
    #[error("A bigint was expected")]
    BigintExpected = 17,
    /// A date was expected
    #[error("A date was expected")]
    DateExpected = 18,
    /// An arraybuffer was expected
    #[error("An arraybuffer was expected")]
    ArraybufferExpected = 19,
    /// A detachable arraybuffer was expected
    #[error("A detachable arraybuffer was expected")]
    DetachableArraybufferExpected = 20,
    /// The calling thread would deadlock on the VM lock
    #[error("Main thread would deadlock")]
    WouldDeadlock = 21,
    /// External buffers are not allowed
    #[error("External buffers are not allowed")]
    NoExternalBuffersAllowed = 22,
    /// JavaScript cannot run in this VM any more
    #[error("Cannot run JavaScript")]
    CannotRunJs = 23,
}

impl Status {
    /// Every status, in discriminant order
    pub const ALL: [Status; 24] = [
        Status::Ok,
        Status::InvalidArg,
        Status::ObjectExpected,
        Status::StringExpected,
        Status::NameExpected,
        Status::FunctionExpected,
        Status::NumberExpected,
        Status::BooleanExpected,
        Status::ArrayExpected,
        Status::GenericFailure,
        Status::PendingException,
        Status::Cancelled,
        Status::EscapeCalledTwice,
        Status::HandleScopeMismatch,
        Status::CallbackScopeMismatch,
        Status::QueueFull,
        Status::Closing,
        Status::BigintExpected,
        Status::DateExpected,
        Status::ArraybufferExpected,
        Status::DetachableArraybufferExpected,
        Status::WouldDeadlock,
        Status::NoExternalBuffersAllowed,
        Status::CannotRunJs,
    ];

    /// ABI code of this status
    #[inline]
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Status for an ABI code
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }
}

impl From<Status> for u32 {
    fn from(status: Status) -> Self {
        status.code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(Status::Ok.code(), 0);
        assert_eq!(Status::GenericFailure.code(), 9);
        assert_eq!(Status::PendingException.code(), 10);
        assert_eq!(Status::HandleScopeMismatch.code(), 13);
        assert_eq!(Status::Closing.code(), 16);
        assert_eq!(Status::NoExternalBuffersAllowed.code(), 22);
        assert_eq!(Status::CannotRunJs.code(), 23);
    }

    #[test]
    fn test_from_code_roundtrip() {
        for (code, status) in Status::ALL.iter().enumerate() {
            assert_eq!(status.code() as usize, code);
            assert_eq!(Status::from_code(code as u32), Some(*status));
        }
        assert_eq!(Status::from_code(24), None);
    }
}
