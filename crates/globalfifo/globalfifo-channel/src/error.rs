use std::io;

pub type Result<T> = std::result::Result<T, FifoError>;

/// Errors returned by channel operations.
///
/// None of them damage the channel: after any error the buffer and its
/// length are exactly what they were before the call.
#[derive(Debug, thiserror::Error)]
pub enum FifoError {
    /// Non-blocking read on an empty channel or write on a full one.
    #[error("operation would block")]
    WouldBlock,

    /// A blocking wait was cut short by an interrupt or timeout.
    #[error("blocking wait interrupted")]
    Interrupted,

    /// Seek target out of range, unknown seek mode or unknown control command.
    #[error("invalid argument")]
    InvalidArgument,

    /// The caller-supplied sink or source failed mid-transfer.
    #[error("transfer to caller buffer failed")]
    Fault(#[source] io::Error),
}

impl From<FifoError> for io::Error {
    fn from(err: FifoError) -> Self {
        let kind = match &err {
            FifoError::WouldBlock => io::ErrorKind::WouldBlock,
            FifoError::Interrupted => io::ErrorKind::Interrupted,
            FifoError::InvalidArgument => io::ErrorKind::InvalidInput,
            FifoError::Fault(_) => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}
