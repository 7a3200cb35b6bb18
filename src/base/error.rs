use std::error;
use std::fmt;
use std::io;

/// Represents errors that can occur during NVILIDAR operations.
#[derive(Debug)]
pub enum Error {
    /// The execution of operation failed. Contains a description of the failure.
    OperationFail { description: String },

    /// No answer arrived before the deadline.
    OperationTimeout,

    /// The transport is not open, or the reader thread is not running.
    NotConnected,

    /// The decoded data is invalid according to current protocol. Contains a description of the protocol error.
    ProtocolError { description: String },

    /// An I/O error occurred while communicating with the underlying transport (e.g., serial port).
    IoError(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OperationFail { description } => write!(f, "operation failed: {}", description),
            Error::OperationTimeout => write!(f, "operation timeout"),
            Error::NotConnected => write!(f, "lidar is not connected"),
            Error::ProtocolError { description } => write!(f, "protocol error: {}", description),
            Error::IoError(err) => write!(f, "io error: {}", err),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::IoError(err)
    }
}

#[cfg(feature = "serial")]
impl From<serialport::Error> for Error {
    fn from(err: serialport::Error) -> Self {
        Error::IoError(err.into())
    }
}

/// A specialized `Result` type for NVILIDAR operations.
pub type Result<T> = std::result::Result<T, Error>;
