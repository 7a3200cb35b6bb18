mod error;
mod message;
mod signal;
mod traits;

pub use self::error::{Error, Result};
pub use self::message::Message;
pub use self::signal::Signal;
pub use self::traits::{decode_all, ProtocolDecoder, ProtocolEncoder};
