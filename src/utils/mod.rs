//! Utility modules

pub mod error;
pub mod resp;

pub use error::{ClientError, ConnectionError, ProtocolError, ResolveError, Result};
pub use resp::{RespDecoder, RespEncoder, RespValue};
