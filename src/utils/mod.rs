//! Utility modules

pub mod error;
pub mod resp;
pub mod value;

pub use error::{
    ClientError, ClusterError, ConfigError, ConnectionError, InvalidSequenceState, ProtocolError,
    Result,
};
pub use resp::{Redirect, RespDecoder, RespEncoder, RespValue};
pub use value::Value;
