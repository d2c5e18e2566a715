//! Value-encoding modes
//!
//! A connection may be configured to store structured values in an
//! encoded form. Without one, only scalars can be stored and they travel
//! as their plain wire bytes.

use std::fmt;
use std::str::FromStr;

use crate::utils::{ClientError, ConfigError, Result, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Serializer {
    #[default]
    None,
    Json,
    MsgPack,
}

impl Serializer {
    pub fn is_enabled(self) -> bool {
        self != Serializer::None
    }

    /// Encode a value the way it is stored
    pub fn encode(self, value: &Value) -> Result<Vec<u8>> {
        match self {
            Serializer::None => value
                .scalar_bytes()
                .map(|bytes| bytes.into_owned())
                .ok_or(ClientError::UnsupportedValue(value.kind())),
            Serializer::Json => {
                serde_json::to_vec(value).map_err(|e| ClientError::Serialization(e.to_string()))
            }
            Serializer::MsgPack => {
                rmp_serde::to_vec(value).map_err(|e| ClientError::Serialization(e.to_string()))
            }
        }
    }

    /// Decode a stored value
    pub fn decode(self, bytes: &[u8]) -> Result<Value> {
        match self {
            Serializer::None => Ok(Value::from(bytes)),
            Serializer::Json => {
                serde_json::from_slice(bytes).map_err(|e| ClientError::Serialization(e.to_string()))
            }
            Serializer::MsgPack => {
                rmp_serde::from_slice(bytes).map_err(|e| ClientError::Serialization(e.to_string()))
            }
        }
    }
}

impl FromStr for Serializer {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "none" | "0" => Ok(Serializer::None),
            "json" => Ok(Serializer::Json),
            "msgpack" => Ok(Serializer::MsgPack),
            _ => Err(ConfigError::InvalidParameter {
                name: "serializer".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Serializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Serializer::None => write!(f, "none"),
            Serializer::Json => write!(f, "json"),
            Serializer::MsgPack => write!(f, "msgpack"),
        }
    }
}
