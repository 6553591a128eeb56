use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JsonLineError {
    #[error("Serde serialization error")]
    SerializationError(#[source] serde_json::Error),

    #[error("Serde deserialization error")]
    DeserializationError(#[source] serde_json::Error),
}

/// Compact single-line JSON, suitable for newline-delimited channels.
pub fn json_dump(obj: &impl Serialize) -> Result<String, JsonLineError> {
    serde_json::to_string(obj).map_err(JsonLineError::SerializationError)
}

pub fn json_load<T: DeserializeOwned>(content: impl AsRef<[u8]>) -> Result<T, JsonLineError> {
    serde_json::from_slice(content.as_ref()).map_err(JsonLineError::DeserializationError)
}
