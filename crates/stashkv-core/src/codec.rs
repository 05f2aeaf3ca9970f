//! Value encoding for persisted rows.
//!
//! Values are `serde` types stored as `bincode` blobs.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;

/// Encode a value into the bytes stored in the backend.
///
/// # Errors
///
/// Returns [`Error::Serialization`](crate::Error::Serialization) if the value
/// cannot be encoded.
pub fn encode<V: Serialize + ?Sized>(value: &V) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

/// Decode bytes loaded from the backend.
///
/// # Errors
///
/// Returns [`Error::Serialization`](crate::Error::Serialization) if the bytes
/// do not decode as `V`.
pub fn decode<V: DeserializeOwned>(bytes: &[u8]) -> Result<V> {
    Ok(bincode::deserialize(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Session {
        user: String,
        hits: u32,
    }

    #[test]
    fn test_decode_restores_struct() {
        let session = Session {
            user: "ada".to_string(),
            hits: 3,
        };

        let bytes = encode(&session).expect("encode");

        assert_eq!(decode::<Session>(&bytes).expect("decode"), session);
    }

    #[test]
    fn test_decode_garbage_is_serialization_error() {
        let err = decode::<Session>(&[0xff]).expect_err("must fail");

        assert_eq!(err.code(), "STASH-001");
    }
}
