//! CBOR encode/decode helpers

use ciborium::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;

use dias_core::{DiasError, DiasResult};

/// Upper bound for a single decoded message
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Encode a value as CBOR
pub fn encode<T: Serialize + ?Sized>(value: &T) -> DiasResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf).map_err(|e| DiasError::Encode(e.to_string()))?;
    Ok(buf)
}

/// Decode a CBOR value
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> DiasResult<T> {
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(DiasError::Decode(format!("message of {} bytes is too large", bytes.len())));
    }
    ciborium::de::from_reader(bytes).map_err(|e| DiasError::Decode(e.to_string()))
}

/// Decode a top-level CBOR array into its items
pub(crate) fn decode_array(bytes: &[u8], what: &str) -> DiasResult<Vec<Value>> {
    let value: Value = decode(bytes)?;
    value
        .into_array()
        .map_err(|_| DiasError::Decode(format!("{} is not an array", what)))
}

/// Convert a dynamic value into a typed one
pub(crate) fn from_value<T: DeserializeOwned>(value: &Value, what: &str) -> DiasResult<T> {
    value
        .deserialized()
        .map_err(|e| DiasError::Decode(format!("{}: {}", what, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_garbage_rejected() {
        let result: DiasResult<Vec<String>> = decode(&[0xff, 0x00, 0x13]);
        assert!(result.is_err());
    }

    #[test]
    fn test_array_required() {
        let bytes = encode(&42u32).unwrap();
        assert!(decode_array(&bytes, "number").is_err());
        let bytes = encode(&("a", 1u8)).unwrap();
        assert_eq!(decode_array(&bytes, "tuple").unwrap().len(), 2);
    }
}
