//! Payload transformation between row text and consumer types

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Payload conversion errors.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("payload decode failed: {0}")]
    Decode(#[source] BoxedCause),

    #[error("payload encode failed: {0}")]
    Encode(#[source] BoxedCause),
}

type BoxedCause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Converts between the row payload text and the consumer's payload type.
///
/// One transformer is supplied per queue; the producer uses
/// [`from_object`](PayloadTransformer::from_object) on enqueue and the
/// processor uses [`to_object`](PayloadTransformer::to_object) on claim.
pub trait PayloadTransformer<T>: Send + Sync {
    fn to_object(&self, payload: &str) -> Result<T, PayloadError>;
    fn from_object(&self, value: &T) -> Result<String, PayloadError>;
}

/// Identity transformer for queues whose payload is the raw string.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringPayloadTransformer;

impl PayloadTransformer<String> for StringPayloadTransformer {
    fn to_object(&self, payload: &str) -> Result<String, PayloadError> {
        Ok(payload.to_string())
    }

    fn from_object(&self, value: &String) -> Result<String, PayloadError> {
        Ok(value.clone())
    }
}

/// JSON transformer for serde-enabled payload types.
pub struct JsonPayloadTransformer<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonPayloadTransformer<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonPayloadTransformer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PayloadTransformer<T> for JsonPayloadTransformer<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    fn to_object(&self, payload: &str) -> Result<T, PayloadError> {
        serde_json::from_str(payload).map_err(|e| PayloadError::Decode(Box::new(e)))
    }

    fn from_object(&self, value: &T) -> Result<String, PayloadError> {
        serde_json::to_string(value).map_err(|e| PayloadError::Encode(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Order {
        id: u64,
        sku: String,
    }

    #[test]
    fn json_round_trip() {
        let transformer = JsonPayloadTransformer::<Order>::new();
        let order = Order {
            id: 12,
            sku: "a-1".to_string(),
        };
        let text = transformer.from_object(&order).unwrap();
        assert_eq!(transformer.to_object(&text).unwrap(), order);
    }

    #[test]
    fn json_decode_error_is_reported() {
        let transformer = JsonPayloadTransformer::<Order>::new();
        assert!(matches!(
            transformer.to_object("not json"),
            Err(PayloadError::Decode(_))
        ));
    }

    #[test]
    fn string_transformer_is_identity() {
        let transformer = StringPayloadTransformer;
        assert_eq!(transformer.to_object("p1").unwrap(), "p1");
        assert_eq!(transformer.from_object(&"p1".to_string()).unwrap(), "p1");
    }
}
