//! Value serializers used by the cache repository

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::DomainError;

#[cfg(test)]
use mockall::automock;

/// Converts values to and from their stored string representation.
///
/// Works on `serde_json::Value` so the trait stays object-safe; use
/// [`to_value`] and [`from_value`] to move between typed values and `Value`.
#[cfg_attr(test, automock)]
pub trait Serializer: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    fn encode(&self, value: &Value) -> Result<String, DomainError>;

    fn decode(&self, raw: &str) -> Result<Value, DomainError>;
}

/// Plain JSON text
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, value: &Value) -> Result<String, DomainError> {
        serde_json::to_string(value).map_err(|e| {
            DomainError::serialization(format!("Failed to encode JSON value: {}", e))
        })
    }

    fn decode(&self, raw: &str) -> Result<Value, DomainError> {
        serde_json::from_str(raw).map_err(|e| {
            DomainError::serialization(format!("Failed to decode JSON value: {}", e))
        })
    }
}

/// CBOR bytes, base64 encoded so they fit string-valued backends
#[derive(Debug, Clone, Copy, Default)]
pub struct BinarySerializer;

impl Serializer for BinarySerializer {
    fn name(&self) -> &'static str {
        "binary"
    }

    fn encode(&self, value: &Value) -> Result<String, DomainError> {
        let mut buffer = Vec::new();
        ciborium::into_writer(value, &mut buffer).map_err(|e| {
            DomainError::serialization(format!("Failed to encode CBOR value: {}", e))
        })?;

        Ok(STANDARD.encode(buffer))
    }

    fn decode(&self, raw: &str) -> Result<Value, DomainError> {
        let bytes = STANDARD.decode(raw).map_err(|e| {
            DomainError::serialization(format!("Invalid base64 payload: {}", e))
        })?;

        ciborium::from_reader(bytes.as_slice()).map_err(|e| {
            DomainError::serialization(format!("Failed to decode CBOR value: {}", e))
        })
    }
}

/// Serializer selection as it appears in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializerKind {
    #[default]
    Json,
    Binary,
}

impl SerializerKind {
    pub fn build(&self) -> Arc<dyn Serializer> {
        match self {
            Self::Json => Arc::new(JsonSerializer),
            Self::Binary => Arc::new(BinarySerializer),
        }
    }
}

impl std::str::FromStr for SerializerKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "binary" | "cbor" => Ok(Self::Binary),
            _ => Err(DomainError::configuration(format!(
                "Unknown serializer: {}. Valid serializers: json, binary",
                s
            ))),
        }
    }
}

pub fn to_value<V: Serialize + ?Sized>(value: &V) -> Result<Value, DomainError> {
    serde_json::to_value(value)
        .map_err(|e| DomainError::serialization(format!("Failed to serialize value: {}", e)))
}

pub fn from_value<V: DeserializeOwned>(value: Value) -> Result<V, DomainError> {
    serde_json::from_value(value)
        .map_err(|e| DomainError::serialization(format!("Failed to deserialize value: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_serializer() {
        let serializer = JsonSerializer;
        let raw = serializer.encode(&json!({"name": "a"})).unwrap();
        assert_eq!(raw, "{\"name\":\"a\"}");
        assert_eq!(serializer.decode(&raw).unwrap(), json!({"name": "a"}));
    }

    #[test]
    fn test_json_serializer_rejects_garbage() {
        let result = JsonSerializer.decode("{not json");
        assert!(matches!(result, Err(DomainError::Serialization { .. })));
    }

    #[test]
    fn test_binary_serializer_is_opaque() {
        let serializer = BinarySerializer;
        let value = json!({"name": "a", "scores": [1, 2, 3], "active": true});

        let raw = serializer.encode(&value).unwrap();
        assert!(!raw.contains("name"));
        assert_eq!(serializer.decode(&raw).unwrap(), value);
    }

    #[test]
    fn test_binary_serializer_rejects_invalid_base64() {
        let result = BinarySerializer.decode("***");
        assert!(matches!(result, Err(DomainError::Serialization { .. })));
    }

    #[test]
    fn test_serializer_kind_from_str() {
        assert_eq!("json".parse::<SerializerKind>().unwrap(), SerializerKind::Json);
        assert_eq!("CBOR".parse::<SerializerKind>().unwrap(), SerializerKind::Binary);
        assert!("php".parse::<SerializerKind>().is_err());
        assert_eq!(SerializerKind::Binary.build().name(), "binary");
    }

    #[test]
    fn test_typed_round_trip_through_value() {
        #[derive(Debug, PartialEq, Serialize, serde::Deserialize)]
        struct User {
            name: String,
        }

        let value = to_value(&User { name: "a".into() }).unwrap();
        let user: User = from_value(value).unwrap();
        assert_eq!(user, User { name: "a".into() });
    }
}
