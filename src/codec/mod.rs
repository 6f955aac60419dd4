//! Encoding subsystem.
//!
//! Codecs translate raw bytes to and from a generic structured value
//! (`serde_json::Value`). Typed decoding goes through that value, so every
//! codec shares one serde schema.
//!
//! # Design Decisions
//! - Codecs are pure: no I/O, no shared state
//! - Empty TOML is an empty table; empty JSON is an error
//! - Registry mirrors `storage::StorageRegistry`

mod json;
mod toml_codec;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::error::Error;
use crate::storage::Params;

pub use json::JsonCodec;
pub use toml_codec::TomlCodec;

/// Builds a codec instance from its parameters.
pub type CodecFactory = Box<dyn Fn(&Params) -> Result<Arc<dyn Codec>, String> + Send + Sync>;

/// Errors raised while encoding or decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid utf-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("toml parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("toml serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The decoded document has the wrong shape for its target.
    #[error("schema error: {0}")]
    Schema(String),
}

/// A (de)serializer between raw bytes and structured values.
pub trait Codec: Send + Sync + fmt::Debug {
    /// Identifier the codec is registered under.
    fn name(&self) -> &str;

    fn decode(&self, data: &[u8]) -> Result<Value, CodecError>;

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError>;
}

/// Decode bytes straight into a typed value.
pub fn decode_as<T: DeserializeOwned>(codec: &dyn Codec, data: &[u8]) -> Result<T, CodecError> {
    from_value(codec.decode(data)?)
}

/// Convert a structured value into a typed value.
pub fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, CodecError> {
    serde_json::from_value(value).map_err(|e| CodecError::Schema(e.to_string()))
}

/// Maps encoding identifiers to codec factories.
pub struct CodecRegistry {
    factories: HashMap<String, CodecFactory>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the `toml` and `json` codecs.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("toml", |_| Ok(Arc::new(TomlCodec) as Arc<dyn Codec>));
        registry.register("json", |params| {
            Ok(Arc::new(JsonCodec::from_params(params)?) as Arc<dyn Codec>)
        });
        registry
    }

    /// Register (or replace) a codec factory.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&Params) -> Result<Arc<dyn Codec>, String> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
        self
    }

    /// Build a codec for `name` from `params`.
    pub fn get(&self, name: &str, params: &Params) -> Result<Arc<dyn Codec>, Error> {
        let factory = self.factories.get(name).ok_or_else(|| Error::UnknownBackend {
            registry: "encoding",
            name: name.to_string(),
        })?;
        factory(params).map_err(|reason| Error::BackendConstruction {
            registry: "encoding",
            name: name.to_string(),
            reason,
        })
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("codecs", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        port: u16,
    }

    #[test]
    fn test_lookup() {
        let registry = CodecRegistry::default();
        assert_eq!(registry.names(), vec!["json", "toml"]);
        assert_eq!(registry.get("toml", &Params::new()).unwrap().name(), "toml");
        assert!(matches!(
            registry.get("yaml", &Params::new()),
            Err(Error::UnknownBackend { registry: "encoding", .. })
        ));
    }

    #[test]
    fn test_decode_as_typed() {
        let sample: Sample = decode_as(&TomlCodec, b"name = \"edge\"\nport = 8080").unwrap();
        assert_eq!(
            sample,
            Sample {
                name: "edge".into(),
                port: 8080
            }
        );

        let err = decode_as::<Sample>(&TomlCodec, b"name = \"edge\"").unwrap_err();
        assert!(matches!(err, CodecError::Schema(_)));
    }
}
