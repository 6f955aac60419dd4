use serde_json::Value;

use crate::codec::{Codec, CodecError};

/// TOML documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct TomlCodec;

impl Codec for TomlCodec {
    fn name(&self) -> &str {
        "toml"
    }

    fn decode(&self, data: &[u8]) -> Result<Value, CodecError> {
        let text = std::str::from_utf8(data)?;
        Ok(toml::from_str(text)?)
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        if !value.is_object() {
            return Err(CodecError::Schema(
                "toml documents must be tables at the top level".to_string(),
            ));
        }
        Ok(toml::to_string(value)?.into_bytes())
    }
}
