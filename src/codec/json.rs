use serde_json::Value;

use crate::codec::{Codec, CodecError};
use crate::storage::Params;

/// JSON documents. Output is pretty-printed unless `pretty = "false"`.
#[derive(Debug, Clone, Copy)]
pub struct JsonCodec {
    pretty: bool,
}

impl JsonCodec {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    pub fn from_params(params: &Params) -> Result<Self, String> {
        let pretty = match params.get("pretty").map(String::as_str) {
            None | Some("true") => true,
            Some("false") => false,
            Some(other) => return Err(format!("invalid pretty flag `{}`", other)),
        };
        Ok(Self::new(pretty))
    }
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Codec for JsonCodec {
    fn name(&self) -> &str {
        "json"
    }

    fn decode(&self, data: &[u8]) -> Result<Value, CodecError> {
        Ok(serde_json::from_slice(data)?)
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(value)?
        } else {
            serde_json::to_vec(value)?
        };
        Ok(bytes)
    }
}
