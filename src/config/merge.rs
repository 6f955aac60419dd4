//! Merge strategies for combining a primary source with its includes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How include fragments are combined with the primary source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// Join raw bytes with newlines and decode the result as one document.
    /// Overrides follow the codec's own rules for repeated keys.
    #[default]
    Concat,

    /// Decode each fragment on its own and merge the values: tables merge
    /// recursively, arrays append, anything else is replaced.
    Layered,
}

/// Join fragments the way `Concat` sees them.
pub fn concat_fragments<'a>(fragments: impl IntoIterator<Item = &'a [u8]>) -> Vec<u8> {
    let mut buffer = Vec::new();
    for (i, fragment) in fragments.into_iter().enumerate() {
        if i > 0 {
            buffer.push(b'\n');
        }
        buffer.extend_from_slice(fragment);
    }
    buffer
}

/// Merge `overlay` on top of `base` in place.
pub fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(base), Value::Array(overlay)) => base.extend(overlay),
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_concat_uses_single_newline() {
        let joined = concat_fragments([&b"a = 1"[..], &b"b = 2"[..], &b"c = 3"[..]]);
        assert_eq!(joined, b"a = 1\nb = 2\nc = 3");
        assert!(concat_fragments(std::iter::empty()).is_empty());
    }

    #[test]
    fn test_layered_merge() {
        let mut base = json!({
            "general": {"mode": "rule", "log_level": "info"},
            "rule": ["DOMAIN,example.com,PROXY1"]
        });
        merge_values(
            &mut base,
            json!({
                "general": {"mode": "global"},
                "rule": ["FINAL,,DIRECT"],
                "server": [{"name": "b"}]
            }),
        );
        assert_eq!(
            base,
            json!({
                "general": {"mode": "global", "log_level": "info"},
                "rule": ["DOMAIN,example.com,PROXY1", "FINAL,,DIRECT"],
                "server": [{"name": "b"}]
            })
        );
    }

    #[test]
    fn test_type_change_replaces() {
        let mut base = json!({"dns": {"hosts": {}}});
        merge_values(&mut base, json!({"dns": "off"}));
        assert_eq!(base, json!({"dns": "off"}));
    }
}
