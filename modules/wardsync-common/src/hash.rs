use md5::{Digest, Md5};
use serde_json::Value;

/// MD5 hex digest of a record's canonical JSON form.
///
/// Records are deduplicated across re-fetches by this hash, so it must be
/// stable under key-order permutation of the source payload. serde_json
/// maps are BTreeMap-backed, so object keys serialize in sorted order at
/// every nesting level; array order is significant and preserved.
pub fn content_hash(value: &Value) -> String {
    let canonical = serde_json::to_string(value).unwrap_or_default();
    let mut hasher = Md5::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hash_is_stable_under_key_order() {
        let a: Value = serde_json::from_str(r#"{"b": 1, "a": "x", "c": [1, 2]}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"c": [1, 2], "a": "x", "b": 1}"#).unwrap();
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn hash_is_stable_under_nested_key_order() {
        let a: Value =
            serde_json::from_str(r#"{"outer": {"y": 2, "x": 1}, "list": [{"q": 1, "p": 2}]}"#)
                .unwrap();
        let b: Value =
            serde_json::from_str(r#"{"list": [{"p": 2, "q": 1}], "outer": {"x": 1, "y": 2}}"#)
                .unwrap();
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn different_values_hash_differently() {
        let a = json!({"date": "01-02-2024", "total_trained": 5});
        let b = json!({"date": "01-02-2024", "total_trained": 6});
        assert_ne!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn array_order_is_significant() {
        let a = json!({"phones": ["111", "222"]});
        let b = json!({"phones": ["222", "111"]});
        assert_ne!(content_hash(&a), content_hash(&b));
    }
}
