//! Hashing utilities.

use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use subtle_encoding::hex;

/// Compute a content fingerprint for a JSON value: the lowercase hexadecimal
/// SHA256 digest of its compact serialization.
///
/// Key order is significant, so two objects with the same entries in a
/// different order produce different fingerprints (they also produce
/// differently ordered dashboards).
pub fn fingerprint(value: &JsonValue) -> String {
    let digest = Sha256::digest(value.to_string().as_bytes());
    String::from_utf8(hex::encode(digest)).unwrap_or_default()
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn identical_values_share_a_fingerprint() {
        let a = json!({"summary": {"total": 3}, "insights": ["x"]});
        let b = json!({"summary": {"total": 3}, "insights": ["x"]});
        assert_eq!(fingerprint(&a), fingerprint(&b));
        assert_eq!(fingerprint(&a).len(), 64);
    }

    #[test]
    fn changed_values_do_not() {
        let a = json!({"summary": {"total": 3}});
        let b = json!({"summary": {"total": 4}});
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }
}
