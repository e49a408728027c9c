//! Canonical JSON normalization and digest computation (RFC 8785-class).
//!
//! Change fingerprints and document hashes must not depend on the key order a
//! planner happened to emit, so every digest goes through [`canonical_json`]:
//! - object keys ordered by UTF-16 code units (§3.2.3)
//! - integer-valued floats written as integers; NaN/Infinity rejected
//! - compact output, no insignificant whitespace

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{ModelError, Result};

/// Convert a JSON value to its canonical string form.
pub fn canonical_json(value: &Value) -> Result<String> {
    let mut out = String::new();
    write_canonical(value, &mut out)?;
    Ok(out)
}

/// Serialize `value` and return the canonical JSON of the result.
pub fn canonical_json_of<T: Serialize>(value: &T) -> Result<String> {
    let value = serde_json::to_value(value)?;
    canonical_json(&value)
}

/// SHA-256 hex digest of the canonical JSON of `value`.
pub fn compute_digest(value: &Value) -> Result<String> {
    let canonical = canonical_json(value)?;
    Ok(sha256_hex(canonical.as_bytes()))
}

/// SHA-256 hex digest of the canonical JSON of any serializable value.
pub fn digest_of<T: Serialize>(value: &T) -> Result<String> {
    let canonical = canonical_json_of(value)?;
    Ok(sha256_hex(canonical.as_bytes()))
}

/// Plain SHA-256 hex digest of raw bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn write_canonical(value: &Value, out: &mut String) -> Result<()> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_by(|a, b| a.encode_utf16().cmp(b.encode_utf16()));

            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                write_canonical(&map[key], out)?;
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                out.push_str(&n.to_string());
            } else if let Some(f) = n.as_f64() {
                if !f.is_finite() {
                    return Err(ModelError::NonCanonical(
                        "NaN/Infinity not permitted in canonical JSON".to_string(),
                    ));
                }
                if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                    out.push_str(&(f as i64).to_string());
                } else {
                    out.push_str(&n.to_string());
                }
            } else {
                out.push_str(&n.to_string());
            }
        }
        other => out.push_str(&serde_json::to_string(other)?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_sorts_keys() {
        let canonical = canonical_json(&json!({"b": 1, "a": 2})).expect("canonical");
        assert_eq!(canonical, r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn canonical_json_integer_valued_float() {
        let canonical = canonical_json(&json!({"value": 1.0})).expect("canonical");
        assert_eq!(canonical, r#"{"value":1}"#);

        let canonical = canonical_json(&json!({"value": -1.0})).expect("canonical");
        assert_eq!(canonical, r#"{"value":-1}"#);
    }

    #[test]
    fn canonical_json_fractional_float_kept() {
        let canonical = canonical_json(&json!({"value": 1.5})).expect("canonical");
        assert_eq!(canonical, r#"{"value":1.5}"#);
    }

    #[test]
    fn canonical_json_nested_order_invariant() {
        let a = json!({"outer": {"z": 1, "y": [1, {"k": true, "j": null}]}});
        let b = json!({"outer": {"y": [1, {"j": null, "k": true}], "z": 1}});
        assert_eq!(
            canonical_json(&a).expect("a"),
            canonical_json(&b).expect("b")
        );
    }

    #[test]
    fn canonical_json_array_order_preserved() {
        let a = canonical_json(&json!([3, 1, 2])).expect("a");
        let b = canonical_json(&json!([1, 2, 3])).expect("b");
        assert_ne!(a, b);
    }

    #[test]
    fn canonical_json_escapes_strings() {
        let canonical = canonical_json(&json!({"cidr": "10.0.0.0/16\n"})).expect("canonical");
        assert_eq!(canonical, r#"{"cidr":"10.0.0.0/16\n"}"#);
    }

    #[test]
    fn compute_digest_is_hex_and_stable() {
        let input = json!({"name": "vpc/main", "action": "update"});
        let d1 = compute_digest(&input).expect("digest");
        let d2 = compute_digest(&input).expect("digest");
        assert_eq!(d1.len(), 64);
        assert!(d1.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(d1, d2);
    }

    #[test]
    fn compute_digest_single_field_delta() {
        let d1 = compute_digest(&json!({"cidr": "10.0.0.0/16"})).expect("d1");
        let d2 = compute_digest(&json!({"cidr": "10.1.0.0/16"})).expect("d2");
        assert_ne!(d1, d2);
    }
}
