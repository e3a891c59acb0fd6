//! Canonical JSON: the byte form that gets signed.
//!
//! Object keys are sorted lexicographically (by UTF-8 bytes) at every depth and
//! no insignificant whitespace is emitted, so two structurally equal values
//! always produce identical bytes regardless of how they were built. Any
//! federation peer verifying a signature re-derives these bytes from the same
//! logical content.

use ed25519_dalek::{Signature, VerifyingKey};
use serde_json::{Map, Value};

use crate::encoding;
use crate::error::CryptoError;
use crate::identity::Identity;

/// Fields excluded from the signed form of an object.
const UNSIGNED_FIELDS: [&str; 2] = ["signatures", "unsigned"];

/// Serialize `value` canonically.
pub fn canonical_json(value: &Value) -> Result<String, CryptoError> {
    let mut out = String::new();
    write_value(&mut out, value)?;
    Ok(out)
}

fn write_value(out: &mut String, value: &Value) -> Result<(), CryptoError> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_string(out, s)?,
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_unstable_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key)?;
                out.push(':');
                write_value(out, item)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

fn write_string(out: &mut String, s: &str) -> Result<(), CryptoError> {
    let escaped =
        serde_json::to_string(s).map_err(|e| CryptoError::Serialization(e.to_string()))?;
    out.push_str(&escaped);
    Ok(())
}

/// Canonical form of an object with its `signatures` and `unsigned` fields
/// stripped.
pub fn signable_json(value: &Value) -> Result<String, CryptoError> {
    let Value::Object(map) = value else {
        return Err(CryptoError::Serialization(
            "only JSON objects can be signed".into(),
        ));
    };
    let stripped: Map<String, Value> = map
        .iter()
        .filter(|(key, _)| !UNSIGNED_FIELDS.contains(&key.as_str()))
        .map(|(key, item)| (key.clone(), item.clone()))
        .collect();
    canonical_json(&Value::Object(stripped))
}

/// Sign `value` in place, adding `signatures.<signer>.<key_id>`.
///
/// Existing signatures by other signers and keys are preserved.
pub fn sign_json(
    identity: &Identity,
    signer: &str,
    key_id: &str,
    value: &mut Value,
) -> Result<(), CryptoError> {
    let signable = signable_json(value)?;
    let signature = encoding::encode(identity.sign(signable.as_bytes()).to_bytes());

    let Value::Object(map) = value else {
        return Err(CryptoError::Serialization(
            "only JSON objects can be signed".into(),
        ));
    };
    let signatures = map
        .entry("signatures")
        .or_insert_with(|| Value::Object(Map::new()));
    let Value::Object(signatures) = signatures else {
        return Err(CryptoError::SigningError(
            "`signatures` field is not an object".into(),
        ));
    };
    let by_signer = signatures
        .entry(signer.to_owned())
        .or_insert_with(|| Value::Object(Map::new()));
    let Value::Object(by_signer) = by_signer else {
        return Err(CryptoError::SigningError(format!(
            "signatures for {signer} are not an object"
        )));
    };
    by_signer.insert(key_id.to_owned(), Value::String(signature));
    Ok(())
}

/// Verify `signatures.<signer>.<key_id>` on `value` against `public_key`.
pub fn verify_json(
    public_key: &VerifyingKey,
    signer: &str,
    key_id: &str,
    value: &Value,
) -> Result<(), CryptoError> {
    let encoded = value
        .get("signatures")
        .and_then(|s| s.get(signer))
        .and_then(|s| s.get(key_id))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            CryptoError::VerificationError(format!("no signature by {signer} with {key_id}"))
        })?;
    let signature = Signature::from_bytes(&encoding::decode_array::<64>(encoded)?);
    let signable = signable_json(value)?;
    Identity::verify(public_key, signable.as_bytes(), &signature)
}
