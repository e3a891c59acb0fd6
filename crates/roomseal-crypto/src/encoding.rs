//! Unpadded standard base64, the encoding federation key servers expect for
//! public keys, signatures and ciphertext.

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;
use ed25519_dalek::VerifyingKey;
use x25519_dalek::PublicKey as Curve25519PublicKey;

use crate::error::CryptoError;

pub fn encode(bytes: impl AsRef<[u8]>) -> String {
    STANDARD_NO_PAD.encode(bytes)
}

/// Decode unpadded base64. Padded input is accepted too since some servers
/// re-serialize keys with trailing `=`.
pub fn decode(input: &str) -> Result<Vec<u8>, CryptoError> {
    STANDARD_NO_PAD
        .decode(input.trim_end_matches('='))
        .map_err(|e| CryptoError::InvalidKey(format!("invalid base64: {e}")))
}

pub fn decode_array<const N: usize>(input: &str) -> Result<[u8; N], CryptoError> {
    let bytes = decode(input)?;
    let len = bytes.len();
    <[u8; N]>::try_from(bytes)
        .map_err(|_| CryptoError::InvalidKey(format!("expected {N} bytes, got {len}")))
}

pub fn curve25519_from_base64(input: &str) -> Result<Curve25519PublicKey, CryptoError> {
    Ok(Curve25519PublicKey::from(decode_array::<32>(input)?))
}

pub fn ed25519_from_base64(input: &str) -> Result<VerifyingKey, CryptoError> {
    VerifyingKey::from_bytes(&decode_array::<32>(input)?)
        .map_err(|e| CryptoError::InvalidKey(format!("invalid Ed25519 public key: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_padded_input() {
        let encoded = encode([1u8, 2, 3, 4]);
        assert_eq!(encoded, "AQIDBA");
        assert_eq!(decode("AQIDBA==").unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn wrong_length_is_rejected() {
        let err = decode_array::<32>(&encode([0u8; 31])).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidKey(_)));
    }
}
