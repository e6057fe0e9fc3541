use aes::Aes256;
use cbc::{Decryptor, Encryptor};
use cipher::block_padding::Pkcs7;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

type Aes256CbcEnc = Encryptor<Aes256>;
type Aes256CbcDec = Decryptor<Aes256>;

/// AES-CBC uses a 16-byte initialization vector, one fresh random IV per
/// encryption call. The IV travels with the ciphertext inside the envelope.
const IV_LEN: usize = 16;

const KEY_LEN: usize = 32;

/// Development fallback key. Deployments override it with `VIZBOARD_SECRET`
/// (64 hex characters); the stored corpus is only readable with the key it
/// was written under.
const DEV_SECRET: &str = "6df2f2b4b4e15c22ea0abbbd79d50a9d3ca53a06cf2e1f4e39d31f7f25a19b08";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("envelope is not in iv:ciphertext form")]
    MalformedEnvelope,
    #[error("invalid hex in envelope: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("invalid initialization vector length: {0} bytes (expected 16)")]
    InvalidIvLength(usize),
    #[error("block decryption failed")]
    Decrypt,
    #[error("serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Symmetric codec protecting user data at rest.
///
/// Every persisted field that holds user rows or schema goes through this
/// codec. Values are serialized to JSON, encrypted with AES-256-CBC under a
/// fixed server-held key, and stored as `"<ivHex>:<cipherHex>"`.
#[derive(Clone)]
pub struct Codec {
    key: [u8; KEY_LEN],
}

impl Codec {
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Codec { key }
    }

    /// Build the codec from the `VIZBOARD_SECRET` environment variable,
    /// falling back to the built-in development key.
    pub fn from_env() -> Self {
        let key = std::env::var("VIZBOARD_SECRET")
            .ok()
            .and_then(|s| Self::parse_key(&s))
            .unwrap_or_else(|| {
                Self::parse_key(DEV_SECRET).expect("development key is valid hex")
            });
        Codec { key }
    }

    fn parse_key(hex_str: &str) -> Option<[u8; KEY_LEN]> {
        let bytes = hex::decode(hex_str.trim()).ok()?;
        let key: [u8; KEY_LEN] = bytes.try_into().ok()?;
        Some(key)
    }

    /// Encrypt any JSON-serializable value into a storable envelope
    ///
    /// Serializes the value, generates a fresh random IV, and runs
    /// AES-256-CBC with PKCS7 padding.
    ///
    /// # Arguments
    /// * `value` - The value to protect (row lists, column lists)
    ///
    /// # Returns
    /// * `Result<String, CodecError>` - The `"<ivHex>:<cipherHex>"` envelope
    pub fn encrypt<T: Serialize>(&self, value: &T) -> Result<String, CodecError> {
        let plaintext = serde_json::to_string(value)?;

        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let enc = Aes256CbcEnc::new_from_slices(&self.key, &iv)
            .map_err(|_| CodecError::InvalidIvLength(iv.len()))?;
        let ciphertext = enc.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

        Ok(format!("{}:{}", hex::encode(iv), hex::encode(ciphertext)))
    }

    /// Strict inverse of [`Codec::encrypt`]
    ///
    /// Parses the envelope, reconstructs the IV, decrypts, and deserializes.
    /// Callers that read persisted documents should go through
    /// [`Codec::decrypt_or_empty`] instead; this variant surfaces every
    /// failure.
    pub fn decrypt<T: DeserializeOwned>(&self, envelope: &str) -> Result<T, CodecError> {
        let (iv_hex, cipher_hex) = envelope
            .split_once(':')
            .ok_or(CodecError::MalformedEnvelope)?;

        let iv = hex::decode(iv_hex)?;
        if iv.len() != IV_LEN {
            return Err(CodecError::InvalidIvLength(iv.len()));
        }
        let ciphertext = hex::decode(cipher_hex)?;

        let dec = Aes256CbcDec::new_from_slices(&self.key, &iv)
            .map_err(|_| CodecError::InvalidIvLength(iv.len()))?;
        let plaintext = dec
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| CodecError::Decrypt)?;

        Ok(serde_json::from_slice(&plaintext)?)
    }

    /// Fail-soft decryption boundary
    ///
    /// A missing field, malformed envelope, wrong key, tampered ciphertext,
    /// or undeserializable plaintext all collapse to `T::default()` with a
    /// logged warning. A single corrupted historical record must not take
    /// down a listing endpoint that returns many documents.
    pub fn decrypt_or_empty<T: DeserializeOwned + Default>(&self, envelope: Option<&str>) -> T {
        let Some(envelope) = envelope else {
            log::warn!("missing encrypted field, returning empty value");
            return T::default();
        };
        match self.decrypt(envelope) {
            Ok(value) => value,
            Err(err) => {
                log::warn!("failed to decode encrypted field, returning empty value: {err}");
                T::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, Value, json};

    fn codec() -> Codec {
        Codec::new([7u8; KEY_LEN])
    }

    fn sample_rows() -> Vec<Map<String, Value>> {
        let mut a = Map::new();
        a.insert("name".to_string(), json!("alice"));
        a.insert("score".to_string(), json!(42));
        let mut b = Map::new();
        b.insert("name".to_string(), json!("bob"));
        b.insert("score".to_string(), json!(17.5));
        vec![a, b]
    }

    #[test]
    fn round_trip_preserves_rows() {
        let codec = codec();
        let rows = sample_rows();
        let envelope = codec.encrypt(&rows).expect("encrypt");
        let back: Vec<Map<String, Value>> = codec.decrypt(&envelope).expect("decrypt");
        assert_eq!(back, rows);
    }

    #[test]
    fn round_trip_preserves_columns() {
        let codec = codec();
        let columns = vec!["name".to_string(), "score".to_string()];
        let envelope = codec.encrypt(&columns).expect("encrypt");
        let back: Vec<String> = codec.decrypt(&envelope).expect("decrypt");
        assert_eq!(back, columns);
    }

    #[test]
    fn envelope_carries_hex_iv_and_ciphertext() {
        let codec = codec();
        let envelope = codec.encrypt(&vec!["a".to_string()]).expect("encrypt");
        let (iv_hex, cipher_hex) = envelope.split_once(':').expect("two parts");
        assert_eq!(iv_hex.len(), IV_LEN * 2);
        assert!(iv_hex.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(!cipher_hex.is_empty());
        assert!(cipher_hex.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn iv_is_fresh_per_call() {
        let codec = codec();
        let columns = vec!["name".to_string()];
        let first = codec.encrypt(&columns).expect("encrypt");
        let second = codec.encrypt(&columns).expect("encrypt");
        assert_ne!(first, second);
    }

    #[test]
    fn decrypt_or_empty_never_raises() {
        let codec = codec();

        let missing: Vec<String> = codec.decrypt_or_empty(None);
        assert!(missing.is_empty());

        let empty: Vec<String> = codec.decrypt_or_empty(Some(""));
        assert!(empty.is_empty());

        let garbage: Vec<String> = codec.decrypt_or_empty(Some("not-a-valid-envelope"));
        assert!(garbage.is_empty());

        let bad_hex: Vec<String> = codec.decrypt_or_empty(Some("zz:zz"));
        assert!(bad_hex.is_empty());
    }

    #[test]
    fn decrypt_or_empty_on_tampered_ciphertext() {
        let codec = codec();
        let envelope = codec
            .encrypt(&vec!["name".to_string(), "score".to_string()])
            .expect("encrypt");

        // Flip the final hex digit of the ciphertext.
        let mut tampered = envelope.clone();
        let last = tampered.pop().expect("nonempty");
        tampered.push(if last == '0' { '1' } else { '0' });

        let result: Vec<String> = codec.decrypt_or_empty(Some(&tampered));
        assert!(result.is_empty());
    }

    #[test]
    fn decrypt_or_empty_with_wrong_key() {
        let envelope = codec().encrypt(&sample_rows()).expect("encrypt");
        let other = Codec::new([9u8; KEY_LEN]);
        let result: Vec<Map<String, Value>> = other.decrypt_or_empty(Some(&envelope));
        assert!(result.is_empty());
    }

    #[test]
    fn strict_decrypt_reports_malformed_envelope() {
        let err = codec().decrypt::<Vec<String>>("no-separator-here").unwrap_err();
        assert!(matches!(err, CodecError::MalformedEnvelope));
    }
}
