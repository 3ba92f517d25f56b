//! Crypto
//!
//! AES-256-CBC encryption of JSON payloads authenticated with HMAC-SHA256.
//! Both primitives are keyed with the same 256-bit symmetric key shared
//! through the pairing URI, and the tag is compared as a hex string. Both
//! properties are part of the wire format the paired peer expects.

use std::fmt::{self, Debug, Display};
use std::str::FromStr;

use aes::Aes256;
use aes::cipher::{
    BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7,
};
use alloy::hex;
use hmac::{Hmac, Mac};
use rand::{RngCore, rngs::OsRng};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use sha2::Sha256;

use crate::constants::{IV_LENGTH, KEY_LENGTH};
use crate::error::{Error, Result};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// Cryptographically secure random bytes, `bits / 8` of them.
pub fn generate_key(bits: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; bits / 8];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SymKey([u8; KEY_LENGTH]);

impl SymKey {
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(&generate_key(KEY_LENGTH * 8));
        Self(key)
    }

    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

// never print key material
impl Debug for SymKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymKey(..)")
    }
}

impl Display for SymKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for SymKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(Self(hex::decode_to_array::<_, KEY_LENGTH>(s)?))
    }
}

impl Serialize for SymKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for SymKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        SymKey::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Encrypted message body, every field lowercase hex.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    #[serde(rename = "data")]
    pub ciphertext: String,
    #[serde(rename = "hmac")]
    pub mac: String,
    pub iv: String,
}

pub fn encrypt<T: Serialize>(payload: &T, key: &SymKey) -> Result<EncryptedEnvelope> {
    let mut iv = [0u8; IV_LENGTH];
    OsRng.fill_bytes(&mut iv);
    let plaintext = serde_json::to_string(payload)?;
    seal(plaintext.as_bytes(), key, iv)
}

/// Returns `None` for anything that does not authenticate or does not parse
/// back into JSON. Callers drop such messages.
pub fn decrypt(envelope: &EncryptedEnvelope, key: &SymKey) -> Option<Value> {
    decrypt_as(envelope, key)
}

pub fn decrypt_as<T: DeserializeOwned>(envelope: &EncryptedEnvelope, key: &SymKey) -> Option<T> {
    if !verify_hmac(envelope, key) {
        log::trace!("dropping envelope with mismatching hmac");
        return None;
    }

    let iv = hex::decode(&envelope.iv).ok()?;
    let ciphertext = hex::decode(&envelope.ciphertext).ok()?;
    let plaintext = Aes256CbcDec::new_from_slices(key.as_bytes(), &iv)
        .ok()?
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .ok()?;
    let text = String::from_utf8(plaintext).ok()?;

    serde_json::from_str(&text)
        .inspect_err(|e| log::debug!("decrypted payload is not json: {e}"))
        .ok()
}

pub fn verify_hmac(envelope: &EncryptedEnvelope, key: &SymKey) -> bool {
    let (Ok(iv), Ok(ciphertext)) =
        (hex::decode(&envelope.iv), hex::decode(&envelope.ciphertext))
    else {
        return false;
    };

    let Ok(expected) = create_hmac(&iv, &ciphertext, key) else {
        return false;
    };

    // plain string comparison, not constant time
    let received = envelope.mac.trim_start_matches("0x").to_lowercase();
    hex::encode(expected) == received
}

fn seal(plaintext: &[u8], key: &SymKey, iv: [u8; IV_LENGTH]) -> Result<EncryptedEnvelope> {
    let ciphertext = Aes256CbcEnc::new_from_slices(key.as_bytes(), &iv)
        .map_err(|_| Error::Crypto("invalid key or iv length"))?
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);
    let mac = create_hmac(&iv, &ciphertext, key)?;

    Ok(EncryptedEnvelope {
        ciphertext: hex::encode(ciphertext),
        mac: hex::encode(mac),
        iv: hex::encode(iv),
    })
}

fn create_hmac(iv: &[u8], ciphertext: &[u8], key: &SymKey) -> Result<Vec<u8>> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key.as_bytes())
        .map_err(|_| Error::Crypto("invalid hmac key"))?;
    mac.update(iv);
    mac.update(ciphertext);
    Ok(mac.finalize().into_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn flip_first_bit(hex_str: &str) -> String {
        let mut bytes = hex::decode(hex_str).unwrap();
        bytes[0] ^= 0x01;
        hex::encode(bytes)
    }

    #[test]
    fn test_generate_key_length() {
        assert_eq!(generate_key(256).len(), 32);
        assert_eq!(generate_key(128).len(), 16);
        assert_ne!(SymKey::generate(), SymKey::generate());
    }

    #[test]
    fn test_encrypt_decrypt() {
        let key = SymKey::generate();
        let payload = json!({
            "id": 1,
            "jsonrpc": "2.0",
            "method": "wc_sessionRequest",
            "params": [{"peerId": "abc", "peerMeta": null, "chainId": null}],
        });

        let envelope = encrypt(&payload, &key).unwrap();
        assert_eq!(envelope.iv.len(), IV_LENGTH * 2);
        assert_eq!(envelope.mac.len(), 64);
        assert!(verify_hmac(&envelope, &key));

        assert_eq!(decrypt(&envelope, &key), Some(payload));
    }

    #[test]
    fn test_fresh_iv_per_message() {
        let key = SymKey::generate();
        let a = encrypt(&json!("same"), &key).unwrap();
        let b = encrypt(&json!("same"), &key).unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_tampered_envelope_is_dropped() {
        let key = SymKey::generate();
        let envelope = encrypt(&json!({"result": "0x1"}), &key).unwrap();

        let bad_ciphertext = EncryptedEnvelope {
            ciphertext: flip_first_bit(&envelope.ciphertext),
            ..envelope.clone()
        };
        assert_eq!(decrypt(&bad_ciphertext, &key), None);

        let bad_mac = EncryptedEnvelope {
            mac: flip_first_bit(&envelope.mac),
            ..envelope.clone()
        };
        assert_eq!(decrypt(&bad_mac, &key), None);

        let bad_iv = EncryptedEnvelope {
            iv: flip_first_bit(&envelope.iv),
            ..envelope.clone()
        };
        assert_eq!(decrypt(&bad_iv, &key), None);

        let garbage = EncryptedEnvelope {
            ciphertext: "zz".to_string(),
            ..envelope
        };
        assert_eq!(decrypt(&garbage, &key), None);
    }

    #[test]
    fn test_wrong_key_is_dropped() {
        let envelope = encrypt(&json!([1, 2, 3]), &SymKey::generate()).unwrap();
        assert_eq!(decrypt(&envelope, &SymKey::generate()), None);
    }

    #[test]
    fn test_non_json_plaintext_is_dropped() {
        let key = SymKey::generate();
        let envelope = seal(b"not json {", &key, [7u8; IV_LENGTH]).unwrap();
        assert!(verify_hmac(&envelope, &key));
        assert_eq!(decrypt(&envelope, &key), None);
    }

    #[test]
    fn test_mac_comparison_accepts_prefix_and_case() {
        let key = SymKey::generate();
        let mut envelope = encrypt(&json!(true), &key).unwrap();
        envelope.mac = format!("0x{}", envelope.mac.to_uppercase());
        assert_eq!(decrypt(&envelope, &key), Some(json!(true)));
    }

    #[test]
    fn test_envelope_wire_names() {
        let key = SymKey::generate();
        let envelope = encrypt(&json!({}), &key).unwrap();
        let value = serde_json::to_value(&envelope).unwrap();
        assert!(value.get("data").is_some());
        assert!(value.get("hmac").is_some());
        assert!(value.get("iv").is_some());
    }

    #[test]
    fn test_sym_key_hex() {
        let key = SymKey::from_bytes([0xab; 32]);
        let hex_str = key.to_hex();
        assert_eq!(hex_str, "ab".repeat(32));
        assert_eq!(SymKey::from_str(&hex_str).unwrap(), key);
        assert!(SymKey::from_str("abcd").is_err());
        assert_eq!(format!("{key:?}"), "SymKey(..)");
    }
}
