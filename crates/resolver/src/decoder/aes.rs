//! AES-256-CBC payload decryption with the two key derivations hosts use.
//!
//! - `Salted__` blobs (OpenSSL `enc` framing) with the iterated-MD5
//!   `EVP_BytesToKey` derivation producing both key and IV.
//! - JSON payloads carrying `iv`, `salt` and `iterations`, keyed with
//!   PBKDF2-HMAC-SHA512.

use aes::Aes256;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use sha2::Sha512;

use crate::error::ResolveError;

type Aes256CbcDec = cbc::Decryptor<Aes256>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;

const SALTED_MAGIC: &[u8] = b"Salted__";
const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;

/// How the AES key is derived from the passphrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyDerivation {
    /// OpenSSL `EVP_BytesToKey` with MD5, one round per block.
    OpensslSalted,
    /// PBKDF2-HMAC-SHA512 with the payload's salt and iteration count.
    Pbkdf2Json,
}

/// Encrypted payload parsed out of an embed page or API response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherPayload {
    pub ciphertext: Vec<u8>,
    /// Empty when the IV is derived from the passphrase.
    pub iv: Vec<u8>,
    pub salt: Vec<u8>,
    pub iterations: u32,
}

#[derive(Debug, Deserialize)]
struct JsonPayload {
    iv: String,
    salt: String,
    #[serde(default = "default_iterations")]
    iterations: u32,
    #[serde(alias = "ciphertext", alias = "ct", alias = "encrypted")]
    data: String,
}

fn default_iterations() -> u32 {
    1000
}

impl CipherPayload {
    /// Parse a base64 `Salted__` blob.
    pub fn from_openssl_salted(blob: &str) -> Result<Self, ResolveError> {
        let raw = STANDARD
            .decode(blob.trim())
            .map_err(|e| ResolveError::format(format!("salted blob is not base64: {e}")))?;
        if raw.len() <= 16 || !raw.starts_with(SALTED_MAGIC) {
            return Err(ResolveError::format("missing Salted__ header"));
        }
        Ok(Self {
            salt: raw[8..16].to_vec(),
            ciphertext: raw[16..].to_vec(),
            iv: Vec::new(),
            iterations: 1,
        })
    }

    /// Parse `{"iv": hex, "salt": hex, "iterations": n, "data": base64}`.
    pub fn from_pbkdf2_json(json: &str) -> Result<Self, ResolveError> {
        let payload: JsonPayload = serde_json::from_str(json)?;
        let iv = hex::decode(&payload.iv)
            .map_err(|e| ResolveError::format(format!("iv is not hex: {e}")))?;
        if iv.len() != IV_LEN {
            return Err(ResolveError::format(format!("iv must be {IV_LEN} bytes")));
        }
        let salt = hex::decode(&payload.salt)
            .map_err(|e| ResolveError::format(format!("salt is not hex: {e}")))?;
        let ciphertext = STANDARD
            .decode(payload.data.trim())
            .map_err(|e| ResolveError::format(format!("ciphertext is not base64: {e}")))?;
        Ok(Self {
            ciphertext,
            iv,
            salt,
            iterations: payload.iterations,
        })
    }

    pub fn parse(input: &str, derivation: KeyDerivation) -> Result<Self, ResolveError> {
        match derivation {
            KeyDerivation::OpensslSalted => Self::from_openssl_salted(input),
            KeyDerivation::Pbkdf2Json => Self::from_pbkdf2_json(input),
        }
    }
}

/// `EVP_BytesToKey(MD5, count = 1)`: key and IV for AES-256-CBC.
fn evp_bytes_to_key(passphrase: &[u8], salt: &[u8]) -> ([u8; KEY_LEN], [u8; IV_LEN]) {
    let mut derived = Vec::with_capacity(KEY_LEN + IV_LEN + 16);
    let mut block: Vec<u8> = Vec::new();
    while derived.len() < KEY_LEN + IV_LEN {
        let mut hasher = Md5::new();
        hasher.update(&block);
        hasher.update(passphrase);
        hasher.update(salt);
        block = hasher.finalize().to_vec();
        derived.extend_from_slice(&block);
    }
    let mut key = [0u8; KEY_LEN];
    let mut iv = [0u8; IV_LEN];
    key.copy_from_slice(&derived[..KEY_LEN]);
    iv.copy_from_slice(&derived[KEY_LEN..KEY_LEN + IV_LEN]);
    (key, iv)
}

fn cbc_decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<String, ResolveError> {
    let plaintext = Aes256CbcDec::new_from_slices(key, iv)
        .map_err(|e| ResolveError::decryption(format!("invalid key or iv length: {e}")))?
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| ResolveError::decryption("bad padding, wrong key or corrupt ciphertext"))?;
    if plaintext.is_empty() {
        return Err(ResolveError::decryption("empty plaintext"));
    }
    String::from_utf8(plaintext).map_err(|_| ResolveError::decryption("plaintext is not utf-8"))
}

/// Decrypt `payload` with `passphrase`. Wrong keys and corrupt padding are a
/// [`ResolveError::Decryption`]; so is an empty plaintext.
pub fn aes_decrypt(
    payload: &CipherPayload,
    passphrase: &str,
    derivation: KeyDerivation,
) -> Result<String, ResolveError> {
    match derivation {
        KeyDerivation::OpensslSalted => {
            let (key, iv) = evp_bytes_to_key(passphrase.as_bytes(), &payload.salt);
            cbc_decrypt(&key, &iv, &payload.ciphertext)
        }
        KeyDerivation::Pbkdf2Json => {
            if payload.iterations == 0 {
                return Err(ResolveError::format("pbkdf2 iterations must be positive"));
            }
            let key = pbkdf2::pbkdf2_hmac_array::<Sha512, KEY_LEN>(
                passphrase.as_bytes(),
                &payload.salt,
                payload.iterations,
            );
            cbc_decrypt(&key, &payload.iv, &payload.ciphertext)
        }
    }
}

/// Produce a base64 `Salted__` blob, the format [`CipherPayload::from_openssl_salted`] reads.
pub fn encrypt_openssl_salted(plaintext: &str, passphrase: &str, salt: [u8; 8]) -> String {
    let (key, iv) = evp_bytes_to_key(passphrase.as_bytes(), &salt);
    let ciphertext =
        Aes256CbcEnc::new(&key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
    let mut framed = Vec::with_capacity(16 + ciphertext.len());
    framed.extend_from_slice(SALTED_MAGIC);
    framed.extend_from_slice(&salt);
    framed.extend_from_slice(&ciphertext);
    STANDARD.encode(framed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SALT: [u8; 8] = [1, 2, 3, 4, 5, 6, 7, 8];
    const SOURCES_JSON: &str = r#"[{"file":"/video/master.m3u8","type":"hls"}]"#;
    const SOURCES_BLOB: &str = "U2FsdGVkX18BAgMEBQYHCDtjNQ5kQYIkHpxLlRcSe2iOn6kgu5ptln72F/SVJqX25ubnqeGr2q7lz38ob9hGIw==";

    #[test]
    fn test_salted_blob_decrypts_with_correct_passphrase() {
        let payload = CipherPayload::from_openssl_salted(SOURCES_BLOB).unwrap();
        assert_eq!(payload.salt, SALT);
        let plain = aes_decrypt(&payload, "s3cr3t-pass", KeyDerivation::OpensslSalted).unwrap();
        assert_eq!(plain, SOURCES_JSON);
    }

    #[test]
    fn test_salted_blob_rejects_wrong_passphrase() {
        let payload = CipherPayload::from_openssl_salted(SOURCES_BLOB).unwrap();
        for wrong in ["wrong-pass", "s3cr3t-pasz"] {
            let err = aes_decrypt(&payload, wrong, KeyDerivation::OpensslSalted).unwrap_err();
            assert!(matches!(err, ResolveError::Decryption(_)), "{wrong}: {err}");
        }
    }

    #[test]
    fn test_encrypt_matches_openssl_enc_output() {
        // openssl enc -aes-256-cbc -md md5 -S 0102030405060708 -pass pass:s3cr3t-pass -a
        assert_eq!(
            encrypt_openssl_salted("hello world", "s3cr3t-pass", SALT),
            "U2FsdGVkX18BAgMEBQYHCKpyqmYUt2DUWmN/cBvYRe4="
        );
        assert_eq!(encrypt_openssl_salted(SOURCES_JSON, "s3cr3t-pass", SALT), SOURCES_BLOB);
    }

    #[test]
    fn test_salted_blob_requires_magic() {
        let not_salted = STANDARD.encode(b"NotSalted_with_enough_bytes_here");
        assert!(matches!(
            CipherPayload::from_openssl_salted(&not_salted),
            Err(ResolveError::Format(_))
        ));
        assert!(CipherPayload::from_openssl_salted("%%%").is_err());
    }

    #[test]
    fn test_pbkdf2_json_payload() {
        let json = r#"{
            "iv": "00112233445566778899aabbccddeeff",
            "salt": "a1a2a3a4a5a6a7a8a9aaabacadaeafb0",
            "iterations": 1000,
            "data": "WpPOnIjMG3t/2ql//rjBA+iT6piungp8H4XRvcWKf0k="
        }"#;
        let payload = CipherPayload::from_pbkdf2_json(json).unwrap();
        assert_eq!(payload.iterations, 1000);
        let plain = aes_decrypt(&payload, "pbkdf2-pass", KeyDerivation::Pbkdf2Json).unwrap();
        assert_eq!(plain, r#"[{"file":"/hls/master.m3u8"}]"#);

        let err = aes_decrypt(&payload, "not-the-pass", KeyDerivation::Pbkdf2Json).unwrap_err();
        assert!(matches!(err, ResolveError::Decryption(_)));
    }

    #[test]
    fn test_pbkdf2_json_rejects_short_iv() {
        let json = r#"{"iv":"0011","salt":"aa","iterations":1,"data":"AAAA"}"#;
        assert!(matches!(
            CipherPayload::from_pbkdf2_json(json),
            Err(ResolveError::Format(_))
        ));
    }
}
