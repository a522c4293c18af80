//! Encrypted-envelope decoding.
//!
//! Feishu wraps events as `{"encrypt": "<base64>"}` when an encrypt key is
//! configured. The scheme is AES-256-CBC with PKCS#7 padding: the key is
//! SHA-256 of the configured encrypt key, the IV is the first 16 bytes of
//! the decoded payload.

use aes::Aes256;
use base64::Engine;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use sha2::{Digest, Sha256};

use crate::error::{FeishuError, Result};

type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Decrypt one envelope to its plaintext JSON.
pub fn decrypt_envelope(encrypt_key: &str, encrypted_b64: &str) -> Result<String> {
    let data = base64::engine::general_purpose::STANDARD
        .decode(encrypted_b64.trim())
        .map_err(|e| FeishuError::Decrypt(format!("bad base64: {e}")))?;
    if data.len() < 16 {
        return Err(FeishuError::Decrypt("payload shorter than IV".to_string()));
    }

    let key = Sha256::digest(encrypt_key.as_bytes());
    let (iv, ciphertext) = data.split_at(16);
    if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
        return Err(FeishuError::Decrypt("ciphertext not block-aligned".to_string()));
    }

    let mut buf = ciphertext.to_vec();
    let plain = Aes256CbcDec::new(key.as_slice().into(), iv.into())
        .decrypt_padded_mut::<Pkcs7>(&mut buf)
        .map_err(|e| FeishuError::Decrypt(format!("bad padding: {e}")))?;

    String::from_utf8(plain.to_vec())
        .map_err(|e| FeishuError::Decrypt(format!("plaintext not UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbc::cipher::BlockEncryptMut;

    type Aes256CbcEnc = cbc::Encryptor<Aes256>;

    fn encrypt_envelope(encrypt_key: &str, plaintext: &str) -> String {
        let key = Sha256::digest(encrypt_key.as_bytes());
        let iv = [7u8; 16];
        let ciphertext = Aes256CbcEnc::new(key.as_slice().into(), (&iv).into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
        let mut data = iv.to_vec();
        data.extend_from_slice(&ciphertext);
        base64::engine::general_purpose::STANDARD.encode(data)
    }

    #[test]
    fn roundtrip() {
        let envelope = encrypt_envelope("secret-key", r#"{"challenge":"abc"}"#);
        let plain = decrypt_envelope("secret-key", &envelope).unwrap();
        assert_eq!(plain, r#"{"challenge":"abc"}"#);
    }

    #[test]
    fn wrong_key_fails() {
        let envelope = encrypt_envelope("secret-key", r#"{"a":1}"#);
        assert!(decrypt_envelope("other-key", &envelope).is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decrypt_envelope("k", "not base64!!!").is_err());
        assert!(decrypt_envelope("k", "aGk=").is_err()); // shorter than an IV
    }
}
