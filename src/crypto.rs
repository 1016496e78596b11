//! Branch credential encryption.
//!
//! Passphrases for `database_password` / `pgbouncer_admin_password` are stored encrypted
//! at rest using the same framing OpenSSL's `enc -aes-256-cbc` command produces:
//! `"Salted__" || salt(8) || ciphertext`, with the key/IV derived from a per-row
//! passphrase via `EVP_BytesToKey`. A legacy scheme (bare IV-prefixed ciphertext with the
//! AES key carried separately, base64-encoded) is still readable so that rows written
//! before the passphrase-based scheme continue to decrypt; reading one transparently
//! re-encrypts under the modern scheme.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;

use crate::error::{OperationError, Result};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const SALTED_PREFIX: &[u8] = b"Salted__";
const SALT_LEN: usize = 8;
const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;

/// Outcome of decrypting a row that may be in either the modern or legacy scheme.
pub struct Decrypted {
    pub plaintext: String,
    /// Set when the ciphertext was in the legacy format and should be rewritten.
    pub needs_reencryption: bool,
}

fn evp_bytes_to_key(passphrase: &str, salt: &[u8]) -> ([u8; KEY_LEN], [u8; IV_LEN]) {
    let mut derived = Vec::with_capacity(KEY_LEN + IV_LEN);
    let mut block: Vec<u8> = Vec::new();
    while derived.len() < KEY_LEN + IV_LEN {
        let mut input = block.clone();
        input.extend_from_slice(passphrase.as_bytes());
        input.extend_from_slice(salt);
        block = md5::compute(&input).0.to_vec();
        derived.extend_from_slice(&block);
    }
    let mut key = [0u8; KEY_LEN];
    let mut iv = [0u8; IV_LEN];
    key.copy_from_slice(&derived[..KEY_LEN]);
    iv.copy_from_slice(&derived[KEY_LEN..KEY_LEN + IV_LEN]);
    (key, iv)
}

/// Generate a random passphrase, base64-encoded, sized to `bits` (default 64 in callers).
pub fn generate_random_passphrase(bits: usize) -> Result<String> {
    if bits % 8 != 0 {
        return Err(OperationError::Internal("bits must be a multiple of 8".into()));
    }
    let mut bytes = vec![0u8; bits / 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    Ok(STANDARD.encode(bytes))
}

pub fn encrypt_with_passphrase(plaintext: &str, passphrase: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let (key, iv) = evp_bytes_to_key(passphrase, &salt);

    let ciphertext = Aes256CbcEnc::new(&key.into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    let mut payload = Vec::with_capacity(SALTED_PREFIX.len() + SALT_LEN + ciphertext.len());
    payload.extend_from_slice(SALTED_PREFIX);
    payload.extend_from_slice(&salt);
    payload.extend_from_slice(&ciphertext);
    STANDARD.encode(payload)
}

pub fn decrypt_with_passphrase(ciphertext_b64: &str, passphrase: &str) -> Result<String> {
    let payload = STANDARD
        .decode(ciphertext_b64)
        .map_err(|e| OperationError::Internal(format!("invalid base64 ciphertext: {e}")))?;
    if !payload.starts_with(SALTED_PREFIX) {
        return Err(OperationError::Internal("invalid ciphertext header".into()));
    }
    let salt = &payload[SALTED_PREFIX.len()..SALTED_PREFIX.len() + SALT_LEN];
    let encrypted = &payload[SALTED_PREFIX.len() + SALT_LEN..];
    let (key, iv) = evp_bytes_to_key(passphrase, salt);

    let plaintext = Aes256CbcDec::new(&key.into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(encrypted)
        .map_err(|e| OperationError::Internal(format!("decryption failed: {e}")))?;
    String::from_utf8(plaintext).map_err(|e| OperationError::Internal(e.to_string()))
}

pub fn encrypt_with_random_passphrase(plaintext: &str) -> Result<(String, String)> {
    let passphrase = generate_random_passphrase(64)?;
    Ok((encrypt_with_passphrase(plaintext, &passphrase), passphrase))
}

/// Decrypt ciphertext produced by the predecessor scheme, where the AES key was carried
/// separately as base64 and the payload is a bare `iv || ciphertext` (no salt framing).
pub fn decrypt_with_base64_key(ciphertext_b64: &str, key_b64: &str) -> Result<String> {
    let key_bytes = STANDARD
        .decode(key_b64)
        .map_err(|e| OperationError::Internal(format!("invalid base64 key: {e}")))?;
    let payload = STANDARD
        .decode(ciphertext_b64)
        .map_err(|e| OperationError::Internal(format!("invalid base64 ciphertext: {e}")))?;
    if payload.len() < IV_LEN {
        return Err(OperationError::Internal("ciphertext shorter than IV".into()));
    }
    let (iv, encrypted) = payload.split_at(IV_LEN);

    let plaintext = Aes256CbcDec::new_from_slices(&key_bytes, iv)
        .map_err(|e| OperationError::Internal(format!("invalid key/iv length: {e}")))?
        .decrypt_padded_vec_mut::<Pkcs7>(encrypted)
        .map_err(|e| OperationError::Internal(format!("decryption failed: {e}")))?;
    String::from_utf8(plaintext).map_err(|e| OperationError::Internal(e.to_string()))
}

/// Decrypt a stored credential, transparently handling the legacy format. Callers should
/// re-encrypt and persist when `needs_reencryption` is set.
pub fn decrypt_stored_credential(
    ciphertext_b64: &str,
    passphrase: &str,
    legacy_key_b64: Option<&str>,
) -> Result<Decrypted> {
    match decrypt_with_passphrase(ciphertext_b64, passphrase) {
        Ok(plaintext) => Ok(Decrypted { plaintext, needs_reencryption: false }),
        Err(modern_err) => {
            let legacy_key = legacy_key_b64.ok_or(modern_err)?;
            let plaintext = decrypt_with_base64_key(ciphertext_b64, legacy_key)?;
            Ok(Decrypted { plaintext, needs_reencryption: true })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_with_passphrase() {
        let (ciphertext, passphrase) = encrypt_with_random_passphrase("hunter2").unwrap();
        let plaintext = decrypt_with_passphrase(&ciphertext, &passphrase).unwrap();
        assert_eq!(plaintext, "hunter2");
    }

    #[test]
    fn rejects_wrong_passphrase() {
        let (ciphertext, _) = encrypt_with_random_passphrase("hunter2").unwrap();
        assert!(decrypt_with_passphrase(&ciphertext, "wrong-pass").is_err());
    }

    #[test]
    fn generated_passphrase_has_expected_length() {
        let passphrase = generate_random_passphrase(64).unwrap();
        let decoded = STANDARD.decode(&passphrase).unwrap();
        assert_eq!(decoded.len(), 8);
    }

    #[test]
    fn legacy_decrypt_flags_reencryption() {
        let key = {
            let mut bytes = [0u8; KEY_LEN];
            rand::thread_rng().fill_bytes(&mut bytes);
            STANDARD.encode(bytes)
        };
        let key_bytes = STANDARD.decode(&key).unwrap();
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);
        let ciphertext = Aes256CbcEnc::new_from_slices(&key_bytes, &iv)
            .unwrap()
            .encrypt_padded_vec_mut::<Pkcs7>(b"legacy-secret");
        let mut payload = iv.to_vec();
        payload.extend_from_slice(&ciphertext);
        let ciphertext_b64 = STANDARD.encode(payload);

        let result = decrypt_stored_credential(&ciphertext_b64, "unused", Some(&key)).unwrap();
        assert_eq!(result.plaintext, "legacy-secret");
        assert!(result.needs_reencryption);
    }
}
