//! Message body encryption.
//!
//! Bodies travel as passphrase-encrypted AES-256-CBC in the OpenSSL "salted"
//! envelope: `base64("Salted__" || salt || ciphertext)`, with key and IV
//! derived from the passphrase by `EVP_BytesToKey` (MD5, one round). Browser
//! clients using CryptoJS `AES.encrypt(text, passphrase)` produce and accept
//! the same strings, so history written by either side stays readable.

use std::fmt;

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes256;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use block_padding::Pkcs7;
use cbc::{Decryptor, Encryptor};
use log::trace;
use rand::RngCore;

const SALT_MAGIC: &[u8; 8] = b"Salted__";
const SALT_LEN: usize = 8;
const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;
const BLOCK_LEN: usize = 16;

/// Shared passphrase used to encrypt message bodies.
///
/// Never compiled in; it is read from configuration (see
/// [`crate::app::AppState::cipher_key`]).
#[derive(Clone, PartialEq, Eq)]
pub struct CipherKey(String);

impl CipherKey {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self(passphrase.into())
    }

    fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CipherKey(..)")
    }
}

/// OpenSSL `EVP_BytesToKey` with MD5 and a single iteration.
fn derive_key_iv(passphrase: &[u8], salt: &[u8]) -> ([u8; KEY_LEN], [u8; IV_LEN]) {
    let mut material = Vec::with_capacity(KEY_LEN + IV_LEN + 16);
    let mut prev: Vec<u8> = Vec::new();
    while material.len() < KEY_LEN + IV_LEN {
        let mut input = Vec::with_capacity(prev.len() + passphrase.len() + salt.len());
        input.extend_from_slice(&prev);
        input.extend_from_slice(passphrase);
        input.extend_from_slice(salt);
        prev = md5::compute(&input).0.to_vec();
        material.extend_from_slice(&prev);
    }
    let mut key = [0u8; KEY_LEN];
    let mut iv = [0u8; IV_LEN];
    key.copy_from_slice(&material[..KEY_LEN]);
    iv.copy_from_slice(&material[KEY_LEN..KEY_LEN + IV_LEN]);
    (key, iv)
}

/// Encrypt a message body. A fresh random salt is used for every call.
pub fn encrypt(plaintext: &str, key: &CipherKey) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    encrypt_with_salt(plaintext, key, &salt)
}

fn encrypt_with_salt(plaintext: &str, key: &CipherKey, salt: &[u8; SALT_LEN]) -> String {
    let (k, iv) = derive_key_iv(key.as_bytes(), salt);
    let ciphertext = Encryptor::<Aes256>::new(&k.into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    let mut envelope = Vec::with_capacity(SALT_MAGIC.len() + SALT_LEN + ciphertext.len());
    envelope.extend_from_slice(SALT_MAGIC);
    envelope.extend_from_slice(salt);
    envelope.extend_from_slice(&ciphertext);
    STANDARD.encode(envelope)
}

/// Decrypt a message body.
///
/// Returns an empty string on any failure (not base64, no salt header, wrong
/// key, bad padding, non UTF-8 plaintext). Rendering treats an empty body as
/// "no text", so callers never see an error here.
pub fn decrypt(ciphertext: &str, key: &CipherKey) -> String {
    try_decrypt(ciphertext, key).unwrap_or_default()
}

fn try_decrypt(ciphertext: &str, key: &CipherKey) -> Option<String> {
    let raw = STANDARD.decode(ciphertext.trim()).ok()?;
    let header = SALT_MAGIC.len() + SALT_LEN;
    if raw.len() <= header || !raw.starts_with(SALT_MAGIC) {
        trace!("ciphertext has no salted header ({} bytes)", raw.len());
        return None;
    }
    let body = &raw[header..];
    if body.len() % BLOCK_LEN != 0 {
        return None;
    }
    let (k, iv) = derive_key_iv(key.as_bytes(), &raw[SALT_MAGIC.len()..header]);
    let plain = Decryptor::<Aes256>::new(&k.into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(body)
        .ok()?;
    String::from_utf8(plain).ok()
}

/// Decrypt an optional body, mapping `None` to the empty string.
pub fn decrypt_opt(ciphertext: Option<&str>, key: &CipherKey) -> String {
    match ciphertext {
        Some(c) if !c.is_empty() => decrypt(c, key),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> CipherKey {
        CipherKey::new("correct-horse")
    }

    #[test]
    fn round_trips_text() {
        for s in ["", "hi", "hello from the other side", "héllo 👋", &"x".repeat(1000)] {
            assert_eq!(decrypt(&encrypt(s, &key()), &key()), s);
        }
    }

    #[test]
    fn salts_differ_between_calls() {
        assert_ne!(encrypt("same", &key()), encrypt("same", &key()));
    }

    #[test]
    fn matches_openssl_salted_format() {
        let salt = [1, 2, 3, 4, 5, 6, 7, 8];
        let out = encrypt_with_salt("hello from the other side", &key(), &salt);
        assert_eq!(out, "U2FsdGVkX18BAgMEBQYHCHa95Jp3caH8pWZBPjVGN0lwqE/pPvBCKPDbrF0S1aiE");
    }

    #[test]
    fn decrypts_known_vectors() {
        assert_eq!(
            decrypt("U2FsdGVkX18BAgMEBQYHCHa95Jp3caH8pWZBPjVGN0lwqE/pPvBCKPDbrF0S1aiE", &key()),
            "hello from the other side"
        );
        assert_eq!(decrypt("U2FsdGVkX1+hssPU5fYHGFY+EiB6dP35apcbOwW25hw=", &key()), "héllo 👋");
    }

    #[test]
    fn wrong_key_yields_empty() {
        let other = CipherKey::new("wrong-key");
        assert_eq!(
            decrypt("U2FsdGVkX18BAgMEBQYHCHa95Jp3caH8pWZBPjVGN0lwqE/pPvBCKPDbrF0S1aiE", &other),
            ""
        );
        assert_eq!(decrypt("U2FsdGVkX1+hssPU5fYHGFY+EiB6dP35apcbOwW25hw=", &other), "");
    }

    #[test]
    fn garbage_yields_empty() {
        for g in ["", "plain legacy text", "%%%not base64%%%", "U2FsdGVkX18=", "aGVsbG8gd29ybGQ=", "U2FsdGVkX18BAgMEBQYHCHa9"] {
            assert_eq!(decrypt(g, &key()), "", "input {g:?}");
        }
        assert_eq!(decrypt_opt(None, &key()), "");
    }

    #[test]
    fn debug_hides_passphrase() {
        assert!(!format!("{:?}", key()).contains("horse"));
    }
}
