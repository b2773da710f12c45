// src/cipher.rs
// FIELD CIPHER: AES-256-GCM over single string fields.
//
// Blob format (base64, standard alphabet):
//   [Salt 32] [IV 12] [Ciphertext ...] [Tag 16]
// The salt re-derives the HKDF subkey; nothing else about the key is stored.
// Empty strings pass through untouched in both directions.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::config::{IV_LEN, MIN_BLOB_LEN, SALT_LEN};
use crate::error::{Result, VaultError};
use crate::kdf::MasterKey;
use crate::subkey::{KeyInfo, SubkeyDeriver};

/// Stateless: the master key is borrowed per call and never kept.
pub struct FieldCipher;

impl FieldCipher {
    pub fn encrypt(plaintext: &str, info: KeyInfo, master_key: &MasterKey) -> Result<String> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);
        let (subkey, salt) = SubkeyDeriver::derive_random_key(master_key, info)?;

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&subkey[..]));
        // aes-gcm appends the 16-byte tag to the ciphertext.
        let sealed = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext.as_bytes())
            .map_err(|_| VaultError::Encryption)?;

        let mut frame = Vec::with_capacity(SALT_LEN + IV_LEN + sealed.len());
        frame.extend_from_slice(&salt);
        frame.extend_from_slice(&iv);
        frame.extend_from_slice(&sealed);

        Ok(STANDARD.encode(frame))
    }

    pub fn decrypt(blob: &str, info: KeyInfo, master_key: &MasterKey) -> Result<String> {
        if blob.is_empty() {
            return Ok(String::new());
        }

        let frame = STANDARD.decode(blob).map_err(|_| VaultError::Authentication)?;
        if frame.len() < MIN_BLOB_LEN {
            return Err(VaultError::Authentication);
        }

        let salt = &frame[..SALT_LEN];
        let iv = &frame[SALT_LEN..SALT_LEN + IV_LEN];
        let sealed = &frame[SALT_LEN + IV_LEN..];

        let subkey = SubkeyDeriver::derive_key(master_key, info, salt)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&subkey[..]));

        let plaintext = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(iv), sealed)
                .map_err(|_| VaultError::Authentication)?,
        );

        String::from_utf8(plaintext.to_vec()).map_err(|_| VaultError::Authentication)
    }

    /// Nullable columns: `None` stays NULL.
    pub fn encrypt_opt(plaintext: Option<&str>, info: KeyInfo, master_key: &MasterKey) -> Result<Option<String>> {
        plaintext.map(|p| Self::encrypt(p, info, master_key)).transpose()
    }

    pub fn decrypt_opt(blob: Option<&str>, info: KeyInfo, master_key: &MasterKey) -> Result<Option<String>> {
        blob.map(|b| Self::decrypt(b, info, master_key)).transpose()
    }
}
