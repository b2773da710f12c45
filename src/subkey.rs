// src/subkey.rs
// FAST: per-call subkeys expanded from the session master key with HKDF-SHA256.
//
// Every encryption gets a fresh salt, so the same master key never yields the
// same subkey twice. The info tag separates the contact/message/device domains.

use std::fmt;

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::config::SALT_LEN;
use crate::error::{Result, VaultError};
use crate::kdf::MasterKey;

pub const SUBKEY_LEN: usize = 32;

/// Fixed salt for the lookup-index key. The index key must be stable across
/// sessions, so it cannot use a random salt.
const INDEX_SALT: &[u8] = b"zephra-lookup-index-v1";
const INDEX_INFO: &[u8] = b"index";

pub type Subkey = Zeroizing<[u8; SUBKEY_LEN]>;

/// Domain separation tag for a field category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyInfo {
    Message,
    Contact,
    Device,
}

impl KeyInfo {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyInfo::Message => "message",
            KeyInfo::Contact => "contact",
            KeyInfo::Device => "device",
        }
    }
}

impl fmt::Display for KeyInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct SubkeyDeriver;

impl SubkeyDeriver {
    /// Pure: same (master key, info, salt) always gives the same subkey.
    pub fn derive_key(master_key: &MasterKey, info: KeyInfo, salt: &[u8]) -> Result<Subkey> {
        expand(master_key, Some(salt), info.as_str().as_bytes())
    }

    /// Fresh random salt per call. The caller persists the salt.
    pub fn derive_random_key(master_key: &MasterKey, info: KeyInfo) -> Result<(Subkey, [u8; SALT_LEN])> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let key = Self::derive_key(master_key, info, &salt)?;
        Ok((key, salt))
    }

    /// Stable key for the lookup index. Never used to encrypt.
    pub fn derive_index_key(master_key: &MasterKey) -> Result<Subkey> {
        expand(master_key, Some(INDEX_SALT), INDEX_INFO)
    }

    /// Deterministic keyed digest (hex HMAC-SHA256) of a plaintext value,
    /// so equal plaintexts can be found or rejected without decryption.
    pub fn lookup_digest(master_key: &MasterKey, value: &str) -> Result<String> {
        let index_key = Self::derive_index_key(master_key)?;
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&index_key[..])
            .map_err(|e| VaultError::KeyDerivation(e.to_string()))?;
        mac.update(value.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

fn expand(master_key: &MasterKey, salt: Option<&[u8]>, info: &[u8]) -> Result<Subkey> {
    let hk = Hkdf::<Sha256>::new(salt, master_key.as_bytes());
    let mut okm = Zeroizing::new([0u8; SUBKEY_LEN]);
    hk.expand(info, &mut okm[..])
        .map_err(|e| VaultError::KeyDerivation(e.to_string()))?;
    Ok(okm)
}
