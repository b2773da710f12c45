// src/settings.rs
// CLIENT STORAGE
// Durable key-value settings in one JSON file: the password record, the
// calibrated Argon2 time cost and the logout-trigger toggles.
//
// Writes go to a temp file in the same directory and are renamed over the
// target, so a crash never leaves a half-written record behind.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::config::{
    self, LEGACY_IV_LEN, LOGOUT_ON_LOST_FOCUS_DEFAULT, LOGOUT_ON_SHAKE_DEFAULT, SALT_LEN,
    SHAKE_THRESHOLD_GRAVITY_DEFAULT,
};
use crate::error::{Result, VaultError};

fn default_logout_on_lost_focus() -> bool {
    LOGOUT_ON_LOST_FOCUS_DEFAULT
}

fn default_logout_on_shake() -> bool {
    LOGOUT_ON_SHAKE_DEFAULT
}

fn default_shake_threshold() -> f64 {
    SHAKE_THRESHOLD_GRAVITY_DEFAULT
}

/// On-disk shape of the settings file. Byte fields are base64.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClientSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_iv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub argon2_time_cost: Option<u32>,
    #[serde(default = "default_logout_on_lost_focus")]
    pub logout_on_lost_focus: bool,
    #[serde(default = "default_logout_on_shake")]
    pub logout_on_shake: bool,
    #[serde(default = "default_shake_threshold")]
    pub shake_threshold_gravity: f64,
    /// Database location. Unset means `zephra.db` in the data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_path: Option<PathBuf>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            password_hash: None,
            salt: None,
            password_iv: None,
            argon2_time_cost: None,
            logout_on_lost_focus: LOGOUT_ON_LOST_FOCUS_DEFAULT,
            logout_on_shake: LOGOUT_ON_SHAKE_DEFAULT,
            shake_threshold_gravity: SHAKE_THRESHOLD_GRAVITY_DEFAULT,
            sql_path: None,
        }
    }
}

/// Everything needed to verify a password and re-derive the master key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordRecord {
    pub hash: String,
    /// Key-derivation salt. Independent of the salt inside `hash`.
    pub salt: [u8; SALT_LEN],
    /// Kept for older clients; the GCM path never reads it.
    pub legacy_iv: [u8; LEGACY_IV_LEN],
}

impl ClientSettings {
    pub fn has_account(&self) -> bool {
        self.password_hash.is_some()
    }

    /// `None` when no account exists. A record with a missing or
    /// wrongly sized salt is corrupt and reported as such.
    pub fn password_record(&self) -> Result<Option<PasswordRecord>> {
        let hash = match &self.password_hash {
            Some(hash) => hash.clone(),
            None => return Ok(None),
        };

        let salt = decode_fixed::<SALT_LEN>("salt", self.salt.as_deref())?;
        let legacy_iv = match self.password_iv.as_deref() {
            Some(iv) => decode_fixed::<LEGACY_IV_LEN>("password-iv", Some(iv))?,
            None => {
                warn!("password record has no legacy iv");
                [0u8; LEGACY_IV_LEN]
            }
        };

        Ok(Some(PasswordRecord { hash, salt, legacy_iv }))
    }

    pub fn set_password_record(&mut self, record: &PasswordRecord) {
        self.password_hash = Some(record.hash.clone());
        self.salt = Some(STANDARD.encode(record.salt));
        self.password_iv = Some(STANDARD.encode(record.legacy_iv));
    }
}

fn decode_fixed<const N: usize>(field: &str, value: Option<&str>) -> Result<[u8; N]> {
    let encoded = value.ok_or_else(|| VaultError::Settings(format!("{} missing", field)))?;
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| VaultError::Settings(format!("{} is not base64: {}", field, e)))?;

    bytes
        .try_into()
        .map_err(|v: Vec<u8>| VaultError::Settings(format!("{} has {} bytes, expected {}", field, v.len(), N)))
}

/// Cached settings plus the file they persist to.
pub struct ClientStorage {
    path: Option<PathBuf>,
    settings: RwLock<ClientSettings>,
}

impl ClientStorage {
    /// Loads `path` if it exists, otherwise starts from defaults.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let settings = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            let parsed: ClientSettings = serde_json::from_str(&raw)?;
            debug!(path = %path.display(), "loaded client storage");
            parsed
        } else {
            debug!(path = %path.display(), "no client storage yet, using defaults");
            ClientSettings::default()
        };

        Ok(Self { path: Some(path), settings: RwLock::new(settings) })
    }

    /// `client_storage.json` in the platform data directory.
    pub fn open_default() -> Result<Self> {
        Self::open(config::client_storage_path()?)
    }

    /// Never touches disk. Used by tests and throwaway sessions.
    pub fn ephemeral() -> Self {
        Self { path: None, settings: RwLock::new(ClientSettings::default()) }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn snapshot(&self) -> ClientSettings {
        self.settings.read().clone()
    }

    /// Applies `f` to a copy, persists it, then publishes it. On a write
    /// failure the cached settings stay unchanged.
    pub fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut ClientSettings),
    {
        self.try_update(|s| {
            f(s);
            Ok(())
        })
    }

    /// Like [`update`](Self::update), but `f` can veto the change. The
    /// check and the write happen under one write lock.
    pub fn try_update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut ClientSettings) -> Result<()>,
    {
        let mut guard = self.settings.write();
        let mut next = guard.clone();
        f(&mut next)?;

        if let Some(path) = &self.path {
            write_atomic(path, &next)?;
        }
        *guard = next;
        Ok(())
    }

    pub fn has_account(&self) -> bool {
        self.settings.read().has_account()
    }

    pub fn password_record(&self) -> Result<Option<PasswordRecord>> {
        self.settings.read().password_record()
    }

    pub fn set_password_record(&self, record: &PasswordRecord) -> Result<()> {
        self.update(|s| s.set_password_record(record))?;
        info!("password record stored");
        Ok(())
    }

    /// Fails with `AccountExists` if a record is already stored.
    pub fn create_password_record(&self, record: &PasswordRecord) -> Result<()> {
        self.try_update(|s| {
            if s.has_account() {
                return Err(VaultError::AccountExists);
            }
            s.set_password_record(record);
            Ok(())
        })?;
        info!("password record created");
        Ok(())
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.settings.read().sql_path {
            Some(path) => Ok(path.clone()),
            None => config::database_path(),
        }
    }

    pub fn argon2_time_cost(&self) -> Result<u32> {
        self.settings.read().argon2_time_cost.ok_or(VaultError::NotCalibrated)
    }

    pub fn set_argon2_time_cost(&self, time_cost: u32) -> Result<()> {
        if time_cost == 0 {
            return Err(VaultError::Calibration("time cost must be at least 1".into()));
        }
        self.update(|s| s.argon2_time_cost = Some(time_cost))
    }
}

fn write_atomic(path: &Path, settings: &ClientSettings) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let mut tmp = NamedTempFile::new_in(&dir)?;
    serde_json::to_writer_pretty(&mut tmp, settings)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| VaultError::from(e.error))?;

    debug!(path = %path.display(), "client storage written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> PasswordRecord {
        PasswordRecord {
            hash: "$argon2id$v=19$m=1024,t=1,p=1$c2FsdHNhbHQ$aGFzaA".into(),
            salt: [3u8; SALT_LEN],
            legacy_iv: [4u8; LEGACY_IV_LEN],
        }
    }

    #[test]
    fn test_defaults_for_missing_keys() {
        let parsed: ClientSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed, ClientSettings::default());
        assert!(!parsed.logout_on_lost_focus);
        assert!(!parsed.logout_on_shake);
        assert_eq!(parsed.shake_threshold_gravity, 2.7);
    }

    #[test]
    fn test_kebab_case_keys() {
        let mut s = ClientSettings::default();
        s.set_password_record(&record());
        s.argon2_time_cost = Some(4);

        let json = serde_json::to_value(&s).unwrap();
        for key in [
            "password-hash",
            "salt",
            "password-iv",
            "argon2-time-cost",
            "logout-on-lost-focus",
            "logout-on-shake",
            "shake-threshold-gravity",
        ] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }
    }

    #[test]
    fn test_record_round_trip_through_settings() {
        let mut s = ClientSettings::default();
        assert_eq!(s.password_record().unwrap(), None);

        s.set_password_record(&record());
        assert_eq!(s.password_record().unwrap(), Some(record()));
    }

    #[test]
    fn test_corrupt_salt_rejected() {
        let mut s = ClientSettings::default();
        s.set_password_record(&record());
        s.salt = Some(STANDARD.encode([1u8; 7]));
        assert!(matches!(s.password_record(), Err(VaultError::Settings(_))));

        s.salt = None;
        assert!(matches!(s.password_record(), Err(VaultError::Settings(_))));
    }

    #[test]
    fn test_persisted_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("client_storage.json");

        let storage = ClientStorage::open(&path).unwrap();
        assert!(!storage.has_account());
        storage.set_password_record(&record()).unwrap();
        storage.set_argon2_time_cost(3).unwrap();
        storage.update(|s| s.logout_on_shake = true).unwrap();

        let reopened = ClientStorage::open(&path).unwrap();
        assert!(reopened.has_account());
        assert_eq!(reopened.password_record().unwrap(), Some(record()));
        assert_eq!(reopened.argon2_time_cost().unwrap(), 3);
        assert!(reopened.snapshot().logout_on_shake);
    }

    #[test]
    fn test_create_record_only_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client_storage.json");
        let storage = ClientStorage::open(&path).unwrap();
        storage.create_password_record(&record()).unwrap();

        let mut second = record();
        second.salt = [9u8; SALT_LEN];
        assert!(matches!(storage.create_password_record(&second), Err(VaultError::AccountExists)));

        assert_eq!(storage.password_record().unwrap(), Some(record()));
        let reopened = ClientStorage::open(&path).unwrap();
        assert_eq!(reopened.password_record().unwrap(), Some(record()));
    }

    #[test]
    fn test_concurrent_creation_keeps_first_salt() {
        let storage = std::sync::Arc::new(ClientStorage::ephemeral());
        let racers: Vec<_> = (0..8u8)
            .map(|i| {
                let storage = std::sync::Arc::clone(&storage);
                std::thread::spawn(move || {
                    let mut rec = record();
                    rec.salt = [i; SALT_LEN];
                    storage.create_password_record(&rec).map(|_| i)
                })
            })
            .collect();

        let winners: Vec<u8> = racers
            .into_iter()
            .filter_map(|h| h.join().unwrap().ok())
            .collect();
        assert_eq!(winners.len(), 1);
        let stored = storage.password_record().unwrap().unwrap();
        assert_eq!(stored.salt, [winners[0]; SALT_LEN]);
    }

    #[test]
    fn test_sql_path_override() {
        let parsed: ClientSettings = serde_json::from_str(r#"{"sql-path": "/srv/zephra/chat.db"}"#).unwrap();
        assert_eq!(parsed.sql_path, Some(PathBuf::from("/srv/zephra/chat.db")));

        let storage = ClientStorage::ephemeral();
        storage.update(|s| s.sql_path = Some(PathBuf::from("/srv/zephra/chat.db"))).unwrap();
        assert_eq!(storage.database_path().unwrap(), PathBuf::from("/srv/zephra/chat.db"));

        let json = serde_json::to_value(ClientSettings::default()).unwrap();
        assert!(json.get("sql-path").is_none());
    }

    #[test]
    fn test_uncalibrated() {
        let storage = ClientStorage::ephemeral();
        assert!(matches!(storage.argon2_time_cost(), Err(VaultError::NotCalibrated)));
        assert!(matches!(storage.set_argon2_time_cost(0), Err(VaultError::Calibration(_))));
    }

    #[test]
    fn test_garbage_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client_storage.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(ClientStorage::open(&path), Err(VaultError::Settings(_))));
    }
}
