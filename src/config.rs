// src/config.rs
// Fixed cryptographic constants, Argon2 cost parameters and platform paths.
//
// Argon2 parameters are plain values handed to constructors. The calibrated
// time cost lives in ClientStorage, never in a process-wide global.

use std::path::PathBuf;
use std::time::Duration;

use argon2::Params;
use directories::ProjectDirs;

use crate::error::{Result, VaultError};

pub const APP_QUALIFIER: &str = "org";
pub const APP_ORG: &str = "zephra";
pub const APP_NAME: &str = "zephra";

pub const DATABASE_FILE: &str = "zephra.db";
pub const CLIENT_STORAGE_FILE: &str = "client_storage.json";

// Frame layout: [Salt 32] [IV 12] [Ciphertext *] [Tag 16]
pub const MASTER_KEY_LEN: usize = 32;
pub const SALT_LEN: usize = 32;
pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const MIN_BLOB_LEN: usize = SALT_LEN + IV_LEN + TAG_LEN;

/// IV of the retired CBC scheme. Only carried in the PasswordRecord.
pub const LEGACY_IV_LEN: usize = 16;

pub const ARGON2_MEMORY_COST: u32 = 64 * 1024; // KiB
pub const ARGON2_PARALLELISM: u32 = 2;
pub const ARGON2_HASH_LEN: usize = 32;
pub const ARGON2_TARGET_DURATION: Duration = Duration::from_secs(1);
pub const ARGON2_MAX_TIME_COST_CALIBRATION: u32 = 40;
pub const CALIBRATION_SAMPLE_PASSWORD: &str = "benchmark_password";

pub const LOGOUT_ON_LOST_FOCUS_DEFAULT: bool = false;
pub const LOGOUT_ON_SHAKE_DEFAULT: bool = false;
pub const SHAKE_THRESHOLD_GRAVITY_DEFAULT: f64 = 2.7;

/// Cost parameters shared by password hashing and master key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Argon2Config {
    pub time_cost: u32,
    pub memory_cost: u32,
    pub parallelism: u32,
    pub hash_len: usize,
}

impl Argon2Config {
    /// Production parameters around a calibrated time cost.
    pub fn with_time_cost(time_cost: u32) -> Self {
        Self {
            time_cost,
            memory_cost: ARGON2_MEMORY_COST,
            parallelism: ARGON2_PARALLELISM,
            hash_len: ARGON2_HASH_LEN,
        }
    }

    pub fn params(&self) -> Result<Params> {
        self.params_with_output(self.hash_len)
    }

    pub fn params_with_output(&self, output_len: usize) -> Result<Params> {
        Params::new(self.memory_cost, self.time_cost, self.parallelism, Some(output_len))
            .map_err(|e| VaultError::KeyDerivation(e.to_string()))
    }
}

/// Inputs of the one-time time cost calibration.
#[derive(Debug, Clone)]
pub struct CalibrationParams {
    pub target_duration: Duration,
    pub memory_cost: u32,
    pub parallelism: u32,
    pub hash_len: usize,
    pub max_time_cost: u32,
    pub sample_password: String,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            target_duration: ARGON2_TARGET_DURATION,
            memory_cost: ARGON2_MEMORY_COST,
            parallelism: ARGON2_PARALLELISM,
            hash_len: ARGON2_HASH_LEN,
            max_time_cost: ARGON2_MAX_TIME_COST_CALIBRATION,
            sample_password: CALIBRATION_SAMPLE_PASSWORD.to_string(),
        }
    }
}

impl CalibrationParams {
    /// The full config once a time cost has been chosen.
    pub fn config_for(&self, time_cost: u32) -> Argon2Config {
        Argon2Config {
            time_cost,
            memory_cost: self.memory_cost,
            parallelism: self.parallelism,
            hash_len: self.hash_len,
        }
    }
}

pub fn data_dir() -> Result<PathBuf> {
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| VaultError::Settings("cannot determine data directory".into()))?;
    Ok(dirs.data_dir().to_path_buf())
}

pub fn database_path() -> Result<PathBuf> {
    Ok(data_dir()?.join(DATABASE_FILE))
}

pub fn client_storage_path() -> Result<PathBuf> {
    Ok(data_dir()?.join(CLIENT_STORAGE_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_minimum() {
        assert_eq!(MIN_BLOB_LEN, 60);
    }

    #[test]
    fn test_production_params_are_valid() {
        let cfg = Argon2Config::with_time_cost(3);
        assert!(cfg.params().is_ok());
    }

    #[test]
    fn test_zero_time_cost_rejected() {
        let cfg = Argon2Config::with_time_cost(0);
        assert!(matches!(cfg.params(), Err(VaultError::KeyDerivation(_))));
    }
}
