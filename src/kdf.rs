// src/kdf.rs
// KEY DERIVATION
// Password -> Argon2id. Three jobs share one set of cost parameters:
// - PHC hash string for login verification (embeds its own salt).
// - Raw 32-byte master key from (password, key-derivation salt).
// - One-time calibration of the time cost against a wall-clock target.

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use zeroize::ZeroizeOnDrop;

use crate::config::{Argon2Config, CalibrationParams, MASTER_KEY_LEN, SALT_LEN};
use crate::error::{Result, VaultError};
use crate::validation::is_valid_argon2_hash;

/// Ceiling on stored hash costs relative to the configured ones.
const MAX_COST_FACTOR: u32 = 4;

/// Session master key. Zeroized on drop, never serialized, not `Clone`.
#[derive(ZeroizeOnDrop)]
pub struct MasterKey([u8; MASTER_KEY_LEN]);

impl MasterKey {
    pub fn from_bytes(bytes: [u8; MASTER_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn random() -> Self {
        let mut bytes = [0u8; MASTER_KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; MASTER_KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MasterKey([REDACTED])")
    }
}

/// Argon2id front end bound to one parameter set.
#[derive(Debug, Clone)]
pub struct KeyDerivation {
    config: Argon2Config,
}

impl KeyDerivation {
    pub fn new(config: Argon2Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Argon2Config {
        &self.config
    }

    fn argon2(&self, output_len: usize) -> Result<Argon2<'static>> {
        let params = self.config.params_with_output(output_len)?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }

    /// Self-describing PHC string: `$argon2id$v=19$m=..,t=..,p=..$salt$hash`.
    pub fn hash_password(&self, password: &str) -> Result<String> {
        if password.is_empty() {
            return Err(VaultError::EmptyInput("password"));
        }

        let mut salt_bytes = [0u8; 16];
        OsRng.fill_bytes(&mut salt_bytes);
        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|e| VaultError::KeyDerivation(e.to_string()))?;

        let hash = self
            .argon2(self.config.hash_len)?
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| VaultError::KeyDerivation(e.to_string()))?;

        Ok(hash.to_string())
    }

    /// Fails closed: malformed, truncated or corrupted hashes yield `false`.
    /// Cost parameters are taken from the hash string itself.
    pub fn verify_password(&self, hash: &str, password: &str) -> bool {
        if !is_valid_argon2_hash(hash) {
            warn!("password hash format invalid, refusing to verify");
            return false;
        }

        let parsed = match PasswordHash::new(hash) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(error = %e, "password hash did not parse");
                return false;
            }
        };

        match Params::try_from(&parsed) {
            Ok(params) if self.within_cost_limits(&params) => {}
            Ok(_) => {
                warn!("password hash cost exceeds configured limits, refusing to verify");
                return false;
            }
            Err(e) => {
                debug!(error = %e, "password hash parameters rejected");
                return false;
            }
        }

        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }

    /// A stored hash may not ask for more than `MAX_COST_FACTOR` times the
    /// configured memory, passes or lanes.
    fn within_cost_limits(&self, params: &Params) -> bool {
        let limit = |configured: u32| configured.saturating_mul(MAX_COST_FACTOR);
        params.m_cost() <= limit(self.config.memory_cost)
            && params.t_cost() <= limit(self.config.time_cost)
            && params.p_cost() <= limit(self.config.parallelism)
    }

    /// Deterministic raw derivation. The salt is the PasswordRecord's
    /// key-derivation salt, not the one inside the hash string.
    pub fn derive_key(&self, password: &str, salt: &[u8; SALT_LEN]) -> Result<MasterKey> {
        if password.is_empty() {
            return Err(VaultError::EmptyInput("password"));
        }

        let mut key_out = [0u8; MASTER_KEY_LEN];
        self.argon2(MASTER_KEY_LEN)?
            .hash_password_into(password.as_bytes(), salt, &mut key_out)
            .map_err(|e| VaultError::KeyDerivation(e.to_string()))?;

        Ok(MasterKey(key_out))
    }
}

/// One measured step of a calibration run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationProgress {
    pub time_cost: u32,
    pub max_time_cost: u32,
    pub duration: Duration,
}

/// Smallest time cost in `1..=max_time_cost` whose hash takes at least the
/// target duration, or `max_time_cost` if none does.
pub fn calibrate_time_cost(params: &CalibrationParams) -> Result<u32> {
    calibrate_time_cost_with(params, |_| {})
}

pub fn calibrate_time_cost_with<P>(params: &CalibrationParams, on_progress: P) -> Result<u32>
where
    P: FnMut(&CalibrationProgress),
{
    scan_time_cost(
        params.target_duration,
        params.max_time_cost,
        |time_cost| {
            let hasher = KeyDerivation::new(params.config_for(time_cost));
            let start = Instant::now();
            hasher.hash_password(&params.sample_password)?;
            Ok(start.elapsed())
        },
        on_progress,
    )
}

/// Linear scan over time costs with an injectable measurement.
pub(crate) fn scan_time_cost<M, P>(
    target: Duration,
    max_time_cost: u32,
    mut measure: M,
    mut on_progress: P,
) -> Result<u32>
where
    M: FnMut(u32) -> Result<Duration>,
    P: FnMut(&CalibrationProgress),
{
    if max_time_cost == 0 {
        return Err(VaultError::Calibration("max time cost must be at least 1".into()));
    }

    for time_cost in 1..=max_time_cost {
        debug!(time_cost, "testing argon2 time cost");

        let duration = measure(time_cost).map_err(|e| VaultError::Calibration(e.to_string()))?;
        on_progress(&CalibrationProgress { time_cost, max_time_cost, duration });

        if duration >= target {
            info!(time_cost, elapsed_ms = duration.as_millis() as u64, "chose argon2 time cost");
            return Ok(time_cost);
        }
    }

    warn!(
        max_time_cost,
        target_ms = target.as_millis() as u64,
        "max time cost reached below target duration"
    );
    Ok(max_time_cost)
}

/// Calibration running on its own thread. Not cancellable.
pub struct CalibrationJob {
    rx: oneshot::Receiver<Result<u32>>,
}

impl CalibrationJob {
    pub fn spawn<P>(params: CalibrationParams, on_progress: P) -> Result<Self>
    where
        P: FnMut(&CalibrationProgress) + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        thread::Builder::new()
            .name("argon2-calibration".into())
            .spawn(move || {
                let result = calibrate_time_cost_with(&params, on_progress);
                if tx.send(result).is_err() {
                    debug!("calibration result dropped, nobody waiting");
                }
            })
            .map_err(|e| VaultError::Calibration(e.to_string()))?;

        Ok(Self { rx })
    }

    pub async fn wait(self) -> Result<u32> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(VaultError::Calibration("worker exited without a result".into())),
        }
    }

    /// Must not be called from inside an async runtime.
    pub fn wait_blocking(self) -> Result<u32> {
        match self.rx.blocking_recv() {
            Ok(result) => result,
            Err(_) => Err(VaultError::Calibration("worker exited without a result".into())),
        }
    }
}
