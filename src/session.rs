// src/session.rs
// SESSION KEY LIFECYCLE
//
//   LoggedOut --unlock--> Unlocking --ok--> Unlocked --lock--> LoggedOut
//                             |
//                             +--wrong password / superseded--> LoggedOut
//
// The master key only exists inside `key`. Dropping it zeroizes it.
// Every lock bumps `epoch`; an unlock that started under an older epoch
// throws its key away instead of installing it.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, info, warn};

use crate::config::{Argon2Config, CalibrationParams, LEGACY_IV_LEN, SALT_LEN};
use crate::error::{Result, VaultError};
use crate::kdf::{calibrate_time_cost, KeyDerivation, MasterKey};
use crate::settings::{ClientStorage, PasswordRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    LoggedOut,
    Unlocking,
    Unlocked,
}

type LockListener = Arc<dyn Fn() + Send + Sync>;

pub struct Session {
    storage: Arc<ClientStorage>,
    /// Memory, parallelism and output length. The time cost comes from storage.
    params: CalibrationParams,
    key: RwLock<Option<MasterKey>>,
    epoch: AtomicU64,
    unlocking: AtomicUsize,
    listeners: Mutex<Vec<LockListener>>,
}

/// Keeps the in-flight unlock count honest on every exit path.
struct UnlockingGuard<'a>(&'a AtomicUsize);

impl<'a> UnlockingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for UnlockingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Session {
    pub fn new(storage: Arc<ClientStorage>) -> Self {
        Self::with_params(storage, CalibrationParams::default())
    }

    pub fn with_params(storage: Arc<ClientStorage>, params: CalibrationParams) -> Self {
        Self {
            storage,
            params,
            key: RwLock::new(None),
            epoch: AtomicU64::new(0),
            unlocking: AtomicUsize::new(0),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn storage(&self) -> &Arc<ClientStorage> {
        &self.storage
    }

    pub fn state(&self) -> SessionState {
        if self.key.read().is_some() {
            SessionState::Unlocked
        } else if self.unlocking.load(Ordering::SeqCst) > 0 {
            SessionState::Unlocking
        } else {
            SessionState::LoggedOut
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.key.read().is_some()
    }

    /// Current Argon2 parameters. `NotCalibrated` until a time cost is stored.
    pub fn argon2_config(&self) -> Result<Argon2Config> {
        let time_cost = self.storage.argon2_time_cost()?;
        Ok(self.params.config_for(time_cost))
    }

    /// Runs the one-time calibration if no time cost is stored yet.
    /// Blocks for up to `max_time_cost` hashes.
    pub fn ensure_calibrated(&self) -> Result<Argon2Config> {
        match self.argon2_config() {
            Ok(config) => Ok(config),
            Err(VaultError::NotCalibrated) => {
                info!("no argon2 time cost stored, calibrating");
                let time_cost = calibrate_time_cost(&self.params)?;
                self.storage.set_argon2_time_cost(time_cost)?;
                Ok(self.params.config_for(time_cost))
            }
            Err(e) => Err(e),
        }
    }

    /// Persists a new PasswordRecord. Does not unlock.
    pub fn create_account(&self, password: &str, confirmation: &str) -> Result<()> {
        if password != confirmation {
            return Err(VaultError::PasswordMismatch);
        }
        if password.is_empty() {
            return Err(VaultError::EmptyInput("password"));
        }
        if self.storage.has_account() {
            return Err(VaultError::AccountExists);
        }

        let kdf = KeyDerivation::new(self.argon2_config()?);
        let hash = kdf.hash_password(password)?;

        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let mut legacy_iv = [0u8; LEGACY_IV_LEN];
        OsRng.fill_bytes(&mut legacy_iv);

        // Re-checked under the storage write lock; a concurrent creation wins once.
        self.storage
            .create_password_record(&PasswordRecord { hash, salt, legacy_iv })?;
        info!("account created");
        Ok(())
    }

    /// A missing account and a bad password both return `WrongPassword`.
    pub fn unlock(&self, password: &str) -> Result<()> {
        let started = self.epoch.load(Ordering::SeqCst);
        let _unlocking = UnlockingGuard::enter(&self.unlocking);

        let record = match self.storage.password_record()? {
            Some(record) => record,
            None => {
                warn!("unlock attempted without an account");
                return Err(VaultError::WrongPassword);
            }
        };

        let kdf = KeyDerivation::new(self.argon2_config()?);
        if !kdf.verify_password(&record.hash, password) {
            warn!("unlock failed");
            return Err(VaultError::WrongPassword);
        }

        let key = kdf.derive_key(password, &record.salt)?;
        self.install_key(key, started)
    }

    fn install_key(&self, key: MasterKey, started: u64) -> Result<()> {
        let mut slot = self.key.write();
        if self.epoch.load(Ordering::SeqCst) != started {
            debug!("lock arrived during unlock, discarding derived key");
            return Err(VaultError::UnlockSuperseded);
        }
        *slot = Some(key);
        info!("session unlocked");
        Ok(())
    }

    /// Idempotent. Listeners run only when a key was actually dropped.
    pub fn lock(&self) {
        let dropped = {
            let mut slot = self.key.write();
            self.epoch.fetch_add(1, Ordering::SeqCst);
            slot.take().is_some()
        };

        if !dropped {
            return;
        }
        info!("session locked");

        let listeners: Vec<LockListener> = self.listeners.lock().clone();
        for listener in listeners {
            listener();
        }
    }

    /// Called on every lock, e.g. to clear caches or return to the unlock screen.
    pub fn on_lock<F>(&self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.listeners.lock().push(Arc::new(listener));
    }

    pub fn on_focus_changed(&self, focused: bool) {
        if focused || !self.storage.snapshot().logout_on_lost_focus {
            return;
        }
        debug!("focus lost, locking");
        self.lock();
    }

    /// `gravity` is acceleration magnitude in units of g.
    pub fn on_shake(&self, gravity: f64) {
        let settings = self.storage.snapshot();
        if !settings.logout_on_shake || gravity < settings.shake_threshold_gravity {
            return;
        }
        debug!(gravity, "shake detected, locking");
        self.lock();
    }

    /// Scoped access to the master key. `f` must not call `lock()`.
    pub fn with_key<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&MasterKey) -> Result<R>,
    {
        let slot = self.key.read();
        match slot.as_ref() {
            Some(key) => f(key),
            None => Err(VaultError::KeyNotAvailable),
        }
    }
}
