// src/lib.rs
// ZEPHRA VAULT: encrypted local storage for the Zephra messenger.
//
// password --Argon2id--> master key (session only)
//          --HKDF per field--> subkey --AES-256-GCM--> base64 blob --> SQLite

pub mod cipher;
pub mod config;
pub mod error;
pub mod kdf;
pub mod logging;
pub mod models;
pub mod schema;
pub mod session;
pub mod settings;
pub mod store;
pub mod subkey;
pub mod validation;
pub mod worker;

pub use cipher::FieldCipher;
pub use config::{Argon2Config, CalibrationParams};
pub use error::{Result, VaultError};
pub use kdf::{CalibrationJob, CalibrationProgress, KeyDerivation, MasterKey};
pub use models::{Contact, Device, Message};
pub use session::{Session, SessionState};
pub use settings::{ClientSettings, ClientStorage, PasswordRecord};
pub use store::EncryptedStore;
pub use subkey::{KeyInfo, SubkeyDeriver};
pub use worker::StoreHandle;
