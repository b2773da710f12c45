// src/models.rs
// Plaintext records as seen by callers. Encryption happens inside the store.

use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct Contact {
    pub contact_uuid: String,
    pub username: String,
    pub description: Option<String>,
    pub onion_address: String,
    /// Seconds since the epoch of the newest message, if any.
    pub last_message_timestamp: Option<f64>,
    pub muted: bool,
    pub blocked: bool,
}

impl Contact {
    /// New contact with a random UUIDv4 and no message history.
    pub fn new(username: impl Into<String>, onion_address: impl Into<String>) -> Self {
        Self {
            contact_uuid: Uuid::new_v4().to_string(),
            username: username.into(),
            description: None,
            onion_address: onion_address.into(),
            last_message_timestamp: None,
            muted: false,
            blocked: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: i64,
    pub contact_uuid: String,
    pub message: String,
    pub timestamp: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub device_uuid: String,
    pub onion_address: String,
    pub name: String,
}

impl Device {
    pub fn new(name: impl Into<String>, onion_address: impl Into<String>) -> Self {
        Self {
            device_uuid: Uuid::new_v4().to_string(),
            onion_address: onion_address.into(),
            name: name.into(),
        }
    }
}
