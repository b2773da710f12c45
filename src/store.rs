// src/store.rs
// ENCRYPTED STORE
// Contacts, messages and devices in one SQLite file. Every user-supplied
// text field is a FieldCipher blob; uuids, timestamps and flags are plain.
//
// Reads happen in two stages: raw rows are pulled from SQLite, then
// decrypted in parallel on the rayon pool.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use rayon::prelude::*;
use rusqlite::{ffi, params, Connection, OpenFlags};
use tracing::{debug, info, warn};

use crate::cipher::FieldCipher;
use crate::error::{Result, VaultError};
use crate::kdf::MasterKey;
use crate::logging::{RedactedOnion, ShortId};
use crate::models::{Contact, Device, Message};
use crate::schema::{CREATE_SCHEMA, PRAGMAS};
use crate::session::Session;
use crate::subkey::{KeyInfo, SubkeyDeriver};
use crate::validation::is_valid_onion_address;

struct ContactRow {
    contact_uuid: String,
    username: String,
    description: Option<String>,
    onion_address: String,
    last_message_timestamp: Option<f64>,
    muted: bool,
    blocked: bool,
}

impl ContactRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            contact_uuid: row.get(0)?,
            username: row.get(1)?,
            description: row.get(2)?,
            onion_address: row.get(3)?,
            last_message_timestamp: row.get(4)?,
            muted: row.get(5)?,
            blocked: row.get(6)?,
        })
    }

    fn decrypt(self, key: &MasterKey) -> Result<Contact> {
        Ok(Contact {
            username: FieldCipher::decrypt(&self.username, KeyInfo::Contact, key)?,
            description: FieldCipher::decrypt_opt(self.description.as_deref(), KeyInfo::Contact, key)?,
            onion_address: FieldCipher::decrypt(&self.onion_address, KeyInfo::Contact, key)?,
            contact_uuid: self.contact_uuid,
            last_message_timestamp: self.last_message_timestamp,
            muted: self.muted,
            blocked: self.blocked,
        })
    }
}

struct MessageRow {
    id: i64,
    contact_uuid: String,
    message: String,
    timestamp: f64,
}

impl MessageRow {
    fn decrypt(self, key: &MasterKey) -> Result<Message> {
        Ok(Message {
            message: FieldCipher::decrypt(&self.message, KeyInfo::Message, key)?,
            id: self.id,
            contact_uuid: self.contact_uuid,
            timestamp: self.timestamp,
        })
    }
}

struct DeviceRow {
    device_uuid: String,
    onion_address: String,
    name: String,
}

impl DeviceRow {
    fn decrypt(self, key: &MasterKey) -> Result<Device> {
        Ok(Device {
            onion_address: FieldCipher::decrypt(&self.onion_address, KeyInfo::Device, key)?,
            name: FieldCipher::decrypt(&self.name, KeyInfo::Device, key)?,
            device_uuid: self.device_uuid,
        })
    }
}

const CONTACT_COLUMNS: &str =
    "contact_uuid, username, description, onion_address, last_message_timestamp, muted, blocked";

/// Owns the only connection. Not `Sync`; share it through `StoreHandle`.
pub struct EncryptedStore {
    conn: Connection,
    session: Arc<Session>,
}

impl EncryptedStore {
    /// Opens or creates the database file, creating parent directories.
    pub fn open(path: impl AsRef<Path>, session: Arc<Session>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        info!(path = %path.display(), "opened store");
        Self::init(conn, session)
    }

    /// Opens the database named by the session's client storage.
    pub fn open_configured(session: Arc<Session>) -> Result<Self> {
        let path = session.storage().database_path()?;
        Self::open(path, session)
    }

    pub fn open_in_memory(session: Arc<Session>) -> Result<Self> {
        Self::init(Connection::open_in_memory()?, session)
    }

    fn init(conn: Connection, session: Arc<Session>) -> Result<Self> {
        conn.execute_batch(PRAGMAS)?;
        conn.execute_batch(CREATE_SCHEMA)?;
        Ok(Self { conn, session })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    // ----- contacts -----

    pub fn insert_contact(&self, contact: &Contact) -> Result<()> {
        check_onion(&contact.onion_address)?;

        let sealed = self.session.with_key(|key| seal_contact(contact, key))?;
        self.conn
            .execute(
                "INSERT INTO contacts (contact_uuid, username, description, onion_address, onion_index,
                                       last_message_timestamp, muted, blocked)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    contact.contact_uuid,
                    sealed.username,
                    sealed.description,
                    sealed.onion_address,
                    sealed.onion_index,
                    contact.last_message_timestamp,
                    contact.muted,
                    contact.blocked,
                ],
            )
            .map_err(|e| map_write_err(e, "contact"))?;

        debug!(
            contact = %ShortId(&contact.contact_uuid),
            onion = %RedactedOnion(&contact.onion_address),
            "contact inserted"
        );
        Ok(())
    }

    /// Ordered by last message time, oldest first. Contacts without
    /// messages sort before all others.
    pub fn retrieve_contacts(&self) -> Result<Vec<Contact>> {
        self.session.with_key(|key| {
            let rows = self.query_contact_rows(
                &format!("SELECT {} FROM contacts ORDER BY last_message_timestamp ASC", CONTACT_COLUMNS),
                [],
            )?;
            decrypt_all(rows, key, ContactRow::decrypt)
        })
    }

    /// Exact match on the decrypted onion address, via the lookup index.
    pub fn find_contact_by_onion(&self, onion_address: &str) -> Result<Option<Contact>> {
        self.session.with_key(|key| {
            let digest = SubkeyDeriver::lookup_digest(key, onion_address)?;
            let mut rows = self.query_contact_rows(
                &format!("SELECT {} FROM contacts WHERE onion_index = ?1", CONTACT_COLUMNS),
                [digest],
            )?;
            rows.pop().map(|row| row.decrypt(key)).transpose()
        })
    }

    /// Overwrites every field of the row keyed by `contact_uuid`.
    pub fn update_contact(&self, contact_uuid: &str, contact: &Contact) -> Result<()> {
        check_onion(&contact.onion_address)?;

        let sealed = self.session.with_key(|key| seal_contact(contact, key))?;
        let changed = self
            .conn
            .execute(
                "UPDATE contacts
                 SET username = ?1, description = ?2, onion_address = ?3, onion_index = ?4,
                     last_message_timestamp = ?5, muted = ?6, blocked = ?7
                 WHERE contact_uuid = ?8",
                params![
                    sealed.username,
                    sealed.description,
                    sealed.onion_address,
                    sealed.onion_index,
                    contact.last_message_timestamp,
                    contact.muted,
                    contact.blocked,
                    contact_uuid,
                ],
            )
            .map_err(|e| map_write_err(e, "contact"))?;

        if changed == 0 {
            return Err(VaultError::NotFound(format!("contact {}", ShortId(contact_uuid))));
        }
        debug!(contact = %ShortId(contact_uuid), "contact updated");
        Ok(())
    }

    /// Messages first, then the contact, in one transaction.
    pub fn delete_contact(&mut self, contact_uuid: &str) -> Result<()> {
        self.session.with_key(|_| Ok(()))?;

        let tx = self.conn.transaction()?;
        let messages = tx.execute("DELETE FROM messages WHERE contact_uuid = ?1", [contact_uuid])?;
        let contacts = tx.execute("DELETE FROM contacts WHERE contact_uuid = ?1", [contact_uuid])?;
        if contacts == 0 {
            // Dropping the transaction rolls it back.
            return Err(VaultError::NotFound(format!("contact {}", ShortId(contact_uuid))));
        }
        tx.commit()?;

        info!(contact = %ShortId(contact_uuid), messages, "contact deleted");
        Ok(())
    }

    fn query_contact_rows<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<ContactRow>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, ContactRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ----- messages -----

    /// Appends a message and sets the contact's last message time to
    /// `timestamp`, atomically.
    /// Returns the new message id.
    pub fn insert_message(&mut self, contact_uuid: &str, message: &str, timestamp: f64) -> Result<i64> {
        let blob = self
            .session
            .with_key(|key| FieldCipher::encrypt(message, KeyInfo::Message, key))?;

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO messages (contact_uuid, message, timestamp) VALUES (?1, ?2, ?3)",
            params![contact_uuid, blob, timestamp],
        )
        .map_err(|e| map_write_err(e, "contact"))?;
        let id = tx.last_insert_rowid();

        tx.execute(
            "UPDATE contacts SET last_message_timestamp = ?1 WHERE contact_uuid = ?2",
            params![timestamp, contact_uuid],
        )?;
        tx.commit()?;

        debug!(contact = %ShortId(contact_uuid), id, "message stored");
        Ok(id)
    }

    /// Oldest first. Any undecryptable message fails the whole call.
    pub fn retrieve_messages(&self, contact_uuid: &str) -> Result<Vec<Message>> {
        self.session.with_key(|key| {
            let mut stmt = self.conn.prepare(
                "SELECT id, contact_uuid, message, timestamp FROM messages
                 WHERE contact_uuid = ?1 ORDER BY timestamp ASC, id ASC",
            )?;
            let rows = stmt
                .query_map([contact_uuid], |row| {
                    Ok(MessageRow {
                        id: row.get(0)?,
                        contact_uuid: row.get(1)?,
                        message: row.get(2)?,
                        timestamp: row.get(3)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            decrypt_all(rows, key, MessageRow::decrypt)
        })
    }

    pub fn delete_message(&self, message_id: i64) -> Result<()> {
        self.session.with_key(|_| Ok(()))?;

        let deleted = self.conn.execute("DELETE FROM messages WHERE id = ?1", [message_id])?;
        if deleted == 0 {
            return Err(VaultError::NotFound(format!("message {}", message_id)));
        }
        debug!(id = message_id, "message deleted");
        Ok(())
    }

    // ----- devices -----

    pub fn insert_device(&self, device: &Device) -> Result<()> {
        check_onion(&device.onion_address)?;

        let sealed = self.session.with_key(|key| seal_device(device, key))?;
        self.conn
            .execute(
                "INSERT INTO devices (device_uuid, onion_address, onion_index, name)
                 VALUES (?1, ?2, ?3, ?4)",
                params![device.device_uuid, sealed.onion_address, sealed.onion_index, sealed.name],
            )
            .map_err(|e| map_write_err(e, "device"))?;

        debug!(device = %ShortId(&device.device_uuid), "device inserted");
        Ok(())
    }

    /// Non-critical listing: a database failure yields an empty list.
    /// Decryption failures still propagate.
    pub fn retrieve_devices(&self) -> Result<Vec<Device>> {
        self.session.with_key(|key| {
            let rows = match self.query_device_rows() {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(error = %e, "could not read devices, showing none");
                    return Ok(Vec::new());
                }
            };
            decrypt_all(rows, key, DeviceRow::decrypt)
        })
    }

    pub fn update_device(&self, device_uuid: &str, device: &Device) -> Result<()> {
        check_onion(&device.onion_address)?;

        let sealed = self.session.with_key(|key| seal_device(device, key))?;
        let changed = self
            .conn
            .execute(
                "UPDATE devices SET onion_address = ?1, onion_index = ?2, name = ?3 WHERE device_uuid = ?4",
                params![sealed.onion_address, sealed.onion_index, sealed.name, device_uuid],
            )
            .map_err(|e| map_write_err(e, "device"))?;

        if changed == 0 {
            return Err(VaultError::NotFound(format!("device {}", ShortId(device_uuid))));
        }
        debug!(device = %ShortId(device_uuid), "device updated");
        Ok(())
    }

    pub fn delete_device(&self, device_uuid: &str) -> Result<()> {
        self.session.with_key(|_| Ok(()))?;

        let deleted = self.conn.execute("DELETE FROM devices WHERE device_uuid = ?1", [device_uuid])?;
        if deleted == 0 {
            return Err(VaultError::NotFound(format!("device {}", ShortId(device_uuid))));
        }
        debug!(device = %ShortId(device_uuid), "device deleted");
        Ok(())
    }

    fn query_device_rows(&self) -> rusqlite::Result<Vec<DeviceRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT device_uuid, onion_address, name FROM devices ORDER BY rowid ASC")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(DeviceRow {
                    device_uuid: row.get(0)?,
                    onion_address: row.get(1)?,
                    name: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    #[cfg(test)]
    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }
}

struct SealedContact {
    username: String,
    description: Option<String>,
    onion_address: String,
    onion_index: String,
}

fn seal_contact(contact: &Contact, key: &MasterKey) -> Result<SealedContact> {
    Ok(SealedContact {
        username: FieldCipher::encrypt(&contact.username, KeyInfo::Contact, key)?,
        description: FieldCipher::encrypt_opt(contact.description.as_deref(), KeyInfo::Contact, key)?,
        onion_address: FieldCipher::encrypt(&contact.onion_address, KeyInfo::Contact, key)?,
        onion_index: SubkeyDeriver::lookup_digest(key, &contact.onion_address)?,
    })
}

struct SealedDevice {
    onion_address: String,
    onion_index: String,
    name: String,
}

fn seal_device(device: &Device, key: &MasterKey) -> Result<SealedDevice> {
    Ok(SealedDevice {
        onion_address: FieldCipher::encrypt(&device.onion_address, KeyInfo::Device, key)?,
        onion_index: SubkeyDeriver::lookup_digest(key, &device.onion_address)?,
        name: FieldCipher::encrypt(&device.name, KeyInfo::Device, key)?,
    })
}

/// Order-preserving parallel decryption. The first failure wins.
fn decrypt_all<R, T, F>(rows: Vec<R>, key: &MasterKey, decrypt: F) -> Result<Vec<T>>
where
    R: Send,
    T: Send,
    F: Fn(R, &MasterKey) -> Result<T> + Sync + Send,
{
    rows.into_par_iter().map(|row| decrypt(row, key)).collect()
}

fn check_onion(onion_address: &str) -> Result<()> {
    if is_valid_onion_address(onion_address) {
        Ok(())
    } else {
        Err(VaultError::InvalidOnionAddress)
    }
}

/// Primary key and unique index violations become `DuplicateKey`; a broken
/// foreign key means the referenced row does not exist.
fn map_write_err(e: rusqlite::Error, what: &str) -> VaultError {
    if let rusqlite::Error::SqliteFailure(err, _) = &e {
        match err.extended_code {
            ffi::SQLITE_CONSTRAINT_PRIMARYKEY | ffi::SQLITE_CONSTRAINT_UNIQUE => {
                return VaultError::DuplicateKey(what.to_string());
            }
            ffi::SQLITE_CONSTRAINT_FOREIGNKEY => return VaultError::NotFound(what.to_string()),
            _ => {}
        }
    }
    VaultError::Persistence(e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::session_with_account;

    const ALICE_ONION: &str = "alicealicealice2.onion";
    const BOB_ONION: &str = "bobbobbobbobbob3bobbobbobbobbob3bobbobbobbobbob3bobbobbo.onion";

    fn unlocked_store() -> EncryptedStore {
        let session = Arc::new(session_with_account());
        session.unlock("CorrectHorse1!").unwrap();
        EncryptedStore::open_in_memory(session).unwrap()
    }

    fn alice() -> Contact {
        Contact {
            contact_uuid: "c1".into(),
            username: "Alice".into(),
            description: None,
            onion_address: ALICE_ONION.into(),
            last_message_timestamp: None,
            muted: false,
            blocked: false,
        }
    }

    #[test]
    fn test_contact_round_trip() {
        let store = unlocked_store();
        store.insert_contact(&alice()).unwrap();

        let contacts = store.retrieve_contacts().unwrap();
        assert_eq!(contacts, vec![alice()]);
    }

    #[test]
    fn test_fields_are_encrypted_at_rest() {
        let mut store = unlocked_store();
        let mut contact = alice();
        contact.description = Some("met at the conference".into());
        store.insert_contact(&contact).unwrap();
        store.insert_message("c1", "hello there", 1.0).unwrap();

        let (username, description, onion): (String, Option<String>, String) = store
            .conn()
            .query_row(
                "SELECT username, description, onion_address FROM contacts WHERE contact_uuid = 'c1'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert!(!username.contains("Alice"));
        assert!(!description.unwrap().contains("conference"));
        assert!(!onion.contains("alice"));

        let body: String = store
            .conn()
            .query_row("SELECT message FROM messages", [], |r| r.get(0))
            .unwrap();
        assert!(!body.contains("hello"));
    }

    #[test]
    fn test_message_ordering_and_last_timestamp() {
        let mut store = unlocked_store();
        store.insert_contact(&alice()).unwrap();

        for (text, ts) in [("third", 3.0), ("first", 1.0), ("second", 2.0)] {
            store.insert_message("c1", text, ts).unwrap();
        }

        let messages = store.retrieve_messages("c1").unwrap();
        let order: Vec<(&str, f64)> = messages.iter().map(|m| (m.message.as_str(), m.timestamp)).collect();
        assert_eq!(order, vec![("first", 1.0), ("second", 2.0), ("third", 3.0)]);

        // Follows the latest insert, not the newest timestamp.
        let contact = store.retrieve_contacts().unwrap().remove(0);
        assert_eq!(contact.last_message_timestamp, Some(2.0));
    }

    #[test]
    fn test_contacts_ordered_by_last_message() {
        let mut store = unlocked_store();
        let mut bob = Contact::new("Bob", BOB_ONION);
        bob.contact_uuid = "c2".into();
        store.insert_contact(&alice()).unwrap();
        store.insert_contact(&bob).unwrap();

        store.insert_message("c1", "late", 20.0).unwrap();
        store.insert_message("c2", "early", 10.0).unwrap();

        let uuids: Vec<String> = store.retrieve_contacts().unwrap().into_iter().map(|c| c.contact_uuid).collect();
        assert_eq!(uuids, vec!["c2", "c1"]);
    }

    #[test]
    fn test_cascade_delete() {
        let mut store = unlocked_store();
        store.insert_contact(&alice()).unwrap();
        store.insert_message("c1", "one", 1.0).unwrap();
        store.insert_message("c1", "two", 2.0).unwrap();

        store.delete_contact("c1").unwrap();

        assert!(store.retrieve_messages("c1").unwrap().is_empty());
        assert!(store.retrieve_contacts().unwrap().is_empty());
        assert!(matches!(store.delete_contact("c1"), Err(VaultError::NotFound(_))));
    }

    #[test]
    fn test_delete_contact_rolls_back_on_failure() {
        let mut store = unlocked_store();
        store.insert_contact(&alice()).unwrap();
        store.insert_message("c1", "one", 1.0).unwrap();
        store.insert_message("c1", "two", 2.0).unwrap();

        // The message delete succeeds, then the contact delete aborts.
        store
            .conn()
            .execute_batch(
                "CREATE TRIGGER block_contact_delete BEFORE DELETE ON contacts
                 BEGIN SELECT RAISE(ABORT, 'blocked'); END;",
            )
            .unwrap();

        assert!(matches!(store.delete_contact("c1"), Err(VaultError::Persistence(_))));
        assert_eq!(store.retrieve_messages("c1").unwrap().len(), 2);
        assert_eq!(store.retrieve_contacts().unwrap().len(), 1);
    }

    #[test]
    fn test_message_for_unknown_contact() {
        let mut store = unlocked_store();
        assert!(matches!(store.insert_message("ghost", "boo", 1.0), Err(VaultError::NotFound(_))));
    }

    #[test]
    fn test_duplicate_uuid_and_onion() {
        let store = unlocked_store();
        store.insert_contact(&alice()).unwrap();

        assert!(matches!(store.insert_contact(&alice()), Err(VaultError::DuplicateKey(_))));

        let same_onion = Contact::new("Alice again", ALICE_ONION);
        assert!(matches!(store.insert_contact(&same_onion), Err(VaultError::DuplicateKey(_))));

        let same_name = Contact::new("Alice", BOB_ONION);
        store.insert_contact(&same_name).unwrap();
    }

    #[test]
    fn test_open_configured_uses_sql_path() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("custom").join("chat.db");

        let session = Arc::new(session_with_account());
        session.storage().update(|s| s.sql_path = Some(db.clone())).unwrap();
        session.unlock("CorrectHorse1!").unwrap();

        let store = EncryptedStore::open_configured(Arc::clone(&session)).unwrap();
        store.insert_contact(&alice()).unwrap();
        drop(store);

        assert!(db.exists());
        let reopened = EncryptedStore::open(&db, session).unwrap();
        assert_eq!(reopened.retrieve_contacts().unwrap(), vec![alice()]);
    }

    #[test]
    fn test_invalid_onion_rejected() {
        let store = unlocked_store();
        let bad = Contact::new("Eve", "not-an-onion.com");
        assert!(matches!(store.insert_contact(&bad), Err(VaultError::InvalidOnionAddress)));
        assert!(store.retrieve_contacts().unwrap().is_empty());
    }

    #[test]
    fn test_update_contact() {
        let store = unlocked_store();
        store.insert_contact(&alice()).unwrap();

        let mut changed = alice();
        changed.username = "Alice Liddell".into();
        changed.description = Some("down the rabbit hole".into());
        changed.muted = true;
        store.update_contact("c1", &changed).unwrap();

        assert_eq!(store.retrieve_contacts().unwrap(), vec![changed.clone()]);
        assert!(matches!(store.update_contact("nope", &changed), Err(VaultError::NotFound(_))));
    }

    #[test]
    fn test_find_contact_by_onion() {
        let store = unlocked_store();
        store.insert_contact(&alice()).unwrap();

        assert_eq!(store.find_contact_by_onion(ALICE_ONION).unwrap(), Some(alice()));
        assert_eq!(store.find_contact_by_onion(BOB_ONION).unwrap(), None);
    }

    #[test]
    fn test_device_lifecycle() {
        let store = unlocked_store();
        let mut phone = Device::new("phone", ALICE_ONION);
        store.insert_device(&phone).unwrap();
        assert_eq!(store.retrieve_devices().unwrap(), vec![phone.clone()]);

        phone.name = "old phone".into();
        store.update_device(&phone.device_uuid, &phone).unwrap();
        assert_eq!(store.retrieve_devices().unwrap()[0].name, "old phone");

        store.delete_device(&phone.device_uuid).unwrap();
        assert!(store.retrieve_devices().unwrap().is_empty());
        assert!(matches!(store.delete_device(&phone.device_uuid), Err(VaultError::NotFound(_))));
    }

    #[test]
    fn test_delete_message() {
        let mut store = unlocked_store();
        store.insert_contact(&alice()).unwrap();
        let id = store.insert_message("c1", "oops", 1.0).unwrap();
        store.insert_message("c1", "keep", 2.0).unwrap();

        store.delete_message(id).unwrap();
        let left = store.retrieve_messages("c1").unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].message, "keep");
        assert!(matches!(store.delete_message(id), Err(VaultError::NotFound(_))));
    }

    #[test]
    fn test_locked_store_refuses_everything() {
        let mut store = unlocked_store();
        store.insert_contact(&alice()).unwrap();
        store.session().lock();

        assert!(matches!(store.retrieve_contacts(), Err(VaultError::KeyNotAvailable)));
        assert!(matches!(store.insert_message("c1", "x", 1.0), Err(VaultError::KeyNotAvailable)));
        assert!(matches!(store.delete_contact("c1"), Err(VaultError::KeyNotAvailable)));
        assert!(matches!(store.retrieve_devices(), Err(VaultError::KeyNotAvailable)));
    }

    #[test]
    fn test_tampered_message_surfaces() {
        let mut store = unlocked_store();
        store.insert_contact(&alice()).unwrap();
        store.insert_message("c1", "original", 1.0).unwrap();

        let other = Arc::new(session_with_account());
        other.unlock("CorrectHorse1!").unwrap();
        // Fresh account, fresh salt: a different master key.
        let foreign = other
            .with_key(|key| FieldCipher::encrypt("forged", KeyInfo::Message, key))
            .unwrap();
        store.conn().execute("UPDATE messages SET message = ?1", [foreign]).unwrap();

        assert!(matches!(store.retrieve_messages("c1"), Err(VaultError::Authentication)));
    }

    #[test]
    fn test_devices_degrade_on_database_error() {
        let store = unlocked_store();
        store.conn().execute_batch("DROP TABLE devices").unwrap();
        assert!(store.retrieve_devices().unwrap().is_empty());
    }

    #[test]
    fn test_empty_username_kept_empty() {
        let store = unlocked_store();
        let mut contact = alice();
        contact.username = String::new();
        store.insert_contact(&contact).unwrap();
        assert_eq!(store.retrieve_contacts().unwrap()[0].username, "");
    }

    #[test]
    fn test_reopen_file_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db").join("zephra.db");
        let session = Arc::new(session_with_account());
        session.unlock("CorrectHorse1!").unwrap();

        {
            let store = EncryptedStore::open(&path, Arc::clone(&session)).unwrap();
            store.insert_contact(&alice()).unwrap();
        }

        let store = EncryptedStore::open(&path, session).unwrap();
        assert_eq!(store.retrieve_contacts().unwrap(), vec![alice()]);
    }
}
