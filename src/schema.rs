// src/schema.rs
// SQLite schema. Created with IF NOT EXISTS on every open; there are no migrations.
//
// Encrypted columns hold FieldCipher blobs (TEXT). `onion_index` holds the
// keyed lookup digest so uniqueness and lookup work without decrypting.

pub const PRAGMAS: &str = r#"
PRAGMA foreign_keys = ON;
PRAGMA secure_delete = ON;
PRAGMA journal_mode = DELETE;
PRAGMA temp_store = MEMORY;
"#;

pub const CREATE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS contacts (
    contact_uuid TEXT PRIMARY KEY NOT NULL,
    username TEXT NOT NULL,
    description TEXT,
    onion_address TEXT NOT NULL,
    onion_index TEXT NOT NULL UNIQUE,
    last_message_timestamp REAL,
    muted INTEGER NOT NULL DEFAULT 0,
    blocked INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    contact_uuid TEXT NOT NULL REFERENCES contacts(contact_uuid),
    message TEXT NOT NULL,
    timestamp REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_contact ON messages(contact_uuid, timestamp);

CREATE TABLE IF NOT EXISTS devices (
    device_uuid TEXT PRIMARY KEY NOT NULL,
    onion_address TEXT NOT NULL,
    onion_index TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL
);
"#;
