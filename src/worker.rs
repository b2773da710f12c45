// src/worker.rs
// STORE WORKER
// One thread owns the EncryptedStore (and so the only SQLite connection).
// Callers on any thread queue closures on an unbounded mpsc channel and get
// the result back on a oneshot, either awaited or blocked on.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::error::{Result, VaultError};
use crate::models::{Contact, Device, Message};
use crate::session::Session;
use crate::store::EncryptedStore;

type Job = Box<dyn FnOnce(&mut EncryptedStore) + Send>;

/// Cheap to clone. The worker exits once every handle is dropped.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::UnboundedSender<Job>,
}

impl StoreHandle {
    /// Moves `store` onto a dedicated thread.
    pub fn spawn(store: EncryptedStore) -> Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        thread::Builder::new()
            .name("zephra-store".into())
            .spawn(move || {
                let mut store = store;
                debug!("store worker started");
                while let Some(job) = rx.blocking_recv() {
                    job(&mut store);
                }
                debug!("store worker stopped");
            })
            .map_err(|e| {
                error!(error = %e, "could not start store worker");
                VaultError::WorkerGone
            })?;

        Ok(Self { tx })
    }

    /// Opens the database on the worker thread's behalf and spawns it.
    pub fn open(path: impl Into<PathBuf>, session: Arc<Session>) -> Result<Self> {
        Self::spawn(EncryptedStore::open(path.into(), session)?)
    }

    /// Like [`open`](Self::open), at the path from the session's client storage.
    pub fn open_configured(session: Arc<Session>) -> Result<Self> {
        Self::spawn(EncryptedStore::open_configured(session)?)
    }

    fn submit<T, F>(&self, f: F) -> Result<oneshot::Receiver<Result<T>>>
    where
        T: Send + 'static,
        F: FnOnce(&mut EncryptedStore) -> Result<T> + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let job: Job = Box::new(move |store| {
            // The caller may have given up waiting; nothing to do then.
            let _ = reply.send(f(store));
        });
        self.tx.send(job).map_err(|_| VaultError::WorkerGone)?;
        Ok(rx)
    }

    /// Runs `f` on the worker and awaits its result.
    pub async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut EncryptedStore) -> Result<T> + Send + 'static,
    {
        self.submit(f)?.await.map_err(|_| VaultError::WorkerGone)?
    }

    /// Blocking form of [`run`](Self::run). Must not be called from inside an async runtime.
    pub fn run_blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut EncryptedStore) -> Result<T> + Send + 'static,
    {
        self.submit(f)?.blocking_recv().map_err(|_| VaultError::WorkerGone)?
    }

    pub async fn insert_contact(&self, contact: Contact) -> Result<()> {
        self.run(move |s| s.insert_contact(&contact)).await
    }

    pub async fn retrieve_contacts(&self) -> Result<Vec<Contact>> {
        self.run(|s| s.retrieve_contacts()).await
    }

    pub async fn find_contact_by_onion(&self, onion_address: String) -> Result<Option<Contact>> {
        self.run(move |s| s.find_contact_by_onion(&onion_address)).await
    }

    pub async fn update_contact(&self, contact_uuid: String, contact: Contact) -> Result<()> {
        self.run(move |s| s.update_contact(&contact_uuid, &contact)).await
    }

    pub async fn delete_contact(&self, contact_uuid: String) -> Result<()> {
        self.run(move |s| s.delete_contact(&contact_uuid)).await
    }

    pub async fn insert_message(&self, contact_uuid: String, message: String, timestamp: f64) -> Result<i64> {
        self.run(move |s| s.insert_message(&contact_uuid, &message, timestamp)).await
    }

    pub async fn retrieve_messages(&self, contact_uuid: String) -> Result<Vec<Message>> {
        self.run(move |s| s.retrieve_messages(&contact_uuid)).await
    }

    pub async fn delete_message(&self, message_id: i64) -> Result<()> {
        self.run(move |s| s.delete_message(message_id)).await
    }

    pub async fn insert_device(&self, device: Device) -> Result<()> {
        self.run(move |s| s.insert_device(&device)).await
    }

    pub async fn retrieve_devices(&self) -> Result<Vec<Device>> {
        self.run(|s| s.retrieve_devices()).await
    }

    pub async fn update_device(&self, device_uuid: String, device: Device) -> Result<()> {
        self.run(move |s| s.update_device(&device_uuid, &device)).await
    }

    pub async fn delete_device(&self, device_uuid: String) -> Result<()> {
        self.run(move |s| s.delete_device(&device_uuid)).await
    }
}
