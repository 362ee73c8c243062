//! Persisted local preferences as keys
//!
//! User preferences (units, last selected camera, ...) are addressed with
//! ordinary keys in the `Preferences` domain and stored as JSON in an
//! embedded sled database. Subscriptions replay the stored value and then
//! follow every write made through this transport.

use super::{ActionStream, Transport, ValueStream};
use crate::error::TransportError;
use crate::key::KeyId;
use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::path::Path;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, trace, warn};

const CHANNEL_CAPACITY: usize = 32;

/// sled-backed preference endpoint
pub struct PreferenceTransport {
    db: sled::Db,
    channels: DashMap<KeyId, broadcast::Sender<Value>>,
}

impl PreferenceTransport {
    /// Open (or create) the preference database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let db = sled::open(path)
            .with_context(|| format!("Failed to open preference database at: {}", path.display()))?;
        info!("Preference database opened at: {}", path.display());
        Ok(Self::from_db(db))
    }

    /// In-memory database that is discarded on drop
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .context("Failed to open temporary preference database")?;
        Ok(Self::from_db(db))
    }

    fn from_db(db: sled::Db) -> Self {
        Self {
            db,
            channels: DashMap::new(),
        }
    }

    /// Number of stored preferences
    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    /// Force pending writes to disk
    pub async fn flush(&self) -> Result<()> {
        self.db
            .flush_async()
            .await
            .context("Failed to flush preference database")?;
        Ok(())
    }

    fn db_key(key: &KeyId) -> Vec<u8> {
        key.to_string().into_bytes()
    }

    fn io_error(err: impl std::fmt::Display) -> TransportError {
        TransportError::new(TransportError::CODE_IO, err.to_string())
    }

    fn read(&self, key: &KeyId) -> Result<Option<Value>, TransportError> {
        match self.db.get(Self::db_key(key)) {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                warn!(%key, "Stored preference does not parse: {}", e);
                Self::io_error(e)
            }),
            Ok(None) => Ok(None),
            Err(e) => Err(Self::io_error(e)),
        }
    }
}

#[async_trait]
impl Transport for PreferenceTransport {
    fn name(&self) -> &str {
        "preferences"
    }

    fn subscribe(&self, key: &KeyId) -> Result<ValueStream, TransportError> {
        let rx = self
            .channels
            .entry(key.clone())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();
        let initial = self.read(key)?;
        debug!(%key, "Preference subscription opened");

        let updates = BroadcastStream::new(rx).filter_map(|item| item.ok());
        Ok(Box::pin(tokio_stream::iter(initial).chain(updates)))
    }

    fn unsubscribe(&self, key: &KeyId) {
        trace!(%key, "Preference subscription closed");
    }

    async fn get(&self, key: &KeyId) -> Result<Value, TransportError> {
        self.read(key)?.ok_or_else(|| TransportError::not_found(key))
    }

    async fn set(&self, key: &KeyId, value: Value) -> Result<(), TransportError> {
        let bytes = serde_json::to_vec(&value).map_err(Self::io_error)?;
        let db = self.db.clone();
        let db_key = Self::db_key(key);

        // sled writes and flushes block; keep them off the async workers
        tokio::task::spawn_blocking(move || {
            db.insert(db_key, bytes)?;
            db.flush()?;
            Ok::<_, sled::Error>(())
        })
        .await
        .map_err(Self::io_error)?
        .map_err(Self::io_error)?;

        trace!(%key, %value, "Preference stored");
        if let Some(tx) = self.channels.get(key) {
            let _ = tx.send(value);
        }
        Ok(())
    }

    fn invoke_action(&self, key: &KeyId, _arg: Value) -> Result<ActionStream, TransportError> {
        Err(TransportError::unsupported(key, "actions"))
    }
}
