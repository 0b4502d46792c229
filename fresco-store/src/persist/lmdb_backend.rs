//! LMDB persister.
//!
//! Uses heed to keep cache lines in a single memory-mapped database.
//!
//! # Layout
//!
//! - Key: [`RowKey::encode`], i.e. `[store_id][0xFF][key]`, so one store's
//!   rows share a byte prefix. When that exceeds LMDB's 511-byte key limit
//!   the key part is replaced by `[0xFF][sha256(key)]`.
//! - Value: `[fetched_at_millis: i64 LE][flags: u8]`, then for digest keys
//!   `[key_len: u32 LE][key utf8]`, then `[payload utf8]`.
//!
//! Transactions are opened and committed inside synchronous helpers and are
//! never alive across an await point.

use std::path::Path;

use async_trait::async_trait;
use fresco_core::{FrescoError, FrescoResult, StorageError};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;

use super::{CachePersister, ChangeFeed, ChangeKind, ChangeNotice, PersistedRow, RowKey};

/// Fixed header before the payload: 8 bytes timestamp, 1 byte flags.
const HEADER_LEN: usize = 9;

/// Largest key LMDB accepts with its default page size.
const MAX_KEY_LEN: usize = 511;

const FLAG_STALE: u8 = 0x01;
const FLAG_EMBEDDED_KEY: u8 = 0x02;

/// Follows the store separator in digest keys. Never starts a UTF-8 key.
const DIGEST_MARKER: u8 = 0xFF;

/// Error type for LMDB persister operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// A stored value did not match the row layout.
    #[error("Corrupt row {row}: {reason}")]
    CorruptRow { row: String, reason: String },

    /// The store_id alone leaves no room for a digest key.
    #[error("Store id too long for LMDB keys: {store_id_len} bytes")]
    StoreIdTooLong { store_id_len: usize },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for FrescoError {
    fn from(e: LmdbCacheError) -> Self {
        match e {
            LmdbCacheError::CorruptRow { .. } => StorageError::Deserialization {
                reason: e.to_string(),
            }
            .into(),
            other => StorageError::Backend {
                backend: "lmdb",
                reason: other.to_string(),
            }
            .into(),
        }
    }
}

fn txn_err(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

/// Map size in bytes for a limit given in megabytes.
fn map_size_bytes(max_size_mb: usize) -> Result<usize, LmdbCacheError> {
    max_size_mb.checked_mul(1024 * 1024).ok_or_else(|| {
        LmdbCacheError::EnvOpen(format!("map size of {} MB overflows", max_size_mb))
    })
}

/// The LMDB key for `row_key` and whether it is a digest key.
fn storage_key(row_key: &RowKey) -> Result<(Vec<u8>, bool), LmdbCacheError> {
    let plain = row_key.encode();
    if plain.len() <= MAX_KEY_LEN {
        return Ok((plain, false));
    }

    let mut key = RowKey::store_prefix(row_key.store_id());
    if key.len() + 1 + 32 > MAX_KEY_LEN {
        return Err(LmdbCacheError::StoreIdTooLong {
            store_id_len: row_key.store_id().len(),
        });
    }
    key.push(DIGEST_MARKER);
    key.extend_from_slice(&Sha256::digest(row_key.key().as_bytes()));
    Ok((key, true))
}

fn encode_value(
    fetched_at_millis: i64,
    stale: bool,
    embedded_key: Option<&str>,
    payload: &str,
) -> Vec<u8> {
    let embedded_len = embedded_key.map_or(0, |k| 4 + k.len());
    let mut bytes = Vec::with_capacity(HEADER_LEN + embedded_len + payload.len());
    bytes.extend_from_slice(&fetched_at_millis.to_le_bytes());

    let mut flags = 0;
    if stale {
        flags |= FLAG_STALE;
    }
    if embedded_key.is_some() {
        flags |= FLAG_EMBEDDED_KEY;
    }
    bytes.push(flags);

    if let Some(key) = embedded_key {
        bytes.extend_from_slice(&(key.len() as u32).to_le_bytes());
        bytes.extend_from_slice(key.as_bytes());
    }
    bytes.extend_from_slice(payload.as_bytes());
    bytes
}

/// A value split into its parts, borrowing from the stored bytes.
#[derive(Debug)]
struct StoredValue<'a> {
    fetched_at_millis: i64,
    stale: bool,
    embedded_key: Option<&'a str>,
    payload: &'a str,
}

fn decode_value<'a>(
    row: &dyn std::fmt::Display,
    bytes: &'a [u8],
) -> Result<StoredValue<'a>, LmdbCacheError> {
    let corrupt = |reason: &str| LmdbCacheError::CorruptRow {
        row: row.to_string(),
        reason: reason.to_string(),
    };

    if bytes.len() < HEADER_LEN {
        return Err(corrupt("value shorter than header"));
    }
    let timestamp: [u8; 8] = bytes[0..8]
        .try_into()
        .map_err(|_| corrupt("invalid timestamp"))?;
    let flags = bytes[8];

    let mut rest = &bytes[HEADER_LEN..];
    let embedded_key = if flags & FLAG_EMBEDDED_KEY != 0 {
        let len: [u8; 4] = rest
            .get(0..4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| corrupt("missing key length"))?;
        let len = u32::from_le_bytes(len) as usize;
        let key = rest
            .get(4..4 + len)
            .ok_or_else(|| corrupt("key runs past end of value"))?;
        let key = std::str::from_utf8(key).map_err(|_| corrupt("key is not UTF-8"))?;
        rest = &rest[4 + len..];
        Some(key)
    } else {
        None
    };
    let payload = std::str::from_utf8(rest).map_err(|_| corrupt("payload is not UTF-8"))?;

    Ok(StoredValue {
        fetched_at_millis: i64::from_le_bytes(timestamp),
        stale: flags & FLAG_STALE != 0,
        embedded_key,
        payload,
    })
}

/// Recover the row address from a stored key and its value.
fn row_key_of(stored_key: &[u8], value: &[u8]) -> Option<RowKey> {
    let split = stored_key.iter().position(|b| *b == 0xFF)?;
    if stored_key.get(split + 1) != Some(&DIGEST_MARKER) {
        return RowKey::decode(stored_key);
    }
    let store_id = std::str::from_utf8(&stored_key[..split]).ok()?;
    let decoded = decode_value(&store_id, value).ok()?;
    decoded.embedded_key.map(|key| RowKey::new(store_id, key))
}

/// [`CachePersister`] backed by an LMDB environment.
pub struct LmdbPersister {
    env: Env,
    db: Database<Bytes, Bytes>,
    feed: ChangeFeed,
}

impl std::fmt::Debug for LmdbPersister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbPersister")
            .field("path", &self.env.path())
            .finish_non_exhaustive()
    }
}

impl LmdbPersister {
    /// Open (or create) an environment in directory `path`.
    ///
    /// `max_size_mb` bounds the memory map; writes beyond it fail.
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        Self::open_with_change_buffer(path, max_size_mb, ChangeFeed::DEFAULT_CAPACITY)
    }

    /// Open with a custom change-feed buffer size.
    pub fn open_with_change_buffer<P: AsRef<Path>>(
        path: P,
        max_size_mb: usize,
        capacity: usize,
    ) -> Result<Self, LmdbCacheError> {
        let map_size = map_size_bytes(max_size_mb)?;
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_err)?;

        Ok(Self {
            env,
            db,
            feed: ChangeFeed::new(capacity),
        })
    }

    fn read_sync(&self, row_key: &RowKey) -> Result<Option<PersistedRow>, LmdbCacheError> {
        let (key, _) = storage_key(row_key)?;
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let Some(bytes) = self.db.get(&rtxn, &key).map_err(txn_err)? else {
            return Ok(None);
        };
        let value = decode_value(row_key, bytes)?;
        if value.embedded_key.is_some_and(|stored| stored != row_key.key()) {
            return Ok(None);
        }
        Ok(Some(PersistedRow {
            store_id: row_key.store_id().to_string(),
            key: row_key.key().to_string(),
            payload: value.payload.to_string(),
            fetched_at_millis: value.fetched_at_millis,
            stale: value.stale,
        }))
    }

    fn write_sync(&self, row: &PersistedRow) -> Result<(), LmdbCacheError> {
        let (key, digest) = storage_key(&row.row_key())?;
        let embedded = digest.then_some(row.key.as_str());
        let value = encode_value(row.fetched_at_millis, false, embedded, &row.payload);
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.db.put(&mut wtxn, &key, &value).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)
    }

    /// Set the stale flag of every row stored under one of `keys`.
    ///
    /// Returns the addresses of the rows that existed and were flagged.
    fn flag_stale_sync(&self, keys: Vec<Vec<u8>>) -> Result<Vec<RowKey>, LmdbCacheError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let mut flagged = Vec::with_capacity(keys.len());
        for key in keys {
            let existing = self.db.get(&wtxn, &key).map_err(txn_err)?.map(<[u8]>::to_vec);
            let Some(mut value) = existing.filter(|v| v.len() >= HEADER_LEN) else {
                continue;
            };
            let Some(row_key) = row_key_of(&key, &value) else {
                continue;
            };
            value[8] |= FLAG_STALE;
            self.db.put(&mut wtxn, &key, &value).map_err(txn_err)?;
            flagged.push(row_key);
        }
        wtxn.commit().map_err(txn_err)?;
        Ok(flagged)
    }

    fn delete_sync(&self, keys: Vec<Vec<u8>>) -> Result<Vec<RowKey>, LmdbCacheError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let mut deleted = Vec::with_capacity(keys.len());
        for key in keys {
            let row_key = match self.db.get(&wtxn, &key).map_err(txn_err)? {
                Some(value) => row_key_of(&key, value),
                None => continue,
            };
            if self.db.delete(&mut wtxn, &key).map_err(txn_err)? {
                deleted.extend(row_key);
            }
        }
        wtxn.commit().map_err(txn_err)?;
        Ok(deleted)
    }

    /// Iterate over keys matching a prefix and collect them.
    fn collect_keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, LmdbCacheError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let mut keys = Vec::new();
        for result in self.db.iter(&rtxn).map_err(txn_err)? {
            let (key, _) = result.map_err(txn_err)?;
            if key.starts_with(prefix) {
                keys.push(key.to_vec());
            }
        }
        Ok(keys)
    }

    fn publish_all(&self, rows: &[RowKey], kind: ChangeKind) {
        for row_key in rows {
            self.feed
                .publish(ChangeNotice::new(row_key.store_id(), row_key.key(), kind));
        }
    }

    /// Number of rows across all stores.
    pub fn row_count(&self) -> FrescoResult<u64> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let len = self.db.len(&rtxn).map_err(txn_err)?;
        Ok(len)
    }
}

#[async_trait]
impl CachePersister for LmdbPersister {
    async fn read(&self, store_id: &str, key: &str) -> FrescoResult<Option<PersistedRow>> {
        Ok(self.read_sync(&RowKey::new(store_id, key))?)
    }

    async fn write(&self, row: PersistedRow) -> FrescoResult<()> {
        self.write_sync(&row)?;
        self.feed
            .publish(ChangeNotice::new(row.store_id, row.key, ChangeKind::Written));
        Ok(())
    }

    async fn mark_stale(&self, store_id: &str, key: &str) -> FrescoResult<bool> {
        let (encoded, _) = storage_key(&RowKey::new(store_id, key))?;
        let flagged = self.flag_stale_sync(vec![encoded])?;
        self.publish_all(&flagged, ChangeKind::MarkedStale);
        Ok(!flagged.is_empty())
    }

    async fn mark_store_stale(&self, store_id: &str) -> FrescoResult<u64> {
        let keys = self.collect_keys_with_prefix(&RowKey::store_prefix(store_id))?;
        let flagged = self.flag_stale_sync(keys)?;
        self.publish_all(&flagged, ChangeKind::MarkedStale);
        Ok(flagged.len() as u64)
    }

    async fn remove(&self, store_id: &str, key: &str) -> FrescoResult<bool> {
        let (encoded, _) = storage_key(&RowKey::new(store_id, key))?;
        let deleted = self.delete_sync(vec![encoded])?;
        self.publish_all(&deleted, ChangeKind::Removed);
        Ok(!deleted.is_empty())
    }

    async fn clear_store(&self, store_id: &str) -> FrescoResult<u64> {
        let keys = self.collect_keys_with_prefix(&RowKey::store_prefix(store_id))?;
        let deleted = self.delete_sync(keys)?;
        self.publish_all(&deleted, ChangeKind::Removed);
        Ok(deleted.len() as u64)
    }

    fn changes(&self) -> broadcast::Receiver<ChangeNotice> {
        self.feed.subscribe()
    }

    fn backend_name(&self) -> &'static str {
        "lmdb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn open() -> (TempDir, LmdbPersister) {
        let dir = TempDir::new().unwrap();
        let persister = LmdbPersister::open(dir.path(), 16).unwrap();
        (dir, persister)
    }

    #[test]
    fn test_value_layout() {
        let bytes = encode_value(1_234, true, None, "{}");
        assert_eq!(bytes.len(), HEADER_LEN + 2);
        assert_eq!(&bytes[0..8], &1_234i64.to_le_bytes());
        assert_eq!(bytes[8], FLAG_STALE);

        let value = decode_value(&RowKey::new("s", "k"), &bytes).unwrap();
        assert_eq!(value.fetched_at_millis, 1_234);
        assert!(value.stale);
        assert!(value.embedded_key.is_none());
        assert_eq!(value.payload, "{}");
    }

    #[test]
    fn test_value_layout_with_embedded_key() {
        let bytes = encode_value(5, false, Some("abc"), "[1]");
        assert_eq!(bytes[8], FLAG_EMBEDDED_KEY);
        assert_eq!(&bytes[HEADER_LEN..HEADER_LEN + 4], &3u32.to_le_bytes());

        let value = decode_value(&"s/abc", &bytes).unwrap();
        assert_eq!(value.embedded_key, Some("abc"));
        assert_eq!(value.payload, "[1]");

        let truncated = &bytes[..HEADER_LEN + 5];
        assert!(matches!(
            decode_value(&"s/abc", truncated),
            Err(LmdbCacheError::CorruptRow { .. })
        ));
    }

    #[test]
    fn test_storage_key_switches_to_digest_past_limit() {
        let short = RowKey::new("s", "k");
        assert_eq!(storage_key(&short).unwrap(), (short.encode(), false));

        let long = RowKey::new("s", "x".repeat(600));
        let (key, digest) = storage_key(&long).unwrap();
        assert!(digest);
        assert!(key.len() <= MAX_KEY_LEN);
        assert!(key.starts_with(&RowKey::store_prefix("s")));
        assert_eq!(key[2], DIGEST_MARKER);
        assert_ne!(key, storage_key(&RowKey::new("s", "y".repeat(600))).unwrap().0);

        let huge_store = RowKey::new("s".repeat(500), "k".repeat(20));
        assert!(matches!(
            storage_key(&huge_store),
            Err(LmdbCacheError::StoreIdTooLong { store_id_len: 500 })
        ));
    }

    #[test]
    fn test_map_size_overflow_is_an_error() {
        assert_eq!(map_size_bytes(16).unwrap(), 16 * 1024 * 1024);

        let dir = TempDir::new().unwrap();
        let err = LmdbPersister::open(dir.path(), usize::MAX / 1024).unwrap_err();
        assert!(matches!(err, LmdbCacheError::EnvOpen(_)));
        let err: FrescoError = err.into();
        assert!(matches!(
            err,
            FrescoError::Storage(StorageError::Backend { backend: "lmdb", .. })
        ));
    }

    #[test]
    fn test_short_value_is_corrupt() {
        let err = decode_value(&RowKey::new("s", "k"), &[0u8; 4]).unwrap_err();
        assert!(matches!(err, LmdbCacheError::CorruptRow { .. }));
        let err: FrescoError = err.into();
        assert!(matches!(
            err,
            FrescoError::Storage(StorageError::Deserialization { .. })
        ));
    }

    #[tokio::test]
    async fn test_write_read_and_mark_stale() {
        let (_dir, persister) = open();
        let fetched_at = Utc::now();
        persister
            .write(PersistedRow::new("s", "k", "7", fetched_at))
            .await
            .unwrap();

        let read = persister.read("s", "k").await.unwrap().unwrap();
        assert_eq!(read.payload, "7");
        assert_eq!(read.fetched_at_millis, fetched_at.timestamp_millis());
        assert!(!read.stale);

        assert!(persister.mark_stale("s", "k").await.unwrap());
        assert!(persister.read("s", "k").await.unwrap().unwrap().stale);
        assert!(!persister.mark_stale("s", "missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_store_prefix_isolation() {
        let (_dir, persister) = open();
        let now = Utc::now();
        persister.write(PersistedRow::new("a", "1", "1", now)).await.unwrap();
        persister.write(PersistedRow::new("a", "2", "2", now)).await.unwrap();
        persister.write(PersistedRow::new("ab", "1", "3", now)).await.unwrap();

        assert_eq!(persister.mark_store_stale("a").await.unwrap(), 2);
        assert!(!persister.read("ab", "1").await.unwrap().unwrap().stale);

        assert_eq!(persister.clear_store("a").await.unwrap(), 2);
        assert!(persister.read("a", "1").await.unwrap().is_none());
        assert_eq!(persister.row_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_key_past_lmdb_limit_round_trips() {
        let (_dir, persister) = open();
        let mut rx = persister.changes();
        let long = format!("\"{}\"", "k".repeat(600));
        let now = Utc::now();
        persister
            .write(PersistedRow::new("s", long.clone(), "1", now))
            .await
            .unwrap();
        persister.write(PersistedRow::new("s", "short", "2", now)).await.unwrap();

        let read = persister.read("s", &long).await.unwrap().unwrap();
        assert_eq!(read.key, long);
        assert_eq!(read.payload, "1");
        assert!(persister.read("s", &format!("{}x", long)).await.unwrap().is_none());

        assert!(persister.mark_stale("s", &long).await.unwrap());
        assert!(persister.read("s", &long).await.unwrap().unwrap().stale);

        let written = rx.recv().await.unwrap();
        assert!(written.concerns("s", &long));
        rx.recv().await.unwrap();
        let stale = rx.recv().await.unwrap();
        assert_eq!(stale.kind, ChangeKind::MarkedStale);
        assert!(stale.concerns("s", &long));

        assert_eq!(persister.clear_store("s").await.unwrap(), 2);
        let mut removed = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        removed.retain(|notice| notice.kind == ChangeKind::Removed);
        assert_eq!(removed.len(), 2);
        assert!(removed.iter().any(|notice| notice.concerns("s", &long)));
        assert_eq!(persister.row_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_remove_publishes_once() {
        let (_dir, persister) = open();
        let mut rx = persister.changes();
        persister
            .write(PersistedRow::new("s", "k", "1", Utc::now()))
            .await
            .unwrap();

        assert!(persister.remove("s", "k").await.unwrap());
        assert!(!persister.remove("s", "k").await.unwrap());

        assert_eq!(rx.recv().await.unwrap().kind, ChangeKind::Written);
        let removed = rx.recv().await.unwrap();
        assert_eq!(removed.kind, ChangeKind::Removed);
        assert!(removed.concerns("s", "k"));
        assert!(rx.try_recv().is_err());
    }
}
