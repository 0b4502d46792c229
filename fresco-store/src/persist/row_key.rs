//! Composite `(store_id, key)` addressing for persisted rows.
//!
//! Every store shares one logical table. Rows are namespaced by the store's
//! identifier, so two stores can use the same serialized key without
//! colliding.

/// Separator byte between store_id and key in the binary encoding.
///
/// 0xFF never occurs in UTF-8, so it cannot appear inside a store_id.
const SEPARATOR: u8 = 0xFF;

/// Address of one persisted cache line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey {
    store_id: String,
    key: String,
}

impl RowKey {
    pub fn new(store_id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            store_id: store_id.into(),
            key: key.into(),
        }
    }

    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Encode for ordered byte-keyed backends.
    ///
    /// Format: `[store_id utf8][0xFF][key utf8]`. Rows of one store are
    /// contiguous and share [`RowKey::store_prefix`].
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Self::store_prefix(&self.store_id);
        bytes.extend_from_slice(self.key.as_bytes());
        bytes
    }

    /// Decode a key produced by [`RowKey::encode`].
    ///
    /// Returns `None` when the separator is missing or either half is not
    /// valid UTF-8.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let split = bytes.iter().position(|b| *b == SEPARATOR)?;
        let store_id = std::str::from_utf8(&bytes[..split]).ok()?;
        let key = std::str::from_utf8(&bytes[split + 1..]).ok()?;
        Some(Self::new(store_id, key))
    }

    /// Byte prefix shared by every row of `store_id`.
    pub fn store_prefix(store_id: &str) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(store_id.len() + 1);
        bytes.extend_from_slice(store_id.as_bytes());
        bytes.push(SEPARATOR);
        bytes
    }
}

impl std::fmt::Display for RowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.store_id, self.key)
    }
}
