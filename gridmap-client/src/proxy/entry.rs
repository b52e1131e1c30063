//! Lazily-deserialized map entries.

use std::sync::OnceLock;

use bytes::Bytes;
use gridmap_core::{Result, Serializer};
use serde::de::DeserializeOwned;

/// One entry of a remote map, deserialized on demand.
///
/// Entry pages can be large; key and value stay serialized until first
/// accessed and deserialize at most once.
pub struct NamedCacheEntry<K, V> {
    key_bytes: Bytes,
    value_bytes: Bytes,
    serializer: Serializer,
    key: OnceLock<K>,
    value: OnceLock<V>,
}

impl<K, V> std::fmt::Debug for NamedCacheEntry<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedCacheEntry")
            .field("key_len", &self.key_bytes.len())
            .field("value_len", &self.value_bytes.len())
            .finish()
    }
}

impl<K, V> NamedCacheEntry<K, V> {
    pub(crate) fn new(key_bytes: Bytes, value_bytes: Bytes, serializer: Serializer) -> Self {
        Self {
            key_bytes,
            value_bytes,
            serializer,
            key: OnceLock::new(),
            value: OnceLock::new(),
        }
    }
}

impl<K, V> NamedCacheEntry<K, V>
where
    K: DeserializeOwned,
    V: DeserializeOwned,
{
    /// Returns the entry's key, deserializing on first access.
    pub fn key(&self) -> Result<&K> {
        if let Some(key) = self.key.get() {
            return Ok(key);
        }
        let key: K = self.serializer.deserialize(&self.key_bytes)?;
        Ok(self.key.get_or_init(|| key))
    }

    /// Returns the entry's value, deserializing on first access.
    pub fn value(&self) -> Result<&V> {
        if let Some(value) = self.value.get() {
            return Ok(value);
        }
        let value: V = self.serializer.deserialize(&self.value_bytes)?;
        Ok(self.value.get_or_init(|| value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> NamedCacheEntry<String, i64> {
        NamedCacheEntry::new(
            Bytes::from_static(b"\"k1\""),
            Bytes::from_static(b"42"),
            Serializer::json(),
        )
    }

    #[test]
    fn test_lazy_access() {
        let entry = entry();
        assert_eq!(entry.key().unwrap(), "k1");
        assert_eq!(entry.value().unwrap(), &42);
        // Cached on repeat access.
        assert_eq!(entry.key().unwrap(), "k1");
    }

    #[test]
    fn test_corrupt_bytes_surface_error() {
        let entry: NamedCacheEntry<String, i64> = NamedCacheEntry::new(
            Bytes::from_static(b"\"k1\""),
            Bytes::from_static(b"{nope"),
            Serializer::json(),
        );
        assert_eq!(entry.key().unwrap(), "k1");
        assert!(entry.value().is_err());
    }
}
