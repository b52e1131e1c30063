//! Asynchronous set views over a remote map.
//!
//! The views are stateless facades: `size` and `clear` delegate to the map,
//! deletion maps onto the matching remove RPC, and iteration creates a fresh
//! page advancer per call. There is no synchronous enumeration surface; the
//! operations the remote contract cannot honor fail with
//! `UnsupportedOperation`.

use gridmap_core::{GridError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::paging::{EntryPageSource, KeyPageSource, PageAdvancer, ValuePageSource};
use crate::proxy::named_map::NamedMap;

/// The key view of a remote map.
pub struct RemoteKeySet<K, V> {
    map: NamedMap<K, V>,
}

impl<K, V> Clone for RemoteKeySet<K, V> {
    fn clone(&self) -> Self {
        Self {
            map: self.map.clone(),
        }
    }
}

impl<K, V> std::fmt::Debug for RemoteKeySet<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteKeySet").field("map", &self.map).finish()
    }
}

impl<K, V> RemoteKeySet<K, V>
where
    K: Serialize + DeserializeOwned + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub(crate) fn new(map: NamedMap<K, V>) -> Self {
        Self { map }
    }

    /// Returns the number of keys in the map.
    pub async fn size(&self) -> Result<usize> {
        self.map.size().await
    }

    /// Removes every entry from the backing map; all views observe it.
    pub async fn clear(&self) -> Result<()> {
        self.map.clear().await
    }

    /// Removes `key` from the backing map, reporting whether the server
    /// held a prior value.
    pub async fn delete(&self, key: &K) -> Result<bool> {
        self.map.remove_reporting(key).await
    }

    /// Adding through a view is not supported; put through the map.
    pub async fn add(&self, _key: &K) -> Result<bool> {
        Err(GridError::UnsupportedOperation(
            "key view does not support add".to_string(),
        ))
    }

    /// Starts a fresh asynchronous iteration over the keys.
    pub fn iter(&self) -> Result<PageAdvancer<KeyPageSource<K>>> {
        self.map.ensure_iterable()?;
        Ok(self.map.key_advancer())
    }
}

/// The entry view of a remote map.
pub struct RemoteEntrySet<K, V> {
    map: NamedMap<K, V>,
}

impl<K, V> Clone for RemoteEntrySet<K, V> {
    fn clone(&self) -> Self {
        Self {
            map: self.map.clone(),
        }
    }
}

impl<K, V> std::fmt::Debug for RemoteEntrySet<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteEntrySet").field("map", &self.map).finish()
    }
}

impl<K, V> RemoteEntrySet<K, V>
where
    K: Serialize + DeserializeOwned + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub(crate) fn new(map: NamedMap<K, V>) -> Self {
        Self { map }
    }

    /// Returns the number of entries in the map.
    pub async fn size(&self) -> Result<usize> {
        self.map.size().await
    }

    /// Removes every entry from the backing map; all views observe it.
    pub async fn clear(&self) -> Result<()> {
        self.map.clear().await
    }

    /// Removes the exact `(key, value)` mapping, reporting whether the
    /// server held it.
    pub async fn delete(&self, key: &K, value: &V) -> Result<bool> {
        self.map.remove_mapping(key, value).await
    }

    /// Adding through a view is not supported; put through the map.
    pub async fn add(&self, _key: &K, _value: &V) -> Result<bool> {
        Err(GridError::UnsupportedOperation(
            "entry view does not support add".to_string(),
        ))
    }

    /// Starts a fresh asynchronous iteration over the entries.
    pub fn iter(&self) -> Result<PageAdvancer<EntryPageSource<K, V>>> {
        self.map.ensure_iterable()?;
        Ok(self.map.entry_advancer())
    }
}

/// The value view of a remote map.
pub struct RemoteValueSet<K, V> {
    map: NamedMap<K, V>,
}

impl<K, V> Clone for RemoteValueSet<K, V> {
    fn clone(&self) -> Self {
        Self {
            map: self.map.clone(),
        }
    }
}

impl<K, V> std::fmt::Debug for RemoteValueSet<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteValueSet").field("map", &self.map).finish()
    }
}

impl<K, V> RemoteValueSet<K, V>
where
    K: Serialize + DeserializeOwned + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub(crate) fn new(map: NamedMap<K, V>) -> Self {
        Self { map }
    }

    /// Returns the number of values in the map.
    pub async fn size(&self) -> Result<usize> {
        self.map.size().await
    }

    /// Removes every entry from the backing map; all views observe it.
    pub async fn clear(&self) -> Result<()> {
        self.map.clear().await
    }

    /// Deleting by value alone is not supported; values do not identify
    /// their entries.
    pub async fn delete(&self, _value: &V) -> Result<bool> {
        Err(GridError::UnsupportedOperation(
            "value view does not support delete".to_string(),
        ))
    }

    /// Adding through a view is not supported; put through the map.
    pub async fn add(&self, _value: &V) -> Result<bool> {
        Err(GridError::UnsupportedOperation(
            "value view does not support add".to_string(),
        ))
    }

    /// Starts a fresh asynchronous iteration over the values.
    pub fn iter(&self) -> Result<PageAdvancer<ValuePageSource<V>>> {
        self.map.ensure_iterable()?;
        Ok(self.map.value_advancer())
    }
}
