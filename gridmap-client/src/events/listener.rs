//! Map listener trait and the event record delivered to it.

use std::sync::Arc;
use std::sync::OnceLock;

use bytes::Bytes;
use gridmap_core::protocol::{EventId, MapEventMessage};
use gridmap_core::{Result, Serializer};
use serde::de::DeserializeOwned;

/// An immutable entry event bound to its map and serializer.
///
/// Key and values deserialize lazily, at most once, on first access; lite
/// subscriptions deliver events whose old/new values are absent.
pub struct MapEvent<K, V> {
    cache: String,
    id: EventId,
    key_bytes: Bytes,
    old_bytes: Option<Bytes>,
    new_bytes: Option<Bytes>,
    filter_ids: Vec<i64>,
    synthetic: bool,
    serializer: Serializer,
    key: OnceLock<K>,
    old_value: OnceLock<V>,
    new_value: OnceLock<V>,
}

impl<K, V> std::fmt::Debug for MapEvent<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapEvent")
            .field("cache", &self.cache)
            .field("id", &self.id)
            .field("filter_ids", &self.filter_ids)
            .field("synthetic", &self.synthetic)
            .finish()
    }
}

impl<K, V> MapEvent<K, V> {
    pub(crate) fn from_message(message: MapEventMessage, serializer: Serializer) -> Self {
        Self {
            cache: message.cache,
            id: message.id,
            key_bytes: message.key,
            old_bytes: message.old_value,
            new_bytes: message.new_value,
            filter_ids: message.filter_ids,
            synthetic: message.synthetic,
            serializer,
            key: OnceLock::new(),
            old_value: OnceLock::new(),
            new_value: OnceLock::new(),
        }
    }

    /// Returns the name of the map the event belongs to.
    pub fn cache_name(&self) -> &str {
        &self.cache
    }

    /// Returns the event kind.
    pub fn id(&self) -> EventId {
        self.id
    }

    /// Returns the ids of the server-side filters this event matched.
    pub fn filter_ids(&self) -> &[i64] {
        &self.filter_ids
    }

    /// Returns `true` when the server generated the event itself, such as
    /// for an eviction.
    pub fn is_synthetic(&self) -> bool {
        self.synthetic
    }
}

impl<K, V> MapEvent<K, V>
where
    K: DeserializeOwned,
    V: DeserializeOwned,
{
    /// Returns the key of the affected entry, deserializing on first access.
    pub fn key(&self) -> Result<&K> {
        if let Some(key) = self.key.get() {
            return Ok(key);
        }
        let key: K = self.serializer.deserialize(&self.key_bytes)?;
        Ok(self.key.get_or_init(|| key))
    }

    /// Returns the value before the mutation, if the event carries it.
    ///
    /// Absent for inserts and for lite subscriptions.
    pub fn old_value(&self) -> Result<Option<&V>> {
        let Some(bytes) = &self.old_bytes else {
            return Ok(None);
        };
        if let Some(value) = self.old_value.get() {
            return Ok(Some(value));
        }
        let value: V = self.serializer.deserialize(bytes)?;
        Ok(Some(self.old_value.get_or_init(|| value)))
    }

    /// Returns the value after the mutation, if the event carries it.
    ///
    /// Absent for deletes and for lite subscriptions.
    pub fn new_value(&self) -> Result<Option<&V>> {
        let Some(bytes) = &self.new_bytes else {
            return Ok(None);
        };
        if let Some(value) = self.new_value.get() {
            return Ok(Some(value));
        }
        let value: V = self.serializer.deserialize(bytes)?;
        Ok(Some(self.new_value.get_or_init(|| value)))
    }
}

/// A listener for entry events on a map.
///
/// Implement the sinks for the event kinds of interest; unimplemented sinks
/// ignore their events. Handlers run on the map's dispatch executor and must
/// not block it on long work.
///
/// # Example
///
/// ```ignore
/// struct Auditor;
///
/// impl MapListener<String, Order> for Auditor {
///     fn entry_inserted(&self, event: &MapEvent<String, Order>) {
///         println!("new order under {:?}", event.key());
///     }
/// }
/// ```
pub trait MapListener<K, V>: Send + Sync {
    /// Called when an entry is added to the map.
    fn entry_inserted(&self, event: &MapEvent<K, V>) {
        let _ = event;
    }

    /// Called when an existing entry is updated.
    fn entry_updated(&self, event: &MapEvent<K, V>) {
        let _ = event;
    }

    /// Called when an entry is removed from the map.
    fn entry_deleted(&self, event: &MapEvent<K, V>) {
        let _ = event;
    }
}

/// A shared, type-erased map listener.
///
/// The `Arc` is also the listener's identity: removing a listener requires
/// the same `Arc` that registered it.
pub type BoxedMapListener<K, V> = Arc<dyn MapListener<K, V>>;

/// Dispatches an event to the sink matching its kind.
pub fn dispatch_map_event<K, V>(listener: &dyn MapListener<K, V>, event: &MapEvent<K, V>) {
    match event.id {
        EventId::Inserted => listener.entry_inserted(event),
        EventId::Updated => listener.entry_updated(event),
        EventId::Deleted => listener.entry_deleted(event),
    }
}

type Sink<K, V> = Box<dyn Fn(&MapEvent<K, V>) + Send + Sync>;

/// A map listener assembled from closures.
///
/// Use [`FnMapListener::builder`] to create one.
pub struct FnMapListener<K, V> {
    on_inserted: Option<Sink<K, V>>,
    on_updated: Option<Sink<K, V>>,
    on_deleted: Option<Sink<K, V>>,
}

impl<K, V> FnMapListener<K, V> {
    /// Creates a new builder.
    pub fn builder() -> FnMapListenerBuilder<K, V> {
        FnMapListenerBuilder::new()
    }
}

impl<K, V> MapListener<K, V> for FnMapListener<K, V>
where
    K: Send + Sync,
    V: Send + Sync,
{
    fn entry_inserted(&self, event: &MapEvent<K, V>) {
        if let Some(ref f) = self.on_inserted {
            f(event);
        }
    }

    fn entry_updated(&self, event: &MapEvent<K, V>) {
        if let Some(ref f) = self.on_updated {
            f(event);
        }
    }

    fn entry_deleted(&self, event: &MapEvent<K, V>) {
        if let Some(ref f) = self.on_deleted {
            f(event);
        }
    }
}

impl<K, V> std::fmt::Debug for FnMapListener<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnMapListener")
            .field("on_inserted", &self.on_inserted.is_some())
            .field("on_updated", &self.on_updated.is_some())
            .field("on_deleted", &self.on_deleted.is_some())
            .finish()
    }
}

/// Builder for [`FnMapListener`] instances.
pub struct FnMapListenerBuilder<K, V> {
    on_inserted: Option<Sink<K, V>>,
    on_updated: Option<Sink<K, V>>,
    on_deleted: Option<Sink<K, V>>,
}

impl<K, V> FnMapListenerBuilder<K, V> {
    fn new() -> Self {
        Self {
            on_inserted: None,
            on_updated: None,
            on_deleted: None,
        }
    }

    /// Sets the handler for inserted events.
    pub fn on_inserted<F>(mut self, f: F) -> Self
    where
        F: Fn(&MapEvent<K, V>) + Send + Sync + 'static,
    {
        self.on_inserted = Some(Box::new(f));
        self
    }

    /// Sets the handler for updated events.
    pub fn on_updated<F>(mut self, f: F) -> Self
    where
        F: Fn(&MapEvent<K, V>) + Send + Sync + 'static,
    {
        self.on_updated = Some(Box::new(f));
        self
    }

    /// Sets the handler for deleted events.
    pub fn on_deleted<F>(mut self, f: F) -> Self
    where
        F: Fn(&MapEvent<K, V>) + Send + Sync + 'static,
    {
        self.on_deleted = Some(Box::new(f));
        self
    }

    /// Builds the listener.
    pub fn build(self) -> FnMapListener<K, V> {
        FnMapListener {
            on_inserted: self.on_inserted,
            on_updated: self.on_updated,
            on_deleted: self.on_deleted,
        }
    }
}

impl<K, V> Default for FnMapListenerBuilder<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridmap_core::protocol::MapEventMessage;

    fn event(id: EventId, old: Option<&[u8]>, new: Option<&[u8]>) -> MapEvent<String, i64> {
        MapEvent::from_message(
            MapEventMessage {
                cache: "orders".to_string(),
                id,
                key: Bytes::from_static(b"\"k1\""),
                old_value: old.map(Bytes::copy_from_slice),
                new_value: new.map(Bytes::copy_from_slice),
                filter_ids: vec![7],
                synthetic: false,
            },
            Serializer::json(),
        )
    }

    #[test]
    fn test_lazy_key_deserialization() {
        let event = event(EventId::Inserted, None, Some(b"42"));
        assert_eq!(event.key().unwrap(), "k1");
        // Second access returns the cached value.
        assert_eq!(event.key().unwrap(), "k1");
        assert_eq!(event.new_value().unwrap(), Some(&42));
        assert_eq!(event.old_value().unwrap(), None);
    }

    #[test]
    fn test_corrupt_value_surfaces_error() {
        let event = event(EventId::Updated, Some(b"{bad"), Some(b"2"));
        assert!(event.old_value().is_err());
        assert_eq!(event.new_value().unwrap(), Some(&2));
    }

    #[test]
    fn test_dispatch_routes_by_kind() {
        use std::sync::atomic::{AtomicU32, Ordering};

        #[derive(Default)]
        struct Counting {
            inserted: AtomicU32,
            updated: AtomicU32,
            deleted: AtomicU32,
        }

        impl MapListener<String, i64> for Counting {
            fn entry_inserted(&self, _: &MapEvent<String, i64>) {
                self.inserted.fetch_add(1, Ordering::Relaxed);
            }
            fn entry_updated(&self, _: &MapEvent<String, i64>) {
                self.updated.fetch_add(1, Ordering::Relaxed);
            }
            fn entry_deleted(&self, _: &MapEvent<String, i64>) {
                self.deleted.fetch_add(1, Ordering::Relaxed);
            }
        }

        let listener = Counting::default();
        dispatch_map_event(&listener, &event(EventId::Inserted, None, Some(b"1")));
        dispatch_map_event(&listener, &event(EventId::Updated, Some(b"1"), Some(b"2")));
        dispatch_map_event(&listener, &event(EventId::Deleted, Some(b"2"), None));

        assert_eq!(listener.inserted.load(Ordering::Relaxed), 1);
        assert_eq!(listener.updated.load(Ordering::Relaxed), 1);
        assert_eq!(listener.deleted.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_fn_listener_only_set_sinks_fire() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        let count = Arc::new(AtomicU32::new(0));
        let count_clone = Arc::clone(&count);
        let listener: FnMapListener<String, i64> = FnMapListener::builder()
            .on_inserted(move |_| {
                count_clone.fetch_add(1, Ordering::Relaxed);
            })
            .build();

        dispatch_map_event(&listener, &event(EventId::Inserted, None, Some(b"1")));
        dispatch_map_event(&listener, &event(EventId::Deleted, Some(b"1"), None));
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_listener_trait_is_object_safe() {
        struct Quiet;
        impl MapListener<String, i64> for Quiet {}
        let _boxed: BoxedMapListener<String, i64> = Arc::new(Quiet);
    }
}
