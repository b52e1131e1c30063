//! The NamedMap facade: the one object applications hold per map.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use gridmap_core::protocol::{Response, StreamItem};
use gridmap_core::{GridError, Result, Serializer};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::connection::Channel;
use crate::events::{BoxedMapListener, MapEventsManager, MapLifecycleEvent};
use crate::paging::{EntryPageSource, KeyPageSource, PageAdvancer, ValuePageSource};
use crate::proxy::remote_set::{RemoteEntrySet, RemoteKeySet, RemoteValueSet};
use crate::query::{Aggregator, Filter, Processor};
use crate::request::{GridRequest, RequestFactory};

/// Alias kept for callers that think in NamedCache terms.
pub type NamedCache<K, V> = NamedMap<K, V>;

pub(crate) struct MapInner<K, V> {
    name: String,
    channel: Arc<Channel>,
    factory: Arc<RequestFactory>,
    serializer: Serializer,
    events: MapEventsManager<K, V>,
    released: Arc<AtomicBool>,
}

/// A client-side facade over one server-held map.
///
/// All data lives on the server; every operation is a remote call. Handles
/// are cheap to clone and share one event stream and one released state.
///
/// # Example
///
/// ```ignore
/// let map: NamedMap<String, Order> = session.get_map("orders");
/// map.put(&"o-1".to_string(), &order).await?;
/// if let Some(found) = map.get(&"o-1".to_string()).await? {
///     println!("{found:?}");
/// }
/// ```
pub struct NamedMap<K, V> {
    inner: Arc<MapInner<K, V>>,
}

impl<K, V> Clone for NamedMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> std::fmt::Debug for NamedMap<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedMap")
            .field("name", &self.inner.name)
            .field("released", &self.inner.released.load(Ordering::Acquire))
            .finish()
    }
}

fn unexpected(response: Response) -> GridError {
    GridError::Protocol(format!(
        "unexpected response type {:#x}",
        response.message_type()
    ))
}

impl<K, V> NamedMap<K, V>
where
    K: Serialize + DeserializeOwned + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub(crate) fn new(
        channel: Arc<Channel>,
        scope: &str,
        name: &str,
        serializer: Serializer,
    ) -> Self {
        let factory = Arc::new(RequestFactory::new(scope, name));
        let released = Arc::new(AtomicBool::new(false));
        let events = MapEventsManager::new(
            Arc::clone(&channel),
            Arc::clone(&factory),
            serializer.clone(),
            Arc::clone(&released),
        );
        Self {
            inner: Arc::new(MapInner {
                name: name.to_string(),
                channel,
                factory,
                serializer,
                events,
                released,
            }),
        }
    }

    /// Returns the name of this map.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns `true` once this map has been released or destroyed.
    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }

    fn check_active(&self) -> Result<()> {
        if self.is_released() {
            return Err(GridError::IllegalState(format!(
                "map {} has been released",
                self.inner.name
            )));
        }
        if self.inner.channel.is_closed() {
            return Err(GridError::IllegalState(
                "session is closed".to_string(),
            ));
        }
        Ok(())
    }

    async fn invoke_unary(&self, request: GridRequest) -> Result<Response> {
        self.check_active()?;
        self.inner
            .channel
            .invoke(request.uid, &request.message)
            .await
    }

    fn decode_optional(&self, value: Option<Bytes>) -> Result<Option<V>> {
        value
            .map(|bytes| self.inner.serializer.deserialize(&bytes))
            .transpose()
    }

    /// Retrieves the value mapped to `key`, or `None` if absent.
    pub async fn get(&self, key: &K) -> Result<Option<V>> {
        let key_bytes = self.inner.serializer.serialize(key)?;
        match self.invoke_unary(self.inner.factory.get(key_bytes)).await? {
            Response::Value { value } => self.decode_optional(value),
            other => Err(unexpected(other)),
        }
    }

    /// Maps `key` to `value`, returning the previous value if any.
    pub async fn put(&self, key: &K, value: &V) -> Result<Option<V>> {
        let key_bytes = self.inner.serializer.serialize(key)?;
        let value_bytes = self.inner.serializer.serialize(value)?;
        match self
            .invoke_unary(self.inner.factory.put(key_bytes, value_bytes))
            .await?
        {
            Response::Value { value } => self.decode_optional(value),
            other => Err(unexpected(other)),
        }
    }

    /// Removes `key`, returning the previous value if any.
    pub async fn remove(&self, key: &K) -> Result<Option<V>> {
        let key_bytes = self.inner.serializer.serialize(key)?;
        match self
            .invoke_unary(self.inner.factory.remove(key_bytes))
            .await?
        {
            Response::Value { value } => self.decode_optional(value),
            other => Err(unexpected(other)),
        }
    }

    /// Removes `key` and reports whether a prior value existed, without
    /// deserializing it.
    pub(crate) async fn remove_reporting(&self, key: &K) -> Result<bool> {
        let key_bytes = self.inner.serializer.serialize(key)?;
        match self
            .invoke_unary(self.inner.factory.remove(key_bytes))
            .await?
        {
            Response::Value { value } => Ok(value.is_some()),
            other => Err(unexpected(other)),
        }
    }

    /// Removes `key` only if it is currently mapped to `value`.
    pub async fn remove_mapping(&self, key: &K, value: &V) -> Result<bool> {
        let key_bytes = self.inner.serializer.serialize(key)?;
        let value_bytes = self.inner.serializer.serialize(value)?;
        match self
            .invoke_unary(self.inner.factory.remove_mapping(key_bytes, value_bytes))
            .await?
        {
            Response::Flag { value } => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    /// Returns `true` if the map contains `key`.
    pub async fn contains_key(&self, key: &K) -> Result<bool> {
        let key_bytes = self.inner.serializer.serialize(key)?;
        match self
            .invoke_unary(self.inner.factory.contains_key(key_bytes))
            .await?
        {
            Response::Flag { value } => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    /// Returns the number of entries in the map.
    pub async fn size(&self) -> Result<usize> {
        match self.invoke_unary(self.inner.factory.size()).await? {
            Response::Count { value } => Ok(value as usize),
            other => Err(unexpected(other)),
        }
    }

    /// Returns `true` if the map holds no entries.
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.size().await? == 0)
    }

    /// Removes every entry from the map.
    pub async fn clear(&self) -> Result<()> {
        match self.invoke_unary(self.inner.factory.clear()).await? {
            Response::Ack => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Removes every entry without raising per-entry events.
    pub async fn truncate(&self) -> Result<()> {
        match self.invoke_unary(self.inner.factory.truncate()).await? {
            Response::Ack => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Destroys the map on the server and releases this facade.
    ///
    /// Every subsequent operation on any handle of this map fails.
    pub async fn destroy(&self) -> Result<()> {
        match self.invoke_unary(self.inner.factory.destroy()).await? {
            Response::Ack => {
                self.inner.released.store(true, Ordering::Release);
                self.inner
                    .events
                    .announce_lifecycle(MapLifecycleEvent::Destroyed);
                self.inner.events.close().await;
                Ok(())
            }
            other => Err(unexpected(other)),
        }
    }

    /// Releases this facade locally without touching server state.
    pub async fn release(&self) {
        self.inner.released.store(true, Ordering::Release);
        self.inner.events.close().await;
    }

    /// Invokes an entry processor against `key`, returning its result.
    pub async fn invoke<R: DeserializeOwned>(
        &self,
        key: &K,
        processor: &Processor,
    ) -> Result<Option<R>> {
        let key_bytes = self.inner.serializer.serialize(key)?;
        let processor_bytes = self.inner.serializer.serialize(processor)?;
        match self
            .invoke_unary(self.inner.factory.invoke(key_bytes, processor_bytes))
            .await?
        {
            Response::Value { value } => value
                .map(|bytes| self.inner.serializer.deserialize(&bytes))
                .transpose(),
            other => Err(unexpected(other)),
        }
    }

    /// Invokes an entry processor against every entry matching `filter`,
    /// or against every entry when `filter` is `None`.
    pub async fn invoke_all<R: DeserializeOwned>(
        &self,
        filter: Option<&Filter>,
        processor: &Processor,
    ) -> Result<Vec<(K, R)>> {
        let filter = filter.cloned().unwrap_or_else(Filter::always);
        let filter_bytes = self.inner.serializer.serialize(&filter)?;
        let processor_bytes = self.inner.serializer.serialize(processor)?;
        let request =
            self.inner
                .factory
                .invoke_all(Vec::new(), Some(filter_bytes), processor_bytes);
        self.decode_invocation_results(self.invoke_unary(request).await?)
    }

    /// Invokes an entry processor against the given keys.
    pub async fn invoke_all_keys<R: DeserializeOwned>(
        &self,
        keys: &[K],
        processor: &Processor,
    ) -> Result<Vec<(K, R)>> {
        let key_bytes = keys
            .iter()
            .map(|key| self.inner.serializer.serialize(key))
            .collect::<Result<Vec<_>>>()?;
        let processor_bytes = self.inner.serializer.serialize(processor)?;
        let request = self
            .inner
            .factory
            .invoke_all(key_bytes, None, processor_bytes);
        self.decode_invocation_results(self.invoke_unary(request).await?)
    }

    fn decode_invocation_results<R: DeserializeOwned>(
        &self,
        response: Response,
    ) -> Result<Vec<(K, R)>> {
        match response {
            Response::EntryList { entries } => entries
                .into_iter()
                .map(|(key, value)| {
                    Ok((
                        self.inner.serializer.deserialize(&key)?,
                        self.inner.serializer.deserialize(&value)?,
                    ))
                })
                .collect(),
            other => Err(unexpected(other)),
        }
    }

    /// Runs an aggregator over every entry matching `filter`, or over the
    /// whole map when `filter` is `None`.
    pub async fn aggregate<R: DeserializeOwned>(
        &self,
        filter: Option<&Filter>,
        aggregator: &Aggregator,
    ) -> Result<Option<R>> {
        let filter = filter.cloned().unwrap_or_else(Filter::always);
        let filter_bytes = self.inner.serializer.serialize(&filter)?;
        let aggregator_bytes = self.inner.serializer.serialize(aggregator)?;
        let request =
            self.inner
                .factory
                .aggregate(Vec::new(), Some(filter_bytes), aggregator_bytes);
        match self.invoke_unary(request).await? {
            Response::Value { value } => value
                .map(|bytes| self.inner.serializer.deserialize(&bytes))
                .transpose(),
            other => Err(unexpected(other)),
        }
    }

    /// Runs an aggregator over the given keys.
    pub async fn aggregate_keys<R: DeserializeOwned>(
        &self,
        keys: &[K],
        aggregator: &Aggregator,
    ) -> Result<Option<R>> {
        let key_bytes = keys
            .iter()
            .map(|key| self.inner.serializer.serialize(key))
            .collect::<Result<Vec<_>>>()?;
        let aggregator_bytes = self.inner.serializer.serialize(aggregator)?;
        let request = self
            .inner
            .factory
            .aggregate(key_bytes, None, aggregator_bytes);
        match self.invoke_unary(request).await? {
            Response::Value { value } => value
                .map(|bytes| self.inner.serializer.deserialize(&bytes))
                .transpose(),
            other => Err(unexpected(other)),
        }
    }

    /// Collects every value matching `filter`.
    pub async fn values_with(&self, filter: &Filter) -> Result<Vec<V>> {
        self.check_active()?;
        let filter_bytes = self.inner.serializer.serialize(filter)?;
        let request = self.inner.factory.values(filter_bytes);
        let mut rx = self
            .inner
            .channel
            .open_stream(request.uid, &request.message)
            .await?;

        self.under_deadline(async move {
            let mut values = Vec::new();
            while let Some(message) = rx.recv().await {
                match message? {
                    Response::Stream(StreamItem::Datum { bytes }) => {
                        values.push(self.inner.serializer.deserialize(&bytes)?);
                    }
                    other => return Err(unexpected(other)),
                }
            }
            Ok(values)
        })
        .await
    }

    /// Collects every entry matching `filter`.
    pub async fn entries_with(&self, filter: &Filter) -> Result<Vec<(K, V)>> {
        self.check_active()?;
        let filter_bytes = self.inner.serializer.serialize(filter)?;
        let request = self.inner.factory.entries(filter_bytes);
        let mut rx = self
            .inner
            .channel
            .open_stream(request.uid, &request.message)
            .await?;

        self.under_deadline(async move {
            let mut entries = Vec::new();
            while let Some(message) = rx.recv().await {
                match message? {
                    Response::Stream(StreamItem::Entry { key, value }) => {
                        entries.push((
                            self.inner.serializer.deserialize(&key)?,
                            self.inner.serializer.deserialize(&value)?,
                        ));
                    }
                    other => return Err(unexpected(other)),
                }
            }
            Ok(entries)
        })
        .await
    }

    async fn under_deadline<T>(&self, work: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        let deadline = self.inner.channel.request_timeout();
        tokio::time::timeout(deadline, work)
            .await
            .map_err(|_| GridError::Timeout(format!("no complete result within {:?}", deadline)))?
    }

    /// Returns the asynchronous key view of this map.
    pub fn key_set(&self) -> RemoteKeySet<K, V> {
        RemoteKeySet::new(self.clone())
    }

    /// Returns the asynchronous entry view of this map.
    pub fn entry_set(&self) -> RemoteEntrySet<K, V> {
        RemoteEntrySet::new(self.clone())
    }

    /// Returns the asynchronous value view of this map.
    pub fn values(&self) -> RemoteValueSet<K, V> {
        RemoteValueSet::new(self.clone())
    }

    pub(crate) fn key_advancer(&self) -> PageAdvancer<KeyPageSource<K>> {
        PageAdvancer::new(
            KeyPageSource::new(
                Arc::clone(&self.inner.channel),
                Arc::clone(&self.inner.factory),
                self.inner.serializer.clone(),
            ),
            self.inner.channel.request_timeout(),
        )
    }

    pub(crate) fn entry_advancer(&self) -> PageAdvancer<EntryPageSource<K, V>> {
        PageAdvancer::new(
            EntryPageSource::new(
                Arc::clone(&self.inner.channel),
                Arc::clone(&self.inner.factory),
                self.inner.serializer.clone(),
            ),
            self.inner.channel.request_timeout(),
        )
    }

    pub(crate) fn value_advancer(&self) -> PageAdvancer<ValuePageSource<V>> {
        PageAdvancer::new(
            ValuePageSource::new(
                Arc::clone(&self.inner.channel),
                Arc::clone(&self.inner.factory),
                self.inner.serializer.clone(),
            ),
            self.inner.channel.request_timeout(),
        )
    }

    pub(crate) fn ensure_iterable(&self) -> Result<()> {
        self.check_active()
    }

    /// Registers a listener for every event on this map.
    pub async fn add_map_listener(
        &self,
        listener: BoxedMapListener<K, V>,
        lite: bool,
    ) -> Result<()> {
        self.check_active()?;
        self.inner
            .events
            .register_filter_listener(listener, None, lite)
            .await
    }

    /// Removes a listener registered for every event.
    pub async fn remove_map_listener(&self, listener: &BoxedMapListener<K, V>) -> Result<()> {
        self.check_active()?;
        self.inner.events.remove_filter_listener(listener, None).await
    }

    /// Registers a listener for events on one key.
    pub async fn add_key_listener(
        &self,
        listener: BoxedMapListener<K, V>,
        key: &K,
        lite: bool,
    ) -> Result<()> {
        self.check_active()?;
        self.inner
            .events
            .register_key_listener(listener, key, lite)
            .await
    }

    /// Removes a listener registered on one key.
    pub async fn remove_key_listener(
        &self,
        listener: &BoxedMapListener<K, V>,
        key: &K,
    ) -> Result<()> {
        self.check_active()?;
        self.inner.events.remove_key_listener(listener, key).await
    }

    /// Registers a listener for events matching a server-side filter.
    pub async fn add_filter_listener(
        &self,
        listener: BoxedMapListener<K, V>,
        filter: &Filter,
        lite: bool,
    ) -> Result<()> {
        self.check_active()?;
        self.inner
            .events
            .register_filter_listener(listener, Some(filter), lite)
            .await
    }

    /// Removes a listener registered on a server-side filter.
    pub async fn remove_filter_listener(
        &self,
        listener: &BoxedMapListener<K, V>,
        filter: &Filter,
    ) -> Result<()> {
        self.check_active()?;
        self.inner
            .events
            .remove_filter_listener(listener, Some(filter))
            .await
    }

    /// Subscribes to destroyed/truncated notifications for this map.
    pub fn lifecycle_events(&self) -> broadcast::Receiver<MapLifecycleEvent> {
        self.inner.events.lifecycle_events()
    }

    /// Subscribes to asynchronous stream errors for this map.
    pub fn error_events(&self) -> broadcast::Receiver<GridError> {
        self.inner.events.error_events()
    }

    /// Number of key targets with active local listeners.
    pub fn key_listener_groups(&self) -> usize {
        self.inner.events.key_group_count()
    }

    /// Number of filter targets with active local listeners.
    pub fn filter_listener_groups(&self) -> usize {
        self.inner.events.filter_group_count()
    }

    /// `true` while any subscription request awaits its server ack.
    pub fn has_pending_subscriptions(&self) -> bool {
        self.inner.events.has_pending_acks()
    }
}
