//! Ownership of the event duplex and routing of everything on it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use gridmap_core::protocol::{ListenerResponse, MapEventMessage, Response};
use gridmap_core::{GridError, Result, Serializer};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use uuid::Uuid;

use super::group::{AddAction, GroupTarget, ListenerGroup, RemoveAction};
use super::listener::{BoxedMapListener, MapEvent};
use super::MapLifecycleEvent;
use crate::connection::{Channel, DuplexHandle};
use crate::query::Filter;
use crate::request::{GridRequest, RequestFactory};

/// Buffer depth for lifecycle and error broadcasts.
const NOTIFICATION_BUFFER: usize = 16;

struct ManagerState<K, V> {
    key_groups: HashMap<String, ListenerGroup<K, V>>,
    filter_groups: HashMap<String, ListenerGroup<K, V>>,
    filter_id_index: HashMap<i64, String>,
    pending_acks: HashMap<Uuid, oneshot::Sender<Result<()>>>,
}

impl<K, V> Default for ManagerState<K, V> {
    fn default() -> Self {
        Self {
            key_groups: HashMap::new(),
            filter_groups: HashMap::new(),
            filter_id_index: HashMap::new(),
            pending_acks: HashMap::new(),
        }
    }
}

/// Owner of one map's event duplex and listener-group indexes.
///
/// The manager coalesces local listeners into server subscriptions,
/// correlates subscription acks back to waiting callers, and fans inbound
/// events out to the matching groups. Registration flows are serialized so
/// each group has at most one subscription RPC in flight; index mutations
/// take one short-lived mutex shared with the inbound dispatch task.
pub struct MapEventsManager<K, V> {
    channel: Arc<Channel>,
    factory: Arc<RequestFactory>,
    serializer: Serializer,
    state: Arc<Mutex<ManagerState<K, V>>>,
    registration: tokio::sync::Mutex<()>,
    stream: tokio::sync::Mutex<Option<DuplexHandle>>,
    lifecycle_tx: broadcast::Sender<MapLifecycleEvent>,
    error_tx: broadcast::Sender<GridError>,
    closing: Arc<AtomicBool>,
    destroyed: Arc<AtomicBool>,
}

impl<K, V> std::fmt::Debug for MapEventsManager<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapEventsManager")
            .field("cache", &self.factory.cache())
            .field("closing", &self.closing.load(Ordering::Acquire))
            .finish()
    }
}

impl<K, V> MapEventsManager<K, V>
where
    K: Serialize + DeserializeOwned + Send + Sync + 'static,
    V: DeserializeOwned + Send + Sync + 'static,
{
    /// Creates a manager for one map.
    ///
    /// `destroyed` is shared with the facade: a DESTROYED notification from
    /// the server releases the map for every holder.
    pub(crate) fn new(
        channel: Arc<Channel>,
        factory: Arc<RequestFactory>,
        serializer: Serializer,
        destroyed: Arc<AtomicBool>,
    ) -> Self {
        let (lifecycle_tx, _) = broadcast::channel(NOTIFICATION_BUFFER);
        let (error_tx, _) = broadcast::channel(NOTIFICATION_BUFFER);
        Self {
            channel,
            factory,
            serializer,
            state: Arc::new(Mutex::new(ManagerState::default())),
            registration: tokio::sync::Mutex::new(()),
            stream: tokio::sync::Mutex::new(None),
            lifecycle_tx,
            error_tx,
            closing: Arc::new(AtomicBool::new(false)),
            destroyed,
        }
    }

    /// Subscribes to destroyed/truncated notifications for this map.
    pub fn lifecycle_events(&self) -> broadcast::Receiver<MapLifecycleEvent> {
        self.lifecycle_tx.subscribe()
    }

    /// Subscribes to asynchronous stream errors for this map.
    pub fn error_events(&self) -> broadcast::Receiver<GridError> {
        self.error_tx.subscribe()
    }

    /// Publishes a lifecycle notification to local subscribers.
    pub(crate) fn announce_lifecycle(&self, event: MapLifecycleEvent) {
        let _ = self.lifecycle_tx.send(event);
    }

    /// Number of key targets currently coalesced.
    pub fn key_group_count(&self) -> usize {
        self.state.lock().unwrap().key_groups.len()
    }

    /// Number of filter targets currently coalesced.
    pub fn filter_group_count(&self) -> usize {
        self.state.lock().unwrap().filter_groups.len()
    }

    /// `true` while any subscription request awaits its ack.
    pub fn has_pending_acks(&self) -> bool {
        !self.state.lock().unwrap().pending_acks.is_empty()
    }

    fn check_open(&self) -> Result<()> {
        if self.closing.load(Ordering::Acquire) {
            return Err(GridError::IllegalState(
                "events manager is closed".to_string(),
            ));
        }
        Ok(())
    }

    /// Registers `handler` for events on `key`.
    pub async fn register_key_listener(
        &self,
        handler: BoxedMapListener<K, V>,
        key: &K,
        lite: bool,
    ) -> Result<()> {
        self.check_open()?;
        let _guard = self.registration.lock().await;
        let stream = self.ensure_stream().await?;
        let (key_bytes, fingerprint) = self.serializer.key_with_fingerprint(key)?;

        let (action, target) = {
            let mut state = self.state.lock().unwrap();
            let group = state
                .key_groups
                .entry(fingerprint.clone())
                .or_insert_with(|| {
                    ListenerGroup::new(GroupTarget::Key {
                        key: key_bytes,
                        fingerprint,
                    })
                });
            (group.add(Arc::clone(&handler), lite), group.target().clone())
        };

        self.apply_add_action(&stream, action, &target, &handler).await
    }

    /// Removes `handler` from `key`'s group.
    pub async fn remove_key_listener(
        &self,
        handler: &BoxedMapListener<K, V>,
        key: &K,
    ) -> Result<()> {
        self.check_open()?;
        let _guard = self.registration.lock().await;
        let (_, fingerprint) = self.serializer.key_with_fingerprint(key)?;

        let Some((action, target, registered_lite)) = ({
            let mut state = self.state.lock().unwrap();
            state.key_groups.get_mut(&fingerprint).map(|group| {
                (
                    group.remove(handler),
                    group.target().clone(),
                    group.registered_lite(),
                )
            })
        }) else {
            return Ok(());
        };

        self.apply_remove_action(action, &target, registered_lite)
            .await
    }

    /// Registers `handler` for events matching `filter`.
    ///
    /// A missing filter normalizes to the canonical always-matching filter.
    pub async fn register_filter_listener(
        &self,
        handler: BoxedMapListener<K, V>,
        filter: Option<&Filter>,
        lite: bool,
    ) -> Result<()> {
        self.check_open()?;
        let _guard = self.registration.lock().await;
        let stream = self.ensure_stream().await?;

        let filter = filter.cloned().unwrap_or_else(Filter::always);
        let filter_bytes = self.serializer.serialize(&filter)?;
        let identity = self.serializer.fingerprint(&filter_bytes);

        let (action, target) = {
            let mut state = self.state.lock().unwrap();
            let factory = &self.factory;
            let group = state
                .filter_groups
                .entry(identity.clone())
                .or_insert_with(|| {
                    ListenerGroup::new(GroupTarget::Filter {
                        filter: filter_bytes,
                        identity,
                        filter_id: factory.next_filter_id(),
                    })
                });
            (group.add(Arc::clone(&handler), lite), group.target().clone())
        };

        self.apply_add_action(&stream, action, &target, &handler).await
    }

    /// Removes `handler` from `filter`'s group.
    pub async fn remove_filter_listener(
        &self,
        handler: &BoxedMapListener<K, V>,
        filter: Option<&Filter>,
    ) -> Result<()> {
        self.check_open()?;
        let _guard = self.registration.lock().await;

        let filter = filter.cloned().unwrap_or_else(Filter::always);
        let filter_bytes = self.serializer.serialize(&filter)?;
        let identity = self.serializer.fingerprint(&filter_bytes);

        let Some((action, target, registered_lite)) = ({
            let mut state = self.state.lock().unwrap();
            state.filter_groups.get_mut(&identity).map(|group| {
                (
                    group.remove(handler),
                    group.target().clone(),
                    group.registered_lite(),
                )
            })
        }) else {
            return Ok(());
        };

        self.apply_remove_action(action, &target, registered_lite)
            .await
    }

    async fn apply_add_action(
        &self,
        stream: &DuplexHandle,
        action: AddAction,
        target: &GroupTarget,
        handler: &BoxedMapListener<K, V>,
    ) -> Result<()> {
        match action {
            AddAction::NoChange => Ok(()),
            AddAction::Subscribe { lite } => {
                let request = self.subscription_request(target, true, lite);
                match self.write_request(stream, request).await {
                    Ok(()) => {
                        self.post_subscribe(target, lite);
                        Ok(())
                    }
                    Err(e) => {
                        self.roll_back(target, handler);
                        Err(e)
                    }
                }
            }
            AddAction::Resubscribe { lite } => self.resubscribe(stream, target, lite).await,
        }
    }

    async fn apply_remove_action(
        &self,
        action: RemoveAction,
        target: &GroupTarget,
        registered_lite: bool,
    ) -> Result<()> {
        match action {
            RemoveAction::NoChange => Ok(()),
            RemoveAction::Unsubscribe => {
                let stream = self.ensure_stream().await?;
                let request = self.subscription_request(target, false, registered_lite);
                let result = self.write_request(&stream, request).await;
                self.post_unsubscribe(target);
                result
            }
            RemoveAction::Resubscribe { lite } => {
                let stream = self.ensure_stream().await?;
                self.resubscribe(&stream, target, lite).await
            }
        }
    }

    /// Builds the wire request for a group target; the variant supplies the
    /// target serialization.
    fn subscription_request(
        &self,
        target: &GroupTarget,
        subscribe: bool,
        lite: bool,
    ) -> GridRequest {
        match target {
            GroupTarget::Key { key, .. } => {
                self.factory.key_subscription(key.clone(), subscribe, lite)
            }
            GroupTarget::Filter {
                filter, filter_id, ..
            } => self
                .factory
                .filter_subscription(filter.clone(), *filter_id, subscribe, lite),
        }
    }

    /// Detail-level change: the unsubscribe must be acknowledged before the
    /// new subscription goes out, so the server sees at most one
    /// registration per target.
    async fn resubscribe(
        &self,
        stream: &DuplexHandle,
        target: &GroupTarget,
        lite: bool,
    ) -> Result<()> {
        let unsubscribe = self.subscription_request(target, false, !lite);
        self.write_request(stream, unsubscribe).await?;
        if let GroupTarget::Filter { filter_id, .. } = target {
            self.state.lock().unwrap().filter_id_index.remove(filter_id);
        }

        let subscribe = self.subscription_request(target, true, lite);
        self.write_request(stream, subscribe).await?;
        self.post_subscribe(target, lite);
        Ok(())
    }

    /// Index maintenance after a subscribe ack. Filter groups become
    /// routable by their id only here, never before the ack.
    fn post_subscribe(&self, target: &GroupTarget, lite: bool) {
        let mut state = self.state.lock().unwrap();
        match target {
            GroupTarget::Key { fingerprint, .. } => {
                if let Some(group) = state.key_groups.get_mut(fingerprint) {
                    group.confirm_subscribed(lite);
                }
            }
            GroupTarget::Filter {
                identity,
                filter_id,
                ..
            } => {
                let ManagerState {
                    filter_groups,
                    filter_id_index,
                    ..
                } = &mut *state;
                if let Some(group) = filter_groups.get_mut(identity) {
                    group.confirm_subscribed(lite);
                    filter_id_index.insert(*filter_id, identity.clone());
                }
            }
        }
    }

    /// Index maintenance after the group's final unsubscribe: the group and
    /// its id routing disappear.
    fn post_unsubscribe(&self, target: &GroupTarget) {
        let mut state = self.state.lock().unwrap();
        match target {
            GroupTarget::Key { fingerprint, .. } => {
                state.key_groups.remove(fingerprint);
            }
            GroupTarget::Filter {
                identity,
                filter_id,
                ..
            } => {
                state.filter_id_index.remove(filter_id);
                state.filter_groups.remove(identity);
            }
        }
    }

    /// Undoes a just-added record whose subscription failed, dropping the
    /// group if it became empty.
    fn roll_back(&self, target: &GroupTarget, handler: &BoxedMapListener<K, V>) {
        let mut state = self.state.lock().unwrap();
        let (groups, index_key) = match target {
            GroupTarget::Key { fingerprint, .. } => (&mut state.key_groups, fingerprint),
            GroupTarget::Filter { identity, .. } => (&mut state.filter_groups, identity),
        };
        if let Some(group) = groups.get_mut(index_key) {
            group.roll_back(handler);
            if group.is_empty() {
                groups.remove(index_key);
            }
        }
    }

    /// Opens the event duplex on first use and caches the handle.
    ///
    /// The handle is published only after the INIT ack arrives. Callers hold
    /// the registration lock, so concurrent first subscriptions serialize
    /// here and observe the cached handle.
    async fn ensure_stream(&self) -> Result<DuplexHandle> {
        let mut slot = self.stream.lock().await;
        if let Some(handle) = slot.as_ref() {
            return Ok(handle.clone());
        }

        let init = self.factory.init_events();
        let (ack_tx, ack_rx) = oneshot::channel();
        self.state
            .lock()
            .unwrap()
            .pending_acks
            .insert(init.uid, ack_tx);

        let (handle, rx) = match self.channel.open_duplex(init.uid, &init.message).await {
            Ok(pair) => pair,
            Err(e) => {
                self.state.lock().unwrap().pending_acks.remove(&init.uid);
                return Err(e);
            }
        };
        self.spawn_dispatch(rx);

        match tokio::time::timeout(self.channel.request_timeout(), ack_rx).await {
            Ok(Ok(Ok(()))) => {
                tracing::debug!(cache = %self.factory.cache(), "event stream established");
                *slot = Some(handle.clone());
                Ok(handle)
            }
            Ok(Ok(Err(e))) => {
                handle.cancel().await;
                Err(e)
            }
            Ok(Err(_)) => {
                handle.cancel().await;
                Err(GridError::Connection(
                    "event stream closed before the INIT ack".to_string(),
                ))
            }
            Err(_) => {
                self.state.lock().unwrap().pending_acks.remove(&init.uid);
                handle.cancel().await;
                Err(GridError::Timeout(format!(
                    "no INIT ack within {:?}",
                    self.channel.request_timeout()
                )))
            }
        }
    }

    /// Sends a subscription request and awaits its ack under the per-call
    /// deadline. The ack entry is removed on timeout.
    async fn write_request(&self, stream: &DuplexHandle, request: GridRequest) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.state
            .lock()
            .unwrap()
            .pending_acks
            .insert(request.uid, ack_tx);

        if let Err(e) = stream.send(&request.message).await {
            self.state.lock().unwrap().pending_acks.remove(&request.uid);
            return Err(e);
        }

        match tokio::time::timeout(self.channel.request_timeout(), ack_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(GridError::Cancelled(
                "event stream closed before the ack".to_string(),
            )),
            Err(_) => {
                self.state.lock().unwrap().pending_acks.remove(&request.uid);
                Err(GridError::Timeout(format!(
                    "no subscription ack within {:?}",
                    self.channel.request_timeout()
                )))
            }
        }
    }

    fn spawn_dispatch(&self, mut rx: mpsc::Receiver<Result<Response>>) {
        let state = Arc::clone(&self.state);
        let serializer = self.serializer.clone();
        let lifecycle_tx = self.lifecycle_tx.clone();
        let error_tx = self.error_tx.clone();
        let closing = Arc::clone(&self.closing);
        let destroyed = Arc::clone(&self.destroyed);
        let cache = self.factory.cache().to_string();

        tokio::spawn(async move {
            while let Some(item) = rx.recv().await {
                match item {
                    Ok(Response::Listener(response)) => Self::handle_inbound(
                        &state,
                        &serializer,
                        &lifecycle_tx,
                        &destroyed,
                        &cache,
                        response,
                    ),
                    Ok(other) => {
                        tracing::warn!(
                            message_type = other.message_type(),
                            "unexpected message on event stream"
                        );
                    }
                    Err(e) => {
                        Self::reject_pending(&state, &e);
                        if !closing.load(Ordering::Acquire) && !e.is_cancellation() {
                            let _ = error_tx.send(e);
                        }
                    }
                }
            }

            if !closing.load(Ordering::Acquire) {
                let err = GridError::Connection("event stream ended".to_string());
                Self::reject_pending(&state, &err);
                let _ = error_tx.send(err);
            }
        });
    }

    fn handle_inbound(
        state: &Arc<Mutex<ManagerState<K, V>>>,
        serializer: &Serializer,
        lifecycle_tx: &broadcast::Sender<MapLifecycleEvent>,
        destroyed: &Arc<AtomicBool>,
        cache: &str,
        response: ListenerResponse,
    ) {
        match response {
            ListenerResponse::Subscribed { uid } | ListenerResponse::Unsubscribed { uid } => {
                let ack = state.lock().unwrap().pending_acks.remove(&uid);
                match ack {
                    Some(tx) => {
                        let _ = tx.send(Ok(()));
                    }
                    None => tracing::debug!(%uid, "ack for an unknown subscription request"),
                }
            }
            ListenerResponse::Destroyed { cache: event_cache } => {
                if event_cache == cache {
                    destroyed.store(true, Ordering::Release);
                    let _ = lifecycle_tx.send(MapLifecycleEvent::Destroyed);
                } else {
                    tracing::debug!(cache = %event_cache, "destroy notification for another map");
                }
            }
            ListenerResponse::Truncated { cache: event_cache } => {
                if event_cache == cache {
                    let _ = lifecycle_tx.send(MapLifecycleEvent::Truncated);
                } else {
                    tracing::debug!(cache = %event_cache, "truncate notification for another map");
                }
            }
            ListenerResponse::Event(message) => {
                Self::dispatch_event(state, serializer, message);
            }
        }
    }

    /// Routes one event to its filter groups (by id) and key group (by
    /// fingerprint). Both notifications happen; neither suppresses the
    /// other. Handlers run outside the state lock.
    fn dispatch_event(
        state: &Arc<Mutex<ManagerState<K, V>>>,
        serializer: &Serializer,
        message: MapEventMessage,
    ) {
        let key_fingerprint = serializer.fingerprint(&message.key);
        let filter_ids = message.filter_ids.clone();
        let event = Arc::new(MapEvent::from_message(message, serializer.clone()));

        let mut snapshots = Vec::new();
        {
            let state = state.lock().unwrap();
            let mut seen = HashSet::new();
            for filter_id in &filter_ids {
                let Some(identity) = state.filter_id_index.get(filter_id) else {
                    continue;
                };
                if !seen.insert(identity.clone()) {
                    continue;
                }
                if let Some(group) = state.filter_groups.get(identity) {
                    snapshots.push(group.snapshot());
                }
            }
            if let Some(group) = state.key_groups.get(&key_fingerprint) {
                snapshots.push(group.snapshot());
            }
        }

        for snapshot in &snapshots {
            snapshot.notify(&event);
        }
    }

    fn reject_pending(state: &Arc<Mutex<ManagerState<K, V>>>, err: &GridError) {
        let pending: Vec<_> = {
            let mut state = state.lock().unwrap();
            state.pending_acks.drain().map(|(_, tx)| tx).collect()
        };
        for tx in pending {
            let _ = tx.send(Err(err.clone()));
        }
    }

    /// Closes the manager: outstanding acks reject with `Cancelled` and the
    /// duplex is cancelled. Terminal stream events after this are silent.
    pub async fn close(&self) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        Self::reject_pending(
            &self.state,
            &GridError::Cancelled("events manager closed".to_string()),
        );
        if let Some(handle) = self.stream.lock().await.take() {
            handle.cancel().await;
        }
        tracing::debug!(cache = %self.factory.cache(), "events manager closed");
    }
}
