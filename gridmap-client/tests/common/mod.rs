//! In-process loopback server for integration tests.
//!
//! The server speaks the real wire codec over a real TCP socket, emulates
//! one cache (an in-memory ordered store), records every decoded request,
//! and lets tests inject events, lifecycle notifications, and ack delays.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use gridmap_client::core::protocol::{
    Envelope, EnvelopeKind, ListenerRequest, ListenerRequestType, ListenerResponse,
    MapEventMessage, Request, Response, StreamItem, WireCodec,
};
use gridmap_client::{Session, SessionConfig};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use uuid::Uuid;

/// Items per page served by the paging RPCs.
const PAGE_SIZE: usize = 2;

#[derive(Default)]
struct ServerState {
    store: Mutex<BTreeMap<Vec<u8>, Bytes>>,
    trace: Mutex<Vec<Request>>,
    duplexes: Mutex<Vec<Uuid>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Envelope>>>,
    connections: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    withhold_subscription_acks: AtomicBool,
}

/// A scripted grid endpoint bound to a loopback port.
pub struct TestServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
}

#[allow(dead_code)]
impl TestServer {
    /// Binds a fresh server and starts serving the first connection.
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind loopback listener");
        let addr = listener.local_addr().expect("listener has no address");
        let state = Arc::new(ServerState::default());

        let accept_state = Arc::clone(&state);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let state = Arc::clone(&accept_state);
                let task_state = Arc::clone(&state);
                let task = tokio::spawn(async move {
                    serve_connection(socket, task_state).await;
                });
                state.connections.lock().unwrap().push(task);
            }
        });

        Self { addr, state }
    }

    /// Connects a session with a short per-call deadline.
    pub async fn connect(&self) -> Session {
        self.connect_with_timeout(Duration::from_secs(2)).await
    }

    /// Connects a session with the given per-call deadline.
    pub async fn connect_with_timeout(&self, timeout: Duration) -> Session {
        let config = SessionConfig::builder()
            .address(self.addr.to_string())
            .request_timeout(timeout)
            .tls_enabled(false)
            .build()
            .expect("invalid test config");
        Session::connect(config).await.expect("failed to connect")
    }

    /// Seeds the store with a JSON-encoded entry.
    pub fn seed(&self, key_json: &str, value_json: &str) {
        self.state.store.lock().unwrap().insert(
            key_json.as_bytes().to_vec(),
            Bytes::copy_from_slice(value_json.as_bytes()),
        );
    }

    /// Number of entries currently held by the server.
    pub fn store_len(&self) -> usize {
        self.state.store.lock().unwrap().len()
    }

    /// Snapshot of every request decoded so far, in arrival order.
    pub fn trace(&self) -> Vec<Request> {
        self.state.trace.lock().unwrap().clone()
    }

    /// The listener requests decoded so far, in arrival order.
    pub fn listener_trace(&self) -> Vec<ListenerRequest> {
        self.trace()
            .into_iter()
            .filter_map(|request| match request {
                Request::Listener(inner) => Some(inner),
                _ => None,
            })
            .collect()
    }

    /// Counts requests matching a predicate.
    pub fn count_requests(&self, predicate: impl Fn(&Request) -> bool) -> usize {
        self.trace().iter().filter(|r| predicate(r)).count()
    }

    /// Drops every open connection, simulating a transport failure.
    pub fn drop_connections(&self) {
        for task in self.state.connections.lock().unwrap().drain(..) {
            task.abort();
        }
        *self.state.outbound.lock().unwrap() = None;
    }

    /// Stops acknowledging SUBSCRIBE/UNSUBSCRIBE requests (INIT still acks).
    pub fn withhold_subscription_acks(&self, withhold: bool) {
        self.state
            .withhold_subscription_acks
            .store(withhold, Ordering::Release);
    }

    /// Sends an entry event on every open event duplex.
    pub fn emit_event(&self, message: MapEventMessage) {
        self.emit(Response::Listener(ListenerResponse::Event(message)));
    }

    /// Sends a DESTROYED notification on every open event duplex.
    pub fn emit_destroyed(&self, cache: &str) {
        self.emit(Response::Listener(ListenerResponse::Destroyed {
            cache: cache.to_string(),
        }));
    }

    /// Sends a TRUNCATED notification on every open event duplex.
    pub fn emit_truncated(&self, cache: &str) {
        self.emit(Response::Listener(ListenerResponse::Truncated {
            cache: cache.to_string(),
        }));
    }

    fn emit(&self, response: Response) {
        let duplexes = self.state.duplexes.lock().unwrap().clone();
        let outbound = self.state.outbound.lock().unwrap();
        let Some(tx) = outbound.as_ref() else { return };
        for uid in duplexes {
            let _ = tx.send(Envelope::new(uid, EnvelopeKind::Data, response.encode()));
        }
    }
}

async fn serve_connection(socket: TcpStream, state: Arc<ServerState>) {
    let (read_half, write_half) = socket.into_split();
    let mut reader = FramedRead::new(read_half, WireCodec::new());
    let mut writer = FramedWrite::new(write_half, WireCodec::new());

    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
    *state.outbound.lock().unwrap() = Some(tx.clone());

    tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            if writer.send(envelope).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(envelope)) = reader.next().await {
        match envelope.kind {
            EnvelopeKind::Request => {
                let Ok(request) = Request::decode(envelope.body.clone()) else {
                    continue;
                };
                state.trace.lock().unwrap().push(request.clone());
                handle_request(&state, &tx, envelope.uid, request);
            }
            EnvelopeKind::Data => {
                // Subscription traffic on an open event duplex.
                let Ok(Request::Listener(listener)) = Request::decode(envelope.body.clone())
                else {
                    continue;
                };
                state
                    .trace
                    .lock()
                    .unwrap()
                    .push(Request::Listener(listener.clone()));
                handle_subscription(&state, &tx, envelope.uid, listener);
            }
            EnvelopeKind::Cancel => {
                state.duplexes.lock().unwrap().retain(|uid| *uid != envelope.uid);
            }
            _ => {}
        }
    }
}

fn respond(tx: &mpsc::UnboundedSender<Envelope>, uid: Uuid, response: Response) {
    let _ = tx.send(Envelope::new(uid, EnvelopeKind::Response, response.encode()));
}

fn stream_item(tx: &mpsc::UnboundedSender<Envelope>, uid: Uuid, item: StreamItem) {
    let _ = tx.send(Envelope::new(
        uid,
        EnvelopeKind::Data,
        Response::Stream(item).encode(),
    ));
}

fn end_stream(tx: &mpsc::UnboundedSender<Envelope>, uid: Uuid) {
    let _ = tx.send(Envelope::control(uid, EnvelopeKind::End));
}

fn parse_cookie(cookie: &Bytes) -> usize {
    if cookie.is_empty() {
        0
    } else {
        String::from_utf8_lossy(cookie).parse().unwrap_or(0)
    }
}

fn make_cookie(next: usize, len: usize) -> Bytes {
    if next >= len {
        Bytes::new()
    } else {
        Bytes::from(next.to_string())
    }
}

fn handle_request(
    state: &Arc<ServerState>,
    tx: &mpsc::UnboundedSender<Envelope>,
    uid: Uuid,
    request: Request,
) {
    match request {
        Request::Get { key, .. } => {
            let value = state.store.lock().unwrap().get(&key[..]).cloned();
            respond(tx, uid, Response::Value { value });
        }
        Request::Put { key, value, .. } => {
            let prior = state
                .store
                .lock()
                .unwrap()
                .insert(key.to_vec(), value);
            respond(tx, uid, Response::Value { value: prior });
        }
        Request::Remove { key, .. } => {
            let prior = state.store.lock().unwrap().remove(&key[..]);
            respond(tx, uid, Response::Value { value: prior });
        }
        Request::RemoveMapping { key, value, .. } => {
            let mut store = state.store.lock().unwrap();
            let removed = match store.get(&key[..]) {
                Some(existing) if *existing == value => {
                    store.remove(&key[..]);
                    true
                }
                _ => false,
            };
            respond(tx, uid, Response::Flag { value: removed });
        }
        Request::ContainsKey { key, .. } => {
            let present = state.store.lock().unwrap().contains_key(&key[..]);
            respond(tx, uid, Response::Flag { value: present });
        }
        Request::Size { .. } => {
            let len = state.store.lock().unwrap().len() as u64;
            respond(tx, uid, Response::Count { value: len });
        }
        Request::Clear { .. } | Request::Truncate { .. } => {
            state.store.lock().unwrap().clear();
            respond(tx, uid, Response::Ack);
        }
        Request::Destroy { cache } => {
            state.store.lock().unwrap().clear();
            respond(tx, uid, Response::Ack);
            let destroyed = Response::Listener(ListenerResponse::Destroyed { cache });
            for duplex in state.duplexes.lock().unwrap().iter() {
                let _ = tx.send(Envelope::new(
                    *duplex,
                    EnvelopeKind::Data,
                    destroyed.encode(),
                ));
            }
        }
        Request::Invoke { key, .. } => {
            // The loopback processor echoes the current value under the key.
            let value = state.store.lock().unwrap().get(&key[..]).cloned();
            respond(tx, uid, Response::Value { value });
        }
        Request::InvokeAll { keys, .. } => {
            let store = state.store.lock().unwrap();
            let entries = if keys.is_empty() {
                store
                    .iter()
                    .map(|(k, v)| (Bytes::copy_from_slice(k), v.clone()))
                    .collect()
            } else {
                keys.iter()
                    .filter_map(|k| {
                        store
                            .get(&k[..])
                            .map(|v| (k.clone(), v.clone()))
                    })
                    .collect()
            };
            respond(tx, uid, Response::EntryList { entries });
        }
        Request::Aggregate { .. } => {
            let len = state.store.lock().unwrap().len();
            respond(
                tx,
                uid,
                Response::Value {
                    value: Some(Bytes::from(len.to_string())),
                },
            );
        }
        Request::NextKeyPage { cookie, .. } => {
            let store = state.store.lock().unwrap();
            let keys: Vec<_> = store.keys().cloned().collect();
            let start = parse_cookie(&cookie);
            let page: Vec<_> = keys.iter().skip(start).take(PAGE_SIZE).collect();
            stream_item(
                tx,
                uid,
                StreamItem::Cookie {
                    cookie: make_cookie(start + page.len(), keys.len()),
                },
            );
            for key in page {
                stream_item(
                    tx,
                    uid,
                    StreamItem::Datum {
                        bytes: Bytes::copy_from_slice(key),
                    },
                );
            }
            end_stream(tx, uid);
        }
        Request::NextEntryPage { cookie, .. } => {
            let store = state.store.lock().unwrap();
            let entries: Vec<_> = store
                .iter()
                .map(|(k, v)| (Bytes::copy_from_slice(k), v.clone()))
                .collect();
            let start = parse_cookie(&cookie);
            let page: Vec<_> = entries.iter().skip(start).take(PAGE_SIZE).collect();
            stream_item(
                tx,
                uid,
                StreamItem::Cookie {
                    cookie: make_cookie(start + page.len(), entries.len()),
                },
            );
            for (key, value) in page {
                stream_item(
                    tx,
                    uid,
                    StreamItem::Entry {
                        key: key.clone(),
                        value: value.clone(),
                    },
                );
            }
            end_stream(tx, uid);
        }
        Request::Values { .. } => {
            let store = state.store.lock().unwrap();
            for value in store.values() {
                stream_item(tx, uid, StreamItem::Datum { bytes: value.clone() });
            }
            end_stream(tx, uid);
        }
        Request::Entries { .. } => {
            let store = state.store.lock().unwrap();
            for (key, value) in store.iter() {
                stream_item(
                    tx,
                    uid,
                    StreamItem::Entry {
                        key: Bytes::copy_from_slice(key),
                        value: value.clone(),
                    },
                );
            }
            end_stream(tx, uid);
        }
        Request::Listener(listener) => {
            // INIT opens the duplex; its transport id is the envelope uid.
            if listener.request_type == ListenerRequestType::Init {
                state.duplexes.lock().unwrap().push(uid);
                let ack = Response::Listener(ListenerResponse::Subscribed { uid: listener.uid });
                let _ = tx.send(Envelope::new(uid, EnvelopeKind::Data, ack.encode()));
            }
        }
    }
}

fn handle_subscription(
    state: &Arc<ServerState>,
    tx: &mpsc::UnboundedSender<Envelope>,
    duplex_uid: Uuid,
    listener: ListenerRequest,
) {
    if state.withhold_subscription_acks.load(Ordering::Acquire) {
        return;
    }
    let ack = match listener.request_type {
        ListenerRequestType::Subscribe => {
            Response::Listener(ListenerResponse::Subscribed { uid: listener.uid })
        }
        ListenerRequestType::Unsubscribe => {
            Response::Listener(ListenerResponse::Unsubscribed { uid: listener.uid })
        }
        ListenerRequestType::Init => return,
    };
    let _ = tx.send(Envelope::new(duplex_uid, EnvelopeKind::Data, ack.encode()));
}
