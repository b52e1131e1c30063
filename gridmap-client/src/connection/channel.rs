//! One multiplexed connection carrying every exchange of a session.
//!
//! The channel owns a writer task and a reader task. Outbound envelopes are
//! queued to the writer; inbound envelopes are routed by correlation uuid to
//! the pending unary call, server-stream, or event duplex that opened the
//! exchange. The channel never reconnects: once the transport breaks, every
//! pending and future call fails.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use gridmap_core::protocol::{Envelope, EnvelopeKind, Request, Response, WireCodec};
use gridmap_core::{GridError, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::codec::{FramedRead, FramedWrite};
use uuid::Uuid;

use crate::config::SessionConfig;

/// Queue depth for outbound envelopes and per-stream inbound buffers.
const CHANNEL_BUFFER: usize = 64;

trait RawStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> RawStream for T {}

enum Route {
    Unary(oneshot::Sender<Result<Response>>),
    Stream(mpsc::Sender<Result<Response>>),
}

#[derive(Default)]
struct RouteTable {
    routes: HashMap<Uuid, Route>,
}

impl RouteTable {
    fn fail_all(&mut self, err: &GridError) {
        for (_, route) in self.routes.drain() {
            match route {
                Route::Unary(tx) => {
                    let _ = tx.send(Err(err.clone()));
                }
                Route::Stream(tx) => {
                    let _ = tx.try_send(Err(err.clone()));
                }
            }
        }
    }
}

/// A multiplexed connection to the NamedMap service.
pub struct Channel {
    outbound: mpsc::Sender<Envelope>,
    routes: Arc<Mutex<RouteTable>>,
    request_timeout: Duration,
    closed: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("request_timeout", &self.request_timeout)
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl Channel {
    /// Establishes a connection to the endpoint in `config`.
    pub async fn connect(config: &SessionConfig) -> Result<Self> {
        let stream = TcpStream::connect(config.address()).await.map_err(|e| {
            GridError::Connection(format!("failed to connect to {}: {}", config.address(), e))
        })?;
        stream
            .set_nodelay(true)
            .map_err(|e| GridError::Connection(format!("failed to set TCP_NODELAY: {}", e)))?;

        let io: Box<dyn RawStream> = if config.tls_enabled() {
            #[cfg(feature = "tls")]
            {
                Box::new(super::tls::wrap(stream, config).await?)
            }
            #[cfg(not(feature = "tls"))]
            {
                return Err(GridError::Configuration(
                    "TLS is enabled but the client was built without the `tls` feature"
                        .to_string(),
                ));
            }
        } else {
            Box::new(stream)
        };

        tracing::debug!(address = %config.address(), "established connection");
        Ok(Self::spawn(io, config.request_timeout()))
    }

    /// Builds a channel over an established transport and spawns its tasks.
    ///
    /// Exposed for tests that drive the protocol over an in-process socket.
    pub fn from_stream(io: TcpStream, request_timeout: Duration) -> Self {
        Self::spawn(Box::new(io), request_timeout)
    }

    fn spawn(io: Box<dyn RawStream>, request_timeout: Duration) -> Self {
        let (read_half, write_half) = tokio::io::split(io);
        let mut framed_read = FramedRead::new(read_half, WireCodec::new());
        let mut framed_write = FramedWrite::new(write_half, WireCodec::new());

        let (outbound, mut outbound_rx) = mpsc::channel::<Envelope>(CHANNEL_BUFFER);
        let routes = Arc::new(Mutex::new(RouteTable::default()));
        let closed = Arc::new(AtomicBool::new(false));
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        // Writer task: drains the outbound queue onto the wire.
        {
            let routes = Arc::clone(&routes);
            let closed = Arc::clone(&closed);
            let mut shutdown_rx = shutdown_rx.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        maybe = outbound_rx.recv() => {
                            let Some(envelope) = maybe else { break };
                            if let Err(e) = framed_write.send(envelope).await {
                                if !closed.load(Ordering::Acquire) {
                                    tracing::warn!(error = %e, "write failed, closing channel");
                                    routes.lock().unwrap().fail_all(&e);
                                    closed.store(true, Ordering::Release);
                                }
                                break;
                            }
                        }
                        _ = shutdown_rx.changed() => break,
                    }
                }
            });
        }

        // Reader task: routes inbound envelopes to their exchanges.
        {
            let routes = Arc::clone(&routes);
            let closed = Arc::clone(&closed);
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        maybe = framed_read.next() => {
                            match maybe {
                                Some(Ok(envelope)) => {
                                    Self::route_inbound(&routes, envelope).await;
                                }
                                Some(Err(e)) => {
                                    if !closed.load(Ordering::Acquire) {
                                        tracing::warn!(error = %e, "read failed, closing channel");
                                        routes.lock().unwrap().fail_all(&e);
                                        closed.store(true, Ordering::Release);
                                    }
                                    break;
                                }
                                None => {
                                    if !closed.load(Ordering::Acquire) {
                                        let err = GridError::Connection(
                                            "connection closed by server".to_string(),
                                        );
                                        routes.lock().unwrap().fail_all(&err);
                                        closed.store(true, Ordering::Release);
                                    }
                                    break;
                                }
                            }
                        }
                        _ = shutdown_rx.changed() => break,
                    }
                }
            });
        }

        Self {
            outbound,
            routes,
            request_timeout,
            closed,
            shutdown,
        }
    }

    async fn route_inbound(routes: &Arc<Mutex<RouteTable>>, envelope: Envelope) {
        let uid = envelope.uid;
        match envelope.kind {
            EnvelopeKind::Response => {
                let route = routes.lock().unwrap().routes.remove(&uid);
                match route {
                    Some(Route::Unary(tx)) => {
                        let _ = tx.send(Response::decode(envelope.body));
                    }
                    Some(Route::Stream(_)) => {
                        tracing::warn!(%uid, "unary response on a streaming exchange");
                    }
                    None => tracing::debug!(%uid, "response for unknown exchange"),
                }
            }
            EnvelopeKind::Data => {
                // Decoded and delivered without holding the lock across the
                // receiver's backpressure.
                let sender = {
                    let table = routes.lock().unwrap();
                    match table.routes.get(&uid) {
                        Some(Route::Stream(tx)) => Some(tx.clone()),
                        Some(Route::Unary(_)) => {
                            tracing::warn!(%uid, "stream data on a unary exchange");
                            None
                        }
                        None => {
                            tracing::debug!(%uid, "data for unknown exchange");
                            None
                        }
                    }
                };
                if let Some(tx) = sender {
                    if tx.send(Response::decode(envelope.body)).await.is_err() {
                        routes.lock().unwrap().routes.remove(&uid);
                    }
                }
            }
            EnvelopeKind::End => {
                routes.lock().unwrap().routes.remove(&uid);
            }
            EnvelopeKind::Error => {
                let message = String::from_utf8_lossy(&envelope.body).into_owned();
                let err = GridError::Server(message);
                let route = routes.lock().unwrap().routes.remove(&uid);
                match route {
                    Some(Route::Unary(tx)) => {
                        let _ = tx.send(Err(err));
                    }
                    Some(Route::Stream(tx)) => {
                        let _ = tx.send(Err(err)).await;
                    }
                    None => tracing::debug!(%uid, "error for unknown exchange"),
                }
            }
            EnvelopeKind::Request | EnvelopeKind::Cancel => {
                tracing::warn!(%uid, kind = ?envelope.kind, "unexpected inbound envelope kind");
            }
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(GridError::IllegalState(
                "channel is closed".to_string(),
            ));
        }
        Ok(())
    }

    async fn send_envelope(&self, envelope: Envelope) -> Result<()> {
        self.outbound
            .send(envelope)
            .await
            .map_err(|_| GridError::Connection("channel writer is gone".to_string()))
    }

    /// Returns the configured per-call deadline.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Returns `true` once the channel is closed or broken.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Issues a unary request and awaits its response under the per-call
    /// deadline.
    pub async fn invoke(&self, uid: Uuid, request: &Request) -> Result<Response> {
        self.check_open()?;

        let (tx, rx) = oneshot::channel();
        self.routes
            .lock()
            .unwrap()
            .routes
            .insert(uid, Route::Unary(tx));

        if let Err(e) = self
            .send_envelope(Envelope::new(uid, EnvelopeKind::Request, request.encode()))
            .await
        {
            self.routes.lock().unwrap().routes.remove(&uid);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(GridError::Connection(
                "channel closed before the response arrived".to_string(),
            )),
            Err(_) => {
                self.routes.lock().unwrap().routes.remove(&uid);
                Err(GridError::Timeout(format!(
                    "no response within {:?}",
                    self.request_timeout
                )))
            }
        }
    }

    /// Opens a server-stream: issues the request and returns the receiver of
    /// its elements. The stream ends when the receiver yields `None`.
    pub async fn open_stream(
        &self,
        uid: Uuid,
        request: &Request,
    ) -> Result<mpsc::Receiver<Result<Response>>> {
        self.check_open()?;

        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER);
        self.routes
            .lock()
            .unwrap()
            .routes
            .insert(uid, Route::Stream(tx));

        if let Err(e) = self
            .send_envelope(Envelope::new(uid, EnvelopeKind::Request, request.encode()))
            .await
        {
            self.routes.lock().unwrap().routes.remove(&uid);
            return Err(e);
        }
        Ok(rx)
    }

    /// Opens the event duplex: issues the INIT request and returns a writer
    /// for subsequent subscription requests plus the inbound receiver.
    pub async fn open_duplex(
        &self,
        uid: Uuid,
        init: &Request,
    ) -> Result<(DuplexHandle, mpsc::Receiver<Result<Response>>)> {
        let rx = self.open_stream(uid, init).await?;
        let handle = DuplexHandle {
            uid,
            outbound: self.outbound.clone(),
            routes: Arc::clone(&self.routes),
        };
        Ok((handle, rx))
    }

    /// Closes the channel. Every pending exchange fails with `Cancelled`.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let err = GridError::Cancelled("session closed".to_string());
        self.routes.lock().unwrap().fail_all(&err);
        let _ = self.shutdown.send(true);
        tracing::debug!("channel closed");
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Writer half of the event duplex.
///
/// Subscription requests travel as `Data` envelopes on the duplex's
/// transport id; [`cancel`](DuplexHandle::cancel) tears the duplex down.
#[derive(Clone)]
pub struct DuplexHandle {
    uid: Uuid,
    outbound: mpsc::Sender<Envelope>,
    routes: Arc<Mutex<RouteTable>>,
}

impl std::fmt::Debug for DuplexHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplexHandle").field("uid", &self.uid).finish()
    }
}

impl DuplexHandle {
    /// Sends a subscription request on the duplex.
    pub async fn send(&self, request: &Request) -> Result<()> {
        self.outbound
            .send(Envelope::new(self.uid, EnvelopeKind::Data, request.encode()))
            .await
            .map_err(|_| GridError::Connection("channel writer is gone".to_string()))
    }

    /// Cancels the duplex. The inbound receiver ends; no further messages
    /// are routed to it.
    pub async fn cancel(&self) {
        self.routes.lock().unwrap().routes.remove(&self.uid);
        let _ = self
            .outbound
            .send(Envelope::control(self.uid, EnvelopeKind::Cancel))
            .await;
    }
}
