//! Lazy page-by-page iteration over server-held collections.
//!
//! Key, entry, and value views iterate by chaining server pages: each page
//! is one server-stream whose first message carries the continuation cookie
//! and whose remaining messages are entries. An empty cookie ends the
//! sequence. The advancer is single-consumer; a fresh one is created per
//! iteration and exhausted advancers do not restart.

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use gridmap_core::protocol::{Response, StreamItem};
use gridmap_core::{GridError, Result, Serializer};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use crate::connection::Channel;
use crate::proxy::NamedCacheEntry;
use crate::request::RequestFactory;

/// Strategy driving one kind of paged iteration: which RPC loads a page and
/// how a buffered raw item becomes a user-visible value.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// The user-visible element type.
    type Item: Send;

    /// Issues the page RPC continuing from `cookie`.
    async fn load_page(&self, cookie: &Bytes) -> Result<mpsc::Receiver<Result<Response>>>;

    /// Extracts the continuation cookie from the first message of a page.
    fn extract_cookie(&self, first: Response) -> Result<Bytes> {
        match first {
            Response::Stream(StreamItem::Cookie { cookie }) => Ok(cookie),
            other => Err(GridError::Protocol(format!(
                "page stream began with message type {:#x} instead of a cookie envelope",
                other.message_type()
            ))),
        }
    }

    /// Converts a buffered raw page item into a user-visible value.
    fn materialize(&self, raw: Response) -> Result<Self::Item>;
}

/// Drives one server-stream page-by-page, yielding lazy sequence elements.
///
/// Concurrent `next` calls are not supported; the `&mut self` receiver
/// enforces the single-consumer contract.
pub struct PageAdvancer<S: PageSource> {
    source: S,
    buffer: VecDeque<Response>,
    cookie: Bytes,
    exhausted: bool,
    page_timeout: Duration,
}

impl<S: PageSource> std::fmt::Debug for PageAdvancer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageAdvancer")
            .field("buffered", &self.buffer.len())
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

impl<S: PageSource> PageAdvancer<S> {
    /// Creates an advancer positioned before the first page.
    pub fn new(source: S, page_timeout: Duration) -> Self {
        Self {
            source,
            buffer: VecDeque::new(),
            cookie: Bytes::new(),
            exhausted: false,
            page_timeout,
        }
    }

    /// Returns the next element, fetching further pages as needed.
    ///
    /// Yields `None` once the server returns an empty continuation cookie
    /// and the buffer drains.
    pub async fn next(&mut self) -> Result<Option<S::Item>> {
        loop {
            if let Some(raw) = self.buffer.pop_front() {
                return self.source.materialize(raw).map(Some);
            }
            if self.exhausted {
                return Ok(None);
            }
            self.load_next_page().await?;
        }
    }

    /// Collects every remaining element.
    pub async fn collect(mut self) -> Result<Vec<S::Item>> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await? {
            items.push(item);
        }
        Ok(items)
    }

    async fn load_next_page(&mut self) -> Result<()> {
        let (cookie, items) = tokio::time::timeout(self.page_timeout, self.consume_page())
            .await
            .map_err(|_| {
                GridError::Timeout(format!("no complete page within {:?}", self.page_timeout))
            })??;

        self.exhausted = cookie.is_empty();
        self.cookie = cookie;
        self.buffer.extend(items);
        Ok(())
    }

    /// Consumes one page stream to completion. Entries stay local until the
    /// stream ends cleanly, so a transport error discards the partial page.
    async fn consume_page(&self) -> Result<(Bytes, Vec<Response>)> {
        let mut rx = self.source.load_page(&self.cookie).await?;
        let mut cookie: Option<Bytes> = None;
        let mut items = Vec::new();

        while let Some(message) = rx.recv().await {
            let message = message?;
            match cookie {
                None => cookie = Some(self.source.extract_cookie(message)?),
                Some(_) => items.push(message),
            }
        }

        let Some(cookie) = cookie else {
            return Err(GridError::Protocol(
                "page stream ended before its cookie envelope".to_string(),
            ));
        };
        Ok((cookie, items))
    }
}

/// Page source yielding the map's keys.
pub struct KeyPageSource<K> {
    channel: Arc<Channel>,
    factory: Arc<RequestFactory>,
    serializer: Serializer,
    _phantom: PhantomData<fn() -> K>,
}

impl<K> KeyPageSource<K> {
    pub(crate) fn new(
        channel: Arc<Channel>,
        factory: Arc<RequestFactory>,
        serializer: Serializer,
    ) -> Self {
        Self {
            channel,
            factory,
            serializer,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<K> PageSource for KeyPageSource<K>
where
    K: DeserializeOwned + Send + Sync,
{
    type Item = K;

    async fn load_page(&self, cookie: &Bytes) -> Result<mpsc::Receiver<Result<Response>>> {
        let request = self.factory.next_key_page(cookie.clone());
        self.channel.open_stream(request.uid, &request.message).await
    }

    fn materialize(&self, raw: Response) -> Result<K> {
        match raw {
            Response::Stream(StreamItem::Datum { bytes }) => self.serializer.deserialize(&bytes),
            other => Err(GridError::Protocol(format!(
                "key page carried message type {:#x}",
                other.message_type()
            ))),
        }
    }
}

/// Page source yielding lazily-deserialized entries.
pub struct EntryPageSource<K, V> {
    channel: Arc<Channel>,
    factory: Arc<RequestFactory>,
    serializer: Serializer,
    _phantom: PhantomData<fn() -> (K, V)>,
}

impl<K, V> EntryPageSource<K, V> {
    pub(crate) fn new(
        channel: Arc<Channel>,
        factory: Arc<RequestFactory>,
        serializer: Serializer,
    ) -> Self {
        Self {
            channel,
            factory,
            serializer,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<K, V> PageSource for EntryPageSource<K, V>
where
    K: DeserializeOwned + Send + Sync,
    V: DeserializeOwned + Send + Sync,
{
    type Item = NamedCacheEntry<K, V>;

    async fn load_page(&self, cookie: &Bytes) -> Result<mpsc::Receiver<Result<Response>>> {
        let request = self.factory.next_entry_page(cookie.clone());
        self.channel.open_stream(request.uid, &request.message).await
    }

    fn materialize(&self, raw: Response) -> Result<NamedCacheEntry<K, V>> {
        match raw {
            Response::Stream(StreamItem::Entry { key, value }) => {
                Ok(NamedCacheEntry::new(key, value, self.serializer.clone()))
            }
            other => Err(GridError::Protocol(format!(
                "entry page carried message type {:#x}",
                other.message_type()
            ))),
        }
    }
}

/// Page source yielding the map's values, discarding keys.
pub struct ValuePageSource<V> {
    channel: Arc<Channel>,
    factory: Arc<RequestFactory>,
    serializer: Serializer,
    _phantom: PhantomData<fn() -> V>,
}

impl<V> ValuePageSource<V> {
    pub(crate) fn new(
        channel: Arc<Channel>,
        factory: Arc<RequestFactory>,
        serializer: Serializer,
    ) -> Self {
        Self {
            channel,
            factory,
            serializer,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<V> PageSource for ValuePageSource<V>
where
    V: DeserializeOwned + Send + Sync,
{
    type Item = V;

    async fn load_page(&self, cookie: &Bytes) -> Result<mpsc::Receiver<Result<Response>>> {
        let request = self.factory.next_entry_page(cookie.clone());
        self.channel.open_stream(request.uid, &request.message).await
    }

    fn materialize(&self, raw: Response) -> Result<V> {
        match raw {
            Response::Stream(StreamItem::Entry { key: _, value }) => {
                self.serializer.deserialize(&value)
            }
            other => Err(GridError::Protocol(format!(
                "entry page carried message type {:#x}",
                other.message_type()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A scripted source: each call to `load_page` produces the next page
    /// of the script and records the cookie it was called with.
    struct ScriptedSource {
        pages: Vec<Vec<Result<Response>>>,
        calls: AtomicUsize,
        cookies_seen: std::sync::Mutex<Vec<Bytes>>,
    }

    impl ScriptedSource {
        fn new(pages: Vec<Vec<Result<Response>>>) -> Self {
            Self {
                pages,
                calls: AtomicUsize::new(0),
                cookies_seen: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    fn cookie(value: &'static [u8]) -> Result<Response> {
        Ok(Response::Stream(StreamItem::Cookie {
            cookie: Bytes::from_static(value),
        }))
    }

    fn datum(value: &'static [u8]) -> Result<Response> {
        Ok(Response::Stream(StreamItem::Datum {
            bytes: Bytes::from_static(value),
        }))
    }

    #[async_trait]
    impl PageSource for ScriptedSource {
        type Item = String;

        async fn load_page(&self, cookie: &Bytes) -> Result<mpsc::Receiver<Result<Response>>> {
            self.cookies_seen.lock().unwrap().push(cookie.clone());
            let index = self.calls.fetch_add(1, Ordering::SeqCst);
            let page = self.pages.get(index).cloned().unwrap_or_default();
            let (tx, rx) = mpsc::channel(16);
            tokio::spawn(async move {
                for message in page {
                    if tx.send(message).await.is_err() {
                        break;
                    }
                }
            });
            Ok(rx)
        }

        fn materialize(&self, raw: Response) -> Result<String> {
            match raw {
                Response::Stream(StreamItem::Datum { bytes }) => {
                    Serializer::json().deserialize(&bytes)
                }
                other => Err(GridError::Protocol(format!(
                    "unexpected item {:#x}",
                    other.message_type()
                ))),
            }
        }
    }

    fn advancer(pages: Vec<Vec<Result<Response>>>) -> PageAdvancer<ScriptedSource> {
        PageAdvancer::new(ScriptedSource::new(pages), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_two_pages_chain_transparently() {
        let mut advancer = advancer(vec![
            vec![cookie(b"a"), datum(b"\"e1\""), datum(b"\"e2\"")],
            vec![cookie(b""), datum(b"\"e3\"")],
        ]);

        assert_eq!(advancer.next().await.unwrap(), Some("e1".to_string()));
        assert_eq!(advancer.next().await.unwrap(), Some("e2".to_string()));
        assert_eq!(advancer.next().await.unwrap(), Some("e3".to_string()));
        assert_eq!(advancer.next().await.unwrap(), None);
        // Exhaustion is terminal.
        assert_eq!(advancer.next().await.unwrap(), None);

        assert_eq!(advancer.source.calls.load(Ordering::SeqCst), 2);
        let cookies = advancer.source.cookies_seen.lock().unwrap();
        assert_eq!(*cookies, vec![Bytes::new(), Bytes::from_static(b"a")]);
    }

    #[tokio::test]
    async fn test_cookie_only_page_advances_to_next() {
        let mut advancer = advancer(vec![
            vec![cookie(b"a")],
            vec![cookie(b""), datum(b"\"e1\"")],
        ]);

        assert_eq!(advancer.next().await.unwrap(), Some("e1".to_string()));
        assert_eq!(advancer.next().await.unwrap(), None);
        assert_eq!(advancer.source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_first_cookie_terminates_after_one_page() {
        let mut advancer = advancer(vec![vec![cookie(b"")]]);
        assert_eq!(advancer.next().await.unwrap(), None);
        assert_eq!(advancer.source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transport_error_discards_partial_page() {
        let mut advancer = advancer(vec![vec![
            cookie(b"a"),
            datum(b"\"e1\""),
            Err(GridError::Connection("reset".to_string())),
        ]]);

        assert!(matches!(
            advancer.next().await,
            Err(GridError::Connection(_))
        ));
        assert!(advancer.buffer.is_empty());
    }

    #[tokio::test]
    async fn test_page_without_cookie_envelope_is_protocol_error() {
        let mut advancer = advancer(vec![vec![]]);
        assert!(matches!(
            advancer.next().await,
            Err(GridError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_entries_before_cookie_are_rejected() {
        let mut advancer = advancer(vec![vec![datum(b"\"e1\""), cookie(b"")]]);
        assert!(matches!(
            advancer.next().await,
            Err(GridError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_collect_gathers_all_pages() {
        let advancer = advancer(vec![
            vec![cookie(b"x"), datum(b"\"a\"")],
            vec![cookie(b"y"), datum(b"\"b\"")],
            vec![cookie(b""), datum(b"\"c\"")],
        ]);
        let items = advancer.collect().await.unwrap();
        assert_eq!(items, vec!["a", "b", "c"]);
    }
}
