//! Construction of request records.
//!
//! Every request that expects an ack or response is stamped with a fresh
//! correlation uuid here and nowhere else; a uid is never reused while its
//! exchange is outstanding. Filter subscriptions additionally carry a
//! client-chosen filter id allocated from a per-map counter, which the server
//! echoes in acks and events.

use std::sync::atomic::{AtomicI64, Ordering};

use bytes::Bytes;
use gridmap_core::protocol::{
    ListenerRequest, ListenerRequestType, ListenerTarget, Request,
};
use uuid::Uuid;

/// A request record paired with its correlation id.
#[derive(Debug, Clone)]
pub struct GridRequest {
    /// The correlation id the response or ack will carry.
    pub uid: Uuid,
    /// The typed request message.
    pub message: Request,
}

impl GridRequest {
    fn new(message: Request) -> Self {
        Self {
            uid: Uuid::new_v4(),
            message,
        }
    }
}

/// Builds typed request records for one map.
#[derive(Debug)]
pub struct RequestFactory {
    scope: String,
    cache: String,
    next_filter_id: AtomicI64,
}

impl RequestFactory {
    /// Creates a factory for the given scope and cache.
    pub fn new(scope: impl Into<String>, cache: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            cache: cache.into(),
            next_filter_id: AtomicI64::new(1),
        }
    }

    /// Returns the cache name requests are addressed to.
    pub fn cache(&self) -> &str {
        &self.cache
    }

    /// Allocates the next client-chosen filter id.
    pub fn next_filter_id(&self) -> i64 {
        self.next_filter_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Builds a `get` request.
    pub fn get(&self, key: Bytes) -> GridRequest {
        GridRequest::new(Request::Get {
            cache: self.cache.clone(),
            key,
        })
    }

    /// Builds a `put` request.
    pub fn put(&self, key: Bytes, value: Bytes) -> GridRequest {
        GridRequest::new(Request::Put {
            cache: self.cache.clone(),
            key,
            value,
        })
    }

    /// Builds a `remove` request.
    pub fn remove(&self, key: Bytes) -> GridRequest {
        GridRequest::new(Request::Remove {
            cache: self.cache.clone(),
            key,
        })
    }

    /// Builds a conditional remove matching both key and value.
    pub fn remove_mapping(&self, key: Bytes, value: Bytes) -> GridRequest {
        GridRequest::new(Request::RemoveMapping {
            cache: self.cache.clone(),
            key,
            value,
        })
    }

    /// Builds a `containsKey` request.
    pub fn contains_key(&self, key: Bytes) -> GridRequest {
        GridRequest::new(Request::ContainsKey {
            cache: self.cache.clone(),
            key,
        })
    }

    /// Builds a `size` request.
    pub fn size(&self) -> GridRequest {
        GridRequest::new(Request::Size {
            cache: self.cache.clone(),
        })
    }

    /// Builds a `clear` request.
    pub fn clear(&self) -> GridRequest {
        GridRequest::new(Request::Clear {
            cache: self.cache.clone(),
        })
    }

    /// Builds a `truncate` request.
    pub fn truncate(&self) -> GridRequest {
        GridRequest::new(Request::Truncate {
            cache: self.cache.clone(),
        })
    }

    /// Builds a `destroy` request.
    pub fn destroy(&self) -> GridRequest {
        GridRequest::new(Request::Destroy {
            cache: self.cache.clone(),
        })
    }

    /// Builds an `invoke` request against one key.
    pub fn invoke(&self, key: Bytes, processor: Bytes) -> GridRequest {
        GridRequest::new(Request::Invoke {
            cache: self.cache.clone(),
            key,
            processor,
        })
    }

    /// Builds an `invokeAll` request against a key set or filter.
    pub fn invoke_all(
        &self,
        keys: Vec<Bytes>,
        filter: Option<Bytes>,
        processor: Bytes,
    ) -> GridRequest {
        GridRequest::new(Request::InvokeAll {
            cache: self.cache.clone(),
            keys,
            filter,
            processor,
        })
    }

    /// Builds an `aggregate` request against a key set or filter.
    pub fn aggregate(
        &self,
        keys: Vec<Bytes>,
        filter: Option<Bytes>,
        aggregator: Bytes,
    ) -> GridRequest {
        GridRequest::new(Request::Aggregate {
            cache: self.cache.clone(),
            keys,
            filter,
            aggregator,
        })
    }

    /// Builds a key-page request continuing from `cookie`.
    pub fn next_key_page(&self, cookie: Bytes) -> GridRequest {
        GridRequest::new(Request::NextKeyPage {
            cache: self.cache.clone(),
            cookie,
        })
    }

    /// Builds an entry-page request continuing from `cookie`.
    pub fn next_entry_page(&self, cookie: Bytes) -> GridRequest {
        GridRequest::new(Request::NextEntryPage {
            cache: self.cache.clone(),
            cookie,
        })
    }

    /// Builds a filtered values query.
    pub fn values(&self, filter: Bytes) -> GridRequest {
        GridRequest::new(Request::Values {
            cache: self.cache.clone(),
            filter,
        })
    }

    /// Builds a filtered entries query.
    pub fn entries(&self, filter: Bytes) -> GridRequest {
        GridRequest::new(Request::Entries {
            cache: self.cache.clone(),
            filter,
        })
    }

    /// Builds the INIT request opening the event stream.
    pub fn init_events(&self) -> GridRequest {
        let uid = Uuid::new_v4();
        GridRequest {
            uid,
            message: Request::Listener(ListenerRequest {
                uid,
                scope: self.scope.clone(),
                cache: self.cache.clone(),
                request_type: ListenerRequestType::Init,
                subscribe: false,
                lite: false,
                target: ListenerTarget::None,
            }),
        }
    }

    /// Builds a key (un)subscription request.
    pub fn key_subscription(&self, key: Bytes, subscribe: bool, lite: bool) -> GridRequest {
        let uid = Uuid::new_v4();
        GridRequest {
            uid,
            message: Request::Listener(ListenerRequest {
                uid,
                scope: self.scope.clone(),
                cache: self.cache.clone(),
                request_type: if subscribe {
                    ListenerRequestType::Subscribe
                } else {
                    ListenerRequestType::Unsubscribe
                },
                subscribe,
                lite,
                target: ListenerTarget::Key(key),
            }),
        }
    }

    /// Builds a filter (un)subscription request carrying the client-chosen
    /// filter id.
    pub fn filter_subscription(
        &self,
        filter: Bytes,
        filter_id: i64,
        subscribe: bool,
        lite: bool,
    ) -> GridRequest {
        let uid = Uuid::new_v4();
        GridRequest {
            uid,
            message: Request::Listener(ListenerRequest {
                uid,
                scope: self.scope.clone(),
                cache: self.cache.clone(),
                request_type: if subscribe {
                    ListenerRequestType::Subscribe
                } else {
                    ListenerRequestType::Unsubscribe
                },
                subscribe,
                lite,
                target: ListenerTarget::Filter { filter, filter_id },
            }),
        }
    }
}
