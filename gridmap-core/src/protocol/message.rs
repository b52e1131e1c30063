//! Typed request and response records of the NamedMap protocol.
//!
//! These records are what the request factory produces and what the channel
//! reader decodes. Keys, values, filters, processors, and aggregators are
//! opaque serialized blobs at this layer; the serializer gives them meaning.

use bytes::Bytes;
use uuid::Uuid;

use super::constants::*;
use super::data::{DataReader, DataWriter};
use crate::error::{GridError, Result};

/// The kind of an entry event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventId {
    /// An entry was added to the map.
    Inserted = 1,
    /// An existing entry was updated.
    Updated = 2,
    /// An entry was removed from the map.
    Deleted = 3,
}

impl EventId {
    /// Creates an event id from its wire value.
    pub fn from_value(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Inserted),
            2 => Some(Self::Updated),
            3 => Some(Self::Deleted),
            _ => None,
        }
    }

    /// Returns the wire value for this event id.
    pub fn value(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inserted => write!(f, "INSERTED"),
            Self::Updated => write!(f, "UPDATED"),
            Self::Deleted => write!(f, "DELETED"),
        }
    }
}

/// The type of an event-stream control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ListenerRequestType {
    /// Open the event stream.
    Init = LISTENER_INIT,
    /// Register a subscription target.
    Subscribe = LISTENER_SUBSCRIBE,
    /// Deregister a subscription target.
    Unsubscribe = LISTENER_UNSUBSCRIBE,
}

impl ListenerRequestType {
    /// Creates a request type from its wire value.
    pub fn from_value(value: u8) -> Option<Self> {
        match value {
            LISTENER_INIT => Some(Self::Init),
            LISTENER_SUBSCRIBE => Some(Self::Subscribe),
            LISTENER_UNSUBSCRIBE => Some(Self::Unsubscribe),
            _ => None,
        }
    }

    /// Returns the wire value for this request type.
    pub fn value(self) -> u8 {
        self as u8
    }
}

/// The target of a subscription request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerTarget {
    /// No target; valid only for INIT.
    None,
    /// A single serialized key.
    Key(Bytes),
    /// A serialized filter expression with its client-chosen id.
    Filter {
        /// The serialized filter expression.
        filter: Bytes,
        /// The client-chosen filter id the server echoes in acks and events.
        filter_id: i64,
    },
}

/// A control message on the event duplex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerRequest {
    /// Correlation id for the ack; unique per request.
    pub uid: Uuid,
    /// The scope the cache lives in.
    pub scope: String,
    /// The cache name.
    pub cache: String,
    /// INIT, SUBSCRIBE, or UNSUBSCRIBE.
    pub request_type: ListenerRequestType,
    /// `true` to subscribe, `false` to unsubscribe; ignored for INIT.
    pub subscribe: bool,
    /// `true` to omit old/new values from delivered events.
    pub lite: bool,
    /// The key or filter being (un)subscribed.
    pub target: ListenerTarget,
}

impl ListenerRequest {
    fn encode(&self, w: &mut DataWriter) {
        w.put_uuid(self.uid);
        w.put_string(&self.scope);
        w.put_string(&self.cache);
        w.put_u8(self.request_type.value());
        w.put_bool(self.subscribe);
        w.put_bool(self.lite);
        match &self.target {
            ListenerTarget::None => w.put_u8(0),
            ListenerTarget::Key(key) => {
                w.put_u8(1);
                w.put_bytes(key);
            }
            ListenerTarget::Filter { filter, filter_id } => {
                w.put_u8(2);
                w.put_bytes(filter);
                w.put_i64(*filter_id);
            }
        }
    }

    fn decode(r: &mut DataReader) -> Result<Self> {
        let uid = r.get_uuid()?;
        let scope = r.get_string()?;
        let cache = r.get_string()?;
        let type_value = r.get_u8()?;
        let request_type = ListenerRequestType::from_value(type_value).ok_or_else(|| {
            GridError::Protocol(format!("unknown listener request type {}", type_value))
        })?;
        let subscribe = r.get_bool()?;
        let lite = r.get_bool()?;
        let target = match r.get_u8()? {
            0 => ListenerTarget::None,
            1 => ListenerTarget::Key(r.get_bytes()?),
            2 => ListenerTarget::Filter {
                filter: r.get_bytes()?,
                filter_id: r.get_i64()?,
            },
            other => {
                return Err(GridError::Protocol(format!(
                    "unknown listener target tag {}",
                    other
                )))
            }
        };
        Ok(Self {
            uid,
            scope,
            cache,
            request_type,
            subscribe,
            lite,
            target,
        })
    }
}

/// A request record addressed to the NamedMap service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Get the value mapped to `key`.
    Get {
        /// Cache name.
        cache: String,
        /// Serialized key.
        key: Bytes,
    },
    /// Map `key` to `value`, returning the prior value.
    Put {
        /// Cache name.
        cache: String,
        /// Serialized key.
        key: Bytes,
        /// Serialized value.
        value: Bytes,
    },
    /// Remove `key`, returning the prior value.
    Remove {
        /// Cache name.
        cache: String,
        /// Serialized key.
        key: Bytes,
    },
    /// Remove `key` only if currently mapped to `value`.
    RemoveMapping {
        /// Cache name.
        cache: String,
        /// Serialized key.
        key: Bytes,
        /// Serialized expected value.
        value: Bytes,
    },
    /// Test for presence of `key`.
    ContainsKey {
        /// Cache name.
        cache: String,
        /// Serialized key.
        key: Bytes,
    },
    /// Number of entries.
    Size {
        /// Cache name.
        cache: String,
    },
    /// Remove all entries.
    Clear {
        /// Cache name.
        cache: String,
    },
    /// Remove all entries without per-entry events.
    Truncate {
        /// Cache name.
        cache: String,
    },
    /// Release the map on the server.
    Destroy {
        /// Cache name.
        cache: String,
    },
    /// Invoke an entry processor against one key.
    Invoke {
        /// Cache name.
        cache: String,
        /// Serialized key.
        key: Bytes,
        /// Serialized processor expression.
        processor: Bytes,
    },
    /// Invoke an entry processor against a key set or filter.
    InvokeAll {
        /// Cache name.
        cache: String,
        /// Serialized keys; empty when `filter` drives selection.
        keys: Vec<Bytes>,
        /// Serialized filter expression, if selection is filter-driven.
        filter: Option<Bytes>,
        /// Serialized processor expression.
        processor: Bytes,
    },
    /// Run an aggregator against a key set or filter.
    Aggregate {
        /// Cache name.
        cache: String,
        /// Serialized keys; empty when `filter` drives selection.
        keys: Vec<Bytes>,
        /// Serialized filter expression, if selection is filter-driven.
        filter: Option<Bytes>,
        /// Serialized aggregator expression.
        aggregator: Bytes,
    },
    /// Fetch the next page of keys.
    NextKeyPage {
        /// Cache name.
        cache: String,
        /// Continuation cookie; empty for the first page.
        cookie: Bytes,
    },
    /// Fetch the next page of entries.
    NextEntryPage {
        /// Cache name.
        cache: String,
        /// Continuation cookie; empty for the first page.
        cookie: Bytes,
    },
    /// Stream all values matching `filter`.
    Values {
        /// Cache name.
        cache: String,
        /// Serialized filter expression.
        filter: Bytes,
    },
    /// Stream all entries matching `filter`.
    Entries {
        /// Cache name.
        cache: String,
        /// Serialized filter expression.
        filter: Bytes,
    },
    /// Event-stream control message.
    Listener(ListenerRequest),
}

impl Request {
    /// Returns the message type constant for this request.
    pub fn message_type(&self) -> u8 {
        match self {
            Self::Get { .. } => REQ_GET,
            Self::Put { .. } => REQ_PUT,
            Self::Remove { .. } => REQ_REMOVE,
            Self::RemoveMapping { .. } => REQ_REMOVE_MAPPING,
            Self::ContainsKey { .. } => REQ_CONTAINS_KEY,
            Self::Size { .. } => REQ_SIZE,
            Self::Clear { .. } => REQ_CLEAR,
            Self::Truncate { .. } => REQ_TRUNCATE,
            Self::Destroy { .. } => REQ_DESTROY,
            Self::Invoke { .. } => REQ_INVOKE,
            Self::InvokeAll { .. } => REQ_INVOKE_ALL,
            Self::Aggregate { .. } => REQ_AGGREGATE,
            Self::NextKeyPage { .. } => REQ_NEXT_KEY_PAGE,
            Self::NextEntryPage { .. } => REQ_NEXT_ENTRY_PAGE,
            Self::Values { .. } => REQ_VALUES,
            Self::Entries { .. } => REQ_ENTRIES,
            Self::Listener(_) => REQ_LISTENER,
        }
    }

    /// Encodes this request into a message body.
    pub fn encode(&self) -> Bytes {
        let mut w = DataWriter::new();
        w.put_u8(self.message_type());
        match self {
            Self::Get { cache, key }
            | Self::Remove { cache, key }
            | Self::ContainsKey { cache, key } => {
                w.put_string(cache);
                w.put_bytes(key);
            }
            Self::Put { cache, key, value } | Self::RemoveMapping { cache, key, value } => {
                w.put_string(cache);
                w.put_bytes(key);
                w.put_bytes(value);
            }
            Self::Size { cache }
            | Self::Clear { cache }
            | Self::Truncate { cache }
            | Self::Destroy { cache } => {
                w.put_string(cache);
            }
            Self::Invoke {
                cache,
                key,
                processor,
            } => {
                w.put_string(cache);
                w.put_bytes(key);
                w.put_bytes(processor);
            }
            Self::InvokeAll {
                cache,
                keys,
                filter,
                processor,
            } => {
                w.put_string(cache);
                w.put_bytes_list(keys);
                w.put_opt_bytes(filter.as_deref());
                w.put_bytes(processor);
            }
            Self::Aggregate {
                cache,
                keys,
                filter,
                aggregator,
            } => {
                w.put_string(cache);
                w.put_bytes_list(keys);
                w.put_opt_bytes(filter.as_deref());
                w.put_bytes(aggregator);
            }
            Self::NextKeyPage { cache, cookie } | Self::NextEntryPage { cache, cookie } => {
                w.put_string(cache);
                w.put_bytes(cookie);
            }
            Self::Values { cache, filter } | Self::Entries { cache, filter } => {
                w.put_string(cache);
                w.put_bytes(filter);
            }
            Self::Listener(req) => req.encode(&mut w),
        }
        w.finish()
    }

    /// Decodes a request from a message body.
    pub fn decode(body: Bytes) -> Result<Self> {
        let mut r = DataReader::new(body);
        let message_type = r.get_u8()?;
        let request = match message_type {
            REQ_GET => Self::Get {
                cache: r.get_string()?,
                key: r.get_bytes()?,
            },
            REQ_PUT => Self::Put {
                cache: r.get_string()?,
                key: r.get_bytes()?,
                value: r.get_bytes()?,
            },
            REQ_REMOVE => Self::Remove {
                cache: r.get_string()?,
                key: r.get_bytes()?,
            },
            REQ_REMOVE_MAPPING => Self::RemoveMapping {
                cache: r.get_string()?,
                key: r.get_bytes()?,
                value: r.get_bytes()?,
            },
            REQ_CONTAINS_KEY => Self::ContainsKey {
                cache: r.get_string()?,
                key: r.get_bytes()?,
            },
            REQ_SIZE => Self::Size {
                cache: r.get_string()?,
            },
            REQ_CLEAR => Self::Clear {
                cache: r.get_string()?,
            },
            REQ_TRUNCATE => Self::Truncate {
                cache: r.get_string()?,
            },
            REQ_DESTROY => Self::Destroy {
                cache: r.get_string()?,
            },
            REQ_INVOKE => Self::Invoke {
                cache: r.get_string()?,
                key: r.get_bytes()?,
                processor: r.get_bytes()?,
            },
            REQ_INVOKE_ALL => Self::InvokeAll {
                cache: r.get_string()?,
                keys: r.get_bytes_list()?,
                filter: r.get_opt_bytes()?,
                processor: r.get_bytes()?,
            },
            REQ_AGGREGATE => Self::Aggregate {
                cache: r.get_string()?,
                keys: r.get_bytes_list()?,
                filter: r.get_opt_bytes()?,
                aggregator: r.get_bytes()?,
            },
            REQ_NEXT_KEY_PAGE => Self::NextKeyPage {
                cache: r.get_string()?,
                cookie: r.get_bytes()?,
            },
            REQ_NEXT_ENTRY_PAGE => Self::NextEntryPage {
                cache: r.get_string()?,
                cookie: r.get_bytes()?,
            },
            REQ_VALUES => Self::Values {
                cache: r.get_string()?,
                filter: r.get_bytes()?,
            },
            REQ_ENTRIES => Self::Entries {
                cache: r.get_string()?,
                filter: r.get_bytes()?,
            },
            REQ_LISTENER => Self::Listener(ListenerRequest::decode(&mut r)?),
            other => {
                return Err(GridError::Protocol(format!(
                    "unknown request type {:#x}",
                    other
                )))
            }
        };
        Ok(request)
    }
}

/// One element of a page stream or filtered query stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    /// The continuation cookie heading every page stream. An empty cookie
    /// means no further pages exist.
    Cookie {
        /// The opaque continuation token.
        cookie: Bytes,
    },
    /// A single serialized blob: a key in key pages, a value in value
    /// queries.
    Datum {
        /// The serialized blob.
        bytes: Bytes,
    },
    /// A serialized key/value pair.
    Entry {
        /// The serialized key.
        key: Bytes,
        /// The serialized value.
        value: Bytes,
    },
}

/// An entry event delivered on the event duplex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapEventMessage {
    /// The cache the event belongs to.
    pub cache: String,
    /// INSERTED, UPDATED, or DELETED.
    pub id: EventId,
    /// The serialized key of the affected entry.
    pub key: Bytes,
    /// The serialized old value; absent for lite events and inserts.
    pub old_value: Option<Bytes>,
    /// The serialized new value; absent for lite events and deletes.
    pub new_value: Option<Bytes>,
    /// Ids of the server-side filters this event matched.
    pub filter_ids: Vec<i64>,
    /// `true` when the event was produced by the server itself rather than a
    /// client mutation, such as an eviction.
    pub synthetic: bool,
}

/// A message delivered on the event duplex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerResponse {
    /// Subscription acknowledged.
    Subscribed {
        /// Correlation id of the acknowledged request.
        uid: Uuid,
    },
    /// Unsubscription acknowledged.
    Unsubscribed {
        /// Correlation id of the acknowledged request.
        uid: Uuid,
    },
    /// The map was destroyed on the server.
    Destroyed {
        /// The destroyed cache's name.
        cache: String,
    },
    /// The map was truncated on the server.
    Truncated {
        /// The truncated cache's name.
        cache: String,
    },
    /// An entry event.
    Event(MapEventMessage),
}

/// A response record from the NamedMap service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Bare acknowledgement.
    Ack,
    /// An optional value blob.
    Value {
        /// The serialized value, if one existed.
        value: Option<Bytes>,
    },
    /// A boolean result.
    Flag {
        /// The result.
        value: bool,
    },
    /// An unsigned count.
    Count {
        /// The result.
        value: u64,
    },
    /// A list of serialized key/value pairs.
    EntryList {
        /// The entries.
        entries: Vec<(Bytes, Bytes)>,
    },
    /// One element of a page or query stream.
    Stream(StreamItem),
    /// A message on the event duplex.
    Listener(ListenerResponse),
}

impl Response {
    /// Returns the message type constant for this response.
    pub fn message_type(&self) -> u8 {
        match self {
            Self::Ack => RESP_ACK,
            Self::Value { .. } => RESP_VALUE,
            Self::Flag { .. } => RESP_FLAG,
            Self::Count { .. } => RESP_COUNT,
            Self::EntryList { .. } => RESP_ENTRY_LIST,
            Self::Stream(StreamItem::Cookie { .. }) => RESP_COOKIE,
            Self::Stream(StreamItem::Datum { .. }) => RESP_DATUM,
            Self::Stream(StreamItem::Entry { .. }) => RESP_ENTRY,
            Self::Listener(ListenerResponse::Subscribed { .. }) => RESP_SUBSCRIBED,
            Self::Listener(ListenerResponse::Unsubscribed { .. }) => RESP_UNSUBSCRIBED,
            Self::Listener(ListenerResponse::Destroyed { .. }) => RESP_DESTROYED,
            Self::Listener(ListenerResponse::Truncated { .. }) => RESP_TRUNCATED,
            Self::Listener(ListenerResponse::Event(_)) => RESP_EVENT,
        }
    }

    /// Encodes this response into a message body.
    pub fn encode(&self) -> Bytes {
        let mut w = DataWriter::new();
        w.put_u8(self.message_type());
        match self {
            Self::Ack => {}
            Self::Value { value } => w.put_opt_bytes(value.as_deref()),
            Self::Flag { value } => w.put_bool(*value),
            Self::Count { value } => w.put_u64(*value),
            Self::EntryList { entries } => {
                w.put_u32(entries.len() as u32);
                for (key, value) in entries {
                    w.put_bytes(key);
                    w.put_bytes(value);
                }
            }
            Self::Stream(StreamItem::Cookie { cookie }) => w.put_bytes(cookie),
            Self::Stream(StreamItem::Datum { bytes }) => w.put_bytes(bytes),
            Self::Stream(StreamItem::Entry { key, value }) => {
                w.put_bytes(key);
                w.put_bytes(value);
            }
            Self::Listener(ListenerResponse::Subscribed { uid })
            | Self::Listener(ListenerResponse::Unsubscribed { uid }) => w.put_uuid(*uid),
            Self::Listener(ListenerResponse::Destroyed { cache })
            | Self::Listener(ListenerResponse::Truncated { cache }) => w.put_string(cache),
            Self::Listener(ListenerResponse::Event(event)) => {
                w.put_string(&event.cache);
                w.put_u8(event.id.value());
                w.put_bytes(&event.key);
                w.put_opt_bytes(event.old_value.as_deref());
                w.put_opt_bytes(event.new_value.as_deref());
                w.put_i64_list(&event.filter_ids);
                w.put_bool(event.synthetic);
            }
        }
        w.finish()
    }

    /// Decodes a response from a message body.
    pub fn decode(body: Bytes) -> Result<Self> {
        let mut r = DataReader::new(body);
        let message_type = r.get_u8()?;
        let response = match message_type {
            RESP_ACK => Self::Ack,
            RESP_VALUE => Self::Value {
                value: r.get_opt_bytes()?,
            },
            RESP_FLAG => Self::Flag {
                value: r.get_bool()?,
            },
            RESP_COUNT => Self::Count {
                value: r.get_u64()?,
            },
            RESP_ENTRY_LIST => {
                let len = r.get_u32()? as usize;
                let mut entries = Vec::with_capacity(len.min(1024));
                for _ in 0..len {
                    entries.push((r.get_bytes()?, r.get_bytes()?));
                }
                Self::EntryList { entries }
            }
            RESP_COOKIE => Self::Stream(StreamItem::Cookie {
                cookie: r.get_bytes()?,
            }),
            RESP_DATUM => Self::Stream(StreamItem::Datum {
                bytes: r.get_bytes()?,
            }),
            RESP_ENTRY => Self::Stream(StreamItem::Entry {
                key: r.get_bytes()?,
                value: r.get_bytes()?,
            }),
            RESP_SUBSCRIBED => Self::Listener(ListenerResponse::Subscribed {
                uid: r.get_uuid()?,
            }),
            RESP_UNSUBSCRIBED => Self::Listener(ListenerResponse::Unsubscribed {
                uid: r.get_uuid()?,
            }),
            RESP_DESTROYED => Self::Listener(ListenerResponse::Destroyed {
                cache: r.get_string()?,
            }),
            RESP_TRUNCATED => Self::Listener(ListenerResponse::Truncated {
                cache: r.get_string()?,
            }),
            RESP_EVENT => {
                let cache = r.get_string()?;
                let id_value = r.get_u8()?;
                let id = EventId::from_value(id_value).ok_or_else(|| {
                    GridError::Protocol(format!("unknown event id {}", id_value))
                })?;
                Self::Listener(ListenerResponse::Event(MapEventMessage {
                    cache,
                    id,
                    key: r.get_bytes()?,
                    old_value: r.get_opt_bytes()?,
                    new_value: r.get_opt_bytes()?,
                    filter_ids: r.get_i64_list()?,
                    synthetic: r.get_bool()?,
                }))
            }
            other => {
                return Err(GridError::Protocol(format!(
                    "unknown response type {:#x}",
                    other
                )))
            }
        };
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_request_round_trip() {
        let original = Request::Get {
            cache: "orders".to_string(),
            key: Bytes::from_static(b"\"k1\""),
        };
        let decoded = Request::decode(original.encode()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_invoke_all_with_filter_round_trip() {
        let original = Request::InvokeAll {
            cache: "orders".to_string(),
            keys: Vec::new(),
            filter: Some(Bytes::from_static(b"{\"kind\":\"always\"}")),
            processor: Bytes::from_static(b"{\"name\":\"touch\"}"),
        };
        let decoded = Request::decode(original.encode()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_listener_subscribe_round_trip() {
        let original = Request::Listener(ListenerRequest {
            uid: Uuid::new_v4(),
            scope: String::new(),
            cache: "orders".to_string(),
            request_type: ListenerRequestType::Subscribe,
            subscribe: true,
            lite: false,
            target: ListenerTarget::Filter {
                filter: Bytes::from_static(b"{\"kind\":\"always\"}"),
                filter_id: 7,
            },
        });
        let decoded = Request::decode(original.encode()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_event_response_round_trip() {
        let original = Response::Listener(ListenerResponse::Event(MapEventMessage {
            cache: "orders".to_string(),
            id: EventId::Updated,
            key: Bytes::from_static(b"\"k1\""),
            old_value: Some(Bytes::from_static(b"1")),
            new_value: Some(Bytes::from_static(b"2")),
            filter_ids: vec![7, 9],
            synthetic: false,
        }));
        let decoded = Response::decode(original.encode()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_empty_cookie_round_trip() {
        let original = Response::Stream(StreamItem::Cookie {
            cookie: Bytes::new(),
        });
        let decoded = Response::decode(original.encode()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_unknown_request_type_fails() {
        let mut w = DataWriter::new();
        w.put_u8(0x7f);
        assert!(matches!(
            Request::decode(w.finish()),
            Err(GridError::Protocol(_))
        ));
    }

    #[test]
    fn test_unknown_event_id_fails() {
        let mut w = DataWriter::new();
        w.put_u8(RESP_EVENT);
        w.put_string("orders");
        w.put_u8(99);
        assert!(matches!(
            Response::decode(w.finish()),
            Err(GridError::Protocol(_))
        ));
    }

    #[test]
    fn test_event_id_values() {
        assert_eq!(EventId::Inserted.value(), 1);
        assert_eq!(EventId::Updated.value(), 2);
        assert_eq!(EventId::Deleted.value(), 3);
        assert_eq!(EventId::from_value(3), Some(EventId::Deleted));
        assert_eq!(EventId::from_value(0), None);
    }
}
