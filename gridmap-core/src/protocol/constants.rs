//! Message type and envelope constants for the NamedMap protocol.

/// Size of the envelope length prefix in bytes.
pub const SIZE_OF_LENGTH_FIELD: usize = 4;

/// Size of the correlation uuid field in bytes.
pub const SIZE_OF_UID_FIELD: usize = 16;

/// Size of the envelope kind field in bytes.
pub const SIZE_OF_KIND_FIELD: usize = 1;

/// Minimum payload size: uuid plus kind byte.
pub const ENVELOPE_HEADER_SIZE: usize = SIZE_OF_UID_FIELD + SIZE_OF_KIND_FIELD;

/// Upper bound on a single envelope, guarding against corrupt length fields.
pub const MAX_ENVELOPE_SIZE: usize = 16 * 1024 * 1024;

// Request message types.

/// Get the value mapped to a key.
pub const REQ_GET: u8 = 0x01;
/// Associate a value with a key, returning the prior value.
pub const REQ_PUT: u8 = 0x02;
/// Remove a key, returning the prior value.
pub const REQ_REMOVE: u8 = 0x03;
/// Remove a key only if it is currently mapped to the given value.
pub const REQ_REMOVE_MAPPING: u8 = 0x04;
/// Test for key presence.
pub const REQ_CONTAINS_KEY: u8 = 0x05;
/// Number of entries in the map.
pub const REQ_SIZE: u8 = 0x06;
/// Remove all entries.
pub const REQ_CLEAR: u8 = 0x07;
/// Remove all entries without notifying listeners per entry.
pub const REQ_TRUNCATE: u8 = 0x08;
/// Release the map on the server.
pub const REQ_DESTROY: u8 = 0x09;
/// Invoke an entry processor against one key.
pub const REQ_INVOKE: u8 = 0x0a;
/// Invoke an entry processor against a key set or filter.
pub const REQ_INVOKE_ALL: u8 = 0x0b;
/// Run an aggregator against a key set or filter.
pub const REQ_AGGREGATE: u8 = 0x0c;
/// Fetch the next page of keys.
pub const REQ_NEXT_KEY_PAGE: u8 = 0x0d;
/// Fetch the next page of entries.
pub const REQ_NEXT_ENTRY_PAGE: u8 = 0x0e;
/// Stream all values matching a filter.
pub const REQ_VALUES: u8 = 0x0f;
/// Stream all entries matching a filter.
pub const REQ_ENTRIES: u8 = 0x10;
/// Event-stream control message (INIT / SUBSCRIBE / UNSUBSCRIBE).
pub const REQ_LISTENER: u8 = 0x11;

// Response message types.

/// Bare acknowledgement with no payload.
pub const RESP_ACK: u8 = 0x81;
/// An optional value blob.
pub const RESP_VALUE: u8 = 0x82;
/// A boolean result.
pub const RESP_FLAG: u8 = 0x83;
/// An unsigned count.
pub const RESP_COUNT: u8 = 0x84;
/// A list of key/value pairs.
pub const RESP_ENTRY_LIST: u8 = 0x85;
/// Continuation cookie envelope heading a page stream.
pub const RESP_COOKIE: u8 = 0x86;
/// A single serialized blob (a key or a value) in a stream.
pub const RESP_DATUM: u8 = 0x87;
/// A key/value pair in a stream.
pub const RESP_ENTRY: u8 = 0x88;
/// Subscription acknowledged.
pub const RESP_SUBSCRIBED: u8 = 0x90;
/// Unsubscription acknowledged.
pub const RESP_UNSUBSCRIBED: u8 = 0x91;
/// The map was destroyed on the server.
pub const RESP_DESTROYED: u8 = 0x92;
/// The map was truncated on the server.
pub const RESP_TRUNCATED: u8 = 0x93;
/// An entry event.
pub const RESP_EVENT: u8 = 0x94;

// Listener request types.

/// Open the event stream for a map.
pub const LISTENER_INIT: u8 = 0;
/// Subscribe a key or filter target.
pub const LISTENER_SUBSCRIBE: u8 = 1;
/// Unsubscribe a key or filter target.
pub const LISTENER_UNSUBSCRIBE: u8 = 2;
