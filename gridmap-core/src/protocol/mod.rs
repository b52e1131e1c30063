//! The NamedMap wire protocol.
//!
//! Every message travels inside an [`Envelope`]: a length-delimited unit
//! carrying a correlation uuid (the transport stream id), a kind byte, and a
//! typed body. Unary calls pair one `Request` envelope with one `Response`
//! envelope; server-streams answer a `Request` with `Data`* then `End`; the
//! event duplex is opened by an INIT request and carries subscription
//! requests and listener responses as `Data` envelopes until `Cancel`.

pub mod constants;
pub mod data;
pub mod message;
pub mod wire;

pub use data::{DataReader, DataWriter};
pub use message::{
    EventId, ListenerRequest, ListenerRequestType, ListenerResponse, ListenerTarget,
    MapEventMessage, Request, Response, StreamItem,
};
pub use wire::{Envelope, EnvelopeKind, WireCodec};
