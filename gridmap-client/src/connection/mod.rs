//! The session's multiplexed connection to the NamedMap service.

mod channel;
#[cfg(feature = "tls")]
mod tls;

pub use channel::{Channel, DuplexHandle};
