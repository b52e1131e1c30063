//! Async Rust client for remote NamedMap/NamedCache data grids.
//!
//! Applications read, write, query, transform, and subscribe to events on
//! server-held key–value maps without hosting any cache data locally. One
//! [`Session`] owns one multiplexed, length-delimited binary channel; every
//! [`NamedMap`] facade shares it.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use gridmap_client::{Session, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SessionConfig::builder()
//!         .address("127.0.0.1:1408")
//!         .build()?;
//!     let session = Session::connect(config).await?;
//!
//!     let map = session.get_map::<String, String>("greetings");
//!     map.put(&"hello".to_string(), &"world".to_string()).await?;
//!     let value = map.get(&"hello".to_string()).await?;
//!     println!("{:?}", value); // Some("world")
//!
//!     session.close();
//!     Ok(())
//! }
//! ```
//!
//! # Events
//!
//! Listeners bind to a key or a server-side filter; listeners sharing one
//! target coalesce into a single server subscription whose detail level is
//! lite only while every listener opts out of payloads:
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use gridmap_client::{BoxedMapListener, FnMapListener};
//!
//! let listener: BoxedMapListener<String, String> = Arc::new(
//!     FnMapListener::builder()
//!         .on_inserted(|event| println!("inserted {:?}", event.key()))
//!         .build(),
//! );
//! map.add_key_listener(Arc::clone(&listener), &"hello".to_string(), false).await?;
//! // ...
//! map.remove_key_listener(&listener, &"hello".to_string()).await?;
//! ```
//!
//! # Iteration
//!
//! Key, entry, and value views iterate remote maps lazily, one server page
//! at a time:
//!
//! ```rust,ignore
//! let mut keys = map.key_set().iter()?;
//! while let Some(key) = keys.next().await? {
//!     println!("{key}");
//! }
//! ```
//!
//! # Feature Flags
//!
//! | Flag | Purpose |
//! |------|---------|
//! | `tls` | TLS connections via `rustls` |

#![warn(missing_docs)]

pub mod config;
pub mod connection;
pub mod events;
pub mod paging;
pub mod proxy;
pub mod query;
pub mod request;
mod session;

pub use config::{SessionConfig, SessionConfigBuilder};
pub use connection::Channel;
pub use events::{
    dispatch_map_event, BoxedMapListener, EventId, FnMapListener, FnMapListenerBuilder, MapEvent,
    MapEventsManager, MapLifecycleEvent, MapListener,
};
pub use gridmap_core as core;
pub use gridmap_core::{Format, GridError, Result, Serializer};
pub use paging::{PageAdvancer, PageSource};
pub use proxy::{NamedCache, NamedCacheEntry, NamedMap, RemoteEntrySet, RemoteKeySet, RemoteValueSet};
pub use query::{Aggregator, Filter, Processor};
pub use request::{GridRequest, RequestFactory};
pub use session::Session;
