//! Event listener infrastructure for NamedMap instances.
//!
//! Application listeners register against a key or a server-side filter.
//! Listeners sharing one target are coalesced into a single server
//! subscription by a [`group`] and fanned out to by the [`manager`], which
//! owns the map's event duplex.

mod group;
mod listener;
mod manager;

pub use gridmap_core::protocol::EventId;
pub use listener::{
    dispatch_map_event, BoxedMapListener, FnMapListener, FnMapListenerBuilder, MapEvent,
    MapListener,
};
pub use manager::MapEventsManager;

/// Out-of-band lifecycle notifications for one map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapLifecycleEvent {
    /// The map was destroyed on the server; the local facade is released.
    Destroyed,
    /// The map was truncated on the server.
    Truncated,
}

impl std::fmt::Display for MapLifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Destroyed => write!(f, "DESTROYED"),
            Self::Truncated => write!(f, "TRUNCATED"),
        }
    }
}
