//! Client-side facades over server-held maps.

mod entry;
mod named_map;
mod remote_set;

pub use entry::NamedCacheEntry;
pub use named_map::{NamedCache, NamedMap};
pub use remote_set::{RemoteEntrySet, RemoteKeySet, RemoteValueSet};
