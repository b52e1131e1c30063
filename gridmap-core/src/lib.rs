//! Core types and wire protocol for the GridMap client.
//!
//! This crate holds everything the client shares with test harnesses and
//! alternative transports: the [`GridError`] error type, the length-delimited
//! envelope codec, the typed request/response records of the NamedMap
//! protocol, and the pluggable [`Serializer`].

#![warn(missing_docs)]

pub mod error;
pub mod protocol;
pub mod serialization;

pub use error::{GridError, Result};
pub use serialization::{Format, Serializer};
