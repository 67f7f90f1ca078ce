//! Core types for QuartzDB.
//!
//! This crate is dependency-light by design: it holds the error taxonomy,
//! the typed-keyspace schema, the order-preserving score encoding, and the
//! small pure-function helpers (glob matching, geohash math, clock reads)
//! that every other crate builds on. Nothing in here touches storage.

pub mod error;
pub mod geohash;
pub mod glob;
pub mod keyspace;
pub mod score;
pub mod time;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    DuplicatePolicy, PendingEntry, StreamGroup, StreamId, StreamMeta, TsMeta, TypeTag, ZSetMeta,
};
