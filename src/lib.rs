//! QuartzDB — a RESP-compatible, disk-persistent, multi-data-structure
//! key/value engine over an embedded ordered-KV substrate.
//!
//! This crate re-exports the public engine surface; the member crates
//! hold the implementation:
//!
//! - `quartz-core` — errors, keyspace schema, score encoding, shared types
//! - `quartz-substrate` — the ordered-KV adapter, expiry, compression
//! - `quartz-concurrency` — shard locks, retry executor, LRU caches
//! - `quartz-engine` — the typed operations and the startup sweeper
//! - `quartz-server` — RESP2 codec, dispatch, server binary

pub use quartz_core::{Error, Result};
pub use quartz_engine::{
    Config, Database, Geo, Hashes, JsonStore, Keyspace, Lists, Sets, SortedSets, Streams,
    Strings, TimeSeries,
};
