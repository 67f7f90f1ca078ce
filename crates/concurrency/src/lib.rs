//! Concurrency discipline for QuartzDB.
//!
//! Two layers sit between the typed operations and the substrate:
//!
//! - the [`LockTable`] of per-key shard locks, which serializes
//!   read-modify-write sequences a single substrate transaction cannot
//!   express (INCR, list splices, sorted-set re-indexing);
//! - the [`retry`] executor, which re-runs a transaction closure on
//!   optimistic-concurrency conflicts with bounded exponential backoff
//!   plus jitter.
//!
//! The [`cache`] module holds the TTL-bounded LRU used as a read cache and
//! the write-through cache warmed on SET. Both are strictly
//! correctness-opaque: every mutation path invalidates them.

pub mod cache;
pub mod locks;
pub mod retry;

pub use cache::LruCache;
pub use locks::{fnv1a, LockTable, DEFAULT_SHARDS};
pub use retry::{with_retry, RetryPolicy};
