//! The QuartzDB data engine.
//!
//! A [`Database`] owns one substrate instance plus the shard-lock table,
//! the read/write LRU caches and the blocked-reader notifier. The typed
//! operations live on stateless facades (`Strings`, `Hashes`, `Lists`,
//! `Sets`, `SortedSets`, `Streams`, `TimeSeries`, `JsonStore`, `Geo`,
//! `Keyspace`) that hold only an `Arc<Database>` and can be cloned and
//! shared freely across threads.
//!
//! ## Operation shape
//!
//! Every mutating operation follows the same discipline: acquire the
//! per-key shard lock (when the op is a read-modify-write), run one
//! substrate transaction under the retry executor, invalidate the caches,
//! and — for streams and lists — notify blocked readers after commit.
//! Read operations go straight to a substrate view; the type tag is always
//! consulted first so a wrong-typed key fails with `WrongType` before any
//! data is touched.

mod database;
mod notify;
mod num;
mod sweeper;

mod geo;
mod hashes;
mod json;
mod keyspace_admin;
mod lists;
mod sets;
mod streams;
mod strings;
mod timeseries;
mod zsets;

pub use database::{Config, Database};
pub use geo::{Geo, GeoResult, GeoSearchBy, GeoSearchFrom};
pub use hashes::Hashes;
pub use json::JsonStore;
pub use keyspace_admin::Keyspace;
pub use lists::Lists;
pub use sets::Sets;
pub use streams::{GroupRead, StreamEntry, StreamInfo, Streams, XAddId};
pub use strings::{BitOp, BitfieldCommand, BitfieldSpec, Overflow, SetCondition, Strings};
pub use timeseries::TimeSeries;
pub use zsets::{Aggregate, LexBound, ScoreBound, SortedSets, ZStoreAlgebra};
