//! KV substrate adapter for QuartzDB.
//!
//! The engine layers on an embedded ordered byte-key store (`sled`) and
//! needs three things the raw store does not hand it directly:
//!
//! 1. **Optimistic write transactions** — a staged write set plus a
//!    validated read set, committed atomically or aborted with a
//!    `Conflict` the retry executor can consume.
//! 2. **Per-entry expiry** — an absolute-nanosecond deadline stored in an
//!    envelope in front of every value, filtered lazily on read.
//! 3. **Prefix iteration** with the staged writes of an open transaction
//!    overlaid.
//!
//! The value compression codec also lives here: it is a pure byte-level
//! concern applied by the engine before values enter the envelope.

pub mod adapter;
pub mod codec;
pub mod envelope;

pub use adapter::{ReadView, Substrate, WriteTxn};
pub use codec::{compress, maybe_decompress, Compression};
pub use envelope::NO_EXPIRY;
