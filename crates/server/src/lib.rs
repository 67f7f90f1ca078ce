//! RESP2 surface of QuartzDB.
//!
//! Three thin layers over the engine: the wire codec ([`resp`]), the
//! command dispatcher ([`dispatch`]), and the TCP loop ([`server`]). The
//! network layer translates RESP arrays into typed engine calls and
//! nothing more; everything stateful lives in `quartz-engine`.

pub mod dispatch;
pub mod resp;
pub mod server;
