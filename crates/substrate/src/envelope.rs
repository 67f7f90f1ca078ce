//! The expiry envelope.
//!
//! Every value in the substrate is stored as `expires_at_ns (8 bytes BE)`
//! followed by the payload. A deadline of zero means the entry never
//! expires. Reads compare the deadline against the wall clock and treat
//! past-deadline entries as absent; physical removal is deferred to
//! overwrites and the sweeper.

use byteorder::{BigEndian, ByteOrder};
use quartz_core::error::{Error, Result};

/// Deadline value meaning "never expires".
pub const NO_EXPIRY: u64 = 0;

/// Envelope header width.
pub const HEADER_LEN: usize = 8;

/// Wrap a payload with its expiry deadline.
pub fn wrap(expires_at_ns: u64, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    let mut hdr = [0u8; HEADER_LEN];
    BigEndian::write_u64(&mut hdr, expires_at_ns);
    out.extend_from_slice(&hdr);
    out.extend_from_slice(payload);
    out
}

/// Split stored bytes into `(expires_at_ns, payload)`.
pub fn unwrap(stored: &[u8]) -> Result<(u64, &[u8])> {
    if stored.len() < HEADER_LEN {
        return Err(Error::corruption(format!(
            "stored value shorter than expiry header ({} bytes)",
            stored.len()
        )));
    }
    Ok((BigEndian::read_u64(&stored[..HEADER_LEN]), &stored[HEADER_LEN..]))
}

/// Whether a deadline has passed at time `now_ns`.
pub fn is_expired(expires_at_ns: u64, now_ns: u64) -> bool {
    expires_at_ns != NO_EXPIRY && expires_at_ns <= now_ns
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_unwrap_round_trip() {
        let stored = wrap(12345, b"payload");
        let (exp, payload) = unwrap(&stored).unwrap();
        assert_eq!(exp, 12345);
        assert_eq!(payload, b"payload");
    }

    #[test]
    fn test_no_expiry_never_expires() {
        assert!(!is_expired(NO_EXPIRY, u64::MAX));
    }

    #[test]
    fn test_deadline_comparison() {
        assert!(is_expired(100, 100));
        assert!(is_expired(100, 101));
        assert!(!is_expired(100, 99));
    }

    #[test]
    fn test_truncated_envelope_is_corruption() {
        let e = unwrap(&[1, 2, 3]).unwrap_err();
        assert!(e.is_serious());
    }

    #[test]
    fn test_empty_payload() {
        let stored = wrap(NO_EXPIRY, b"");
        let (exp, payload) = unwrap(&stored).unwrap();
        assert_eq!(exp, NO_EXPIRY);
        assert!(payload.is_empty());
    }
}
