//! 160-bit ring identifiers and modular-interval arithmetic.
//!
//! Every node on the overlay owns a [`RingId`]: the SHA-1 digest of the
//! dotted-decimal text of its main IPv4 address. Keys are placed on the same
//! ring by hashing the key string. IDs are compared as unsigned 160-bit
//! big-endian integers; all intervals are modulo 2^160.

use std::fmt;
use std::net::Ipv4Addr;

use sha1::{Digest, Sha1};

use crate::{DIGEST_LEN, RING_BITS};

/// A 160-bit identifier on the ring.
///
/// Byte 0 is the most significant, so the derived `Ord` (lexicographic over
/// the array) is exactly unsigned big-endian integer order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RingId(pub [u8; DIGEST_LEN]);

impl RingId {
    /// Ring ID of a node: SHA-1 over the dotted-decimal text of its main
    /// IPv4 address.
    pub fn of_addr(addr: Ipv4Addr) -> Self {
        Self::of_key(&addr.to_string())
    }

    /// Ring ID of a search key.
    pub fn of_key(key: &str) -> Self {
        let digest = Sha1::digest(key.as_bytes());
        let mut id = [0u8; DIGEST_LEN];
        id.copy_from_slice(&digest);
        RingId(id)
    }

    /// The ID targeted by finger slot `i`: self + 2^(i-1) mod 2^160.
    ///
    /// `i` must be in 1..=160; out-of-range indices saturate to the ends of
    /// that range rather than wrapping into nonsense.
    pub fn finger_target(&self, i: u16) -> RingId {
        let i = i.clamp(1, RING_BITS);
        let mut out = self.0;
        let mut byte_index = DIGEST_LEN - 1 - usize::from((i - 1) / 8);
        let mut carry = u16::from(1u8 << ((i - 1) % 8));
        loop {
            carry += u16::from(out[byte_index]);
            out[byte_index] = (carry & 0xFF) as u8;
            carry >>= 8;
            if carry == 0 || byte_index == 0 {
                break;
            }
            byte_index -= 1;
        }
        RingId(out)
    }
}

/// `x` lies strictly between `a` and `b` going clockwise on the ring.
///
/// When `a == b` the open interval is the entire ring minus the endpoint.
pub fn in_open_interval(x: RingId, a: RingId, b: RingId) -> bool {
    if a == b {
        x != a
    } else if a < b {
        a < x && x < b
    } else {
        x > a || x < b
    }
}

/// Closed-right variant: `x` in `(a, b]` going clockwise.
///
/// When `a == b` the interval spans the whole ring, so every `x` is inside.
/// This is the ownership test for a single-node ring.
pub fn in_half_open(x: RingId, a: RingId, b: RingId) -> bool {
    x == b || in_open_interval(x, a, b)
}

impl fmt::Display for RingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.0))
    }
}

impl fmt::Debug for RingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RingId({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(bytes: &[u8]) -> RingId {
        let mut out = [0u8; DIGEST_LEN];
        out[DIGEST_LEN - bytes.len()..].copy_from_slice(bytes);
        RingId(out)
    }

    #[test]
    fn test_addr_digest_matches_text_form() {
        let a = RingId::of_addr(Ipv4Addr::new(10, 0, 0, 1));
        let b = RingId::of_key("10.0.0.1");
        assert_eq!(a, b);
    }

    #[test]
    fn test_ordering_is_big_endian() {
        assert!(id(&[0x01]) < id(&[0x02]));
        assert!(id(&[0x01, 0x00]) > id(&[0xFF]));
        let mut high = [0u8; DIGEST_LEN];
        high[0] = 0x80;
        assert!(RingId(high) > id(&[0xFF]));
    }

    #[test]
    fn test_open_interval_no_wrap() {
        assert!(in_open_interval(id(&[5]), id(&[1]), id(&[9])));
        assert!(!in_open_interval(id(&[1]), id(&[1]), id(&[9])));
        assert!(!in_open_interval(id(&[9]), id(&[1]), id(&[9])));
        assert!(!in_open_interval(id(&[12]), id(&[1]), id(&[9])));
    }

    #[test]
    fn test_open_interval_wraps() {
        // (9, 1): everything above 9 or below 1.
        assert!(in_open_interval(id(&[12]), id(&[9]), id(&[1])));
        assert!(in_open_interval(id(&[0]), id(&[9]), id(&[1])));
        assert!(!in_open_interval(id(&[5]), id(&[9]), id(&[1])));
        assert!(!in_open_interval(id(&[9]), id(&[9]), id(&[1])));
    }

    #[test]
    fn test_degenerate_intervals() {
        // (a, a) is the whole ring minus a; (a, a] is the whole ring.
        assert!(in_open_interval(id(&[7]), id(&[3]), id(&[3])));
        assert!(!in_open_interval(id(&[3]), id(&[3]), id(&[3])));
        assert!(in_half_open(id(&[7]), id(&[3]), id(&[3])));
        assert!(in_half_open(id(&[3]), id(&[3]), id(&[3])));
    }

    #[test]
    fn test_half_open_includes_right_endpoint() {
        assert!(in_half_open(id(&[9]), id(&[1]), id(&[9])));
        assert!(in_half_open(id(&[1]), id(&[9]), id(&[1])));
        assert!(!in_half_open(id(&[1]), id(&[1]), id(&[9])));
    }

    #[test]
    fn test_finger_target_low_bits() {
        let base = id(&[0x10]);
        assert_eq!(base.finger_target(1), id(&[0x11]));
        assert_eq!(base.finger_target(5), id(&[0x20]));
        assert_eq!(base.finger_target(9), id(&[0x01, 0x10]));
    }

    #[test]
    fn test_finger_target_carry_propagates() {
        let base = id(&[0xFF, 0xFF]);
        assert_eq!(base.finger_target(1), id(&[0x01, 0x00, 0x00]));
    }

    #[test]
    fn test_finger_target_wraps_at_top() {
        let top = RingId([0xFF; DIGEST_LEN]);
        // +1 wraps to zero.
        assert_eq!(top.finger_target(1), RingId([0x00; DIGEST_LEN]));
        // +2^159 flips only the top bit.
        let mut expect = [0xFF; DIGEST_LEN];
        expect[0] = 0x7F;
        assert_eq!(top.finger_target(160), RingId(expect));
    }

    #[test]
    fn test_display_is_hex() {
        let rendered = id(&[0xAB]).to_string();
        assert_eq!(rendered.len(), DIGEST_LEN * 2);
        assert!(rendered.ends_with("AB"));
    }
}
