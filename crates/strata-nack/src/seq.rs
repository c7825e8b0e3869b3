//! # Sequence Arithmetic
//!
//! RTP sequence numbers are 16 bits wide and wrap. Ordering is decided by
//! the wrapping distance between two numbers: a distance in `1..HALF` is
//! "forward", anything else (including `0`) is "backward or duplicate".

/// Half of the 16-bit sequence space; the forward/backward boundary.
pub const HALF: u16 = 1 << 15;

/// Wrapping distance from `from` to `to` (`to - from` modulo 2^16).
#[inline]
pub fn distance(from: u16, to: u16) -> u16 {
    to.wrapping_sub(from)
}

/// Whether `to` lies strictly ahead of `from`.
#[inline]
pub fn is_newer(to: u16, from: u16) -> bool {
    let d = distance(from, to);
    d != 0 && d < HALF
}

/// How far `seq` lies behind `reference`, or `None` if it is ahead of it.
///
/// `Some(0)` means `seq == reference`.
#[inline]
pub fn age(reference: u16, seq: u16) -> Option<u16> {
    let d = distance(seq, reference);
    if d >= HALF {
        None
    } else {
        Some(d)
    }
}

/// Iterate the sequence numbers strictly between `from` and `to`, wrapping.
pub fn between(from: u16, to: u16) -> impl Iterator<Item = u16> {
    let span = distance(from, to).saturating_sub(1);
    (1..=span).map(move |i| from.wrapping_add(i))
}
