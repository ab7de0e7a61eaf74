use litewire_core::constants::{HALF_MAX_SEQUENCE, MAX_SEQUENCE};

/// Signed distance from `b` to `a` in the 15-bit sequence space.
///
/// The result lies in `(-16384, 16384]`: positive when `a` is newer than `b`. A distance
/// of exactly half the space counts as newer.
pub fn relative_sequence_number(a: i32, b: i32) -> i32 {
    let max = MAX_SEQUENCE as i32;
    let half = HALF_MAX_SEQUENCE as i32;
    (a - b + max + half - 1).rem_euclid(max) - half + 1
}

/// Next sequence number after `sequence`, wrapping at `MAX_SEQUENCE`.
pub fn next_sequence(sequence: u16) -> u16 {
    (sequence + 1) % MAX_SEQUENCE
}
