//! Monotonic millisecond clock helpers and wrap-safe time arithmetic.
//!
//! The MAC engine never reads a hardware clock directly: every timestamp it
//! handles originates from a planner callback (`t0`, `now`) or is derived
//! from one by addition. All arithmetic here is therefore careful to treat
//! `u32` milliseconds as a wrapping ring rather than an absolute scalar, per
//! the redesign note in spec §9 ("never compare raw timestamps with `<`").

/// Milliseconds since an arbitrary, monotonic epoch. Wraps every ~49.7 days;
/// all arithmetic in this module is wrap-safe.
pub type TimestampMs = u32;

/// `a - b`, saturating at zero instead of wrapping, for computing an elapsed
/// duration that is known to be non-negative modulo wrap.
pub fn elapsed_ms(now: TimestampMs, since: TimestampMs) -> u32 {
    now.wrapping_sub(since)
}

/// Whether `deadline` has been reached or passed relative to `now`, tolerant
/// of 32-bit wraparound. Two timestamps are considered ordered by whichever
/// is "closer" going forward in time, capped at half the value space: this
/// is the standard sequence-number comparison trick and keeps a stale
/// deadline from looking like it is millions of days in the future after a
/// wrap.
pub fn has_elapsed(now: TimestampMs, deadline: TimestampMs) -> bool {
    (now.wrapping_sub(deadline) as i32) >= 0
}

/// `now + delta`, wrapping.
pub fn add_ms(now: TimestampMs, delta: u32) -> TimestampMs {
    now.wrapping_add(delta)
}

/// `now - delta`, wrapping (used for early-start offsets, which may be
/// negative relative to a nominal center per spec §4.3).
pub fn sub_ms(now: TimestampMs, delta: u32) -> TimestampMs {
    now.wrapping_sub(delta)
}

/// Applies a signed millisecond offset (spec §4.3's `offset_ms`, which is
/// typically negative) to a timestamp.
pub fn offset_ms(t: TimestampMs, offset: i32) -> TimestampMs {
    if offset >= 0 {
        add_ms(t, offset as u32)
    } else {
        sub_ms(t, (-offset) as u32)
    }
}

/// `max(0, time_off_ms - (now - timestamp))` used by the duty-cycle gate
/// (spec §4.9), computed with wrap-safe unsigned subtraction throughout.
pub fn remaining_ms(now: TimestampMs, timestamp: TimestampMs, time_off_ms: u32) -> u32 {
    let since = elapsed_ms(now, timestamp);
    time_off_ms.saturating_sub(since)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn has_elapsed_handles_wrap() {
        let deadline: TimestampMs = u32::MAX - 10;
        let just_before = deadline.wrapping_sub(1);
        let just_after = deadline.wrapping_add(5);
        assert!(!has_elapsed(just_before, deadline));
        assert!(has_elapsed(just_after, deadline));
        assert!(has_elapsed(deadline, deadline));
    }

    #[test]
    fn remaining_ms_saturates() {
        assert_eq!(remaining_ms(1_000, 0, 500), 0);
        assert_eq!(remaining_ms(100, 0, 500), 400);
        // now wrapped past timestamp: elapsed wraps too, still wrap-safe.
        let timestamp: TimestampMs = u32::MAX - 5;
        let now: TimestampMs = 10;
        assert_eq!(elapsed_ms(now, timestamp), 16);
    }
}
