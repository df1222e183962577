//! Tick arithmetic.
//!
//! The time source is a counter in range `0..=MAX_TICK_COUNT` that wraps
//! around to zero. All time points stored by the pool are raw tick counts, and
//! durations are obtained by [`elapsed`], which accounts for the wrap-around.
//! A duration is only measured correctly if it's shorter than
//! `MAX_TICK_COUNT + 1` ticks; the driver is required to call
//! [`TimerPool::handle_tick`] often enough for this to hold.
//!
//! [`TimerPool::handle_tick`]: crate::TimerPool::handle_tick
use crate::PortTimer;

/// An unsigned integer type representing a tick count (conceptually
/// milliseconds) or a duration measured in ticks.
pub type Ticks = u32;

/// Calculate the number of ticks elapsed from `since` to `now`, given a
/// counter that wraps from `max_tick_count` to zero.
#[inline]
pub(crate) const fn elapsed(since: Ticks, now: Ticks, max_tick_count: Ticks) -> Ticks {
    if max_tick_count == Ticks::MAX || now >= since {
        //       since              now
        // ┌──────┴────────────────┴────────┬───────────┐
        // 0      ╚════════════════╝  max_tick_count    MAX
        //              elapsed
        now.wrapping_sub(since)
    } else {
        //        now              since
        // ┌──────┴────────────────┴────────┬───────────┐
        // 0 ═════╝                ╚════════           MAX
        //                          elapsed
        // Note: If `max_tick_count == Ticks::MAX`, this reduces to the first
        // case because we are using wrapping arithmetics.
        now.wrapping_sub(since) - (Ticks::MAX - max_tick_count)
    }
}

/// Read the current tick count.
///
/// # Safety
///
/// CPU Lock active
#[inline]
pub(crate) unsafe fn now<Traits: PortTimer>() -> Ticks {
    let tick_count = unsafe { Traits::tick_count() };
    debug_assert!(tick_count <= Traits::MAX_TICK_COUNT);
    tick_count
}

/// Calculate the number of ticks elapsed from `since` to `now` using the
/// wrap-around point of `Traits`.
#[inline]
pub(crate) fn elapsed_for<Traits: PortTimer>(since: Ticks, now: Ticks) -> Ticks {
    elapsed(since, now, Traits::MAX_TICK_COUNT)
}
