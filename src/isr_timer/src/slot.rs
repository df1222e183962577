//! Timer slots
use core::fmt;

use crate::{time::Ticks, utils::Init};

/// Identifies a slot of a [`TimerPool`]. The identifier stays valid from the
/// slot's admission until its removal.
///
/// [`TimerPool`]: crate::TimerPool
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(usize);

impl SlotId {
    /// Construct a `SlotId` from a raw slot index.
    ///
    /// The result is not checked against any pool. Operations given an index
    /// outside the pool's capacity report `NotFound`.
    #[inline]
    pub const fn from_index(index: usize) -> Self {
        Self(index)
    }

    /// Get the raw slot index.
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("SlotId").field(&self.0).finish()
    }
}

/// The action taken when a timer fires.
#[derive(Clone, Copy)]
pub enum Action {
    /// Call a function without a parameter.
    Nullary(fn()),
    /// Call a function with the parameter bound at registration.
    Unary(fn(usize), usize),
}

impl Action {
    /// Take the action.
    #[inline]
    pub fn invoke(self) {
        match self {
            Self::Nullary(f) => f(),
            Self::Unary(f, param) => f(param),
        }
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::Nullary(func) => f.debug_tuple("Nullary").field(&(func as *const ())).finish(),
            Self::Unary(func, param) => f
                .debug_tuple("Unary")
                .field(&(func as *const ()))
                .field(&param)
                .finish(),
        }
    }
}

/// The run budget of a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Runs {
    /// Fire until removed.
    Forever,
    /// Fire once, then free the slot.
    Once,
    /// Fire the specified number of times, then free the slot.
    ///
    /// `Times(0)` is equivalent to [`Self::Forever`] and `Times(1)` to
    /// [`Self::Once`].
    Times(u32),
}

impl Runs {
    /// Decode the raw run count used by C-style timer libraries: `0` means
    /// "forever", `n > 0` means "exactly `n` times".
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Self::Forever,
            1 => Self::Once,
            n => Self::Times(n),
        }
    }

    /// Encode `self` as a raw run count. The inverse of [`Self::from_raw`].
    #[inline]
    pub const fn as_raw(self) -> u32 {
        match self {
            Self::Forever => 0,
            Self::Once => 1,
            Self::Times(n) => n,
        }
    }

    /// Get a flag indicating whether a timer that has fired `runs_so_far`
    /// times has exhausted this budget.
    #[inline]
    pub(crate) const fn is_exhausted_by(self, runs_so_far: u32) -> bool {
        match self.as_raw() {
            0 => false,
            max => runs_so_far >= max,
        }
    }
}

/// Deferred dispatch decision made by the first phase of
/// [`TimerPool::handle_tick`].
///
/// [`TimerPool::handle_tick`]: crate::TimerPool::handle_tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pending {
    /// Don't take the action.
    None,
    /// Take the action and keep the slot.
    RunOnly,
    /// Take the action and free the slot afterwards.
    RunAndDelete,
}

impl Init for Pending {
    const INIT: Self = Self::None;
}

/// The state of a timer slot.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TimerSlot {
    /// The tick count when the action was last taken, or when the phase was
    /// last reset.
    pub(crate) last_fire_time: Ticks,

    /// The action. The slot is in use iff this is `Some(_)`.
    pub(crate) action: Option<Action>,

    /// The minimum number of ticks between firings.
    pub(crate) interval: Ticks,

    pub(crate) max_runs: Runs,

    /// The number of times the timer has been marked for firing.
    pub(crate) runs_so_far: u32,

    /// Disabled slots are skipped by `handle_tick` but keep their schedule.
    pub(crate) enabled: bool,

    pub(crate) pending: Pending,

    /// Incremented every time the slot is claimed. A deferred deletion uses
    /// this to detect that the slot has been freed and claimed again while
    /// the action was running.
    pub(crate) generation: u32,
}

impl Init for TimerSlot {
    const INIT: Self = Self {
        last_fire_time: 0,
        action: None,
        interval: 0,
        max_runs: Runs::Forever,
        runs_so_far: 0,
        enabled: false,
        pending: Pending::INIT,
        generation: 0,
    };
}

impl TimerSlot {
    #[inline]
    pub(crate) fn is_in_use(&self) -> bool {
        self.action.is_some()
    }

    /// Claim a free slot.
    pub(crate) fn claim(&mut self, now: Ticks, interval: Ticks, action: Action, max_runs: Runs) {
        debug_assert!(!self.is_in_use());
        *self = Self {
            last_fire_time: now,
            action: Some(action),
            interval,
            max_runs,
            runs_so_far: 0,
            enabled: true,
            pending: Pending::None,
            generation: self.generation.wrapping_add(1),
        };
    }

    /// Return the slot to its empty state. The generation survives.
    pub(crate) fn reset(&mut self, now: Ticks) {
        *self = Self {
            last_fire_time: now,
            generation: self.generation,
            ..Self::INIT
        };
    }

    /// Decide whether the slot is due at `now`, given the number of ticks
    /// elapsed since its last firing. Advances the schedule and the run count
    /// if it is, and records the decision in `self.pending`.
    pub(crate) fn mark(&mut self, now: Ticks, elapsed: Ticks) -> Pending {
        self.pending = if !self.is_in_use() || !self.enabled || elapsed < self.interval {
            Pending::None
        } else {
            self.last_fire_time = now;
            self.runs_so_far = self.runs_so_far.saturating_add(1);

            if self.max_runs.is_exhausted_by(self.runs_so_far) {
                Pending::RunAndDelete
            } else {
                Pending::RunOnly
            }
        };
        self.pending
    }
}
