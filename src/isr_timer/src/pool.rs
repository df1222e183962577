//! Timer pools
use core::fmt;

use crate::{
    error::{
        AdmitTimerError, NotFoundError, PoolError, QueryTimerError, RemoveTimerError,
        UpdateTimerError,
    },
    klock::{lock_cpu, CpuLockCell},
    slot::{Action, Runs, SlotId, TimerSlot},
    time::{self, Ticks},
    utils::{Init, SlotBitmap},
    PortTraits, DEFAULT_NUM_SLOTS, MAX_NUM_SLOTS,
};

/// A fixed-capacity table of `N` software timers driven by
/// [`Self::handle_tick`].
///
/// `TimerPool` is usually placed in a `static` so that both the application
/// and the timer interrupt handler can reach it. All slot state is protected
/// by CPU Lock, which is provided by the port `Traits`.
///
/// `N` must be in range `1..=`[`MAX_NUM_SLOTS`]. This is checked at compile
/// time.
pub struct TimerPool<Traits, const N: usize = DEFAULT_NUM_SLOTS> {
    pub(crate) state: CpuLockCell<Traits, PoolState<N>>,
}

/// The CPU Lock-protected portion of [`TimerPool`].
#[derive(Debug)]
pub(crate) struct PoolState<const N: usize> {
    pub(crate) slots: [TimerSlot; N],

    /// Bit `i` is set iff `slots[i]` is free. The lowest set bit is the slot
    /// claimed by the next admission.
    pub(crate) free: SlotBitmap,

    /// Set while [`TimerPool::handle_tick`] is dispatching actions.
    pub(crate) tick_in_progress: bool,
}

impl<const N: usize> PoolState<N> {
    const INIT: Self = Self {
        slots: [TimerSlot::INIT; N],
        free: SlotBitmap::with_leading_ones(N),
        tick_in_progress: false,
    };

    /// Get the slot identified by `id` if it's in use.
    #[inline]
    fn live_slot(&self, id: SlotId) -> Result<&TimerSlot, NotFoundError> {
        self.slots
            .get(id.index())
            .filter(|slot| slot.is_in_use())
            .ok_or(NotFoundError::NotFound)
    }

    /// Get the slot identified by `id` if it's in use.
    #[inline]
    fn live_slot_mut(&mut self, id: SlotId) -> Result<&mut TimerSlot, NotFoundError> {
        self.slots
            .get_mut(id.index())
            .filter(|slot| slot.is_in_use())
            .ok_or(NotFoundError::NotFound)
    }

    /// Return the slot at `index` to the free pool.
    pub(crate) fn release(&mut self, index: usize, now: Ticks) {
        self.slots[index].reset(now);
        self.free.set(index);
    }

    #[inline]
    fn num_free(&self) -> usize {
        self.free.count()
    }
}

/// A snapshot of a slot's state, returned by [`TimerPool::slot_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotInfo {
    /// The minimum number of ticks between firings.
    pub interval: Ticks,
    /// The run budget specified at admission.
    pub max_runs: Runs,
    /// The number of firings so far.
    pub runs_so_far: u32,
    /// Whether the slot is considered by [`TimerPool::handle_tick`].
    pub enabled: bool,
    /// The tick count when the timer last fired or had its phase reset.
    pub last_fire_time: Ticks,
}

impl<Traits: PortTraits, const N: usize> TimerPool<Traits, N> {
    const CHECK_NUM_SLOTS: () = assert!(
        N >= 1 && N <= MAX_NUM_SLOTS,
        "the number of slots must be in range `1..=MAX_NUM_SLOTS`"
    );

    /// Construct an empty `TimerPool`.
    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::CHECK_NUM_SLOTS;

        Self {
            state: CpuLockCell::new(PoolState::INIT),
        }
    }

    /// Get the number of slots.
    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Free every slot, discarding all timers.
    pub fn init(&self) -> Result<(), PoolError> {
        let mut lock = lock_cpu::<Traits>()?;
        // Safety: CPU Lock active
        let now = unsafe { time::now::<Traits>() };
        let state = self.state.write(&mut *lock);
        for index in 0..N {
            state.release(index, now);
        }
        drop(lock);

        pool_log!(trace, "initialized a pool of {N} slots");
        Ok(())
    }

    /// Register a timer in the first free slot.
    ///
    /// The timer's action is taken every `interval` ticks until `max_runs` is
    /// exhausted. The first firing happens `interval` ticks from now.
    ///
    /// `action` being `None` results in `InvalidCallback`. This accommodates
    /// callback tables that have empty entries.
    pub fn admit(
        &self,
        interval: Ticks,
        action: Option<Action>,
        max_runs: Runs,
    ) -> Result<SlotId, AdmitTimerError> {
        let action = action.ok_or(AdmitTimerError::InvalidCallback)?;

        let mut lock = lock_cpu::<Traits>()?;
        // Safety: CPU Lock active
        let now = unsafe { time::now::<Traits>() };
        let state = self.state.write(&mut *lock);

        let index = state.free.find_set().ok_or(AdmitTimerError::NoFreeSlot)?;
        debug_assert!(index < N);
        state.free.clear(index);
        state.slots[index].claim(now, interval, action, max_runs);
        drop(lock);

        pool_log!(
            trace,
            "admitted slot {index} (interval = {interval}, max_runs = {max_runs:?})"
        );
        Ok(SlotId::from_index(index))
    }

    /// Register a timer that calls `action` every `interval` ticks until
    /// removed.
    #[inline]
    pub fn set_interval(&self, interval: Ticks, action: Action) -> Result<SlotId, AdmitTimerError> {
        self.admit(interval, Some(action), Runs::Forever)
    }

    /// Register a timer that calls `f(param)` every `interval` ticks until
    /// removed.
    #[inline]
    pub fn set_interval_with_param(
        &self,
        interval: Ticks,
        f: fn(usize),
        param: usize,
    ) -> Result<SlotId, AdmitTimerError> {
        self.set_interval(interval, Action::Unary(f, param))
    }

    /// Register a timer that calls `action` once after `interval` ticks.
    #[inline]
    pub fn set_timeout(&self, interval: Ticks, action: Action) -> Result<SlotId, AdmitTimerError> {
        self.admit(interval, Some(action), Runs::Once)
    }

    /// Register a timer that calls `f(param)` once after `interval` ticks.
    #[inline]
    pub fn set_timeout_with_param(
        &self,
        interval: Ticks,
        f: fn(usize),
        param: usize,
    ) -> Result<SlotId, AdmitTimerError> {
        self.set_timeout(interval, Action::Unary(f, param))
    }

    /// Register a timer that calls `action` every `interval` ticks, `times`
    /// times in total. `times == 0` means forever.
    #[inline]
    pub fn set_timer(
        &self,
        interval: Ticks,
        action: Action,
        times: u32,
    ) -> Result<SlotId, AdmitTimerError> {
        self.admit(interval, Some(action), Runs::from_raw(times))
    }

    /// Register a timer that calls `f(param)` every `interval` ticks, `times`
    /// times in total. `times == 0` means forever.
    #[inline]
    pub fn set_timer_with_param(
        &self,
        interval: Ticks,
        f: fn(usize),
        param: usize,
        times: u32,
    ) -> Result<SlotId, AdmitTimerError> {
        self.set_timer(interval, Action::Unary(f, param), times)
    }

    /// Change the interval of a timer and restart its phase. The next firing
    /// happens `interval` ticks from now.
    pub fn change_interval(&self, id: SlotId, interval: Ticks) -> Result<(), UpdateTimerError> {
        let mut lock = lock_cpu::<Traits>()?;
        // Safety: CPU Lock active
        let now = unsafe { time::now::<Traits>() };
        let slot = self.state.write(&mut *lock).live_slot_mut(id)?;
        slot.interval = interval;
        slot.last_fire_time = now;
        Ok(())
    }

    /// Free a slot, whatever its state is. Removing a free slot has no effect.
    ///
    /// If the timer was marked for firing by an ongoing [`Self::handle_tick`]
    /// (i.e., this method is called by another timer's action), it will not
    /// fire.
    pub fn remove(&self, id: SlotId) -> Result<(), RemoveTimerError> {
        if id.index() >= N {
            return Err(RemoveTimerError::NotFound);
        }

        let mut lock = lock_cpu::<Traits>()?;
        // Safety: CPU Lock active
        let now = unsafe { time::now::<Traits>() };
        let state = self.state.write(&mut *lock);
        if state.slots[id.index()].is_in_use() {
            state.release(id.index(), now);
            drop(lock);
            pool_log!(trace, "removed slot {}", id.index());
        }
        Ok(())
    }

    /// Restart the phase of a timer without changing its interval, enabled
    /// state, or run count. The next firing happens `interval` ticks from now.
    pub fn restart(&self, id: SlotId) -> Result<(), UpdateTimerError> {
        let mut lock = lock_cpu::<Traits>()?;
        // Safety: CPU Lock active
        let now = unsafe { time::now::<Traits>() };
        self.state.write(&mut *lock).live_slot_mut(id)?.last_fire_time = now;
        Ok(())
    }

    /// Get a flag indicating whether a timer is enabled.
    pub fn is_enabled(&self, id: SlotId) -> Result<bool, QueryTimerError> {
        let lock = lock_cpu::<Traits>()?;
        Ok(self.state.read(&*lock).live_slot(id)?.enabled)
    }

    /// Enable a timer. Its schedule is unchanged; if its interval elapsed
    /// while it was disabled, it fires once on the next tick.
    pub fn enable(&self, id: SlotId) -> Result<(), UpdateTimerError> {
        self.update_enabled(id, |_| true)
    }

    /// Disable a timer. A disabled timer never fires but keeps its slot and
    /// schedule.
    pub fn disable(&self, id: SlotId) -> Result<(), UpdateTimerError> {
        self.update_enabled(id, |_| false)
    }

    /// Enable a timer if it's disabled, and vice versa.
    pub fn toggle(&self, id: SlotId) -> Result<(), UpdateTimerError> {
        self.update_enabled(id, |enabled| !enabled)
    }

    fn update_enabled(
        &self,
        id: SlotId,
        f: impl FnOnce(bool) -> bool,
    ) -> Result<(), UpdateTimerError> {
        let mut lock = lock_cpu::<Traits>()?;
        let slot = self.state.write(&mut *lock).live_slot_mut(id)?;
        slot.enabled = f(slot.enabled);
        Ok(())
    }

    /// Enable every timer.
    pub fn enable_all(&self) -> Result<(), PoolError> {
        self.update_all_enabled(true)
    }

    /// Disable every timer.
    pub fn disable_all(&self) -> Result<(), PoolError> {
        self.update_all_enabled(false)
    }

    fn update_all_enabled(&self, enabled: bool) -> Result<(), PoolError> {
        let mut lock = lock_cpu::<Traits>()?;
        for slot in self.state.write(&mut *lock).slots.iter_mut() {
            if slot.is_in_use() {
                slot.enabled = enabled;
            }
        }
        Ok(())
    }

    /// Get the number of slots in use, including disabled ones.
    pub fn count(&self) -> Result<usize, PoolError> {
        let lock = lock_cpu::<Traits>()?;
        Ok(N - self.state.read(&*lock).num_free())
    }

    /// Get the number of free slots.
    pub fn available_count(&self) -> Result<usize, PoolError> {
        let lock = lock_cpu::<Traits>()?;
        Ok(self.state.read(&*lock).num_free())
    }

    /// Get a snapshot of a timer's state.
    pub fn slot_info(&self, id: SlotId) -> Result<SlotInfo, QueryTimerError> {
        let lock = lock_cpu::<Traits>()?;
        let slot = self.state.read(&*lock).live_slot(id)?;
        Ok(SlotInfo {
            interval: slot.interval,
            max_runs: slot.max_runs,
            runs_so_far: slot.runs_so_far,
            enabled: slot.enabled,
            last_fire_time: slot.last_fire_time,
        })
    }
}

impl<Traits: PortTraits, const N: usize> Init for TimerPool<Traits, N> {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self::new();
}

impl<Traits: PortTraits, const N: usize> Default for TimerPool<Traits, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Traits: PortTraits, const N: usize> fmt::Debug for TimerPool<Traits, N> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TimerPool")
            .field("self", &(self as *const _))
            .field("state", &self.state)
            .finish()
    }
}
