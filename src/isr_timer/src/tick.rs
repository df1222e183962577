//! Tick processing
use core::mem;

use crate::{
    error::HandleTickError,
    klock::{assume_cpu_lock, lock_cpu, CpuLockGuard},
    slot::{Action, Pending},
    time::{self, Ticks},
    PortTraits, TimerPool,
};

impl<Traits: PortTraits, const N: usize> TimerPool<Traits, N> {
    /// Dispatch every timer that is due. Meant to be called periodically by
    /// the platform's timer interrupt handler.
    ///
    /// Processing is divided into two phases:
    ///
    /// 1. With CPU Lock active, the current tick count is read once and every
    ///    slot is examined. A due slot has its schedule re-anchored to the
    ///    current tick count and its run count advanced, and is marked for
    ///    dispatching.
    ///
    /// 2. The marked slots are visited in index order. Each action is taken
    ///    with CPU Lock inactive. A slot whose run budget is exhausted is
    ///    freed after its action returns.
    ///
    /// <center>
    ///
    #[doc = svgbobdoc::transform!(
    /// ```svgbob
    ///  "phase 1 (CPU Lock)"        "phase 2"
    ///  .------------------.  .-----------------------------------.
    ///  |  mark slot 0     |  |  take pending, unlock, invoke #0  |
    ///  |  mark slot 1     |  |  re-lock, free #0 if exhausted    |
    ///  |  ...             +->|  take pending, unlock, invoke #3  |
    ///  |  mark slot N-1   |  |  re-lock, free #3 if exhausted    |
    ///  '------------------'  '-----------------------------------'
    /// ```
    )]
    ///
    /// </center>
    ///
    /// Because the mark is consumed in the second phase, a slot removed by an
    /// earlier action of the same pass is not dispatched. A slot admitted by
    /// an action is not examined until the next call.
    ///
    /// A slot is dispatched at most once per call, however late the call is.
    /// Missed periods are not made up for.
    ///
    /// If an action unwinds, the pass ends there. The unwinding action's slot
    /// is still freed if its run budget is exhausted, and the slots that were
    /// marked but not reached yet get their run back. The pool accepts the
    /// next call normally.
    ///
    /// Returns `BadContext` if CPU Lock is active or if this method is called
    /// from an action being dispatched by this method.
    pub fn handle_tick(&self) -> Result<(), HandleTickError> {
        let mut lock = lock_cpu::<Traits>()?;
        let state = self.state.write(&mut *lock);

        if state.tick_in_progress {
            return Err(HandleTickError::BadContext);
        }

        // Safety: CPU Lock active
        let now = unsafe { time::now::<Traits>() };

        let mut any_pending = false;
        for slot in state.slots.iter_mut() {
            let elapsed = time::elapsed_for::<Traits>(slot.last_fire_time, now);
            any_pending |= slot.mark(now, elapsed) != Pending::None;
        }

        if !any_pending {
            return Ok(());
        }

        state.tick_in_progress = true;
        drop(lock);

        // `Dispatch::drop` closes the pass, whether the loop completes or an
        // action unwinds
        let mut dispatch = Dispatch {
            pool: self,
            now,
            next_index: 0,
            deferred_deletion: None,
        };

        // Actions run with CPU Lock inactive
        while let Some(action) = dispatch.take_next_action() {
            action.invoke();
        }

        Ok(())
    }
}

/// The state of the second phase of [`TimerPool::handle_tick`].
struct Dispatch<'a, Traits: PortTraits, const N: usize> {
    pool: &'a TimerPool<Traits, N>,
    /// The tick count read by the first phase.
    now: Ticks,
    /// The slots before this index have been visited.
    next_index: usize,
    /// The slot (and its generation) to free when the running action
    /// returns.
    deferred_deletion: Option<(usize, u32)>,
}

impl<Traits: PortTraits, const N: usize> Dispatch<'_, Traits, N> {
    fn relock(&self) -> CpuLockGuard<Traits> {
        // Safety: CPU Lock is only ever left active here by an action that
        // entered it and returned (or unwound) without leaving it. Such an
        // action hands CPU Lock over to the pool, and no `CpuLockGuard`
        // exists at this point.
        lock_cpu().unwrap_or_else(|_| unsafe { assume_cpu_lock() })
    }

    /// Complete the action that has just returned and take the next marked
    /// action. Returns `None` after the last slot.
    fn take_next_action(&mut self) -> Option<Action> {
        let mut lock = self.relock();
        self.finish_action(&mut lock);

        let state = self.pool.state.write(&mut *lock);
        while self.next_index < N {
            let i = self.next_index;
            self.next_index += 1;

            let slot = &mut state.slots[i];
            let pending = mem::replace(&mut slot.pending, Pending::None);
            if let (Pending::RunOnly | Pending::RunAndDelete, Some(action)) =
                (pending, slot.action)
            {
                if pending == Pending::RunAndDelete {
                    self.deferred_deletion = Some((i, slot.generation));
                }
                return Some(action);
            }
        }

        None
    }

    fn finish_action(&mut self, lock: &mut CpuLockGuard<Traits>) {
        let Some((i, generation)) = self.deferred_deletion.take() else {
            return;
        };
        let state = self.pool.state.write(&mut **lock);
        let slot = &state.slots[i];

        // The action might have removed the slot (and another action or this
        // one might have claimed it again)
        if slot.is_in_use() && slot.generation == generation {
            state.release(i, self.now);
            pool_log!(debug, "slot {i} has exhausted its run budget");
        }
    }
}

impl<Traits: PortTraits, const N: usize> Drop for Dispatch<'_, Traits, N> {
    fn drop(&mut self) {
        let mut lock = self.relock();
        self.finish_action(&mut lock);

        // Non-empty only if an action has unwound. The remaining marks were
        // not dispatched, so they must not count against the run budgets.
        let state = self.pool.state.write(&mut *lock);
        for slot in state.slots[self.next_index..].iter_mut() {
            if mem::replace(&mut slot.pending, Pending::None) != Pending::None {
                slot.runs_so_far -= 1;
            }
        }

        state.tick_in_progress = false;
    }
}
