//! A software timer multiplexer for interrupt-driven systems.
//!
//! `isr_timer` lets an application register many independent periodic or
//! one-shot callbacks while consuming exactly one hardware timer interrupt.
//! A [`TimerPool`] owns a fixed-capacity table of timer slots. The platform
//! calls [`TimerPool::handle_tick`] from its timer interrupt handler (or an
//! equivalent periodic trigger), and the pool dispatches every callback that
//! is due.
//!
//! # Ports
//!
//! The pool is generic over a *port*, a type implementing [`PortThreading`]
//! (the critical section protecting the slot table, called *CPU Lock*) and
//! [`PortTimer`] (the monotonic millisecond counter). A hosted simulation port
//! is provided by the `isr_timer_port_std` crate.
//!
//! # Contexts
//!
//! Every operation, including [`TimerPool::handle_tick`], enters CPU Lock for
//! a bounded amount of time and fails with `BadContext` if CPU Lock is
//! already active. CPU Lock is released while a callback runs, so callbacks
//! may freely use the pool they were registered in.
//!
//! # Example
//!
//! ```
//! use isr_timer::{Action, PortThreading, PortTimer, Ticks, TimerPool};
//! # use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
//! # static CPU_LOCK: AtomicBool = AtomicBool::new(false);
//! # static NOW: AtomicU32 = AtomicU32::new(0);
//!
//! struct Board;
//!
//! unsafe impl PortThreading for Board {
//!     unsafe fn enter_cpu_lock() {
//!         CPU_LOCK.store(true, Ordering::Relaxed);
//!     }
//!     unsafe fn leave_cpu_lock() {
//!         CPU_LOCK.store(false, Ordering::Relaxed);
//!     }
//!     fn is_cpu_lock_active() -> bool {
//!         CPU_LOCK.load(Ordering::Relaxed)
//!     }
//! }
//!
//! impl PortTimer for Board {
//!     unsafe fn tick_count() -> Ticks {
//!         NOW.load(Ordering::Relaxed)
//!     }
//! }
//!
//! static POOL: TimerPool<Board> = TimerPool::new();
//!
//! fn blink() {}
//!
//! let id = POOL.set_interval(500, Action::Nullary(blink)).unwrap();
//! assert_eq!(POOL.count(), Ok(1));
//!
//! NOW.store(500, Ordering::Relaxed);
//! POOL.handle_tick().unwrap();
//!
//! POOL.remove(id).unwrap();
//! assert_eq!(POOL.available_count(), Ok(16));
//! ```
#![cfg_attr(not(test), no_std)] // Link `std` only when building a test (`cfg(test)`)
#![deny(unsafe_op_in_unsafe_fn)]

#[macro_use]
pub mod utils;

pub mod error;
mod klock;
mod pool;
mod slot;
mod tick;
mod time;

#[cfg(test)]
mod tests;

pub use self::{
    error::*,
    pool::{SlotInfo, TimerPool},
    slot::{Action, Runs, SlotId},
    time::Ticks,
};

/// The default number of slots of a [`TimerPool`].
pub const DEFAULT_NUM_SLOTS: usize = 16;

/// The maximum number of slots a [`TimerPool`] can have.
pub const MAX_NUM_SLOTS: usize = utils::SLOT_BITMAP_LEN;

/// Implemented by a port. Provides the CPU Lock state, a critical section
/// that prevents [`TimerPool::handle_tick`] from preempting the current
/// context.
///
/// On a single-core microcontroller, entering CPU Lock usually means masking
/// the timer interrupt (or all interrupts).
///
/// # Safety
///
/// While CPU Lock is active, no other context may enter CPU Lock or call into
/// a [`TimerPool`] using this port. [`Self::is_cpu_lock_active`] must
/// accurately report the state of the current context.
pub unsafe trait PortThreading: Sized + Send + Sync + 'static {
    /// Enter a CPU Lock state.
    ///
    /// # Safety
    ///
    /// Only meant to be called by the pool. CPU Lock must be inactive.
    unsafe fn enter_cpu_lock();

    /// Leave a CPU Lock state.
    ///
    /// # Safety
    ///
    /// Only meant to be called by the pool. CPU Lock must be active.
    unsafe fn leave_cpu_lock();

    /// Enter a CPU Lock state and return `true` if the current context is
    /// not in a CPU Lock state. Otherwise, return `false`.
    ///
    /// # Safety
    ///
    /// Only meant to be called by the pool.
    unsafe fn try_enter_cpu_lock() -> bool {
        if Self::is_cpu_lock_active() {
            false
        } else {
            // Safety: CPU Lock inactive
            unsafe { Self::enter_cpu_lock() };
            true
        }
    }

    /// Return a flag indicating whether a CPU Lock state is active.
    fn is_cpu_lock_active() -> bool;
}

/// Implemented by a port. Provides the time source.
pub trait PortTimer {
    /// The maximum value that [`Self::tick_count`] can return. The counter
    /// wraps around to zero after reaching this value.
    ///
    /// Must be greater than zero. A 24-bit real-time counter would use
    /// `0xff_ffff`.
    const MAX_TICK_COUNT: Ticks = Ticks::MAX;

    /// Read the current tick count, conceptually the number of milliseconds
    /// elapsed since boot (modulo `MAX_TICK_COUNT + 1`).
    ///
    /// # Safety
    ///
    /// Only meant to be called by the pool. CPU Lock is active.
    unsafe fn tick_count() -> Ticks;
}

/// The combination of the traits a port must implement to drive a
/// [`TimerPool`].
pub trait PortTraits: PortThreading + PortTimer {}
impl<T: PortThreading + PortTimer> PortTraits for T {}
