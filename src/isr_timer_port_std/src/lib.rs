//! Simulation environment for running [`isr_timer`] pools on a hosted
//! environment.
//!
//! [`use_port!`] implements the port traits on a new type. CPU Lock is
//! simulated by a process-wide lock owned by at most one thread at a time, and
//! the tick count is the number of milliseconds elapsed since the first time
//! the clock was read. [`TickDriver`] plays the role of the hardware timer
//! interrupt by calling [`TimerPool::handle_tick`] from a background thread.
//!
//! ```
//! use isr_timer::{Action, TimerPool};
//! use isr_timer_port_std::{TickDriver, TickDriverOptions};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! isr_timer_port_std::use_port!(unsafe struct SystemTraits);
//!
//! static POOL: TimerPool<SystemTraits> = TimerPool::new();
//! static COUNT: AtomicUsize = AtomicUsize::new(0);
//!
//! fn count() {
//!     COUNT.fetch_add(1, Ordering::Relaxed);
//! }
//!
//! fn main() {
//!     let driver = TickDriver::start(&POOL, TickDriverOptions::default());
//!     POOL.set_timeout(5, Action::Nullary(count)).unwrap();
//!
//!     while COUNT.load(Ordering::Relaxed) == 0 {
//!         std::thread::yield_now();
//!     }
//!     driver.stop();
//! }
//! ```
//!
//! [`TimerPool::handle_tick`]: isr_timer::TimerPool::handle_tick
#![deny(unsafe_op_in_unsafe_fn)]
use atomic_ref::AtomicRef;
use isr_timer::{PortTraits, Ticks};
use spin::Mutex as SpinMutex;
use std::{
    sync::atomic::Ordering,
    thread::{self, ThreadId},
    time::Instant,
};

mod driver;

pub use self::driver::{TickDriver, TickDriverOptions};

/// Used by `use_port!`
#[doc(hidden)]
pub extern crate isr_timer;

/// Implemented on a port type by [`use_port!`].
///
/// # Safety
///
/// Only meant to be implemented by [`use_port!`].
#[doc(hidden)]
pub unsafe trait PortInstance: PortTraits {
    fn port_state() -> &'static State;
}

/// The internal state of the port.
///
/// # Safety
///
/// For the safety information of this type's methods, see the documentation of
/// the corresponding trait methods of `Port*`.
#[doc(hidden)]
pub struct State {
    /// The thread currently in a CPU Lock state.
    cpu_lock_owner: SpinMutex<Option<ThreadId>>,
    origin: AtomicRef<'static, Instant>,
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::missing_safety_doc)]
impl State {
    pub const fn new() -> Self {
        Self {
            cpu_lock_owner: SpinMutex::new(None),
            origin: AtomicRef::new(None),
        }
    }

    pub unsafe fn enter_cpu_lock(&self) {
        log::trace!("enter_cpu_lock");
        let current = thread::current().id();

        // Wait until the owner (if any) leaves CPU Lock. This models an
        // interrupt that is pended until it's unmasked.
        loop {
            let mut owner = self.cpu_lock_owner.lock();
            match *owner {
                None => {
                    *owner = Some(current);
                    return;
                }
                Some(thread_id) => {
                    assert_ne!(thread_id, current, "CPU Lock is already active");
                }
            }
            drop(owner);
            thread::yield_now();
        }
    }

    pub unsafe fn leave_cpu_lock(&self) {
        log::trace!("leave_cpu_lock");
        let mut owner = self.cpu_lock_owner.lock();
        assert_eq!(*owner, Some(thread::current().id()));
        *owner = None;
    }

    pub fn is_cpu_lock_active(&self) -> bool {
        *self.cpu_lock_owner.lock() == Some(thread::current().id())
    }

    pub const MAX_TICK_COUNT: Ticks = Ticks::MAX;

    /// Get the number of milliseconds elapsed since the first call, truncated
    /// to [`Ticks`].
    pub fn tick_count(&self) -> Ticks {
        let origin = if let Some(x) = self.origin.load(Ordering::Acquire) {
            x
        } else {
            // Establish an origin point.
            let origin = Box::leak(Box::new(Instant::now()));

            // If another thread has won the race, discard `origin` and use the
            // other thread's one. `Release` makes the contents of `origin`
            // visible to the threads that load it later.
            match self.origin.compare_exchange(
                None,
                Some(origin),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => origin,
                Err(x) => x.unwrap_or(origin),
            }
        };

        let millis = Instant::now().duration_since(*origin).as_millis();

        // Calculate `millis % (MAX_TICK_COUNT + 1)` by truncating upper bits
        millis as Ticks
    }
}

/// Get the tick count observed by the pools of the port `Traits`.
///
/// Unlike the port's `PortTimer::tick_count`, this function can be called
/// from anywhere.
pub fn tick_count<Traits: PortInstance>() -> Ticks {
    Traits::port_state().tick_count()
}

/// Define a port type implementing [`isr_timer::PortThreading`] and
/// [`isr_timer::PortTimer`] on a hosted environment.
///
/// Each port type has its own CPU Lock and clock.
#[macro_export]
macro_rules! use_port {
    (unsafe $vis:vis struct $Traits:ident) => {
        $vis struct $Traits;

        mod port_std_impl {
            use super::$Traits;
            use $crate::isr_timer::{PortThreading, PortTimer, Ticks};
            use $crate::{PortInstance, State};

            pub(super) static PORT_STATE: State = State::new();

            unsafe impl PortInstance for $Traits {
                #[inline]
                fn port_state() -> &'static State {
                    &PORT_STATE
                }
            }

            // Assume `$Traits: PortInstance`
            unsafe impl PortThreading for $Traits {
                unsafe fn enter_cpu_lock() {
                    unsafe { PORT_STATE.enter_cpu_lock() }
                }

                unsafe fn leave_cpu_lock() {
                    unsafe { PORT_STATE.leave_cpu_lock() }
                }

                fn is_cpu_lock_active() -> bool {
                    PORT_STATE.is_cpu_lock_active()
                }
            }

            impl PortTimer for $Traits {
                const MAX_TICK_COUNT: Ticks = State::MAX_TICK_COUNT;

                unsafe fn tick_count() -> Ticks {
                    PORT_STATE.tick_count()
                }
            }
        }
    };
}
