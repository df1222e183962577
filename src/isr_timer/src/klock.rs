//! CPU Lock-protected state
//!
//! Every mutable part of a [`TimerPool`] lives in a [`CpuLockCell`]. A cell is
//! opened with a [`CpuLockToken`], and the only way to get the token is
//! [`lock_cpu`], which succeeds only when the calling context has just entered
//! CPU Lock through the port. [`TimerPool::handle_tick`] is excluded by the
//! same CPU Lock, so holding the token means the slot table cannot change
//! under the holder's feet. Dropping the [`CpuLockGuard`] leaves CPU Lock and
//! gives up the token.
//!
//! [`TimerPool`]: crate::TimerPool
//! [`TimerPool::handle_tick`]: crate::TimerPool::handle_tick
use core::{fmt, ops};
use tokenlock::UnsyncTokenLock;

use crate::{error::BadContextError, utils::Init, PortThreading};

pub(crate) struct CpuLockTag<Traits>(Traits);

/// Grants access to every [`CpuLockCell`] of the port `Traits`.
pub(crate) type CpuLockToken<Traits> = tokenlock::UnsyncSingletonToken<CpuLockTag<Traits>>;

/// Identifies [`CpuLockToken`] as the token accepted by a [`CpuLockCell`].
pub(crate) type CpuLockKeyhole<Traits> = tokenlock::SingletonTokenId<CpuLockTag<Traits>>;

/// A cell whose contents can only be reached while CPU Lock is active.
pub(crate) struct CpuLockCell<Traits, T: ?Sized>(UnsyncTokenLock<T, CpuLockKeyhole<Traits>>);

impl<Traits, T> CpuLockCell<Traits, T> {
    pub(crate) const fn new(x: T) -> Self {
        Self(UnsyncTokenLock::new(CpuLockKeyhole::INIT, x))
    }
}

/// Shows the contents if CPU Lock can be entered. A pool formatted from a
/// context already in CPU Lock shows `< locked >` instead.
impl<Traits: PortThreading, T: fmt::Debug> fmt::Debug for CpuLockCell<Traits, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match lock_cpu::<Traits>() {
            Ok(lock) => f
                .debug_tuple("CpuLockCell")
                .field(self.0.read(&*lock))
                .finish(),
            Err(_) => f.write_str("CpuLockCell(< locked >)"),
        }
    }
}

impl<Traits, T> ops::Deref for CpuLockCell<Traits, T> {
    type Target = UnsyncTokenLock<T, CpuLockKeyhole<Traits>>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Enter CPU Lock and get the guard holding the token.
///
/// Fails with `BadContext` if the current context is already in CPU Lock,
/// which is how every pool operation rejects calls made under CPU Lock.
pub(crate) fn lock_cpu<Traits: PortThreading>() -> Result<CpuLockGuard<Traits>, BadContextError> {
    // Safety: The pool is the only caller of `try_enter_cpu_lock`
    if unsafe { Traits::try_enter_cpu_lock() } {
        // Safety: CPU Lock was inactive until now, so no `CpuLockGuard`
        //         exists
        Ok(unsafe { assume_cpu_lock() })
    } else {
        Err(BadContextError::BadContext)
    }
}

/// Take over a CPU Lock state that somebody else entered.
///
/// # Safety
///
/// CPU Lock must be active, and no `CpuLockGuard` may exist.
pub(crate) unsafe fn assume_cpu_lock<Traits: PortThreading>() -> CpuLockGuard<Traits> {
    debug_assert!(Traits::is_cpu_lock_active());

    CpuLockGuard {
        // Safety: Upheld by the caller
        token: unsafe { CpuLockToken::new_unchecked() },
    }
}

/// Holds [`CpuLockToken`] while CPU Lock is active. Leaves CPU Lock when
/// dropped.
pub(crate) struct CpuLockGuard<Traits: PortThreading> {
    token: CpuLockToken<Traits>,
}

impl<Traits: PortThreading> Drop for CpuLockGuard<Traits> {
    fn drop(&mut self) {
        // Safety: CPU Lock active, entered or taken over by the pool
        unsafe {
            Traits::leave_cpu_lock();
        }
    }
}

impl<Traits: PortThreading> ops::Deref for CpuLockGuard<Traits> {
    type Target = CpuLockToken<Traits>;
    fn deref(&self) -> &Self::Target {
        &self.token
    }
}

impl<Traits: PortThreading> ops::DerefMut for CpuLockGuard<Traits> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.token
    }
}
