//! Result codes and per-operation error types
use core::{fmt, mem::transmute};

/// The macro to define [`ResultCode`].
macro_rules! define_result_code {
    (
        $( #[$meta:meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident = $vd:expr
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta] )*
                $vname = $vd
            ),*
        }

        impl ResultCode {
            /// Get the short name of the result code.
            ///
            /// # Examples
            ///
            /// ```
            /// use isr_timer::ResultCode;
            /// assert_eq!(ResultCode::NoFreeSlot.as_str(), "NoFreeSlot");
            /// ```
            pub fn as_str(self) -> &'static str {
                match self {
                    $(
                        Self::$vname => stringify!($vname),
                    )*
                }
            }

            fn fmt(self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl fmt::Debug for ResultCode {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                (*self).fmt(f)
            }
        }
    };
}

define_result_code! {
    /// All result codes (including success) that the pool's operations can
    /// return.
    ///
    /// The numeric values follow their closest equivalents in μITRON4.0 so
    /// that they can be passed through a C interface unchanged.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[repr(i8)]
    pub enum ResultCode {
        /// The operation was successful. No additional information is available.
        Success = 0,
        /// No callback was supplied to a registration call.
        InvalidCallback = -17,
        /// The current context disallows the operation. CPU Lock is already
        /// active, or [`TimerPool::handle_tick`] was called from a callback.
        ///
        /// [`TimerPool::handle_tick`]: crate::TimerPool::handle_tick
        BadContext = -25,
        /// All slots of the pool are in use.
        NoFreeSlot = -34,
        /// The slot identifier is out of range, or the slot is not in use.
        NotFound = -42,
    }
}

impl ResultCode {
    /// Get a flag indicating whether the code represents a failure.
    ///
    /// Failure codes have negative values.
    #[inline]
    pub fn is_err(self) -> bool {
        (self as i8) < 0
    }

    /// Get a flag indicating whether the code represents a success.
    ///
    /// Success codes have non-negative values.
    #[inline]
    pub fn is_ok(self) -> bool {
        !self.is_err()
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! define_error {
    (
        mod $mod_name:ident {}
        $( #[$meta:meta] )*
        $vis:vis enum $name:ident $(: $($subty:ident),* $(,)*)? {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        ///
        /// See [`ResultCode`] for all result codes and generic descriptions.
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(i8)]
        $vis enum $name {
            $(
                $( #[$vmeta] )*
                // Use the same discriminants as `ResultCode` for cost-free
                // conversion
                $vname = ResultCode::$vname as i8
            ),*
        }

        impl fmt::Debug for $name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                ResultCode::from(*self).fmt(f)
            }
        }

        impl fmt::Display for $name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(ResultCode::from(*self).as_str())
            }
        }

        impl From<Result<(), $name>> for ResultCode {
            #[inline]
            fn from(x: Result<(), $name>) -> Self {
                match x {
                    Ok(()) => Self::Success,
                    Err(e) => Self::from(e),
                }
            }
        }

        impl From<$name> for ResultCode {
            #[inline]
            fn from(x: $name) -> Self {
                // Safety: `ResultCode` and `$name` has the same representation
                //         type, and the representation of `ResultCode` is a
                //         superset of `x`.
                unsafe { transmute(x) }
            }
        }

        #[cfg(test)]
        mod $mod_name {
            use super::*;

            #[test]
            fn to_result_code() {
                $(
                    assert_eq!(
                        ResultCode::$vname,
                        ResultCode::from($name::$vname),
                    );
                )*
            }

            #[test]
            fn result_to_result_code() {
                $(
                    assert_eq!(
                        ResultCode::$vname,
                        ResultCode::from(Err($name::$vname)),
                    );
                )*
                assert_eq!(
                    ResultCode::Success,
                    ResultCode::from(Result::<(), $name>::Ok(())),
                );
            }
        }

        $($(
            $subty!(impl From<_> for $name);
        )*)?

        #[allow(unused_macros)]
        macro_rules! $name {
            (impl From<_> for $dest_ty:ty) => {
                impl From<$name> for $dest_ty {
                    #[inline]
                    fn from(x: $name) -> Self {
                        match x {
                            $(
                                $name::$vname => Self::$vname,
                            )*
                        }
                    }
                }
            };
        }
    };
}

define_error! {
    mod bad_context_error {}
    /// `BadContext`. Used internally by CPU Lock acquisition.
    pub(crate) enum BadContextError {
        BadContext,
    }
}

define_error! {
    mod not_found_error {}
    /// `NotFound`. Used internally by slot lookup.
    pub(crate) enum NotFoundError {
        NotFound,
    }
}

define_error! {
    mod admit_timer_error {}
    /// Error type for [`TimerPool::admit`] and its convenience forms.
    ///
    /// [`TimerPool::admit`]: crate::TimerPool::admit
    pub enum AdmitTimerError: BadContextError {
        /// CPU Lock is active.
        BadContext,
        /// The callback is missing.
        InvalidCallback,
        /// All slots are in use.
        NoFreeSlot,
    }
}

define_error! {
    mod update_timer_error {}
    /// Error type for the operations modifying a live slot:
    /// [`TimerPool::change_interval`], [`TimerPool::restart`],
    /// [`TimerPool::enable`], [`TimerPool::disable`], and
    /// [`TimerPool::toggle`].
    ///
    /// [`TimerPool::change_interval`]: crate::TimerPool::change_interval
    /// [`TimerPool::restart`]: crate::TimerPool::restart
    /// [`TimerPool::enable`]: crate::TimerPool::enable
    /// [`TimerPool::disable`]: crate::TimerPool::disable
    /// [`TimerPool::toggle`]: crate::TimerPool::toggle
    pub enum UpdateTimerError: BadContextError, NotFoundError {
        /// CPU Lock is active.
        BadContext,
        /// The slot identifier is out of range, or the slot is free.
        NotFound,
    }
}

define_error! {
    mod query_timer_error {}
    /// Error type for [`TimerPool::is_enabled`] and
    /// [`TimerPool::slot_info`].
    ///
    /// [`TimerPool::is_enabled`]: crate::TimerPool::is_enabled
    /// [`TimerPool::slot_info`]: crate::TimerPool::slot_info
    pub enum QueryTimerError: BadContextError, NotFoundError {
        /// CPU Lock is active.
        BadContext,
        /// The slot identifier is out of range, or the slot is free.
        NotFound,
    }
}

define_error! {
    mod remove_timer_error {}
    /// Error type for [`TimerPool::remove`].
    ///
    /// [`TimerPool::remove`]: crate::TimerPool::remove
    pub enum RemoveTimerError: BadContextError {
        /// CPU Lock is active.
        BadContext,
        /// The slot identifier is out of range. Removing a free slot is not
        /// an error.
        NotFound,
    }
}

define_error! {
    mod pool_error {}
    /// Error type for the operations affecting the pool as a whole:
    /// [`TimerPool::init`], [`TimerPool::enable_all`],
    /// [`TimerPool::disable_all`], [`TimerPool::count`], and
    /// [`TimerPool::available_count`].
    ///
    /// [`TimerPool::init`]: crate::TimerPool::init
    /// [`TimerPool::enable_all`]: crate::TimerPool::enable_all
    /// [`TimerPool::disable_all`]: crate::TimerPool::disable_all
    /// [`TimerPool::count`]: crate::TimerPool::count
    /// [`TimerPool::available_count`]: crate::TimerPool::available_count
    pub enum PoolError: BadContextError {
        /// CPU Lock is active.
        BadContext,
    }
}

define_error! {
    mod handle_tick_error {}
    /// Error type for [`TimerPool::handle_tick`].
    ///
    /// [`TimerPool::handle_tick`]: crate::TimerPool::handle_tick
    pub enum HandleTickError: BadContextError {
        /// CPU Lock is active, or the call was made by a callback that is
        /// being dispatched by another `handle_tick`.
        BadContext,
    }
}
