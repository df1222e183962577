//! Utility
//!
//! **This module is exempt from the API stability guarantee.** It's exposed
//! only because [`TimerPool`] implements [`Init`].
//!
//! [`TimerPool`]: crate::TimerPool

/// Emit a `log` record if the `log` feature is enabled. Expands to nothing
/// otherwise, so the arguments must be free of side effects.
macro_rules! pool_log {
    ($level:ident, $($args:tt)*) => {{
        #[cfg(feature = "log")]
        log::$level!($($args)*);
    }};
}

mod init;
mod slot_bitmap;
pub use self::{init::*, slot_bitmap::*};
