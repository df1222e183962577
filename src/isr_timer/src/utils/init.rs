/// Trait for types having a constant default value. This is essentially a
/// constant version of `Default`.
///
/// Every table the pool keeps is built from `INIT` values so that a pool can
/// be placed in a `static`.
pub trait Init {
    /// The default value.
    const INIT: Self;
}

impl<Tag: ?Sized> Init for tokenlock::SingletonTokenId<Tag> {
    const INIT: Self = Self::new();
}
