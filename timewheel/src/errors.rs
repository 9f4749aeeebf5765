/// This error indicates an invalid [`crate::Allocator::Id`] was used.
///
/// Within the context of one [`crate::Allocator`], an id can be invalid if it
/// has never been created by that [`crate::Allocator`], or if it has been
/// removed or popped from the [`crate::Allocator`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct InvalidIdError;
