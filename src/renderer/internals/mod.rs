/// "Internals" refers to low-level objects that are used to implement the "Resources" objects.
/// They should not be used directly by the user.

pub mod bindless;
pub mod format;
pub mod memory;
pub mod memory_pool;
pub mod upload;
