/// "Resources" refers to middle-level objects that are created on top of the "Internals".
/// They are relatively intuitive and managed by the user.

pub mod image;
pub mod image_manager;
pub mod texture;
