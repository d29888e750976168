pub mod components;
pub mod renderer;
