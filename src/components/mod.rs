//! Scene components whose records are persisted as JSON descriptors.

pub mod specular_probe;
