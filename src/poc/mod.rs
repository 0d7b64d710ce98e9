//! Check definitions, storage access, and selector resolution.

pub mod model;
pub mod resolver;
pub mod store;
