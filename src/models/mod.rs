//! Model module.
//!
//! Contains domain entities and repository pattern for data access.

pub mod share;

pub use share::*;
