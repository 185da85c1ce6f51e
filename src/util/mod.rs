//! Internal utilities.
//!
//! Deliberately minimal and dependency-free.

pub mod arena;

pub use arena::{Arena, ArenaIndex};
