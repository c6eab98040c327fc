//! Request handlers.

pub mod catalog;
pub mod health;

pub use catalog::*;
pub use health::*;
