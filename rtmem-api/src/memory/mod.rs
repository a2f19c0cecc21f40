//! Memory management module

pub mod interface;
pub mod types;

pub use interface::*;
pub use types::*;
