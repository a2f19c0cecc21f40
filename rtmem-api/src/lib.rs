//! rtmem API - Core interfaces and types for the runtime memory subsystem
//!
//! This crate provides the interfaces, types, and error handling shared by the
//! tiny-object allocator and the statistics aggregator, and the seams through
//! which they talk to the general allocator and the garbage collector.
//!
//! # Architecture
//!
//! - **Core**: Scalar types and alignment helpers
//! - **Error**: Common error type and handling mechanisms
//! - **Memory**: Allocation requests, pause events and collaborator traits
//! - **Sync**: Synchronization re-exports for no_std
//!
//! # Usage
//!
//! ```rust
//! use rtmem_api::{AllocationRequest, Error, Result};
//!
//! fn check(req: &AllocationRequest) -> Result<()> {
//!     if req.size > 16 {
//!         return Err(Error::InvalidRequest("too large".into()));
//!     }
//!     Ok(())
//! }
//!
//! assert!(check(&AllocationRequest::noscan(8, 8)).is_ok());
//! ```

#![no_std]
#![warn(missing_docs)]

#[cfg(feature = "std")]
extern crate std;

extern crate alloc;

pub mod core;
pub mod error;
pub mod memory;
pub mod sync;

pub use crate::core::types::*;
pub use crate::error::{Error, ErrorContext, Result};
pub use crate::memory::interface::{ChunkSource, Clock, Collector, Reclaimer};
pub use crate::memory::types::{AllocationRequest, PauseEvent};
