//! Synchronization primitives for the runtime memory subsystem
//!
//! This module provides thread-safe synchronization primitives
//! for use in a no_std environment.

pub use spin::{Mutex, MutexGuard, Once, RwLock, RwLockReadGuard, RwLockWriteGuard};
pub use core::sync::atomic::{
    AtomicBool, AtomicI32, AtomicU32, AtomicU64, AtomicUsize, Ordering, fence,
};
