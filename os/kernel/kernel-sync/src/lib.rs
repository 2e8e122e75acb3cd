//! # Kernel synchronization primitives
//!
//! Spin-based locks for code that must never sleep: every waiter burns its
//! CPU until the holder lets go, so critical sections have to stay short.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod spin_lock;

pub use spin_lock::{SpinLock, SpinLockGuard};
