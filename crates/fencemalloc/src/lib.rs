//! Allocation tracking with guard bands.
//!
//! Every block handed out by `malloc`, `calloc`, `realloc` or one of the
//! aligned entry points is framed by guard words and registered, so overruns are caught when the block is
//! freed or checked and anything still allocated at exit is listed.
//! Build as a `cdylib` and load with `LD_PRELOAD`, or use `FenceMalloc`
//! as a Rust global allocator.

extern crate libc;

pub mod allocator;
pub mod api;
pub mod block;
pub mod config;
pub mod diag;
pub mod fault;
pub mod init;
pub mod platform;
pub mod reentrancy;
pub mod report;
pub mod sync;
pub mod trace;
pub mod util;

#[cfg(feature = "global-allocator")]
mod global_alloc;

#[cfg(feature = "global-allocator")]
pub use global_alloc::FenceMalloc;

pub use allocator::{RealAllocator, TrackingContext, UnderlyingAllocator};
pub use api::{
    allocation_count, check_integrity, ignore_current_allocations, real_usage, show_allocations,
    usage,
};
pub use block::integrity::Corruption;
pub use fault::ErrorKind;
pub use init::{init, shutdown};
