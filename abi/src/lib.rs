//! swapvm shared ABI types
//!
//! Plain value types shared by the kernel support library and the memory
//! manager: addresses, frame numbers and process slot indices. Keeping them
//! in one crate stops the two sides from growing incompatible copies.

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

pub mod addr;
pub mod task;

/// Standard 4KB page size.
pub const PAGE_SIZE: u64 = 0x1000;

/// Page size as usize for buffer lengths and slicing.
pub const PAGE_SIZE_USIZE: usize = PAGE_SIZE as usize;

/// log2 of [`PAGE_SIZE`]; frame numbers are physical addresses shifted by this.
pub const PAGE_SHIFT: u32 = 12;

pub use addr::*;
pub use task::*;
