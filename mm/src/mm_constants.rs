//! Memory manager and swap area constants.
//!
//! Page and process-table sizes are re-exported from `swapvm_abi` so the
//! memory manager never defines its own copies.

pub use swapvm_abi::{MAX_PROCESSES, PAGE_SHIFT};

/// 4KB page size.
pub const PAGE_SIZE_4KB: u64 = swapvm_abi::PAGE_SIZE;

/// 4KB page size as usize for buffer lengths.
pub const PAGE_SIZE_4KB_USIZE: usize = swapvm_abi::PAGE_SIZE_USIZE;

/// Size of one block on the swap device.
pub const SWAP_BLOCK_SIZE: u64 = 512;

/// Device blocks backing one swap slot.
pub const BLOCKS_PER_PAGE: u64 = PAGE_SIZE_4KB / SWAP_BLOCK_SIZE;

/// First device block of the swap area; blocks 0 and 1 hold the boot and
/// super blocks.
pub const SWAP_START_BLOCK: u64 = 2;

/// Default swap slot count (4 MiB of swap).
pub const DEFAULT_SWAP_SLOTS: u32 = 1024;

/// Default number of physical frames covered by the reverse map (32 MiB).
pub const DEFAULT_FRAME_COUNT: u32 = 8192;

/// Share of Accessed entries cleared by one second-chance sweep.
pub const DEFAULT_SWEEP_PERCENT: u32 = 10;
