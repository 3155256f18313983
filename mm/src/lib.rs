//! Swap-backed virtual memory for the swapvm kernel.
//!
//! The memory manager keeps a reverse map from every physical frame to the
//! page table entries naming it, a pool of swap slots that take over those
//! backpointers when a frame is evicted, and per-process resident set
//! sizes. On top of these sit the swap-out path (victim selection and
//! eviction), the swap-in path, the copy-on-write fault handler and the
//! process lifecycle hooks (map, fork, unmap, exit).
//!
//! Frame allocation, block I/O and page-table walking belong to the rest of
//! the kernel and are reached through the traits in [`hal`].

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod cow;
pub mod error;
pub mod hal;
pub mod mm_constants;
pub mod paging_defs;
pub mod process_vm;
pub mod rmap;
pub mod rss;
pub mod swap_config;
pub mod swap_in;
pub mod swap_out;
pub mod swap_slots;
pub mod swap_state;
pub mod victim;

#[cfg(test)]
mod test_fixtures;
#[cfg(test)]
mod tests_cow_edge;

pub use cow::{FaultResolution, is_cow_fault};
pub use error::{MmError, MmResult};
pub use hal::{AddressSpaces, FaultContext, FrameAllocator, Machine, SwapDevice};
pub use paging_defs::{PageFlags, Pte};
pub use rmap::{Backpointers, FrameRmapTable};
pub use swap_config::SwapConfig;
pub use swap_out::SwapOutReport;
pub use swap_slots::{SlotIndex, SwapSlot, SwapSlotPool};
pub use swap_state::{SwapManager, SwapState, SwapStats};
pub use victim::Victim;
