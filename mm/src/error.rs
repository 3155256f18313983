//! Unified error type for the swap and copy-on-write paths.
//!
//! Conditions that would halt a single-core teaching kernel (no free swap
//! slot, no frame for a copy, nothing evictable, contradictory page table
//! state) are reported as values instead, so the caller can terminate or
//! block the process that triggered them and keep the rest of the system
//! running.

use core::fmt;

use swapvm_abi::{FrameNumber, ProcessIndex, VirtAddr};

use crate::paging_defs::PageFlags;
use crate::swap_slots::SlotIndex;

/// Memory manager error.
///
/// The first group is resource exhaustion, the second internal consistency
/// violations, the last failures reported by collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmError {
    /// Every swap slot is occupied.
    NoSwapSlot,
    /// The frame allocator is empty.
    NoMemory,
    /// No live process exists to evict from.
    NoVictimProcess,
    /// The victim process has no resident page even after the accessed sweep.
    NoEvictablePage { process: ProcessIndex },

    /// Swap-in was asked to restore an entry that is not swapped out.
    NotSwapped { vaddr: VirtAddr },
    /// The address has no page table entry.
    NotMapped { vaddr: VirtAddr },
    /// A fault arrived for an entry no handler can resolve.
    UnhandledFault { vaddr: VirtAddr, flags: PageFlags },
    /// A resident entry names a frame with no reverse-map backpointers.
    UntrackedFrame { frame: FrameNumber },
    /// The faulting entry is missing from the frame's or slot's backpointers.
    UntrackedMapping { process: ProcessIndex, vaddr: VirtAddr },
    /// The process already holds a backpointer for this frame or slot.
    AlreadyAttached { process: ProcessIndex },
    /// Frame number outside the reverse-map table.
    InvalidFrame { frame: FrameNumber },
    /// Slot index outside the pool, or a free slot named by an entry.
    InvalidSlot { slot: SlotIndex },
    /// Table state disagrees with the page tables.
    Inconsistent,

    /// The swap device failed a transfer.
    BlockIo { block: u64 },
    /// The entry is already resident or swapped.
    AlreadyMapped { vaddr: VirtAddr },
    /// The process slot is not live.
    InvalidProcess { process: ProcessIndex },
}

impl MmError {
    /// True for the exhaustion cases a caller may resolve by freeing memory.
    pub const fn is_resource_exhaustion(&self) -> bool {
        matches!(
            self,
            Self::NoSwapSlot
                | Self::NoMemory
                | Self::NoVictimProcess
                | Self::NoEvictablePage { .. }
        )
    }
}

impl fmt::Display for MmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSwapSlot => write!(f, "no free swap slot"),
            Self::NoMemory => write!(f, "out of memory for page allocation"),
            Self::NoVictimProcess => write!(f, "no live process to evict from"),
            Self::NoEvictablePage { process } => {
                write!(f, "no evictable page in {} after accessed sweep", process)
            }
            Self::NotSwapped { vaddr } => write!(f, "page {} is not swapped out", vaddr),
            Self::NotMapped { vaddr } => write!(f, "address {} not mapped", vaddr),
            Self::UnhandledFault { vaddr, flags } => {
                write!(f, "page fault at {} cannot be handled (flags {:?})", vaddr, flags)
            }
            Self::UntrackedFrame { frame } => write!(f, "{} has no reverse mappings", frame),
            Self::UntrackedMapping { process, vaddr } => {
                write!(f, "{} mapping at {} missing from reverse map", process, vaddr)
            }
            Self::AlreadyAttached { process } => {
                write!(f, "{} already holds a backpointer", process)
            }
            Self::InvalidFrame { frame } => write!(f, "{} outside the reverse map", frame),
            Self::InvalidSlot { slot } => write!(f, "invalid swap slot {}", slot),
            Self::Inconsistent => write!(f, "reverse map disagrees with page tables"),
            Self::BlockIo { block } => write!(f, "swap device I/O failed at block {}", block),
            Self::AlreadyMapped { vaddr } => write!(f, "address {} already mapped", vaddr),
            Self::InvalidProcess { process } => write!(f, "{} is not a live process", process),
        }
    }
}

/// Convenience result type for memory management operations.
pub type MmResult<T = ()> = Result<T, MmError>;
