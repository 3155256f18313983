//! Physical and virtual address types for type-safe memory operations.
//!
//! These newtypes keep physical addresses, virtual addresses and frame
//! numbers apart. They are `#[repr(transparent)]` wrappers and compile down
//! to the raw integers.
//!
//! # Address Types
//!
//! - [`PhysAddr`]: a physical memory address.
//! - [`VirtAddr`]: a virtual address inside one process's address space.
//! - [`FrameNumber`]: a physical address divided by the page size.
//!
//! # Example
//!
//! ```
//! use swapvm_abi::addr::{FrameNumber, PhysAddr, VirtAddr};
//!
//! let frame = FrameNumber::new(3);
//! assert_eq!(frame.phys_addr(), PhysAddr::new(0x3000));
//! assert_eq!(VirtAddr::new(0x3fff).page_base(), VirtAddr::new(0x3000));
//! ```

use core::fmt;

use crate::{PAGE_SHIFT, PAGE_SIZE};

/// A physical memory address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PhysAddr(pub u64);

/// A virtual memory address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VirtAddr(pub u64);

/// Index of a physical page frame (physical address >> 12).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct FrameNumber(pub u32);

// =============================================================================
// PhysAddr implementation
// =============================================================================

impl PhysAddr {
    /// The null physical address.
    pub const NULL: Self = Self(0);

    #[inline]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Frame containing this address.
    #[inline]
    pub const fn frame(self) -> FrameNumber {
        FrameNumber((self.0 >> PAGE_SHIFT) as u32)
    }

    #[inline]
    pub const fn page_offset(self) -> u64 {
        self.0 & (PAGE_SIZE - 1)
    }
}

// =============================================================================
// VirtAddr implementation
// =============================================================================

impl VirtAddr {
    /// The null virtual address.
    pub const NULL: Self = Self(0);

    #[inline]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Align address down to the given alignment.
    #[inline]
    pub const fn align_down(self, align: u64) -> Self {
        Self(self.0 & !(align - 1))
    }

    /// Check if address is aligned to the given alignment.
    #[inline]
    pub const fn is_aligned(self, align: u64) -> bool {
        self.0 & (align - 1) == 0
    }

    #[inline]
    pub const fn page_base(self) -> Self {
        self.align_down(PAGE_SIZE)
    }

    #[inline]
    pub const fn page_offset(self) -> u64 {
        self.0 & (PAGE_SIZE - 1)
    }
}

// =============================================================================
// FrameNumber implementation
// =============================================================================

impl FrameNumber {
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// First byte of the frame.
    #[inline]
    pub const fn phys_addr(self) -> PhysAddr {
        PhysAddr((self.0 as u64) << PAGE_SHIFT)
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Display for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame {}", self.0)
    }
}
