//! Page table entry flags and encoding.
//!
//! A [`Pte`] holds flag bits in its low 12 bits and a number in the
//! remaining bits. While PRESENT is set that number is a physical frame;
//! while SWAPPED is set it is the index of the swap slot holding the
//! evicted page. PRESENT and SWAPPED are never set together.

use bitflags::bitflags;
use swapvm_abi::FrameNumber;

use crate::mm_constants::PAGE_SHIFT;
use crate::swap_slots::SlotIndex;

bitflags! {
    /// x86 style page table entry flags.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct PageFlags: u64 {
        /// Page is resident in a physical frame (bit 0).
        const PRESENT       = 1 << 0;
        /// Page is writable (otherwise read-only) (bit 1).
        const WRITABLE      = 1 << 1;
        /// Page is accessible from user mode (bit 2).
        const USER          = 1 << 2;
        /// Write-through caching (bit 3).
        const WRITE_THROUGH = 1 << 3;
        /// Disable caching for this page (bit 4).
        const CACHE_DISABLE = 1 << 4;
        /// Set by hardware when the page is accessed (bit 5).
        const ACCESSED      = 1 << 5;
        /// Set by hardware when the page is written (bit 6).
        const DIRTY         = 1 << 6;

        // Software-defined flags (bits 9-11 are available for OS use)

        /// Entry encodes a swap slot index instead of a frame (bit 9).
        const SWAPPED       = 1 << 9;

        /// User read-write page (PRESENT | WRITABLE | USER).
        const USER_RW = Self::PRESENT.bits() | Self::WRITABLE.bits() | Self::USER.bits();
        /// User read-only page (PRESENT | USER).
        const USER_RO = Self::PRESENT.bits() | Self::USER.bits();
    }
}

impl PageFlags {
    /// Bits that make up the entry's flag field.
    pub const FLAGS_MASK: u64 = (1 << PAGE_SHIFT) - 1;

    /// Bits the hardware sets on use. A new mapping starts with them clear.
    pub const STATUS: Self = Self::ACCESSED.union(Self::DIRTY);

    /// Access-control bits: everything except the residency markers and
    /// the hardware status bits.
    #[inline]
    pub const fn permissions(self) -> Self {
        self.difference(Self::PRESENT.union(Self::SWAPPED).union(Self::STATUS))
    }
}

/// One page table entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct Pte(u64);

impl Pte {
    pub const EMPTY: Self = Self(0);

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Entry mapping `frame` with `perms`.
    #[inline]
    pub const fn present(frame: FrameNumber, perms: PageFlags) -> Self {
        let flags = perms.permissions().union(PageFlags::PRESENT);
        Self(((frame.as_u32() as u64) << PAGE_SHIFT) | flags.bits())
    }

    /// Entry naming swap slot `slot`, keeping `perms` for the swap-in.
    #[inline]
    pub const fn swapped(slot: SlotIndex, perms: PageFlags) -> Self {
        let flags = perms.permissions().union(PageFlags::SWAPPED);
        Self(((slot.as_u32() as u64) << PAGE_SHIFT) | flags.bits())
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn flags(self) -> PageFlags {
        PageFlags::from_bits_retain(self.0 & PageFlags::FLAGS_MASK)
    }

    #[inline]
    pub const fn permissions(self) -> PageFlags {
        self.flags().permissions()
    }

    #[inline]
    pub const fn is_present(self) -> bool {
        self.flags().contains(PageFlags::PRESENT)
    }

    #[inline]
    pub const fn is_swapped(self) -> bool {
        self.flags().contains(PageFlags::SWAPPED)
    }

    #[inline]
    pub const fn is_writable(self) -> bool {
        self.flags().contains(PageFlags::WRITABLE)
    }

    #[inline]
    pub const fn is_accessed(self) -> bool {
        self.flags().contains(PageFlags::ACCESSED)
    }

    #[inline]
    const fn number(self) -> u32 {
        (self.0 >> PAGE_SHIFT) as u32
    }

    /// Frame mapped by a resident entry.
    #[inline]
    pub const fn frame(self) -> Option<FrameNumber> {
        if self.is_present() {
            Some(FrameNumber::new(self.number()))
        } else {
            None
        }
    }

    /// Slot named by an evicted entry.
    #[inline]
    pub const fn swap_slot(self) -> Option<SlotIndex> {
        if self.is_swapped() && !self.is_present() {
            Some(SlotIndex::new(self.number()))
        } else {
            None
        }
    }

    #[inline]
    pub fn insert(&mut self, flags: PageFlags) {
        self.0 |= flags.bits() & PageFlags::FLAGS_MASK;
    }

    #[inline]
    pub fn remove(&mut self, flags: PageFlags) {
        self.0 &= !(flags.bits() & PageFlags::FLAGS_MASK);
    }
}
