//! Swap slot pool.
//!
//! A fixed array of page-sized reservations on the swap device. A slot is
//! claimed by swap-out, which records the evicted page's permissions and
//! moves the frame's backpointers into it, and is released once its last
//! sharer detaches: normally by swap-in, earlier if processes unmap the
//! page or exit while it is still on disk.

use alloc::vec::Vec;
use core::fmt;

use swapvm_abi::{ProcessIndex, VirtAddr};
use swapvm_lib::{klog_info, klog_warn};

use crate::error::{MmError, MmResult};
use crate::paging_defs::PageFlags;
use crate::rmap::Backpointers;
use crate::swap_config::SwapConfig;

/// Index of a slot in the swap pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct SlotIndex(u32);

impl SlotIndex {
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
}

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug)]
pub struct SwapSlot {
    occupied: bool,
    perms: PageFlags,
    block: u64,
    sharers: Backpointers,
}

impl SwapSlot {
    fn new(block: u64) -> Self {
        Self {
            occupied: false,
            perms: PageFlags::empty(),
            block,
            sharers: Backpointers::new(),
        }
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        !self.occupied && self.sharers.is_empty()
    }

    #[inline]
    pub fn is_occupied(&self) -> bool {
        self.occupied
    }

    /// Permission bits the evicted page had.
    #[inline]
    pub fn perms(&self) -> PageFlags {
        self.perms
    }

    /// First device block backing this slot.
    #[inline]
    pub fn block(&self) -> u64 {
        self.block
    }

    #[inline]
    pub fn sharers(&self) -> &Backpointers {
        &self.sharers
    }

    fn reset(&mut self) {
        self.occupied = false;
        self.perms = PageFlags::empty();
        self.sharers.clear();
    }
}

pub struct SwapSlotPool {
    slots: Vec<SwapSlot>,
}

impl SwapSlotPool {
    pub fn new(config: &SwapConfig) -> Self {
        let slots = (0..config.slot_count)
            .map(|index| SwapSlot::new(config.slot_block(index)))
            .collect();
        klog_info!(
            "swap: {} slots initialized at block {} ({} KiB)",
            config.slot_count,
            config.base_block,
            config.capacity_bytes() / 1024
        );
        Self { slots }
    }

    pub fn slot_count(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn free_count(&self) -> u32 {
        self.slots.iter().filter(|slot| slot.is_free()).count() as u32
    }

    pub fn get(&self, slot: SlotIndex) -> MmResult<&SwapSlot> {
        self.slots
            .get(slot.as_usize())
            .ok_or(MmError::InvalidSlot { slot })
    }

    fn get_mut(&mut self, slot: SlotIndex) -> MmResult<&mut SwapSlot> {
        self.slots
            .get_mut(slot.as_usize())
            .ok_or(MmError::InvalidSlot { slot })
    }

    /// Claim the lowest free slot for a page with permissions `perms`.
    pub fn allocate_free_slot(&mut self, perms: PageFlags) -> MmResult<SlotIndex> {
        let Some(index) = self.slots.iter().position(SwapSlot::is_free) else {
            klog_warn!("swap: no free swap slot ({} in use)", self.slots.len());
            return Err(MmError::NoSwapSlot);
        };
        let slot = &mut self.slots[index];
        slot.occupied = true;
        slot.perms = perms.permissions();
        Ok(SlotIndex::new(index as u32))
    }

    /// Return `slot` to the free pool, dropping any remaining backpointers.
    pub fn release(&mut self, slot: SlotIndex) -> MmResult<()> {
        self.get_mut(slot)?.reset();
        Ok(())
    }

    /// Register `process`'s entry at `vaddr` as naming `slot`.
    pub fn attach(&mut self, slot: SlotIndex, process: ProcessIndex, vaddr: VirtAddr) -> MmResult<()> {
        let entry = self.get_mut(slot)?;
        if !entry.occupied {
            return Err(MmError::InvalidSlot { slot });
        }
        entry.sharers.insert(process, vaddr)
    }

    /// Remove `process`'s backpointer; releases the slot when it was the
    /// last one. Unknown processes are a no-op returning `Ok(false)`.
    pub fn detach(&mut self, slot: SlotIndex, process: ProcessIndex) -> MmResult<bool> {
        let entry = self.get_mut(slot)?;
        if entry.sharers.remove(process).is_none() {
            return Ok(false);
        }
        if entry.sharers.is_empty() {
            entry.reset();
        }
        Ok(true)
    }

    /// Strip WRITABLE from the permissions restored at swap-in.
    pub(crate) fn write_protect(&mut self, slot: SlotIndex) -> MmResult<()> {
        self.get_mut(slot)?.perms.remove(PageFlags::WRITABLE);
        Ok(())
    }

    pub fn reference_count(&self, slot: SlotIndex) -> u32 {
        self.get(slot).map_or(0, |entry| entry.sharers.ref_count())
    }

    /// Occupied slots.
    pub fn occupied(&self) -> impl Iterator<Item = (SlotIndex, &SwapSlot)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.occupied)
            .map(|(index, slot)| (SlotIndex::new(index as u32), slot))
    }
}
