//! Frame reverse map.
//!
//! For every physical frame the table records which processes map it and
//! where: one backpointer slot per process table index, holding the virtual
//! address of that process's entry. The frame's reference count always
//! equals the number of occupied backpointer slots; both only change
//! through [`Backpointers::insert`] and [`Backpointers::remove`].
//!
//! The same [`Backpointers`] set is embedded in every swap slot, so an
//! evicted page keeps exactly the sharers its frame had.

use alloc::vec::Vec;

use swapvm_abi::{FrameNumber, MAX_PROCESSES, ProcessIndex, VirtAddr};

use crate::error::{MmError, MmResult};
use crate::rss::RssTable;

/// Reference count plus per-process entry locations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Backpointers {
    ref_count: u32,
    ptes: [Option<VirtAddr>; MAX_PROCESSES],
}

impl Default for Backpointers {
    fn default() -> Self {
        Self::new()
    }
}

impl Backpointers {
    pub const fn new() -> Self {
        Self {
            ref_count: 0,
            ptes: [None; MAX_PROCESSES],
        }
    }

    #[inline]
    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ref_count == 0
    }

    /// Entry location registered for `process`.
    #[inline]
    pub fn get(&self, process: ProcessIndex) -> Option<VirtAddr> {
        self.ptes[process.as_usize()]
    }

    /// Register `process`'s entry at `vaddr`.
    pub(crate) fn insert(&mut self, process: ProcessIndex, vaddr: VirtAddr) -> MmResult<()> {
        let slot = &mut self.ptes[process.as_usize()];
        if slot.is_some() {
            return Err(MmError::AlreadyAttached { process });
        }
        *slot = Some(vaddr);
        self.ref_count += 1;
        Ok(())
    }

    /// Drop `process`'s backpointer; `None` if it had none.
    pub(crate) fn remove(&mut self, process: ProcessIndex) -> Option<VirtAddr> {
        let vaddr = self.ptes[process.as_usize()].take()?;
        self.ref_count -= 1;
        Some(vaddr)
    }

    pub(crate) fn clear(&mut self) {
        *self = Self::new();
    }

    /// Occupied backpointers in process index order.
    pub fn iter(&self) -> impl Iterator<Item = (ProcessIndex, VirtAddr)> + '_ {
        self.ptes
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| Some((ProcessIndex::new(index)?, (*slot)?)))
    }
}

/// Reverse map for every frame the allocator can hand out.
pub struct FrameRmapTable {
    entries: Vec<Backpointers>,
}

impl FrameRmapTable {
    pub fn new(frame_count: u32) -> Self {
        let mut entries = Vec::with_capacity(frame_count as usize);
        entries.resize_with(frame_count as usize, Backpointers::new);
        Self { entries }
    }

    pub fn frame_count(&self) -> u32 {
        self.entries.len() as u32
    }

    fn entry(&self, frame: FrameNumber) -> MmResult<&Backpointers> {
        self.entries
            .get(frame.as_usize())
            .ok_or(MmError::InvalidFrame { frame })
    }

    fn entry_mut(&mut self, frame: FrameNumber) -> MmResult<&mut Backpointers> {
        self.entries
            .get_mut(frame.as_usize())
            .ok_or(MmError::InvalidFrame { frame })
    }

    /// Register `process`'s entry at `vaddr` as a mapping of `frame`.
    pub fn attach(
        &mut self,
        frame: FrameNumber,
        process: ProcessIndex,
        vaddr: VirtAddr,
        rss: &mut RssTable,
    ) -> MmResult<()> {
        self.entry_mut(frame)?.insert(process, vaddr)?;
        rss.increment(process);
        Ok(())
    }

    /// Remove `process`'s backpointer from `frame`.
    ///
    /// Detaching a process that never mapped the frame is a no-op and
    /// returns `Ok(false)`.
    pub fn detach(
        &mut self,
        frame: FrameNumber,
        process: ProcessIndex,
        rss: &mut RssTable,
    ) -> MmResult<bool> {
        if self.entry_mut(frame)?.remove(process).is_none() {
            return Ok(false);
        }
        rss.decrement(process);
        Ok(true)
    }

    /// Detach every sharer at once, returning the set they formed.
    pub fn detach_all(&mut self, frame: FrameNumber, rss: &mut RssTable) -> MmResult<Backpointers> {
        let entry = self.entry_mut(frame)?;
        let sharers = core::mem::take(entry);
        for (process, _) in sharers.iter() {
            rss.decrement(process);
        }
        Ok(sharers)
    }

    /// Number of processes mapping `frame`; zero for frames outside the table.
    pub fn reference_count(&self, frame: FrameNumber) -> u32 {
        self.entry(frame).map_or(0, Backpointers::ref_count)
    }

    /// Backpointers of `frame`.
    pub fn backpointers(&self, frame: FrameNumber) -> MmResult<&Backpointers> {
        self.entry(frame)
    }

    /// Frames with at least one mapping.
    pub fn mapped_frames(&self) -> impl Iterator<Item = (FrameNumber, &Backpointers)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| !entry.is_empty())
            .map(|(index, entry)| (FrameNumber::new(index as u32), entry))
    }
}
