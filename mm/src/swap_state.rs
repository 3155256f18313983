//! Owned state of the swap subsystem.
//!
//! [`SwapState`] holds the frame reverse map, the swap slot pool and the
//! per-process resident set sizes. It is a plain value: the kernel creates
//! one, and every swap, fault and teardown path borrows it mutably together
//! with a [`Machine`]. [`SwapManager`] wraps it in a spin lock so that each
//! operation runs to completion before another one can observe the tables.

use alloc::collections::BTreeMap;

use spin::Mutex;
use swapvm_abi::{FrameNumber, ProcessIndex, VirtAddr};
use swapvm_lib::{klog_debug, klog_error, klog_warn};

use crate::cow::FaultResolution;
use crate::error::{MmError, MmResult};
use crate::hal::{FaultContext, Machine};
use crate::paging_defs::{PageFlags, Pte};
use crate::rmap::{Backpointers, FrameRmapTable};
use crate::rss::RssTable;
use crate::swap_config::SwapConfig;
use crate::swap_out::SwapOutReport;
use crate::swap_slots::{SlotIndex, SwapSlotPool};

/// Event counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SwapStats {
    pub swap_outs: u64,
    pub swap_ins: u64,
    pub cow_copies: u64,
    pub cow_promotions: u64,
    pub sweeps: u64,
    pub pages_swept: u64,
    pub reclaims: u64,
}

pub struct SwapState {
    pub(crate) config: SwapConfig,
    pub(crate) frames: FrameRmapTable,
    pub(crate) slots: SwapSlotPool,
    pub(crate) rss: RssTable,
    pub(crate) stats: SwapStats,
}

impl SwapState {
    pub fn new(config: SwapConfig) -> Self {
        Self {
            frames: FrameRmapTable::new(config.frame_count),
            slots: SwapSlotPool::new(&config),
            rss: RssTable::new(),
            stats: SwapStats::default(),
            config,
        }
    }

    pub fn config(&self) -> &SwapConfig {
        &self.config
    }

    pub fn frames(&self) -> &FrameRmapTable {
        &self.frames
    }

    pub fn slots(&self) -> &SwapSlotPool {
        &self.slots
    }

    /// Resident pages of `process`.
    pub fn rss(&self, process: ProcessIndex) -> u32 {
        self.rss.get(process)
    }

    pub fn stats(&self) -> SwapStats {
        self.stats
    }

    /// Backpointers of `frame`, provided `process` maps it at `vaddr`.
    pub(crate) fn tracked_sharers(
        &self,
        frame: FrameNumber,
        process: ProcessIndex,
        vaddr: VirtAddr,
    ) -> MmResult<&Backpointers> {
        let sharers = self.frames.backpointers(frame)?;
        if sharers.is_empty() {
            klog_error!("mm: {} mapped at {} by {} but untracked", frame, vaddr, process);
            return Err(MmError::UntrackedFrame { frame });
        }
        if sharers.get(process) != Some(vaddr) {
            klog_error!("mm: {} has no backpointer for {} at {}", frame, process, vaddr);
            return Err(MmError::UntrackedMapping { process, vaddr });
        }
        Ok(sharers)
    }

    /// Reject frames the reverse map cannot describe, handing them back.
    pub(crate) fn checked_frame(&self, m: &mut Machine<'_>, frame: FrameNumber) -> MmResult<FrameNumber> {
        if frame.as_u32() >= self.frames.frame_count() {
            klog_error!(
                "mm: allocator returned {} beyond the {} tracked frames",
                frame,
                self.frames.frame_count()
            );
            m.memory.free_frame(frame);
            return Err(MmError::InvalidFrame { frame });
        }
        Ok(frame)
    }

    /// Allocate a frame, evicting one page first if the allocator is empty.
    pub(crate) fn alloc_frame_reclaiming(&mut self, m: &mut Machine<'_>) -> MmResult<FrameNumber> {
        if let Some(frame) = m.memory.alloc_frame() {
            return self.checked_frame(m, frame);
        }
        klog_debug!("mm: allocator empty, reclaiming one frame");
        self.swap_out(m)?;
        self.stats.reclaims += 1;
        match m.memory.alloc_frame() {
            Some(frame) => self.checked_frame(m, frame),
            None => {
                klog_warn!("mm: no frame available after reclaim");
                Err(MmError::NoMemory)
            }
        }
    }

    /// Drop `process`'s backpointer for whatever `pte` names.
    ///
    /// A frame losing its last mapping goes back to the allocator; a slot
    /// losing its last sharer returns to the pool.
    pub(crate) fn detach_mapping(
        &mut self,
        m: &mut Machine<'_>,
        process: ProcessIndex,
        pte: Pte,
    ) -> MmResult<()> {
        if let Some(frame) = pte.frame() {
            let detached = self.frames.detach(frame, process, &mut self.rss)?;
            if detached && self.frames.reference_count(frame) == 0 {
                m.memory.free_frame(frame);
            }
        } else if let Some(slot) = pte.swap_slot() {
            self.slots.detach(slot, process)?;
        }
        Ok(())
    }

    /// Cross-check the tables against every live page table.
    ///
    /// Each frame's and slot's reference count must equal the number of
    /// entries naming it, every such entry must have the matching
    /// backpointer, occupied slots must have sharers, and each process's rss
    /// must equal its number of resident entries.
    pub fn verify(&self, m: &mut Machine<'_>) -> MmResult<()> {
        let mut frame_refs: BTreeMap<FrameNumber, u32> = BTreeMap::new();
        let mut slot_refs: BTreeMap<SlotIndex, u32> = BTreeMap::new();

        for process in ProcessIndex::all() {
            let mut resident = 0u32;
            if m.spaces.process_id(process).is_some() {
                for (vaddr, pte) in m.entries(process) {
                    if pte.is_present() && pte.is_swapped() {
                        klog_error!("mm: {} entry {} both present and swapped", process, vaddr);
                        return Err(MmError::Inconsistent);
                    }
                    if let Some(frame) = pte.frame() {
                        resident += 1;
                        *frame_refs.entry(frame).or_default() += 1;
                        if self.frames.backpointers(frame)?.get(process) != Some(vaddr) {
                            klog_error!("mm: {} at {} lacks a frame backpointer", process, vaddr);
                            return Err(MmError::Inconsistent);
                        }
                    } else if let Some(slot) = pte.swap_slot() {
                        *slot_refs.entry(slot).or_default() += 1;
                        if self.slots.get(slot)?.sharers().get(process) != Some(vaddr) {
                            klog_error!("mm: {} at {} lacks a slot backpointer", process, vaddr);
                            return Err(MmError::Inconsistent);
                        }
                    }
                }
            }
            if self.rss.get(process) != resident {
                klog_error!(
                    "mm: {} rss {} but {} resident entries",
                    process,
                    self.rss.get(process),
                    resident
                );
                return Err(MmError::Inconsistent);
            }
        }

        for (frame, sharers) in self.frames.mapped_frames() {
            if frame_refs.get(&frame).copied() != Some(sharers.ref_count()) {
                klog_error!("mm: {} count {} disagrees with page tables", frame, sharers.ref_count());
                return Err(MmError::Inconsistent);
            }
        }
        for (slot, entry) in self.slots.occupied() {
            let count = entry.sharers().ref_count();
            if count == 0 || slot_refs.get(&slot).copied() != Some(count) {
                klog_error!("mm: slot {} count {} disagrees with page tables", slot, count);
                return Err(MmError::Inconsistent);
            }
        }
        Ok(())
    }
}

/// [`SwapState`] behind a spin lock.
///
/// Each method holds the lock for the whole operation, so a swap-out's
/// persist, repoint and free steps (or a swap-in's allocate, repoint,
/// restore and release steps) are never interleaved with another
/// operation on the same tables.
pub struct SwapManager {
    state: Mutex<SwapState>,
}

impl SwapManager {
    pub fn new(config: SwapConfig) -> Self {
        Self {
            state: Mutex::new(SwapState::new(config)),
        }
    }

    pub fn swap_out(&self, m: &mut Machine<'_>) -> MmResult<SwapOutReport> {
        self.state.lock().swap_out(m)
    }

    pub fn handle_page_fault(
        &self,
        m: &mut Machine<'_>,
        fault: FaultContext,
    ) -> MmResult<FaultResolution> {
        self.state.lock().handle_page_fault(m, fault)
    }

    pub fn map_page(
        &self,
        m: &mut Machine<'_>,
        process: ProcessIndex,
        vaddr: VirtAddr,
        perms: PageFlags,
    ) -> MmResult<FrameNumber> {
        self.state.lock().map_page(m, process, vaddr, perms)
    }

    pub fn fork_cow(
        &self,
        m: &mut Machine<'_>,
        parent: ProcessIndex,
        child: ProcessIndex,
    ) -> MmResult<usize> {
        self.state.lock().fork_cow(m, parent, child)
    }

    pub fn release_process(&self, m: &mut Machine<'_>, process: ProcessIndex) -> MmResult<usize> {
        self.state.lock().release_process(m, process)
    }

    /// Run `f` with the tables locked.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut SwapState) -> R) -> R {
        f(&mut self.state.lock())
    }

    pub fn stats(&self) -> SwapStats {
        self.state.lock().stats()
    }
}
