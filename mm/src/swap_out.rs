//! Page eviction.
//!
//! Swap-out picks a victim page, persists its frame to a fresh slot and
//! moves every sharer of the frame over to that slot in one step: all page
//! tables that named the frame end up naming the slot with the saved
//! permissions, the slot inherits the frame's backpointers, and the frame
//! is returned to the allocator.

use swapvm_abi::FrameNumber;
use swapvm_lib::{klog_debug, klog_warn};

use crate::error::{MmError, MmResult};
use crate::hal::Machine;
use crate::paging_defs::Pte;
use crate::swap_slots::SlotIndex;
use crate::swap_state::SwapState;
use crate::victim::{Victim, select_victim};

/// What one swap-out moved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapOutReport {
    pub victim: Victim,
    pub frame: FrameNumber,
    pub slot: SlotIndex,
    /// Page tables repointed at the slot.
    pub sharers: u32,
}

impl SwapState {
    /// Evict one resident page to the swap device.
    ///
    /// On error nothing has moved: the slot, if one was claimed, is
    /// returned to the pool and the frame stays mapped by all its sharers.
    pub fn swap_out(&mut self, m: &mut Machine<'_>) -> MmResult<SwapOutReport> {
        let (victim, swept) = select_victim(m.spaces, &self.rss, self.config.sweep_percent)?;
        if swept > 0 {
            self.stats.sweeps += 1;
            self.stats.pages_swept += swept as u64;
        }

        let Victim { process, vaddr } = victim;
        let pte = m.entry(process, vaddr).ok_or(MmError::NotMapped { vaddr })?;
        let frame = pte.frame().ok_or(MmError::NotMapped { vaddr })?;
        let perms = pte.permissions();

        let sharers = self.tracked_sharers(frame, process, vaddr)?;
        for (sharer, at) in sharers.iter() {
            if m.entry(sharer, at).and_then(Pte::frame) != Some(frame) {
                return Err(MmError::UntrackedMapping {
                    process: sharer,
                    vaddr: at,
                });
            }
        }

        let slot = self.slots.allocate_free_slot(perms)?;
        let block = self.slots.get(slot)?.block();
        if let Err(err) = m.disk.write_page(block, m.memory.frame(frame)) {
            klog_warn!("swap: writing {} to block {} failed: {}", frame, block, err);
            self.slots.release(slot)?;
            return Err(err);
        }

        let sharers = self.frames.detach_all(frame, &mut self.rss)?;
        let swapped = Pte::swapped(slot, perms);
        for (sharer, at) in sharers.iter() {
            m.set_entry(sharer, at, swapped);
            m.spaces.flush_tlb(sharer);
            self.slots.attach(slot, sharer, at)?;
        }
        m.memory.free_frame(frame);
        self.stats.swap_outs += 1;

        klog_debug!(
            "swap: out {} at {} ({}) -> slot {} block {}, {} sharers",
            process,
            vaddr,
            frame,
            slot,
            block,
            sharers.ref_count()
        );
        Ok(SwapOutReport {
            victim,
            frame,
            slot,
            sharers: sharers.ref_count(),
        })
    }
}
