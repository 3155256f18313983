//! Page restoration.
//!
//! Swap-in reverses [`swap_out`](crate::swap_out): a fresh frame receives
//! the slot's contents, every sharer recorded in the slot is repointed at
//! that frame with the saved permissions, and the slot returns to the pool.

use swapvm_abi::FrameNumber;
use swapvm_lib::{klog_debug, klog_error, klog_warn};

use crate::error::{MmError, MmResult};
use crate::hal::{FaultContext, Machine};
use crate::paging_defs::Pte;
use crate::swap_state::SwapState;

impl SwapState {
    /// Bring the page behind `fault` back into memory.
    ///
    /// The fault address may point anywhere inside the page. If the
    /// allocator is empty one other page is evicted first. The slot is
    /// read before any page table changes, so a device error leaves the
    /// page swapped out and the new frame released.
    pub fn swap_in(&mut self, m: &mut Machine<'_>, fault: FaultContext) -> MmResult<FrameNumber> {
        let process = fault.process;
        let vaddr = fault.vaddr.page_base();
        let pte = m.entry(process, vaddr).ok_or(MmError::NotMapped { vaddr })?;
        let Some(slot) = pte.swap_slot() else {
            klog_error!("swap: in {} at {} but entry is not swapped out", process, vaddr);
            return Err(MmError::NotSwapped { vaddr });
        };

        let entry = self.slots.get(slot)?;
        if !entry.is_occupied() {
            klog_error!("swap: {} at {} names free slot {}", process, vaddr, slot);
            return Err(MmError::InvalidSlot { slot });
        }
        if entry.sharers().get(process) != Some(vaddr) {
            klog_error!("swap: slot {} has no backpointer for {} at {}", slot, process, vaddr);
            return Err(MmError::UntrackedMapping { process, vaddr });
        }
        for (sharer, at) in entry.sharers().iter() {
            if m.entry(sharer, at).and_then(Pte::swap_slot) != Some(slot) {
                return Err(MmError::UntrackedMapping {
                    process: sharer,
                    vaddr: at,
                });
            }
        }

        let frame = self.alloc_frame_reclaiming(m)?;
        let entry = self.slots.get(slot)?;
        let (block, perms) = (entry.block(), entry.perms());
        let sharers = entry.sharers().clone();

        if let Err(err) = m.disk.read_page(block, m.memory.frame_mut(frame)) {
            klog_warn!("swap: reading block {} into {} failed: {}", block, frame, err);
            m.memory.free_frame(frame);
            return Err(err);
        }

        let present = Pte::present(frame, perms);
        for (sharer, at) in sharers.iter() {
            m.set_entry(sharer, at, present);
            self.frames.attach(frame, sharer, at, &mut self.rss)?;
            m.spaces.flush_tlb(sharer);
        }
        self.slots.release(slot)?;
        self.stats.swap_ins += 1;

        klog_debug!(
            "swap: in {} at {} slot {} -> {}, {} sharers",
            process,
            vaddr,
            slot,
            frame,
            sharers.ref_count()
        );
        Ok(frame)
    }
}
