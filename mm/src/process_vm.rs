//! Per-process page lifecycle: mapping, copy-on-write fork, unmapping and
//! teardown, each keeping the reverse map, the slot pool and the rss
//! counts in step with the page tables.

use swapvm_abi::{FrameNumber, ProcessIndex, VirtAddr};
use swapvm_lib::{klog_debug, klog_info};

use crate::error::{MmError, MmResult};
use crate::hal::Machine;
use crate::paging_defs::{PageFlags, Pte};
use crate::swap_state::SwapState;

fn require_live(m: &Machine<'_>, process: ProcessIndex) -> MmResult<()> {
    if m.spaces.process_id(process).is_none() {
        return Err(MmError::InvalidProcess { process });
    }
    Ok(())
}

impl SwapState {
    /// Back `vaddr` in `process` with a fresh zeroed frame.
    ///
    /// Evicts one page if the allocator is empty.
    pub fn map_page(
        &mut self,
        m: &mut Machine<'_>,
        process: ProcessIndex,
        vaddr: VirtAddr,
        perms: PageFlags,
    ) -> MmResult<FrameNumber> {
        let vaddr = vaddr.page_base();
        require_live(m, process)?;
        match m.spaces.walk(process, vaddr, true) {
            None => {
                klog_info!("map_page: no page table for {} at {}", process, vaddr);
                return Err(MmError::NoMemory);
            }
            Some(pte) if !pte.is_empty() => return Err(MmError::AlreadyMapped { vaddr }),
            Some(_) => {}
        }

        let frame = self.alloc_frame_reclaiming(m)?;
        if !m.set_entry(process, vaddr, Pte::present(frame, perms)) {
            m.memory.free_frame(frame);
            return Err(MmError::NotMapped { vaddr });
        }
        self.frames.attach(frame, process, vaddr, &mut self.rss)?;
        m.spaces.flush_tlb(process);
        Ok(frame)
    }

    /// Share every page of `parent` with `child` copy-on-write.
    ///
    /// Resident pages become read-only in both processes and gain the child
    /// as a sharer of the frame. Swapped pages are copied as swapped entries
    /// and the child joins the slot's sharers; the slot's saved permissions
    /// lose WRITABLE so both processes fault again after the swap-in.
    /// Returns the number of pages shared. On error the child may be
    /// partially populated and should be released.
    pub fn fork_cow(
        &mut self,
        m: &mut Machine<'_>,
        parent: ProcessIndex,
        child: ProcessIndex,
    ) -> MmResult<usize> {
        require_live(m, parent)?;
        require_live(m, child)?;
        if parent == child {
            return Err(MmError::InvalidProcess { process: child });
        }

        let entries = m.entries(parent);
        for &(vaddr, _) in &entries {
            if m.entry(child, vaddr).is_some_and(|pte| !pte.is_empty()) {
                klog_info!("fork_cow: {} already maps {}", child, vaddr);
                return Err(MmError::AlreadyMapped { vaddr });
            }
        }

        let mut shared = 0;
        for (vaddr, pte) in entries {
            let mut ro = pte;
            ro.remove(PageFlags::WRITABLE);

            if let Some(frame) = pte.frame() {
                m.set_entry(parent, vaddr, ro);
                install(m, child, vaddr, ro)?;
                self.frames.attach(frame, child, vaddr, &mut self.rss)?;
            } else if let Some(slot) = pte.swap_slot() {
                self.slots.write_protect(slot)?;
                m.set_entry(parent, vaddr, ro);
                install(m, child, vaddr, ro)?;
                self.slots.attach(slot, child, vaddr)?;
            } else {
                continue;
            }
            shared += 1;
        }
        m.spaces.flush_tlb(parent);
        m.spaces.flush_tlb(child);

        klog_info!("fork_cow: {} -> {} sharing {} pages", parent, child, shared);
        Ok(shared)
    }

    /// Remove the mapping of `vaddr` in `process`, resident or swapped.
    pub fn unmap_page(
        &mut self,
        m: &mut Machine<'_>,
        process: ProcessIndex,
        vaddr: VirtAddr,
    ) -> MmResult<()> {
        let vaddr = vaddr.page_base();
        let pte = m
            .entry(process, vaddr)
            .filter(|pte| !pte.is_empty())
            .ok_or(MmError::NotMapped { vaddr })?;
        self.detach_mapping(m, process, pte)?;
        m.set_entry(process, vaddr, Pte::EMPTY);
        m.spaces.flush_tlb(process);
        Ok(())
    }

    /// Drop every mapping of an exiting process.
    ///
    /// Frames and slots still used by other processes stay; the rest are
    /// freed. Returns the number of entries cleared.
    pub fn release_process(&mut self, m: &mut Machine<'_>, process: ProcessIndex) -> MmResult<usize> {
        let mut released = 0;
        for (vaddr, pte) in m.entries(process) {
            if pte.frame().is_none() && pte.swap_slot().is_none() {
                continue;
            }
            self.detach_mapping(m, process, pte)?;
            m.set_entry(process, vaddr, Pte::EMPTY);
            released += 1;
        }
        self.rss.reset(process);
        m.spaces.flush_tlb(process);

        klog_debug!("release_process: {} dropped {} mappings", process, released);
        Ok(released)
    }
}

fn install(m: &mut Machine<'_>, process: ProcessIndex, vaddr: VirtAddr, pte: Pte) -> MmResult<()> {
    let entry = m
        .spaces
        .walk(process, vaddr, true)
        .ok_or(MmError::NoMemory)?;
    *entry = pte;
    Ok(())
}
