use swapvm_abi::{FrameNumber, ProcessIndex, VirtAddr};
use swapvm_lib::{klog_debug, klog_error, klog_warn};

use crate::error::{MmError, MmResult};
use crate::hal::{FaultContext, Machine};
use crate::paging_defs::{PageFlags, Pte};
use crate::swap_state::SwapState;

/// How a page fault was resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultResolution {
    /// The page was on disk and now lives in this frame.
    SwappedIn(FrameNumber),
    /// Last sharer of a read-only frame; it was made writable in place.
    Promoted(FrameNumber),
    /// The faulting process got a private copy.
    Duplicated { old: FrameNumber, new: FrameNumber },
}

/// A write to a present read-only page is a copy-on-write fault.
pub fn is_cow_fault(pte: Pte) -> bool {
    pte.is_present() && !pte.is_writable()
}

impl SwapState {
    /// Dispatch a page fault to swap-in or copy-on-write resolution.
    ///
    /// Non-present swapped entries are swapped in. Present read-only
    /// entries are write faults on shared pages: a frame with a single
    /// sharer is made writable in place, otherwise the faulting process
    /// gets its own copy. Anything else is not ours to handle.
    pub fn handle_page_fault(
        &mut self,
        m: &mut Machine<'_>,
        fault: FaultContext,
    ) -> MmResult<FaultResolution> {
        let process = fault.process;
        let vaddr = fault.vaddr.page_base();
        let pte = m.entry(process, vaddr).ok_or(MmError::NotMapped { vaddr })?;

        if pte.swap_slot().is_some() {
            return self.swap_in(m, fault).map(FaultResolution::SwappedIn);
        }
        if !is_cow_fault(pte) {
            klog_error!("mm: unhandled fault {} at {} flags {:?}", process, vaddr, pte.flags());
            return Err(MmError::UnhandledFault {
                vaddr,
                flags: pte.flags(),
            });
        }
        let Some(old) = pte.frame() else {
            return Err(MmError::UnhandledFault {
                vaddr,
                flags: pte.flags(),
            });
        };

        if self.tracked_sharers(old, process, vaddr)?.ref_count() == 1 {
            return self.resolve_single_ref(m, process, vaddr, pte, old);
        }
        self.resolve_multi_ref(m, process, vaddr, pte, old)
    }

    fn resolve_single_ref(
        &mut self,
        m: &mut Machine<'_>,
        process: ProcessIndex,
        vaddr: VirtAddr,
        mut pte: Pte,
        frame: FrameNumber,
    ) -> MmResult<FaultResolution> {
        pte.insert(PageFlags::WRITABLE);
        m.set_entry(process, vaddr, pte);
        m.spaces.flush_tlb(process);
        self.stats.cow_promotions += 1;

        klog_debug!("cow: {} at {} sole owner of {}, now writable", process, vaddr, frame);
        Ok(FaultResolution::Promoted(frame))
    }

    fn resolve_multi_ref(
        &mut self,
        m: &mut Machine<'_>,
        process: ProcessIndex,
        vaddr: VirtAddr,
        pte: Pte,
        old: FrameNumber,
    ) -> MmResult<FaultResolution> {
        // No reclaim here: evicting could pick the very frame being copied.
        let Some(new) = m.memory.alloc_frame() else {
            klog_warn!("cow: no frame to copy {} for {} at {}", old, process, vaddr);
            return Err(MmError::NoMemory);
        };
        let new = self.checked_frame(m, new)?;

        m.memory.copy_frame(old, new);
        m.set_entry(process, vaddr, Pte::present(new, pte.permissions() | PageFlags::WRITABLE));
        self.frames.attach(new, process, vaddr, &mut self.rss)?;
        self.detach_mapping(m, process, pte)?;
        m.spaces.flush_tlb(process);
        self.stats.cow_copies += 1;

        klog_debug!("cow: {} at {} copied {} -> {}", process, vaddr, old, new);
        Ok(FaultResolution::Duplicated { old, new })
    }
}
