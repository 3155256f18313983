//! Victim selection for swap-out.
//!
//! Two cheap, deterministic stages:
//!
//! 1. the live process with the largest resident set (ties go to the
//!    smaller process id);
//! 2. the first of its entries, in address order, that is Present with the
//!    Accessed bit clear.
//!
//! When every resident page of the victim has been accessed since the last
//! sweep, a share of its Accessed bits (rounded up, so at least one) is
//! cleared and the search runs once more. This is a second-chance
//! approximation, not LRU.

use core::ops::ControlFlow;

use swapvm_abi::{ProcessIndex, VirtAddr};
use swapvm_lib::klog_debug;

use crate::error::{MmError, MmResult};
use crate::hal::{AddressSpaces, live_processes};
use crate::paging_defs::{PageFlags, Pte};
use crate::rss::RssTable;

/// Page chosen for eviction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Victim {
    pub process: ProcessIndex,
    pub vaddr: VirtAddr,
}

#[inline]
fn is_resident(pte: &Pte) -> bool {
    pte.is_present()
}

/// Live process holding the most resident pages.
pub fn select_victim_process(
    spaces: &dyn AddressSpaces,
    rss: &RssTable,
) -> MmResult<ProcessIndex> {
    live_processes(spaces)
        .max_by(|(a, a_pid), (b, b_pid)| {
            // Larger rss wins; on a tie the smaller pid compares greater.
            rss.get(*a).cmp(&rss.get(*b)).then(b_pid.cmp(a_pid))
        })
        .map(|(process, _)| process)
        .ok_or(MmError::NoVictimProcess)
}

/// First resident entry of `process` not accessed since the last sweep.
pub fn find_unaccessed_page(spaces: &mut dyn AddressSpaces, process: ProcessIndex) -> Option<VirtAddr> {
    let mut found = None;
    spaces.for_each_entry(process, &mut |vaddr, pte| {
        if is_resident(pte) && !pte.is_accessed() {
            found = Some(vaddr);
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    });
    found
}

/// Number of entries a sweep clears out of `accessed`: `percent` of them,
/// rounded up.
#[inline]
pub const fn sweep_quota(accessed: usize, percent: u32) -> usize {
    (accessed * percent as usize).div_ceil(100)
}

/// Clear the Accessed bit on `percent` of `process`'s accessed resident
/// entries, lowest addresses first. Returns how many were cleared.
pub fn clear_accessed_sweep(
    spaces: &mut dyn AddressSpaces,
    process: ProcessIndex,
    percent: u32,
) -> usize {
    let mut accessed = 0usize;
    spaces.for_each_entry(process, &mut |_, pte| {
        if is_resident(pte) && pte.is_accessed() {
            accessed += 1;
        }
        ControlFlow::Continue(())
    });

    let quota = sweep_quota(accessed, percent);
    if quota == 0 {
        return 0;
    }

    let mut cleared = 0usize;
    spaces.for_each_entry(process, &mut |_, pte| {
        if is_resident(pte) && pte.is_accessed() {
            pte.remove(PageFlags::ACCESSED);
            cleared += 1;
            if cleared == quota {
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    });
    spaces.flush_tlb(process);

    klog_debug!(
        "swap: sweep cleared {} of {} accessed pages in {}",
        cleared,
        accessed,
        process
    );
    cleared
}

/// Pick the page to evict, sweeping the victim's Accessed bits once if needed.
///
/// Returns the victim and the number of entries the sweep cleared.
pub fn select_victim(
    spaces: &mut dyn AddressSpaces,
    rss: &RssTable,
    sweep_percent: u32,
) -> MmResult<(Victim, usize)> {
    let process = select_victim_process(spaces, rss)?;

    if let Some(vaddr) = find_unaccessed_page(spaces, process) {
        return Ok((Victim { process, vaddr }, 0));
    }

    let swept = clear_accessed_sweep(spaces, process, sweep_percent);
    find_unaccessed_page(spaces, process)
        .map(|vaddr| (Victim { process, vaddr }, swept))
        .ok_or(MmError::NoEvictablePage { process })
}
