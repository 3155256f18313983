//! Interfaces to the collaborators the memory manager drives but does not own.
//!
//! The frame allocator, the swap block device, and the process table with
//! its page tables and TLB are provided by the rest of the kernel. The swap
//! paths only ever reach them through these traits, bundled into a
//! [`Machine`] for the duration of one operation.

use alloc::vec::Vec;
use core::ops::ControlFlow;

use swapvm_abi::{FrameNumber, ProcessIndex, VirtAddr};

use crate::error::MmResult;
use crate::paging_defs::Pte;

/// Physical page frame allocator.
pub trait FrameAllocator {
    /// Allocate one zero-filled frame, or `None` when memory is exhausted.
    fn alloc_frame(&mut self) -> Option<FrameNumber>;

    /// Return `frame` to the allocator.
    fn free_frame(&mut self, frame: FrameNumber);

    /// Contents of `frame` (one page).
    fn frame(&self, frame: FrameNumber) -> &[u8];

    fn frame_mut(&mut self, frame: FrameNumber) -> &mut [u8];

    /// Copy a full page from `src` to `dst`, which are distinct frames.
    fn copy_frame(&mut self, src: FrameNumber, dst: FrameNumber);
}

/// Block device backing the swap area, addressed in device blocks.
///
/// Each transfer moves exactly one page starting at `block`.
pub trait SwapDevice {
    fn write_page(&mut self, block: u64, src: &[u8]) -> MmResult<()>;

    fn read_page(&mut self, block: u64, dst: &mut [u8]) -> MmResult<()>;
}

/// Process directory, page-table walker and TLB control.
pub trait AddressSpaces {
    /// Process id of the live process in slot `process`, `None` if the slot is empty.
    fn process_id(&self, process: ProcessIndex) -> Option<u32>;

    /// Entry for the page containing `vaddr`. With `create`, missing
    /// intermediate tables are allocated and an empty entry is returned.
    fn walk(&mut self, process: ProcessIndex, vaddr: VirtAddr, create: bool) -> Option<&mut Pte>;

    /// Visit every non-empty user entry of `process` in ascending address
    /// order until the visitor breaks.
    fn for_each_entry(
        &mut self,
        process: ProcessIndex,
        visit: &mut dyn FnMut(VirtAddr, &mut Pte) -> ControlFlow<()>,
    );

    /// Make the next access by `process` re-read its page tables.
    fn flush_tlb(&mut self, process: ProcessIndex);
}

/// Iterator over `(slot, pid)` for every live process.
pub struct LiveProcesses<'a, S: ?Sized> {
    spaces: &'a S,
    next: usize,
}

impl<S: AddressSpaces + ?Sized> Iterator for LiveProcesses<'_, S> {
    type Item = (ProcessIndex, u32);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(process) = ProcessIndex::new(self.next) {
            self.next += 1;
            if let Some(pid) = self.spaces.process_id(process) {
                return Some((process, pid));
            }
        }
        None
    }
}

/// Live process slots in index order.
pub fn live_processes<S: AddressSpaces + ?Sized>(spaces: &S) -> LiveProcesses<'_, S> {
    LiveProcesses { spaces, next: 0 }
}

/// Faulting address and process, as captured by the trap handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FaultContext {
    pub process: ProcessIndex,
    pub vaddr: VirtAddr,
}

impl FaultContext {
    pub const fn new(process: ProcessIndex, vaddr: VirtAddr) -> Self {
        Self { process, vaddr }
    }
}

/// Borrowed collaborators for one memory-manager operation.
pub struct Machine<'a> {
    pub memory: &'a mut dyn FrameAllocator,
    pub disk: &'a mut dyn SwapDevice,
    pub spaces: &'a mut dyn AddressSpaces,
}

impl<'a> Machine<'a> {
    pub fn new(
        memory: &'a mut dyn FrameAllocator,
        disk: &'a mut dyn SwapDevice,
        spaces: &'a mut dyn AddressSpaces,
    ) -> Self {
        Self {
            memory,
            disk,
            spaces,
        }
    }

    /// Copy of the entry for `vaddr`, without creating tables.
    pub fn entry(&mut self, process: ProcessIndex, vaddr: VirtAddr) -> Option<Pte> {
        self.spaces.walk(process, vaddr, false).map(|pte| *pte)
    }

    /// Overwrite an existing entry. Returns `false` if the walk found none.
    pub fn set_entry(&mut self, process: ProcessIndex, vaddr: VirtAddr, value: Pte) -> bool {
        match self.spaces.walk(process, vaddr, false) {
            Some(pte) => {
                *pte = value;
                true
            }
            None => false,
        }
    }

    /// Snapshot of every non-empty entry of `process`.
    pub fn entries(&mut self, process: ProcessIndex) -> Vec<(VirtAddr, Pte)> {
        let mut out = Vec::new();
        self.spaces.for_each_entry(process, &mut |vaddr, pte| {
            out.push((vaddr, *pte));
            ControlFlow::Continue(())
        });
        out
    }
}
