//! In-memory stand-ins for the frame allocator, the swap disk and the
//! process table, plus a [`TestMachine`] that owns them together with a
//! [`SwapState`].

use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;
use core::ops::ControlFlow;

use swapvm_abi::{FrameNumber, MAX_PROCESSES, ProcessIndex, VirtAddr};

use crate::cow::FaultResolution;
use crate::error::{MmError, MmResult};
use crate::hal::{AddressSpaces, FaultContext, FrameAllocator, Machine, SwapDevice};
use crate::mm_constants::PAGE_SIZE_4KB_USIZE;
use crate::paging_defs::{PageFlags, Pte};
use crate::swap_config::SwapConfig;
use crate::swap_out::SwapOutReport;
use crate::swap_state::SwapState;

pub fn proc(index: usize) -> ProcessIndex {
    ProcessIndex::new(index).expect("process index in range")
}

struct FakeSpace {
    pid: u32,
    entries: BTreeMap<u64, Pte>,
    flushes: u32,
}

/// Page tables as ordered maps from page base to entry.
pub struct FakeSpaces {
    procs: Vec<Option<FakeSpace>>,
}

impl FakeSpaces {
    pub fn new() -> Self {
        Self {
            procs: (0..MAX_PROCESSES).map(|_| None).collect(),
        }
    }

    pub fn spawn(&mut self, process: ProcessIndex, pid: u32) {
        self.procs[process.as_usize()] = Some(FakeSpace {
            pid,
            entries: BTreeMap::new(),
            flushes: 0,
        });
    }

    pub fn kill(&mut self, process: ProcessIndex) {
        self.procs[process.as_usize()] = None;
    }

    fn space(&self, process: ProcessIndex) -> &FakeSpace {
        self.procs[process.as_usize()].as_ref().expect("process is live")
    }

    fn space_mut(&mut self, process: ProcessIndex) -> &mut FakeSpace {
        self.procs[process.as_usize()].as_mut().expect("process is live")
    }

    pub fn install(&mut self, process: ProcessIndex, vaddr: u64, pte: Pte) {
        self.space_mut(process).entries.insert(vaddr, pte);
    }

    /// Entry at `vaddr`, [`Pte::EMPTY`] if there is none.
    pub fn pte(&self, process: ProcessIndex, vaddr: u64) -> Pte {
        let base = VirtAddr::new(vaddr).page_base().as_u64();
        self.space(process).entries.get(&base).copied().unwrap_or(Pte::EMPTY)
    }

    pub fn set_flags(&mut self, process: ProcessIndex, vaddr: u64, flags: PageFlags) {
        let base = VirtAddr::new(vaddr).page_base().as_u64();
        if let Some(pte) = self.space_mut(process).entries.get_mut(&base) {
            pte.insert(flags);
        }
    }

    pub fn flushes(&self, process: ProcessIndex) -> u32 {
        self.space(process).flushes
    }
}

impl AddressSpaces for FakeSpaces {
    fn process_id(&self, process: ProcessIndex) -> Option<u32> {
        self.procs[process.as_usize()].as_ref().map(|space| space.pid)
    }

    fn walk(&mut self, process: ProcessIndex, vaddr: VirtAddr, create: bool) -> Option<&mut Pte> {
        let space = self.procs.get_mut(process.as_usize())?.as_mut()?;
        let base = vaddr.page_base().as_u64();
        if create {
            Some(space.entries.entry(base).or_insert(Pte::EMPTY))
        } else {
            space.entries.get_mut(&base)
        }
    }

    fn for_each_entry(
        &mut self,
        process: ProcessIndex,
        visit: &mut dyn FnMut(VirtAddr, &mut Pte) -> ControlFlow<()>,
    ) {
        let Some(space) = self.procs[process.as_usize()].as_mut() else {
            return;
        };
        for (&vaddr, pte) in space.entries.iter_mut() {
            if pte.is_empty() {
                continue;
            }
            if visit(VirtAddr::new(vaddr), pte).is_break() {
                break;
            }
        }
    }

    fn flush_tlb(&mut self, process: ProcessIndex) {
        if let Some(space) = self.procs[process.as_usize()].as_mut() {
            space.flushes += 1;
        }
    }
}

/// Frame allocator over a fixed number of page buffers.
///
/// Hands out the lowest free frame. Freeing a frame that is not allocated
/// panics.
pub struct FakeMemory {
    pages: Vec<Vec<u8>>,
    used: Vec<bool>,
    pub allocs: u32,
}

impl FakeMemory {
    pub fn new(frame_count: u32) -> Self {
        let count = frame_count as usize;
        Self {
            pages: (0..count).map(|_| vec![0u8; PAGE_SIZE_4KB_USIZE]).collect(),
            used: vec![false; count],
            allocs: 0,
        }
    }

    pub fn in_use(&self) -> usize {
        self.used.iter().filter(|used| **used).count()
    }

    pub fn is_allocated(&self, frame: FrameNumber) -> bool {
        self.used[frame.as_usize()]
    }
}

impl FrameAllocator for FakeMemory {
    fn alloc_frame(&mut self) -> Option<FrameNumber> {
        let index = self.used.iter().position(|used| !used)?;
        self.used[index] = true;
        self.pages[index].fill(0);
        self.allocs += 1;
        Some(FrameNumber::new(index as u32))
    }

    fn free_frame(&mut self, frame: FrameNumber) {
        assert!(self.used[frame.as_usize()], "double free of {}", frame);
        self.used[frame.as_usize()] = false;
    }

    fn frame(&self, frame: FrameNumber) -> &[u8] {
        &self.pages[frame.as_usize()]
    }

    fn frame_mut(&mut self, frame: FrameNumber) -> &mut [u8] {
        &mut self.pages[frame.as_usize()]
    }

    fn copy_frame(&mut self, src: FrameNumber, dst: FrameNumber) {
        let (src, dst) = (src.as_usize(), dst.as_usize());
        assert_ne!(src, dst, "copy onto itself");
        let (low, high) = self.pages.split_at_mut(src.max(dst));
        if src < dst {
            high[0].copy_from_slice(&low[src]);
        } else {
            low[dst].copy_from_slice(&high[0]);
        }
    }
}

/// Swap device keeping written pages by starting block.
#[derive(Default)]
pub struct FakeDisk {
    blocks: BTreeMap<u64, Vec<u8>>,
    pub fail_writes: bool,
    pub fail_reads: bool,
    pub reads: u32,
}

impl FakeDisk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(&self, block: u64) -> Option<&[u8]> {
        self.blocks.get(&block).map(Vec::as_slice)
    }
}

impl SwapDevice for FakeDisk {
    fn write_page(&mut self, block: u64, src: &[u8]) -> MmResult<()> {
        if self.fail_writes {
            return Err(MmError::BlockIo { block });
        }
        self.blocks.insert(block, src.to_vec());
        Ok(())
    }

    fn read_page(&mut self, block: u64, dst: &mut [u8]) -> MmResult<()> {
        if self.fail_reads {
            return Err(MmError::BlockIo { block });
        }
        let page = self.blocks.get(&block).ok_or(MmError::BlockIo { block })?;
        dst.copy_from_slice(page);
        self.reads += 1;
        Ok(())
    }
}

/// Fakes plus the state under test, with helpers that play the part of
/// user code touching memory.
pub struct TestMachine {
    pub memory: FakeMemory,
    pub disk: FakeDisk,
    pub spaces: FakeSpaces,
    pub state: SwapState,
}

impl TestMachine {
    pub fn new(frame_count: u32, slot_count: u32) -> Self {
        Self {
            memory: FakeMemory::new(frame_count),
            disk: FakeDisk::new(),
            spaces: FakeSpaces::new(),
            state: SwapState::new(SwapConfig::with_sizes(frame_count, slot_count)),
        }
    }

    /// The state and a [`Machine`] over the fakes, borrowed together.
    pub fn split(&mut self) -> (&mut SwapState, Machine<'_>) {
        let machine = Machine::new(&mut self.memory, &mut self.disk, &mut self.spaces);
        (&mut self.state, machine)
    }

    pub fn spawn(&mut self, index: usize, pid: u32) -> ProcessIndex {
        let process = proc(index);
        self.spaces.spawn(process, pid);
        process
    }

    /// Map a zeroed page at `vaddr` and fill its first byte with `byte`.
    pub fn map_test_page(
        &mut self,
        process: ProcessIndex,
        vaddr: u64,
        flags: PageFlags,
        byte: u8,
    ) -> MmResult<FrameNumber> {
        let (state, mut m) = self.split();
        let frame = state.map_page(&mut m, process, VirtAddr::new(vaddr), flags)?;
        self.memory.frame_mut(frame)[0] = byte;
        Ok(frame)
    }

    pub fn fault(&mut self, process: ProcessIndex, vaddr: u64) -> MmResult<FaultResolution> {
        let (state, mut m) = self.split();
        state.handle_page_fault(&mut m, FaultContext::new(process, VirtAddr::new(vaddr)))
    }

    pub fn swap_out(&mut self) -> MmResult<SwapOutReport> {
        let (state, mut m) = self.split();
        state.swap_out(&mut m)
    }

    pub fn fork(&mut self, parent: ProcessIndex, child: ProcessIndex) -> MmResult<usize> {
        let (state, mut m) = self.split();
        state.fork_cow(&mut m, parent, child)
    }

    pub fn unmap(&mut self, process: ProcessIndex, vaddr: u64) -> MmResult<()> {
        let (state, mut m) = self.split();
        state.unmap_page(&mut m, process, VirtAddr::new(vaddr))
    }

    /// Tear down `process` and empty its slot in the process table.
    pub fn exit(&mut self, process: ProcessIndex) -> MmResult<usize> {
        let (state, mut m) = self.split();
        let released = state.release_process(&mut m, process)?;
        self.spaces.kill(process);
        Ok(released)
    }

    pub fn verify(&mut self) -> MmResult<()> {
        let (state, mut m) = self.split();
        state.verify(&mut m)
    }

    pub fn pte(&self, process: ProcessIndex, vaddr: u64) -> Pte {
        self.spaces.pte(process, vaddr)
    }

    /// Byte at `vaddr` wherever the page currently lives, without faulting.
    pub fn peek(&self, process: ProcessIndex, vaddr: u64) -> Option<u8> {
        let pte = self.pte(process, vaddr);
        let offset = VirtAddr::new(vaddr).page_offset() as usize;
        if let Some(frame) = pte.frame() {
            return Some(self.memory.frame(frame)[offset]);
        }
        let slot = pte.swap_slot()?;
        let block = self.state.slots().get(slot).ok()?.block();
        self.disk.page(block).map(|page| page[offset])
    }

    /// Load from user mode: faults the page in if needed, sets ACCESSED.
    pub fn user_read(&mut self, process: ProcessIndex, vaddr: u64) -> MmResult<u8> {
        if !self.pte(process, vaddr).is_present() {
            self.fault(process, vaddr)?;
        }
        let pte = self.pte(process, vaddr);
        let frame = pte.frame().ok_or(MmError::NotMapped {
            vaddr: VirtAddr::new(vaddr),
        })?;
        self.spaces.set_flags(process, vaddr, PageFlags::ACCESSED);
        Ok(self.memory.frame(frame)[VirtAddr::new(vaddr).page_offset() as usize])
    }

    /// Store from user mode: retries after each fault like the hardware
    /// would, sets ACCESSED and DIRTY.
    pub fn user_write(&mut self, process: ProcessIndex, vaddr: u64, byte: u8) -> MmResult<()> {
        for _ in 0..3 {
            let pte = self.pte(process, vaddr);
            if let (Some(frame), true) = (pte.frame(), pte.is_writable()) {
                self.spaces
                    .set_flags(process, vaddr, PageFlags::ACCESSED | PageFlags::DIRTY);
                self.memory.frame_mut(frame)[VirtAddr::new(vaddr).page_offset() as usize] = byte;
                return Ok(());
            }
            self.fault(process, vaddr)?;
        }
        panic!("write to {:#x} by {} never became writable", vaddr, process);
    }
}
