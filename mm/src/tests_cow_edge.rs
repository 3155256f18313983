use swapvm_abi::{FrameNumber, VirtAddr};

use crate::cow::{FaultResolution, is_cow_fault};
use crate::error::MmError;
use crate::hal::FrameAllocator;
use crate::paging_defs::{PageFlags, Pte};
use crate::swap_slots::SlotIndex;
use crate::test_fixtures::{TestMachine, proc};

#[test]
fn cow_shared_write_gets_private_copy() {
    let mut tm = TestMachine::new(8, 4);
    let p0 = tm.spawn(0, 1);
    let p1 = tm.spawn(1, 2);
    let shared = tm.map_test_page(p0, 0x1000, PageFlags::USER_RW, 0x11).unwrap();
    tm.fork(p0, p1).unwrap();
    assert!(!tm.pte(p0, 0x1000).is_writable());
    assert!(!tm.pte(p1, 0x1000).is_writable());
    assert_eq!(tm.state.frames().reference_count(shared), 2);

    tm.user_write(p0, 0x1000, 0x22).unwrap();
    let private = tm.pte(p0, 0x1000).frame().unwrap();
    assert_ne!(private, shared);
    assert!(tm.pte(p0, 0x1000).is_writable());
    assert_eq!(tm.state.frames().reference_count(private), 1);
    assert_eq!(tm.state.frames().reference_count(shared), 1);
    assert_eq!(tm.state.frames().backpointers(shared).unwrap().get(p1), Some(VirtAddr::new(0x1000)));
    assert_eq!(tm.memory.frame(shared)[0], 0x11);
    assert_eq!(tm.user_read(p0, 0x1000), Ok(0x22));
    assert_eq!(tm.pte(p1, 0x1000).frame(), Some(shared));
    assert!(!tm.pte(p1, 0x1000).is_writable());
    assert_eq!(tm.state.stats().cow_copies, 1);
    tm.verify().unwrap();

    // The other process is now the sole owner and is promoted in place.
    let allocs = tm.memory.allocs;
    assert_eq!(tm.fault(p1, 0x1000), Ok(FaultResolution::Promoted(shared)));
    assert_eq!(tm.memory.allocs, allocs);
    assert!(tm.pte(p1, 0x1000).is_writable());
    tm.verify().unwrap();
}

#[test]
fn cow_duplicate_reports_both_frames() {
    let mut tm = TestMachine::new(8, 4);
    let p0 = tm.spawn(0, 1);
    let p1 = tm.spawn(1, 2);
    let old = tm.map_test_page(p0, 0x1000, PageFlags::USER_RW, 0x77).unwrap();
    tm.fork(p0, p1).unwrap();

    let Ok(FaultResolution::Duplicated { old: from, new }) = tm.fault(p1, 0x1abc) else {
        panic!("expected a copy");
    };
    assert_eq!(from, old);
    assert_eq!(tm.memory.frame(new)[0], 0x77);
    assert_eq!(tm.pte(p1, 0x1000).frame(), Some(new));
    assert_eq!(tm.state.rss(p1), 1);
    tm.verify().unwrap();
}

#[test]
fn cow_copy_into_a_lower_frame() {
    let mut tm = TestMachine::new(8, 4);
    let p0 = tm.spawn(0, 1);
    let p1 = tm.spawn(1, 2);
    let low = tm.map_test_page(p0, 0x1000, PageFlags::USER_RW, 0xaa).unwrap();
    let high = tm.map_test_page(p0, 0x2000, PageFlags::USER_RW, 0x21).unwrap();
    tm.memory.frame_mut(high)[0xfff] = 0x5e;
    tm.unmap(p0, 0x1000).unwrap();
    tm.fork(p0, p1).unwrap();

    let resolution = tm.fault(p1, 0x2000);
    assert_eq!(resolution, Ok(FaultResolution::Duplicated { old: high, new: low }));
    assert_eq!(tm.memory.frame(low), tm.memory.frame(high));
    assert_eq!(tm.peek(p1, 0x2fff), Some(0x5e));

    tm.user_write(p1, 0x2000, 0x22).unwrap();
    assert_eq!(tm.peek(p0, 0x2000), Some(0x21));
    assert_eq!(tm.peek(p1, 0x2000), Some(0x22));
    tm.verify().unwrap();
}

#[test]
fn cow_promotion_never_allocates() {
    let mut tm = TestMachine::new(8, 4);
    let p0 = tm.spawn(0, 1);
    let p1 = tm.spawn(1, 2);
    let frame = tm.map_test_page(p0, 0x1000, PageFlags::USER_RW, 0).unwrap();
    tm.fork(p0, p1).unwrap();
    tm.exit(p1).unwrap();
    assert_eq!(tm.state.frames().reference_count(frame), 1);
    assert!(!tm.pte(p0, 0x1000).is_writable());

    let allocs = tm.memory.allocs;
    let flushes = tm.spaces.flushes(p0);
    assert_eq!(tm.fault(p0, 0x1000), Ok(FaultResolution::Promoted(frame)));
    assert_eq!(tm.memory.allocs, allocs);
    assert_eq!(tm.spaces.flushes(p0), flushes + 1);
    assert_eq!(tm.pte(p0, 0x1000).frame(), Some(frame));
    assert!(tm.pte(p0, 0x1000).is_writable());
    assert_eq!(tm.state.stats().cow_promotions, 1);
}

#[test]
fn cow_fault_on_writable_entry_is_unhandled() {
    let mut tm = TestMachine::new(4, 4);
    let p0 = tm.spawn(0, 1);
    tm.map_test_page(p0, 0x1000, PageFlags::USER_RW, 0).unwrap();
    assert_eq!(
        tm.fault(p0, 0x1000),
        Err(MmError::UnhandledFault {
            vaddr: VirtAddr::new(0x1000),
            flags: PageFlags::USER_RW,
        })
    );
    assert_eq!(
        tm.fault(p0, 0x5000),
        Err(MmError::NotMapped { vaddr: VirtAddr::new(0x5000) })
    );
}

#[test]
fn cow_copy_does_not_reclaim_when_memory_is_full() {
    let mut tm = TestMachine::new(2, 4);
    let p0 = tm.spawn(0, 1);
    let p1 = tm.spawn(1, 2);
    let shared = tm.map_test_page(p0, 0x1000, PageFlags::USER_RW, 4).unwrap();
    tm.fork(p0, p1).unwrap();
    tm.map_test_page(p0, 0x2000, PageFlags::USER_RW, 0).unwrap();

    assert_eq!(tm.user_write(p0, 0x1000, 5), Err(MmError::NoMemory));
    assert_eq!(tm.pte(p0, 0x1000).frame(), Some(shared));
    assert_eq!(tm.state.frames().reference_count(shared), 2);
    assert_eq!(tm.state.stats().swap_outs, 0);
    assert_eq!(tm.peek(p0, 0x1000), Some(4));
    tm.verify().unwrap();
}

#[test]
fn cow_fork_of_swapped_page_write_protects_the_slot() {
    let mut tm = TestMachine::new(8, 4);
    let p0 = tm.spawn(0, 1);
    let p1 = tm.spawn(1, 2);
    tm.map_test_page(p0, 0x1000, PageFlags::USER_RW, 5).unwrap();
    let slot = tm.swap_out().unwrap().slot;
    assert!(tm.state.slots().get(slot).unwrap().perms().contains(PageFlags::WRITABLE));

    assert_eq!(tm.fork(p0, p1), Ok(1));
    assert_eq!(tm.pte(p1, 0x1000).swap_slot(), Some(slot));
    assert_eq!(tm.state.slots().reference_count(slot), 2);
    assert!(!tm.state.slots().get(slot).unwrap().perms().contains(PageFlags::WRITABLE));
    tm.verify().unwrap();

    // Swap-in first, then the copy on the now read-only frame.
    tm.user_write(p1, 0x1000, 6).unwrap();
    assert_eq!(tm.state.stats().swap_ins, 1);
    assert_eq!(tm.state.stats().cow_copies, 1);
    assert_eq!(tm.peek(p0, 0x1000), Some(5));
    assert_eq!(tm.peek(p1, 0x1000), Some(6));
    tm.verify().unwrap();
}

#[test]
fn cow_fork_rejects_populated_or_identical_child() {
    let mut tm = TestMachine::new(4, 4);
    let p0 = tm.spawn(0, 1);
    let p1 = tm.spawn(1, 2);
    tm.map_test_page(p0, 0x1000, PageFlags::USER_RW, 0).unwrap();
    tm.fork(p0, p1).unwrap();

    assert_eq!(
        tm.fork(p0, p1),
        Err(MmError::AlreadyMapped { vaddr: VirtAddr::new(0x1000) })
    );
    assert_eq!(tm.fork(p0, p0), Err(MmError::InvalidProcess { process: p0 }));
    assert_eq!(tm.fork(p0, proc(9)), Err(MmError::InvalidProcess { process: proc(9) }));
    tm.verify().unwrap();
}

#[test]
fn cow_fault_on_untracked_frame_is_reported() {
    let mut tm = TestMachine::new(4, 4);
    let p0 = tm.spawn(0, 1);
    tm.spaces
        .install(p0, 0x1000, Pte::present(FrameNumber::new(3), PageFlags::USER_RO));
    assert_eq!(
        tm.fault(p0, 0x1000),
        Err(MmError::UntrackedFrame { frame: FrameNumber::new(3) })
    );
}

#[test]
fn cow_fault_classification() {
    let frame = FrameNumber::new(1);
    assert!(is_cow_fault(Pte::present(frame, PageFlags::USER_RO)));
    assert!(!is_cow_fault(Pte::present(frame, PageFlags::USER_RW)));
    assert!(!is_cow_fault(Pte::swapped(SlotIndex::new(0), PageFlags::USER_RO)));
    assert!(!is_cow_fault(Pte::EMPTY));
}
