//! Per-process resident set sizes.
//!
//! A process's rss is the number of its entries currently mapping a frame
//! Present. The reverse map is the only writer: every backpointer added to
//! a frame adds one page, every one removed takes one away.

use swapvm_abi::{MAX_PROCESSES, ProcessIndex};

#[derive(Clone, Debug)]
pub struct RssTable {
    pages: [u32; MAX_PROCESSES],
}

impl Default for RssTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RssTable {
    pub const fn new() -> Self {
        Self {
            pages: [0; MAX_PROCESSES],
        }
    }

    /// Resident pages of `process`.
    #[inline]
    pub fn get(&self, process: ProcessIndex) -> u32 {
        self.pages[process.as_usize()]
    }

    #[inline]
    pub(crate) fn increment(&mut self, process: ProcessIndex) {
        let slot = &mut self.pages[process.as_usize()];
        *slot = slot.saturating_add(1);
    }

    #[inline]
    pub(crate) fn decrement(&mut self, process: ProcessIndex) {
        let slot = &mut self.pages[process.as_usize()];
        debug_assert!(*slot > 0, "rss underflow for {}", process);
        *slot = slot.saturating_sub(1);
    }

    pub(crate) fn reset(&mut self, process: ProcessIndex) {
        self.pages[process.as_usize()] = 0;
    }
}
