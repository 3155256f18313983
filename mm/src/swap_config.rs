//! Swap subsystem configuration.
//!
//! Defaults reproduce the reference layout: 512-byte device blocks, eight
//! blocks per slot, swap area starting at block 2. Every value can be
//! overridden from the kernel command line:
//!
//! | token | effect |
//! |---|---|
//! | `swap.slots=N` | number of swap slots |
//! | `swap.size=4M` | swap capacity; rounded down to whole pages |
//! | `swap.base=N` | first device block of the swap area |
//! | `swap.sweep=N` | percent of Accessed entries cleared per sweep (1..=100) |
//! | `mem.frames=N` | frames covered by the reverse map |

use swapvm_lib::{cmdline_value, parse_size, parse_u32, whole_pages_u64};

use crate::mm_constants::{
    BLOCKS_PER_PAGE, DEFAULT_FRAME_COUNT, DEFAULT_SWAP_SLOTS, DEFAULT_SWEEP_PERCENT,
    PAGE_SIZE_4KB, SWAP_START_BLOCK,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapConfig {
    pub frame_count: u32,
    pub slot_count: u32,
    pub base_block: u64,
    pub blocks_per_slot: u64,
    pub sweep_percent: u32,
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            frame_count: DEFAULT_FRAME_COUNT,
            slot_count: DEFAULT_SWAP_SLOTS,
            base_block: SWAP_START_BLOCK,
            blocks_per_slot: BLOCKS_PER_PAGE,
            sweep_percent: DEFAULT_SWEEP_PERCENT,
        }
    }
}

impl SwapConfig {
    /// Defaults with explicit table sizes; handy for small test machines.
    pub fn with_sizes(frame_count: u32, slot_count: u32) -> Self {
        Self {
            frame_count,
            slot_count,
            ..Self::default()
        }
    }

    pub fn from_cmdline(cmdline: Option<&str>) -> Self {
        let mut cfg = Self::default();
        let Some(cmdline) = cmdline else {
            return cfg;
        };

        if let Some(bytes) = cmdline_value(cmdline, "swap.size").and_then(parse_size) {
            cfg.slot_count = u32::try_from(whole_pages_u64(bytes, PAGE_SIZE_4KB)).unwrap_or(u32::MAX);
        }
        // An explicit slot count wins over a capacity.
        if let Some(slots) = cmdline_value(cmdline, "swap.slots").and_then(parse_u32) {
            cfg.slot_count = slots;
        }
        if let Some(base) = cmdline_value(cmdline, "swap.base").and_then(parse_u32) {
            cfg.base_block = base as u64;
        }
        if let Some(pct) = cmdline_value(cmdline, "swap.sweep").and_then(parse_u32) {
            cfg.sweep_percent = pct.clamp(1, 100);
        }
        if let Some(frames) = cmdline_value(cmdline, "mem.frames").and_then(parse_u32) {
            cfg.frame_count = frames;
        }
        cfg
    }

    /// First device block of slot `index`.
    #[inline]
    pub const fn slot_block(&self, index: u32) -> u64 {
        self.base_block + index as u64 * self.blocks_per_slot
    }

    /// Swap capacity in bytes.
    pub const fn capacity_bytes(&self) -> u64 {
        self.slot_count as u64 * PAGE_SIZE_4KB
    }
}
