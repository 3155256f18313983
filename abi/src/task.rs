//! Process slot types shared between the process table and the memory manager.
//!
//! The memory manager never stores process pointers. Reverse-map entries are
//! keyed by the small, stable index of the process's slot in the process
//! table, which is bounded by [`MAX_PROCESSES`].

use core::fmt;

/// Number of process table slots (and of backpointer slots per frame).
pub const MAX_PROCESSES: usize = 64;

/// Index of a live process in the process table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ProcessIndex(u16);

impl ProcessIndex {
    /// Returns `None` when `index` is outside the process table.
    #[inline]
    pub const fn new(index: usize) -> Option<Self> {
        if index < MAX_PROCESSES {
            Some(Self(index as u16))
        } else {
            None
        }
    }

    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Every slot of the process table, in index order.
    pub fn all() -> impl Iterator<Item = Self> {
        (0..MAX_PROCESSES as u16).map(Self)
    }
}

impl fmt::Display for ProcessIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "proc#{}", self.0)
    }
}
