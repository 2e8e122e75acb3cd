//! Per-frame share counts.
//!
//! One `u16` per managed frame, indexed by [`ManagedRange::index_of`]. The
//! table itself does no locking; the allocator keeps it behind its own
//! [`SpinLock`](kernel_sync::SpinLock).
//!
//! [`ManagedRange::index_of`]: crate::ManagedRange::index_of

use alloc::boxed::Box;
use alloc::vec;

/// Number of owners of one frame.
pub type RefCount = u16;

/// Highest share count a frame can reach.
pub const MAX_REF_COUNT: RefCount = RefCount::MAX;

/// Failed count transition. The caller knows which frame it was about.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum CountError {
    /// Decrement of a zero count.
    Underflow,
    /// Increment past [`MAX_REF_COUNT`].
    Overflow,
    /// Expected a different current count.
    Unexpected(RefCount),
}

pub(crate) struct FrameRefTable {
    counts: Box<[RefCount]>,
}

impl FrameRefTable {
    /// A table of `frames` zero counts.
    pub(crate) fn new(frames: usize) -> Self {
        Self {
            counts: vec![0; frames].into_boxed_slice(),
        }
    }

    #[inline]
    pub(crate) fn get(&self, index: usize) -> RefCount {
        self.counts[index]
    }

    /// `0 -> 1`: a fresh owner for an untouched or free frame.
    pub(crate) fn set_owned(&mut self, index: usize) -> Result<(), CountError> {
        match self.counts[index] {
            0 => {
                self.counts[index] = 1;
                Ok(())
            }
            n => Err(CountError::Unexpected(n)),
        }
    }

    /// Add one owner and return the new count.
    ///
    /// Saturates: the count is left at [`MAX_REF_COUNT`] on overflow.
    pub(crate) fn increment(&mut self, index: usize) -> Result<RefCount, CountError> {
        let count = &mut self.counts[index];
        *count = count.checked_add(1).ok_or(CountError::Overflow)?;
        Ok(*count)
    }

    /// Drop one owner and return the new count.
    pub(crate) fn decrement(&mut self, index: usize) -> Result<RefCount, CountError> {
        let count = &mut self.counts[index];
        *count = count.checked_sub(1).ok_or(CountError::Underflow)?;
        Ok(*count)
    }

    /// `1 -> 0`: the last owner lets go.
    pub(crate) fn clear_last_owner(&mut self, index: usize) -> Result<(), CountError> {
        match self.counts[index] {
            1 => {
                self.counts[index] = 0;
                Ok(())
            }
            0 => Err(CountError::Underflow),
            n => Err(CountError::Unexpected(n)),
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.counts.len()
    }
}
