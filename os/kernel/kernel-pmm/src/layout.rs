//! # Managed Memory Layout
//!
//! The allocator owns one contiguous, half-open physical range
//! `[managed_start, managed_end)`. `managed_start` is the first page boundary
//! at or after the end of the kernel image; `managed_end` is the end of the
//! last *full* frame below the top of installed RAM.
//!
//! ```text
//! PHYS_BASE      kernel_end   managed_start                managed_end  PHYS_TOP
//!     │ kernel image │ (pad)   │  frame 0 │ frame 1 │ … │ frame n-1 │ (tail) │
//! ```
//!
//! [`ManagedRange::index_of`] is the only place where an address is turned
//! into a table index; everything else goes through it.

use crate::addresses::{Frame, PAGE_SHIFT, PAGE_SIZE, PhysicalAddress};
use crate::error::{FrameError, InvalidFrameKind, LayoutError};

/// Where RAM starts on the reference board.
pub const PHYS_BASE: u64 = 0x8000_0000;

/// Top of installed RAM on the reference board (128 MiB).
pub const PHYS_TOP: u64 = PHYS_BASE + 128 * 1024 * 1024;

/// Number of frames between [`PHYS_BASE`] and [`PHYS_TOP`].
pub const PHYS_FRAMES: u64 = (PHYS_TOP - PHYS_BASE) / PAGE_SIZE;

/// Base of the higher-half direct map: physical address `pa` is visible to
/// the kernel at `HHDM_BASE + pa`.
pub const HHDM_BASE: u64 = 0xffff_8880_0000_0000;

/// Upper bound on the frames a single range may hold.
///
/// The free list stores links as `u32` and reserves the two highest values
/// as markers.
pub const MAX_FRAMES: u64 = u32::MAX as u64 - 1;

const _: () = {
    assert!(PHYS_BASE.is_multiple_of(PAGE_SIZE));
    assert!(PHYS_TOP > PHYS_BASE);
    assert!(PHYS_FRAMES == 32768);
    assert!(PHYS_FRAMES <= MAX_FRAMES);
    assert!(HHDM_BASE.is_multiple_of(PAGE_SIZE));
};

/// The physical range handed to the allocator, trimmed to whole frames.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ManagedRange {
    start: PhysicalAddress,
    end: PhysicalAddress,
    frames: usize,
}

impl ManagedRange {
    /// Build the range covering every full frame in `[kernel_end, phys_top)`.
    ///
    /// `kernel_end` is rounded up and `phys_top` effectively rounded down.
    ///
    /// # Errors
    /// - [`LayoutError::EmptyRange`] if no full frame fits.
    /// - [`LayoutError::TooManyFrames`] if the range exceeds [`MAX_FRAMES`].
    pub fn new(kernel_end: PhysicalAddress, phys_top: PhysicalAddress) -> Result<Self, LayoutError> {
        let empty = LayoutError::EmptyRange {
            start: kernel_end,
            end: phys_top,
        };

        let start = kernel_end.checked_align_up().ok_or(empty)?;
        if start >= phys_top {
            return Err(empty);
        }

        let frames = (phys_top.as_u64() - start.as_u64()) >> PAGE_SHIFT;
        if frames == 0 {
            return Err(empty);
        }
        if frames > MAX_FRAMES {
            return Err(LayoutError::TooManyFrames { frames });
        }
        let count = usize::try_from(frames).map_err(|_| LayoutError::TooManyFrames { frames })?;

        Ok(Self {
            start,
            end: start + frames * PAGE_SIZE,
            frames: count,
        })
    }

    /// Range from the end of the kernel image up to [`PHYS_TOP`].
    ///
    /// # Errors
    /// See [`ManagedRange::new`].
    pub fn up_to_phys_top(kernel_end: PhysicalAddress) -> Result<Self, LayoutError> {
        Self::new(kernel_end, PhysicalAddress::new(PHYS_TOP))
    }

    /// First managed frame address.
    #[inline]
    #[must_use]
    pub const fn start(&self) -> PhysicalAddress {
        self.start
    }

    /// One past the last managed byte.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> PhysicalAddress {
        self.end
    }

    #[inline]
    #[must_use]
    pub const fn frame_count(&self) -> usize {
        self.frames
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, addr: PhysicalAddress) -> bool {
        addr >= self.start && addr < self.end
    }

    /// Table index of the frame starting at `addr`.
    ///
    /// # Errors
    /// [`FrameError::InvalidFrame`] if `addr` is misaligned or outside the range.
    #[allow(clippy::cast_possible_truncation)]
    pub fn index_of(&self, addr: PhysicalAddress) -> Result<usize, FrameError> {
        let kind = if !addr.is_page_aligned() {
            InvalidFrameKind::Misaligned
        } else if addr < self.start {
            InvalidFrameKind::BelowRange
        } else if addr >= self.end {
            InvalidFrameKind::AboveRange
        } else {
            // Bounded by `frames`, which fits in usize.
            return Ok(((addr.as_u64() - self.start.as_u64()) >> PAGE_SHIFT) as usize);
        };
        Err(FrameError::InvalidFrame { addr, kind })
    }

    /// Frame at table index `index`, if there is one.
    #[inline]
    #[must_use]
    pub fn frame_at(&self, index: usize) -> Option<Frame> {
        (index < self.frames).then(|| self.nth_frame(index))
    }

    /// Frame at an index already known to be in range.
    #[inline]
    pub(crate) fn nth_frame(&self, index: usize) -> Frame {
        debug_assert!(index < self.frames);
        Frame::from_address(self.start + (index as u64) * PAGE_SIZE)
    }

    /// All managed frames in ascending address order.
    pub fn frames(&self) -> impl DoubleEndedIterator<Item = Frame> + ExactSizeIterator + '_ {
        (0..self.frames).map(|i| self.nth_frame(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KIB: u64 = 1024;

    #[test]
    fn rounds_start_up_and_drops_partial_tail() {
        let range = ManagedRange::new(
            PhysicalAddress::new(PHYS_BASE + 100),
            PhysicalAddress::new(PHYS_BASE + 4 * PAGE_SIZE + 12),
        )
        .unwrap();

        assert_eq!(range.start().as_u64(), PHYS_BASE + PAGE_SIZE);
        assert_eq!(range.end().as_u64(), PHYS_BASE + 4 * PAGE_SIZE);
        assert_eq!(range.frame_count(), 3);
    }

    #[test]
    fn default_layout_holds_all_frames_above_kernel() {
        let range = ManagedRange::up_to_phys_top(PhysicalAddress::new(PHYS_BASE + 64 * KIB)).unwrap();
        assert_eq!(range.frame_count() as u64, PHYS_FRAMES - 16);
        assert_eq!(range.end().as_u64(), PHYS_TOP);
    }

    #[test]
    fn rejects_ranges_without_a_full_frame() {
        let start = PhysicalAddress::new(PHYS_BASE + 1);
        let end = PhysicalAddress::new(PHYS_BASE + PAGE_SIZE + 8);
        assert_eq!(
            ManagedRange::new(start, end),
            Err(LayoutError::EmptyRange { start, end })
        );

        let top = PhysicalAddress::new(u64::MAX);
        assert!(matches!(
            ManagedRange::new(PhysicalAddress::new(u64::MAX - 10), top),
            Err(LayoutError::EmptyRange { .. })
        ));
    }

    #[test]
    fn rejects_ranges_the_free_list_cannot_index() {
        let err = ManagedRange::new(PhysicalAddress::new(0), PhysicalAddress::new(1 << 48)).unwrap_err();
        assert_eq!(err, LayoutError::TooManyFrames { frames: 1 << 36 });
    }

    #[test]
    fn index_of_validates_every_address() {
        let range = ManagedRange::new(
            PhysicalAddress::new(PHYS_BASE),
            PhysicalAddress::new(PHYS_BASE + 8 * PAGE_SIZE),
        )
        .unwrap();

        assert_eq!(range.index_of(PhysicalAddress::new(PHYS_BASE)), Ok(0));
        assert_eq!(range.index_of(PhysicalAddress::new(PHYS_BASE + 7 * PAGE_SIZE)), Ok(7));

        let kind = |addr: u64| match range.index_of(PhysicalAddress::new(addr)) {
            Err(FrameError::InvalidFrame { kind, .. }) => Some(kind),
            _ => None,
        };
        assert_eq!(kind(PHYS_BASE - PAGE_SIZE), Some(InvalidFrameKind::BelowRange));
        assert_eq!(kind(PHYS_BASE + 8 * PAGE_SIZE), Some(InvalidFrameKind::AboveRange));
        assert_eq!(kind(PHYS_BASE + 3), Some(InvalidFrameKind::Misaligned));
    }

    #[test]
    fn frames_iterate_in_ascending_order() {
        let range = ManagedRange::new(
            PhysicalAddress::new(PHYS_BASE),
            PhysicalAddress::new(PHYS_BASE + 3 * PAGE_SIZE),
        )
        .unwrap();

        let bases: Vec<u64> = range.frames().map(|f| f.base().as_u64()).collect();
        assert_eq!(bases, [PHYS_BASE, PHYS_BASE + PAGE_SIZE, PHYS_BASE + 2 * PAGE_SIZE]);
        assert_eq!(range.frame_at(2), range.frames().next_back());
        assert_eq!(range.frame_at(3), None);
    }
}
