//! The frame allocator: acquire, release, share.
//!
//! ## Lock domains
//!
//! ```text
//!   refs: SpinLock<FrameRefTable>      free: SpinLock<FreeList>
//!          (taken first)        ───►        (taken second)
//! ```
//!
//! Every path that needs both locks takes `refs` first. The path that drops
//! a frame's last reference holds `refs` across the scrub, the `1 -> 0`
//! transition and the push, so no other CPU ever sees a zero count for a
//! frame that is not on the free list. `acquire` pops and sets the count to
//! one under the same pair of locks.

use crate::addresses::{Frame, PAGE_SHIFT, PAGE_SIZE, PhysicalAddress};
use crate::error::FrameError;
use crate::free_list::FreeList;
use crate::layout::ManagedRange;
use crate::mapper::{ALLOC_JUNK, FREE_JUNK, FrameMapper, fill_frame};
use crate::ref_table::{CountError, FrameRefTable, RefCount};
use kernel_sync::SpinLock;
use log::{debug, error, info, trace, warn};

/// What a call to [`FrameAllocator::release`] did.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Release {
    /// Other owners remain; the frame and its contents are untouched.
    Shared { remaining: RefCount },
    /// The last owner let go; the frame is back on the free list.
    Freed,
}

/// Point-in-time breakdown of every managed frame.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct FrameStats {
    pub total: usize,
    /// On the free list.
    pub free: usize,
    /// Exactly one owner.
    pub owned: usize,
    /// Two or more owners (copy-on-write).
    pub shared: usize,
    /// Never registered by a bootstrap.
    pub untouched: usize,
    /// On the free list with a non-zero count. Always zero unless the tables
    /// are corrupted.
    pub inconsistent: usize,
}

/// Physical frame allocator with per-frame share counts.
///
/// Construct one with [`FrameAllocator::initialize`] during early boot and
/// hand out `&FrameAllocator` (or an `Arc`) to everything that needs frames.
pub struct FrameAllocator<M: FrameMapper> {
    range: ManagedRange,
    mapper: M,
    refs: SpinLock<FrameRefTable>,
    free: SpinLock<FreeList>,
}

impl<M: FrameMapper> FrameAllocator<M> {
    /// An allocator for `range` with no frames registered yet.
    ///
    /// Use [`bootstrap`](Self::bootstrap) to make (parts of) the range
    /// available.
    ///
    /// # Safety
    /// - `range` must be RAM owned exclusively by this allocator.
    /// - `mapper` must map the whole range writable for the allocator's lifetime.
    pub unsafe fn new(range: ManagedRange, mapper: M) -> Self {
        let frames = range.frame_count();
        let refs = FrameRefTable::new(frames);
        debug_assert_eq!(refs.len(), frames);

        Self {
            range,
            mapper,
            refs: SpinLock::new("frame_refs", refs),
            free: SpinLock::new("free_frames", FreeList::new(frames)),
        }
    }

    /// An allocator with every frame of `range` on the free list.
    ///
    /// The highest frame ends up at the head of the list, so it is the first
    /// one [`acquire`](Self::acquire) returns.
    ///
    /// # Safety
    /// See [`FrameAllocator::new`].
    pub unsafe fn initialize(range: ManagedRange, mapper: M) -> Self {
        let mut this = unsafe { Self::new(range, mapper) };
        this.register(0, range.frame_count());
        info!(
            "pmm: {} frames available in [{}, {})",
            range.frame_count(),
            range.start(),
            range.end()
        );
        this
    }

    /// Register every full frame in `[start, end)` and put it on the free list.
    ///
    /// `start` is rounded up to the next frame boundary and a partial frame at
    /// the end is ignored. Each frame is marked owned and then released through
    /// [`release`](Self::release), so bootstrap and runtime share one path.
    ///
    /// Returns the number of frames registered.
    ///
    /// # Errors
    /// - [`FrameError::InvalidFrame`] if the range leaves the managed range.
    /// - [`FrameError::AlreadyRegistered`] if any frame in it was registered
    ///   before. Nothing is modified in that case.
    pub fn bootstrap(&mut self, start: PhysicalAddress, end: PhysicalAddress) -> Result<usize, FrameError> {
        let Some(first) = start.checked_align_up() else {
            return Ok(0);
        };
        if first >= end {
            return Ok(0);
        }

        #[allow(clippy::cast_possible_truncation)]
        let pages = ((end.as_u64() - first.as_u64()) >> PAGE_SHIFT) as usize;
        if pages == 0 {
            return Ok(0);
        }

        let from = self.range.index_of(first)?;
        let last = first + (pages as u64 - 1) * PAGE_SIZE;
        let to = self.range.index_of(last)? + 1;

        let refs = self.refs.get_mut();
        let free = self.free.get_mut();
        if let Some(index) = (from..to).find(|&i| refs.get(i) != 0 || free.contains(i)) {
            return Err(FrameError::AlreadyRegistered(self.range.nth_frame(index)));
        }

        self.register(from, to);
        debug!("bootstrap: registered {pages} frames [{first}, {})", self.range.nth_frame(to - 1).end());
        Ok(pages)
    }

    /// Mark frames `from..to` owned and release them, in ascending order.
    fn register(&mut self, from: usize, to: usize) {
        for index in from..to {
            if let Err(err) = self.refs.get_mut().set_owned(index) {
                error!("bootstrap: untouched frame {index} has state {err:?}");
                panic!("bootstrap: frame {index} registered twice");
            }
            let frame = self.range.nth_frame(index);
            self.release(frame);
        }
    }

    /// Take a frame off the free list.
    ///
    /// The frame comes back with a share count of one and filled with
    /// [`ALLOC_JUNK`]; it is *not* zeroed.
    ///
    /// Returns `None` when every frame is in use. That is an ordinary
    /// out-of-memory condition the caller has to handle.
    ///
    /// # Panics
    /// If the popped frame still has owners, i.e. the tables are corrupted.
    #[must_use = "dropping an acquired frame leaks it"]
    pub fn acquire(&self) -> Option<Frame> {
        let frame = {
            let mut refs = self.refs.lock();
            let mut free = self.free.lock();

            let Some(index) = free.pop() else {
                drop(free);
                drop(refs);
                warn!("acquire: out of physical frames");
                return None;
            };

            let frame = self.range.nth_frame(index);
            if let Err(err) = refs.set_owned(index) {
                error!("acquire: free frame {frame} has state {err:?}");
                panic!("acquire: free frame {frame} still has owners");
            }
            frame
        };

        // Sole owner now, no lock needed to scribble over it.
        unsafe { fill_frame(&self.mapper, frame, ALLOC_JUNK) };
        trace!("acquire: {frame}");
        Some(frame)
    }

    /// Drop one reference to `frame`.
    ///
    /// If other owners remain, only the count changes. If this was the last
    /// owner, the frame is filled with [`FREE_JUNK`] and pushed onto the free
    /// list.
    ///
    /// # Panics
    /// If `frame` is misaligned, outside the managed range, or already free.
    /// Each of these is a bug in the caller and must not be papered over.
    pub fn release(&self, frame: Frame) -> Release {
        match self.try_release(frame) {
            Ok(outcome) => outcome,
            Err(err) => {
                error!("release: {err}");
                panic!("release: {err}");
            }
        }
    }

    fn try_release(&self, frame: Frame) -> Result<Release, FrameError> {
        let index = self.range.index_of(frame.base())?;
        let mut refs = self.refs.lock();

        match refs.get(index) {
            0 => Err(FrameError::DoubleFree(frame)),
            1 => {
                // Retire under the ref-table lock.
                unsafe { fill_frame(&self.mapper, frame, FREE_JUNK) };
                refs.clear_last_owner(index)
                    .map_err(|_| FrameError::DoubleFree(frame))?;

                let mut free = self.free.lock();
                if free.push(index).is_err() {
                    error!("release: free list already links frame {frame}");
                    panic!("release: frame {frame} with one owner was on the free list");
                }
                trace!("release: {frame} freed");
                Ok(Release::Freed)
            }
            _ => {
                let remaining = refs
                    .decrement(index)
                    .map_err(|_| FrameError::DoubleFree(frame))?;
                debug!("release: {frame} still has {remaining} owners");
                Ok(Release::Shared { remaining })
            }
        }
    }

    /// Register one more owner of an already owned frame.
    ///
    /// Call this before mapping `frame` into a second address space
    /// (copy-on-write). Returns the new share count.
    ///
    /// # Errors
    /// - [`FrameError::InvalidFrame`] if `frame` is not a managed frame.
    /// - [`FrameError::NotOwned`] if nobody owns `frame`; sharing a free frame
    ///   would hand out memory the allocator still considers available.
    /// - [`FrameError::RefCountOverflow`] at the maximum share count. The count
    ///   is left unchanged.
    pub fn mark_shared(&self, frame: Frame) -> Result<RefCount, FrameError> {
        let index = self.range.index_of(frame.base())?;
        let mut refs = self.refs.lock();

        if refs.get(index) == 0 {
            return Err(FrameError::NotOwned(frame));
        }
        let count = refs.increment(index).map_err(|err| match err {
            CountError::Overflow => FrameError::RefCountOverflow(frame),
            CountError::Underflow | CountError::Unexpected(_) => FrameError::NotOwned(frame),
        })?;

        debug!("mark_shared: {frame} now has {count} owners");
        Ok(count)
    }

    /// Current share count of `frame`.
    ///
    /// # Errors
    /// [`FrameError::InvalidFrame`] if `frame` is not a managed frame.
    pub fn ref_count(&self, frame: Frame) -> Result<RefCount, FrameError> {
        let index = self.range.index_of(frame.base())?;
        Ok(self.refs.lock().get(index))
    }

    /// Whether `frame` is currently on the free list.
    ///
    /// # Errors
    /// [`FrameError::InvalidFrame`] if `frame` is not a managed frame.
    pub fn is_free(&self, frame: Frame) -> Result<bool, FrameError> {
        let index = self.range.index_of(frame.base())?;
        Ok(self.free.lock().contains(index))
    }

    #[must_use]
    pub fn free_frames(&self) -> usize {
        self.free.lock().len()
    }

    #[must_use]
    pub const fn total_frames(&self) -> usize {
        self.range.frame_count()
    }

    #[must_use]
    pub const fn range(&self) -> &ManagedRange {
        &self.range
    }

    #[must_use]
    pub const fn mapper(&self) -> &M {
        &self.mapper
    }

    /// Classify every frame. Takes both locks for the duration of the scan.
    #[must_use]
    pub fn stats(&self) -> FrameStats {
        let refs = self.refs.lock();
        let free = self.free.lock();

        let mut stats = FrameStats {
            total: self.range.frame_count(),
            ..FrameStats::default()
        };
        for index in 0..stats.total {
            match (free.contains(index), refs.get(index)) {
                (true, 0) => stats.free += 1,
                (true, _) => stats.inconsistent += 1,
                (false, 0) => stats.untouched += 1,
                (false, 1) => stats.owned += 1,
                (false, _) => stats.shared += 1,
            }
        }
        debug_assert_eq!(stats.free + stats.inconsistent, free.len());
        stats
    }

    /// Frame indices in free-list order, head first.
    #[cfg(test)]
    pub(crate) fn free_list_snapshot(&self) -> alloc::vec::Vec<Frame> {
        let free = self.free.lock();
        free.iter().map(|i| self.range.nth_frame(i)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::FRAME_BYTES;

    /// Backs the managed range with a heap buffer.
    struct BufferMapper {
        base: u64,
        ptr: *mut u8,
    }

    impl BufferMapper {
        fn new(range: &ManagedRange) -> Self {
            let buf = vec![0u8; range.frame_count() * FRAME_BYTES].leak();
            Self {
                base: range.start().as_u64(),
                ptr: buf.as_mut_ptr(),
            }
        }
    }

    impl FrameMapper for BufferMapper {
        unsafe fn frame_ptr(&self, frame: Frame) -> *mut u8 {
            let offset = usize::try_from(frame.base().as_u64() - self.base).unwrap();
            unsafe { self.ptr.add(offset) }
        }
    }

    const BASE: u64 = 0x8000_0000;

    fn range(frames: u64) -> ManagedRange {
        ManagedRange::new(
            PhysicalAddress::new(BASE),
            PhysicalAddress::new(BASE + frames * PAGE_SIZE),
        )
        .unwrap()
    }

    fn frame(n: u64) -> Frame {
        Frame::from_address(PhysicalAddress::new(BASE + n * PAGE_SIZE))
    }

    #[test]
    fn initialize_pushes_highest_frame_last() {
        let range = range(4);
        let pmm = unsafe { FrameAllocator::initialize(range, BufferMapper::new(&range)) };
        assert_eq!(pmm.free_list_snapshot(), [frame(3), frame(2), frame(1), frame(0)]);
    }

    #[test]
    fn bootstrap_registers_sub_ranges() {
        let range = range(8);
        let mut pmm = unsafe { FrameAllocator::new(range, BufferMapper::new(&range)) };
        assert_eq!(pmm.free_frames(), 0);
        assert_eq!(pmm.acquire(), None);

        // Unaligned start and a partial last frame.
        let n = pmm
            .bootstrap(
                PhysicalAddress::new(BASE + 2 * PAGE_SIZE - 100),
                PhysicalAddress::new(BASE + 5 * PAGE_SIZE + 7),
            )
            .unwrap();
        assert_eq!(n, 3);
        assert_eq!(pmm.free_list_snapshot(), [frame(4), frame(3), frame(2)]);

        let stats = pmm.stats();
        assert_eq!(stats.free, 3);
        assert_eq!(stats.untouched, 5);
    }

    #[test]
    fn bootstrap_rejects_overlap_without_side_effects() {
        let range = range(8);
        let mut pmm = unsafe { FrameAllocator::new(range, BufferMapper::new(&range)) };
        pmm.bootstrap(frame(4).base(), frame(6).base()).unwrap();

        let err = pmm.bootstrap(frame(2).base(), frame(5).base()).unwrap_err();
        assert_eq!(err, FrameError::AlreadyRegistered(frame(4)));
        assert_eq!(pmm.free_frames(), 2);
        assert_eq!(pmm.ref_count(frame(2)), Ok(0));
        assert_eq!(pmm.is_free(frame(2)), Ok(false));
    }

    #[test]
    fn bootstrap_rejects_ranges_outside_the_managed_range() {
        let range = range(2);
        let mut pmm = unsafe { FrameAllocator::new(range, BufferMapper::new(&range)) };
        let err = pmm.bootstrap(frame(1).base(), frame(3).base()).unwrap_err();
        assert!(matches!(err, FrameError::InvalidFrame { .. }));
        assert_eq!(pmm.free_frames(), 0);
    }

    #[test]
    fn bootstrap_of_an_empty_span_is_a_no_op() {
        let range = range(2);
        let mut pmm = unsafe { FrameAllocator::new(range, BufferMapper::new(&range)) };
        assert_eq!(pmm.bootstrap(frame(1).base(), frame(1).base()), Ok(0));
        assert_eq!(pmm.bootstrap(frame(1).base() + 1, frame(2).base()), Ok(0));
        assert_eq!(pmm.stats().untouched, 2);
    }

    #[test]
    fn stats_track_owned_and_shared_frames() {
        let range = range(3);
        let pmm = unsafe { FrameAllocator::initialize(range, BufferMapper::new(&range)) };
        let a = pmm.acquire().unwrap();
        let b = pmm.acquire().unwrap();
        pmm.mark_shared(b).unwrap();

        assert_eq!(
            pmm.stats(),
            FrameStats {
                total: 3,
                free: 1,
                owned: 1,
                shared: 1,
                untouched: 0,
                inconsistent: 0,
            }
        );
        assert_eq!(pmm.ref_count(a), Ok(1));
    }
}
