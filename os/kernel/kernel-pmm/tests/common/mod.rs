#![allow(dead_code)]

use kernel_pmm::mapper::FRAME_BYTES;
use kernel_pmm::{Frame, FrameAllocator, FrameMapper, ManagedRange, PAGE_SIZE, PhysicalAddress};

/// Start of "RAM" in tests.
pub const RAM_BASE: u64 = 0x8000_0000;

/// Where the pretend kernel image ends; deliberately not page aligned.
pub const KERNEL_END: u64 = RAM_BASE + 0x1234;

/// Backs a managed range with a heap buffer so the allocator's junk fills
/// land somewhere real.
pub struct ArenaMapper {
    base: u64,
    ptr: *mut u8,
    len: usize,
}

// Safety: the allocator only writes frames it owns exclusively; tests only
// read frames they own.
unsafe impl Send for ArenaMapper {}
unsafe impl Sync for ArenaMapper {}

impl ArenaMapper {
    pub fn new(range: &ManagedRange) -> Self {
        let len = range.frame_count() * FRAME_BYTES;
        let ptr = Box::into_raw(vec![0u8; len].into_boxed_slice()).cast::<u8>();
        Self {
            base: range.start().as_u64(),
            ptr,
            len,
        }
    }

    fn offset(&self, frame: Frame) -> usize {
        let offset = usize::try_from(frame.base().as_u64() - self.base).unwrap();
        assert!(offset + FRAME_BYTES <= self.len, "frame {frame} outside the arena");
        offset
    }

    /// Copy of the frame's bytes. Only call while owning `frame`.
    pub fn read(&self, frame: Frame) -> Vec<u8> {
        let mut out = vec![0u8; FRAME_BYTES];
        unsafe {
            core::ptr::copy_nonoverlapping(self.ptr.add(self.offset(frame)), out.as_mut_ptr(), FRAME_BYTES);
        }
        out
    }

    /// Overwrite the frame. Only call while owning `frame`.
    pub fn fill(&self, frame: Frame, byte: u8) {
        unsafe { core::ptr::write_bytes(self.ptr.add(self.offset(frame)), byte, FRAME_BYTES) };
    }
}

impl Drop for ArenaMapper {
    fn drop(&mut self) {
        unsafe {
            drop(Box::from_raw(core::ptr::slice_from_raw_parts_mut(self.ptr, self.len)));
        }
    }
}

impl FrameMapper for ArenaMapper {
    unsafe fn frame_ptr(&self, frame: Frame) -> *mut u8 {
        unsafe { self.ptr.add(self.offset(frame)) }
    }
}

/// Managed range of `frames` frames above the pretend kernel image.
pub fn range(frames: u64) -> ManagedRange {
    let start = PhysicalAddress::new(KERNEL_END).checked_align_up().unwrap();
    ManagedRange::new(PhysicalAddress::new(KERNEL_END), start + frames * PAGE_SIZE).unwrap()
}

/// Fully bootstrapped allocator over `frames` frames.
pub fn allocator(frames: u64) -> FrameAllocator<ArenaMapper> {
    let range = range(frames);
    unsafe { FrameAllocator::initialize(range, ArenaMapper::new(&range)) }
}

/// Read a frame through the allocator's own mapper.
pub fn contents(pmm: &FrameAllocator<ArenaMapper>, frame: Frame) -> Vec<u8> {
    pmm.mapper().read(frame)
}

pub fn all(bytes: &[u8], byte: u8) -> bool {
    bytes.iter().all(|&b| b == byte)
}
