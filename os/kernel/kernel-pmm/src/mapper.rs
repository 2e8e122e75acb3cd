//! # Frame Mappers
//!
//! The allocator tracks frames by physical address but has to write junk
//! into them on every allocation and release. A [`FrameMapper`] turns a frame
//! into a pointer the current address space can write through.
//!
//! ## Strategies
//! - [`HhdmFrameMapper`]: the kernel sees all of RAM at a fixed offset
//!   (higher-half direct map), so the pointer is `hhdm_base + pa`.
//! - [`IdentityFrameMapper`]: physical memory is identity mapped, as on
//!   boards where the kernel runs with paging off or with a 1:1 map of RAM.
//!
//! Hosted tests supply their own mapper backed by a heap arena.
//!
//! ## Junk patterns
//! Allocated frames are filled with [`ALLOC_JUNK`], freed frames with
//! [`FREE_JUNK`]. Neither is zero: code that expects fresh frames to be
//! zeroed, or that keeps reading a frame after freeing it, sees garbage
//! instead of plausible data.

use crate::addresses::{Frame, PAGE_SIZE};
use crate::layout::HHDM_BASE;

/// Fill byte for frames handed out by `acquire`.
pub const ALLOC_JUNK: u8 = 0x05;

/// Fill byte for frames returned to the free list.
pub const FREE_JUNK: u8 = 0x01;

/// Frame size as a byte count.
#[allow(clippy::cast_possible_truncation)]
pub const FRAME_BYTES: usize = PAGE_SIZE as usize;

const _: () = assert!(ALLOC_JUNK != FREE_JUNK);

/// Converts a managed frame to a writable pointer in the current address space.
pub trait FrameMapper {
    /// Pointer to the first byte of `frame`.
    ///
    /// # Safety
    /// The caller must only pass frames of the managed range. The returned
    /// pointer must be valid for writes of [`FRAME_BYTES`] bytes for as long
    /// as the allocator exists.
    unsafe fn frame_ptr(&self, frame: Frame) -> *mut u8;
}

/// [`FrameMapper`] for kernels with a higher-half direct map.
///
/// # Safety
/// The direct map must cover the whole managed range and be writable.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HhdmFrameMapper {
    hhdm_base: u64,
}

impl HhdmFrameMapper {
    #[must_use]
    pub const fn new(hhdm_base: u64) -> Self {
        Self { hhdm_base }
    }
}

impl Default for HhdmFrameMapper {
    fn default() -> Self {
        Self::new(HHDM_BASE)
    }
}

impl FrameMapper for HhdmFrameMapper {
    unsafe fn frame_ptr(&self, frame: Frame) -> *mut u8 {
        (self.hhdm_base + frame.base().as_u64()) as *mut u8
    }
}

/// [`FrameMapper`] for identity-mapped physical memory.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct IdentityFrameMapper;

impl FrameMapper for IdentityFrameMapper {
    unsafe fn frame_ptr(&self, frame: Frame) -> *mut u8 {
        frame.base().as_u64() as *mut u8
    }
}

/// Overwrite the whole frame with `pattern`.
///
/// # Safety
/// The caller must own `frame` exclusively: nobody else may read or write it
/// while this runs.
pub(crate) unsafe fn fill_frame<M: FrameMapper + ?Sized>(mapper: &M, frame: Frame, pattern: u8) {
    unsafe {
        let ptr = mapper.frame_ptr(frame);
        core::ptr::write_bytes(ptr, pattern, FRAME_BYTES);
    }
}
