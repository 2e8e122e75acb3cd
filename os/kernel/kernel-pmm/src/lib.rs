//! # Kernel Physical Memory Manager
//!
//! This crate owns the kernel's pool of 4 KiB physical frames. Page tables,
//! kernel stacks, process memory and I/O buffers all come from here, and
//! frames can be shared between several owners for copy-on-write.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 FrameAllocator                      │
//! │    • acquire / release / mark_shared                │
//! │    • bootstrap of the managed range                 │
//! │    • junk-fill on allocation and on free            │
//! └────────────┬───────────────────────────┬────────────┘
//!              │ refs lock (first)         │ free lock (second)
//! ┌────────────▼────────────┐ ┌────────────▼────────────┐
//! │      FrameRefTable      │ │        FreeList         │
//! │  • u16 count per frame  │ │  • LIFO of frame indices│
//! │  • 0 free, 1 owned,     │ │  • links in a side table│
//! │    >1 shared (COW)      │ │  • O(1) membership      │
//! └─────────────────────────┘ └─────────────────────────┘
//!              ▲                           ▲
//!              └────────── ManagedRange ───┘
//!                 (address ⇄ index, bounds)
//! ```
//!
//! ## Frame Lifecycle
//!
//! ```text
//!  untouched ──bootstrap──► free ──acquire──► owned(1) ──mark_shared──► shared(n)
//!                            ▲                   │                        │
//!                            └────release────────┘◄───────release─────────┘
//! ```
//!
//! Every frame is discovered once by [`FrameAllocator::initialize`] (or
//! [`FrameAllocator::bootstrap`]), which marks it owned and immediately
//! releases it. Bootstrapping therefore exercises the very same release path
//! the kernel uses at runtime, and since frames are visited in ascending
//! order, the highest frame ends up at the head of the free list.
//!
//! ## Error Model
//!
//! * **Out of memory** is expected: [`FrameAllocator::acquire`] returns `None`.
//! * **Invalid input** from a collaborator that can recover is a
//!   [`FrameError`]: sharing a free frame, sharing past the maximum count,
//!   bootstrapping a range twice.
//! * **Kernel bugs** panic: releasing a misaligned or foreign address, or
//!   releasing a frame that is already free.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kernel_pmm::{FrameAllocator, HhdmFrameMapper, ManagedRange, PhysicalAddress};
//!
//! # let kernel_end = PhysicalAddress::new(0x8004_2000);
//! let range = ManagedRange::up_to_phys_top(kernel_end).expect("kernel image overlaps RAM top");
//! let pmm = unsafe { FrameAllocator::initialize(range, HhdmFrameMapper::default()) };
//!
//! let frame = pmm.acquire().expect("out of memory");
//! pmm.mark_shared(frame).unwrap(); // second mapping (COW)
//! pmm.release(frame);              // still owned by the other mapping
//! pmm.release(frame);              // back on the free list
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod addresses;
mod allocator;
mod error;
mod free_list;
pub mod layout;
pub mod mapper;
mod ref_table;

pub use addresses::{Frame, PAGE_SHIFT, PAGE_SIZE, PhysicalAddress};
pub use allocator::{FrameAllocator, FrameStats, Release};
pub use error::{FrameError, InvalidFrameKind, LayoutError};
pub use layout::ManagedRange;
pub use mapper::{FrameMapper, HhdmFrameMapper, IdentityFrameMapper};
pub use ref_table::{MAX_REF_COUNT, RefCount};

/// Source of 4 KiB frames for page-table code.
///
/// Page-table builders only need "give me a frame" and "take it back"; they
/// should not care about share counts.
pub trait PhysFrameAlloc {
    /// Allocate one frame. Its contents are junk, not zero.
    fn alloc_4k(&mut self) -> Option<Frame>;

    /// Give a frame back.
    fn free_4k(&mut self, frame: Frame);
}

impl<M: FrameMapper> PhysFrameAlloc for &FrameAllocator<M> {
    fn alloc_4k(&mut self) -> Option<Frame> {
        self.acquire()
    }

    fn free_4k(&mut self, frame: Frame) {
        self.release(frame);
    }
}
