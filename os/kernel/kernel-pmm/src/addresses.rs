//! # Physical Addresses and Frames
//!
//! Thin, zero-cost wrappers around `u64` that keep raw physical addresses and
//! frame handles apart at the type level.
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`PhysicalAddress`] | Any physical byte address, aligned or not. |
//! | [`Frame`] | The handle the allocator hands out: the base address of a 4 KiB frame. |
//!
//! A [`Frame`] is *not* validated on construction. Collaborators sometimes
//! rebuild a handle from a page-table entry, and the allocator re-checks
//! alignment and range on every operation that takes one.

use core::fmt;
use core::ops::{Add, AddAssign};

/// Size of a physical frame in bytes.
pub const PAGE_SIZE: u64 = 4096;

/// `log2(PAGE_SIZE)`.
pub const PAGE_SHIFT: u32 = 12;

const _: () = assert!(1 << PAGE_SHIFT == PAGE_SIZE);

/// Physical memory address.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(u64);

impl PhysicalAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Whether the low `PAGE_SHIFT` bits are zero.
    #[inline]
    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        self.0 & (PAGE_SIZE - 1) == 0
    }

    /// Align down to the containing page boundary.
    #[inline]
    #[must_use]
    pub const fn align_down(self) -> Self {
        Self(self.0 & !(PAGE_SIZE - 1))
    }

    /// Align up to the next page boundary, or `None` if that overflows.
    #[inline]
    #[must_use]
    pub const fn checked_align_up(self) -> Option<Self> {
        match self.0.checked_add(PAGE_SIZE - 1) {
            Some(v) => Some(Self(v & !(PAGE_SIZE - 1))),
            None => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: u64) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PA(0x{:016X})", self.0)
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl Add<u64> for PhysicalAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u64> for PhysicalAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

impl From<u64> for PhysicalAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Handle for one 4 KiB physical frame, identified by its base address.
///
/// ### Invariants
/// - None enforced here. Frames returned by
///   [`FrameAllocator::acquire`](crate::FrameAllocator::acquire) are aligned
///   and inside the managed range; handles built with [`Frame::from_address`]
///   are checked when they are handed back.
///
/// ### Examples
/// ```rust
/// # use kernel_pmm::{Frame, PhysicalAddress, PAGE_SIZE};
/// let frame = Frame::containing(PhysicalAddress::new(0x8020_1234));
/// assert_eq!(frame.base().as_u64(), 0x8020_1000);
/// assert_eq!(frame.end().as_u64(), 0x8020_1000 + PAGE_SIZE);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Frame(PhysicalAddress);

impl Frame {
    /// Wrap a raw address without checking it.
    #[inline]
    #[must_use]
    pub const fn from_address(addr: PhysicalAddress) -> Self {
        Self(addr)
    }

    /// Frame that contains `addr` (aligns down).
    #[inline]
    #[must_use]
    pub const fn containing(addr: PhysicalAddress) -> Self {
        Self(addr.align_down())
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        self.0
    }

    /// First address past the frame.
    #[inline]
    #[must_use]
    pub const fn end(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0.as_u64() + PAGE_SIZE)
    }

    #[inline]
    #[must_use]
    pub const fn is_aligned(self) -> bool {
        self.0.is_page_aligned()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame(0x{:016X})", self.0.as_u64())
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}/4K", self.0.as_u64())
    }
}

impl From<Frame> for PhysicalAddress {
    #[inline]
    fn from(frame: Frame) -> Self {
        frame.0
    }
}
