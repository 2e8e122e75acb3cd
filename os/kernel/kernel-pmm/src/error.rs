use crate::addresses::{Frame, PhysicalAddress};

/// Why an address is not a frame the allocator manages.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidFrameKind {
    #[error("not page-aligned")]
    Misaligned,
    #[error("below the managed range")]
    BelowRange,
    #[error("at or above the end of the managed range")]
    AboveRange,
}

/// Errors of frame-level operations.
///
/// `acquire` never produces one of these: running out of frames is reported as
/// `None`. The release path turns every error into a panic, since any of them
/// means a collaborator handed back a frame it did not own.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame {addr}: {kind}")]
    InvalidFrame {
        addr: PhysicalAddress,
        kind: InvalidFrameKind,
    },
    #[error("double free of frame {0}")]
    DoubleFree(Frame),
    #[error("frame {0} is not owned by anyone")]
    NotOwned(Frame),
    #[error("share count of frame {0} would overflow")]
    RefCountOverflow(Frame),
    #[error("frame {0} is already registered with the allocator")]
    AlreadyRegistered(Frame),
}

/// Errors describing an unusable managed range.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("range [{start}, {end}) does not contain a full frame")]
    EmptyRange {
        start: PhysicalAddress,
        end: PhysicalAddress,
    },
    #[error("range holds {frames} frames, more than the allocator can index")]
    TooManyFrames { frames: u64 },
}
