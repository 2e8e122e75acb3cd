use alloc::boxed::Box;
use alloc::vec;

/// End-of-list marker.
const NIL: u32 = u32::MAX;

/// Marks a frame that is not on the list.
const UNLINKED: u32 = u32::MAX - 1;

/// LIFO list of free frame indices.
///
/// The list lives in a side array with one link slot per managed frame:
///
/// ```text
///  head ──► 5 ──► 2 ──► 0 ──► NIL
///
///  index:  0    1         2    3         4         5
///  link:  NIL  UNLINKED   0   UNLINKED  UNLINKED   2
/// ```
///
/// Free memory is never reinterpreted as a list node: a frame's bytes belong
/// to whoever scrubbed them last, its link belongs to this table.
///
/// # Invariants
/// - `links[i] == UNLINKED` iff frame `i` is not on the list.
/// - Following `head` visits exactly `len` entries, each at most once.
/// - Indices are below [`MAX_FRAMES`](crate::layout::MAX_FRAMES), so they never
///   collide with the two markers.
pub(crate) struct FreeList {
    links: Box<[u32]>,
    head: u32,
    len: usize,
}

/// The index was already on the list.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct AlreadyLinked;

impl FreeList {
    /// An empty list able to hold `frames` entries.
    pub(crate) fn new(frames: usize) -> Self {
        Self {
            links: vec![UNLINKED; frames].into_boxed_slice(),
            head: NIL,
            len: 0,
        }
    }

    #[inline]
    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub(crate) const fn is_empty(&self) -> bool {
        self.head == NIL
    }

    #[inline]
    pub(crate) fn contains(&self, index: usize) -> bool {
        self.links[index] != UNLINKED
    }

    /// Push `index` onto the head.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn push(&mut self, index: usize) -> Result<(), AlreadyLinked> {
        if self.contains(index) {
            return Err(AlreadyLinked);
        }
        self.links[index] = self.head;
        // Bounded by MAX_FRAMES, see the type invariants.
        self.head = index as u32;
        self.len += 1;
        Ok(())
    }

    /// Unlink and return the head.
    pub(crate) fn pop(&mut self) -> Option<usize> {
        if self.is_empty() {
            return None;
        }
        let index = self.head as usize;
        self.head = self.links[index];
        self.links[index] = UNLINKED;
        self.len -= 1;
        Some(index)
    }

    /// Walk the list from the head.
    #[cfg(test)]
    pub(crate) fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        let mut cursor = self.head;
        core::iter::from_fn(move || {
            if cursor == NIL {
                return None;
            }
            let index = cursor as usize;
            cursor = self.links[index];
            Some(index)
        })
    }
}
