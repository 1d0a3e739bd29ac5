//! Batch planning
//!
//! Splits an ordered identifier list into fixed-size chunks. Planning
//! is pure and lazy: [`plan`] copies nothing beyond one shared buffer,
//! and the returned [`Chunks`] iterator can be cloned to restart.

use std::num::NonZeroUsize;
use std::ops::Range;
use std::sync::Arc;

/// Server-assigned message identifier within the selected folder.
pub type Uid = u32;

/// An ordered, bounded group of identifiers processed as one unit.
#[derive(Debug, Clone)]
pub struct Chunk {
    index: usize,
    ids: Arc<[Uid]>,
    range: Range<usize>,
}

impl Chunk {
    /// Zero-based position in the plan.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn uids(&self) -> &[Uid] {
        &self.ids[self.range.clone()]
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.range.end - self.range.start
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.range.start == self.range.end
    }

    /// Render the chunk as an IMAP UID set, collapsing consecutive runs
    /// into ranges (`1:3,7,9:10`).
    #[must_use]
    pub fn uid_set(&self) -> String {
        let uids = self.uids();
        let mut runs = Vec::new();
        let mut i = 0;
        while i < uids.len() {
            let start = uids[i];
            let mut end = start;
            while i + 1 < uids.len() && uids[i + 1] == end.wrapping_add(1) {
                end = uids[i + 1];
                i += 1;
            }
            runs.push(if start == end {
                start.to_string()
            } else {
                format!("{start}:{end}")
            });
            i += 1;
        }
        runs.join(",")
    }
}

/// Lazy, restartable sequence of chunks over one identifier list.
#[derive(Debug, Clone)]
pub struct Chunks {
    ids: Arc<[Uid]>,
    size: NonZeroUsize,
    next: usize,
}

/// Partition `ids` into chunks of `size`, preserving order. The final
/// chunk may be shorter; an empty input yields no chunks.
#[must_use]
pub fn plan(ids: impl Into<Arc<[Uid]>>, size: NonZeroUsize) -> Chunks {
    Chunks {
        ids: ids.into(),
        size,
        next: 0,
    }
}

impl Chunks {
    /// Total identifiers covered by the plan.
    #[must_use]
    pub fn total(&self) -> usize {
        self.ids.len()
    }
}

impl Iterator for Chunks {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let start = self.next.checked_mul(self.size.get())?;
        if start >= self.ids.len() {
            return None;
        }
        let end = (start + self.size.get()).min(self.ids.len());
        let chunk = Chunk {
            index: self.next,
            ids: Arc::clone(&self.ids),
            range: start..end,
        };
        self.next += 1;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let consumed = self.next.saturating_mul(self.size.get());
        let remaining = self.ids.len().saturating_sub(consumed).div_ceil(self.size.get());
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Chunks {}
