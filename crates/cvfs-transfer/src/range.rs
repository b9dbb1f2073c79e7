//! Byte range → chunk index range planning

use std::ops::Range;

/// Half-open range of chunk indices `[first, last)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub first: u64,
    pub last: u64,
}

impl ChunkRange {
    pub fn is_empty(&self) -> bool {
        self.first >= self.last
    }

    pub fn len(&self) -> u64 {
        self.last.saturating_sub(self.first)
    }

    pub fn indices(&self) -> Range<u64> {
        self.first..self.last.max(self.first)
    }
}

/// Map a byte range onto the chunks that cover it.
///
/// A missing `start` means 0, a missing `end` means end of file. Ranges that
/// begin past the last chunk plan to an empty range.
pub fn plan(start: Option<u64>, end: Option<u64>, chunk_count: u64, chunk_size: u64) -> ChunkRange {
    if chunk_size == 0 {
        return ChunkRange { first: 0, last: 0 };
    }
    let start = start.unwrap_or(0);
    let end = end.unwrap_or_else(|| chunk_count.saturating_mul(chunk_size));

    let first = (start / chunk_size).min(chunk_count);
    let last = (end / chunk_size)
        .saturating_add(1)
        .min(chunk_count)
        .max(first);
    ChunkRange { first, last }
}

/// Offsets within the concatenated plaintext of `range` that hold the bytes
/// `[start, end)` of the file. Out-of-bounds requests yield an empty range.
pub fn slice_bounds(
    buffer_len: usize,
    range: ChunkRange,
    chunk_size: u64,
    start: Option<u64>,
    end: Option<u64>,
) -> Range<usize> {
    let start = start.unwrap_or(0);
    let base = range.first.saturating_mul(chunk_size);
    let from = clamp_to(start.saturating_sub(base), buffer_len);
    let to = match end {
        Some(end) => clamp_to(
            start
                .saturating_sub(base)
                .saturating_add(end.saturating_sub(start)),
            buffer_len,
        ),
        None => buffer_len,
    };
    if to <= from {
        0..0
    } else {
        from..to
    }
}

fn clamp_to(value: u64, len: usize) -> usize {
    usize::try_from(value).map_or(len, |v| v.min(len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const S: u64 = cvfs_core::CHUNK_SIZE;

    #[test]
    fn whole_file() {
        assert_eq!(plan(Some(0), None, 5, S), ChunkRange { first: 0, last: 5 });
        assert_eq!(plan(None, None, 5, S), ChunkRange { first: 0, last: 5 });
    }

    #[test]
    fn range_past_end_is_empty() {
        let r = plan(Some(5 * S + 1), Some(5 * S + 100), 5, S);
        assert!(r.is_empty());
        assert_eq!(r.len(), 0);
    }

    #[test]
    fn straddling_boundary_needs_two_chunks() {
        let r = plan(Some(S - 512), Some(S + 512), 5, S);
        assert_eq!(r, ChunkRange { first: 0, last: 2 });
        let bounds = slice_bounds((2 * S) as usize, r, S, Some(S - 512), Some(S + 512));
        assert_eq!(bounds.len(), 1024);
        assert_eq!(bounds.start, (S - 512) as usize);
    }

    #[test]
    fn end_before_start_slices_to_nothing() {
        let r = plan(Some(100), Some(50), 1, S);
        assert_eq!(r, ChunkRange { first: 0, last: 1 });
        assert_eq!(slice_bounds(200, r, S, Some(100), Some(50)), 0..0);
    }

    #[test]
    fn open_end_runs_to_buffer_end() {
        let r = plan(Some(S + 10), None, 3, S);
        assert_eq!(r, ChunkRange { first: 1, last: 3 });
        assert_eq!(slice_bounds(1500, r, S, Some(S + 10), None), 10..1500);
    }

    #[test]
    fn empty_file() {
        assert!(plan(None, None, 0, S).is_empty());
        assert!(plan(Some(0), Some(10), 0, S).is_empty());
    }

    proptest! {
        #[test]
        fn planned_range_stays_in_bounds(
            start in 0u64..10_000,
            len in 0u64..10_000,
            count in 0u64..20,
            size in 1u64..1_000,
        ) {
            let r = plan(Some(start), Some(start + len), count, size);
            prop_assert!(r.first <= r.last);
            prop_assert!(r.last <= count);
        }
    }
}
