//! Conservative record of the byte range of a heap that is still known to be
//! zero since the heap was created.

/// Single half-open interval `[begin, end)` of never-written bytes.
///
/// Only one interval is kept, so the record can only shrink: when a used range
/// splits it, the smaller remainder is forgotten. An empty interval means
/// nothing is known to be zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ZeroRange {
    begin: u64,
    end: u64,
}

impl ZeroRange {
    /// A fresh heap of `size` bytes is entirely zero.
    pub const fn new(size: u64) -> Self {
        Self { begin: 0, end: size }
    }

    #[inline]
    pub const fn begin(&self) -> u64 {
        self.begin
    }

    #[inline]
    pub const fn end(&self) -> u64 {
        self.end
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.begin >= self.end
    }

    /// Returns `true` if every byte of `[begin, end)` is still zero.
    pub fn is_zero(&self, begin: u64, end: u64) -> bool {
        debug_assert!(begin < end, "is_zero: empty query range [{begin}, {end})");
        begin >= self.begin && end <= self.end
    }

    /// Records that `[used_begin, used_end)` has been handed out.
    pub fn mark_used(&mut self, used_begin: u64, used_end: u64) {
        // Disjoint: nothing changes.
        if used_end <= self.begin || self.end <= used_begin {
            return;
        }
        if used_begin <= self.begin && self.end <= used_end {
            self.begin = 0;
            self.end = 0;
            return;
        }
        let zero_before = used_begin.saturating_sub(self.begin);
        let zero_after = self.end.saturating_sub(used_end);
        debug_assert!(zero_before > 0 || zero_after > 0);
        if zero_before > zero_after {
            self.end = used_begin;
        } else {
            self.begin = used_end;
        }
    }
}
