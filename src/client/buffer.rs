//! Grow-only byte buffer with separate read and write cursors.

/// Bytes in `[start, end)` are filled; `[end, capacity)` is free space.
#[derive(Debug, Default)]
pub struct NetBuffer {
    buf: Vec<u8>,
    start: usize,
    end: usize,
}

impl NetBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity],
            start: 0,
            end: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn filled(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }

    /// Free space after the filled region. Call [`compact`](Self::compact) first to maximise it.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.end..]
    }

    pub fn spare_len(&self) -> usize {
        self.buf.len() - self.end
    }

    /// Mark `n` bytes of spare space as filled.
    pub fn commit(&mut self, n: usize) {
        debug_assert!(self.end + n <= self.buf.len());
        self.end += n;
    }

    /// Drop `n` bytes from the front of the filled region.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(self.start + n <= self.end);
        self.start += n;
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
    }

    /// Copy filled bytes into `dst`, consuming them.
    pub fn drain_into(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.len());
        dst[..n].copy_from_slice(&self.buf[self.start..self.start + n]);
        self.consume(n);
        n
    }

    /// Append `src` after the filled bytes, growing if needed.
    pub fn extend_from_slice(&mut self, src: &[u8]) {
        self.compact();
        if self.spare_len() < src.len() {
            self.reserve(self.end + src.len());
        }
        self.buf[self.end..self.end + src.len()].copy_from_slice(src);
        self.end += src.len();
    }

    /// Move the filled region to the front.
    pub fn compact(&mut self) {
        if self.start > 0 {
            self.buf.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
    }

    /// Ensure capacity is at least `min`. Never shrinks.
    pub fn reserve(&mut self, min: usize) {
        if self.buf.len() < min {
            self.buf.resize(min, 0);
        }
    }

    /// Grow after an overflow or underflow: to `min` if smaller, else double.
    pub fn grow(&mut self, min: usize) {
        self.compact();
        let target = if self.buf.len() < min {
            min
        } else {
            (self.buf.len() * 2).max(1)
        };
        self.buf.resize(target, 0);
    }

    /// Free the backing storage.
    pub fn release(&mut self) {
        self.buf = Vec::new();
        self.start = 0;
        self.end = 0;
    }
}
