//! Per-session request buffer.
//!
//! A single contiguous byte store with two cursors:
//!
//! ```text
//! 0 ........ read ........ write ........ capacity
//!  consumed   |  unread     |   writable tail
//! ```
//!
//! The network fill path writes into the tail and advances `write`; the
//! parser drains from `read`. Consumed bytes are reclaimed lazily, when the
//! next tail is reserved. The buffer never enforces a size limit itself;
//! the owning session checks the bytes held for each message against the
//! service-wide cap.

/// Growable byte accumulator with independent fill and drain cursors.
#[derive(Debug, Default)]
pub struct RequestBuffer {
    /// Backing storage. Its length is the usable capacity.
    data: Vec<u8>,
    /// Bytes already consumed by the parser.
    read: usize,
    /// Bytes already filled from the network.
    write: usize,
}

impl RequestBuffer {
    /// Create an empty buffer with `capacity` bytes pre-allocated.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity],
            read: 0,
            write: 0,
        }
    }

    /// Get a writable tail of at least `hint` bytes for the next read.
    ///
    /// Unread bytes are first moved to the front of the store so consumed
    /// space is reused. The returned slice may be longer than `hint` when
    /// spare capacity is already available.
    pub fn reserve_tail(&mut self, hint: usize) -> &mut [u8] {
        self.compact();
        let hint = hint.max(1);
        if self.data.len() - self.write < hint {
            self.data.resize(self.write + hint, 0);
        }
        &mut self.data[self.write..]
    }

    /// Mark `n` bytes of the reserved tail as filled.
    pub fn advance_write(&mut self, n: usize) {
        debug_assert!(self.write + n <= self.data.len(), "write past capacity");
        self.write = (self.write + n).min(self.data.len());
    }

    /// Bytes filled but not yet consumed.
    pub fn unread(&self) -> &[u8] {
        &self.data[self.read..self.write]
    }

    /// Mark `n` unread bytes as consumed.
    pub fn advance_read(&mut self, n: usize) {
        debug_assert!(self.read + n <= self.write, "read past write cursor");
        self.read = (self.read + n).min(self.write);
    }

    pub fn has_unread(&self) -> bool {
        self.read < self.write
    }

    /// Bytes currently held, consumed-but-unreclaimed bytes included.
    pub fn size(&self) -> usize {
        self.write
    }

    /// Allocated capacity.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    fn compact(&mut self) {
        if self.read == 0 {
            return;
        }
        if self.read < self.write {
            self.data.copy_within(self.read..self.write, 0);
        }
        self.write -= self.read;
        self.read = 0;
    }
}
