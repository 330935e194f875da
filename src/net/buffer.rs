//! A contiguous growable byte buffer with a reserved prepend region and a
//! scatter-read fast path: a two-iovec `readv` (growable storage plus a
//! stack scratch region) backing its extend/compact growth policy.

use std::io::{self, IoSliceMut, Read, Write};

/// Bytes reserved at the front of the buffer so a caller can prepend a
/// length header without reallocating or shifting the readable region.
pub const PREPEND_SIZE: usize = 8;

const INITIAL_CAPACITY: usize = 1024;
/// Size of the on-stack scratch region `read_from` scatters overflow
/// into.
const SCRATCH_SIZE: usize = 65536;

/// `0 ≤ PREPEND_SIZE ≤ read_index ≤ write_index ≤ storage.len()`. Readable
/// region is `[read_index, write_index)`; writable is
/// `[write_index, storage.len())`.
pub struct Buffer {
    storage: Vec<u8>,
    read_index: usize,
    write_index: usize,
}

impl Buffer {
    pub fn new() -> Buffer {
        Buffer {
            storage: vec![0u8; PREPEND_SIZE + INITIAL_CAPACITY],
            read_index: PREPEND_SIZE,
            write_index: PREPEND_SIZE,
        }
    }

    pub fn readable_bytes(&self) -> usize {
        self.write_index - self.read_index
    }

    pub fn writable_bytes(&self) -> usize {
        self.storage.len() - self.write_index
    }

    pub fn prependable_bytes(&self) -> usize {
        self.read_index
    }

    pub fn peek(&self) -> &[u8] {
        &self.storage[self.read_index..self.write_index]
    }

    /// Advances `read_index` by `n` (capped at `readable_bytes()`),
    /// discarding bytes without copying the rest of the buffer. Resets
    /// both indices to the start of the prependable region once the
    /// readable region is fully drained, so repeated small reads don't
    /// walk `write_index` to the end of `storage` before a compaction.
    pub fn discard(&mut self, n: usize) {
        let n = n.min(self.readable_bytes());
        if n < self.readable_bytes() {
            self.read_index += n;
        } else {
            self.read_index = PREPEND_SIZE;
            self.write_index = PREPEND_SIZE;
        }
    }

    pub fn read_all(&mut self) -> Vec<u8> {
        let bytes = self.peek().to_vec();
        self.discard(bytes.len());
        bytes
    }

    /// Reads exactly `n` bytes, or `None` if fewer than `n` are
    /// currently available.
    pub fn read_fixed(&mut self, n: usize) -> Option<Vec<u8>> {
        if self.readable_bytes() < n {
            return None;
        }
        let bytes = self.storage[self.read_index..self.read_index + n].to_vec();
        self.discard(n);
        Some(bytes)
    }

    pub fn write(&mut self, data: &[u8]) {
        self.ensure_writable(data.len());
        let start = self.write_index;
        self.storage[start..start + data.len()].copy_from_slice(data);
        self.write_index += data.len();
    }

    /// Grows `storage`, or compacts the readable region to the front of
    /// the writable area, whichever is cheaper — a copy of the (usually
    /// much smaller) readable region beats reallocating the whole buffer.
    fn ensure_writable(&mut self, needed: usize) {
        if self.writable_bytes() >= needed {
            return;
        }
        if self.prependable_bytes() - PREPEND_SIZE + self.writable_bytes() >= needed {
            let readable = self.readable_bytes();
            self.storage.copy_within(self.read_index..self.write_index, PREPEND_SIZE);
            self.read_index = PREPEND_SIZE;
            self.write_index = PREPEND_SIZE + readable;
        } else {
            let readable = self.readable_bytes();
            let mut grown = vec![0u8; PREPEND_SIZE + readable + needed];
            grown[PREPEND_SIZE..PREPEND_SIZE + readable]
                .copy_from_slice(&self.storage[self.read_index..self.write_index]);
            self.storage = grown;
            self.read_index = PREPEND_SIZE;
            self.write_index = PREPEND_SIZE + readable;
        }
    }

    /// Scatter-reads from `fd` in one syscall: the primary iovec targets
    /// remaining `storage` capacity, the secondary targets a 64 KiB stack
    /// scratch buffer absorbing anything that doesn't fit, which is then
    /// appended via `write`. Returns `Ok(0)` on EOF, propagates
    /// `WouldBlock`/`Interrupted` and other I/O errors unchanged.
    pub fn read_from(&mut self, fd: &mut impl Read) -> io::Result<usize> {
        let writable = self.writable_bytes();
        let mut scratch = [0u8; SCRATCH_SIZE];

        let n = {
            let mut slices = [
                IoSliceMut::new(&mut self.storage[self.write_index..]),
                IoSliceMut::new(&mut scratch),
            ];
            fd.read_vectored(&mut slices)?
        };

        if n <= writable {
            self.write_index += n;
        } else {
            self.write_index = self.storage.len();
            let overflow = n - writable;
            self.write(&scratch[..overflow]);
        }

        Ok(n)
    }

    pub fn write_to(&mut self, fd: &mut impl Write) -> io::Result<usize> {
        let n = fd.write(self.peek())?;
        self.discard(n);
        Ok(n)
    }
}

impl Default for Buffer {
    fn default() -> Buffer {
        Buffer::new()
    }
}

#[cfg(test)]
mod test {
    use super::Buffer;

    #[test]
    fn round_trip_preserves_bytes_and_capacity_invariant() {
        let mut buf = Buffer::new();
        let payload = b"hello, reactor".to_vec();
        buf.write(&payload);
        let total_before = buf.readable_bytes() + buf.writable_bytes() + buf.prependable_bytes();
        assert_eq!(buf.read_all(), payload);
        let total_after = buf.readable_bytes() + buf.writable_bytes() + buf.prependable_bytes();
        assert_eq!(total_before, total_after);
    }

    #[test]
    fn grows_past_initial_capacity() {
        let mut buf = Buffer::new();
        let payload = vec![0xABu8; 4096];
        buf.write(&payload);
        assert_eq!(buf.readable_bytes(), 4096);
        assert_eq!(buf.read_all(), payload);
    }

    #[test]
    fn discard_resets_to_prepend_boundary_once_drained() {
        let mut buf = Buffer::new();
        buf.write(b"abc");
        buf.discard(3);
        assert_eq!(buf.prependable_bytes(), super::PREPEND_SIZE);
        assert_eq!(buf.readable_bytes(), 0);
    }

    #[test]
    fn read_fixed_returns_none_when_insufficient() {
        let mut buf = Buffer::new();
        buf.write(b"ab");
        assert!(buf.read_fixed(3).is_none());
        assert_eq!(buf.read_fixed(2), Some(b"ab".to_vec()));
    }
}
