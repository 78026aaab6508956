//! Transfer chunking.
//!
//! A payload is cut into consecutive slices of at most `chunk_size` bytes,
//! each tagged with a 16-bit index starting at 0. The START frame announces
//! the total size in a `u16`, which bounds the payload length.

use crate::error::{Error, Result};

/// Largest payload a single transfer can describe.
pub const MAX_TRANSFER_SIZE: usize = u16::MAX as usize;

/// Geometry of one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    total_bytes: usize,
    chunk_size: usize,
}

impl ChunkPlan {
    /// Plan a transfer of `total_bytes` in chunks of `chunk_size`.
    pub fn new(total_bytes: usize, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::InvalidParam("chunk size must be non-zero".into()));
        }
        if total_bytes > MAX_TRANSFER_SIZE {
            return Err(Error::PayloadTooLarge {
                len: total_bytes,
                max: MAX_TRANSFER_SIZE,
            });
        }
        Ok(Self {
            total_bytes,
            chunk_size,
        })
    }

    /// Total payload length.
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Maximum bytes per chunk.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of chunks, `ceil(total / chunk_size)`.
    pub fn chunk_count(&self) -> usize {
        self.total_bytes.div_ceil(self.chunk_size)
    }

    /// Length of the final chunk, or 0 for an empty plan.
    pub fn last_chunk_len(&self) -> usize {
        match self.chunk_count() {
            0 => 0,
            count => self.total_bytes - self.chunk_size * (count - 1),
        }
    }

    /// Total size as announced in the START frame.
    pub fn total_u16(&self) -> u16 {
        // Bounded by MAX_TRANSFER_SIZE in `new`.
        u16::try_from(self.total_bytes).unwrap_or(u16::MAX)
    }

    /// Iterate over `(index, bytes)` pairs of `payload`.
    ///
    /// `payload` must be the buffer the plan was built for; only its first
    /// `total_bytes` bytes are visited.
    pub fn chunks<'a>(&self, payload: &'a [u8]) -> Chunks<'a> {
        let len = self.total_bytes.min(payload.len());
        Chunks {
            remaining: &payload[..len],
            chunk_size: self.chunk_size,
            next_index: 0,
        }
    }
}

/// Iterator returned by [`ChunkPlan::chunks`].
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    remaining: &'a [u8],
    chunk_size: usize,
    next_index: u16,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = (u16, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.is_empty() {
            return None;
        }
        let take = self.chunk_size.min(self.remaining.len());
        let (chunk, rest) = self.remaining.split_at(take);
        self.remaining = rest;

        let index = self.next_index;
        self.next_index = self.next_index.wrapping_add(1);
        Some((index, chunk))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining.len().div_ceil(self.chunk_size);
        (n, Some(n))
    }
}

impl ExactSizeIterator for Chunks<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hundred_bytes_in_29_byte_chunks() {
        let payload: Vec<u8> = (0..100u8).collect();
        let plan = ChunkPlan::new(payload.len(), 29).unwrap();
        assert_eq!(plan.chunk_count(), 4);
        assert_eq!(plan.last_chunk_len(), 13);

        let chunks: Vec<_> = plan.chunks(&payload).collect();
        let indices: Vec<u16> = chunks.iter().map(|(i, _)| *i).collect();
        let lens: Vec<usize> = chunks.iter().map(|(_, c)| c.len()).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert_eq!(lens, vec![29, 29, 29, 13]);
    }

    #[test]
    fn test_concatenation_reproduces_payload() {
        for (len, chunk) in [(1, 29), (29, 29), (30, 29), (1000, 61), (61 * 7, 61)] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let plan = ChunkPlan::new(len, chunk).unwrap();
            assert_eq!(plan.chunk_count(), len.div_ceil(chunk));

            let joined: Vec<u8> = plan.chunks(&payload).flat_map(|(_, c)| c.to_vec()).collect();
            assert_eq!(joined, payload);

            let last = plan.last_chunk_len();
            assert!(last > 0 && last <= chunk);
            assert_eq!(last, len - chunk * (plan.chunk_count() - 1));
        }
    }

    #[test]
    fn test_iterator_is_restartable() {
        let payload = [1u8, 2, 3, 4, 5];
        let plan = ChunkPlan::new(payload.len(), 2).unwrap();
        let first: Vec<_> = plan.chunks(&payload).collect();
        let second: Vec<_> = plan.chunks(&payload).collect();
        assert_eq!(first, second);
        assert_eq!(plan.chunks(&payload).len(), 3);
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(matches!(ChunkPlan::new(10, 0), Err(Error::InvalidParam(_))));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        assert!(ChunkPlan::new(MAX_TRANSFER_SIZE, 29).is_ok());
        assert!(matches!(
            ChunkPlan::new(MAX_TRANSFER_SIZE + 1, 29),
            Err(Error::PayloadTooLarge { .. })
        ));
    }
}
