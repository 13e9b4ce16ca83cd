//! Immutable block payloads

use bytes::Bytes;

use crate::hash::ContentHash;

/// A chunk of file bytes. Its identity is the hash of `data`, which is always
/// recomputed and never taken from the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub data: Bytes,
    pub size: usize,
}

impl Block {
    #[must_use]
    pub fn new(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let size = data.len();
        Self { data, size }
    }

    /// Content hash of the payload
    #[must_use]
    pub fn hash(&self) -> ContentHash {
        ContentHash::from_bytes(&self.data)
    }

    /// Check the payload against the hash it was requested by
    #[must_use]
    pub fn matches(&self, expected: &ContentHash) -> bool {
        self.size == self.data.len() && self.hash() == *expected
    }
}
