//! Git object ids for blob content.

use sha1::{Digest, Sha1};

/// Object id of a blob holding `content`: SHA-1 over `"blob <len>\0"` + bytes.
pub fn blob_id(content: &[u8]) -> String {
    let mut hasher = BlobHasher::new(content.len() as u64);
    hasher.update(content);
    // Length was taken from the same slice.
    hasher.finish().unwrap_or_default()
}

/// Incremental blob id for content read in chunks.
///
/// The object header carries the length, so it must be known up front.
pub struct BlobHasher {
    hasher: Sha1,
    expected: u64,
    seen: u64,
}

impl BlobHasher {
    pub fn new(len: u64) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(format!("blob {len}\0").as_bytes());
        Self {
            hasher,
            expected: len,
            seen: 0,
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.seen += chunk.len() as u64;
    }

    /// Hex id, or `None` when the byte count differs from the declared length
    /// (the file changed while it was being read).
    pub fn finish(self) -> Option<String> {
        if self.seen != self.expected {
            return None;
        }
        Some(hex::encode(self.hasher.finalize()))
    }
}
