use sha2::{Sha256, Digest};

/// Length of a content identifier in hex characters.
pub const DIGEST_HEX_LEN: usize = 64;

/// Incremental SHA256 over content that arrives in pieces.
///
/// The identifier is only available once the whole payload has been seen,
/// which is why uploads are spooled before their final path is chosen.
pub struct ContentHasher {
    h: Sha256,
    size: u64,
}

impl ContentHasher {
    pub fn new() -> ContentHasher {
        ContentHasher {
            h: Sha256::new(),
            size: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.size += data.len() as u64;
        self.h.update(data);
    }

    /// Number of bytes hashed so far.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn finalize(self) -> Vec<u8> {
        self.h.finalize().to_vec()
    }

    pub fn finalize_hex(self) -> String {
        hex::encode(self.finalize())
    }
}

impl Default for ContentHasher {
    fn default() -> ContentHasher {
        ContentHasher::new()
    }
}

/// The content identifier of `data`: SHA256, hex, lowercase, without a 0x prefix.
pub fn digest_hex(data: &[u8]) -> String {
    let mut h = ContentHasher::new();
    h.update(data);
    h.finalize_hex()
}

/// Whether `s` has the exact shape of a content identifier.
pub fn is_digest_hex(s: &str) -> bool {
    s.len() == DIGEST_HEX_LEN
        && s.bytes().all(|c| matches!(c, b'0'..=b'9' | b'a'..=b'f'))
}
