//! Idempotence cache for signature batches.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use threshold_types::{ChainId, Digest, Signature65};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    chain_id: ChainId,
    nonce: u64,
    digests: Vec<Digest>,
}

/// Maps `(chain, nonce, ordered digests)` to the verified signatures of a
/// completed round. Entries are only written after verification succeeds.
pub struct SigningCache {
    entries: Mutex<LruCache<CacheKey, Vec<Signature65>>>,
}

impl SigningCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, chain_id: ChainId, nonce: u64, digests: &[Digest]) -> Option<Vec<Signature65>> {
        let key = CacheKey {
            chain_id,
            nonce,
            digests: digests.to_vec(),
        };
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(&key).cloned()
    }

    pub fn put(&self, chain_id: ChainId, nonce: u64, digests: &[Digest], signatures: Vec<Signature65>) {
        let key = CacheKey {
            chain_id,
            nonce,
            digests: digests.to_vec(),
        };
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.put(key, signatures);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
