//! Content-addressed track identity.
//!
//! `FileHash` is the library-wide, durable identity of an audio file
//! (independent of its current path). `HashId` is a small process-lifetime
//! integer handed out by [`HashIdRegistry`] so the rest of the core can use
//! cheap map keys instead of carrying the full hash around.

use std::collections::HashMap;

/// Content identity: byte length plus two independent digests.
///
/// Equality and hashing are structural over all three fields, matching the
/// original `HashID` type. A hash with `byte_length == 0` and empty digests
/// is the distinguished "null" hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileHash {
    pub byte_length: u64,
    pub sha1: [u8; 20],
    pub md5: [u8; 16],
}

impl FileHash {
    pub fn null() -> Self {
        Self {
            byte_length: 0,
            sha1: [0u8; 20],
            md5: [0u8; 16],
        }
    }

    pub fn is_null(&self) -> bool {
        *self == Self::null()
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        use sha1::{Digest as Sha1Digest, Sha1};

        let mut sha1_hasher = Sha1::new();
        sha1_hasher.update(bytes);
        let sha1_digest = sha1_hasher.finalize();
        let mut sha1 = [0u8; 20];
        sha1.copy_from_slice(&sha1_digest);

        let md5_digest = md5::compute(bytes);
        Self {
            byte_length: bytes.len() as u64,
            sha1,
            md5: md5_digest.0,
        }
    }
}

/// A compact, process-lifetime handle for a [`FileHash`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HashId(pub u32);

/// Registers [`FileHash`] values and hands back stable [`HashId`]s.
///
/// Ids are allocated monotonically starting at 1 and are never reused within
/// a run, mirroring the queue id allocator in `queue::Queue`.
#[derive(Debug, Default)]
pub struct HashIdRegistry {
    next_id: u32,
    by_hash: HashMap<FileHash, HashId>,
    by_id: HashMap<HashId, FileHash>,
}

impl HashIdRegistry {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            by_hash: HashMap::new(),
            by_id: HashMap::new(),
        }
    }

    /// Returns the existing id for `hash`, or allocates a new one.
    pub fn register(&mut self, hash: FileHash) -> HashId {
        if let Some(id) = self.by_hash.get(&hash) {
            return *id;
        }
        let id = HashId(self.next_id);
        self.next_id += 1;
        self.by_hash.insert(hash.clone(), id);
        self.by_id.insert(id, hash);
        id
    }

    pub fn hash_of(&self, id: HashId) -> Option<&FileHash> {
        self.by_id.get(&id)
    }

    pub fn id_of(&self, hash: &FileHash) -> Option<HashId> {
        self.by_hash.get(hash).copied()
    }

    pub fn all(&self) -> impl Iterator<Item = (HashId, &FileHash)> {
        self.by_id.iter().map(|(id, hash)| (*id, hash))
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_hash(seed: u8) -> FileHash {
        FileHash {
            byte_length: 1000 + seed as u64,
            sha1: [seed; 20],
            md5: [seed; 16],
        }
    }

    #[test]
    fn equality_is_structural_over_all_three_fields() {
        let a = sample_hash(1);
        let mut b = sample_hash(1);
        assert_eq!(a, b);
        b.byte_length += 1;
        assert_ne!(a, b);
    }

    #[test]
    fn null_hash_is_distinguishable() {
        let null = FileHash::null();
        assert!(null.is_null());
        assert_ne!(null, sample_hash(1));
    }

    #[test]
    fn registry_is_idempotent_for_the_same_hash() {
        let mut registry = HashIdRegistry::new();
        let hash = sample_hash(7);
        let first = registry.register(hash.clone());
        let second = registry.register(hash.clone());
        assert_eq!(first, second);
        assert_eq!(registry.hash_of(first), Some(&hash));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn registry_allocates_distinct_increasing_ids() {
        let mut registry = HashIdRegistry::new();
        let first = registry.register(sample_hash(1));
        let second = registry.register(sample_hash(2));
        assert!(second.0 > first.0);
    }

    #[test]
    fn from_bytes_is_deterministic() {
        let a = FileHash::from_bytes(b"hello world");
        let b = FileHash::from_bytes(b"hello world");
        assert_eq!(a, b);
        let c = FileHash::from_bytes(b"hello world!");
        assert_ne!(a, c);
    }
}
