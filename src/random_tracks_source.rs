//! Shuffled reservoir of every known `FileHash` in the library.
//!
//! Each hash is in exactly one of four states: `Unknown`, `Unused`, `Taken`,
//! `Used`. Consumers borrow a hash via [`Candidate`](crate::candidate::Candidate),
//! which returns it to the source exactly once on drop.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::hash::FileHash;

/// Best-effort prefetch target: the source tries to keep roughly this many
/// upcoming unused hashes "notified" to warm consumer caches.
pub const UPCOMING_NOTIFY_TARGET_COUNT: usize = 250;
/// How many upcoming notifications are emitted per maintenance tick.
pub const UPCOMING_NOTIFY_BATCH_COUNT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HashState {
    Unknown,
    Unused,
    Taken,
    Used,
}

struct Inner {
    state: HashMap<FileHash, HashState>,
    unused: Vec<FileHash>,
    used: Vec<FileHash>,
    notified_count: usize,
    rng: StdRng,
}

/// A shuffled reservoir shared between the core control loop components that
/// draw candidates. Cheaply cloneable; clones share the same reservoir.
#[derive(Clone)]
pub struct RandomTracksSource {
    inner: Arc<Mutex<Inner>>,
}

impl RandomTracksSource {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Construct with a deterministic RNG; used by tests that need
    /// reproducible shuffles.
    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: HashMap::new(),
                unused: Vec::new(),
                used: Vec::new(),
                notified_count: 0,
                rng,
            })),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    /// Total number of hashes the reservoir knows about (any state).
    pub fn total_count(&self) -> usize {
        self.inner.lock().unwrap().state.len()
    }

    /// Pops a hash off the reservoir, marking it `Taken`.
    ///
    /// If the unused vector is empty, all `Used` hashes are promoted back to
    /// `Unused`, the vector is reshuffled, and the draw is retried. Returns
    /// `None` only when the reservoir is empty overall.
    pub fn take_track(&self) -> Option<FileHash> {
        let mut inner = self.inner.lock().unwrap();
        if inner.unused.is_empty() {
            if inner.used.is_empty() {
                return None;
            }
            let reclaimed = std::mem::take(&mut inner.used);
            for hash in &reclaimed {
                inner.state.insert(hash.clone(), HashState::Unused);
            }
            inner.unused = reclaimed;
            shuffle(&mut inner.unused, &mut inner.rng);
            inner.notified_count = 0;
        }
        let hash = inner.unused.pop()?;
        inner.state.insert(hash.clone(), HashState::Taken);
        Some(hash)
    }

    /// Returns a hash drawn via [`Self::take_track`] as used; it will not
    /// reappear until the reservoir exhausts and reshuffles.
    pub fn put_back_used(&self, hash: &FileHash) {
        let mut inner = self.inner.lock().unwrap();
        debug_assert_eq!(
            inner.state.get(hash).copied(),
            Some(HashState::Taken),
            "put_back_used called on a hash that was not Taken"
        );
        inner.state.insert(hash.clone(), HashState::Used);
        inner.used.push(hash.clone());
    }

    /// Returns a hash drawn via [`Self::take_track`] as unused; it is
    /// appended back to the unused vector and will reappear in the shuffle.
    pub fn put_back_unused(&self, hash: &FileHash) {
        let mut inner = self.inner.lock().unwrap();
        debug_assert_eq!(
            inner.state.get(hash).copied(),
            Some(HashState::Taken),
            "put_back_unused called on a hash that was not Taken"
        );
        inner.state.insert(hash.clone(), HashState::Unused);
        inner.unused.push(hash.clone());
    }

    /// Registers a newly discovered hash. If unknown, it is inserted at a
    /// uniformly random position in the unused vector (append then swap,
    /// which preserves uniformity since the vector is already shuffled).
    pub fn hash_became_available(&self, hash: FileHash) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state.contains_key(&hash) {
            return;
        }
        inner.state.insert(hash.clone(), HashState::Unused);
        inner.unused.push(hash);
        let len = inner.unused.len();
        if len > 1 {
            let idx = inner.rng.gen_range(0..len);
            inner.unused.swap(idx, len - 1);
        }
    }

    pub fn reset_notifications(&self) {
        self.inner.lock().unwrap().notified_count = 0;
    }

    /// Drains up to `UPCOMING_NOTIFY_BATCH_COUNT` not-yet-notified unused
    /// hashes for the caller to emit `upcomingTrackNotification` for.
    pub fn next_notification_batch(&self) -> Vec<FileHash> {
        let mut inner = self.inner.lock().unwrap();
        if inner.notified_count >= UPCOMING_NOTIFY_TARGET_COUNT {
            return Vec::new();
        }
        let remaining_target = UPCOMING_NOTIFY_TARGET_COUNT - inner.notified_count;
        let batch_size = UPCOMING_NOTIFY_BATCH_COUNT.min(remaining_target);
        let available = inner.unused.len();
        let start = available.saturating_sub(inner.notified_count + batch_size);
        let end = available.saturating_sub(inner.notified_count);
        if start >= end {
            return Vec::new();
        }
        let batch = inner.unused[start..end].to_vec();
        inner.notified_count += batch.len();
        batch
    }
}

impl Default for RandomTracksSource {
    fn default() -> Self {
        Self::new()
    }
}

fn shuffle(items: &mut [FileHash], rng: &mut StdRng) {
    for i in (1..items.len()).rev() {
        let j = rng.gen_range(0..=i);
        items.swap(i, j);
    }
}
