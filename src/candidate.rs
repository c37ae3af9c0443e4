//! `Candidate`: a generator's loan of one hash from `RandomTracksSource`.
//!
//! A `Candidate` must be returned to its source as either used or unused
//! exactly once. The return happens on drop; callers state their intent by
//! calling [`Candidate::into_used`] / [`Candidate::into_unused`], or let the
//! candidate drop without deciding, which is treated as a logic bug (see
//! `debug_assert!` below) and defaults to "unused" in release builds so a
//! stray hash is not lost forever.

use crate::audio_data::AudioData;
use crate::hash::{FileHash, HashId};
use crate::random_tracks_source::RandomTracksSource;

/// A borrowed hash plus generator-side scoring data, on loan from a
/// [`RandomTracksSource`]. Exactly one of [`Candidate::into_used`] /
/// [`Candidate::into_unused`] must be called before the value is dropped.
pub struct Candidate {
    source: RandomTracksSource,
    hash_id: HashId,
    hash: FileHash,
    audio_data: Option<AudioData>,
    random_permillage: u32,
    returned: bool,
}

impl Candidate {
    pub fn new(
        source: RandomTracksSource,
        hash_id: HashId,
        hash: FileHash,
        audio_data: Option<AudioData>,
        random_permillage: u32,
    ) -> Self {
        Self {
            source,
            hash_id,
            hash,
            audio_data,
            random_permillage: random_permillage.min(1000),
            returned: false,
        }
    }

    pub fn hash_id(&self) -> HashId {
        self.hash_id
    }

    pub fn hash(&self) -> &FileHash {
        &self.hash
    }

    pub fn audio_data(&self) -> Option<&AudioData> {
        self.audio_data.as_ref()
    }

    pub fn random_permillage(&self) -> u32 {
        self.random_permillage
    }

    /// Consumes the candidate, returning its hash to the source as used.
    pub fn into_used(mut self) -> FileHash {
        self.source.put_back_used(&self.hash);
        self.returned = true;
        std::mem::replace(&mut self.hash, FileHash::null())
    }

    /// Consumes the candidate, returning its hash to the source as unused so
    /// it reappears in the shuffle.
    pub fn into_unused(mut self) -> FileHash {
        self.source.put_back_unused(&self.hash);
        self.returned = true;
        std::mem::replace(&mut self.hash, FileHash::null())
    }
}

impl Drop for Candidate {
    fn drop(&mut self) {
        if self.returned {
            return;
        }
        debug_assert!(
            self.returned,
            "Candidate for hash_id {:?} dropped without being returned used or unused",
            self.hash_id
        );
        // Release build fallback: treat an undecided candidate as unused so
        // the hash is not permanently lost from the reservoir.
        self.source.put_back_unused(&self.hash);
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

    fn make_candidate(source: &RandomTracksSource, seed: u8) -> Candidate {
        let hash = source.take_track().expect("hash available");
        Candidate::new(source.clone(), HashId(seed as u32), hash, None, 500)
    }

    #[test]
    fn into_used_returns_hash_as_used() {
        let source = RandomTracksSource::with_seed(1);
        source.hash_became_available(sample_hash(1));
        let candidate = make_candidate(&source, 1);
        let returned_hash = candidate.into_used();
        assert_eq!(returned_hash, sample_hash(1));
        // hash is Used, not Unused: another take_track must exhaust unused first
        assert_eq!(source.take_track(), None);
    }

    #[test]
    fn into_unused_makes_hash_immediately_drawable_again() {
        let source = RandomTracksSource::with_seed(2);
        source.hash_became_available(sample_hash(2));
        let candidate = make_candidate(&source, 2);
        candidate.into_unused();
        assert!(source.take_track().is_some());
    }

    #[test]
    #[should_panic(expected = "dropped without being returned")]
    fn dropping_without_deciding_is_a_logic_bug_in_debug_builds() {
        let source = RandomTracksSource::with_seed(3);
        source.hash_became_available(sample_hash(3));
        let _candidate = make_candidate(&source, 3);
        // falls out of scope undecided; debug_assert! in Drop must fire
    }
}
