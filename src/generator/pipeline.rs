//! `CandidatePipeline`: shared basic-filter/selection-filter machinery used
//! by both [`TrackGenerator`](super::dynamic::TrackGenerator) and
//! [`WaveGenerator`](super::wave::WaveGenerator).
//!
//! Spec §9 prefers composition over the original's `TrackGeneratorBase`
//! inheritance: this type is parameterised by a basic-filter closure and a
//! selection-comparison closure; the two generators differ only in those
//! closures and in their termination policy.

use std::cmp::Ordering;
use std::collections::VecDeque;

use crate::candidate::Candidate;
use crate::history_store::UserStats;

/// A drawn candidate plus whatever user-stats lookup was attempted for it.
/// `stats == None` means "not yet loaded", distinct from `Some(UserStats
/// { score: None, .. })` which means "loaded, no score recorded".
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub stats: Option<UserStats>,
}

impl ScoredCandidate {
    pub fn new(candidate: Candidate, stats: Option<UserStats>) -> Self {
        Self { candidate, stats }
    }

    pub fn score_or_random_permillage(&self) -> u32 {
        self.stats
            .and_then(|s| s.score)
            .unwrap_or_else(|| self.candidate.random_permillage())
    }
}

/// The standard selection-filter comparator from spec §4.4: candidates with
/// loaded stats outrank those without; among loaded candidates, higher score
/// wins, ties break on older `last_heard`, and remaining ties break on
/// `hash_id` for determinism.
pub fn default_selection_compare(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    match (a.stats, b.stats) {
        (Some(_), None) => return Ordering::Greater,
        (None, Some(_)) => return Ordering::Less,
        (None, None) => return Ordering::Equal,
        (Some(_), Some(_)) => {}
    }

    let score_a = a.score_or_random_permillage();
    let score_b = b.score_or_random_permillage();
    if score_a != score_b {
        return score_a.cmp(&score_b);
    }

    let last_heard_a = a.stats.and_then(|s| s.last_heard);
    let last_heard_b = b.stats.and_then(|s| s.last_heard);
    match (last_heard_a, last_heard_b) {
        (Some(ha), Some(hb)) => hb.cmp(&ha), // older (smaller) last_heard wins
        _ => b.candidate.hash_id().0.cmp(&a.candidate.hash_id().0),
    }
}

/// Holds the generator-internal FIFO of [`ScoredCandidate`]s awaiting
/// delivery ("the upcoming list" in spec terms).
pub struct CandidatePipeline {
    upcoming: VecDeque<ScoredCandidate>,
}

impl CandidatePipeline {
    pub fn new() -> Self {
        Self {
            upcoming: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.upcoming.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upcoming.is_empty()
    }

    /// Applies `basic_filter` to `drawn`, keeps the top `keep_count` under
    /// `selection_compare` (descending), appends survivors to the upcoming
    /// list, and returns everyone else (filter rejects and overflow) so the
    /// caller can return their hashes to the source.
    pub fn filter_and_keep_top<F, C>(
        &mut self,
        drawn: Vec<ScoredCandidate>,
        keep_count: usize,
        basic_filter: F,
        selection_compare: C,
    ) -> Vec<ScoredCandidate>
    where
        F: Fn(&ScoredCandidate) -> bool,
        C: Fn(&ScoredCandidate, &ScoredCandidate) -> Ordering,
    {
        let mut passed = Vec::new();
        let mut rejected = Vec::new();
        for scored in drawn {
            if basic_filter(&scored) {
                passed.push(scored);
            } else {
                rejected.push(scored);
            }
        }
        passed.sort_by(|a, b| selection_compare(b, a)); // descending: best first
        let overflow_start = keep_count.min(passed.len());
        let overflow = passed.split_off(overflow_start);
        rejected.extend(overflow);
        self.upcoming.extend(passed);
        rejected
    }

    pub fn pop_front(&mut self) -> Option<ScoredCandidate> {
        self.upcoming.pop_front()
    }

    /// Re-applies `basic_filter` to the existing upcoming list in place,
    /// evicting newly-unsuitable candidates (`criteriaChanged`, spec §4.4).
    pub fn retain_basic_filter<F>(&mut self, basic_filter: F) -> Vec<ScoredCandidate>
    where
        F: Fn(&ScoredCandidate) -> bool,
    {
        let mut kept = VecDeque::new();
        let mut evicted = Vec::new();
        for scored in self.upcoming.drain(..) {
            if basic_filter(&scored) {
                kept.push_back(scored);
            } else {
                evicted.push(scored);
            }
        }
        self.upcoming = kept;
        evicted
    }

    /// Drains the whole pipeline (wave termination, shutdown).
    pub fn drain_all(&mut self) -> Vec<ScoredCandidate> {
        self.upcoming.drain(..).collect()
    }
}

impl Default for CandidatePipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{FileHash, HashId};
    use crate::random_tracks_source::RandomTracksSource;

    fn sample_hash(seed: u8) -> FileHash {
        FileHash {
            byte_length: 1000 + seed as u64,
            sha1: [seed; 20],
            md5: [seed; 16],
        }
    }

    fn scored(source: &RandomTracksSource, seed: u8, score: Option<u32>, last_heard: Option<i64>) -> ScoredCandidate {
        source.hash_became_available(sample_hash(seed));
        let hash = source.take_track().unwrap();
        let candidate = Candidate::new(source.clone(), HashId(seed as u32), hash, None, 500);
        ScoredCandidate::new(candidate, Some(UserStats { last_heard, score }))
    }

    #[test]
    fn loaded_stats_outrank_unloaded_stats() {
        let source = RandomTracksSource::with_seed(1);
        let with_stats = scored(&source, 1, Some(900), None);
        let without_stats = ScoredCandidate::new(
            Candidate::new(
                source.clone(),
                HashId(2),
                {
                    source.hash_became_available(sample_hash(2));
                    source.take_track().unwrap()
                },
                None,
                500,
            ),
            None,
        );
        assert_eq!(
            default_selection_compare(&with_stats, &without_stats),
            Ordering::Greater
        );
    }

    #[test]
    fn higher_score_wins_when_both_loaded() {
        let source = RandomTracksSource::with_seed(2);
        let high = scored(&source, 1, Some(900), None);
        let low = scored(&source, 2, Some(300), None);
        assert_eq!(default_selection_compare(&high, &low), Ordering::Greater);
    }

    #[test]
    fn filter_and_keep_top_returns_rejects_for_disposal() {
        let source = RandomTracksSource::with_seed(3);
        let mut pipeline = CandidatePipeline::new();
        let drawn = vec![
            scored(&source, 1, Some(900), None),
            scored(&source, 2, Some(100), None), // rejected by basic filter below
            scored(&source, 3, Some(700), None),
        ];
        let basic_filter = |c: &ScoredCandidate| c.score_or_random_permillage() >= 300;
        let rejected = pipeline.filter_and_keep_top(drawn, 1, basic_filter, default_selection_compare);
        assert_eq!(pipeline.len(), 1);
        assert_eq!(rejected.len(), 2); // one basic-filter reject + one overflow
    }
}
