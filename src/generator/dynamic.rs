//! `TrackGenerator` (dynamic): continuous upcoming-list refill with
//! filtering (spec §4.4).

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::candidate::Candidate;
use crate::generator::pipeline::{default_selection_compare, CandidatePipeline, ScoredCandidate};
use crate::hash::{FileHash, HashIdRegistry};
use crate::history_store::HistoryStore;
use crate::queue::queue::Queue;
use crate::random_tracks_source::RandomTracksSource;
use crate::repetition_checker::{Criteria, RepetitionChecker};
use crate::resolver::PathCache;

pub const SELECTION_FILTER_TAKE_COUNT: usize = 12;
pub const SELECTION_FILTER_KEEP_COUNT: usize = 6;
pub const MAX_REFILL_ATTEMPTS_PER_TICK: u32 = 3;
pub const REFILL_TIMER: Duration = Duration::from_millis(40);
pub const FREEZE_DURATION: Duration = Duration::from_millis(250);
pub const MIN_TRACK_LENGTH_MS: i64 = 15_000;
pub const MIN_SCORE_PERMILLAGE: u32 = 300;
pub const EXTENDED_FILTER_TOLERANCE_PERMILLAGE: i64 = 100;

/// Continuous background picker driven by a 40 ms refill timer (spec §4.4).
pub struct TrackGenerator {
    pipeline: CandidatePipeline,
    source: RandomTracksSource,
    path_cache: Arc<PathCache>,
    desired_upcoming_count: usize,
    frozen_until: Option<Instant>,
}

impl TrackGenerator {
    pub fn new(source: RandomTracksSource, path_cache: Arc<PathCache>, desired_upcoming_count: usize) -> Self {
        Self {
            pipeline: CandidatePipeline::new(),
            source,
            path_cache,
            desired_upcoming_count,
            frozen_until: None,
        }
    }

    pub fn upcoming_len(&self) -> usize {
        self.pipeline.len()
    }

    pub fn needs_refill(&self) -> bool {
        self.pipeline.len() < self.desired_upcoming_count
    }

    pub fn is_frozen(&self, now: Instant) -> bool {
        self.frozen_until.map(|until| now < until).unwrap_or(false)
    }

    /// Disables refill for [`FREEZE_DURATION`]; used when the target user
    /// changes, so stats can load before generating.
    pub fn freeze_temporarily(&mut self, now: Instant) {
        self.frozen_until = Some(now + FREEZE_DURATION);
    }

    /// Builds a basic-filter closure that owns its own `Arc<PathCache>`
    /// clone rather than borrowing `self`, so it can be used alongside a
    /// `&mut self.pipeline` call in the same scope.
    fn basic_filter_fn(path_cache: Arc<PathCache>) -> impl Fn(&ScoredCandidate) -> bool {
        move |scored: &ScoredCandidate| {
            if !path_cache.has_path(scored.candidate.hash_id()) {
                return false;
            }
            if let Some(audio) = scored.candidate.audio_data() {
                if audio.length_known() && audio.track_length_ms < MIN_TRACK_LENGTH_MS {
                    return false;
                }
            }
            let Some(stats) = scored.stats else {
                return false; // absence rejects but does not freeze (caller returns hash unused)
            };
            if let Some(score) = stats.score {
                if score < MIN_SCORE_PERMILLAGE {
                    return false;
                }
            }
            true
        }
    }

    fn extended_filter(&self, scored: &ScoredCandidate) -> bool {
        let basic_ok = self.path_cache.has_path(scored.candidate.hash_id())
            && scored
                .candidate
                .audio_data()
                .map(|a| !a.length_known() || a.track_length_ms >= MIN_TRACK_LENGTH_MS)
                .unwrap_or(true);
        if !basic_ok {
            return false;
        }
        let Some(stats) = scored.stats else {
            return false;
        };
        let score = stats.score.unwrap_or(0) as i64;
        let tolerance_floor = scored.candidate.random_permillage() as i64 - EXTENDED_FILTER_TOLERANCE_PERMILLAGE;
        score >= tolerance_floor
    }

    /// Draws up to [`SELECTION_FILTER_TAKE_COUNT`] candidates, runs the
    /// basic + selection filters, and appends survivors to the upcoming
    /// list. Bounded to [`MAX_REFILL_ATTEMPTS_PER_TICK`] attempts; returns
    /// the number of candidates appended.
    pub fn refill_tick(
        &mut self,
        registry: &mut HashIdRegistry,
        history: &dyn HistoryStore,
        criteria: &Criteria,
        now: Instant,
    ) -> usize {
        if self.is_frozen(now) || !self.needs_refill() {
            return 0;
        }
        let mut appended = 0;
        for _ in 0..MAX_REFILL_ATTEMPTS_PER_TICK {
            if !self.needs_refill() {
                break;
            }
            let mut drawn = Vec::new();
            for _ in 0..SELECTION_FILTER_TAKE_COUNT {
                let Some(hash) = self.source.take_track() else {
                    break;
                };
                let hash_id = registry.register(hash.clone());
                let stats = history.user_stats(hash_id, criteria.user_generating_for);
                let random_permillage = pseudo_random_permillage(&hash);
                let candidate = Candidate::new(self.source.clone(), hash_id, hash, None, random_permillage);
                drawn.push(ScoredCandidate::new(candidate, stats));
            }
            if drawn.is_empty() {
                break;
            }
            let before = self.pipeline.len();
            let basic_filter = Self::basic_filter_fn(self.path_cache.clone());
            let rejected = self.pipeline.filter_and_keep_top(
                drawn,
                SELECTION_FILTER_KEEP_COUNT,
                basic_filter,
                default_selection_compare,
            );
            appended += self.pipeline.len() - before;
            for scored in rejected {
                scored.candidate.into_unused();
            }
        }
        appended
    }

    /// `getTracks(n)`: pops from the head of the upcoming list, applies the
    /// extended filter and repetition check, and returns up to `n` hashes.
    pub fn get_tracks(
        &mut self,
        n: usize,
        queue: &Queue,
        history: &dyn HistoryStore,
        criteria: &Criteria,
        now_playing_hash: Option<FileHash>,
        now_ms: i64,
    ) -> Vec<FileHash> {
        let mut delivered = Vec::new();
        while delivered.len() < n {
            let Some(scored) = self.pipeline.pop_front() else {
                break;
            };
            if !self.extended_filter(&scored) {
                scored.candidate.into_used();
                continue;
            }
            let checker = RepetitionChecker::new(queue, history, now_playing_hash.clone(), now_ms);
            let is_repetition = checker.is_repetition_when_queued(
                scored.candidate.hash_id(),
                scored.candidate.hash(),
                criteria,
                0,
            );
            if is_repetition {
                scored.candidate.into_used();
                continue;
            }
            let hash = scored.candidate.into_used();
            delivered.push(hash);
        }
        delivered
    }

    /// Re-applies the basic filter to the existing upcoming list, evicting
    /// now-unsuitable candidates (`criteriaChanged`).
    pub fn criteria_changed(&mut self) {
        let basic_filter = Self::basic_filter_fn(self.path_cache.clone());
        let evicted = self.pipeline.retain_basic_filter(basic_filter);
        for scored in evicted {
            scored.candidate.into_unused();
        }
    }
}

/// Deterministic pseudo-random permillage derived from the hash bytes,
/// standing in for the original's per-draw RNG roll while keeping
/// `getTracks` reproducible in tests.
fn pseudo_random_permillage(hash: &FileHash) -> u32 {
    let mut acc: u32 = 0;
    for byte in hash.sha1.iter().chain(hash.md5.iter()) {
        acc = acc.wrapping_mul(31).wrapping_add(*byte as u32);
    }
    acc % 1001
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history_store::{InMemoryHistoryStore, UserStats};

    fn sample_hash(seed: u8) -> FileHash {
        FileHash {
            byte_length: 1000 + seed as u64,
            sha1: [seed; 20],
            md5: [seed; 16],
        }
    }

    fn setup_with_tracks(count: u8) -> (TrackGenerator, RandomTracksSource, Arc<PathCache>, HashIdRegistry, InMemoryHistoryStore) {
        let source = RandomTracksSource::with_seed(1);
        let path_cache = Arc::new(PathCache::new());
        let mut registry = HashIdRegistry::new();
        let mut history = InMemoryHistoryStore::new();
        for seed in 0..count {
            let hash = sample_hash(seed);
            source.hash_became_available(hash.clone());
            let id = registry.register(hash);
            path_cache.insert(id, std::path::PathBuf::from(format!("/music/{seed}.mp3")));
            history.set_user_stats(
                id,
                0,
                UserStats {
                    last_heard: None,
                    score: Some(900),
                },
            );
        }
        let generator = TrackGenerator::new(source.clone(), path_cache.clone(), 6);
        (generator, source, path_cache, registry, history)
    }

    #[test]
    fn refill_tick_appends_up_to_keep_count() {
        let (mut generator, _source, _cache, mut registry, history) = setup_with_tracks(20);
        let criteria = Criteria::public_mode(-1);
        let appended = generator.refill_tick(&mut registry, &history, &criteria, Instant::now());
        assert!(appended > 0);
        assert!(generator.upcoming_len() <= 6);
    }

    #[test]
    fn frozen_generator_does_not_refill() {
        let (mut generator, _source, _cache, mut registry, history) = setup_with_tracks(20);
        let criteria = Criteria::public_mode(-1);
        let now = Instant::now();
        generator.freeze_temporarily(now);
        let appended = generator.refill_tick(&mut registry, &history, &criteria, now);
        assert_eq!(appended, 0);
    }

    #[test]
    fn get_tracks_returns_at_most_n_and_basic_filter_holds() {
        let (mut generator, _source, path_cache, mut registry, history) = setup_with_tracks(20);
        let criteria = Criteria::public_mode(-1);
        generator.refill_tick(&mut registry, &history, &criteria, Instant::now());
        let queue = Queue::new();
        let delivered = generator.get_tracks(3, &queue, &history, &criteria, None, 0);
        assert!(delivered.len() <= 3);
        for hash in &delivered {
            let id = registry.id_of(hash).unwrap();
            assert!(path_cache.has_path(id));
        }
    }

    #[test]
    fn low_score_tracks_fail_the_basic_filter() {
        let source = RandomTracksSource::with_seed(2);
        let path_cache = Arc::new(PathCache::new());
        let mut registry = HashIdRegistry::new();
        let mut history = InMemoryHistoryStore::new();
        let hash = sample_hash(0);
        source.hash_became_available(hash.clone());
        let id = registry.register(hash);
        path_cache.insert(id, std::path::PathBuf::from("/music/0.mp3"));
        history.set_user_stats(
            id,
            0,
            UserStats {
                last_heard: None,
                score: Some(100), // below MIN_SCORE_PERMILLAGE
            },
        );
        let mut generator = TrackGenerator::new(source, path_cache, 6);
        let criteria = Criteria::public_mode(-1);
        generator.refill_tick(&mut registry, &history, &criteria, Instant::now());
        assert_eq!(generator.upcoming_len(), 0);
    }
}
