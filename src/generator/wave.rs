//! `WaveGenerator`: a one-shot, bounded burst generator for one user
//! (spec §4.5).

use std::sync::Arc;

use crate::candidate::Candidate;
use crate::generator::pipeline::{default_selection_compare, CandidatePipeline, ScoredCandidate};
use crate::hash::{FileHash, HashIdRegistry};
use crate::history_store::HistoryStore;
use crate::queue::queue::Queue;
use crate::random_tracks_source::RandomTracksSource;
use crate::repetition_checker::{Criteria, RepetitionChecker};
use crate::resolver::PathCache;

pub const TAKE_COUNT: usize = 22;
pub const KEEP_COUNT: usize = 10;
pub const GENERATION_GOAL: usize = KEEP_COUNT * 2;
pub const MIN_TRACK_LENGTH_MS: i64 = 30_000;
pub const MIN_SCORE_PERMILLAGE: u32 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveState {
    Inactive,
    ActiveGenerating,
    ActiveComplete,
}

/// `waveProgress(delivered, total)`. `total` is `None` (unknown) until the
/// wave completes, matching the chosen Open Question resolution (see
/// DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveProgress {
    pub delivered: u32,
    pub total: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveEvent {
    Started,
    Progress(WaveProgress),
    Ended { completed: bool },
}

pub struct WaveGenerator {
    pipeline: CandidatePipeline,
    source: RandomTracksSource,
    path_cache: Arc<PathCache>,
    state: WaveState,
    delivered: u32,
    consecutive_draw_failures: u32,
}

impl WaveGenerator {
    pub fn new(source: RandomTracksSource, path_cache: Arc<PathCache>) -> Self {
        Self {
            pipeline: CandidatePipeline::new(),
            source,
            path_cache,
            state: WaveState::Inactive,
            delivered: 0,
            consecutive_draw_failures: 0,
        }
    }

    pub fn state(&self) -> WaveState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, WaveState::ActiveGenerating | WaveState::ActiveComplete)
    }

    /// Only valid when `criteria.user_generating_for > 0`. Empties buffers,
    /// enters `ActiveGenerating`, and returns the `waveStarted` event.
    pub fn start_wave(&mut self, criteria: &Criteria) -> Option<WaveEvent> {
        if criteria.is_public_mode() {
            return None;
        }
        self.pipeline.drain_all();
        self.delivered = 0;
        self.consecutive_draw_failures = 0;
        self.state = WaveState::ActiveGenerating;
        Some(WaveEvent::Started)
    }

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
                return false;
            };
            match stats.score {
                Some(score) if score >= MIN_SCORE_PERMILLAGE => true,
                _ => false,
            }
        }
    }

    /// One tick of the 40 ms refill timer: draws into an internal buffer
    /// until it reaches [`TAKE_COUNT`] qualifying candidates, applies the
    /// selection filter (top [`KEEP_COUNT`] by score), and appends survivors.
    /// Marks the wave `ActiveComplete` once `upcoming >= GENERATION_GOAL`,
    /// or terminates as a failure if draws keep failing.
    pub fn refill_tick(
        &mut self,
        registry: &mut HashIdRegistry,
        history: &dyn HistoryStore,
        criteria: &Criteria,
    ) -> Vec<WaveEvent> {
        let mut events = Vec::new();
        if self.state != WaveState::ActiveGenerating {
            return events;
        }
        if self.pipeline.len() >= GENERATION_GOAL {
            self.state = WaveState::ActiveComplete;
            events.push(WaveEvent::Ended { completed: true });
            return events;
        }

        let mut drawn = Vec::new();
        let mut attempts = 0u32;
        let total_known = self.source.total_count() as u32;
        while drawn.len() < TAKE_COUNT {
            let Some(hash) = self.source.take_track() else {
                break;
            };
            attempts += 1;
            let hash_id = registry.register(hash.clone());
            let stats = history.user_stats(hash_id, criteria.user_generating_for);
            let candidate = Candidate::new(self.source.clone(), hash_id, hash, None, 500);
            let scored = ScoredCandidate::new(candidate, stats);
            let basic_filter = Self::basic_filter_fn(self.path_cache.clone());
            if basic_filter(&scored) {
                drawn.push(scored);
                self.consecutive_draw_failures = 0;
            } else {
                self.consecutive_draw_failures += 1;
                scored.candidate.into_unused();
            }
            if attempts > total_known.max(1) * 2 {
                break; // avoid spinning forever on a small reservoir
            }
        }

        if total_known > TAKE_COUNT as u32
            && self.consecutive_draw_failures > total_known - TAKE_COUNT as u32
        {
            let leftovers = self.pipeline.drain_all();
            for scored in leftovers {
                scored.candidate.into_used();
            }
            self.state = WaveState::Inactive;
            events.push(WaveEvent::Ended { completed: false });
            return events;
        }

        if drawn.len() == TAKE_COUNT {
            let basic_filter = Self::basic_filter_fn(self.path_cache.clone());
            let rejected = self
                .pipeline
                .filter_and_keep_top(drawn, KEEP_COUNT, basic_filter, default_selection_compare);
            for scored in rejected {
                scored.candidate.into_unused();
            }
        } else {
            for scored in drawn {
                scored.candidate.into_unused();
            }
        }

        let total_estimate = if self.pipeline.len() >= GENERATION_GOAL {
            Some(self.delivered + self.pipeline.len() as u32)
        } else {
            None
        };
        events.push(WaveEvent::Progress(WaveProgress {
            delivered: self.delivered,
            total: total_estimate,
        }));

        if self.pipeline.len() >= GENERATION_GOAL {
            self.state = WaveState::ActiveComplete;
        }
        events
    }

    /// Identical delivery semantics to the dynamic generator, except the
    /// wave terminates cleanly once the upcoming list empties after
    /// completion.
    pub fn get_tracks(
        &mut self,
        n: usize,
        queue: &Queue,
        history: &dyn HistoryStore,
        criteria: &Criteria,
        now_playing_hash: Option<FileHash>,
        now_ms: i64,
    ) -> (Vec<FileHash>, Vec<WaveEvent>) {
        let mut delivered = Vec::new();
        let mut events = Vec::new();
        while delivered.len() < n {
            let Some(scored) = self.pipeline.pop_front() else {
                break;
            };
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
            self.delivered += 1;
        }

        if !delivered.is_empty() {
            events.push(WaveEvent::Progress(WaveProgress {
                delivered: self.delivered,
                total: if self.state == WaveState::ActiveComplete {
                    Some(self.delivered + self.pipeline.len() as u32)
                } else {
                    None
                },
            }));
        }

        if self.state == WaveState::ActiveComplete && self.pipeline.is_empty() {
            self.state = WaveState::Inactive;
            events.push(WaveEvent::Ended { completed: true });
        }
        (delivered, events)
    }

    /// Cancels at any point: clears buffers, returns their hashes to the
    /// source as *used*, emits `waveEnded(false)`. Idempotent.
    pub fn terminate_wave(&mut self) -> Option<WaveEvent> {
        if self.state == WaveState::Inactive {
            return None;
        }
        let leftovers = self.pipeline.drain_all();
        for scored in leftovers {
            scored.candidate.into_used();
        }
        self.state = WaveState::Inactive;
        Some(WaveEvent::Ended { completed: false })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashId;
    use crate::history_store::{InMemoryHistoryStore, UserStats};

    fn sample_hash(seed: u8) -> FileHash {
        FileHash {
            byte_length: 1000 + seed as u64,
            sha1: [seed; 20],
            md5: [seed; 16],
        }
    }

    fn setup(total: u8, high_score_count: u8) -> (WaveGenerator, HashIdRegistry, InMemoryHistoryStore) {
        let source = RandomTracksSource::with_seed(9);
        let path_cache = Arc::new(PathCache::new());
        let mut registry = HashIdRegistry::new();
        let mut history = InMemoryHistoryStore::new();
        for seed in 0..total {
            let hash = sample_hash(seed);
            source.hash_became_available(hash.clone());
            let id = registry.register(hash);
            path_cache.insert(id, std::path::PathBuf::from(format!("/music/{seed}.mp3")));
            let score = if seed < high_score_count { 900 } else { 100 };
            history.set_user_stats(
                id,
                1,
                UserStats {
                    last_heard: None,
                    score: Some(score),
                },
            );
        }
        (WaveGenerator::new(source, path_cache), registry, history)
    }

    #[test]
    fn start_wave_requires_personal_mode() {
        let (mut wave, _registry, _history) = setup(5, 5);
        let public_criteria = Criteria::public_mode(-1);
        assert!(wave.start_wave(&public_criteria).is_none());
        assert_eq!(wave.state(), WaveState::Inactive);
    }

    #[test]
    fn wave_completes_with_exactly_ten_qualifying_tracks_scenario_s5() {
        let (mut wave, mut registry, history) = setup(50, 10);
        let criteria = Criteria {
            no_repetition_seconds: -1,
            user_generating_for: 7,
        };
        let started = wave.start_wave(&criteria);
        assert_eq!(started, Some(WaveEvent::Started));

        for _ in 0..20 {
            if wave.state() != WaveState::ActiveGenerating {
                break;
            }
            wave.refill_tick(&mut registry, &history, &criteria);
        }
        assert!(matches!(wave.state(), WaveState::ActiveComplete | WaveState::Inactive));

        let queue = Queue::new();
        let mut total_delivered = Vec::new();
        loop {
            let (delivered, events) = wave.get_tracks(5, &queue, &history, &criteria, None, 0);
            if delivered.is_empty() && events.iter().any(|e| matches!(e, WaveEvent::Ended { .. })) {
                break;
            }
            if delivered.is_empty() {
                break;
            }
            total_delivered.extend(delivered);
        }
        assert_eq!(total_delivered.len(), 10);
        assert_eq!(wave.state(), WaveState::Inactive);
    }

    #[test]
    fn terminate_wave_is_idempotent() {
        let (mut wave, _registry, _history) = setup(5, 5);
        let criteria = Criteria {
            no_repetition_seconds: -1,
            user_generating_for: 1,
        };
        wave.start_wave(&criteria);
        assert!(wave.terminate_wave().is_some());
        assert!(wave.terminate_wave().is_none());
    }

    #[test]
    fn progress_delivered_is_monotonic_non_decreasing() {
        let (mut wave, mut registry, history) = setup(40, 15);
        let criteria = Criteria {
            no_repetition_seconds: -1,
            user_generating_for: 2,
        };
        wave.start_wave(&criteria);
        for _ in 0..10 {
            wave.refill_tick(&mut registry, &history, &criteria);
        }
        let queue = Queue::new();
        let mut last_delivered = 0u32;
        for _ in 0..5 {
            let (_delivered, events) = wave.get_tracks(2, &queue, &history, &criteria, None, 0);
            for event in events {
                if let WaveEvent::Progress(progress) = event {
                    assert!(progress.delivered >= last_delivered);
                    last_delivered = progress.delivered;
                }
            }
        }
        let _ = HashId(0);
    }
}
