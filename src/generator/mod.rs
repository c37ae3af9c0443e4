//! `Generator`: the orchestration facade wiring `RandomTracksSource`,
//! `RepetitionChecker`, `TrackGenerator`, and `WaveGenerator` together
//! (spec §4.9).

pub mod dynamic;
pub mod pipeline;
pub mod wave;

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::hash::{FileHash, HashIdRegistry};
use crate::history_store::HistoryStore;
use crate::queue::queue::Queue;
use crate::random_tracks_source::RandomTracksSource;
use crate::repetition_checker::Criteria;
use crate::resolver::PathCache;

pub use dynamic::TrackGenerator;
pub use wave::{WaveEvent, WaveGenerator, WaveState};

pub const DESIRED_QUEUE_LENGTH: usize = 10;
pub const EXPANSION_BATCH: usize = 5;
pub const REFILL_COALESCE_WINDOW: Duration = Duration::from_millis(100);

pub struct Generator {
    source: RandomTracksSource,
    track_generator: TrackGenerator,
    wave_generator: WaveGenerator,
    criteria: Criteria,
    enabled: bool,
    pending_refill_since: Option<Instant>,
}

impl Generator {
    pub fn new(source: RandomTracksSource, path_cache: Arc<PathCache>) -> Self {
        Self {
            source: source.clone(),
            track_generator: TrackGenerator::new(source.clone(), path_cache.clone(), DESIRED_QUEUE_LENGTH),
            wave_generator: WaveGenerator::new(source, path_cache),
            criteria: Criteria::public_mode(-1),
            enabled: false,
            pending_refill_since: None,
        }
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn criteria(&self) -> Criteria {
        self.criteria
    }

    /// Registers a newly discovered hash with the shared reservoir (library
    /// scan feeding `RandomTracksSource`, spec §6.3).
    pub fn seed_hash(&mut self, hash: FileHash) {
        self.source.hash_became_available(hash);
    }

    pub fn set_no_repetition_seconds(&mut self, seconds: i64) {
        self.criteria.no_repetition_seconds = seconds;
        self.track_generator.criteria_changed();
    }

    /// Switching target user: terminates an active wave, updates criteria,
    /// resets upcoming notifications, and freezes the track generator for
    /// 250 ms so stats can load before generating (spec §4.9).
    pub fn set_user_playing_for(&mut self, user_id: u32, now: Instant) {
        if self.wave_generator.is_active() {
            self.wave_generator.terminate_wave();
        }
        self.criteria.user_generating_for = user_id;
        self.source.reset_notifications();
        self.track_generator.freeze_temporarily(now);
    }

    pub fn start_wave(&mut self) -> Option<WaveEvent> {
        self.wave_generator.start_wave(&self.criteria)
    }

    pub fn terminate_wave(&mut self) -> Option<WaveEvent> {
        self.wave_generator.terminate_wave()
    }

    pub fn is_wave_active(&self) -> bool {
        self.wave_generator.is_active()
    }

    /// Marks that the queue shrank and a refill should be attempted once the
    /// coalescing window elapses, per spec §4.9 ("a pending refill flag +
    /// 100 ms timer coalesces multiple entryRemoved events into one refill
    /// attempt").
    pub fn request_queue_expansion(&mut self, now: Instant) {
        if self.pending_refill_since.is_none() {
            self.pending_refill_since = Some(now);
        }
    }

    fn coalesce_window_elapsed(&self, now: Instant) -> bool {
        self.pending_refill_since
            .map(|since| now.duration_since(since) >= REFILL_COALESCE_WINDOW)
            .unwrap_or(false)
    }

    /// Runs one tick of whichever generator is active (wave takes priority
    /// over the dynamic generator), and, if the queue is below
    /// [`DESIRED_QUEUE_LENGTH`] and the coalescing window has elapsed,
    /// delivers up to [`EXPANSION_BATCH`] tracks into `queue`.
    pub fn tick(
        &mut self,
        queue: &mut Queue,
        registry: &mut HashIdRegistry,
        history: &dyn HistoryStore,
        now_playing_hash: Option<FileHash>,
        now_ms: i64,
        now: Instant,
    ) -> Vec<WaveEvent> {
        if !self.enabled {
            return Vec::new();
        }

        let mut events = Vec::new();
        if self.wave_generator.is_active() {
            events.extend(self.wave_generator.refill_tick(registry, history, &self.criteria));
        } else {
            self.track_generator.refill_tick(registry, history, &self.criteria, now);
        }

        if queue.len() >= DESIRED_QUEUE_LENGTH {
            self.pending_refill_since = None;
            return events;
        }
        if !self.coalesce_window_elapsed(now) {
            return events;
        }
        self.pending_refill_since = None;

        let to_fetch = EXPANSION_BATCH.min(DESIRED_QUEUE_LENGTH - queue.len());
        let delivered = if self.wave_generator.is_active() {
            let (hashes, wave_events) = self
                .wave_generator
                .get_tracks(to_fetch, queue, history, &self.criteria, now_playing_hash, now_ms);
            events.extend(wave_events);
            hashes
        } else {
            self.track_generator
                .get_tracks(to_fetch, queue, history, &self.criteria, now_playing_hash, now_ms)
        };
        for hash in delivered {
            let _ = queue.enqueue(hash);
        }
        events
    }
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

    #[test]
    fn disabled_generator_ticks_to_nothing() {
        let source = RandomTracksSource::with_seed(1);
        let path_cache = Arc::new(PathCache::new());
        let mut generator = Generator::new(source, path_cache);
        let mut queue = Queue::new();
        let mut registry = HashIdRegistry::new();
        let history = InMemoryHistoryStore::new();
        generator.tick(&mut queue, &mut registry, &history, None, 0, Instant::now());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn enabled_generator_fills_queue_toward_target() {
        let source = RandomTracksSource::with_seed(2);
        let path_cache = Arc::new(PathCache::new());
        let mut registry = HashIdRegistry::new();
        let mut history = InMemoryHistoryStore::new();
        for seed in 0..40u8 {
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

        let mut generator = Generator::new(source, path_cache);
        generator.enable();
        let mut queue = Queue::new();
        let now = Instant::now();
        generator.request_queue_expansion(now);

        // drive enough ticks, advancing the logical clock past the
        // coalescing window, for the refill + delivery pipeline to run.
        for i in 0..50u32 {
            let tick_time = now + Duration::from_millis(110) + Duration::from_millis(i as u64);
            generator.tick(&mut queue, &mut registry, &history, None, 0, tick_time);
            if queue.len() >= DESIRED_QUEUE_LENGTH {
                break;
            }
            generator.request_queue_expansion(tick_time);
        }
        assert!(queue.len() > 0);
    }

    #[test]
    fn set_user_playing_for_terminates_active_wave() {
        let source = RandomTracksSource::with_seed(3);
        let path_cache = Arc::new(PathCache::new());
        let mut generator = Generator::new(source, path_cache);
        generator.set_user_playing_for(5, Instant::now());
        generator.start_wave();
        assert!(generator.is_wave_active());
        generator.set_user_playing_for(6, Instant::now());
        assert!(!generator.is_wave_active());
    }
}
