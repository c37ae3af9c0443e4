//! `ServerInterface`: the single facade the network layer talks to.
//!
//! Queue, Player, and Generator reference each other conceptually (the
//! player dequeues from the queue, the generator refills it, both react to
//! queue events) but spec §9 resolves the cycle by making this facade the
//! mediator: it holds all three as siblings behind one lock and brokers
//! every cross-component call itself, instead of having them hold pointers
//! to each other.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use log::info;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::{PmpError, PmpResult};
use crate::generator::Generator;
use crate::hash::{FileHash, HashIdRegistry};
use crate::history_store::HistoryStore;
use crate::player::{DelayedStart, Player, PlayerEvent, PlayerState};
use crate::preloader::Preloader;
use crate::queue::{Queue, QueueEvent, QueueId, QueueItem};
use crate::random_tracks_source::RandomTracksSource;
use crate::resolver::{self, PathCache};

/// Unified notification fan-out for the network layer; wraps the
/// per-component event types behind one subscription.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    Queue(QueueEvent),
    Player(PlayerEvent),
    VolumeChanged(u8),
    ModeChanged { public: bool },
    DynamicModeChanged { enabled: bool, no_repetition_seconds: i64 },
}

struct State {
    queue: Queue,
    player: Player,
    generator: Generator,
    delayed_start: DelayedStart,
    registry: HashIdRegistry,
}

/// Aggregate server health, surfaced for the wire `get-indexation`/status
/// surface and ops visibility (SPEC_FULL §E.6, grounded in the original's
/// `serverhealthstatus.h`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerHealthStatus {
    pub database_connected: bool,
    pub scan_directories_configured: bool,
}

pub struct ServerInterface {
    state: std::sync::Mutex<State>,
    history: Arc<dyn HistoryStore>,
    path_cache: Arc<PathCache>,
    preloader: Arc<Preloader>,
    events: broadcast::Sender<ServerEvent>,
    uuid: Uuid,
    scan_roots: Vec<PathBuf>,
}

impl ServerInterface {
    pub fn new(
        history: Arc<dyn HistoryStore>,
        default_volume: u8,
        preload_cache_dir: PathBuf,
        scan_roots: Vec<PathBuf>,
    ) -> Self {
        let path_cache = Arc::new(PathCache::new());
        let source = RandomTracksSource::new();
        let (events, _rx) = broadcast::channel(1024);
        let state = State {
            queue: Queue::new(),
            player: Player::new(default_volume),
            generator: Generator::new(source, path_cache.clone()),
            delayed_start: DelayedStart::new(),
            registry: HashIdRegistry::new(),
        };
        Self {
            state: std::sync::Mutex::new(state),
            history,
            path_cache,
            preloader: Arc::new(Preloader::new(preload_cache_dir)),
            events,
            uuid: Uuid::new_v4(),
            scan_roots,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ServerEvent) {
        let _ = self.events.send(event);
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Runs the library scan on the worker pool and seeds the random-tracks
    /// reservoir and path cache with what it finds (spec §6.3, SPEC_FULL §E.5
    /// "full indexation").
    pub async fn run_full_indexation(self: &Arc<Self>) {
        let this = self.clone();
        let roots = this.scan_roots.clone();
        let discovered = tokio::task::spawn_blocking(move || resolver::scan_library(&roots))
            .await
            .unwrap_or_default();

        let mut state = this.state.lock().unwrap();
        for analyzed in &discovered {
            let id = state.registry.register(analyzed.hash.clone());
            this.path_cache.insert(id, analyzed.path.clone());
            state.generator_source_seed(analyzed.hash.clone());
        }
        info!("server_interface: full indexation discovered {} files", discovered.len());
    }

    pub fn startup_cleanup(&self) {
        self.preloader.startup_cleanup();
    }

    // --- Player control -------------------------------------------------

    pub fn play(&self, now_ms: i64) {
        let mut state = self.state.lock().unwrap();
        let events = state.player.play(&mut state.queue, now_ms);
        drop(state);
        self.broadcast_player_events(events);
    }

    pub fn pause(&self) {
        let mut state = self.state.lock().unwrap();
        state.player.pause();
    }

    pub fn skip(&self, now_ms: i64) {
        let mut state = self.state.lock().unwrap();
        let events = state.player.skip(&mut state.queue, now_ms);
        drop(state);
        self.broadcast_player_events(events);
    }

    pub fn seek_to(&self, position_ms: i64) {
        let mut state = self.state.lock().unwrap();
        state.player.seek_to(position_ms, &state.queue);
    }

    pub fn update_position(&self, position_ms: i64) {
        let mut state = self.state.lock().unwrap();
        state.player.update_position(position_ms);
    }

    pub fn player_state(&self) -> PlayerState {
        self.state.lock().unwrap().player.state()
    }

    pub fn volume(&self) -> u8 {
        self.state.lock().unwrap().player.volume()
    }

    pub fn position_ms(&self) -> i64 {
        self.state.lock().unwrap().player.position_ms()
    }

    pub fn now_playing_queue_id(&self) -> Option<QueueId> {
        self.state.lock().unwrap().player.now_playing().map(|np| np.queue_id)
    }

    pub fn queue_len(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    /// Aggregate health snapshot (SPEC_FULL §E.6).
    pub fn health(&self) -> ServerHealthStatus {
        ServerHealthStatus {
            database_connected: !self.history.is_degraded(),
            scan_directories_configured: !self.scan_roots.is_empty(),
        }
    }

    pub fn set_volume(&self, percent: u8) {
        let mut state = self.state.lock().unwrap();
        state.player.set_volume(percent);
        drop(state);
        self.emit(ServerEvent::VolumeChanged(percent.min(100)));
    }

    fn broadcast_player_events(&self, events: Vec<PlayerEvent>) {
        for event in events {
            self.emit(ServerEvent::Player(event));
        }
    }

    // --- Queue control ----------------------------------------------------

    pub fn break_at_front(&self) -> PmpResult<QueueId> {
        let mut state = self.state.lock().unwrap();
        state.queue.insert_break_at_front()
    }

    pub fn queue_fetch(&self, offset: usize, length: usize) -> Vec<(QueueId, QueueItem)> {
        self.state.lock().unwrap().queue.entries(offset, length)
    }

    pub fn queue_remove(&self, id: QueueId) -> PmpResult<()> {
        self.state.lock().unwrap().queue.remove(id)
    }

    pub fn queue_move(&self, id: QueueId, delta: i64) -> PmpResult<()> {
        self.state.lock().unwrap().queue.move_by_id(id, delta)
    }

    pub fn queue_trim(&self, len: usize) {
        self.state.lock().unwrap().queue.trim(len);
    }

    pub fn track_info(&self, id: QueueId) -> Option<QueueItem> {
        self.state.lock().unwrap().queue.lookup(id).cloned()
    }

    // --- Generator / mode control ------------------------------------------

    pub fn dyn_enable(&self) {
        self.state.lock().unwrap().generator.enable();
    }

    pub fn dyn_disable(&self) {
        self.state.lock().unwrap().generator.disable();
    }

    pub fn dyn_status(&self) -> (bool, i64) {
        let state = self.state.lock().unwrap();
        (state.generator.is_enabled(), state.generator.criteria().no_repetition_seconds)
    }

    pub fn set_no_repetition_seconds(&self, seconds: i64) {
        let mut state = self.state.lock().unwrap();
        state.generator.set_no_repetition_seconds(seconds);
        drop(state);
        let (enabled, seconds) = self.dyn_status();
        self.emit(ServerEvent::DynamicModeChanged {
            enabled,
            no_repetition_seconds: seconds,
        });
    }

    pub fn set_public_mode(&self) {
        let mut state = self.state.lock().unwrap();
        state.generator.set_user_playing_for(0, Instant::now());
        drop(state);
        self.emit(ServerEvent::ModeChanged { public: true });
    }

    pub fn set_personal_mode(&self, user_id: u32) {
        let mut state = self.state.lock().unwrap();
        state.generator.set_user_playing_for(user_id, Instant::now());
        drop(state);
        self.emit(ServerEvent::ModeChanged { public: false });
    }

    pub fn is_public_mode(&self) -> bool {
        self.state.lock().unwrap().generator.criteria().is_public_mode()
    }

    // --- Periodic maintenance --------------------------------------------

    /// Drives the generator's refill timer, the delayed-start timer, and the
    /// preloader's expiration sweep. Intended to be called from a single
    /// control-loop tick (spec §4.9, §4.7, §4.8).
    pub fn tick(&self, now_ms: i64, now: Instant) {
        let mut state = self.state.lock().unwrap();
        let now_playing_hash = state.now_playing_hash();
        let _wave_events = state.generator.tick(
            &mut state.queue,
            &mut state.registry,
            self.history.as_ref(),
            now_playing_hash,
            now_ms,
            now,
        );

        if state.delayed_start.has_fired(now) {
            state.delayed_start.deactivate();
            let events = state.player.play(&mut state.queue, now_ms);
            drop(state);
            self.broadcast_player_events(events);
            return;
        }
        drop(state);

        let head_items: Vec<(QueueId, Option<PathBuf>)> = self
            .queue_fetch(0, crate::preloader::PRELOAD_RANGE)
            .into_iter()
            .map(|(id, item)| {
                let path = match item {
                    QueueItem::Track { cached_filename, .. } => cached_filename,
                    _ => None,
                };
                (id, path)
            })
            .collect();
        let still_wanted: Vec<QueueId> = head_items.iter().map(|(id, _)| *id).collect();
        for (id, path) in self.preloader.candidates(&head_items) {
            if self.preloader.begin_job(id) {
                let preloader = self.preloader.clone();
                tokio::spawn(async move {
                    let result = tokio::task::spawn_blocking(move || preloader.run_copy(id, &path)).await;
                    match result {
                        Ok(Ok(dest)) => preloader.complete_job(id, dest),
                        Ok(Err(err)) => preloader.fail_job(id, &err.to_string()),
                        Err(err) => preloader.fail_job(id, &err.to_string()),
                    }
                });
            }
        }
        self.preloader.expire_unwanted(&still_wanted, now);
    }

    pub fn activate_delayed_start(&self, delay_ms: i64, now: Instant) -> PmpResult<()> {
        self.state.lock().unwrap().delayed_start.activate(delay_ms, now)
    }

    pub fn deactivate_delayed_start(&self) {
        self.state.lock().unwrap().delayed_start.deactivate();
    }

    pub fn is_delayed_start_active(&self) -> bool {
        self.state.lock().unwrap().delayed_start.is_active()
    }

    // --- User / auth ------------------------------------------------------

    pub fn users(&self) -> PmpResult<Vec<crate::history_store::User>> {
        self.history.users()
    }

    pub fn check_password(&self, fixed_password: Option<&str>, supplied: &str) -> PmpResult<()> {
        match fixed_password {
            Some(expected) if expected == supplied => Ok(()),
            Some(_) => Err(PmpError::not_logged_in()),
            None => Ok(()),
        }
    }
}

impl State {
    fn now_playing_hash(&self) -> Option<FileHash> {
        self.player.now_playing().map(|np| np.hash.clone())
    }

    fn generator_source_seed(&mut self, hash: FileHash) {
        self.generator.seed_hash(hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history_store::InMemoryHistoryStore;

    fn sample_hash(seed: u8) -> FileHash {
        FileHash {
            byte_length: 1000 + seed as u64,
            sha1: [seed; 20],
            md5: [seed; 16],
        }
    }

    fn build() -> ServerInterface {
        let history: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::new());
        ServerInterface::new(history, 80, std::env::temp_dir().join("pmp_test_cache"), Vec::new())
    }

    #[test]
    fn health_reports_database_and_scan_directory_configuration() {
        let server = build();
        let health = server.health();
        assert!(health.database_connected);
        assert!(!health.scan_directories_configured);
    }

    #[test]
    fn volume_changes_are_observable_through_the_facade() {
        let server = build();
        assert_eq!(server.volume(), 80);
        server.set_volume(42);
        assert_eq!(server.volume(), 42);
    }

    #[test]
    fn break_at_front_then_queue_fetch_reflects_it() {
        let server = build();
        let id = server.break_at_front().unwrap();
        let entries = server.queue_fetch(0, 10);
        assert_eq!(entries[0].0, id);
        assert!(entries[0].1.is_break());
    }

    #[test]
    fn public_mode_is_the_default() {
        let server = build();
        assert!(server.is_public_mode());
        server.set_personal_mode(5);
        assert!(!server.is_public_mode());
        server.set_public_mode();
        assert!(server.is_public_mode());
    }

    #[test]
    fn dyn_status_reflects_enable_and_no_repetition_seconds() {
        let server = build();
        server.dyn_enable();
        server.set_no_repetition_seconds(3600);
        let (enabled, seconds) = server.dyn_status();
        assert!(enabled);
        assert_eq!(seconds, 3600);
    }

    #[test]
    fn delayed_start_rejects_a_second_activation_while_armed() {
        let server = build();
        let now = Instant::now();
        server.activate_delayed_start(5_000, now).unwrap();
        assert!(server.activate_delayed_start(1_000, now).is_err());
        server.deactivate_delayed_start();
        assert!(!server.is_delayed_start_active());
    }

    #[test]
    fn sample_hash_helper_stays_exercised() {
        let _ = sample_hash(1);
    }
}
