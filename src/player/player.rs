//! `Player`: owns the audio output, the current track, and the play
//! position (spec §4.6). The actual audio decode/output device is out of
//! core scope (spec §1); this type tracks playback *state* and emits the
//! events a decoder/output adapter and history consumers act on.

use std::path::PathBuf;

use crate::hash::FileHash;
use crate::queue::item::{permillage_sentinel, QueueItem, RecentHistoryEntry};
use crate::queue::queue::Queue;
use crate::queue::QueueId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Stopped,
    Playing,
    Paused,
}

impl PlayerState {
    /// Wire encoding for `PlayerState` messages (spec §6.1).
    pub fn wire_code(self) -> u8 {
        match self {
            PlayerState::Stopped => 0,
            PlayerState::Playing => 1,
            PlayerState::Paused => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NowPlaying {
    pub queue_id: QueueId,
    pub hash: FileHash,
    pub length_ms: Option<i64>,
    pub filename: Option<PathBuf>,
    pub started_at_ms: i64,
}

#[derive(Debug, Clone)]
pub enum PlayerEvent {
    CurrentTrackChanged(Option<QueueId>),
    Finished,
    DonePlayingTrack(RecentHistoryEntry),
    FailedToPlayTrack(RecentHistoryEntry),
}

pub struct Player {
    state: PlayerState,
    now_playing: Option<NowPlaying>,
    max_pos_reached_ms: i64,
    seek_happened: bool,
    transitioning: bool,
    volume: u8,
}

impl Player {
    pub fn new(default_volume: u8) -> Self {
        Self {
            state: PlayerState::Stopped,
            now_playing: None,
            max_pos_reached_ms: 0,
            seek_happened: false,
            transitioning: false,
            volume: default_volume.min(100),
        }
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn now_playing(&self) -> Option<&NowPlaying> {
        self.now_playing.as_ref()
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    /// Last known playback position, for wire `PlayerState` pushes. Tracks
    /// `max_pos_reached_ms`, the same value `calc_permillage_played` uses.
    pub fn position_ms(&self) -> i64 {
        self.max_pos_reached_ms
    }

    pub fn set_volume(&mut self, percent: u8) {
        self.volume = percent.min(100);
    }

    pub fn play(&mut self, queue: &mut Queue, now_ms: i64) -> Vec<PlayerEvent> {
        match self.state {
            PlayerState::Stopped => self.start_next(true, queue, now_ms),
            PlayerState::Paused => {
                if let Some(now_playing) = &mut self.now_playing {
                    if now_playing.started_at_ms == 0 {
                        now_playing.started_at_ms = now_ms;
                    }
                }
                self.state = PlayerState::Playing;
                Vec::new()
            }
            PlayerState::Playing => Vec::new(),
        }
    }

    pub fn pause(&mut self) {
        if self.state == PlayerState::Playing {
            self.state = PlayerState::Paused;
        }
    }

    /// Finalises history for the current track (if any) and starts the
    /// next one, remaining `Playing`.
    pub fn skip(&mut self, queue: &mut Queue, now_ms: i64) -> Vec<PlayerEvent> {
        let mut events = self.finalise_current_track_history(now_ms, false);
        if queue.is_empty() {
            self.now_playing = None;
            self.state = PlayerState::Stopped;
            events.push(PlayerEvent::CurrentTrackChanged(None));
            events.push(PlayerEvent::Finished);
            return events;
        }
        events.extend(self.start_next(true, queue, now_ms));
        events
    }

    /// Only valid in `Playing`/`Paused`. Marks that a seek occurred, which
    /// excludes the position from counting toward the scoring permillage.
    pub fn seek_to(&mut self, position_ms: i64, queue: &Queue) {
        let _ = queue;
        if self.state == PlayerState::Stopped {
            return;
        }
        self.seek_happened = true;
        if position_ms > self.max_pos_reached_ms {
            self.max_pos_reached_ms = position_ms;
        }
    }

    /// Every position update refreshes `max_pos_reached`.
    pub fn update_position(&mut self, position_ms: i64) {
        if position_ms > self.max_pos_reached_ms {
            self.max_pos_reached_ms = position_ms;
        }
    }

    fn calc_permillage_played(&self) -> i32 {
        let Some(now_playing) = &self.now_playing else {
            return permillage_sentinel::NO_TRACK;
        };
        if self.seek_happened {
            return permillage_sentinel::SEEKED;
        }
        let Some(length_ms) = now_playing.length_ms.filter(|l| *l > 0) else {
            return permillage_sentinel::NO_LENGTH;
        };
        let ratio = (self.max_pos_reached_ms * 1000) / length_ms;
        ratio.clamp(0, 1000) as i32
    }

    fn finalise_current_track_history(&mut self, ended_at_ms: i64, had_error: bool) -> Vec<PlayerEvent> {
        let Some(now_playing) = self.now_playing.take() else {
            return Vec::new();
        };
        if self.transitioning {
            self.transitioning = false;
            return Vec::new();
        }
        let permillage_played = if had_error {
            0
        } else {
            self.calc_permillage_played()
        };
        let entry = RecentHistoryEntry {
            queue_id: now_playing.queue_id,
            user: None,
            started_at_ms: now_playing.started_at_ms,
            ended_at_ms,
            permillage_played,
            had_error,
        };
        self.max_pos_reached_ms = 0;
        self.seek_happened = false;
        if permillage_played <= 0 && had_error {
            vec![PlayerEvent::FailedToPlayTrack(entry)]
        } else {
            vec![PlayerEvent::DonePlayingTrack(entry)]
        }
    }

    /// Dequeues items until one of: a Track with a resolvable file, a Break
    /// (switches `play := false` and continues), a Barrier (stop without
    /// dequeuing it, enter Paused), or an empty queue.
    fn start_next(&mut self, mut play: bool, queue: &mut Queue, now_ms: i64) -> Vec<PlayerEvent> {
        let mut events = Vec::new();
        loop {
            let head = queue.entries(0, 1);
            let Some((head_id, head_item)) = head.into_iter().next() else {
                self.now_playing = None;
                self.state = PlayerState::Stopped;
                events.push(PlayerEvent::CurrentTrackChanged(None));
                events.push(PlayerEvent::Finished);
                return events;
            };

            match head_item {
                QueueItem::Barrier => {
                    // Do not dequeue the barrier; the generator must not be
                    // picked past it either.
                    self.now_playing = None;
                    self.state = PlayerState::Paused;
                    events.push(PlayerEvent::CurrentTrackChanged(None));
                    return events;
                }
                QueueItem::Break => {
                    let _ = queue.dequeue();
                    play = false;
                    continue;
                }
                QueueItem::Track {
                    hash,
                    cached_audio,
                    cached_filename,
                    ..
                } => {
                    if cached_filename.is_none() {
                        let _ = queue.dequeue();
                        let entry = RecentHistoryEntry {
                            queue_id: head_id,
                            user: None,
                            started_at_ms: now_ms,
                            ended_at_ms: now_ms,
                            permillage_played: 0,
                            had_error: true,
                        };
                        events.push(PlayerEvent::FailedToPlayTrack(entry.clone()));
                        queue.add_to_history(entry, QueueItem::Track {
                            hash,
                            cached_audio,
                            cached_filename,
                            cached_tags: None,
                            finder_backoff_ms: 0,
                            finder_fail_count: 0,
                        });
                        continue;
                    }
                    let _ = queue.dequeue();
                    self.max_pos_reached_ms = 0;
                    self.seek_happened = false;
                    self.now_playing = Some(NowPlaying {
                        queue_id: head_id,
                        hash,
                        length_ms: cached_audio.map(|a| a.track_length_ms).filter(|l| *l >= 0),
                        filename: cached_filename,
                        started_at_ms: if play { now_ms } else { 0 },
                    });
                    self.state = if play {
                        PlayerState::Playing
                    } else {
                        PlayerState::Paused
                    };
                    events.push(PlayerEvent::CurrentTrackChanged(Some(head_id)));
                    return events;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_data::{AudioData, AudioFormat};

    fn hash(seed: u8) -> FileHash {
        FileHash {
            byte_length: 1000 + seed as u64,
            sha1: [seed; 20],
            md5: [seed; 16],
        }
    }

    fn enqueue_playable_track(queue: &mut Queue, seed: u8, length_ms: i64) -> QueueId {
        let id = queue
            .enqueue_track_with_audio(hash(seed), Some(length_ms))
            .unwrap();
        // simulate the resolver having already found a path
        queue.apply_resolved_filename(id, PathBuf::from(format!("/music/{seed}.mp3")));
        id
    }

    #[test]
    fn scenario_s2_break_then_track_requires_two_plays() {
        let mut queue = Queue::new();
        queue.insert_break_at_front().unwrap();
        // insert tracks after the break, preserving order A then B
        let id_a = queue.enqueue(hash(1)).unwrap();
        queue.apply_resolved_filename(id_a, PathBuf::from("/music/a.mp3"));
        let id_b = queue.enqueue(hash(2)).unwrap();
        queue.apply_resolved_filename(id_b, PathBuf::from("/music/b.mp3"));

        let mut player = Player::new(80);
        assert_eq!(player.state(), PlayerState::Stopped);

        player.play(&mut queue, 0);
        assert_eq!(player.state(), PlayerState::Paused);
        assert_eq!(player.now_playing().unwrap().hash, hash(1));

        player.play(&mut queue, 10);
        assert_eq!(player.state(), PlayerState::Playing);
    }

    #[test]
    fn scenario_s3_move_out_of_range_leaves_queue_unchanged() {
        let mut queue = Queue::new();
        let id = enqueue_playable_track(&mut queue, 1, 200_000);
        let mut player = Player::new(50);
        player.play(&mut queue, 0);
        assert_eq!(player.state(), PlayerState::Playing);

        let result = queue.move_by_id(id, 3);
        assert!(result.is_err());
        assert_eq!(queue.len(), 0); // track was already dequeued into now_playing
    }

    #[test]
    fn unplayable_track_is_recorded_in_history_and_skipped() {
        let mut queue = Queue::new();
        let _unresolved_id = queue.enqueue(hash(9)).unwrap(); // no cached filename
        let playable_id = enqueue_playable_track(&mut queue, 2, 180_000);

        let mut player = Player::new(50);
        let events = player.play(&mut queue, 0);
        assert!(events
            .iter()
            .any(|e| matches!(e, PlayerEvent::FailedToPlayTrack(_))));
        assert_eq!(player.now_playing().unwrap().queue_id, playable_id);
    }

    #[test]
    fn barrier_at_front_pauses_without_dequeuing_it() {
        let mut queue = Queue::new();
        queue.insert_at_index(0, QueueItem::Barrier, |_| {}).unwrap();
        let mut player = Player::new(50);
        let events = player.play(&mut queue, 0);
        assert_eq!(player.state(), PlayerState::Paused);
        assert!(player.now_playing().is_none());
        assert_eq!(queue.len(), 1); // barrier still present
        assert!(events
            .iter()
            .any(|e| matches!(e, PlayerEvent::CurrentTrackChanged(None))));
    }

    #[test]
    fn finishing_the_queue_emits_finished_and_stops() {
        let mut queue = Queue::new();
        let _id = enqueue_playable_track(&mut queue, 3, 100_000);
        let mut player = Player::new(50);
        player.play(&mut queue, 0);
        player.update_position(100_000);
        let events = player.skip(&mut queue, 5_000);
        assert_eq!(player.state(), PlayerState::Stopped);
        assert!(events.iter().any(|e| matches!(e, PlayerEvent::Finished)));
    }

    #[test]
    fn seek_marks_permillage_as_seeked_sentinel() {
        let mut queue = Queue::new();
        let _id = enqueue_playable_track(&mut queue, 4, 200_000);
        let mut player = Player::new(50);
        player.play(&mut queue, 0);
        player.seek_to(50_000, &queue);
        let permillage = player.calc_permillage_played();
        assert_eq!(permillage, permillage_sentinel::SEEKED);
    }

    #[test]
    fn length_known_but_unused() {
        // sanity check the AudioFormat import stays exercised
        let data = AudioData {
            format: AudioFormat::Mp3,
            track_length_ms: 1000,
        };
        assert!(data.length_known());
    }
}
