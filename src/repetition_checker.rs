//! Decides whether adding a hash to the queue would violate the
//! non-repetition window, per spec §4.2.
//!
//! The canonical unit at the public boundary (`Criteria.no_repetition_seconds`)
//! is seconds; internally the checker works in milliseconds.

use crate::hash::{FileHash, HashId};
use crate::history_store::HistoryStore;
use crate::queue::queue::Queue;

/// `(noRepetitionSeconds, userGeneratingFor)`. `no_repetition_seconds < 0`
/// disables the check; `user_generating_for == 0` means public mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Criteria {
    pub no_repetition_seconds: i64,
    pub user_generating_for: u32,
}

impl Criteria {
    pub fn public_mode(no_repetition_seconds: i64) -> Self {
        Self {
            no_repetition_seconds,
            user_generating_for: 0,
        }
    }

    pub fn is_public_mode(&self) -> bool {
        self.user_generating_for == 0
    }
}

pub struct RepetitionChecker<'a> {
    queue: &'a Queue,
    history: &'a dyn HistoryStore,
    now_playing_hash: Option<FileHash>,
    now_ms: i64,
}

impl<'a> RepetitionChecker<'a> {
    pub fn new(
        queue: &'a Queue,
        history: &'a dyn HistoryStore,
        now_playing_hash: Option<FileHash>,
        now_ms: i64,
    ) -> Self {
        Self {
            queue,
            history,
            now_playing_hash,
            now_ms,
        }
    }

    /// Returns `(isRepetition, msCounted)` for adding `hash` under `criteria`,
    /// with `extra_margin_ms` accounting for tentatively-queued-but-not-yet-
    /// committed tracks.
    pub fn check_potential_repetition_by_add(
        &self,
        hash_id: HashId,
        hash: &FileHash,
        criteria: &Criteria,
        extra_margin_ms: i64,
    ) -> (bool, i64) {
        let window_ms = criteria.no_repetition_seconds.saturating_mul(1000);
        if window_ms < 0 {
            return (false, 0);
        }

        let (found, ms_counted) = self.queue.scan_backward(hash, window_ms, extra_margin_ms);
        if found {
            return (true, ms_counted);
        }
        if ms_counted >= window_ms {
            return (false, ms_counted);
        }
        if self.now_playing_hash.as_ref() == Some(hash) {
            return (true, ms_counted);
        }

        let max_last_play = self.now_ms + ms_counted - window_ms;
        if let Some(last_global) = self.history.last_played_globally(hash) {
            if last_global > max_last_play {
                return (true, ms_counted);
            }
        }

        match self
            .history
            .user_stats(hash_id, criteria.user_generating_for)
        {
            None => (true, ms_counted), // stats not yet loaded: refuse to be safe
            Some(stats) => match stats.last_heard {
                Some(last_heard) if last_heard > max_last_play => (true, ms_counted),
                _ => (false, ms_counted),
            },
        }
    }

    /// Convenience wrapper matching spec naming: is this an immediate
    /// repetition, ignoring the millisecond counter.
    pub fn is_repetition_when_queued(
        &self,
        hash_id: HashId,
        hash: &FileHash,
        criteria: &Criteria,
        extra_margin_ms: i64,
    ) -> bool {
        self.check_potential_repetition_by_add(hash_id, hash, criteria, extra_margin_ms)
            .0
    }
}
