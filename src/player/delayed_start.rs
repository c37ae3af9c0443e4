//! `DelayedStart`: a single-armed timer that starts playback after a delay
//! (spec §4.7).

use std::time::{Duration, Instant};

use crate::error::{PmpError, PmpResult};

pub struct DelayedStart {
    deadline: Option<Instant>,
}

impl DelayedStart {
    pub fn new() -> Self {
        Self { deadline: None }
    }

    pub fn is_active(&self) -> bool {
        self.deadline.is_some()
    }

    /// Arms a deadline `delay_ms` in the future. Fails with
    /// `DelayOutOfRange` if `delay_ms <= 0`, and with
    /// `OperationAlreadyRunning` if already armed.
    pub fn activate(&mut self, delay_ms: i64, now: Instant) -> PmpResult<()> {
        if self.is_active() {
            return Err(PmpError::operation_already_running("delayed start already armed"));
        }
        if delay_ms <= 0 {
            return Err(PmpError::delay_out_of_range());
        }
        self.deadline = Some(now + Duration::from_millis(delay_ms as u64));
        Ok(())
    }

    pub fn deactivate(&mut self) {
        self.deadline = None;
    }

    /// The interval until this timer should next check itself: `min(1h,
    /// remaining/2)` when remaining > 100ms, else `Duration::ZERO` (fire
    /// immediately).
    pub fn next_check_interval(&self, now: Instant) -> Option<Duration> {
        let deadline = self.deadline?;
        let remaining = deadline.saturating_duration_since(now);
        if remaining > Duration::from_millis(100) {
            Some((remaining / 2).min(Duration::from_secs(3600)))
        } else {
            Some(Duration::ZERO)
        }
    }

    /// Returns `true` if the deadline has passed. The caller must
    /// deactivate *before* invoking `player.play()`, to avoid re-entrant
    /// deactivation from the player's own `Playing` transition.
    pub fn has_fired(&self, now: Instant) -> bool {
        self.deadline.map(|deadline| now >= deadline).unwrap_or(false)
    }
}

impl Default for DelayedStart {
    fn default() -> Self {
        Self::new()
    }
}
