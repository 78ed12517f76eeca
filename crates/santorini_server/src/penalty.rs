//! Sliding-window strike counter for illegal move attempts.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use derive_getters::Getters;
use lru::LruCache;
use santorini_engine::UserId;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::time::Clock;

/// Penalty thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Getters)]
#[serde(default)]
pub struct PenaltySettings {
    /// Strikes within the window that trigger a block.
    threshold: usize,
    /// Sliding window length in milliseconds.
    window_ms: i64,
    /// Block length in milliseconds.
    cooldown_ms: i64,
    /// Users tracked at once; the least recently struck is forgotten first.
    capacity: usize,
}

impl PenaltySettings {
    /// Creates settings tracking up to 10 000 users.
    pub fn new(threshold: usize, window_ms: i64, cooldown_ms: i64) -> Self {
        Self {
            threshold,
            window_ms,
            cooldown_ms,
            capacity: 10_000,
        }
    }

    /// Overrides the number of tracked users.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

impl Default for PenaltySettings {
    fn default() -> Self {
        Self::new(6, 10_000, 5_000)
    }
}

/// Result of recording a strike.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrikeOutcome {
    /// Strike counted; `strikes` are now within the window.
    Counted {
        /// Strikes currently in the window.
        strikes: usize,
    },
    /// Threshold reached; the user is blocked until the given instant.
    Blocked {
        /// End of the block.
        until: DateTime<Utc>,
    },
}

#[derive(Debug, Default)]
struct PenaltyEntry {
    strikes: VecDeque<DateTime<Utc>>,
    blocked_until: Option<DateTime<Utc>>,
}

impl PenaltyEntry {
    fn forget_before(&mut self, window_start: DateTime<Utc>, now: DateTime<Utc>) {
        while self.strikes.front().is_some_and(|t| *t <= window_start) {
            self.strikes.pop_front();
        }
        if self.blocked_until.is_some_and(|until| until <= now) {
            self.blocked_until = None;
        }
    }

    fn is_spent(&self) -> bool {
        self.strikes.is_empty() && self.blocked_until.is_none()
    }
}

/// Per-user illegal-move tracker.
#[derive(Debug)]
pub struct PenaltyTracker {
    settings: PenaltySettings,
    clock: Arc<dyn Clock>,
    entries: Mutex<LruCache<UserId, PenaltyEntry>>,
}

impl PenaltyTracker {
    /// Creates a tracker.
    pub fn new(settings: PenaltySettings, clock: Arc<dyn Clock>) -> Self {
        let capacity = NonZeroUsize::new(settings.capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            settings,
            clock,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - TimeDelta::milliseconds(self.settings.window_ms)
    }

    /// Returns the end of an active block, if any.
    ///
    /// An entry whose strikes have left the window and whose block has run
    /// out is dropped here.
    #[instrument(level = "debug", skip(self), fields(user_id = %user))]
    pub fn blocked_until(&self, user: &UserId) -> Option<DateTime<Utc>> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.peek_mut(user)?;
        entry.forget_before(self.window_start(now), now);
        let until = entry.blocked_until;
        if entry.is_spent() {
            entries.pop(user);
            debug!("Penalty entry expired");
        }
        until
    }

    /// Records one invalid attempt.
    #[instrument(skip(self), fields(user_id = %user))]
    pub fn record_strike(&self, user: &UserId) -> StrikeOutcome {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.get_or_insert_mut(user.clone(), PenaltyEntry::default);
        entry.forget_before(self.window_start(now), now);
        entry.strikes.push_back(now);

        if entry.strikes.len() >= self.settings.threshold {
            let until = now + TimeDelta::milliseconds(self.settings.cooldown_ms);
            entry.strikes.clear();
            entry.blocked_until = Some(until);
            warn!(%until, "Illegal move threshold reached, blocking user");
            StrikeOutcome::Blocked { until }
        } else {
            info!(strikes = entry.strikes.len(), "Illegal move strike recorded");
            StrikeOutcome::Counted {
                strikes: entry.strikes.len(),
            }
        }
    }

    /// Forgets every strike for `user` (an active block is kept).
    pub fn clear(&self, user: &UserId) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.peek_mut(user) {
            entry.strikes.clear();
            if entry.blocked_until.is_none() {
                entries.pop(user);
            }
        }
    }

    /// Strikes currently counted for `user`.
    pub fn strikes(&self, user: &UserId) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .peek(user)
            .map_or(0, |e| e.strikes.len())
    }

    /// Users with an entry, including any not yet swept.
    pub fn tracked(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;

    fn tracker() -> (Arc<ManualClock>, PenaltyTracker) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let tracker = PenaltyTracker::new(PenaltySettings::default(), clock.clone());
        (clock, tracker)
    }

    #[test]
    fn test_sixth_strike_blocks_for_cooldown() {
        let (clock, tracker) = tracker();
        let user = UserId::new("u");
        for n in 1..=5 {
            assert_eq!(tracker.record_strike(&user), StrikeOutcome::Counted { strikes: n });
            clock.advance(TimeDelta::milliseconds(500));
        }
        assert!(matches!(tracker.record_strike(&user), StrikeOutcome::Blocked { .. }));
        assert_eq!(tracker.strikes(&user), 0);

        clock.advance(TimeDelta::seconds(3));
        assert!(tracker.blocked_until(&user).is_some());
        clock.advance(TimeDelta::seconds(2));
        assert!(tracker.blocked_until(&user).is_none());
    }

    #[test]
    fn test_old_strikes_leave_the_window() {
        let (clock, tracker) = tracker();
        let user = UserId::new("u");
        for _ in 0..5 {
            tracker.record_strike(&user);
        }
        clock.advance(TimeDelta::seconds(11));
        assert_eq!(tracker.record_strike(&user), StrikeOutcome::Counted { strikes: 1 });
    }

    #[test]
    fn test_clear_resets_strikes() {
        let (_clock, tracker) = tracker();
        let user = UserId::new("u");
        tracker.record_strike(&user);
        tracker.record_strike(&user);
        tracker.clear(&user);
        assert_eq!(tracker.strikes(&user), 0);
        assert!(tracker.blocked_until(&user).is_none());
    }

    #[test]
    fn test_lapsed_entries_are_forgotten() {
        let (clock, tracker) = tracker();
        let idle = UserId::new("idle");
        let blocked = UserId::new("blocked");
        tracker.record_strike(&idle);
        for _ in 0..6 {
            tracker.record_strike(&blocked);
        }
        assert_eq!(tracker.tracked(), 2);

        clock.advance(TimeDelta::seconds(11));
        assert!(tracker.blocked_until(&idle).is_none());
        assert!(tracker.blocked_until(&blocked).is_none());
        assert_eq!(tracker.tracked(), 0);
    }

    #[test]
    fn test_table_is_bounded() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let tracker = PenaltyTracker::new(PenaltySettings::default().with_capacity(2), clock);
        for name in ["a", "b", "c"] {
            tracker.record_strike(&UserId::new(name));
        }
        assert_eq!(tracker.tracked(), 2);
        assert_eq!(tracker.strikes(&UserId::new("a")), 0);
        assert_eq!(tracker.strikes(&UserId::new("c")), 1);
    }
}
