//! Time-control arithmetic shared by the server and clients.
//!
//! The server charges elapsed time to the mover when a move is accepted;
//! clients run the same arithmetic (without the increment) to tick the
//! displayed clock between updates.

use chrono::{DateTime, Utc};
use derive_getters::Getters;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::role::Role;

/// Upper bound on time charged for a single move (12 hours).
pub const MAX_ELAPSED_MS: i64 = 12 * 60 * 60 * 1000;

/// Remaining time per role, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockPair {
    /// Time left for the match creator.
    pub creator_ms: i64,
    /// Time left for the opponent.
    pub opponent_ms: i64,
}

impl ClockPair {
    /// Both roles start with `ms`.
    pub fn even(ms: i64) -> Self {
        Self {
            creator_ms: ms,
            opponent_ms: ms,
        }
    }

    /// Remaining time for `role`.
    pub fn remaining(&self, role: Role) -> i64 {
        match role {
            Role::Creator => self.creator_ms,
            Role::Opponent => self.opponent_ms,
        }
    }

    fn with(mut self, role: Role, ms: i64) -> Self {
        match role {
            Role::Creator => self.creator_ms = ms,
            Role::Opponent => self.opponent_ms = ms,
        }
        self
    }
}

/// Time control of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Getters)]
#[serde(rename_all = "camelCase")]
pub struct ClockSettings {
    initial_seconds: u32,
    increment_seconds: u32,
}

impl ClockSettings {
    /// Creates a time control.
    pub fn new(initial_seconds: u32, increment_seconds: u32) -> Self {
        Self {
            initial_seconds,
            increment_seconds,
        }
    }

    /// Untimed matches have no initial allotment.
    pub fn is_timed(&self) -> bool {
        self.initial_seconds > 0
    }

    /// Starting pair for both roles.
    pub fn initial_pair(&self) -> ClockPair {
        ClockPair::even(i64::from(self.initial_seconds) * 1000)
    }

    /// Increment in milliseconds.
    pub fn increment_ms(&self) -> i64 {
        i64::from(self.increment_seconds) * 1000
    }
}

/// Milliseconds between `since` and `now`, clamped to `[0, MAX_ELAPSED_MS]`.
pub fn elapsed_ms(since: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - since).num_milliseconds().clamp(0, MAX_ELAPSED_MS)
}

/// Later of the previous move time and the clock reset time.
pub fn reference_time(
    previous_move_at: Option<DateTime<Utc>>,
    clock_updated_at: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match (previous_move_at, clock_updated_at) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

/// Charges `elapsed_ms` to `mover` and credits the increment.
///
/// The mover's remaining time is floored at zero before the increment is
/// added; the other role is untouched.
#[instrument(level = "debug")]
pub fn charge_move(
    settings: ClockSettings,
    previous: Option<ClockPair>,
    mover: Role,
    elapsed_ms: i64,
) -> ClockPair {
    let pair = previous.unwrap_or_else(|| settings.initial_pair());
    let elapsed = elapsed_ms.clamp(0, MAX_ELAPSED_MS);
    let left = (pair.remaining(mover) - elapsed).max(0) + settings.increment_ms();
    pair.with(mover, left)
}

/// Display-only countdown for the role on move.
pub fn tick(pair: ClockPair, running: Role, elapsed_ms: i64) -> ClockPair {
    let elapsed = elapsed_ms.clamp(0, MAX_ELAPSED_MS);
    let left = (pair.remaining(running) - elapsed).max(0);
    pair.with(running, left)
}
