//! Stored match data.

use chrono::{DateTime, Utc};
use derive_getters::Getters;
use santorini_engine::{ClockSettings, MatchId, MatchStatus, Role, UserId};
use serde::{Deserialize, Serialize};

/// Reserved user id of the automated opponent.
pub const AUTOMATED_OPPONENT_ID: &str = "automated-opponent";

/// One match row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Getters)]
pub struct MatchRecord {
    id: MatchId,
    creator_id: UserId,
    opponent_id: Option<UserId>,
    status: MatchStatus,
    clock: ClockSettings,
    clock_updated_at: Option<DateTime<Utc>>,
    /// Serialized initial snapshot, decoded lazily so a corrupt row
    /// surfaces as a server error on use.
    initial_state: String,
    winner_id: Option<UserId>,
    player_zero_role: Role,
    ai_depth: Option<u8>,
    automated_opponent: bool,
    created_at: DateTime<Utc>,
}

/// Fields needed to open a new match.
#[derive(Debug, Clone)]
pub struct NewMatch {
    /// Match id.
    pub id: MatchId,
    /// Creating user.
    pub creator_id: UserId,
    /// Time control.
    pub clock: ClockSettings,
    /// Serialized initial snapshot.
    pub initial_state: String,
    /// Role owning engine player 0.
    pub player_zero_role: Role,
    /// Search depth hint.
    pub ai_depth: Option<u8>,
    /// Whether the opponent seat is automated.
    pub automated_opponent: bool,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
}

impl MatchRecord {
    /// Builds the initial row for `new`.
    ///
    /// Automated matches start with the opponent seat filled and the clock
    /// running; others wait for a join.
    pub fn open(new: NewMatch) -> Self {
        let (opponent_id, status, clock_updated_at) = if new.automated_opponent {
            (
                Some(UserId::new(AUTOMATED_OPPONENT_ID)),
                MatchStatus::InProgress,
                Some(new.created_at),
            )
        } else {
            (None, MatchStatus::Waiting, None)
        };
        Self {
            id: new.id,
            creator_id: new.creator_id,
            opponent_id,
            status,
            clock: new.clock,
            clock_updated_at,
            initial_state: new.initial_state,
            winner_id: None,
            player_zero_role: new.player_zero_role,
            ai_depth: new.ai_depth,
            automated_opponent: new.automated_opponent,
            created_at: new.created_at,
        }
    }

    /// Rebuilds a row from its stored columns.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        id: MatchId,
        creator_id: UserId,
        opponent_id: Option<UserId>,
        status: MatchStatus,
        clock: ClockSettings,
        clock_updated_at: Option<DateTime<Utc>>,
        initial_state: String,
        winner_id: Option<UserId>,
        player_zero_role: Role,
        ai_depth: Option<u8>,
        automated_opponent: bool,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            creator_id,
            opponent_id,
            status,
            clock,
            clock_updated_at,
            initial_state,
            winner_id,
            player_zero_role,
            ai_depth,
            automated_opponent,
            created_at,
        }
    }

    /// Role of `user` in this match, if a participant.
    pub fn role_of(&self, user: &UserId) -> Option<Role> {
        if *user == self.creator_id {
            Some(Role::Creator)
        } else if self.opponent_id.as_ref() == Some(user) {
            Some(Role::Opponent)
        } else {
            None
        }
    }

    /// User holding `role`, if seated.
    pub fn user_for(&self, role: Role) -> Option<&UserId> {
        match role {
            Role::Creator => Some(&self.creator_id),
            Role::Opponent => self.opponent_id.as_ref(),
        }
    }

    /// Seats `user` as the opponent and starts the clock.
    pub fn seat_opponent(&mut self, user: UserId, now: DateTime<Utc>) {
        self.opponent_id = Some(user);
        self.status = MatchStatus::InProgress;
        self.clock_updated_at = Some(now);
    }

    /// Marks the match completed by `winner`.
    pub fn complete(&mut self, winner: Option<UserId>) {
        self.status = MatchStatus::Completed;
        self.winner_id = winner;
    }

    /// Reopens a match after an undo and restarts its clock at `now`.
    pub fn reopen(&mut self, now: DateTime<Utc>) {
        self.status = MatchStatus::InProgress;
        self.winner_id = None;
        self.clock_updated_at = Some(now);
    }
}
