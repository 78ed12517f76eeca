//! Wire types exchanged between clients and the match server.

use chrono::{DateTime, Utc};
use derive_getters::Getters;
use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use strum::{EnumIter, EnumString};

use crate::clock::ClockPair;
use crate::codec::ActionIndex;
use crate::role::Role;
use crate::state::GameStateSnapshot;

/// Match identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, From)]
#[serde(transparent)]
pub struct MatchId(String);

impl MatchId {
    /// Wraps a raw id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Verified user identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, From)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wraps a raw id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Lifecycle status of a match.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    EnumString,
    strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MatchStatus {
    /// Created, waiting for an opponent.
    Waiting,
    /// Both sides present, moves accepted.
    InProgress,
    /// A winner was recorded.
    Completed,
    /// Given up before completion.
    Abandoned,
}

/// One action index or an ordered sequence submitted together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MovePayload {
    /// A single action.
    Single(ActionIndex),
    /// Several actions applied in order.
    Sequence(Vec<ActionIndex>),
}

impl MovePayload {
    /// Actions in application order.
    pub fn actions(&self) -> Vec<ActionIndex> {
        match self {
            Self::Single(a) => vec![*a],
            Self::Sequence(v) => v.clone(),
        }
    }

    /// True when the payload carries no actions.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Sequence(v) if v.is_empty())
    }
}

impl From<ActionIndex> for MovePayload {
    fn from(action: ActionIndex) -> Self {
        Self::Single(action)
    }
}

/// Discriminator of a stored move action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ActionKind {
    /// An ordinary move.
    #[default]
    #[serde(rename = "move")]
    Move,
}

/// Action persisted on a move record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Getters)]
pub struct MoveAction {
    kind: ActionKind,
    #[serde(rename = "move")]
    payload: MovePayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    by: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    clocks: Option<ClockPair>,
}

impl MoveAction {
    /// Creates a stored action.
    pub fn new(payload: MovePayload, by: Option<Role>, clocks: Option<ClockPair>) -> Self {
        Self {
            kind: ActionKind::Move,
            payload,
            by,
            clocks,
        }
    }
}

/// One persisted, accepted move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Getters)]
#[serde(rename_all = "camelCase")]
pub struct MoveRecord {
    match_id: MatchId,
    move_index: u32,
    acting_player_id: UserId,
    action: MoveAction,
    resulting_snapshot: GameStateSnapshot,
    created_at: DateTime<Utc>,
}

impl MoveRecord {
    /// Creates a record.
    pub fn new(
        match_id: MatchId,
        move_index: u32,
        acting_player_id: UserId,
        action: MoveAction,
        resulting_snapshot: GameStateSnapshot,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            match_id,
            move_index,
            acting_player_id,
            action,
            resulting_snapshot,
            created_at,
        }
    }

    /// True if every action in the record was played after placement.
    pub fn is_play_phase(&self) -> bool {
        // The snapshot before the record is the last history entry's board;
        // placement is over once four workers stood on it.
        let history = self.resulting_snapshot.history();
        let count = self.action.payload.actions().len();
        history.len() >= count
            && history[history.len() - count..]
                .iter()
                .all(|entry| entry.board().worker_count() == 4)
    }
}

/// Action submitted by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum SubmittedAction {
    /// Play one action or a sequence.
    #[serde(rename = "move")]
    Move {
        /// Payload.
        #[serde(rename = "move")]
        payload: MovePayload,
        /// Role the controller is acting for.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        by: Option<Role>,
        /// Client-side clock readout; the server recomputes its own.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        clocks: Option<ClockPair>,
    },
    /// Accept an undo request down to `move_index` (default: last move).
    #[serde(rename = "undo.accept")]
    UndoAccept {
        /// First move index to remove.
        #[serde(default, rename = "moveIndex", skip_serializing_if = "Option::is_none")]
        move_index: Option<u32>,
    },
    /// Decline an undo request.
    #[serde(rename = "undo.reject")]
    UndoReject {
        /// Ignored.
        #[serde(default, rename = "moveIndex", skip_serializing_if = "Option::is_none")]
        move_index: Option<u32>,
    },
}

impl SubmittedAction {
    /// Plain move of `payload`.
    pub fn play(payload: impl Into<MovePayload>) -> Self {
        Self::Move {
            payload: payload.into(),
            by: None,
            clocks: None,
        }
    }
}

/// Body of `POST /matches/{id}/moves`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitMoveRequest {
    /// Index the client expects this move to receive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub move_index: Option<u32>,
    /// What to do.
    pub action: SubmittedAction,
}

/// Accepted move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveAccepted {
    /// Persisted record.
    #[serde(rename = "move")]
    pub record: MoveRecord,
    /// Authoritative snapshot after the submission.
    pub snapshot: GameStateSnapshot,
    /// Reply produced by the automated opponent, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automated_reply: Option<MoveRecord>,
}

/// Accepted undo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoAccepted {
    /// Always true.
    pub undone: bool,
    /// First removed index.
    pub move_index: u32,
    /// Every removed index, ascending.
    pub removed_move_indexes: Vec<u32>,
    /// Snapshot the match was rewound to.
    pub snapshot: GameStateSnapshot,
}

/// Declined undo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoRejected {
    /// Always false.
    pub undone: bool,
    /// Always true.
    pub rejected: bool,
}

impl Default for UndoRejected {
    fn default() -> Self {
        Self {
            undone: false,
            rejected: true,
        }
    }
}

/// Successful response to a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubmissionOutcome {
    /// Move accepted.
    Moved(Box<MoveAccepted>),
    /// Undo applied.
    Undone(Box<UndoAccepted>),
    /// Undo declined.
    Rejected(UndoRejected),
}

/// Body of `POST /matches`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateMatchRequest {
    /// Initial time per side in seconds (0 = untimed).
    pub clock_initial_seconds: u32,
    /// Increment per move in seconds.
    pub clock_increment_seconds: u32,
    /// Role that moves as engine player 0.
    pub player_zero_role: Option<Role>,
    /// Play against the automated opponent.
    pub automated_opponent: bool,
    /// Search depth hint for the automated opponent.
    pub ai_depth: Option<u8>,
}

/// Public view of a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchState {
    /// Match id.
    pub match_id: MatchId,
    /// Lifecycle status.
    pub status: MatchStatus,
    /// Creator.
    pub creator_id: UserId,
    /// Opponent, once joined.
    pub opponent_id: Option<UserId>,
    /// Role owning engine player 0.
    pub player_zero_role: Role,
    /// Index of the latest move, if any.
    pub last_move_index: Option<u32>,
    /// Latest authoritative snapshot.
    pub snapshot: GameStateSnapshot,
    /// Remaining time after the latest move (timed matches).
    pub clocks: Option<ClockPair>,
    /// Reference instant the running clock counts from.
    pub clock_running_since: Option<DateTime<Utc>>,
    /// Winner, once completed.
    pub winner_id: Option<UserId>,
}

/// Machine-readable error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Missing or invalid credentials.
    Unauthorized,
    /// Malformed body.
    InvalidRequest,
    /// Caller is not part of the match.
    NotParticipant,
    /// It is the other side's turn.
    NotYourTurn,
    /// Match is not accepting moves.
    MatchNotActive,
    /// Declared index disagrees with the server.
    MoveOutOfSequence,
    /// Another submission won the race for this index.
    MoveConflict,
    /// Undo targets placement moves.
    UndoNotAllowed,
    /// Action rejected by the rules.
    InvalidMove,
    /// Too many invalid attempts.
    RateLimited,
    /// Unknown match or move.
    NotFound,
    /// Server-side failure.
    InternalError,
}

/// JSON error body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable message.
    pub error: String,
    /// Stable code.
    pub code: ErrorCode,
    /// Structured context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Details of a `MOVE_OUT_OF_SEQUENCE` error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceMismatch {
    /// Index the server will assign next.
    pub expected: u32,
    /// Index the client declared.
    pub received: u32,
}
