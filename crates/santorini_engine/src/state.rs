//! Game state machine and undo/redo history.
//!
//! A [`GameStateSnapshot`] is a complete, immutable description of a game.
//! New snapshots are only ever derived by applying one action to a prior
//! snapshot; the prior board is kept in `history` so any step can be undone.

use derive_getters::Getters;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::board::{Board, Player, WINNING_HEIGHT, WorkerId, WorkerSlot};
use crate::codec::{Action, ActionIndex, decode, decode_placement};
use crate::movegen::{ActionMask, has_any_valid_move, next_placement, valid_moves};
use crate::role::{Role, role_for_player};

/// Current snapshot schema version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Errors produced by the state machine.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum EngineError {
    /// The action is not in the legality mask.
    #[display("Action {} is not legal for player {}", action, player.index())]
    InvalidMove {
        /// Rejected action.
        action: ActionIndex,
        /// Player to move when it was rejected.
        player: Player,
    },
    /// The game has already ended.
    #[display("Game is already over")]
    GameOver,
    /// History is empty.
    #[display("Nothing to undo")]
    NothingToUndo,
    /// Redo stack is empty.
    #[display("Nothing to redo")]
    NothingToRedo,
    /// Snapshot data is inconsistent or from an unknown schema.
    #[display("Corrupt snapshot: {}", _0)]
    CorruptSnapshot(String),
}

impl std::error::Error for EngineError {}

/// Game phase derived from the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "phase")]
pub enum Phase {
    /// Workers are still being placed.
    Placement {
        /// Workers already on the board (0..4).
        placed: u8,
    },
    /// Ordinary move-and-build play.
    Play,
    /// Someone has won.
    Terminal,
}

/// Per-match settings carried inside every snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Getters)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    player_zero_role: Role,
    ai_depth: Option<u8>,
}

impl SnapshotMetadata {
    /// Creates metadata for a match.
    pub fn new(player_zero_role: Role, ai_depth: Option<u8>) -> Self {
        Self {
            player_zero_role,
            ai_depth,
        }
    }
}

impl Default for SnapshotMetadata {
    fn default() -> Self {
        Self::new(Role::Creator, None)
    }
}

/// One applied transition: the state before `action` was played by `player`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Getters)]
pub struct HistoryEntry {
    player: Player,
    board: Board,
    action: ActionIndex,
}

/// Complete, immutable game state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Getters)]
#[serde(rename_all = "camelCase")]
pub struct GameStateSnapshot {
    version: u32,
    active_player: Player,
    board: Board,
    history: Vec<HistoryEntry>,
    future: Vec<HistoryEntry>,
    game_ended: [u8; 2],
    valid_moves: ActionMask,
    metadata: SnapshotMetadata,
}

impl GameStateSnapshot {
    /// Fresh game: empty board, player 0 to place.
    #[instrument]
    pub fn new(metadata: SnapshotMetadata) -> Self {
        Self::from_position(Board::new(), Player::Zero, metadata)
    }

    /// Snapshot of an arbitrary position with empty history.
    pub fn from_position(board: Board, active_player: Player, metadata: SnapshotMetadata) -> Self {
        let mut snapshot = Self {
            version: SNAPSHOT_VERSION,
            active_player,
            board,
            history: Vec::new(),
            future: Vec::new(),
            game_ended: [0, 0],
            valid_moves: ActionMask::empty(),
            metadata,
        };
        snapshot.game_ended = outcome(&snapshot.board, active_player);
        snapshot.refresh_mask();
        snapshot
    }

    /// Parses and validates a stored snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::CorruptSnapshot`] for malformed JSON, an
    /// unknown schema version or an inconsistent legality mask.
    #[instrument(skip(json))]
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let snapshot: Self = serde_json::from_str(json)
            .map_err(|e| EngineError::CorruptSnapshot(e.to_string()))?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Serializes the snapshot.
    pub fn to_json(&self) -> Result<String, EngineError> {
        serde_json::to_string(self).map_err(|e| EngineError::CorruptSnapshot(e.to_string()))
    }

    /// Checks version and that the mask matches the position.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.version != SNAPSHOT_VERSION {
            return Err(EngineError::CorruptSnapshot(format!(
                "unsupported snapshot version {}",
                self.version
            )));
        }
        if self.game_ended == [1, 1] || self.game_ended.iter().any(|s| *s > 1) {
            return Err(EngineError::CorruptSnapshot(format!(
                "invalid result {:?}",
                self.game_ended
            )));
        }
        let expected = if self.is_terminal() {
            ActionMask::empty()
        } else {
            valid_moves(&self.board, self.active_player)
        };
        if expected != self.valid_moves {
            return Err(EngineError::CorruptSnapshot(
                "legality mask does not match board".to_string(),
            ));
        }
        Ok(())
    }

    /// Phase of the game.
    pub fn phase(&self) -> Phase {
        if self.is_terminal() {
            return Phase::Terminal;
        }
        let placed = self.board.worker_count();
        if next_placement(&self.board).is_some() {
            Phase::Placement {
                placed: placed as u8,
            }
        } else {
            Phase::Play
        }
    }

    /// True once a winner is recorded.
    pub fn is_terminal(&self) -> bool {
        self.game_ended != [0, 0]
    }

    /// Winning player, if any.
    pub fn winner(&self) -> Option<Player> {
        match self.game_ended {
            [1, 0] => Some(Player::Zero),
            [0, 1] => Some(Player::One),
            _ => None,
        }
    }

    /// Role that owns the active player.
    pub fn active_role(&self) -> Role {
        role_for_player(self.metadata.player_zero_role, self.active_player)
    }

    /// Role of the winner, if any.
    pub fn winning_role(&self) -> Option<Role> {
        self.winner()
            .map(|p| role_for_player(self.metadata.player_zero_role, p))
    }

    /// Interprets `action` in the context of the current phase.
    pub fn interpret(&self, action: ActionIndex) -> Action {
        match decode_placement(action) {
            Ok(cell) if next_placement(&self.board).is_some() => Action::Place { cell },
            _ => Action::Play(decode(action)),
        }
    }

    /// Applies one legal action, producing the next snapshot and clearing redo.
    ///
    /// # Errors
    ///
    /// [`EngineError::GameOver`] after the game ended,
    /// [`EngineError::InvalidMove`] when the action is not in the mask.
    #[instrument(skip(self), fields(player = self.active_player.index()))]
    pub fn apply(&self, action: ActionIndex) -> Result<Self, EngineError> {
        let mut next = self.transition(action)?;
        next.future.clear();
        Ok(next)
    }

    /// Applies a batch in order, each validated against the previous result.
    ///
    /// The batch is all-or-nothing: on error `self` is the unchanged state.
    pub fn apply_sequence(&self, actions: &[ActionIndex]) -> Result<Self, EngineError> {
        let mut current = self.clone();
        for action in actions {
            current = current.apply(*action)?;
        }
        Ok(current)
    }

    /// Restores the state before the last action.
    #[instrument(skip(self))]
    pub fn undo(&self) -> Result<Self, EngineError> {
        let mut next = self.clone();
        let entry = next.history.pop().ok_or(EngineError::NothingToUndo)?;
        next.board = entry.board;
        next.active_player = entry.player;
        next.game_ended = outcome(&next.board, next.active_player);
        next.refresh_mask();
        next.future.push(entry);
        debug!(history = next.history.len(), future = next.future.len(), "Undo applied");
        Ok(next)
    }

    /// Re-applies the most recently undone action.
    #[instrument(skip(self))]
    pub fn redo(&self) -> Result<Self, EngineError> {
        let mut base = self.clone();
        let entry = base.future.pop().ok_or(EngineError::NothingToRedo)?;
        if entry.board != base.board || entry.player != base.active_player {
            return Err(EngineError::CorruptSnapshot(
                "redo entry does not start from the current position".to_string(),
            ));
        }
        let next = base.transition(entry.action)?;
        debug!(history = next.history.len(), future = next.future.len(), "Redo applied");
        Ok(next)
    }

    fn transition(&self, action: ActionIndex) -> Result<Self, EngineError> {
        if self.is_terminal() {
            return Err(EngineError::GameOver);
        }
        if !self.valid_moves.allows(action) {
            return Err(EngineError::InvalidMove {
                action,
                player: self.active_player,
            });
        }

        let mover = self.active_player;
        let mut board = self.board;
        let hand_over = match next_placement(&board) {
            Some((_, worker)) => {
                let cell = decode_placement(action)
                    .map_err(|e| EngineError::CorruptSnapshot(e.to_string()))?;
                board.place(cell, worker);
                worker.slot() == WorkerSlot::Second
            }
            None => {
                let play = decode(action);
                let worker = WorkerId::new(mover, play.worker);
                let origin = board.find_worker(worker).ok_or_else(|| {
                    EngineError::CorruptSnapshot(format!("worker {} missing", worker))
                })?;
                let target = play.move_direction.apply(origin).ok_or_else(|| {
                    EngineError::CorruptSnapshot("move leaves the board".to_string())
                })?;
                board.relocate(origin, target);
                if !play.skips_build() {
                    let build_at = play.build_direction.apply(target).ok_or_else(|| {
                        EngineError::CorruptSnapshot("build leaves the board".to_string())
                    })?;
                    board.build(build_at);
                }
                true
            }
        };
        board.advance_round();

        let candidate = if hand_over { mover.opponent() } else { mover };
        let game_ended = outcome(&board, candidate);
        let active_player = if game_ended == [0, 0] { candidate } else { mover };

        let mut next = self.clone();
        next.history.push(HistoryEntry {
            player: mover,
            board: self.board,
            action,
        });
        next.board = board;
        next.active_player = active_player;
        next.game_ended = game_ended;
        next.refresh_mask();
        Ok(next)
    }

    fn refresh_mask(&mut self) {
        self.valid_moves = if self.is_terminal() {
            ActionMask::empty()
        } else {
            valid_moves(&self.board, self.active_player)
        };
    }
}

/// Scores a position with `to_move` about to act.
///
/// A worker on the winning height wins outright; during play a player with
/// no legal action loses.
fn outcome(board: &Board, to_move: Player) -> [u8; 2] {
    if next_placement(board).is_some() {
        return [0, 0];
    }
    if board.score_for(Player::Zero) >= WINNING_HEIGHT {
        return [1, 0];
    }
    if board.score_for(Player::One) >= WINNING_HEIGHT {
        return [0, 1];
    }
    if !has_any_valid_move(board, to_move) {
        return match to_move.opponent() {
            Player::Zero => [1, 0],
            Player::One => [0, 1],
        };
    }
    [0, 0]
}

/// Mutable convenience wrapper around a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameEngine {
    snapshot: GameStateSnapshot,
}

impl GameEngine {
    /// Starts a new game.
    pub fn new(metadata: SnapshotMetadata) -> Self {
        Self {
            snapshot: GameStateSnapshot::new(metadata),
        }
    }

    /// Rehydrates an engine from a stored snapshot.
    pub fn from_snapshot(snapshot: GameStateSnapshot) -> Result<Self, EngineError> {
        snapshot.validate()?;
        Ok(Self { snapshot })
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> &GameStateSnapshot {
        &self.snapshot
    }

    /// Consumes the engine, yielding its snapshot.
    pub fn into_snapshot(self) -> GameStateSnapshot {
        self.snapshot
    }

    /// Legality mask of the current position.
    pub fn valid_moves(&self) -> &ActionMask {
        self.snapshot.valid_moves()
    }

    /// Applies one action; on error the engine is unchanged.
    #[instrument(skip(self))]
    pub fn apply_move(&mut self, action: ActionIndex) -> Result<(), EngineError> {
        self.snapshot = self.snapshot.apply(action)?;
        Ok(())
    }

    /// Applies a batch atomically.
    pub fn apply_moves(&mut self, actions: &[ActionIndex]) -> Result<(), EngineError> {
        self.snapshot = self.snapshot.apply_sequence(actions)?;
        Ok(())
    }

    /// Undoes the last action.
    pub fn undo(&mut self) -> Result<(), EngineError> {
        self.snapshot = self.snapshot.undo()?;
        Ok(())
    }

    /// Redoes the last undone action.
    pub fn redo(&mut self) -> Result<(), EngineError> {
        self.snapshot = self.snapshot.redo()?;
        Ok(())
    }

    /// True if an action can be undone.
    pub fn can_undo(&self) -> bool {
        !self.snapshot.history.is_empty()
    }

    /// True if an action can be redone.
    pub fn can_redo(&self) -> bool {
        !self.snapshot.future.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idx(raw: usize) -> ActionIndex {
        ActionIndex::new(raw).expect("in range")
    }

    #[test]
    fn test_new_game_is_placement() {
        let snap = GameStateSnapshot::new(SnapshotMetadata::default());
        assert_eq!(snap.phase(), Phase::Placement { placed: 0 });
        assert_eq!(snap.valid_moves().count(), 25);
        assert_eq!(*snap.active_player(), Player::Zero);
    }

    #[test]
    fn test_placement_keeps_turn_after_first_worker() {
        let snap = GameStateSnapshot::new(SnapshotMetadata::default());
        let snap = snap.apply(idx(0)).expect("place");
        assert_eq!(*snap.active_player(), Player::Zero);
        let snap = snap.apply(idx(4)).expect("place");
        assert_eq!(*snap.active_player(), Player::One);
    }

    #[test]
    fn test_occupied_placement_rejected() {
        let snap = GameStateSnapshot::new(SnapshotMetadata::default())
            .apply(idx(6))
            .expect("place");
        let err = snap.apply(idx(6)).expect_err("occupied");
        assert!(matches!(err, EngineError::InvalidMove { .. }));
    }

    #[test]
    fn test_undo_on_fresh_game_fails() {
        let snap = GameStateSnapshot::new(SnapshotMetadata::default());
        assert_eq!(snap.undo().expect_err("empty"), EngineError::NothingToUndo);
        assert_eq!(snap.redo().expect_err("empty"), EngineError::NothingToRedo);
    }

    #[test]
    fn test_apply_clears_future() {
        let snap = GameStateSnapshot::new(SnapshotMetadata::default())
            .apply(idx(0))
            .expect("place")
            .undo()
            .expect("undo");
        assert_eq!(snap.future().len(), 1);
        let snap = snap.apply(idx(1)).expect("place");
        assert!(snap.future().is_empty());
    }

    #[test]
    fn test_version_mismatch_is_corrupt() {
        let mut snap = GameStateSnapshot::new(SnapshotMetadata::default());
        snap.version = 99;
        let json = serde_json::to_string(&snap).expect("serialize");
        assert!(matches!(
            GameStateSnapshot::from_json(&json),
            Err(EngineError::CorruptSnapshot(_))
        ));
    }

    #[test]
    fn test_wire_field_names() {
        let snap = GameStateSnapshot::new(SnapshotMetadata::new(Role::Opponent, Some(3)));
        let value = serde_json::to_value(&snap).expect("serialize");
        assert_eq!(value["activePlayer"], 0);
        assert_eq!(value["gameEnded"], serde_json::json!([0, 0]));
        assert_eq!(value["metadata"]["playerZeroRole"], "opponent");
        assert_eq!(value["metadata"]["aiDepth"], 3);
        assert_eq!(value["validMoves"].as_array().map(Vec::len), Some(162));
    }
}
