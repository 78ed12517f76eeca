//! Deterministic Santorini rules engine and the wire protocol shared by the
//! match server and its clients.
//!
//! # Architecture
//!
//! - **board**: players, signed worker ids and the 5x5 grid
//! - **codec**: the 162-entry action space
//! - **movegen**: legality masks
//! - **state**: immutable snapshots with undo/redo history
//! - **role**: creator/opponent mapping onto engine player indices
//! - **clock**: time-control arithmetic
//! - **protocol**: request/response types
//!
//! Every participant links this crate so the action space and the rules are
//! identical on both ends of the wire.

#![warn(missing_docs)]

mod board;
mod clock;
mod codec;
mod movegen;
mod protocol;
mod role;
mod state;

pub use board::{
    BOARD_SIZE, Board, BoardCell, BoardError, CELL_COUNT, CHANNELS, DOME_HEIGHT, MAX_ROUND, Player,
    STATE_SIZE, WINNING_HEIGHT, WorkerId, WorkerSlot, cell_coords, cell_index, players,
};
pub use clock::{
    ClockPair, ClockSettings, MAX_ELAPSED_MS, charge_move, elapsed_ms, reference_time, tick,
};
pub use codec::{
    ACTION_SIZE, Action, ActionIndex, CodecError, DIRECTION_COUNT, Direction, NO_BUILD,
    PLACEMENT_ACTIONS, PlayAction, decode, decode_placement, encode, encode_placement,
};
pub use movegen::{ActionMask, has_any_valid_move, next_placement, valid_moves};
pub use protocol::{
    ActionKind, CreateMatchRequest, ErrorBody, ErrorCode, MatchId, MatchState, MatchStatus,
    MoveAccepted, MoveAction, MovePayload, MoveRecord, SequenceMismatch, SubmissionOutcome,
    SubmitMoveRequest, SubmittedAction, UndoAccepted, UndoRejected, UserId,
};
pub use role::{Role, player_for_role, role_for_player};
pub use state::{
    EngineError, GameEngine, GameStateSnapshot, HistoryEntry, Phase, SNAPSHOT_VERSION,
    SnapshotMetadata,
};
