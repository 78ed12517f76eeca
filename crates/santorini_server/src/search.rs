//! Automated move-search collaborator.

use santorini_engine::{ActionIndex, ActionMask, GameStateSnapshot, STATE_SIZE, SnapshotMetadata};
use tracing::{debug, instrument};

/// Chooses an action for the automated opponent.
///
/// `state` is [`santorini_engine::Board::to_state_bytes`] of the board canonicalised for the
/// side to move, so that side always owns the positive worker ids.
pub trait MoveSearch: Send + Sync + std::fmt::Debug {
    /// Returns a legal action from `mask`, or `None` if the mask is empty.
    fn choose(
        &self,
        state: &[i8; STATE_SIZE],
        mask: &ActionMask,
        metadata: &SnapshotMetadata,
    ) -> Option<ActionIndex>;
}

/// Encodes `snapshot` the way [`MoveSearch::choose`] expects it.
pub fn search_input(snapshot: &GameStateSnapshot) -> [i8; STATE_SIZE] {
    snapshot
        .board()
        .canonicalised(*snapshot.active_player())
        .to_state_bytes()
}

/// Always plays the lowest legal action index.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstLegalMoveSearch;

impl MoveSearch for FirstLegalMoveSearch {
    #[instrument(skip_all)]
    fn choose(
        &self,
        _state: &[i8; STATE_SIZE],
        mask: &ActionMask,
        _metadata: &SnapshotMetadata,
    ) -> Option<ActionIndex> {
        let choice = mask.iter_legal().next();
        debug!(?choice, "Automated opponent chose action");
        choice
    }
}
