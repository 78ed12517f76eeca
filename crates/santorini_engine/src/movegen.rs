//! Legal-move generation.

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::board::{Board, CELL_COUNT, Player, WINNING_HEIGHT, WorkerId, WorkerSlot};
use crate::codec::{
    ACTION_SIZE, ActionIndex, Direction, NO_BUILD, PlayAction, encode, encode_placement,
};

/// Fixed-size legality mask over the action space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "Vec<bool>", try_from = "Vec<bool>")]
pub struct ActionMask([bool; ACTION_SIZE]);

impl ActionMask {
    /// Mask with every action illegal.
    pub fn empty() -> Self {
        Self([false; ACTION_SIZE])
    }

    /// True if `action` is legal.
    pub fn allows(&self, action: ActionIndex) -> bool {
        self.0[action.get()]
    }

    /// Marks `action` legal.
    pub fn set(&mut self, action: ActionIndex) {
        self.0[action.get()] = true;
    }

    /// True if any action is legal.
    pub fn any(&self) -> bool {
        self.0.iter().any(|&b| b)
    }

    /// Number of legal actions.
    pub fn count(&self) -> usize {
        self.0.iter().filter(|&&b| b).count()
    }

    /// Legal actions in ascending index order.
    pub fn iter_legal(&self) -> impl Iterator<Item = ActionIndex> + '_ {
        ActionIndex::all().filter(|a| self.allows(*a))
    }

    /// Raw flags.
    pub fn as_slice(&self) -> &[bool] {
        &self.0
    }
}

impl Default for ActionMask {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<ActionMask> for Vec<bool> {
    fn from(mask: ActionMask) -> Self {
        mask.0.to_vec()
    }
}

impl TryFrom<Vec<bool>> for ActionMask {
    type Error = String;

    fn try_from(flags: Vec<bool>) -> Result<Self, Self::Error> {
        let len = flags.len();
        let array: [bool; ACTION_SIZE] = flags
            .try_into()
            .map_err(|_| format!("legality mask must have {} entries, got {}", ACTION_SIZE, len))?;
        Ok(Self(array))
    }
}

/// The player and worker due to be placed next, if placement is unfinished.
///
/// Placement order is player 0 worker 1, player 0 worker 2, player 1
/// worker 1, player 1 worker 2.
pub fn next_placement(board: &Board) -> Option<(Player, WorkerId)> {
    WorkerId::placement_order()
        .into_iter()
        .find(|w| board.find_worker(*w).is_none())
        .map(|w| (w.player(), w))
}

/// Computes every legal action for `player` on `board`.
#[instrument(skip(board), level = "trace")]
pub fn valid_moves(board: &Board, player: Player) -> ActionMask {
    let mut mask = ActionMask::empty();

    if let Some((placing, _)) = next_placement(board) {
        if placing == player {
            for cell in 0..CELL_COUNT {
                if board.cell(cell).is_unoccupied()
                    && let Ok(action) = encode_placement(cell)
                {
                    mask.set(action);
                }
            }
        }
        return mask;
    }

    for slot in [WorkerSlot::First, WorkerSlot::Second] {
        let worker = WorkerId::new(player, slot);
        let Some(origin) = board.find_worker(worker) else {
            continue;
        };
        let origin_height = board.cell(origin).height;

        for move_direction in Direction::moving() {
            let Some(target) = move_direction.apply(origin) else {
                continue;
            };
            if !can_move(board, origin_height, target) {
                continue;
            }

            if board.cell(target).height == WINNING_HEIGHT {
                mask.set(encode(PlayAction::new(slot, move_direction, NO_BUILD)));
                continue;
            }

            for build_direction in Direction::moving() {
                let Some(build_at) = build_direction.apply(target) else {
                    continue;
                };
                if can_build(board, build_at, origin) {
                    mask.set(encode(PlayAction::new(slot, move_direction, build_direction)));
                }
            }
        }
    }

    mask
}

/// True if `player` has at least one legal action.
pub fn has_any_valid_move(board: &Board, player: Player) -> bool {
    valid_moves(board, player).any()
}

fn can_move(board: &Board, origin_height: u8, target: usize) -> bool {
    let cell = board.cell(target);
    cell.is_unoccupied() && cell.height <= WINNING_HEIGHT && cell.height <= origin_height + 1
}

fn can_build(board: &Board, at: usize, vacated_origin: usize) -> bool {
    if at == vacated_origin {
        return true;
    }
    let cell = board.cell(at);
    cell.is_unoccupied() && !cell.is_dome()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::cell_index;
    use crate::codec::decode;

    fn placed_board() -> Board {
        let mut board = Board::new();
        board.place(cell_index(0, 0), WorkerId::new(Player::Zero, WorkerSlot::First));
        board.place(cell_index(4, 4), WorkerId::new(Player::Zero, WorkerSlot::Second));
        board.place(cell_index(0, 4), WorkerId::new(Player::One, WorkerSlot::First));
        board.place(cell_index(4, 0), WorkerId::new(Player::One, WorkerSlot::Second));
        board
    }

    #[test]
    fn test_placement_mask_only_for_placing_player() {
        let board = Board::new();
        let zero = valid_moves(&board, Player::Zero);
        let one = valid_moves(&board, Player::One);
        assert_eq!(zero.count(), 25);
        assert_eq!(one.count(), 0);
    }

    #[test]
    fn test_placement_excludes_occupied_cells() {
        let mut board = Board::new();
        board.place(12, WorkerId::new(Player::Zero, WorkerSlot::First));
        let mask = valid_moves(&board, Player::Zero);
        assert_eq!(mask.count(), 24);
        assert!(!mask.allows(ActionIndex::new(12).expect("in range")));
    }

    #[test]
    fn test_corner_worker_move_count() {
        let board = placed_board();
        let mask = valid_moves(&board, Player::Zero);
        // Each corner worker has 3 destinations; every destination has at
        // least the vacated origin to build on.
        assert!(mask.any());
        for action in mask.iter_legal() {
            let play = decode(action);
            assert_ne!(play.move_direction, Direction::Stay);
            assert_ne!(play.build_direction, Direction::Stay);
        }
    }

    #[test]
    fn test_cannot_climb_two_levels() {
        let mut board = placed_board();
        board.set_height(cell_index(0, 1), 2).expect("height");
        let mask = valid_moves(&board, Player::Zero);
        let climbs = mask.iter_legal().map(decode).any(|p| {
            p.worker == WorkerSlot::First && p.move_direction == Direction::East
        });
        assert!(!climbs);
    }

    #[test]
    fn test_winning_move_uses_no_build_sentinel() {
        let mut board = placed_board();
        board.set_height(cell_index(0, 0), 2).expect("height");
        board.set_height(cell_index(1, 1), 3).expect("height");
        let mask = valid_moves(&board, Player::Zero);
        let to_peak: Vec<_> = mask
            .iter_legal()
            .map(decode)
            .filter(|p| p.worker == WorkerSlot::First && p.move_direction == Direction::SouthEast)
            .collect();
        assert_eq!(to_peak.len(), 1);
        assert_eq!(to_peak[0].build_direction, NO_BUILD);
    }

    #[test]
    fn test_domes_block_moves_and_builds() {
        let mut board = placed_board();
        board.set_height(cell_index(0, 1), 4).expect("height");
        board.set_height(cell_index(1, 0), 4).expect("height");
        board.set_height(cell_index(1, 1), 4).expect("height");
        let mask = valid_moves(&board, Player::Zero);
        assert!(mask.iter_legal().map(decode).all(|p| p.worker == WorkerSlot::Second));
    }

    #[test]
    fn test_mask_serde_length_checked() {
        assert!(serde_json::from_str::<ActionMask>("[true,false]").is_err());
        let json = serde_json::to_string(&ActionMask::empty()).expect("serialize");
        let back: ActionMask = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, ActionMask::empty());
    }
}
