//! Action codec: the fixed-size action space shared by every engine copy.
//!
//! Placement indices `0..25` name a cell directly. Play indices encode
//! `81 * worker + 9 * move_direction + build_direction`, where directions
//! enumerate the 3x3 neighbourhood row by row and [`Direction::Stay`] (4)
//! doubles as the "no build" sentinel of an immediately winning move.
//!
//! These constants must be identical in the client, the server and any
//! move-search integration or their states silently diverge.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use strum::{EnumIter, IntoEnumIterator};

use crate::board::{BOARD_SIZE, CELL_COUNT, WorkerSlot, cell_coords, cell_index};

/// Number of neighbourhood directions, including [`Direction::Stay`].
pub const DIRECTION_COUNT: usize = 9;

/// Total size of the action space.
pub const ACTION_SIZE: usize = 2 * DIRECTION_COUNT * DIRECTION_COUNT;

/// Number of placement indices (one per cell).
pub const PLACEMENT_ACTIONS: usize = CELL_COUNT;

/// Build direction meaning "no build" on a winning move.
pub const NO_BUILD: Direction = Direction::Stay;

/// One of the nine offsets of a 3x3 neighbourhood, in row-major order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, strum::Display,
)]
#[strum(serialize_all = "snake_case")]
pub enum Direction {
    /// (-1, -1)
    NorthWest,
    /// (-1, 0)
    North,
    /// (-1, +1)
    NorthEast,
    /// (0, -1)
    West,
    /// (0, 0)
    Stay,
    /// (0, +1)
    East,
    /// (+1, -1)
    SouthWest,
    /// (+1, 0)
    South,
    /// (+1, +1)
    SouthEast,
}

impl Direction {
    /// Codec index of the direction.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Direction for a codec index.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::iter().nth(index)
    }

    /// `(row, col)` offset.
    pub fn delta(self) -> (isize, isize) {
        let i = self.index() as isize;
        (i / 3 - 1, i % 3 - 1)
    }

    /// Cell reached by stepping from `cell`, or `None` off the board.
    pub fn apply(self, cell: usize) -> Option<usize> {
        let (row, col) = cell_coords(cell);
        let (dr, dc) = self.delta();
        let row = row.checked_add_signed(dr)?;
        let col = col.checked_add_signed(dc)?;
        (row < BOARD_SIZE && col < BOARD_SIZE).then(|| cell_index(row, col))
    }

    /// The eight directions that actually move.
    pub fn moving() -> impl Iterator<Item = Direction> {
        Self::iter().filter(|d| *d != Self::Stay)
    }
}

/// Index into the action space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[serde(into = "u16", try_from = "u16")]
#[display("{}", _0)]
pub struct ActionIndex(u16);

impl ActionIndex {
    /// Wraps a raw index, rejecting values outside the action space.
    pub fn new(raw: usize) -> Result<Self, CodecError> {
        if raw < ACTION_SIZE {
            Ok(Self(raw as u16))
        } else {
            Err(CodecError::OutOfRange(raw))
        }
    }

    /// Raw index.
    pub fn get(self) -> usize {
        self.0 as usize
    }

    /// Every index of the action space in ascending order.
    pub fn all() -> impl Iterator<Item = ActionIndex> {
        (0..ACTION_SIZE as u16).map(ActionIndex)
    }
}

impl From<ActionIndex> for u16 {
    fn from(index: ActionIndex) -> Self {
        index.0
    }
}

impl TryFrom<u16> for ActionIndex {
    type Error = CodecError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value as usize)
    }
}

/// Codec failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum CodecError {
    /// Index beyond the action space.
    #[display("Action index {} is outside 0..{}", _0, ACTION_SIZE)]
    OutOfRange(usize),
    /// Index beyond the placement sub-range.
    #[display("Action index {} is not a placement (0..{})", _0, PLACEMENT_ACTIONS)]
    NotAPlacement(usize),
}

impl std::error::Error for CodecError {}

/// Decoded play-phase action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayAction {
    /// Which of the mover's workers.
    pub worker: WorkerSlot,
    /// Step taken by the worker.
    pub move_direction: Direction,
    /// Build relative to the destination, or [`NO_BUILD`].
    pub build_direction: Direction,
}

impl PlayAction {
    /// Creates a play action.
    pub fn new(worker: WorkerSlot, move_direction: Direction, build_direction: Direction) -> Self {
        Self {
            worker,
            move_direction,
            build_direction,
        }
    }

    /// True for the sentinel "move without building" form.
    pub fn skips_build(&self) -> bool {
        self.build_direction == NO_BUILD
    }
}

/// Encodes a play action.
pub fn encode(action: PlayAction) -> ActionIndex {
    let raw = DIRECTION_COUNT * DIRECTION_COUNT * action.worker.index()
        + DIRECTION_COUNT * action.move_direction.index()
        + action.build_direction.index();
    ActionIndex(raw as u16)
}

/// Decodes a play-phase index.
pub fn decode(index: ActionIndex) -> PlayAction {
    let raw = index.get();
    let per_worker = DIRECTION_COUNT * DIRECTION_COUNT;
    let remainder = raw % per_worker;
    // The action space is exactly two workers wide, so these lookups cannot miss.
    let worker = if raw / per_worker == 0 {
        WorkerSlot::First
    } else {
        WorkerSlot::Second
    };
    let move_direction = Direction::from_index(remainder / DIRECTION_COUNT).unwrap_or(Direction::Stay);
    let build_direction = Direction::from_index(remainder % DIRECTION_COUNT).unwrap_or(Direction::Stay);
    PlayAction::new(worker, move_direction, build_direction)
}

/// Encodes a placement on `cell`.
pub fn encode_placement(cell: usize) -> Result<ActionIndex, CodecError> {
    if cell < PLACEMENT_ACTIONS {
        Ok(ActionIndex(cell as u16))
    } else {
        Err(CodecError::NotAPlacement(cell))
    }
}

/// Decodes a placement index into its cell.
pub fn decode_placement(index: ActionIndex) -> Result<usize, CodecError> {
    let raw = index.get();
    if raw < PLACEMENT_ACTIONS {
        Ok(raw)
    } else {
        Err(CodecError::NotAPlacement(raw))
    }
}

/// Phase-aware interpretation of an action index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// Put the next unplaced worker on a cell.
    Place {
        /// Target cell.
        cell: usize,
    },
    /// Move a worker and (usually) build.
    Play(PlayAction),
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Place { cell } => {
                let (row, col) = cell_coords(*cell);
                write!(f, "place@{},{}", row, col)
            }
            Action::Play(play) => write!(
                f,
                "worker{} {} build {}",
                play.worker.index() + 1,
                play.move_direction,
                play.build_direction
            ),
        }
    }
}
