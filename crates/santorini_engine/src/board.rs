//! Board representation: players, workers and the 5x5 grid of cells.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use strum::{EnumIter, IntoEnumIterator};
use tracing::instrument;

/// Side length of the square board.
pub const BOARD_SIZE: usize = 5;

/// Number of cells on the board.
pub const CELL_COUNT: usize = BOARD_SIZE * BOARD_SIZE;

/// Height at which a cell is capped by a dome.
pub const DOME_HEIGHT: u8 = 4;

/// Height a worker must climb onto to win.
pub const WINNING_HEIGHT: u8 = 3;

/// Values per cell in the flat state encoding: worker, level, round.
pub const CHANNELS: usize = 3;

/// Length of the flat state encoding consumed by move search.
pub const STATE_SIZE: usize = CELL_COUNT * CHANNELS;

/// The round counter stops here so it fits one signed byte.
pub const MAX_ROUND: u16 = 127;

/// Engine-internal player index.
///
/// Which logical participant owns [`Player::Zero`] is decided per match by
/// the starting-role configuration, never by this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, EnumIter)]
#[serde(into = "u8", try_from = "u8")]
pub enum Player {
    /// Player index 0 (positive worker ids).
    Zero,
    /// Player index 1 (negative worker ids).
    One,
}

impl Player {
    /// Returns the numeric index (0 or 1).
    pub fn index(self) -> usize {
        match self {
            Self::Zero => 0,
            Self::One => 1,
        }
    }

    /// Returns the other player.
    pub fn opponent(self) -> Self {
        match self {
            Self::Zero => Self::One,
            Self::One => Self::Zero,
        }
    }

    /// Sign carried by this player's worker ids.
    pub fn sign(self) -> i8 {
        match self {
            Self::Zero => 1,
            Self::One => -1,
        }
    }
}

impl From<Player> for u8 {
    fn from(player: Player) -> Self {
        player.index() as u8
    }
}

impl TryFrom<u8> for Player {
    type Error = BoardError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Zero),
            1 => Ok(Self::One),
            other => Err(BoardError::InvalidPlayer(other)),
        }
    }
}

/// Which of a player's two workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, EnumIter)]
pub enum WorkerSlot {
    /// The first worker placed (magnitude 1).
    First,
    /// The second worker placed (magnitude 2).
    Second,
}

impl WorkerSlot {
    /// Returns the slot index used by the action codec (0 or 1).
    pub fn index(self) -> usize {
        match self {
            Self::First => 0,
            Self::Second => 1,
        }
    }

    /// Looks a slot up by codec index.
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::First),
            1 => Some(Self::Second),
            _ => None,
        }
    }
}

/// Signed worker identifier: sign selects the owner, magnitude the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(into = "i8", try_from = "i8")]
#[display("{}", _0)]
pub struct WorkerId(i8);

impl WorkerId {
    /// Builds the id of `player`'s worker in `slot`.
    pub fn new(player: Player, slot: WorkerSlot) -> Self {
        Self(player.sign() * (slot.index() as i8 + 1))
    }

    /// Owning player.
    pub fn player(self) -> Player {
        if self.0 > 0 { Player::Zero } else { Player::One }
    }

    /// Worker slot.
    pub fn slot(self) -> WorkerSlot {
        if self.0.abs() == 1 {
            WorkerSlot::First
        } else {
            WorkerSlot::Second
        }
    }

    /// Raw signed value.
    pub fn get(self) -> i8 {
        self.0
    }

    /// Same slot, other owner.
    pub fn flipped(self) -> Self {
        Self(-self.0)
    }

    /// All four worker ids in placement order.
    pub fn placement_order() -> [WorkerId; 4] {
        [
            Self::new(Player::Zero, WorkerSlot::First),
            Self::new(Player::Zero, WorkerSlot::Second),
            Self::new(Player::One, WorkerSlot::First),
            Self::new(Player::One, WorkerSlot::Second),
        ]
    }
}

impl From<WorkerId> for i8 {
    fn from(id: WorkerId) -> Self {
        id.0
    }
}

impl TryFrom<i8> for WorkerId {
    type Error = BoardError;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            1 | 2 | -1 | -2 => Ok(Self(value)),
            other => Err(BoardError::InvalidWorker(other)),
        }
    }
}

/// Errors raised when board data is malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum BoardError {
    /// Player index outside 0..=1.
    #[display("Invalid player index {}", _0)]
    InvalidPlayer(u8),
    /// Worker id other than ±1 or ±2.
    #[display("Invalid worker id {}", _0)]
    InvalidWorker(i8),
    /// Cell height above the dome height.
    #[display("Invalid cell height {}", _0)]
    InvalidHeight(u8),
    /// Level byte outside 0..=4 in a flat state encoding.
    #[display("Invalid level byte {}", _0)]
    InvalidLevel(i8),
    /// Flat state encoding of the wrong length.
    #[display("Expected {} state entries, got {}", STATE_SIZE, _0)]
    InvalidLength(usize),
    /// The same worker appears on more than one cell.
    #[display("Worker {} appears more than once", _0)]
    DuplicateWorker(WorkerId),
}

impl std::error::Error for BoardError {}

/// One cell of the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BoardCell {
    /// Worker standing on the cell, if any.
    pub occupant: Option<WorkerId>,
    /// Building height, 0..=4 (4 is a dome).
    pub height: u8,
}

impl BoardCell {
    /// True if the cell is capped.
    pub fn is_dome(&self) -> bool {
        self.height >= DOME_HEIGHT
    }

    /// True if no worker stands here.
    pub fn is_unoccupied(&self) -> bool {
        self.occupant.is_none()
    }
}

/// Row-major 5x5 board plus the count of actions played on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "BoardRepr", into = "BoardRepr")]
pub struct Board {
    cells: [BoardCell; CELL_COUNT],
    round: u16,
}

impl Board {
    /// Creates an empty board at ground level.
    pub fn new() -> Self {
        Self {
            cells: [BoardCell::default(); CELL_COUNT],
            round: 0,
        }
    }

    /// Actions played so far, capped at [`MAX_ROUND`].
    pub fn round(&self) -> u16 {
        self.round
    }

    /// Counts one more action.
    pub fn advance_round(&mut self) {
        self.round = (self.round + 1).min(MAX_ROUND);
    }

    /// Returns the cell at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= CELL_COUNT`; callers derive indices from the codec.
    pub fn cell(&self, index: usize) -> &BoardCell {
        &self.cells[index]
    }

    /// Returns all cells in row-major order.
    pub fn cells(&self) -> &[BoardCell; CELL_COUNT] {
        &self.cells
    }

    /// Finds the cell holding `worker`.
    pub fn find_worker(&self, worker: WorkerId) -> Option<usize> {
        self.cells.iter().position(|c| c.occupant == Some(worker))
    }

    /// Number of workers currently on the board.
    pub fn worker_count(&self) -> usize {
        self.cells.iter().filter(|c| c.occupant.is_some()).count()
    }

    /// Puts `worker` on `index`, replacing any previous occupant.
    pub fn place(&mut self, index: usize, worker: WorkerId) {
        self.cells[index].occupant = Some(worker);
    }

    /// Moves whatever stands on `from` onto `to`.
    pub fn relocate(&mut self, from: usize, to: usize) {
        let worker = self.cells[from].occupant.take();
        self.cells[to].occupant = worker;
    }

    /// Raises `index` by one level, saturating at the dome.
    pub fn build(&mut self, index: usize) {
        let cell = &mut self.cells[index];
        cell.height = (cell.height + 1).min(DOME_HEIGHT);
    }

    /// Sets a raw height; used to build positions in tests and fixtures.
    pub fn set_height(&mut self, index: usize, height: u8) -> Result<(), BoardError> {
        if height > DOME_HEIGHT {
            return Err(BoardError::InvalidHeight(height));
        }
        self.cells[index].height = height;
        Ok(())
    }

    /// Highest level any of `player`'s workers stands on.
    pub fn score_for(&self, player: Player) -> u8 {
        self.cells
            .iter()
            .filter(|c| c.occupant.map(WorkerId::player) == Some(player))
            .map(|c| c.height)
            .max()
            .unwrap_or(0)
    }

    /// Flat encoding: per cell `[worker, level, round]`, the round only in
    /// the first cell and zero elsewhere. Empty cells carry worker 0.
    pub fn to_state_bytes(&self) -> [i8; STATE_SIZE] {
        let mut flat = [0; STATE_SIZE];
        let chunks = flat.chunks_exact_mut(CHANNELS);
        for (i, (cell, chunk)) in self.cells.iter().zip(chunks).enumerate() {
            chunk[0] = cell.occupant.map_or(0, WorkerId::get);
            chunk[1] = cell.height as i8;
            if i == 0 {
                chunk[2] = self.round.min(MAX_ROUND) as i8;
            }
        }
        flat
    }

    /// Decodes [`Board::to_state_bytes`]. Round bytes outside 0..=127 are
    /// clamped.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError`] on a wrong length, an unknown worker id, a
    /// level outside 0..=4 or a duplicated worker.
    #[instrument(skip(bytes), fields(len = bytes.len()))]
    pub fn from_state_bytes(bytes: &[i8]) -> Result<Self, BoardError> {
        if bytes.len() != STATE_SIZE {
            return Err(BoardError::InvalidLength(bytes.len()));
        }
        let mut cells = [BoardCell::default(); CELL_COUNT];
        for (cell, chunk) in cells.iter_mut().zip(bytes.chunks_exact(CHANNELS)) {
            cell.occupant = match chunk[0] {
                0 => None,
                raw => Some(WorkerId::try_from(raw)?),
            };
            cell.height = u8::try_from(chunk[1])
                .ok()
                .filter(|h| *h <= DOME_HEIGHT)
                .ok_or(BoardError::InvalidLevel(chunk[1]))?;
        }
        let round = bytes[2].clamp(0, MAX_ROUND as i8) as u16;
        Board::try_from(BoardRepr { cells, round })
    }

    /// The board as seen by `player`: player one's workers become positive
    /// and player zero's negative, so the side to move always owns the
    /// positive ids.
    pub fn canonicalised(&self, player: Player) -> Self {
        let mut board = *self;
        if player == Player::One {
            for cell in &mut board.cells {
                cell.occupant = cell.occupant.map(WorkerId::flipped);
            }
        }
        board
    }

    /// Formats the board as rows of `height` plus worker id.
    #[instrument(skip(self))]
    pub fn display(&self) -> String {
        let mut out = String::new();
        for row in 0..BOARD_SIZE {
            let line: Vec<String> = (0..BOARD_SIZE)
                .map(|col| {
                    let cell = self.cells[cell_index(row, col)];
                    match cell.occupant {
                        Some(w) => format!("{}{:+}", cell.height, w.get()),
                        None => format!("{}  ", cell.height),
                    }
                })
                .collect();
            out.push_str(&line.join(" "));
            if row + 1 < BOARD_SIZE {
                out.push('\n');
            }
        }
        out
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialized form of [`Board`].
#[derive(Serialize, Deserialize)]
struct BoardRepr {
    cells: [BoardCell; CELL_COUNT],
    #[serde(default)]
    round: u16,
}

impl From<Board> for BoardRepr {
    fn from(board: Board) -> Self {
        Self {
            cells: board.cells,
            round: board.round,
        }
    }
}

impl TryFrom<BoardRepr> for Board {
    type Error = BoardError;

    fn try_from(repr: BoardRepr) -> Result<Self, Self::Error> {
        let BoardRepr { cells, round } = repr;
        for cell in &cells {
            if cell.height > DOME_HEIGHT {
                return Err(BoardError::InvalidHeight(cell.height));
            }
        }
        for worker in WorkerId::placement_order() {
            if cells.iter().filter(|c| c.occupant == Some(worker)).count() > 1 {
                return Err(BoardError::DuplicateWorker(worker));
            }
        }
        Ok(Self {
            cells,
            round: round.min(MAX_ROUND),
        })
    }
}

/// Row-major index of `(row, col)`.
pub const fn cell_index(row: usize, col: usize) -> usize {
    row * BOARD_SIZE + col
}

/// `(row, col)` of a row-major index.
pub const fn cell_coords(index: usize) -> (usize, usize) {
    (index / BOARD_SIZE, index % BOARD_SIZE)
}

/// Iterates both players in index order.
pub fn players() -> impl Iterator<Item = Player> {
    Player::iter()
}
