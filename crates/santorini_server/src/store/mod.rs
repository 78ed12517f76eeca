//! Persistence collaborator: the match store trait and its implementations.

mod error;
mod memory;
mod models;
mod schema;
mod sqlite;

pub use error::{StoreError, StoreErrorKind};
pub use memory::MemoryMatchStore;
pub use models::{AUTOMATED_OPPONENT_ID, MatchRecord, NewMatch};
pub use sqlite::SqliteMatchStore;

use chrono::{DateTime, Utc};
use santorini_engine::{MatchId, MoveRecord, UserId};

/// Relational store of matches and their move records.
///
/// Move records are unique on `(match_id, move_index)`; a second insert at
/// an occupied index fails with [`StoreErrorKind::Conflict`].
pub trait MatchStore: Send + Sync + std::fmt::Debug {
    /// Inserts a new match.
    fn create_match(&self, record: &MatchRecord) -> Result<(), StoreError>;

    /// Loads a match row.
    fn load_match(&self, id: &MatchId) -> Result<Option<MatchRecord>, StoreError>;

    /// Loads a match together with its latest move in one round trip.
    fn load_submission_context(
        &self,
        id: &MatchId,
    ) -> Result<Option<(MatchRecord, Option<MoveRecord>)>, StoreError>;

    /// Moves with `move_index >= from`, ascending.
    fn list_moves(&self, id: &MatchId, from: u32) -> Result<Vec<MoveRecord>, StoreError>;

    /// The move at `index`, if any.
    fn move_at(&self, id: &MatchId, index: u32) -> Result<Option<MoveRecord>, StoreError>;

    /// Appends a move record.
    fn insert_move(&self, record: &MoveRecord) -> Result<(), StoreError> {
        self.append_moves(std::slice::from_ref(record), None)
    }

    /// Appends `records` and, when given, overwrites the match row, all in
    /// one transaction. A conflict on any index leaves nothing written.
    fn append_moves(
        &self,
        records: &[MoveRecord],
        updated: Option<&MatchRecord>,
    ) -> Result<(), StoreError>;

    /// Overwrites the mutable columns of a match.
    fn update_match(&self, record: &MatchRecord) -> Result<(), StoreError>;

    /// Deletes every move with `move_index >= from` in one batch, returning
    /// the removed indexes in ascending order.
    fn delete_moves_from(&self, id: &MatchId, from: u32) -> Result<Vec<u32>, StoreError>;

    /// Seats `user` as opponent if the seat is free. Returns whether the
    /// claim won.
    fn claim_opponent(
        &self,
        id: &MatchId,
        user: &UserId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}
