//! In-memory match store.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use santorini_engine::{MatchId, MatchStatus, MoveRecord, UserId};
use tracing::{debug, instrument};

use crate::store::{MatchRecord, MatchStore, StoreError};

#[derive(Debug)]
struct StoredMatch {
    record: MatchRecord,
    moves: BTreeMap<u32, MoveRecord>,
}

/// Store backed by a mutex-guarded map. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryMatchStore {
    matches: Mutex<HashMap<MatchId, StoredMatch>>,
}

impl MemoryMatchStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl MatchStore for MemoryMatchStore {
    #[instrument(skip(self, record), fields(match_id = %record.id()))]
    fn create_match(&self, record: &MatchRecord) -> Result<(), StoreError> {
        let mut matches = self.matches.lock().unwrap_or_else(PoisonError::into_inner);
        if matches.contains_key(record.id()) {
            return Err(StoreError::conflict(format!("match {} exists", record.id())));
        }
        matches.insert(
            record.id().clone(),
            StoredMatch {
                record: record.clone(),
                moves: BTreeMap::new(),
            },
        );
        Ok(())
    }

    fn load_match(&self, id: &MatchId) -> Result<Option<MatchRecord>, StoreError> {
        let matches = self.matches.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(matches.get(id).map(|m| m.record.clone()))
    }

    fn load_submission_context(
        &self,
        id: &MatchId,
    ) -> Result<Option<(MatchRecord, Option<MoveRecord>)>, StoreError> {
        let matches = self.matches.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(matches.get(id).map(|m| {
            let last = m.moves.values().next_back().cloned();
            (m.record.clone(), last)
        }))
    }

    fn list_moves(&self, id: &MatchId, from: u32) -> Result<Vec<MoveRecord>, StoreError> {
        let matches = self.matches.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(matches
            .get(id)
            .map(|m| m.moves.range(from..).map(|(_, r)| r.clone()).collect())
            .unwrap_or_default())
    }

    fn move_at(&self, id: &MatchId, index: u32) -> Result<Option<MoveRecord>, StoreError> {
        let matches = self.matches.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(matches.get(id).and_then(|m| m.moves.get(&index).cloned()))
    }

    #[instrument(skip(self, records, updated), fields(count = records.len()))]
    fn append_moves(
        &self,
        records: &[MoveRecord],
        updated: Option<&MatchRecord>,
    ) -> Result<(), StoreError> {
        let mut matches = self.matches.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(first) = records.first() else {
            return Ok(());
        };
        let stored = matches
            .get_mut(first.match_id())
            .ok_or_else(|| StoreError::new(format!("no match {}", first.match_id())))?;
        let mut batch = BTreeSet::new();
        for record in records {
            if record.match_id() != first.match_id() {
                return Err(StoreError::new("move batch spans several matches"));
            }
            let taken = stored.moves.contains_key(record.move_index());
            if taken || !batch.insert(*record.move_index()) {
                debug!(move_index = record.move_index(), "Move index already taken");
                return Err(StoreError::conflict(format!(
                    "move {} of match {} exists",
                    record.move_index(),
                    record.match_id()
                )));
            }
        }
        for record in records {
            stored.moves.insert(*record.move_index(), record.clone());
        }
        if let Some(record) = updated {
            stored.record = record.clone();
        }
        Ok(())
    }

    fn update_match(&self, record: &MatchRecord) -> Result<(), StoreError> {
        let mut matches = self.matches.lock().unwrap_or_else(PoisonError::into_inner);
        let stored = matches
            .get_mut(record.id())
            .ok_or_else(|| StoreError::new(format!("no match {}", record.id())))?;
        stored.record = record.clone();
        Ok(())
    }

    fn delete_moves_from(&self, id: &MatchId, from: u32) -> Result<Vec<u32>, StoreError> {
        let mut matches = self.matches.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(stored) = matches.get_mut(id) else {
            return Ok(Vec::new());
        };
        let removed = stored.moves.split_off(&from);
        Ok(removed.into_keys().collect())
    }

    fn claim_opponent(
        &self,
        id: &MatchId,
        user: &UserId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut matches = self.matches.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(stored) = matches.get_mut(id) else {
            return Ok(false);
        };
        if stored.record.opponent_id().is_some() || *stored.record.status() != MatchStatus::Waiting
        {
            return Ok(false);
        }
        stored.record.seat_opponent(user.clone(), now);
        Ok(true)
    }
}
