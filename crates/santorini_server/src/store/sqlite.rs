//! SQLite match store built on diesel.

use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use santorini_engine::{
    ClockSettings, GameStateSnapshot, MatchId, MatchStatus, MoveAction, MoveRecord, Role, UserId,
};
use tracing::{debug, info, instrument};

use crate::store::{MatchRecord, MatchStore, StoreError, schema};

/// Schema migrations compiled into the binary.
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = schema::matches)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
struct MatchRow {
    id: String,
    creator_id: String,
    opponent_id: Option<String>,
    status: String,
    clock_initial_seconds: i32,
    clock_increment_seconds: i32,
    clock_updated_at: Option<NaiveDateTime>,
    initial_state: String,
    winner_id: Option<String>,
    player_zero_role: String,
    ai_depth: Option<i32>,
    automated_opponent: bool,
    created_at: NaiveDateTime,
}

impl MatchRow {
    fn from_record(record: &MatchRecord) -> Result<Self, StoreError> {
        Ok(Self {
            id: record.id().to_string(),
            creator_id: record.creator_id().to_string(),
            opponent_id: record.opponent_id().as_ref().map(ToString::to_string),
            status: record.status().to_string(),
            clock_initial_seconds: to_column(*record.clock().initial_seconds())?,
            clock_increment_seconds: to_column(*record.clock().increment_seconds())?,
            clock_updated_at: record.clock_updated_at().map(|t| t.naive_utc()),
            initial_state: record.initial_state().clone(),
            winner_id: record.winner_id().as_ref().map(ToString::to_string),
            player_zero_role: record.player_zero_role().to_string(),
            ai_depth: record.ai_depth().map(i32::from),
            automated_opponent: *record.automated_opponent(),
            created_at: record.created_at().naive_utc(),
        })
    }

    fn into_record(self) -> Result<MatchRecord, StoreError> {
        let status = MatchStatus::from_str(&self.status)
            .map_err(|_| StoreError::corrupt(format!("unknown status '{}'", self.status)))?;
        let role = Role::from_str(&self.player_zero_role).map_err(|_| {
            StoreError::corrupt(format!("unknown role '{}'", self.player_zero_role))
        })?;
        let ai_depth = self
            .ai_depth
            .map(u8::try_from)
            .transpose()
            .map_err(|e| StoreError::corrupt(format!("ai_depth out of range: {}", e)))?;
        let clock = ClockSettings::new(
            from_column(self.clock_initial_seconds)?,
            from_column(self.clock_increment_seconds)?,
        );
        Ok(MatchRecord::from_parts(
            MatchId::new(self.id),
            UserId::new(self.creator_id),
            self.opponent_id.map(UserId::new),
            status,
            clock,
            self.clock_updated_at.map(|t| t.and_utc()),
            self.initial_state,
            self.winner_id.map(UserId::new),
            role,
            ai_depth,
            self.automated_opponent,
            self.created_at.and_utc(),
        ))
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = schema::moves)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
struct MoveRow {
    #[allow(dead_code)]
    id: i32,
    match_id: String,
    move_index: i32,
    acting_player_id: String,
    action: String,
    resulting_snapshot: String,
    created_at: NaiveDateTime,
}

impl MoveRow {
    fn into_record(self) -> Result<MoveRecord, StoreError> {
        let action: MoveAction = serde_json::from_str(&self.action)?;
        let snapshot = GameStateSnapshot::from_json(&self.resulting_snapshot)
            .map_err(|e| StoreError::corrupt(format!("move {}: {}", self.move_index, e)))?;
        Ok(MoveRecord::new(
            MatchId::new(self.match_id),
            from_column(self.move_index)?,
            UserId::new(self.acting_player_id),
            action,
            snapshot,
            self.created_at.and_utc(),
        ))
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::moves)]
struct NewMoveRow {
    match_id: String,
    move_index: i32,
    acting_player_id: String,
    action: String,
    resulting_snapshot: String,
    created_at: NaiveDateTime,
}

impl NewMoveRow {
    fn from_record(record: &MoveRecord) -> Result<Self, StoreError> {
        Ok(Self {
            match_id: record.match_id().to_string(),
            move_index: to_column(*record.move_index())?,
            acting_player_id: record.acting_player_id().to_string(),
            action: serde_json::to_string(record.action())?,
            resulting_snapshot: serde_json::to_string(record.resulting_snapshot())?,
            created_at: record.created_at().naive_utc(),
        })
    }
}

#[track_caller]
fn to_column(value: u32) -> Result<i32, StoreError> {
    i32::try_from(value)
        .map_err(|_| StoreError::new(format!("value {} exceeds the integer column range", value)))
}

#[track_caller]
fn from_column(value: i32) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::corrupt(format!("negative column value {}", value)))
}

fn write_match_columns(conn: &mut SqliteConnection, record: &MatchRecord) -> Result<(), StoreError> {
    use schema::matches::dsl;
    diesel::update(dsl::matches.find(record.id().as_str()))
        .set((
            dsl::opponent_id.eq(record.opponent_id().as_ref().map(UserId::as_str)),
            dsl::status.eq(record.status().to_string()),
            dsl::winner_id.eq(record.winner_id().as_ref().map(UserId::as_str)),
            dsl::clock_updated_at.eq(record.clock_updated_at().map(|t| t.naive_utc())),
        ))
        .execute(conn)?;
    Ok(())
}

/// Match store backed by a SQLite file.
///
/// A fresh connection is opened per call; the `(match_id, move_index)`
/// uniqueness constraint arbitrates racing writers.
#[derive(Debug, Clone)]
pub struct SqliteMatchStore {
    db_path: String,
}

impl SqliteMatchStore {
    /// Opens (creating if needed) the database at `db_path` and applies
    /// pending migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the file cannot be opened or migrated.
    #[instrument(skip(db_path), fields(db_path = %db_path))]
    pub fn open(db_path: String) -> Result<Self, StoreError> {
        info!("Opening SQLite match store");
        let store = Self { db_path };
        let mut conn = store.connection()?;
        conn.batch_execute("PRAGMA journal_mode = WAL;")?;
        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| StoreError::new(format!("Migrations failed: {}", e)))?;
        info!(count = applied.len(), "Migrations applied");
        Ok(store)
    }

    #[instrument(skip(self))]
    fn connection(&self) -> Result<SqliteConnection, StoreError> {
        debug!(path = %self.db_path, "Establishing connection");
        let mut conn = SqliteConnection::establish(&self.db_path).map_err(|e| {
            StoreError::new(format!("Failed to connect to '{}': {}", self.db_path, e))
        })?;
        conn.batch_execute("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")?;
        Ok(conn)
    }
}

impl MatchStore for SqliteMatchStore {
    #[instrument(skip(self, record), fields(match_id = %record.id()))]
    fn create_match(&self, record: &MatchRecord) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        diesel::insert_into(schema::matches::table)
            .values(&MatchRow::from_record(record)?)
            .execute(&mut conn)?;
        info!("Match created");
        Ok(())
    }

    #[instrument(skip(self))]
    fn load_match(&self, id: &MatchId) -> Result<Option<MatchRecord>, StoreError> {
        let mut conn = self.connection()?;
        schema::matches::table
            .find(id.as_str())
            .select(MatchRow::as_select())
            .first(&mut conn)
            .optional()?
            .map(MatchRow::into_record)
            .transpose()
    }

    #[instrument(skip(self))]
    fn load_submission_context(
        &self,
        id: &MatchId,
    ) -> Result<Option<(MatchRecord, Option<MoveRecord>)>, StoreError> {
        let mut conn = self.connection()?;
        conn.transaction::<_, StoreError, _>(|conn| {
            let Some(row) = schema::matches::table
                .find(id.as_str())
                .select(MatchRow::as_select())
                .first(conn)
                .optional()?
            else {
                return Ok(None);
            };
            let last = schema::moves::table
                .filter(schema::moves::match_id.eq(id.as_str()))
                .order(schema::moves::move_index.desc())
                .select(MoveRow::as_select())
                .first(conn)
                .optional()?;
            let record = row.into_record()?;
            let last = last.map(MoveRow::into_record).transpose()?;
            debug!(last_move = ?last.as_ref().map(|m| *m.move_index()), "Context loaded");
            Ok(Some((record, last)))
        })
    }

    #[instrument(skip(self))]
    fn list_moves(&self, id: &MatchId, from: u32) -> Result<Vec<MoveRecord>, StoreError> {
        let mut conn = self.connection()?;
        schema::moves::table
            .filter(schema::moves::match_id.eq(id.as_str()))
            .filter(schema::moves::move_index.ge(to_column(from)?))
            .order(schema::moves::move_index.asc())
            .select(MoveRow::as_select())
            .load(&mut conn)?
            .into_iter()
            .map(MoveRow::into_record)
            .collect()
    }

    #[instrument(skip(self))]
    fn move_at(&self, id: &MatchId, index: u32) -> Result<Option<MoveRecord>, StoreError> {
        let mut conn = self.connection()?;
        schema::moves::table
            .filter(schema::moves::match_id.eq(id.as_str()))
            .filter(schema::moves::move_index.eq(to_column(index)?))
            .select(MoveRow::as_select())
            .first(&mut conn)
            .optional()?
            .map(MoveRow::into_record)
            .transpose()
    }

    #[instrument(skip(self, records, updated), fields(count = records.len()))]
    fn append_moves(
        &self,
        records: &[MoveRecord],
        updated: Option<&MatchRecord>,
    ) -> Result<(), StoreError> {
        let rows = records
            .iter()
            .map(NewMoveRow::from_record)
            .collect::<Result<Vec<_>, _>>()?;
        let mut conn = self.connection()?;
        conn.transaction::<_, StoreError, _>(|conn| {
            if !rows.is_empty() {
                diesel::insert_into(schema::moves::table)
                    .values(&rows)
                    .execute(conn)?;
            }
            if let Some(record) = updated {
                write_match_columns(conn, record)?;
            }
            Ok(())
        })?;
        debug!("Move batch persisted");
        Ok(())
    }

    #[instrument(skip(self, record), fields(match_id = %record.id(), status = %record.status()))]
    fn update_match(&self, record: &MatchRecord) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        write_match_columns(&mut conn, record)
    }

    #[instrument(skip(self))]
    fn delete_moves_from(&self, id: &MatchId, from: u32) -> Result<Vec<u32>, StoreError> {
        use schema::moves::dsl;
        let from = to_column(from)?;
        let mut conn = self.connection()?;
        conn.transaction::<_, StoreError, _>(|conn| {
            let tail = dsl::moves
                .filter(dsl::match_id.eq(id.as_str()))
                .filter(dsl::move_index.ge(from));
            let indexes: Vec<i32> = tail
                .clone()
                .select(dsl::move_index)
                .order(dsl::move_index.asc())
                .load(conn)?;
            let deleted = diesel::delete(tail).execute(conn)?;
            info!(deleted, "Move tail deleted");
            indexes.into_iter().map(from_column).collect()
        })
    }

    #[instrument(skip(self))]
    fn claim_opponent(
        &self,
        id: &MatchId,
        user: &UserId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        use schema::matches::dsl;
        let mut conn = self.connection()?;
        let updated = diesel::update(
            dsl::matches
                .find(id.as_str())
                .filter(dsl::opponent_id.is_null())
                .filter(dsl::status.eq(MatchStatus::Waiting.to_string())),
        )
        .set((
            dsl::opponent_id.eq(Some(user.as_str())),
            dsl::status.eq(MatchStatus::InProgress.to_string()),
            dsl::clock_updated_at.eq(Some(now.naive_utc())),
        ))
        .execute(&mut conn)?;
        Ok(updated == 1)
    }
}
