//! Move-submission pipeline and its companion match operations.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, TimeDelta, Utc};
use derive_getters::Getters;
use santorini_engine::{
    ActionIndex, ClockPair, ClockSettings, CreateMatchRequest, EngineError, GameStateSnapshot,
    MatchId, MatchState, MatchStatus, MoveAccepted, MoveAction, MovePayload, MoveRecord, Role,
    SequenceMismatch, SnapshotMetadata, SubmissionOutcome, SubmitMoveRequest, SubmittedAction,
    UndoAccepted, UndoRejected, UserId, charge_move, elapsed_ms, reference_time,
};
use tracing::{debug, info, instrument, warn};

use crate::cache::TtlLruCache;
use crate::config::ServerConfig;
use crate::error::SubmissionError;
use crate::notify::{LoggingNotifier, Notification, NotificationKind, Notifier};
use crate::penalty::{PenaltySettings, PenaltyTracker, StrikeOutcome};
use crate::search::{MoveSearch, search_input};
use crate::session::{IdentityVerifier, SessionCache};
use crate::store::{AUTOMATED_OPPONENT_ID, MatchRecord, MatchStore, NewMatch};
use crate::time::Clock;

/// Tunables of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Getters)]
pub struct ServiceSettings {
    session_ttl: TimeDelta,
    session_capacity: usize,
    match_ttl: TimeDelta,
    match_capacity: usize,
    penalty: PenaltySettings,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for ServiceSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            session_ttl: config.cache().session_ttl(),
            session_capacity: *config.cache().session_capacity(),
            match_ttl: config.cache().match_ttl(),
            match_capacity: *config.cache().match_capacity(),
            penalty: *config.penalty(),
        }
    }
}

/// Match row plus its latest move, as held in the context cache.
#[derive(Debug, Clone)]
struct SubmissionContext {
    record: MatchRecord,
    last_move: Option<MoveRecord>,
}

impl SubmissionContext {
    fn expected_index(&self) -> u32 {
        self.last_move
            .as_ref()
            .map_or(0, |m| m.move_index() + 1)
    }

    fn initial_snapshot(&self) -> Result<GameStateSnapshot, SubmissionError> {
        GameStateSnapshot::from_json(self.record.initial_state()).map_err(|e| {
            SubmissionError::Internal(format!(
                "initial state of match {} is unreadable: {}",
                self.record.id(),
                e
            ))
        })
    }
}

/// Server-authoritative move submission.
///
/// Holds the injected collaborators and the process-local caches. Every
/// public operation is synchronous; the HTTP layer runs them on the
/// blocking pool.
#[derive(Debug)]
pub struct MoveSubmissionService {
    store: Arc<dyn MatchStore>,
    sessions: SessionCache,
    contexts: TtlLruCache<MatchId, SubmissionContext>,
    penalties: PenaltyTracker,
    notifier: Arc<dyn Notifier>,
    search: Option<Arc<dyn MoveSearch>>,
    clock: Arc<dyn Clock>,
    id_seq: AtomicU64,
}

impl MoveSubmissionService {
    /// Creates a service with a logging notifier and no automated replies.
    #[instrument(skip_all)]
    pub fn new(
        store: Arc<dyn MatchStore>,
        verifier: Arc<dyn IdentityVerifier>,
        clock: Arc<dyn Clock>,
        settings: ServiceSettings,
    ) -> Self {
        info!(?settings, "Creating move submission service");
        Self {
            sessions: SessionCache::new(
                verifier,
                clock.clone(),
                settings.session_ttl,
                settings.session_capacity,
            ),
            contexts: TtlLruCache::new(
                "match_contexts",
                settings.match_ttl,
                settings.match_capacity,
                clock.clone(),
            ),
            penalties: PenaltyTracker::new(settings.penalty, clock.clone()),
            notifier: Arc::new(LoggingNotifier),
            search: None,
            store,
            clock,
            id_seq: AtomicU64::new(0),
        }
    }

    /// Replaces the notifier.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Enables automated replies for automated-opponent matches.
    pub fn with_move_search(mut self, search: Arc<dyn MoveSearch>) -> Self {
        self.search = Some(search);
        self
    }

    /// Penalty tracker, exposed for inspection.
    pub fn penalties(&self) -> &PenaltyTracker {
        &self.penalties
    }

    // ─────────────────────────────────────────────────────────────
    // Submission
    // ─────────────────────────────────────────────────────────────

    /// Validates and persists one submission.
    ///
    /// # Errors
    ///
    /// Returns [`SubmissionError`] for every failed step; see its variants
    /// for the HTTP category of each.
    #[instrument(skip(self, token, request), fields(match_id = %match_id, move_index = ?request.move_index))]
    pub fn submit(
        &self,
        token: &str,
        match_id: &MatchId,
        request: SubmitMoveRequest,
    ) -> Result<SubmissionOutcome, SubmissionError> {
        let user = self.sessions.resolve(token)?;

        if let Some(until) = self.penalties.blocked_until(&user) {
            warn!(user_id = %user, %until, "Rejected submission from blocked user");
            return Err(SubmissionError::RateLimited { until });
        }

        let context = self.load_context(match_id)?;
        let role = context
            .record
            .role_of(&user)
            .ok_or(SubmissionError::NotParticipant)?;
        let is_undo = !matches!(request.action, SubmittedAction::Move { .. });
        ensure_accepting(&context.record, is_undo)?;
        let initial = context.initial_snapshot()?;

        match request.action {
            SubmittedAction::UndoReject { .. } => Ok(self.reject_undo(&context.record, &user)),
            SubmittedAction::UndoAccept { move_index } => {
                self.accept_undo(context, &user, initial, move_index)
            }
            SubmittedAction::Move { payload, by, .. } => self.play(
                context,
                PlayRequest {
                    user,
                    role,
                    declared_index: request.move_index,
                    payload,
                    by,
                },
                initial,
            ),
        }
    }

    fn play(
        &self,
        context: SubmissionContext,
        request: PlayRequest,
        initial: GameStateSnapshot,
    ) -> Result<SubmissionOutcome, SubmissionError> {
        let match_id = context.record.id().clone();
        let expected = context.expected_index();
        if let Some(received) = request.declared_index
            && received != expected
        {
            self.contexts.invalidate(&match_id);
            warn!(expected, received, "Move index out of sequence");
            return Err(SubmissionError::MoveOutOfSequence(SequenceMismatch {
                expected,
                received,
            }));
        }

        let actions = request.payload.actions();
        if actions.is_empty() {
            return Err(SubmissionError::InvalidRequest(
                "move list is empty".to_string(),
            ));
        }

        let snapshot = match &context.last_move {
            Some(last) => last.resulting_snapshot().clone(),
            None => initial,
        };
        let active = snapshot.active_role();
        let acting = acting_role(&context.record, request.role, request.by, active)?;
        let next = self.apply_turn(snapshot, &actions, acting, &request.user)?;

        let now = self.clock.now();
        let clocks = clocks_after(&context.record, context.last_move.as_ref(), acting, now);
        let controller = *context.record.automated_opponent() && request.role == Role::Creator;
        let by = controller.then_some(acting);
        let record = MoveRecord::new(
            match_id.clone(),
            expected,
            request.user.clone(),
            MoveAction::new(request.payload, by, clocks),
            next,
            now,
        );

        let mut match_row = context.record;
        let automated_reply = self.automated_reply(
            &match_row,
            record.resulting_snapshot(),
            Some(&record),
            expected + 1,
            now,
        )?;
        let latest = automated_reply.as_ref().unwrap_or(&record).clone();

        let completed = latest.resulting_snapshot().is_terminal();
        if completed {
            let winner = latest
                .resulting_snapshot()
                .winning_role()
                .and_then(|r| match_row.user_for(r).cloned());
            match_row.complete(winner);
        }
        let batch: Vec<MoveRecord> = std::iter::once(record.clone())
            .chain(automated_reply.clone())
            .collect();
        self.persist(&batch, completed.then_some(&match_row))?;
        info!(
            move_index = expected,
            role = %acting,
            actions = actions.len(),
            automated_reply = automated_reply.is_some(),
            "Move accepted"
        );
        if completed {
            info!(winner = ?match_row.winner_id(), "Match completed");
        }

        self.refresh_context(match_row.clone(), latest.clone());
        self.penalties.clear(&request.user);
        self.notify_others(
            &match_row,
            &request.user,
            NotificationKind::MoveMade,
            Some(*latest.move_index()),
        );

        Ok(SubmissionOutcome::Moved(Box::new(MoveAccepted {
            snapshot: latest.resulting_snapshot().clone(),
            record,
            automated_reply,
        })))
    }

    /// Applies `actions` in order; every one of them must be played while
    /// `acting` is on move. Nothing is kept unless the whole batch passes.
    fn apply_turn(
        &self,
        snapshot: GameStateSnapshot,
        actions: &[ActionIndex],
        acting: Role,
        user: &UserId,
    ) -> Result<GameStateSnapshot, SubmissionError> {
        let mut current = snapshot;
        for (position, action) in actions.iter().enumerate() {
            let active = current.active_role();
            if active != acting {
                warn!(position, %acting, %active, "Batch runs past the acting side's turn");
                return Err(SubmissionError::NotYourTurn { expected: active });
            }
            current = current
                .apply(*action)
                .map_err(|e| self.strike(user, e))?;
        }
        Ok(current)
    }

    fn strike(&self, user: &UserId, error: EngineError) -> SubmissionError {
        match self.penalties.record_strike(user) {
            StrikeOutcome::Blocked { until } => SubmissionError::RateLimited { until },
            StrikeOutcome::Counted { strikes } => {
                debug!(strikes, %error, "Invalid move");
                SubmissionError::InvalidMove(error.to_string())
            }
        }
    }

    fn persist(
        &self,
        records: &[MoveRecord],
        updated: Option<&MatchRecord>,
    ) -> Result<(), SubmissionError> {
        let Some(first) = records.first() else {
            return Ok(());
        };
        match self.store.append_moves(records, updated) {
            Ok(()) => Ok(()),
            Err(e) if e.is_conflict() => {
                self.contexts.invalidate(first.match_id());
                warn!(move_index = first.move_index(), "Lost race for move index");
                Err(SubmissionError::MoveConflict {
                    move_index: *first.move_index(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Plays every consecutive automated-opponent action after `after` and
    /// folds them into one record at `next_index`. The caller persists it.
    fn automated_reply(
        &self,
        record: &MatchRecord,
        after: &GameStateSnapshot,
        previous: Option<&MoveRecord>,
        next_index: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<MoveRecord>, SubmissionError> {
        let Some(search) = &self.search else {
            return Ok(None);
        };
        if !record.automated_opponent() {
            return Ok(None);
        }

        let mut snapshot = after.clone();
        let mut actions = Vec::new();
        while !snapshot.is_terminal() && snapshot.active_role() == Role::Opponent {
            let state = search_input(&snapshot);
            let Some(action) = search.choose(&state, snapshot.valid_moves(), snapshot.metadata())
            else {
                break;
            };
            snapshot = snapshot.apply(action).map_err(|e| {
                SubmissionError::Internal(format!("automated opponent chose an illegal move: {}", e))
            })?;
            actions.push(action);
        }
        let payload = match actions.len() {
            0 => return Ok(None),
            1 => MovePayload::Single(actions[0]),
            _ => MovePayload::Sequence(actions),
        };

        let clocks = clocks_after(record, previous, Role::Opponent, now);
        let opponent = record
            .opponent_id()
            .clone()
            .unwrap_or_else(|| UserId::new(AUTOMATED_OPPONENT_ID));
        let reply = MoveRecord::new(
            record.id().clone(),
            next_index,
            opponent,
            MoveAction::new(payload, Some(Role::Opponent), clocks),
            snapshot,
            now,
        );
        debug!(move_index = next_index, "Automated reply chosen");
        Ok(Some(reply))
    }

    // ─────────────────────────────────────────────────────────────
    // Undo
    // ─────────────────────────────────────────────────────────────

    fn reject_undo(&self, record: &MatchRecord, user: &UserId) -> SubmissionOutcome {
        info!(user_id = %user, "Undo request rejected");
        self.notify_others(record, user, NotificationKind::UndoRejected, None);
        SubmissionOutcome::Rejected(UndoRejected::default())
    }

    #[instrument(skip(self, context, initial), fields(match_id = %context.record.id()))]
    fn accept_undo(
        &self,
        context: SubmissionContext,
        user: &UserId,
        initial: GameStateSnapshot,
        move_index: Option<u32>,
    ) -> Result<SubmissionOutcome, SubmissionError> {
        let match_id = context.record.id().clone();
        let last_index = context
            .last_move
            .as_ref()
            .map(|m| *m.move_index())
            .ok_or_else(|| SubmissionError::NotFound("match has no moves to undo".to_string()))?;
        let target = move_index.unwrap_or(last_index);

        let tail = self.store.list_moves(&match_id, target)?;
        let requester = match tail.first() {
            Some(first) if *first.move_index() == target => first.acting_player_id().clone(),
            _ => return Err(SubmissionError::NotFound(format!("move {}", target))),
        };
        if let Some(placement) = tail.iter().find(|m| !m.is_play_phase()) {
            return Err(SubmissionError::UndoNotAllowed(format!(
                "move {} belongs to the placement phase",
                placement.move_index()
            )));
        }

        let removed = self.store.delete_moves_from(&match_id, target)?;
        let snapshot = match target.checked_sub(1) {
            None => initial,
            Some(previous) => self
                .store
                .move_at(&match_id, previous)?
                .map(|m| m.resulting_snapshot().clone())
                .ok_or_else(|| {
                    SubmissionError::Internal(format!("move {} missing below undo target", previous))
                })?,
        };

        let mut record = context.record;
        record.reopen(self.clock.now());
        self.store.update_match(&record)?;
        self.penalties.clear(&requester);
        self.contexts.invalidate(&match_id);
        info!(target, removed = ?removed, "Undo applied");
        self.notify_others(&record, user, NotificationKind::Undone, Some(target));

        Ok(SubmissionOutcome::Undone(Box::new(UndoAccepted {
            undone: true,
            move_index: target,
            removed_move_indexes: removed,
            snapshot,
        })))
    }

    // ─────────────────────────────────────────────────────────────
    // Match lifecycle
    // ─────────────────────────────────────────────────────────────

    /// Opens a new match owned by the caller.
    #[instrument(skip(self, token))]
    pub fn create_match(
        &self,
        token: &str,
        request: CreateMatchRequest,
    ) -> Result<MatchState, SubmissionError> {
        let user = self.sessions.resolve(token)?;
        let metadata = SnapshotMetadata::new(
            request.player_zero_role.unwrap_or(Role::Creator),
            request.ai_depth,
        );
        let initial = GameStateSnapshot::new(metadata);
        let initial_state = initial
            .to_json()
            .map_err(|e| SubmissionError::Internal(e.to_string()))?;
        let now = self.clock.now();
        let record = MatchRecord::open(NewMatch {
            id: self.next_match_id(now),
            creator_id: user,
            clock: ClockSettings::new(
                request.clock_initial_seconds,
                request.clock_increment_seconds,
            ),
            initial_state,
            player_zero_role: *metadata.player_zero_role(),
            ai_depth: request.ai_depth,
            automated_opponent: request.automated_opponent,
            created_at: now,
        });
        self.store.create_match(&record)?;
        info!(match_id = %record.id(), automated = request.automated_opponent, "Match created");

        let opening = self.automated_reply(&record, &initial, None, 0, now)?;
        if let Some(opening) = &opening {
            self.persist(std::slice::from_ref(opening), None)?;
            info!("Automated opening persisted");
        }
        state_of(&record, opening.as_ref(), &initial)
    }

    /// Seats the caller as opponent of a waiting match.
    #[instrument(skip(self, token), fields(match_id = %match_id))]
    pub fn join_match(&self, token: &str, match_id: &MatchId) -> Result<MatchState, SubmissionError> {
        let user = self.sessions.resolve(token)?;
        let record = self
            .store
            .load_match(match_id)?
            .ok_or_else(|| SubmissionError::NotFound(format!("match {}", match_id)))?;

        if record.role_of(&user).is_none() {
            let claimed = self.store.claim_opponent(match_id, &user, self.clock.now())?;
            self.contexts.invalidate(match_id);
            if !claimed {
                let current = self
                    .store
                    .load_match(match_id)?
                    .ok_or_else(|| SubmissionError::NotFound(format!("match {}", match_id)))?;
                if current.role_of(&user) != Some(Role::Opponent) {
                    warn!(user_id = %user, "Join lost: seat already taken");
                    return Err(SubmissionError::MatchNotActive(*current.status()));
                }
            } else {
                info!(user_id = %user, "Opponent joined");
                self.notify_others(&record, &user, NotificationKind::Joined, None);
            }
        }
        self.fetch_state(token, match_id)
    }

    /// Latest authoritative state of a match the caller takes part in.
    #[instrument(skip(self, token), fields(match_id = %match_id))]
    pub fn fetch_state(&self, token: &str, match_id: &MatchId) -> Result<MatchState, SubmissionError> {
        let user = self.sessions.resolve(token)?;
        let context = self.load_context(match_id)?;
        if context.record.role_of(&user).is_none() {
            return Err(SubmissionError::NotParticipant);
        }
        let initial = context.initial_snapshot()?;
        state_of(&context.record, context.last_move.as_ref(), &initial)
    }

    // ─────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────

    fn load_context(&self, match_id: &MatchId) -> Result<SubmissionContext, SubmissionError> {
        if let Some(context) = self.contexts.get(match_id) {
            debug!("Submission context served from cache");
            return Ok(context);
        }
        let (record, last_move) = self
            .store
            .load_submission_context(match_id)?
            .ok_or_else(|| SubmissionError::NotFound(format!("match {}", match_id)))?;
        let context = SubmissionContext { record, last_move };
        if !context.record.automated_opponent() {
            self.contexts.insert(match_id.clone(), context.clone());
        }
        Ok(context)
    }

    fn refresh_context(&self, record: MatchRecord, last_move: MoveRecord) {
        if *record.automated_opponent() {
            return;
        }
        self.contexts.insert(
            record.id().clone(),
            SubmissionContext {
                record,
                last_move: Some(last_move),
            },
        );
    }

    fn notify_others(
        &self,
        record: &MatchRecord,
        actor: &UserId,
        kind: NotificationKind,
        move_index: Option<u32>,
    ) {
        let recipients = [Some(record.creator_id()), record.opponent_id().as_ref()];
        for recipient in recipients.into_iter().flatten() {
            if recipient == actor || recipient.as_str() == AUTOMATED_OPPONENT_ID {
                continue;
            }
            let notification =
                Notification::new(record.id().clone(), recipient.clone(), kind, move_index);
            if let Err(e) = self.notifier.notify(&notification) {
                warn!(error = %e, recipient = %recipient, "Notification failed");
            }
        }
    }

    fn next_match_id(&self, now: DateTime<Utc>) -> MatchId {
        let seq = self.id_seq.fetch_add(1, Ordering::Relaxed);
        MatchId::new(format!("m{:x}{:04x}", now.timestamp_millis(), seq & 0xffff))
    }
}

struct PlayRequest {
    user: UserId,
    role: Role,
    declared_index: Option<u32>,
    payload: MovePayload,
    by: Option<Role>,
}

fn ensure_accepting(record: &MatchRecord, is_undo: bool) -> Result<(), SubmissionError> {
    let status = *record.status();
    let seated = record.opponent_id().is_some();
    let accepting = match status {
        MatchStatus::InProgress => true,
        MatchStatus::Completed => is_undo,
        MatchStatus::Waiting | MatchStatus::Abandoned => false,
    };
    if seated && accepting {
        Ok(())
    } else {
        Err(SubmissionError::MatchNotActive(status))
    }
}

/// Role the submission is played for.
///
/// The creator of an automated-opponent match controls both sides and may
/// name the side with `by`; everyone else must own the side to move.
fn acting_role(
    record: &MatchRecord,
    caller: Role,
    by: Option<Role>,
    active: Role,
) -> Result<Role, SubmissionError> {
    let controller = *record.automated_opponent() && caller == Role::Creator;
    let claimed = if controller { by.unwrap_or(active) } else { caller };
    if claimed == active {
        Ok(active)
    } else {
        Err(SubmissionError::NotYourTurn { expected: active })
    }
}

fn clocks_after(
    record: &MatchRecord,
    previous: Option<&MoveRecord>,
    mover: Role,
    now: DateTime<Utc>,
) -> Option<ClockPair> {
    let settings = *record.clock();
    if !settings.is_timed() {
        return None;
    }
    let since = reference_time(previous.map(|m| *m.created_at()), *record.clock_updated_at());
    let elapsed = since.map_or(0, |t| elapsed_ms(t, now));
    let prior = previous.and_then(|m| *m.action().clocks());
    Some(charge_move(settings, prior, mover, elapsed))
}

fn state_of(
    record: &MatchRecord,
    last: Option<&MoveRecord>,
    initial: &GameStateSnapshot,
) -> Result<MatchState, SubmissionError> {
    let snapshot = last.map_or_else(|| initial.clone(), |m| m.resulting_snapshot().clone());
    let settings = *record.clock();
    let clocks = last
        .and_then(|m| *m.action().clocks())
        .or_else(|| settings.is_timed().then(|| settings.initial_pair()));
    let clock_running_since = (*record.status() == MatchStatus::InProgress && settings.is_timed())
        .then(|| reference_time(last.map(|m| *m.created_at()), *record.clock_updated_at()))
        .flatten();
    Ok(MatchState {
        match_id: record.id().clone(),
        status: *record.status(),
        creator_id: record.creator_id().clone(),
        opponent_id: record.opponent_id().clone(),
        player_zero_role: *record.player_zero_role(),
        last_move_index: last.map(|m| *m.move_index()),
        snapshot,
        clocks,
        clock_running_since,
        winner_id: record.winner_id().clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(automated: bool) -> MatchRecord {
        MatchRecord::open(NewMatch {
            id: MatchId::new("m1"),
            creator_id: UserId::new("alice"),
            clock: ClockSettings::default(),
            initial_state: String::new(),
            player_zero_role: Role::Creator,
            ai_depth: None,
            automated_opponent: automated,
            created_at: Utc::now(),
        })
    }

    #[test]
    fn test_turn_owner_must_match() {
        let r = record(false);
        assert_eq!(
            acting_role(&r, Role::Creator, None, Role::Creator).expect("own turn"),
            Role::Creator
        );
        assert!(matches!(
            acting_role(&r, Role::Opponent, Some(Role::Creator), Role::Creator),
            Err(SubmissionError::NotYourTurn { expected: Role::Creator })
        ));
    }

    #[test]
    fn test_controller_may_move_for_automated_side() {
        let r = record(true);
        assert_eq!(
            acting_role(&r, Role::Creator, None, Role::Opponent).expect("controller"),
            Role::Opponent
        );
        assert!(acting_role(&r, Role::Creator, Some(Role::Creator), Role::Opponent).is_err());
    }

    #[test]
    fn test_waiting_match_rejects_moves() {
        let r = record(false);
        assert!(matches!(
            ensure_accepting(&r, false),
            Err(SubmissionError::MatchNotActive(MatchStatus::Waiting))
        ));
        assert!(ensure_accepting(&record(true), false).is_ok());
    }
}
