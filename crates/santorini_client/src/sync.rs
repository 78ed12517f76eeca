//! Optimistic local play reconciled against the authoritative server.
//!
//! Moves are applied to a local engine immediately and queued. One
//! submission is in flight at a time; the rest wait in FIFO order. Every
//! authoritative update goes through one decision: if it equals a position
//! the client already predicted, the covered moves are confirmed in place
//! (fast path); otherwise the local engine is rebuilt from the server's
//! snapshot and whatever still chains onto it is replayed.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use derive_getters::Getters;
use derive_more::Display;
use santorini_engine::{
    ActionIndex, ClockPair, GameEngine, GameStateSnapshot, MatchId, MatchState, MatchStatus,
    MovePayload, Role, SubmissionOutcome, SubmitMoveRequest, SubmittedAction, elapsed_ms, tick,
};
use tracing::{debug, info, instrument, warn};

use crate::error::{SyncError, TransportError};
use crate::transport::MoveTransport;

/// Input gate of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum SyncState {
    /// Local input is accepted.
    #[default]
    #[display("synced")]
    Synced,
    /// Remote state is being replayed; local input is suspended.
    #[display("reconciling")]
    Reconciling,
}

/// How an authoritative update was absorbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// The response was superseded by a resync and ignored.
    Stale,
    /// The update matched a predicted position; `confirmed` moves were
    /// acknowledged without touching the local engine.
    FastPath {
        /// Unconfirmed moves the update covered.
        confirmed: usize,
    },
    /// The local engine was rebuilt from the server snapshot.
    Replayed {
        /// Unconfirmed moves that no longer chained onto the server state.
        discarded: usize,
    },
}

#[derive(Debug, Clone)]
struct PendingMove {
    actions: Vec<ActionIndex>,
    /// Local position the move was played from.
    before: GameStateSnapshot,
}

/// A submission handed out by [`SyncEngine::next_submission`].
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
pub struct Submission {
    /// Resync generation the submission belongs to.
    epoch: u64,
    request: SubmitMoveRequest,
}

/// Client-side view of one match.
#[derive(Debug)]
pub struct SyncEngine {
    match_id: MatchId,
    seat: Role,
    engine: GameEngine,
    state: SyncState,
    last_move_index: Option<u32>,
    in_flight: Option<PendingMove>,
    pending: VecDeque<PendingMove>,
    needs_resync: bool,
    epoch: u64,
    status: MatchStatus,
    clocks: Option<ClockPair>,
    clock_anchor: Option<DateTime<Utc>>,
}

impl SyncEngine {
    /// Starts from a fetched match state, playing the `seat` side.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Engine`] if the snapshot fails validation.
    #[instrument(skip(state), fields(match_id = %state.match_id))]
    pub fn new(state: MatchState, seat: Role) -> Result<Self, SyncError> {
        let engine = GameEngine::from_snapshot(state.snapshot)?;
        info!(%seat, last_move_index = ?state.last_move_index, "Sync engine started");
        Ok(Self {
            match_id: state.match_id,
            seat,
            engine,
            state: SyncState::Synced,
            last_move_index: state.last_move_index,
            in_flight: None,
            pending: VecDeque::new(),
            needs_resync: false,
            epoch: 0,
            status: state.status,
            clocks: state.clocks,
            clock_anchor: state.clock_running_since,
        })
    }

    /// Match this engine tracks.
    pub fn match_id(&self) -> &MatchId {
        &self.match_id
    }

    /// Side played locally.
    pub fn seat(&self) -> Role {
        self.seat
    }

    /// Local (possibly optimistic) position.
    pub fn snapshot(&self) -> &GameStateSnapshot {
        self.engine.snapshot()
    }

    /// Last position the server has confirmed.
    pub fn confirmed_snapshot(&self) -> &GameStateSnapshot {
        self.in_flight
            .iter()
            .chain(self.pending.iter())
            .map(|m| &m.before)
            .next()
            .unwrap_or_else(|| self.engine.snapshot())
    }

    /// Input gate.
    pub fn sync_state(&self) -> SyncState {
        self.state
    }

    /// Index of the last confirmed move.
    pub fn last_move_index(&self) -> Option<u32> {
        self.last_move_index
    }

    /// Lifecycle status last reported by the server.
    pub fn status(&self) -> MatchStatus {
        self.status
    }

    /// Moves applied locally but not yet confirmed, the in-flight one included.
    pub fn unconfirmed(&self) -> usize {
        usize::from(self.in_flight.is_some()) + self.pending.len()
    }

    /// True while a submission awaits its response.
    pub fn is_submitting(&self) -> bool {
        self.in_flight.is_some()
    }

    /// True after a rollback until the next successful reconcile.
    pub fn needs_resync(&self) -> bool {
        self.needs_resync
    }

    // ─────────────────────────────────────────────────────────────
    // Local input
    // ─────────────────────────────────────────────────────────────

    /// Applies `actions` locally and queues them as one submission.
    ///
    /// # Errors
    ///
    /// Refused while reconciling, after a rollback, when the local seat is
    /// not on move, or when the engine rejects the actions. Nothing is
    /// queued on error.
    #[instrument(skip(self), fields(match_id = %self.match_id))]
    pub fn apply_local(&mut self, actions: &[ActionIndex]) -> Result<(), SyncError> {
        if self.state == SyncState::Reconciling {
            return Err(SyncError::Reconciling);
        }
        if self.needs_resync {
            return Err(SyncError::ResyncRequired);
        }
        if actions.is_empty() {
            return Ok(());
        }
        let before = self.engine.snapshot().clone();
        let mut next = before.clone();
        for action in actions {
            let active = next.active_role();
            if active != self.seat {
                return Err(SyncError::NotYourTurn(active));
            }
            next = next.apply(*action)?;
        }
        self.engine = GameEngine::from_snapshot(next)?;
        self.pending.push_back(PendingMove {
            actions: actions.to_vec(),
            before,
        });
        debug!(queued = self.pending.len(), "Move applied locally");
        Ok(())
    }

    /// Takes the submission lock and hands out the oldest queued move.
    ///
    /// Returns `None` while another submission is in flight, while
    /// reconciling, after a rollback, or when nothing is queued.
    pub fn next_submission(&mut self) -> Option<Submission> {
        if self.in_flight.is_some() || self.needs_resync || self.state == SyncState::Reconciling {
            return None;
        }
        let next = self.pending.pop_front()?;
        let payload = match next.actions.as_slice() {
            [single] => MovePayload::Single(*single),
            many => MovePayload::Sequence(many.to_vec()),
        };
        let request = SubmitMoveRequest {
            move_index: Some(self.last_move_index.map_or(0, |i| i + 1)),
            action: SubmittedAction::play(payload),
        };
        debug!(move_index = ?request.move_index, "Submission lock taken");
        self.in_flight = Some(next);
        Some(Submission {
            epoch: self.epoch,
            request,
        })
    }

    /// Feeds the server's answer to `submission` back in and releases the
    /// submission lock.
    ///
    /// # Errors
    ///
    /// A failed submission rolls the engine back to the position cached
    /// for that move, drops every move queued after it and returns the
    /// failure; [`Self::reconcile`] must succeed before new input.
    #[instrument(skip(self, submission, result), fields(match_id = %self.match_id, epoch = submission.epoch))]
    pub fn complete_submission(
        &mut self,
        submission: &Submission,
        result: Result<SubmissionOutcome, TransportError>,
    ) -> Result<Reconciliation, SyncError> {
        if submission.epoch != self.epoch || self.in_flight.is_none() {
            debug!(current = self.epoch, "Disregarding response superseded by a resync");
            return Ok(Reconciliation::Stale);
        }

        match result {
            Ok(SubmissionOutcome::Moved(accepted)) => {
                self.in_flight = None;
                let accepted = *accepted;
                let latest = accepted.automated_reply.as_ref().unwrap_or(&accepted.record);
                let index = *latest.move_index();
                self.clocks = *latest.action().clocks();
                self.clock_anchor = Some(*latest.created_at());
                if accepted.snapshot.is_terminal() {
                    self.status = MatchStatus::Completed;
                }
                let outcome = self.absorb(accepted.snapshot, Some(index))?;
                info!(move_index = index, ?outcome, "Submission confirmed");
                Ok(match outcome {
                    Reconciliation::FastPath { confirmed } => Reconciliation::FastPath {
                        confirmed: confirmed + 1,
                    },
                    other => other,
                })
            }
            Ok(other) => {
                warn!(?other, "Move submission answered with an undo outcome");
                self.rollback()?;
                Err(SyncError::ResyncRequired)
            }
            Err(err) => {
                warn!(error = %err, "Submission failed, rolling back");
                self.rollback()?;
                Err(err.into())
            }
        }
    }

    /// Submits queued moves one at a time until the queue drains.
    ///
    /// Returns the number of confirmed submissions.
    pub async fn flush<T: MoveTransport + ?Sized>(
        &mut self,
        transport: &T,
    ) -> Result<usize, SyncError> {
        let mut sent = 0;
        while let Some(submission) = self.next_submission() {
            let result = transport.submit(&self.match_id, submission.request()).await;
            self.complete_submission(&submission, result)?;
            sent += 1;
        }
        Ok(sent)
    }

    // ─────────────────────────────────────────────────────────────
    // Reconciliation
    // ─────────────────────────────────────────────────────────────

    /// Suspends local input ahead of a remote update.
    pub fn begin_reconcile(&mut self) {
        debug!("Input suspended for reconciliation");
        self.state = SyncState::Reconciling;
    }

    /// Absorbs an authoritative match state. The one entry point for pushed
    /// and fetched updates.
    ///
    /// # Errors
    ///
    /// Fails on a state for another match or an invalid snapshot; the
    /// engine stays in [`SyncState::Reconciling`] in that case.
    #[instrument(skip(self, update), fields(match_id = %self.match_id, last_move_index = ?update.last_move_index))]
    pub fn reconcile(&mut self, update: MatchState) -> Result<Reconciliation, SyncError> {
        if update.match_id != self.match_id {
            return Err(SyncError::ForeignMatch(update.match_id.to_string()));
        }
        self.begin_reconcile();
        self.status = update.status;
        self.clocks = update.clocks;
        self.clock_anchor = update.clock_running_since;
        let outcome = self.absorb(update.snapshot, update.last_move_index)?;
        self.needs_resync = false;
        info!(?outcome, "Reconciled");
        Ok(outcome)
    }

    /// Fetches the match and reconciles against it.
    pub async fn resync<T: MoveTransport + ?Sized>(
        &mut self,
        transport: &T,
    ) -> Result<Reconciliation, SyncError> {
        self.begin_reconcile();
        let update = transport.fetch_state(&self.match_id).await?;
        self.reconcile(update)
    }

    /// Answers the opponent's undo request.
    ///
    /// Only possible with nothing unconfirmed. An accepted undo rewinds the
    /// local engine to the restored snapshot.
    pub async fn answer_undo<T: MoveTransport + ?Sized>(
        &mut self,
        transport: &T,
        accept: bool,
        move_index: Option<u32>,
    ) -> Result<Option<Reconciliation>, SyncError> {
        if self.state == SyncState::Reconciling {
            return Err(SyncError::Reconciling);
        }
        if self.needs_resync || self.unconfirmed() > 0 {
            return Err(SyncError::ResyncRequired);
        }
        let action = if accept {
            SubmittedAction::UndoAccept { move_index }
        } else {
            SubmittedAction::UndoReject { move_index }
        };
        let request = SubmitMoveRequest {
            move_index: None,
            action,
        };
        match transport.submit(&self.match_id, &request).await? {
            SubmissionOutcome::Undone(undone) => {
                let undone = *undone;
                self.begin_reconcile();
                self.status = MatchStatus::InProgress;
                let outcome = self.absorb(undone.snapshot, undone.move_index.checked_sub(1))?;
                info!(removed = ?undone.removed_move_indexes, "Undo applied locally");
                Ok(Some(outcome))
            }
            SubmissionOutcome::Rejected(_) => Ok(None),
            SubmissionOutcome::Moved(_) => {
                self.needs_resync = true;
                Err(SyncError::ResyncRequired)
            }
        }
    }

    /// Local clock readout at `now`. Display only; the server recomputes
    /// its own pair on every move.
    pub fn clock_display(&self, now: DateTime<Utc>) -> Option<ClockPair> {
        let clocks = self.clocks?;
        match (self.status, self.clock_anchor) {
            (MatchStatus::InProgress, Some(anchor)) => {
                let running = self.confirmed_snapshot().active_role();
                Some(tick(clocks, running, elapsed_ms(anchor, now)))
            }
            _ => Some(clocks),
        }
    }

    /// Moves the engine onto `authoritative`, choosing fast path or replay.
    fn absorb(
        &mut self,
        authoritative: GameStateSnapshot,
        last_move_index: Option<u32>,
    ) -> Result<Reconciliation, SyncError> {
        self.last_move_index = last_move_index;

        // Predicted positions: before each unconfirmed move, then current.
        let matched = self
            .in_flight
            .iter()
            .chain(self.pending.iter())
            .map(|m| &m.before)
            .chain(std::iter::once(self.engine.snapshot()))
            .position(|p| *p == authoritative);

        let outcome = match matched {
            Some(confirmed) => {
                let mut remaining = confirmed;
                if remaining > 0 && self.in_flight.take().is_some() {
                    // Its response, when it arrives, is already accounted for.
                    self.epoch += 1;
                    remaining -= 1;
                }
                self.pending.drain(..remaining);
                Reconciliation::FastPath { confirmed }
            }
            None => {
                let mut discarded = 0;
                if self.in_flight.take().is_some() {
                    self.epoch += 1;
                    discarded += 1;
                }
                self.engine = GameEngine::from_snapshot(authoritative)?;
                for queued in std::mem::take(&mut self.pending) {
                    let chains = queued.before == *self.engine.snapshot();
                    if chains && self.engine.apply_moves(&queued.actions).is_ok() {
                        self.pending.push_back(queued);
                    } else {
                        discarded += 1;
                    }
                }
                Reconciliation::Replayed { discarded }
            }
        };
        self.state = SyncState::Synced;
        Ok(outcome)
    }

    fn rollback(&mut self) -> Result<(), SyncError> {
        if let Some(failed) = self.in_flight.take() {
            let dropped = self.pending.len();
            self.pending.clear();
            self.engine = GameEngine::from_snapshot(failed.before)?;
            debug!(dropped, "Rolled back to pre-move snapshot");
        }
        self.needs_resync = true;
        Ok(())
    }
}
