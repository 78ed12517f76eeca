//! Integration tests for the move-submission pipeline over the in-memory store.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use santorini_engine::{
    ActionIndex, ClockPair, CreateMatchRequest, Direction, GameStateSnapshot, MatchId, MatchStatus,
    MoveAccepted, MoveAction, MovePayload, MoveRecord, PlayAction, Role, SequenceMismatch,
    SubmissionOutcome, SubmitMoveRequest, SubmittedAction, UserId, WorkerSlot, encode,
    encode_placement,
};
use santorini_server::{
    AuthError, FirstLegalMoveSearch, ManualClock, MatchRecord, MatchStore, MemoryMatchStore,
    MoveSubmissionService, ServiceSettings, StaticTokenVerifier, StoreError, SubmissionError,
};

struct Fixture {
    service: MoveSubmissionService,
    store: Arc<MemoryMatchStore>,
    clock: Arc<ManualClock>,
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
        .single()
        .expect("valid instant")
}

fn verifier() -> Arc<StaticTokenVerifier> {
    Arc::new(
        StaticTokenVerifier::new()
            .with_token("alice-token", UserId::new("alice"), None)
            .with_token("bob-token", UserId::new("bob"), None)
            .with_token("carol-token", UserId::new("carol"), None),
    )
}

fn service_over(store: Arc<MemoryMatchStore>, clock: Arc<ManualClock>) -> MoveSubmissionService {
    MoveSubmissionService::new(store, verifier(), clock, ServiceSettings::default())
}

fn fixture() -> Fixture {
    let store = Arc::new(MemoryMatchStore::new());
    let clock = Arc::new(ManualClock::new(start()));
    Fixture {
        service: service_over(store.clone(), clock.clone()),
        store,
        clock,
    }
}

fn timed() -> CreateMatchRequest {
    CreateMatchRequest {
        clock_initial_seconds: 300,
        clock_increment_seconds: 5,
        ..CreateMatchRequest::default()
    }
}

/// Alice creates, Bob joins.
fn open_match(f: &Fixture, request: CreateMatchRequest) -> MatchId {
    let created = f
        .service
        .create_match("alice-token", request)
        .expect("create");
    assert_eq!(created.status, MatchStatus::Waiting);
    let joined = f
        .service
        .join_match("bob-token", &created.match_id)
        .expect("join");
    assert_eq!(joined.status, MatchStatus::InProgress);
    created.match_id
}

fn place(cell: usize) -> ActionIndex {
    encode_placement(cell).expect("cell on board")
}

fn step(move_direction: Direction, build_direction: Direction) -> ActionIndex {
    encode(PlayAction::new(WorkerSlot::First, move_direction, build_direction))
}

fn submit(
    f: &Fixture,
    token: &str,
    id: &MatchId,
    move_index: Option<u32>,
    action: ActionIndex,
) -> Result<SubmissionOutcome, SubmissionError> {
    f.service.submit(
        token,
        id,
        SubmitMoveRequest {
            move_index,
            action: SubmittedAction::play(action),
        },
    )
}

fn accepted(outcome: SubmissionOutcome) -> MoveAccepted {
    match outcome {
        SubmissionOutcome::Moved(accepted) => *accepted,
        other => panic!("expected an accepted move, got {:?}", other),
    }
}

/// Indexes 0..=3: Alice on cells 6 and 0, Bob on cells 16 and 24.
fn place_all(f: &Fixture, id: &MatchId) {
    let plan = [
        ("alice-token", 6),
        ("alice-token", 0),
        ("bob-token", 16),
        ("bob-token", 24),
    ];
    for (index, (token, cell)) in plan.into_iter().enumerate() {
        submit(f, token, id, Some(index as u32), place(cell)).expect("placement accepted");
    }
}

/// Indexes 4..=9: both sides shuffle their first worker east and west.
fn play_six(f: &Fixture, id: &MatchId) -> Vec<GameStateSnapshot> {
    let plan = [
        ("alice-token", step(Direction::East, Direction::South)),
        ("bob-token", step(Direction::East, Direction::South)),
        ("alice-token", step(Direction::West, Direction::North)),
        ("bob-token", step(Direction::West, Direction::South)),
        ("alice-token", step(Direction::East, Direction::North)),
        ("bob-token", step(Direction::East, Direction::SouthEast)),
    ];
    plan.into_iter()
        .enumerate()
        .map(|(offset, (token, action))| {
            let outcome = submit(f, token, id, Some(4 + offset as u32), action)
                .unwrap_or_else(|e| panic!("play {} rejected: {}", 4 + offset, e));
            accepted(outcome).snapshot
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────
// Happy path and clocks
// ─────────────────────────────────────────────────────────────

#[test]
fn test_first_move_charges_mover_clock() {
    let f = fixture();
    let id = open_match(&f, timed());
    f.clock.advance(TimeDelta::seconds(30));

    let moved = accepted(submit(&f, "alice-token", &id, Some(0), place(6)).expect("move"));
    assert_eq!(*moved.record.move_index(), 0);
    assert_eq!(
        *moved.record.action().clocks(),
        Some(ClockPair {
            creator_ms: 275_000,
            opponent_ms: 300_000,
        })
    );

    let state = f.service.fetch_state("bob-token", &id).expect("state");
    assert_eq!(state.last_move_index, Some(0));
    assert_eq!(state.clock_running_since, Some(start() + TimeDelta::seconds(30)));
}

#[test]
fn test_untimed_match_records_no_clocks() {
    let f = fixture();
    let id = open_match(&f, CreateMatchRequest::default());
    let moved = accepted(submit(&f, "alice-token", &id, None, place(12)).expect("move"));
    assert_eq!(*moved.record.action().clocks(), None);
}

#[test]
fn test_indexes_are_gap_free() {
    let f = fixture();
    let id = open_match(&f, CreateMatchRequest::default());
    place_all(&f, &id);
    play_six(&f, &id);

    let moves = f.store.list_moves(&id, 0).expect("moves");
    let indexes: Vec<u32> = moves.iter().map(|m| *m.move_index()).collect();
    assert_eq!(indexes, (0..10).collect::<Vec<_>>());
}

#[test]
fn test_sequence_payload_is_one_record() {
    let f = fixture();
    let id = open_match(&f, CreateMatchRequest::default());
    let outcome = f
        .service
        .submit(
            "alice-token",
            &id,
            SubmitMoveRequest {
                move_index: Some(0),
                action: SubmittedAction::play(MovePayload::Sequence(vec![place(6), place(0)])),
            },
        )
        .expect("sequence");
    let moved = accepted(outcome);
    assert_eq!(*moved.record.move_index(), 0);
    assert_eq!(moved.snapshot.active_role(), Role::Opponent);
}

// ─────────────────────────────────────────────────────────────
// Rejections
// ─────────────────────────────────────────────────────────────

#[test]
fn test_out_of_sequence_reports_expected_and_received() {
    let f = fixture();
    let id = open_match(&f, CreateMatchRequest::default());
    submit(&f, "alice-token", &id, Some(0), place(6)).expect("first");

    let err = submit(&f, "alice-token", &id, Some(0), place(0)).expect_err("stale index");
    match err {
        SubmissionError::MoveOutOfSequence(mismatch) => assert_eq!(
            mismatch,
            SequenceMismatch {
                expected: 1,
                received: 0,
            }
        ),
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(f.store.list_moves(&id, 0).expect("moves").len(), 1);
}

#[test]
fn test_index_jump_drops_cached_context() {
    let f = fixture();
    let id = open_match(&f, CreateMatchRequest::default());
    submit(&f, "alice-token", &id, Some(0), place(6)).expect("0");
    submit(&f, "alice-token", &id, Some(1), place(0)).expect("1");
    submit(&f, "bob-token", &id, Some(2), place(16)).expect("2");

    let err = submit(&f, "bob-token", &id, Some(5), place(24)).expect_err("jump ahead");
    assert!(matches!(
        err,
        SubmissionError::MoveOutOfSequence(SequenceMismatch {
            expected: 3,
            received: 5,
        })
    ));

    // Another writer lands index 3 behind this service's back.
    let after_two = f
        .store
        .move_at(&id, 2)
        .expect("lookup")
        .expect("move 2")
        .resulting_snapshot()
        .clone();
    let next = after_two.apply(place(24)).expect("bob's second placement");
    f.store
        .insert_move(&MoveRecord::new(
            id.clone(),
            3,
            UserId::new("bob"),
            MoveAction::new(MovePayload::Single(place(24)), None, None),
            next,
            start(),
        ))
        .expect("direct insert");

    let moved = accepted(
        submit(&f, "alice-token", &id, Some(4), step(Direction::East, Direction::South))
            .expect("fresh context sees index 3"),
    );
    assert_eq!(*moved.record.move_index(), 4);
}

#[test]
fn test_sequence_cannot_play_the_other_side() {
    let f = fixture();
    let id = open_match(&f, CreateMatchRequest::default());
    let alice = UserId::new("alice");

    let all_four = SubmitMoveRequest {
        move_index: Some(0),
        action: SubmittedAction::play(MovePayload::Sequence(vec![
            place(6),
            place(0),
            place(16),
            place(24),
        ])),
    };
    let err = f
        .service
        .submit("alice-token", &id, all_four)
        .expect_err("bob's placements");
    assert!(matches!(
        err,
        SubmissionError::NotYourTurn {
            expected: Role::Opponent
        }
    ));
    assert!(f.store.list_moves(&id, 0).expect("moves").is_empty());
    assert_eq!(f.service.penalties().strikes(&alice), 0);

    place_all(&f, &id);
    let move_and_reply = SubmitMoveRequest {
        move_index: Some(4),
        action: SubmittedAction::play(MovePayload::Sequence(vec![
            step(Direction::East, Direction::South),
            step(Direction::East, Direction::South),
        ])),
    };
    assert!(matches!(
        f.service.submit("alice-token", &id, move_and_reply),
        Err(SubmissionError::NotYourTurn {
            expected: Role::Opponent
        })
    ));
    assert_eq!(f.store.list_moves(&id, 0).expect("moves").len(), 4);
}

#[test]
fn test_wrong_side_and_outsider_are_forbidden() {
    let f = fixture();
    let id = open_match(&f, CreateMatchRequest::default());

    let err = submit(&f, "bob-token", &id, Some(0), place(6)).expect_err("alice moves first");
    assert!(matches!(
        err,
        SubmissionError::NotYourTurn {
            expected: Role::Creator
        }
    ));

    let err = submit(&f, "carol-token", &id, Some(0), place(6)).expect_err("not seated");
    assert!(matches!(err, SubmissionError::NotParticipant));
    assert!(matches!(
        f.service.fetch_state("carol-token", &id),
        Err(SubmissionError::NotParticipant)
    ));
}

#[test]
fn test_unknown_token_and_match() {
    let f = fixture();
    let id = open_match(&f, CreateMatchRequest::default());
    assert!(matches!(
        submit(&f, "mallory-token", &id, None, place(6)),
        Err(SubmissionError::Unauthorized(AuthError::InvalidToken))
    ));
    assert!(matches!(
        submit(&f, "alice-token", &MatchId::new("missing"), None, place(6)),
        Err(SubmissionError::NotFound(_))
    ));
}

#[test]
fn test_waiting_match_rejects_moves() {
    let f = fixture();
    let created = f
        .service
        .create_match("alice-token", CreateMatchRequest::default())
        .expect("create");
    let err = submit(&f, "alice-token", &created.match_id, Some(0), place(6))
        .expect_err("no opponent yet");
    assert!(matches!(
        err,
        SubmissionError::MatchNotActive(MatchStatus::Waiting)
    ));
}

#[test]
fn test_repeated_illegal_moves_escalate_to_block() {
    let f = fixture();
    let id = open_match(&f, CreateMatchRequest::default());
    let illegal = ActionIndex::new(100).expect("in range");
    let alice = UserId::new("alice");

    for attempt in 1..=5 {
        let err = submit(&f, "alice-token", &id, None, illegal).expect_err("illegal");
        assert!(matches!(err, SubmissionError::InvalidMove(_)), "attempt {}", attempt);
    }
    let err = submit(&f, "alice-token", &id, None, illegal).expect_err("sixth");
    let until = match err {
        SubmissionError::RateLimited { until } => until,
        other => panic!("expected a block, got {:?}", other),
    };
    assert_eq!(until, start() + TimeDelta::seconds(5));

    f.clock.advance(TimeDelta::seconds(3));
    assert!(matches!(
        submit(&f, "alice-token", &id, None, place(6)),
        Err(SubmissionError::RateLimited { .. })
    ));

    f.clock.advance(TimeDelta::seconds(2));
    submit(&f, "alice-token", &id, None, place(6)).expect("block lifted");
    assert_eq!(f.service.penalties().strikes(&alice), 0);
}

#[test]
fn test_stale_replica_loses_race_with_conflict() {
    let f = fixture();
    let id = open_match(&f, CreateMatchRequest::default());
    let replica = service_over(f.store.clone(), f.clock.clone());
    replica
        .fetch_state("alice-token", &id)
        .expect("replica caches index 0");

    submit(&f, "alice-token", &id, Some(0), place(6)).expect("first writer");
    let err = replica
        .submit(
            "alice-token",
            &id,
            SubmitMoveRequest {
                move_index: None,
                action: SubmittedAction::play(place(12)),
            },
        )
        .expect_err("index taken");
    assert!(matches!(err, SubmissionError::MoveConflict { move_index: 0 }));

    // The conflict dropped the stale context; a retry lands at index 1.
    let retry = replica
        .submit(
            "alice-token",
            &id,
            SubmitMoveRequest {
                move_index: Some(1),
                action: SubmittedAction::play(place(12)),
            },
        )
        .expect("retry");
    assert_eq!(*accepted(retry).record.move_index(), 1);
}

// ─────────────────────────────────────────────────────────────
// Undo
// ─────────────────────────────────────────────────────────────

#[test]
fn test_undo_removes_tail_and_restores_snapshot() {
    let f = fixture();
    let id = open_match(&f, CreateMatchRequest::default());
    place_all(&f, &id);
    let snapshots = play_six(&f, &id);

    let outcome = f
        .service
        .submit(
            "bob-token",
            &id,
            SubmitMoveRequest {
                move_index: None,
                action: SubmittedAction::UndoAccept {
                    move_index: Some(7),
                },
            },
        )
        .expect("undo");
    let undone = match outcome {
        SubmissionOutcome::Undone(undone) => *undone,
        other => panic!("expected undo, got {:?}", other),
    };
    assert!(undone.undone);
    assert_eq!(undone.move_index, 7);
    assert_eq!(undone.removed_move_indexes, vec![7, 8, 9]);
    // snapshots[2] is the result of move 6.
    assert_eq!(undone.snapshot, snapshots[2]);

    let state = f.service.fetch_state("alice-token", &id).expect("state");
    assert_eq!(state.last_move_index, Some(6));
    assert_eq!(state.snapshot, snapshots[2]);
    submit(
        &f,
        "bob-token",
        &id,
        Some(7),
        step(Direction::West, Direction::South),
    )
    .expect("play resumes at 7");
}

#[test]
fn test_placement_moves_cannot_be_undone() {
    let f = fixture();
    let id = open_match(&f, CreateMatchRequest::default());
    place_all(&f, &id);
    play_six(&f, &id);

    let err = f
        .service
        .submit(
            "alice-token",
            &id,
            SubmitMoveRequest {
                move_index: None,
                action: SubmittedAction::UndoAccept {
                    move_index: Some(3),
                },
            },
        )
        .expect_err("placement");
    assert!(matches!(err, SubmissionError::UndoNotAllowed(_)));
    assert_eq!(f.store.list_moves(&id, 0).expect("moves").len(), 10);
}

#[test]
fn test_undo_reject_changes_nothing() {
    let f = fixture();
    let id = open_match(&f, CreateMatchRequest::default());
    place_all(&f, &id);
    let outcome = f
        .service
        .submit(
            "alice-token",
            &id,
            SubmitMoveRequest {
                move_index: None,
                action: SubmittedAction::UndoReject { move_index: None },
            },
        )
        .expect("reject");
    assert!(matches!(outcome, SubmissionOutcome::Rejected(r) if r.rejected && !r.undone));
    assert_eq!(f.store.list_moves(&id, 0).expect("moves").len(), 4);
}

// ─────────────────────────────────────────────────────────────
// Lifecycle
// ─────────────────────────────────────────────────────────────

#[test]
fn test_second_joiner_is_turned_away() {
    let f = fixture();
    let id = open_match(&f, CreateMatchRequest::default());
    let again = f.service.join_match("bob-token", &id).expect("rejoin is idempotent");
    assert_eq!(again.opponent_id, Some(UserId::new("bob")));
    assert!(matches!(
        f.service.join_match("carol-token", &id),
        Err(SubmissionError::MatchNotActive(MatchStatus::InProgress))
    ));
}

#[test]
fn test_automated_opponent_replies_in_same_submission() {
    let store = Arc::new(MemoryMatchStore::new());
    let clock = Arc::new(ManualClock::new(start()));
    let service = service_over(store.clone(), clock)
        .with_move_search(Arc::new(FirstLegalMoveSearch));

    let created = service
        .create_match(
            "alice-token",
            CreateMatchRequest {
                automated_opponent: true,
                ..CreateMatchRequest::default()
            },
        )
        .expect("create");
    assert_eq!(created.status, MatchStatus::InProgress);
    let id = created.match_id;

    let request = |index: u32, cell: usize| SubmitMoveRequest {
        move_index: Some(index),
        action: SubmittedAction::play(place(cell)),
    };
    let first = accepted(service.submit("alice-token", &id, request(0, 12)).expect("first"));
    assert!(first.automated_reply.is_none());

    let second = accepted(service.submit("alice-token", &id, request(1, 13)).expect("second"));
    let reply = second.automated_reply.expect("automated reply");
    assert_eq!(*reply.move_index(), 2);
    assert_eq!(reply.action().payload().actions().len(), 2);
    assert_eq!(second.snapshot.active_role(), Role::Creator);
    assert_eq!(store.list_moves(&id, 0).expect("moves").len(), 3);
}

#[test]
fn test_automated_opening_when_opponent_moves_first() {
    let store = Arc::new(MemoryMatchStore::new());
    let clock = Arc::new(ManualClock::new(start()));
    let service = service_over(store, clock).with_move_search(Arc::new(FirstLegalMoveSearch));

    let created = service
        .create_match(
            "alice-token",
            CreateMatchRequest {
                automated_opponent: true,
                player_zero_role: Some(Role::Opponent),
                ..CreateMatchRequest::default()
            },
        )
        .expect("create");
    assert_eq!(created.last_move_index, Some(0));
    assert_eq!(created.snapshot.active_role(), Role::Creator);
}

#[test]
fn test_controller_move_records_resolved_side() {
    let f = fixture();
    let created = f
        .service
        .create_match(
            "alice-token",
            CreateMatchRequest {
                automated_opponent: true,
                ..CreateMatchRequest::default()
            },
        )
        .expect("create");
    let id = created.match_id;
    submit(&f, "alice-token", &id, Some(0), place(12)).expect("0");
    let own = accepted(submit(&f, "alice-token", &id, Some(1), place(13)).expect("1"));
    assert_eq!(*own.record.action().by(), Some(Role::Creator));

    let for_opponent = accepted(submit(&f, "alice-token", &id, Some(2), place(0)).expect("2"));
    assert_eq!(*for_opponent.record.action().by(), Some(Role::Opponent));
}

/// Memory store that refuses any batch of more than one record.
#[derive(Debug, Default)]
struct SingleRecordStore {
    inner: MemoryMatchStore,
}

impl MatchStore for SingleRecordStore {
    fn create_match(&self, record: &MatchRecord) -> Result<(), StoreError> {
        self.inner.create_match(record)
    }

    fn load_match(&self, id: &MatchId) -> Result<Option<MatchRecord>, StoreError> {
        self.inner.load_match(id)
    }

    fn load_submission_context(
        &self,
        id: &MatchId,
    ) -> Result<Option<(MatchRecord, Option<MoveRecord>)>, StoreError> {
        self.inner.load_submission_context(id)
    }

    fn list_moves(&self, id: &MatchId, from: u32) -> Result<Vec<MoveRecord>, StoreError> {
        self.inner.list_moves(id, from)
    }

    fn move_at(&self, id: &MatchId, index: u32) -> Result<Option<MoveRecord>, StoreError> {
        self.inner.move_at(id, index)
    }

    fn append_moves(
        &self,
        records: &[MoveRecord],
        updated: Option<&MatchRecord>,
    ) -> Result<(), StoreError> {
        if records.len() > 1 {
            return Err(StoreError::new("disk full"));
        }
        self.inner.append_moves(records, updated)
    }

    fn update_match(&self, record: &MatchRecord) -> Result<(), StoreError> {
        self.inner.update_match(record)
    }

    fn delete_moves_from(&self, id: &MatchId, from: u32) -> Result<Vec<u32>, StoreError> {
        self.inner.delete_moves_from(id, from)
    }

    fn claim_opponent(
        &self,
        id: &MatchId,
        user: &UserId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.inner.claim_opponent(id, user, now)
    }
}

#[test]
fn test_failed_reply_write_keeps_human_move_out() {
    let store = Arc::new(SingleRecordStore::default());
    let service = MoveSubmissionService::new(
        store.clone(),
        verifier(),
        Arc::new(ManualClock::new(start())),
        ServiceSettings::default(),
    )
    .with_move_search(Arc::new(FirstLegalMoveSearch));
    let created = service
        .create_match(
            "alice-token",
            CreateMatchRequest {
                automated_opponent: true,
                ..CreateMatchRequest::default()
            },
        )
        .expect("create");
    let id = created.match_id;
    let request = |index: u32, cell: usize| SubmitMoveRequest {
        move_index: Some(index),
        action: SubmittedAction::play(place(cell)),
    };
    service.submit("alice-token", &id, request(0, 12)).expect("first");

    let err = service
        .submit("alice-token", &id, request(1, 13))
        .expect_err("reply cannot be stored");
    assert!(matches!(err, SubmissionError::Internal(_)));
    assert_eq!(store.list_moves(&id, 0).expect("moves").len(), 1);
    let state = service.fetch_state("alice-token", &id).expect("state");
    assert_eq!(state.last_move_index, Some(0));

    service
        .submit("alice-token", &id, request(1, 13))
        .expect_err("still one atomic write");
}
