//! Santorini match server.
//!
//! Server-authoritative move submission: every move is re-validated against
//! the rules engine, sequenced by a gap-free move index, timed, persisted
//! and answered with the new authoritative snapshot.
//!
//! # Architecture
//!
//! - **service**: the submission pipeline and match lifecycle
//! - **store**: the persistence trait with SQLite and in-memory backends
//! - **session** / **cache**: token resolution and bounded TTL/LRU caching
//! - **penalty**: illegal-move strike tracking
//! - **http**: the axum router

#![warn(missing_docs)]

mod cache;
mod cli;
mod config;
mod error;
mod http;
mod notify;
mod penalty;
mod search;
mod service;
mod session;
mod store;
mod time;

pub use cache::TtlLruCache;
pub use cli::{Cli, Command};
pub use config::{
    AutomationConfig, CacheConfig, ConfigError, ServerConfig, StorageBackend, StorageConfig,
    TokenConfig,
};
pub use error::SubmissionError;
pub use http::{AppState, router};
pub use notify::{LoggingNotifier, Notification, NotificationKind, Notifier, NotifyError};
pub use penalty::{PenaltySettings, PenaltyTracker, StrikeOutcome};
pub use search::{FirstLegalMoveSearch, MoveSearch, search_input};
pub use service::{MoveSubmissionService, ServiceSettings};
pub use session::{AuthError, IdentityVerifier, SessionCache, StaticTokenVerifier, VerifiedIdentity};
pub use store::{
    AUTOMATED_OPPONENT_ID, MatchRecord, MatchStore, MemoryMatchStore, NewMatch, SqliteMatchStore,
    StoreError, StoreErrorKind,
};
pub use time::{Clock, ManualClock, SystemClock};
