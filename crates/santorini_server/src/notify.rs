//! Push-notification collaborator.

use derive_getters::Getters;
use derive_more::Display;
use derive_new::new;
use santorini_engine::{MatchId, UserId};
use tracing::{info, instrument};

/// What happened in the match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum NotificationKind {
    /// A move was accepted.
    #[display("move")]
    MoveMade,
    /// An undo rewound the match.
    #[display("undo")]
    Undone,
    /// An undo request was declined.
    #[display("undo_rejected")]
    UndoRejected,
    /// An opponent joined.
    #[display("joined")]
    Joined,
}

/// Message for one participant.
#[derive(Debug, Clone, PartialEq, Eq, Getters, new)]
pub struct Notification {
    match_id: MatchId,
    recipient: UserId,
    kind: NotificationKind,
    move_index: Option<u32>,
}

/// Delivery failure; logged and otherwise ignored by callers.
#[derive(Debug, Clone, Display, derive_more::Error)]
#[display("Notification delivery failed: {}", message)]
pub struct NotifyError {
    /// Reason.
    pub message: String,
}

/// Best-effort delivery of match events.
pub trait Notifier: Send + Sync + std::fmt::Debug {
    /// Delivers `notification`.
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Notifier that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

impl Notifier for LoggingNotifier {
    #[instrument(skip_all)]
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            match_id = %notification.match_id,
            recipient = %notification.recipient,
            kind = %notification.kind,
            move_index = ?notification.move_index,
            "Notifying participant"
        );
        Ok(())
    }
}
