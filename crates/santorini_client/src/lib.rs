//! Client-side synchronization for Santorini matches.
//!
//! [`SyncEngine`] keeps a local rules engine one step ahead of the server:
//! moves are applied optimistically, submitted one at a time through a
//! [`MoveTransport`], and reconciled against each authoritative answer.

#![warn(missing_docs)]

mod error;
mod sync;
mod transport;

pub use error::{SyncError, TransportError};
pub use sync::{Reconciliation, Submission, SyncEngine, SyncState};
pub use transport::{HttpTransport, MoveTransport};
