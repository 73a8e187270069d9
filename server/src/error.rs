//! Error taxonomy for the relay core.
//!
//! `RelayError` is what a failed relay returns to the transport adapter;
//! `DeliveryFailure` is the per-connection push outcome. A failed push is
//! recovered locally by the caller (logged and skipped) and never aborts
//! fan-out to the remaining connections.

use thiserror::Error;

use crate::store::StoreError;
use crate::ws::ConnectionId;

#[derive(Debug, Error)]
pub enum RelayError {
    /// Malformed sender or receiver id. No state mutated, nothing delivered.
    #[error("invalid participant id")]
    InvalidParticipant,

    /// The Message Store rejected the write. Nothing delivered.
    #[error("message persistence failed: {0}")]
    Persistence(#[from] StoreError),
}

/// A push to one connection failed (dead socket, disconnect race).
#[derive(Debug, Error)]
#[error("delivery to {connection} failed")]
pub struct DeliveryFailure {
    pub connection: ConnectionId,
}
