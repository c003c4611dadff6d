//! Error types.
//!
//! Server-side failures of a join or part are outcomes ([`JoinError`],
//! [`PartError`]) delivered through the pending result. Calling the API
//! incorrectly is an [`InvariantViolation`], returned immediately.

use thiserror::Error;

use crate::session::SessionStatus;

/// Errors returned directly by [`ClientController`](crate::controller::ClientController).
#[derive(Debug, Error)]
pub enum ClientError {
    /// The connection could not be established, or is gone.
    #[error("connection failed: {0}")]
    Connection(String),

    /// A command could not be handed to the transport.
    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
}

/// The caller used a session or the controller out of order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("cannot part {channel}: join is still pending")]
    PartWhilePending { channel: String },

    #[error("not joined to {channel}")]
    NotJoined { channel: String },

    #[error("a session for {channel} is already active")]
    AlreadyActive { channel: String },

    #[error("a transition is already in progress on {channel}")]
    TransitionInProgress { channel: String },

    #[error("session for {channel} already resolved ({status})")]
    AlreadyResolved {
        channel: String,
        status: SessionStatus,
    },

    #[error("no session for {channel}")]
    UnknownChannel { channel: String },
}

/// Why a join did not produce a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    #[error("server rejected join of {channel}: {detail}")]
    Rejected { channel: String, detail: String },

    #[error("could not send join for {channel}: {detail}")]
    SendFailed { channel: String, detail: String },

    #[error("join of {channel} abandoned: {reason}")]
    Abandoned { channel: String, reason: String },
}

/// Why a part did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PartError {
    #[error("server rejected part of {channel}: {detail}")]
    Rejected { channel: String, detail: String },

    #[error("could not send part for {channel}: {detail}")]
    SendFailed { channel: String, detail: String },

    #[error("part of {channel} abandoned: {reason}")]
    Abandoned { channel: String, reason: String },
}

/// Outcome errors that can express "nobody will ever answer".
pub trait Abandonable {
    fn abandoned(channel: String, reason: String) -> Self;
}

impl Abandonable for JoinError {
    fn abandoned(channel: String, reason: String) -> Self {
        JoinError::Abandoned { channel, reason }
    }
}

impl Abandonable for PartError {
    fn abandoned(channel: String, reason: String) -> Self {
        PartError::Abandoned { channel, reason }
    }
}
