//! Crate-level error types.
//!
//! # Error Policy
//!
//! The exchange protocol is built around retransmission and idempotent
//! receipt, so almost every runtime failure is recoverable by doing nothing:
//!
//! - **Transport send failure**: logged, message dropped; the timer
//!   retransmits on the next tick past the send timeout.
//! - **Malformed inbound message**: dropped at the sanity gate.
//! - **Invalid payload bytes**: logged, the peer stays un-received; the
//!   sender's retransmission retries the delivery.
//!
//! Only structural impossibilities (a succession-list member missing from the
//! peer table, more event listeners than the fixed cap) abort, because the
//! state machine's invariants cannot be re-established once they are broken.

use std::io;
use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the exchange subsystem.
#[derive(Debug, ThisError)]
pub enum Error {
    /// An inbound namespaces payload failed validation.
    #[error("invalid payload: {0}")]
    InvalidPayload(&'static str),

    /// An inbound wire message could not be parsed.
    #[error("malformed message: {0}")]
    MalformedMessage(&'static str),

    /// The fabric transport could not hand off an outgoing message.
    #[error("transport send to {dest:#x} failed: {reason}")]
    Transport { dest: u64, reason: String },

    /// Invalid subsystem configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// An error in the network layer below the transport.
    #[error("IO error: {0:?}")]
    Io(io::ErrorKind),
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e.kind())
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Error::InvalidPayload(a), Error::InvalidPayload(b)) => a == b,
            (Error::MalformedMessage(a), Error::MalformedMessage(b)) => a == b,
            (
                Error::Transport { dest: a, reason: ar },
                Error::Transport { dest: b, reason: br },
            ) => a == b && ar == br,
            (Error::Config(a), Error::Config(b)) => a == b,
            (Error::Io(a), Error::Io(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Error {}
