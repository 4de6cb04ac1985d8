use std::io;
use std::net::SocketAddr;

use thiserror::Error;

pub use crate::pulse::expr::ExprError;

/// An inbound message that does not address anything we track.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LookupError {
    #[error("unknown participant \"{0}\"")]
    UnknownParticipant(String),
    #[error("unknown channel \"{0}\"")]
    UnknownChannel(String),
    #[error("unknown parameter \"{0}\"")]
    UnknownParameter(String),
    #[error("unknown subchannel \"{0}\"")]
    UnknownSubchannel(String),
    #[error("expected exactly one argument, got {0}")]
    Arity(usize),
    #[error("argument is not numeric")]
    NotNumeric,
    #[error("unrecognised address \"{0}\"")]
    UnknownAddress(String),
}

/// Failure to read the external score definition.
#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("failed to read score: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse score: {0}")]
    Json(#[from] serde_json::Error),
}

/// The score refers to something it does not define. Fatal for node entry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    #[error("can't find a valid node \"{0}\" in score")]
    UnknownNode(String),
    #[error("node \"{0}\" has no edge list")]
    MissingEdges(String),
}

/// A single recipient could not be reached.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("send to {peer} failed: {source}")]
    Udp {
        peer: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("visualization client {0} is gone")]
    ClientClosed(uuid::Uuid),
    #[error("visualization client {0} fell too far behind and was dropped")]
    ClientLagging(uuid::Uuid),
    #[error("failed to encode message: {0}")]
    Encode(io::Error),
}

#[derive(Debug, Error)]
pub enum BrainError {
    #[error("invalid settings: {0}")]
    Settings(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Score(#[from] ScoreError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("controller task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
