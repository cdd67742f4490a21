//! Error types shared across the server.
//!
//! Decode failures live next to the parser ([`crate::irc::MalformedCommand`]).

use crate::state::SessionId;

/// Input rejected before any state was touched. Reported to the sender as
/// a numeric reply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("erroneous nickname {0:?}")]
    ErroneousNickname(String),
    #[error("nickname {0:?} is already in use")]
    NicknameInUse(String),
    #[error("bad channel name {0:?}")]
    BadChannelName(String),
    #[error("no such session {0}")]
    NoSuchSession(SessionId),
}

/// A failure that ends one connection and nothing else.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionFault {
    #[error("connection closed by peer")]
    Closed,
    #[error("outbound queue is full")]
    QueueFull,
    #[error("writer has shut down")]
    WriterGone,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
