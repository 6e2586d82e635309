#![forbid(unsafe_code)]

pub mod badges;
pub mod client;
mod commands;
pub mod emotes;
pub mod host;
pub mod message;
pub mod presence;
pub mod ratelimit;


use thiserror::Error;

pub use client::{ChatClient, ClientConfig, Phase};
pub use message::{IrcMessage, Tags};
pub use presence::{PresenceSnapshot, PresenceTable};
pub use ratelimit::{OutboundQueue, RateLimit};

/// Malformed protocol input.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IrcParseError {
	#[error("empty line")]
	Empty,
	#[error("missing command")]
	MissingCommand,
	#[error("malformed host target: {0}")]
	Host(String),
}

/// A single message could not be turned into a log line.
#[derive(Debug, Error)]
pub enum MessageError {
	#[error("message has no sender")]
	MissingSender,
	#[error("unresolvable user {nick} (id={id:?})")]
	UnresolvedUser { nick: String, id: Option<String> },
	#[error(transparent)]
	Line(#[from] chatpump_domain::ParseError),
}

/// Connection-level failures, surfaced to whoever owns the connection.
#[derive(Debug, Error)]
pub enum ClientError {
	#[error("no chat credentials available")]
	MissingAuth,
	#[error("not connected")]
	NotConnected,
	#[error("server requested a reconnect")]
	ReconnectRequested,
	#[error("connection i/o error")]
	Io(#[from] std::io::Error),
}
