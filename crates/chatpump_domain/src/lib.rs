#![forbid(unsafe_code)]

mod alert;
mod line;
mod mode;
mod topic;
mod viewer;

use thiserror::Error;

pub use alert::{Alert, AlertPayload, AlertType, SubNotice};
pub use line::{EmoteSpan, LogCategory, MessageDetail, ParsedLine};
pub use mode::{ChatMode, HostUpdate};
pub use topic::{Topic, TopicSubject};
pub use viewer::{
	AuthProvider, BadgeCatalog, BadgeInfo, Credentials, SecretString, StaticAuth, StaticBadgeCatalog, UserRef,
	UserResolver, Viewer, ViewerDirectory,
};

/// Errors for parsing wire text into domain values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
	#[error("empty value")]
	Empty,
	#[error("unknown log category: {0:?}")]
	UnknownCategory(char),
	#[error("category {0} cannot carry a message")]
	CategoryMismatch(LogCategory),
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}
