use core::fmt;

use serde::{Deserialize, Serialize};

use crate::UserRef;

/// Kind of a derived notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
	None,
	Host,
	Sub,
	Follow,
	Bits,
	Whisper,
}

impl AlertType {
	pub const fn as_str(self) -> &'static str {
		match self {
			AlertType::None => "none",
			AlertType::Host => "host",
			AlertType::Sub => "sub",
			AlertType::Follow => "follow",
			AlertType::Bits => "bits",
			AlertType::Whisper => "whisper",
		}
	}
}

impl fmt::Display for AlertType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Subscription details carried by a Sub alert.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubNotice {
	/// Plan identifier, e.g. `1000`, `2000`, `3000` or `Prime`.
	pub plan: String,
	pub months: u32,
	/// Set when the subscription was gifted to `source`.
	pub gift: bool,
	pub message: String,
}

/// Typed alert payload; the variant decides the [`AlertType`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertPayload {
	None { text: String },
	Host { viewers: u32 },
	Sub(SubNotice),
	Follow,
	Bits { bits: u32, content: String },
	Whisper { content: String },
}

impl AlertPayload {
	pub fn kind(&self) -> AlertType {
		match self {
			AlertPayload::None { .. } => AlertType::None,
			AlertPayload::Host { .. } => AlertType::Host,
			AlertPayload::Sub(_) => AlertType::Sub,
			AlertPayload::Follow => AlertType::Follow,
			AlertPayload::Bits { .. } => AlertType::Bits,
			AlertPayload::Whisper { .. } => AlertType::Whisper,
		}
	}

	/// Message content compared by the duplicate rule, if this kind has one.
	fn dedup_content(&self) -> Option<&str> {
		match self {
			AlertPayload::Bits { content, .. } | AlertPayload::Whisper { content } => Some(content),
			_ => None,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
	pub source: UserRef,
	pub payload: AlertPayload,
}

impl Alert {
	pub fn new(source: UserRef, payload: AlertPayload) -> Self {
		Self { source, payload }
	}

	pub fn kind(&self) -> AlertType {
		self.payload.kind()
	}

	/// Same kind and same source; Bits and Whisper must also carry the same content.
	pub fn is_duplicate_of(&self, other: &Alert) -> bool {
		if self.kind() != other.kind() || !self.source.same_user(&other.source) {
			return false;
		}
		match (self.payload.dedup_content(), other.payload.dedup_content()) {
			(Some(a), Some(b)) => a == b,
			_ => true,
		}
	}
}

impl fmt::Display for Alert {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.payload {
			AlertPayload::None { text } => write!(f, "{text}"),
			AlertPayload::Host { viewers } => write!(f, "{} is hosting with {viewers} viewers", self.source),
			AlertPayload::Sub(sub) if sub.gift => write!(f, "{} received a gifted sub ({})", self.source, sub.plan),
			AlertPayload::Sub(sub) => write!(f, "{} subscribed for {} months ({})", self.source, sub.months, sub.plan),
			AlertPayload::Follow => write!(f, "{} followed", self.source),
			AlertPayload::Bits { bits, content } => write!(f, "{} cheered {bits}: {content}", self.source),
			AlertPayload::Whisper { content } => write!(f, "{} whispered: {content}", self.source),
		}
	}
}
