use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ParseError;

/// Push-notification subjects this system decodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TopicSubject {
	BitsV1,
	BitsV2,
	Subscriptions,
	Whispers,
}

impl TopicSubject {
	pub const fn as_str(self) -> &'static str {
		match self {
			TopicSubject::BitsV1 => "channel-bits-events-v1",
			TopicSubject::BitsV2 => "channel-bits-events-v2",
			TopicSubject::Subscriptions => "channel-subscribe-events-v1",
			TopicSubject::Whispers => "whispers",
		}
	}
}

impl fmt::Display for TopicSubject {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for TopicSubject {
	type Err = ParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"" => Err(ParseError::Empty),
			"channel-bits-events-v1" => Ok(TopicSubject::BitsV1),
			"channel-bits-events-v2" => Ok(TopicSubject::BitsV2),
			"channel-subscribe-events-v1" => Ok(TopicSubject::Subscriptions),
			"whispers" => Ok(TopicSubject::Whispers),
			other => Err(ParseError::InvalidFormat(format!("unknown topic subject: {other}"))),
		}
	}
}

/// `(subject, target)` pair naming a push-notification stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Topic {
	pub subject: String,
	pub target: String,
}

impl Topic {
	pub fn new(subject: impl Into<String>, target: impl Into<String>) -> Self {
		Self {
			subject: subject.into(),
			target: target.into(),
		}
	}

	pub fn of(subject: TopicSubject, target: impl Into<String>) -> Self {
		Self::new(subject.as_str(), target)
	}

	/// Parse the `subject.target` text form, splitting at the first dot.
	pub fn parse(s: &str) -> Result<Self, ParseError> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseError::Empty);
		}

		let (subject, target) = s
			.split_once('.')
			.ok_or_else(|| ParseError::InvalidFormat(format!("expected subject.target: {s}")))?;
		if subject.is_empty() || target.is_empty() {
			return Err(ParseError::InvalidFormat(format!("expected subject.target: {s}")));
		}
		Ok(Self::new(subject, target))
	}

	/// Known subject, if this topic names one.
	pub fn known_subject(&self) -> Result<TopicSubject, ParseError> {
		self.subject.parse()
	}
}

impl fmt::Display for Topic {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}.{}", self.subject, self.target)
	}
}

impl FromStr for Topic {
	type Err = ParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Topic::parse(s)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn topic_text_form() {
		let t = Topic::parse("channel-bits-events-v1.44322889").unwrap();
		assert_eq!(t, Topic::of(TopicSubject::BitsV1, "44322889"));
		assert_eq!(t.to_string(), "channel-bits-events-v1.44322889");
		assert_eq!(t.known_subject().unwrap(), TopicSubject::BitsV1);
	}

	#[test]
	fn topic_splits_on_first_dot() {
		let t = Topic::parse("whispers.1.2").unwrap();
		assert_eq!(t.subject, "whispers");
		assert_eq!(t.target, "1.2");
	}

	#[test]
	fn malformed_topics_are_rejected() {
		assert_eq!(Topic::parse(""), Err(ParseError::Empty));
		assert!(Topic::parse("nodot").is_err());
		assert!(Topic::parse(".123").is_err());
		assert!(Topic::parse("video-playback.1").unwrap().known_subject().is_err());
	}
}
