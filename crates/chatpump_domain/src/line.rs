use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ParseError;

const LOG_PREFIX: &str = "CHAT: ";
const TIME_FORMAT: &str = "%H:%M:%S";
/// Body placeholder for viewers known only by nick.
const NO_USER_ID: &str = "-";

/// Category of a chat log line. Each category has exactly one wire character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogCategory {
	System,
	Silent,
	Filtered,
	Message,
	Action,
	Whisper,
	Unknown,
}

impl LogCategory {
	pub const ALL: [LogCategory; 7] = [
		LogCategory::System,
		LogCategory::Silent,
		LogCategory::Filtered,
		LogCategory::Message,
		LogCategory::Action,
		LogCategory::Whisper,
		LogCategory::Unknown,
	];

	/// Single-character tag used in the text log format.
	pub const fn wire_char(self) -> char {
		match self {
			LogCategory::System => '*',
			LogCategory::Silent => '_',
			LogCategory::Filtered => '~',
			LogCategory::Message => '#',
			LogCategory::Action => '!',
			LogCategory::Whisper => '>',
			LogCategory::Unknown => '?',
		}
	}

	pub fn from_wire_char(c: char) -> Result<Self, ParseError> {
		Self::ALL
			.into_iter()
			.find(|cat| cat.wire_char() == c)
			.ok_or(ParseError::UnknownCategory(c))
	}

	/// Stable string identifier.
	pub const fn as_str(self) -> &'static str {
		match self {
			LogCategory::System => "system",
			LogCategory::Silent => "silent",
			LogCategory::Filtered => "filtered",
			LogCategory::Message => "message",
			LogCategory::Action => "action",
			LogCategory::Whisper => "whisper",
			LogCategory::Unknown => "unknown",
		}
	}

	/// Whether lines of this category carry a [`MessageDetail`].
	pub const fn carries_message(self) -> bool {
		matches!(self, LogCategory::Message | LogCategory::Action | LogCategory::Whisper)
	}
}

impl fmt::Display for LogCategory {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for LogCategory {
	type Err = ParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseError::Empty);
		}

		let lower = s.to_ascii_lowercase();
		Self::ALL
			.into_iter()
			.find(|cat| cat.as_str() == lower)
			.ok_or_else(|| ParseError::InvalidFormat(format!("unknown category name: {s}")))
	}
}

/// Emote replacement range in code points, `end` inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmoteSpan {
	pub id: String,
	pub start: usize,
	pub end: usize,
}

impl EmoteSpan {
	pub fn new(id: impl Into<String>, start: usize, end: usize) -> Self {
		Self {
			id: id.into(),
			start,
			end,
		}
	}
}

/// Structured part of a message-bearing line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDetail {
	pub user_id: String,
	pub nick: String,
	pub bits: u32,
	/// Compact badge indicator; not part of the canonical body.
	pub badge: String,
	pub content: String,
	/// Ordered by descending `end` so replacements can be applied in sequence.
	pub emotes: Vec<EmoteSpan>,
}

impl MessageDetail {
	/// Canonical body: `<userID> <nick> <emoteBlock> <bitsBlock> : <content>`.
	pub fn to_body(&self) -> String {
		let emote_block = if self.emotes.is_empty() {
			String::new()
		} else {
			let spans = self
				.emotes
				.iter()
				.map(|e| format!("{},{},{}", e.id, e.start, e.end))
				.collect::<Vec<_>>()
				.join("|");
			format!("{{{spans}}}")
		};

		let bits_block = if self.bits > 0 {
			format!("[{}]", self.bits)
		} else {
			String::new()
		};

		let user_id = if self.user_id.is_empty() {
			NO_USER_ID
		} else {
			self.user_id.as_str()
		};

		format!("{user_id} {} {emote_block} {bits_block} : {}", self.nick, self.content)
	}

	/// Parse the canonical body form back into a detail. `badge` is left empty.
	pub fn parse_body(body: &str) -> Result<Self, ParseError> {
		if body.is_empty() {
			return Err(ParseError::Empty);
		}

		let (header, content) = body
			.split_once(" : ")
			.ok_or_else(|| ParseError::InvalidFormat(format!("missing content separator: {body}")))?;

		let mut tokens = header.split_whitespace();
		let user_id = tokens
			.next()
			.ok_or_else(|| ParseError::InvalidFormat("missing user id".to_string()))?;
		let nick = tokens
			.next()
			.ok_or_else(|| ParseError::InvalidFormat("missing nick".to_string()))?;

		let user_id = if user_id == NO_USER_ID { "" } else { user_id };

		let mut detail = MessageDetail {
			user_id: user_id.to_string(),
			nick: nick.to_string(),
			content: content.to_string(),
			..MessageDetail::default()
		};

		for token in tokens {
			if let Some(inner) = token.strip_prefix('{').and_then(|t| t.strip_suffix('}')) {
				detail.emotes = parse_emote_block(inner)?;
			} else if let Some(inner) = token.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
				detail.bits = inner
					.parse()
					.map_err(|_| ParseError::InvalidFormat(format!("invalid bits block: {token}")))?;
			} else {
				return Err(ParseError::InvalidFormat(format!("unexpected header token: {token}")));
			}
		}

		Ok(detail)
	}
}

fn parse_emote_block(inner: &str) -> Result<Vec<EmoteSpan>, ParseError> {
	inner
		.split('|')
		.filter(|s| !s.is_empty())
		.map(|span| {
			let mut parts = span.split(',');
			let (Some(id), Some(start), Some(end), None) = (parts.next(), parts.next(), parts.next(), parts.next()) else {
				return Err(ParseError::InvalidFormat(format!("invalid emote span: {span}")));
			};
			let start = start
				.parse()
				.map_err(|_| ParseError::InvalidFormat(format!("invalid emote start: {span}")))?;
			let end = end
				.parse()
				.map_err(|_| ParseError::InvalidFormat(format!("invalid emote end: {span}")))?;
			Ok(EmoteSpan::new(id, start, end))
		})
		.collect()
}

/// One normalized chat log line.
///
/// `message` is present exactly when the category carries a message, and
/// `body` is then the canonical serialization of that message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedLine {
	timestamp_seconds: i64,
	category: LogCategory,
	body: String,
	message: Option<MessageDetail>,
}

impl ParsedLine {
	fn bare(timestamp_seconds: i64, category: LogCategory, body: String) -> Self {
		Self {
			timestamp_seconds,
			category,
			body,
			message: None,
		}
	}

	pub fn system(timestamp_seconds: i64, body: impl Into<String>) -> Self {
		Self::bare(timestamp_seconds, LogCategory::System, body.into())
	}

	pub fn silent(timestamp_seconds: i64, body: impl Into<String>) -> Self {
		Self::bare(timestamp_seconds, LogCategory::Silent, body.into())
	}

	pub fn filtered(timestamp_seconds: i64, body: impl Into<String>) -> Self {
		Self::bare(timestamp_seconds, LogCategory::Filtered, body.into())
	}

	pub fn unknown(timestamp_seconds: i64, body: impl Into<String>) -> Self {
		Self::bare(timestamp_seconds, LogCategory::Unknown, body.into())
	}

	/// Build a message-bearing line; the body is derived from `detail`.
	pub fn from_message(
		timestamp_seconds: i64,
		category: LogCategory,
		detail: MessageDetail,
	) -> Result<Self, ParseError> {
		if !category.carries_message() {
			return Err(ParseError::CategoryMismatch(category));
		}
		Ok(Self {
			timestamp_seconds,
			category,
			body: detail.to_body(),
			message: Some(detail),
		})
	}

	/// Build a line from its body text, decoding the message for message categories.
	pub fn from_body(timestamp_seconds: i64, category: LogCategory, body: impl Into<String>) -> Result<Self, ParseError> {
		let body = body.into();
		if category.carries_message() {
			let detail = MessageDetail::parse_body(&body)?;
			return Ok(Self {
				timestamp_seconds,
				category,
				body,
				message: Some(detail),
			});
		}
		Ok(Self::bare(timestamp_seconds, category, body))
	}

	pub fn timestamp_seconds(&self) -> i64 {
		self.timestamp_seconds
	}

	pub fn category(&self) -> LogCategory {
		self.category
	}

	pub fn body(&self) -> &str {
		&self.body
	}

	pub fn message(&self) -> Option<&MessageDetail> {
		self.message.as_ref()
	}

	/// Replace the timestamp with the given wall-clock time (second precision).
	pub fn set_time(&mut self, time: DateTime<Utc>) {
		self.timestamp_seconds = time.timestamp();
	}

	pub fn time(&self) -> Option<DateTime<Utc>> {
		DateTime::from_timestamp(self.timestamp_seconds, 0)
	}

	/// Text log form: `CHAT: HH:MM:SS <category-char><body>` (UTC clock).
	pub fn to_log_line(&self) -> String {
		let clock = self
			.time()
			.map(|t| t.format(TIME_FORMAT).to_string())
			.unwrap_or_else(|| "00:00:00".to_string());
		format!("{LOG_PREFIX}{clock} {}{}", self.category.wire_char(), self.body)
	}

	/// Parse the text log form. The log only carries a clock time, so the
	/// calendar date has to be supplied.
	pub fn parse_log_line(line: &str, date: NaiveDate) -> Result<Self, ParseError> {
		let line = line.trim_end_matches(['\r', '\n']);
		if line.is_empty() {
			return Err(ParseError::Empty);
		}

		let rest = line
			.strip_prefix(LOG_PREFIX)
			.ok_or_else(|| ParseError::InvalidFormat(format!("missing log prefix: {line}")))?;

		let (clock, rest) = rest
			.split_once(' ')
			.ok_or_else(|| ParseError::InvalidFormat(format!("missing clock: {line}")))?;
		let clock = NaiveTime::parse_from_str(clock, TIME_FORMAT)
			.map_err(|_| ParseError::InvalidFormat(format!("invalid clock: {clock}")))?;

		let mut chars = rest.chars();
		let tag = chars.next().ok_or(ParseError::Empty)?;
		let category = LogCategory::from_wire_char(tag)?;

		let timestamp_seconds = date.and_time(clock).and_utc().timestamp();
		Self::from_body(timestamp_seconds, category, chars.as_str())
	}
}

impl fmt::Display for ParsedLine {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.to_log_line())
	}
}

#[cfg(test)]
mod tests {
	use chrono::TimeZone;

	use super::*;

	fn detail() -> MessageDetail {
		MessageDetail {
			user_id: "44322889".to_string(),
			nick: "dallas".to_string(),
			bits: 100,
			badge: "@".to_string(),
			content: "Kappa hello : world Kappa".to_string(),
			emotes: vec![EmoteSpan::new("25", 20, 24), EmoteSpan::new("25", 0, 4)],
		}
	}

	#[test]
	fn wire_chars_are_unique() {
		let mut seen = std::collections::HashSet::new();
		for cat in LogCategory::ALL {
			assert!(seen.insert(cat.wire_char()));
			assert_eq!(LogCategory::from_wire_char(cat.wire_char()).unwrap(), cat);
		}
		assert!(LogCategory::from_wire_char('x').is_err());
	}

	#[test]
	fn canonical_body_format() {
		assert_eq!(
			detail().to_body(),
			"44322889 dallas {25,20,24|25,0,4} [100] : Kappa hello : world Kappa"
		);

		let plain = MessageDetail {
			user_id: "1".to_string(),
			nick: "a".to_string(),
			content: "hi".to_string(),
			..MessageDetail::default()
		};
		assert_eq!(plain.to_body(), "1 a   : hi");
	}

	#[test]
	fn body_parses_back_without_badge() {
		let d = detail();
		let parsed = MessageDetail::parse_body(&d.to_body()).unwrap();
		assert_eq!(parsed.emotes, d.emotes);
		assert_eq!(parsed.bits, 100);
		assert_eq!(parsed.content, d.content);
		assert!(parsed.badge.is_empty());

		let plain = MessageDetail::parse_body("1 a   : hi").unwrap();
		assert_eq!(plain.bits, 0);
		assert!(plain.emotes.is_empty());

		let anonymous = MessageDetail {
			nick: "ghost".to_string(),
			content: "boo".to_string(),
			..MessageDetail::default()
		};
		assert_eq!(anonymous.to_body(), "- ghost   : boo");
		assert!(MessageDetail::parse_body(&anonymous.to_body()).unwrap().user_id.is_empty());
	}

	#[test]
	fn message_presence_follows_category() {
		assert!(ParsedLine::from_message(0, LogCategory::System, detail()).is_err());
		let line = ParsedLine::from_message(0, LogCategory::Whisper, detail()).unwrap();
		assert_eq!(line.body(), detail().to_body());
		assert!(line.message().is_some());
		assert!(ParsedLine::system(0, "hello").message().is_none());
		assert!(ParsedLine::from_body(0, LogCategory::Message, "garbage").is_err());
	}

	#[test]
	fn log_line_format_and_parse() {
		let mut line = ParsedLine::from_message(0, LogCategory::Message, detail()).unwrap();
		let t = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 3).unwrap();
		line.set_time(t);
		let text = line.to_log_line();
		assert!(text.starts_with("CHAT: 07:05:03 #44322889 dallas"));

		let back = ParsedLine::parse_log_line(&text, t.date_naive()).unwrap();
		assert_eq!(back.timestamp_seconds(), t.timestamp());
		assert_eq!(back.category(), LogCategory::Message);
		assert_eq!(back.body(), line.body());
	}

	#[test]
	fn set_time_is_second_precision() {
		let mut a = ParsedLine::system(0, "x");
		let mut b = ParsedLine::system(0, "x");
		let t = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
		a.set_time(t);
		b.set_time(t + chrono::Duration::milliseconds(999));
		assert_eq!(a.timestamp_seconds(), b.timestamp_seconds());
	}
}
