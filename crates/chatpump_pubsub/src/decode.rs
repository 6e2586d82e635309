use chatpump_domain::{SubNotice, Topic, TopicSubject, UserRef};
use serde::{Deserialize, Serialize};

use crate::PubSubError;

/// Decoded push notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PubSubEvent {
	Bits(BitsEvent),
	Subscription(SubscriptionEvent),
	Whisper(WhisperEvent),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BitsEvent {
	pub channel_id: String,
	/// `None` for anonymous cheers.
	pub user: Option<UserRef>,
	pub bits: u32,
	pub total_bits: u32,
	pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionEvent {
	pub channel_id: String,
	/// The subscriber; the recipient for gifts.
	pub user: UserRef,
	/// The gifter, when the sub was gifted by a known user.
	pub gifter: Option<UserRef>,
	pub notice: SubNotice,
	pub context: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WhisperEvent {
	pub thread_id: String,
	pub from: UserRef,
	pub body: String,
}

#[derive(Debug, Deserialize)]
struct BitsMessage {
	data: BitsData,
}

#[derive(Debug, Deserialize)]
struct BitsData {
	#[serde(default)]
	user_name: Option<String>,
	#[serde(default)]
	user_id: Option<String>,
	channel_id: String,
	#[serde(default)]
	chat_message: String,
	bits_used: u32,
	#[serde(default)]
	total_bits_used: u32,
	#[serde(default)]
	is_anonymous: bool,
}

#[derive(Debug, Deserialize)]
struct SubMessage {
	#[serde(default)]
	user_name: String,
	#[serde(default)]
	user_id: String,
	channel_id: String,
	#[serde(default)]
	sub_plan: String,
	#[serde(default)]
	cumulative_months: u32,
	#[serde(default)]
	months: u32,
	#[serde(default)]
	context: String,
	#[serde(default)]
	is_gift: bool,
	#[serde(default)]
	recipient_id: Option<String>,
	#[serde(default)]
	recipient_user_name: Option<String>,
	#[serde(default)]
	sub_message: Option<SubText>,
}

#[derive(Debug, Deserialize)]
struct SubText {
	#[serde(default)]
	message: String,
}

/// Outer whisper document; `data` is itself a JSON string.
#[derive(Debug, Deserialize)]
struct WhisperOuter {
	#[serde(rename = "type")]
	kind: String,
	data: String,
}

#[derive(Debug, Deserialize)]
struct WhisperInner {
	#[serde(default)]
	thread_id: String,
	body: String,
	from_id: serde_json::Value,
	#[serde(default)]
	tags: WhisperTags,
}

#[derive(Debug, Default, Deserialize)]
struct WhisperTags {
	#[serde(default)]
	login: String,
}

fn non_empty(s: Option<String>) -> Option<String> {
	s.filter(|s| !s.is_empty())
}

/// Decode the `message` string of a `MESSAGE` envelope for a known subject.
///
/// Returns `Ok(None)` for documents that are valid but carry nothing to
/// deliver (e.g. whisper thread updates).
pub fn decode_message(subject: TopicSubject, message: &str) -> Result<Option<PubSubEvent>, PubSubError> {
	match subject {
		TopicSubject::BitsV1 | TopicSubject::BitsV2 => {
			let msg: BitsMessage = serde_json::from_str(message)?;
			Ok(Some(PubSubEvent::Bits(bits_event(msg.data))))
		}
		TopicSubject::Subscriptions => {
			let msg: SubMessage = serde_json::from_str(message)?;
			Ok(Some(PubSubEvent::Subscription(sub_event(msg))))
		}
		TopicSubject::Whispers => {
			let outer: WhisperOuter = serde_json::from_str(message)?;
			if outer.kind != "whisper_received" {
				return Ok(None);
			}
			let inner: WhisperInner = serde_json::from_str(&outer.data)?;
			Ok(Some(PubSubEvent::Whisper(whisper_event(inner))))
		}
	}
}

/// Resolve the envelope topic and decode its payload.
///
/// An unknown subject is [`PubSubError::UnknownSubject`].
pub fn decode_envelope_message(topic: &str, message: &str) -> Result<Option<PubSubEvent>, PubSubError> {
	let topic = Topic::parse(topic)?;
	let subject = topic
		.known_subject()
		.map_err(|_| PubSubError::UnknownSubject(topic.subject.clone()))?;
	decode_message(subject, message)
}

fn bits_event(data: BitsData) -> BitsEvent {
	let user = match (data.is_anonymous, non_empty(data.user_id), non_empty(data.user_name)) {
		(true, _, _) | (false, None, None) => None,
		(false, id, nick) => Some(UserRef::new(id.unwrap_or_default(), nick.unwrap_or_default())),
	};
	BitsEvent {
		channel_id: data.channel_id,
		user,
		bits: data.bits_used,
		total_bits: data.total_bits_used,
		message: data.chat_message,
	}
}

fn sub_event(msg: SubMessage) -> SubscriptionEvent {
	let recipient = match (non_empty(msg.recipient_id), non_empty(msg.recipient_user_name)) {
		(None, None) => None,
		(id, nick) => Some(UserRef::new(id.unwrap_or_default(), nick.unwrap_or_default())),
	};
	let buyer = (!msg.user_id.is_empty() || !msg.user_name.is_empty())
		.then(|| UserRef::new(msg.user_id, msg.user_name));

	let gift = msg.is_gift || recipient.is_some();
	let (user, gifter) = match recipient {
		Some(recipient) => (recipient, buyer),
		None => (buyer.unwrap_or_default(), None),
	};

	SubscriptionEvent {
		channel_id: msg.channel_id,
		user,
		gifter,
		notice: SubNotice {
			plan: msg.sub_plan,
			months: msg.cumulative_months.max(msg.months),
			gift,
			message: msg.sub_message.map(|m| m.message).unwrap_or_default(),
		},
		context: msg.context,
	}
}

fn whisper_event(inner: WhisperInner) -> WhisperEvent {
	let from_id = match inner.from_id {
		serde_json::Value::String(s) => s,
		serde_json::Value::Number(n) => n.to_string(),
		_ => String::new(),
	};
	WhisperEvent {
		thread_id: inner.thread_id,
		from: UserRef::new(from_id, inner.tags.login),
		body: inner.body,
	}
}
