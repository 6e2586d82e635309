use chatpump_domain::{SecretString, Topic};
use serde::{Deserialize, Serialize, Serializer};

/// Outbound control frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum ControlFrame {
	Ping,
	Listen { nonce: String, data: ListenData },
	Unlisten { nonce: String, data: ListenData },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListenData {
	pub topics: Vec<String>,
	#[serde(serialize_with = "expose_secret")]
	pub auth_token: SecretString,
}

fn expose_secret<S: Serializer>(secret: &SecretString, s: S) -> Result<S::Ok, S::Error> {
	s.serialize_str(secret.expose())
}

fn nonce() -> String {
	uuid::Uuid::new_v4().simple().to_string()
}

impl ControlFrame {
	pub fn listen<'a>(topics: impl IntoIterator<Item = &'a Topic>, auth_token: &SecretString) -> Self {
		ControlFrame::Listen {
			nonce: nonce(),
			data: ListenData {
				topics: topics.into_iter().map(Topic::to_string).collect(),
				auth_token: auth_token.clone(),
			},
		}
	}

	pub fn unlisten<'a>(topics: impl IntoIterator<Item = &'a Topic>, auth_token: &SecretString) -> Self {
		ControlFrame::Unlisten {
			nonce: nonce(),
			data: ListenData {
				topics: topics.into_iter().map(Topic::to_string).collect(),
				auth_token: auth_token.clone(),
			},
		}
	}

	pub fn nonce(&self) -> Option<&str> {
		match self {
			ControlFrame::Ping => None,
			ControlFrame::Listen { nonce, .. } | ControlFrame::Unlisten { nonce, .. } => Some(nonce),
		}
	}

	pub fn to_text(&self) -> Result<String, serde_json::Error> {
		serde_json::to_string(self)
	}
}

/// Inbound frame: `{type, nonce?, error?, data?: {topic, message}}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Envelope {
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(default)]
	pub nonce: Option<String>,
	#[serde(default)]
	pub error: Option<String>,
	#[serde(default)]
	pub data: Option<EnvelopeData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EnvelopeData {
	pub topic: String,
	/// JSON document encoded as a string.
	pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
	Pong,
	Response,
	Message,
	Reconnect,
	Other,
}

impl Envelope {
	pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
		serde_json::from_str(text)
	}

	pub fn kind(&self) -> EnvelopeKind {
		match self.kind.as_str() {
			"PONG" => EnvelopeKind::Pong,
			"RESPONSE" => EnvelopeKind::Response,
			"MESSAGE" => EnvelopeKind::Message,
			"RECONNECT" => EnvelopeKind::Reconnect,
			_ => EnvelopeKind::Other,
		}
	}

	/// Error text of a `RESPONSE`, if it carries a real one.
	pub fn response_error(&self) -> Option<&str> {
		self.error.as_deref().filter(|e| !e.trim().is_empty())
	}
}

#[cfg(test)]
mod tests {
	use chatpump_domain::TopicSubject;

	use super::*;

	#[test]
	fn ping_frame_is_bare() {
		assert_eq!(ControlFrame::Ping.to_text().unwrap(), r#"{"type":"PING"}"#);
	}

	#[test]
	fn listen_frame_layout() {
		let topics = [
			Topic::of(TopicSubject::BitsV1, "44322889"),
			Topic::of(TopicSubject::Whispers, "44322889"),
		];
		let frame = ControlFrame::listen(&topics, &SecretString::new("tok"));
		let value: serde_json::Value = serde_json::from_str(&frame.to_text().unwrap()).unwrap();

		assert_eq!(value["type"], "LISTEN");
		assert_eq!(value["nonce"].as_str(), frame.nonce());
		assert_eq!(value["data"]["auth_token"], "tok");
		assert_eq!(
			value["data"]["topics"],
			serde_json::json!(["channel-bits-events-v1.44322889", "whispers.44322889"])
		);
	}

	#[test]
	fn listen_frame_debug_hides_token() {
		let frame = ControlFrame::unlisten(&[Topic::of(TopicSubject::Whispers, "1")], &SecretString::new("hunter2"));
		assert!(!format!("{frame:?}").contains("hunter2"));
	}

	#[test]
	fn envelope_kinds() {
		let pong = Envelope::parse(r#"{"type":"PONG"}"#).unwrap();
		assert_eq!(pong.kind(), EnvelopeKind::Pong);

		let ok = Envelope::parse(r#"{"type":"RESPONSE","nonce":"n","error":""}"#).unwrap();
		assert_eq!(ok.kind(), EnvelopeKind::Response);
		assert_eq!(ok.response_error(), None);

		let bad = Envelope::parse(r#"{"type":"RESPONSE","nonce":"n","error":"ERR_BADAUTH"}"#).unwrap();
		assert_eq!(bad.response_error(), Some("ERR_BADAUTH"));

		let msg = Envelope::parse(r#"{"type":"MESSAGE","data":{"topic":"whispers.1","message":"{}"}}"#).unwrap();
		assert_eq!(msg.kind(), EnvelopeKind::Message);
		assert_eq!(msg.data.unwrap().topic, "whispers.1");

		assert_eq!(Envelope::parse(r#"{"type":"HELLO"}"#).unwrap().kind(), EnvelopeKind::Other);
		assert!(Envelope::parse("not json").is_err());
	}
}
