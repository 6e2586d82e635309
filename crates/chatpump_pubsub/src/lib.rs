#![forbid(unsafe_code)]

pub mod client;
pub mod decode;
pub mod frames;


use thiserror::Error;

pub use client::{PubSubClient, PubSubConfig, PubSubHandle, PubSubState};
pub use decode::{BitsEvent, PubSubEvent, SubscriptionEvent, WhisperEvent};
pub use frames::{ControlFrame, Envelope};

#[derive(Debug, Error)]
pub enum PubSubError {
	#[error("websocket error")]
	WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
	#[error("invalid json payload")]
	Json(#[from] serde_json::Error),
	#[error("invalid topic")]
	Topic(#[from] chatpump_domain::ParseError),
	#[error("unknown topic subject {0:?}")]
	UnknownSubject(String),
	#[error("client stopped")]
	Closed,
}

impl PubSubError {
	/// Errors that a reconnect cannot fix.
	pub fn is_fatal(&self) -> bool {
		matches!(self, PubSubError::UnknownSubject(_))
	}
}
