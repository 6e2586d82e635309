use std::collections::HashSet;
use std::sync::Arc;

use chatpump_domain::{AuthProvider, ChatMode, Credentials, UserResolver};
use chatpump_store::{AlertPump, ChatLogStore, Direction, TraceStore};
use chatpump_util::{Shutdown, shutdown};
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tracing::{debug, info, warn};

use crate::presence::{PresenceSnapshot, PresenceTable};
use crate::ratelimit::{OutboundQueue, RateLimit};
use crate::{ClientError, IrcMessage};

/// Capabilities requested after the welcome numeric.
pub(crate) const CAPABILITIES: &str = "twitch.tv/membership twitch.tv/tags twitch.tv/commands";

/// Connection phase of the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
	Connecting,
	Registered,
	Joined,
	Active,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
	/// Room to join, without the leading `#`.
	pub room: String,

	/// Nicks whose messages are logged as filtered and never raise alerts.
	pub ignore: HashSet<String>,

	pub rate_limit: RateLimit,

	/// Maximum number of outbound lines waiting for the rate limiter.
	pub outbound_capacity: usize,
}

impl ClientConfig {
	pub fn new(room: impl Into<String>) -> Self {
		Self {
			room: room.into(),
			ignore: HashSet::new(),
			rate_limit: RateLimit::default(),
			outbound_capacity: 64,
		}
	}
}

pub(crate) struct SessionState {
	pub(crate) mode: RwLock<ChatMode>,
	pub(crate) phase: RwLock<Phase>,
	pub(crate) presence: PresenceTable,
	pub(crate) outbound: Mutex<Option<OutboundQueue>>,
}

/// Chat protocol client: parses inbound lines into log lines and alerts.
///
/// One [`ChatClient::run`] call drives one connection; the caller owns
/// reconnect policy.
#[derive(Clone)]
pub struct ChatClient {
	pub(crate) room: String,
	pub(crate) ignore: Arc<HashSet<String>>,
	rate_limit: RateLimit,
	outbound_capacity: usize,
	pub(crate) creds: Credentials,
	pub(crate) resolver: Arc<dyn UserResolver>,
	pub(crate) chat_log: ChatLogStore,
	pub(crate) alerts: AlertPump,
	trace: TraceStore,
	pub(crate) state: Arc<SessionState>,
}

impl std::fmt::Debug for ChatClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ChatClient")
			.field("room", &self.room)
			.field("nick", &self.creds.name)
			.field("phase", &self.phase())
			.finish()
	}
}

impl ChatClient {
	/// Build a client. Fails when the auth provider has no credentials.
	pub fn new(
		cfg: ClientConfig,
		auth: &dyn AuthProvider,
		resolver: Arc<dyn UserResolver>,
		chat_log: ChatLogStore,
		alerts: AlertPump,
		trace: TraceStore,
	) -> Result<Self, ClientError> {
		let creds = auth.credentials();
		if !creds.has_auth {
			return Err(ClientError::MissingAuth);
		}

		let room = cfg.room.trim().trim_start_matches('#').to_ascii_lowercase();
		let ignore = cfg.ignore.iter().map(|n| n.to_ascii_lowercase()).collect();

		Ok(Self {
			room,
			ignore: Arc::new(ignore),
			rate_limit: cfg.rate_limit,
			outbound_capacity: cfg.outbound_capacity,
			creds,
			resolver,
			chat_log,
			alerts,
			trace,
			state: Arc::new(SessionState {
				mode: RwLock::new(ChatMode::default()),
				phase: RwLock::new(Phase::Connecting),
				presence: PresenceTable::new(),
				outbound: Mutex::new(None),
			}),
		})
	}

	pub fn room(&self) -> &str {
		&self.room
	}

	pub fn nick(&self) -> &str {
		&self.creds.name
	}

	pub fn phase(&self) -> Phase {
		*self.state.phase.read()
	}

	pub fn mode(&self) -> ChatMode {
		self.state.mode.read().clone()
	}

	pub fn viewers(&self) -> Vec<PresenceSnapshot> {
		self.state.presence.snapshot()
	}

	/// Queue a raw protocol line through the rate limiter.
	pub async fn write_raw(&self, line: impl Into<String>) -> Result<(), ClientError> {
		let queue = self.state.outbound.lock().clone().ok_or(ClientError::NotConnected)?;
		queue.send(line).await
	}

	/// Say `text` in the joined room.
	pub async fn write_say(&self, text: &str) -> Result<(), ClientError> {
		let text = text.replace(['\r', '\n'], " ");
		self.write_raw(format!("PRIVMSG #{} :{text}", self.room)).await
	}

	/// Drive one connection until EOF, shutdown, transport failure or a
	/// server-requested reconnect.
	pub async fn run<S>(&self, stream: S, mut shutdown: Shutdown) -> Result<(), ClientError>
	where
		S: AsyncRead + AsyncWrite + Send + 'static,
	{
		let (reader, writer) = tokio::io::split(stream);
		let (queue_trigger, queue_shutdown) = shutdown::channel();
		let (queue, drain) = OutboundQueue::spawn(
			writer,
			self.rate_limit,
			self.outbound_capacity,
			Some(self.trace.clone()),
			queue_shutdown,
		);

		*self.state.phase.write() = Phase::Connecting;
		self.state.presence.clear();
		*self.state.outbound.lock() = Some(queue.clone());

		let result = self.session(reader, &queue, &mut shutdown).await;

		*self.state.outbound.lock() = None;
		*self.state.phase.write() = Phase::Connecting;
		queue_trigger.trigger();
		drop(queue);
		if let Err(e) = drain.await {
			warn!(error = %e, "irc: outbound drain task failed");
		}

		result
	}

	async fn session<R>(&self, reader: R, queue: &OutboundQueue, shutdown: &mut Shutdown) -> Result<(), ClientError>
	where
		R: AsyncRead + Unpin,
	{
		queue.send(format!("PASS oauth:{}", self.oauth_token())).await?;
		queue.send(format!("NICK {}", self.creds.name.to_ascii_lowercase())).await?;

		let mut lines = BufReader::new(reader).lines();
		loop {
			tokio::select! {
				biased;

				_ = shutdown.wait() => {
					info!(room = %self.room, "irc: shutdown requested");
					return Ok(());
				}

				line = lines.next_line() => match line? {
					Some(line) => self.handle_line(&line, queue).await?,
					None => {
						info!(room = %self.room, "irc: connection closed by server");
						return Ok(());
					}
				},
			}
		}
	}

	fn oauth_token(&self) -> &str {
		let secret = self.creds.secret.expose();
		secret.strip_prefix("oauth:").unwrap_or(secret)
	}

	async fn handle_line(&self, line: &str, queue: &OutboundQueue) -> Result<(), ClientError> {
		if line.trim().is_empty() {
			return Ok(());
		}

		metrics::counter!("chatpump_irc_lines_total").increment(1);
		self.trace.record(Direction::Inbound, line);

		let msg = match IrcMessage::parse(line) {
			Ok(m) => m,
			Err(e) => {
				warn!(error = %e, line, "irc: unparsable line");
				return Ok(());
			}
		};

		debug!(command = %msg.command, "irc: inbound");
		self.dispatch(msg, queue).await
	}

	pub(crate) fn set_phase(&self, phase: Phase) {
		let mut current = self.state.phase.write();
		if *current != phase {
			debug!(from = ?*current, to = ?phase, "irc: phase change");
			*current = phase;
		}
	}
}
