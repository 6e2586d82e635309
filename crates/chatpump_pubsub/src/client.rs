use std::collections::BTreeSet;
use std::time::Duration;

use chatpump_domain::{AlertPayload, SecretString, Topic};
use chatpump_store::AlertPump;
use chatpump_util::{Shutdown, backoff_delay};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep, sleep_until};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::decode::decode_envelope_message;
use crate::frames::{ControlFrame, Envelope, EnvelopeKind};
use crate::{PubSubError, PubSubEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

#[derive(Debug, Clone)]
pub struct PubSubConfig {
	pub url: String,
	pub auth_token: SecretString,

	/// Topics listened to from the first connection on.
	pub topics: Vec<Topic>,

	pub ping_interval: Duration,
	pub pong_timeout: Duration,

	/// Consecutive unanswered pings before the connection is considered dead.
	pub max_missed_pongs: u32,

	pub reconnect_min_delay: Duration,
	pub reconnect_max_delay: Duration,
}

impl PubSubConfig {
	pub fn new(url: impl Into<String>, auth_token: SecretString) -> Self {
		Self {
			url: url.into(),
			auth_token,
			topics: Vec::new(),
			ping_interval: Duration::from_secs(240),
			pong_timeout: Duration::from_secs(10),
			max_missed_pongs: 2,
			reconnect_min_delay: Duration::from_millis(500),
			reconnect_max_delay: Duration::from_secs(30),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PubSubState {
	Disconnected,
	Connected,
	Subscribed,
	Retrying,
}

/// Caller side of a running [`PubSubClient`].
#[derive(Debug, Clone)]
pub struct PubSubHandle {
	add_tx: mpsc::UnboundedSender<Topic>,
	remove_tx: mpsc::UnboundedSender<Topic>,
	state_rx: watch::Receiver<PubSubState>,
}

impl PubSubHandle {
	/// Listen to `topic`, now if connected, otherwise on the next connection.
	pub fn add_topic(&self, topic: Topic) -> Result<(), PubSubError> {
		self.add_tx.send(topic).map_err(|_| PubSubError::Closed)
	}

	pub fn remove_topic(&self, topic: Topic) -> Result<(), PubSubError> {
		self.remove_tx.send(topic).map_err(|_| PubSubError::Closed)
	}

	pub fn state(&self) -> watch::Receiver<PubSubState> {
		self.state_rx.clone()
	}

	pub fn current_state(&self) -> PubSubState {
		*self.state_rx.borrow()
	}
}

enum SessionEnd {
	Shutdown,
	/// The server asked for a fresh connection.
	Requested,
	Reconnect,
}

enum Flow {
	Continue,
	Reconnect,
}

#[derive(Debug, Default)]
struct Keepalive {
	deadline: Option<Instant>,
	missed: u32,
}

impl Keepalive {
	fn ping_sent(&mut self, now: Instant, pong_timeout: Duration) {
		self.deadline = Some(now + pong_timeout);
	}

	fn pong(&mut self) {
		self.deadline = None;
		self.missed = 0;
	}

	/// Count a missed deadline; true once `max` consecutive pongs are missing.
	fn deadline_missed(&mut self, max: u32) -> bool {
		self.deadline = None;
		self.missed += 1;
		self.missed >= max.max(1)
	}
}

async fn deadline_elapsed(deadline: Option<Instant>) {
	match deadline {
		Some(at) => sleep_until(at).await,
		None => std::future::pending().await,
	}
}

async fn send_frame(sink: &mut WsSink, frame: &ControlFrame) -> Result<(), PubSubError> {
	let text = frame.to_text()?;
	sink.send(Message::Text(text.into())).await?;
	Ok(())
}

/// Push-notification client.
///
/// Owns one websocket at a time and reconnects with capped exponential
/// backoff. Whispers go to the alert pump; every decoded event also goes to
/// the optional event channel.
pub struct PubSubClient {
	cfg: PubSubConfig,
	alerts: AlertPump,
	events: Option<mpsc::Sender<PubSubEvent>>,
	desired: BTreeSet<Topic>,
	add_rx: mpsc::UnboundedReceiver<Topic>,
	remove_rx: mpsc::UnboundedReceiver<Topic>,
	add_open: bool,
	remove_open: bool,
	state_tx: watch::Sender<PubSubState>,
	shutdown: Shutdown,
}

impl PubSubClient {
	pub fn spawn(
		cfg: PubSubConfig,
		alerts: AlertPump,
		events: Option<mpsc::Sender<PubSubEvent>>,
		shutdown: Shutdown,
	) -> (PubSubHandle, JoinHandle<Result<(), PubSubError>>) {
		let (add_tx, add_rx) = mpsc::unbounded_channel();
		let (remove_tx, remove_rx) = mpsc::unbounded_channel();
		let (state_tx, state_rx) = watch::channel(PubSubState::Disconnected);

		let client = Self {
			desired: cfg.topics.iter().cloned().collect(),
			cfg,
			alerts,
			events,
			add_rx,
			remove_rx,
			add_open: true,
			remove_open: true,
			state_tx,
			shutdown,
		};
		let task = tokio::spawn(client.run());

		(
			PubSubHandle {
				add_tx,
				remove_tx,
				state_rx,
			},
			task,
		)
	}

	fn set_state(&self, state: PubSubState) {
		self.state_tx.send_if_modified(|current| {
			if *current == state {
				return false;
			}
			debug!(from = ?*current, to = ?state, "pubsub: state change");
			*current = state;
			true
		});
	}

	async fn run(mut self) -> Result<(), PubSubError> {
		let mut attempt: u32 = 0;

		loop {
			if self.shutdown.is_triggered() {
				break;
			}

			info!(url = %self.cfg.url, "pubsub: connecting");
			let connect = tokio::select! {
				biased;
				_ = self.shutdown.wait() => break,
				res = tokio_tungstenite::connect_async(self.cfg.url.as_str()) => res,
			};

			match connect {
				Ok((ws, _)) => {
					let started = Instant::now();
					match self.session(ws).await {
						Ok(SessionEnd::Shutdown) => break,
						Ok(SessionEnd::Requested) => attempt = 0,
						Ok(SessionEnd::Reconnect) => {}
						Err(e) if e.is_fatal() => {
							error!(error = %e, "pubsub: protocol mismatch, giving up");
							self.set_state(PubSubState::Disconnected);
							return Err(e);
						}
						Err(e) => warn!(error = %e, "pubsub: connection failed"),
					}

					// Only a session that held up resets the backoff.
					if started.elapsed() >= self.cfg.reconnect_max_delay {
						attempt = 0;
					}
				}
				Err(e) => warn!(error = %e, url = %self.cfg.url, "pubsub: connect failed"),
			}

			metrics::counter!("chatpump_pubsub_reconnects_total").increment(1);
			let delay = backoff_delay(attempt, self.cfg.reconnect_min_delay, self.cfg.reconnect_max_delay);
			attempt = attempt.saturating_add(1);
			self.set_state(PubSubState::Retrying);
			debug!(delay_ms = delay.as_millis() as u64, "pubsub: retrying");

			tokio::select! {
				biased;
				_ = self.shutdown.wait() => break,
				_ = sleep(delay) => {}
			}
		}

		self.set_state(PubSubState::Disconnected);
		info!("pubsub: stopped");
		Ok(())
	}

	async fn session(&mut self, ws: WsStream) -> Result<SessionEnd, PubSubError> {
		let (mut sink, mut stream) = ws.split();
		self.set_state(PubSubState::Connected);

		let mut active = BTreeSet::new();
		self.sync_topics(&mut sink, &mut active).await?;

		let period = self.cfg.ping_interval.max(Duration::from_millis(1));
		let mut ping = interval_at(Instant::now() + period, period);
		ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
		let mut keepalive = Keepalive::default();

		loop {
			let deadline = keepalive.deadline;
			tokio::select! {
				biased;

				_ = self.shutdown.wait() => {
					if let Err(e) = sink.send(Message::Close(None)).await {
						debug!(error = %e, "pubsub: close frame not sent");
					}
					return Ok(SessionEnd::Shutdown);
				}

				topic = self.add_rx.recv(), if self.add_open => match topic {
					Some(topic) => {
						self.desired.insert(topic);
						self.sync_topics(&mut sink, &mut active).await?;
					}
					None => self.add_open = false,
				},

				topic = self.remove_rx.recv(), if self.remove_open => match topic {
					Some(topic) => {
						self.desired.remove(&topic);
						self.sync_topics(&mut sink, &mut active).await?;
					}
					None => self.remove_open = false,
				},

				_ = ping.tick() => {
					send_frame(&mut sink, &ControlFrame::Ping).await?;
					keepalive.ping_sent(Instant::now(), self.cfg.pong_timeout);
				}

				_ = deadline_elapsed(deadline) => {
					let dead = keepalive.deadline_missed(self.cfg.max_missed_pongs);
					metrics::counter!("chatpump_pubsub_missed_pongs_total").increment(1);
					warn!(missed = keepalive.missed, "pubsub: pong deadline missed");
					if dead {
						return Ok(SessionEnd::Reconnect);
					}
				}

				msg = stream.next() => match msg {
					None => {
						warn!("pubsub: websocket closed");
						return Ok(SessionEnd::Reconnect);
					}
					Some(Err(e)) => return Err(e.into()),
					Some(Ok(Message::Text(text))) => {
						if let Flow::Reconnect = self.handle_text(text.as_str(), &mut keepalive)? {
							return Ok(SessionEnd::Requested);
						}
					}
					Some(Ok(Message::Close(frame))) => {
						warn!(?frame, "pubsub: websocket closed by server");
						return Ok(SessionEnd::Reconnect);
					}
					Some(Ok(_)) => {}
				},
			}
		}
	}

	/// Issue LISTEN/UNLISTEN for the difference between desired and active topics.
	async fn sync_topics(&self, sink: &mut WsSink, active: &mut BTreeSet<Topic>) -> Result<(), PubSubError> {
		let listen: Vec<&Topic> = self.desired.difference(active).collect();
		let unlisten: Vec<&Topic> = active.difference(&self.desired).collect();

		if !listen.is_empty() {
			let frame = ControlFrame::listen(listen.iter().copied(), &self.cfg.auth_token);
			info!(topics = listen.len(), nonce = ?frame.nonce(), "pubsub: listen");
			send_frame(sink, &frame).await?;
		}
		if !unlisten.is_empty() {
			let frame = ControlFrame::unlisten(unlisten.iter().copied(), &self.cfg.auth_token);
			info!(topics = unlisten.len(), nonce = ?frame.nonce(), "pubsub: unlisten");
			send_frame(sink, &frame).await?;
		}

		active.clone_from(&self.desired);
		self.set_state(if active.is_empty() {
			PubSubState::Connected
		} else {
			PubSubState::Subscribed
		});
		Ok(())
	}

	fn handle_text(&self, text: &str, keepalive: &mut Keepalive) -> Result<Flow, PubSubError> {
		let envelope = match Envelope::parse(text) {
			Ok(envelope) => envelope,
			Err(e) => {
				warn!(error = %e, "pubsub: malformed frame");
				return Ok(Flow::Continue);
			}
		};

		match envelope.kind() {
			EnvelopeKind::Pong => {
				keepalive.pong();
				debug!("pubsub: pong");
			}
			EnvelopeKind::Response => match envelope.response_error() {
				Some(err) => warn!(nonce = ?envelope.nonce, error = err, "pubsub: request rejected"),
				None => debug!(nonce = ?envelope.nonce, "pubsub: request acknowledged"),
			},
			EnvelopeKind::Message => {
				let Some(data) = envelope.data else {
					warn!("pubsub: message without data");
					return Ok(Flow::Continue);
				};
				match decode_envelope_message(&data.topic, &data.message) {
					Ok(Some(event)) => self.deliver(event),
					Ok(None) => debug!(topic = %data.topic, "pubsub: nothing to deliver"),
					Err(e) if e.is_fatal() => return Err(e),
					Err(e) => warn!(error = %e, topic = %data.topic, "pubsub: dropping message"),
				}
			}
			EnvelopeKind::Reconnect => {
				info!("pubsub: server requested reconnect");
				return Ok(Flow::Reconnect);
			}
			EnvelopeKind::Other => debug!(kind = %envelope.kind, "pubsub: ignoring frame"),
		}

		Ok(Flow::Continue)
	}

	fn deliver(&self, event: PubSubEvent) {
		if let PubSubEvent::Whisper(w) = &event {
			self.alerts.post(
				w.from.clone(),
				AlertPayload::Whisper {
					content: w.body.clone(),
				},
			);
		}

		let Some(events) = &self.events else {
			return;
		};
		if let Err(e) = events.try_send(event) {
			warn!(error = %e, "pubsub: event consumer lagging, dropping event");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const TIMEOUT: Duration = Duration::from_secs(10);

	#[test]
	fn pong_before_deadline_clears_it() {
		let mut k = Keepalive::default();
		let now = Instant::now();
		k.ping_sent(now, TIMEOUT);
		assert_eq!(k.deadline, Some(now + TIMEOUT));
		k.pong();
		assert_eq!(k.deadline, None);
		assert_eq!(k.missed, 0);
	}

	#[test]
	fn misses_must_be_consecutive() {
		let mut k = Keepalive::default();
		let now = Instant::now();

		k.ping_sent(now, TIMEOUT);
		assert!(!k.deadline_missed(2));
		k.ping_sent(now, TIMEOUT);
		k.pong();
		k.ping_sent(now, TIMEOUT);
		assert!(!k.deadline_missed(2));
		k.ping_sent(now, TIMEOUT);
		assert!(k.deadline_missed(2));
	}

	#[test]
	fn zero_max_is_treated_as_one() {
		let mut k = Keepalive::default();
		k.ping_sent(Instant::now(), TIMEOUT);
		assert!(k.deadline_missed(0));
	}
}
