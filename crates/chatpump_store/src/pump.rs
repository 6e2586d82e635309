use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;

use chatpump_util::Shutdown;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Events that can flow through an [`EventPump`].
pub trait PumpEvent: Clone + Send + 'static {
	type Kind: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;

	fn kind(&self) -> Self::Kind;
}

/// Per-pump processing hooks, run on the pump task only.
pub trait PumpPolicy<E>: Send + 'static {
	type Reject: fmt::Display + Send;

	/// Decide whether `event` is forwarded. Runs before fan-out.
	fn admit(&mut self, event: &E) -> Result<(), Self::Reject>;

	/// Runs after an admitted event was offered to every subscriber.
	fn after_forward(&mut self, _event: &E) {}
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PumpError {
	#[error("event pump {0} is closed")]
	Closed(&'static str),
}

/// Configuration for an [`EventPump`].
#[derive(Debug, Clone)]
pub struct PumpConfig {
	/// Label used in logs and metrics.
	pub name: &'static str,

	/// Maximum number of events waiting for the pump task.
	pub intake_capacity: usize,

	/// Maximum number of queued events per subscriber.
	pub subscriber_queue_capacity: usize,
}

impl PumpConfig {
	pub fn named(name: &'static str) -> Self {
		Self {
			name,
			intake_capacity: 1024,
			subscriber_queue_capacity: 256,
		}
	}
}

enum Control<E: PumpEvent> {
	Subscribe {
		name: String,
		interest: HashSet<E::Kind>,
		tx: mpsc::Sender<E>,
		ack: oneshot::Sender<(u64, mpsc::UnboundedSender<u64>)>,
	},
	Shutdown,
}

/// Producer and subscription handle for one pump task.
pub struct EventPump<E: PumpEvent> {
	name: &'static str,
	subscriber_queue_capacity: usize,
	intake: mpsc::Sender<E>,
	control: mpsc::Sender<Control<E>>,
}

impl<E: PumpEvent> Clone for EventPump<E> {
	fn clone(&self) -> Self {
		Self {
			name: self.name,
			subscriber_queue_capacity: self.subscriber_queue_capacity,
			intake: self.intake.clone(),
			control: self.control.clone(),
		}
	}
}

impl<E: PumpEvent> fmt::Debug for EventPump<E> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("EventPump")
			.field("name", &self.name)
			.field("closed", &self.intake.is_closed())
			.finish()
	}
}

/// Receiving end of one subscriber queue.
///
/// Dropping it unsubscribes.
pub struct Subscription<E> {
	id: u64,
	name: String,
	rx: mpsc::Receiver<E>,
	unsubscribe: mpsc::UnboundedSender<u64>,
}

impl<E> Subscription<E> {
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Next event, or `None` once unsubscribed or the pump stopped.
	pub async fn recv(&mut self) -> Option<E> {
		self.rx.recv().await
	}

	pub fn try_recv(&mut self) -> Option<E> {
		self.rx.try_recv().ok()
	}

	/// Ask the pump to close this queue. Already queued events stay readable.
	pub fn unsubscribe(&self) {
		let _ = self.unsubscribe.send(self.id);
	}
}

impl<E> Drop for Subscription<E> {
	fn drop(&mut self) {
		let _ = self.unsubscribe.send(self.id);
	}
}

impl<E> fmt::Debug for Subscription<E> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Subscription")
			.field("id", &self.id)
			.field("name", &self.name)
			.finish()
	}
}

impl<E: PumpEvent> EventPump<E> {
	/// Start the pump task. It stops on `shutdown`, on [`EventPump::close`], or
	/// once every handle was dropped; all subscriber queues are closed then.
	pub fn spawn<P>(cfg: PumpConfig, policy: P, shutdown: Shutdown) -> (Self, JoinHandle<()>)
	where
		P: PumpPolicy<E>,
	{
		let (intake_tx, intake_rx) = mpsc::channel(cfg.intake_capacity.max(1));
		let (control_tx, control_rx) = mpsc::channel(16);
		let (unsub_tx, unsub_rx) = mpsc::unbounded_channel();

		let worker = Worker {
			name: cfg.name,
			policy,
			subscribers: Vec::new(),
			next_id: 0,
			unsub_tx,
		};
		let task = tokio::spawn(worker.run(intake_rx, control_rx, unsub_rx, shutdown));

		let pump = Self {
			name: cfg.name,
			subscriber_queue_capacity: cfg.subscriber_queue_capacity.max(1),
			intake: intake_tx,
			control: control_tx,
		};
		(pump, task)
	}

	pub fn name(&self) -> &'static str {
		self.name
	}

	/// Submit an event without waiting. A full intake drops the event.
	pub fn submit(&self, event: E) {
		match self.intake.try_send(event) {
			Ok(()) => {}
			Err(mpsc::error::TrySendError::Full(ev)) => {
				metrics::counter!("chatpump_pump_intake_full_total", "pump" => self.name).increment(1);
				warn!(pump = self.name, kind = ?ev.kind(), "event pump: intake full, event dropped");
			}
			Err(mpsc::error::TrySendError::Closed(_)) => {
				debug!(pump = self.name, "event pump: submit after close");
			}
		}
	}

	/// Register a subscriber. An empty `interest` set receives every kind.
	///
	/// Resolves after the pump task registered the queue, so every event
	/// submitted afterwards is delivered to it in order.
	pub async fn subscribe(
		&self,
		name: impl Into<String>,
		interest: impl IntoIterator<Item = E::Kind>,
	) -> Result<Subscription<E>, PumpError> {
		self.subscribe_with_capacity(name, interest, self.subscriber_queue_capacity).await
	}

	/// Like [`EventPump::subscribe`] with an explicit queue capacity.
	pub async fn subscribe_with_capacity(
		&self,
		name: impl Into<String>,
		interest: impl IntoIterator<Item = E::Kind>,
		capacity: usize,
	) -> Result<Subscription<E>, PumpError> {
		let name = name.into();
		let (tx, rx) = mpsc::channel(capacity.max(1));
		let (ack_tx, ack_rx) = oneshot::channel();

		self.control
			.send(Control::Subscribe {
				name: name.clone(),
				interest: interest.into_iter().collect(),
				tx,
				ack: ack_tx,
			})
			.await
			.map_err(|_| PumpError::Closed(self.name))?;

		let (id, unsubscribe) = ack_rx.await.map_err(|_| PumpError::Closed(self.name))?;
		Ok(Subscription {
			id,
			name,
			rx,
			unsubscribe,
		})
	}

	/// Stop the pump task.
	pub async fn close(&self) {
		let _ = self.control.send(Control::Shutdown).await;
	}

	pub fn is_closed(&self) -> bool {
		self.intake.is_closed()
	}
}

struct Subscriber<E: PumpEvent> {
	id: u64,
	name: String,
	interest: HashSet<E::Kind>,
	tx: mpsc::Sender<E>,
	dropped: u64,
}

impl<E: PumpEvent> Subscriber<E> {
	fn wants(&self, kind: &E::Kind) -> bool {
		self.interest.is_empty() || self.interest.contains(kind)
	}
}

struct Worker<E: PumpEvent, P> {
	name: &'static str,
	policy: P,
	subscribers: Vec<Subscriber<E>>,
	next_id: u64,
	unsub_tx: mpsc::UnboundedSender<u64>,
}

impl<E: PumpEvent, P: PumpPolicy<E>> Worker<E, P> {
	async fn run(
		mut self,
		mut intake: mpsc::Receiver<E>,
		mut control: mpsc::Receiver<Control<E>>,
		mut unsub: mpsc::UnboundedReceiver<u64>,
		mut shutdown: Shutdown,
	) {
		debug!(pump = self.name, "event pump started");

		loop {
			tokio::select! {
				biased;

				_ = shutdown.wait() => break,

				Some(ctrl) = control.recv() => match ctrl {
					Control::Subscribe { name, interest, tx, ack } => {
						self.add_subscriber(name, interest, tx, ack);
					}
					Control::Shutdown => break,
				},

				Some(id) = unsub.recv() => self.remove_subscriber(id),

				ev = intake.recv() => match ev {
					Some(ev) => self.dispatch(ev),
					None => break,
				},
			}
		}

		let live = self.subscribers.len();
		self.subscribers.clear();
		debug!(pump = self.name, subscribers = live, "event pump stopped");
	}

	fn add_subscriber(
		&mut self,
		name: String,
		interest: HashSet<E::Kind>,
		tx: mpsc::Sender<E>,
		ack: oneshot::Sender<(u64, mpsc::UnboundedSender<u64>)>,
	) {
		self.prune_closed_subscribers();

		let id = self.next_id;
		self.next_id += 1;
		if ack.send((id, self.unsub_tx.clone())).is_err() {
			return;
		}

		debug!(pump = self.name, subscriber = %name, id, kinds = interest.len(), "event pump: subscribed");
		self.subscribers.push(Subscriber {
			id,
			name,
			interest,
			tx,
			dropped: 0,
		});
	}

	fn remove_subscriber(&mut self, id: u64) {
		if let Some(idx) = self.subscribers.iter().position(|s| s.id == id) {
			let sub = self.subscribers.swap_remove(idx);
			debug!(
				pump = self.name,
				subscriber = %sub.name,
				dropped = sub.dropped,
				"event pump: unsubscribed"
			);
		}
	}

	fn dispatch(&mut self, event: E) {
		if let Err(reject) = self.policy.admit(&event) {
			metrics::counter!("chatpump_pump_rejected_total", "pump" => self.name).increment(1);
			debug!(pump = self.name, reason = %reject, "event pump: event rejected");
			return;
		}

		let kind = event.kind();
		let mut dropped_total: u64 = 0;

		for sub in self.subscribers.iter_mut().filter(|s| s.wants(&kind)) {
			match sub.tx.try_send(event.clone()) {
				Ok(()) => {}
				Err(mpsc::error::TrySendError::Full(_)) => {
					sub.dropped = sub.dropped.saturating_add(1);
					dropped_total += 1;
				}
				Err(mpsc::error::TrySendError::Closed(_)) => {}
			}
		}

		self.policy.after_forward(&event);
		self.prune_closed_subscribers();

		if dropped_total > 0 {
			metrics::counter!("chatpump_pump_dropped_total", "pump" => self.name).increment(dropped_total);
			debug!(
				pump = self.name,
				dropped = dropped_total,
				"event pump: dropped due to full subscriber queues"
			);
		}
	}

	fn prune_closed_subscribers(&mut self) {
		self.subscribers.retain(|s| !s.tx.is_closed());
	}
}
