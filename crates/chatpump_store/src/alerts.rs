use std::collections::VecDeque;
use std::sync::Arc;

use chatpump_domain::{Alert, AlertPayload, AlertType, UserRef};
use chatpump_util::Shutdown;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::pump::{EventPump, PumpConfig, PumpError, PumpEvent, PumpPolicy, Subscription};

impl PumpEvent for Alert {
	type Kind = AlertType;

	fn kind(&self) -> AlertType {
		Alert::kind(self)
	}
}

/// Policy outcome for an alert matching a recent one.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("duplicate {kind} alert from {source_nick}")]
pub struct DuplicateAlert {
	pub kind: AlertType,
	pub source_nick: String,
}

#[derive(Debug, Clone)]
pub struct AlertPumpConfig {
	/// Number of recent non-`None` alerts used for duplicate detection.
	pub recent_capacity: usize,
	pub pump: PumpConfig,
}

impl Default for AlertPumpConfig {
	fn default() -> Self {
		Self {
			recent_capacity: 10,
			pump: PumpConfig::named("alerts"),
		}
	}
}

struct DedupPolicy {
	recent: Arc<Mutex<VecDeque<Alert>>>,
	capacity: usize,
}

impl PumpPolicy<Alert> for DedupPolicy {
	type Reject = DuplicateAlert;

	fn admit(&mut self, alert: &Alert) -> Result<(), DuplicateAlert> {
		if alert.kind() == AlertType::None {
			return Ok(());
		}

		let mut recent = self.recent.lock();
		if recent.iter().any(|prev| alert.is_duplicate_of(prev)) {
			return Err(DuplicateAlert {
				kind: alert.kind(),
				source_nick: alert.source.nick.clone(),
			});
		}

		recent.push_back(alert.clone());
		while recent.len() > self.capacity {
			recent.pop_front();
		}
		Ok(())
	}
}

/// Alert event pump with duplicate suppression.
#[derive(Debug, Clone)]
pub struct AlertPump {
	pump: EventPump<Alert>,
	recent: Arc<Mutex<VecDeque<Alert>>>,
}

impl AlertPump {
	pub fn spawn(cfg: AlertPumpConfig, shutdown: Shutdown) -> (Self, JoinHandle<()>) {
		let capacity = cfg.recent_capacity.max(1);
		let recent = Arc::new(Mutex::new(VecDeque::with_capacity(capacity)));
		let policy = DedupPolicy {
			recent: recent.clone(),
			capacity,
		};
		let (pump, task) = EventPump::spawn(cfg.pump, policy, shutdown);
		(Self { pump, recent }, task)
	}

	/// Queue an alert. Never blocks and never fails; duplicates are dropped
	/// by the pump task.
	pub fn post(&self, source: UserRef, payload: AlertPayload) {
		self.pump.submit(Alert::new(source, payload));
	}

	/// Subscribe to alerts of the given types (none = all).
	pub async fn subscribe(
		&self,
		name: impl Into<String>,
		types: impl IntoIterator<Item = AlertType>,
	) -> Result<Subscription<Alert>, PumpError> {
		self.pump.subscribe(name, types).await
	}

	pub fn unsubscribe(&self, subscription: &Subscription<Alert>) {
		subscription.unsubscribe();
	}

	/// Snapshot of recent non-`None` alerts, oldest first.
	pub fn copy_recent_alerts(&self) -> Vec<Alert> {
		self.recent.lock().iter().cloned().collect()
	}

	pub async fn close(&self) {
		self.pump.close().await;
	}
}
