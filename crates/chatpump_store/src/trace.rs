use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::ring::{RingBuffer, RingError};

/// Direction of a traced protocol line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
	Inbound,
	Outbound,
}

impl Direction {
	const fn marker(self) -> &'static str {
		match self {
			Direction::Inbound => "<< ",
			Direction::Outbound => ">> ",
		}
	}
}

/// Shared raw-trace store of protocol lines, backed by a [`RingBuffer`].
#[derive(Debug, Clone)]
pub struct TraceStore {
	ring: Arc<Mutex<RingBuffer>>,
}

impl TraceStore {
	pub fn new(capacity: usize) -> Result<Self, RingError> {
		Ok(Self {
			ring: Arc::new(Mutex::new(RingBuffer::new(capacity)?)),
		})
	}

	/// Record one protocol line. Lines that cannot be stored are skipped.
	pub fn record(&self, direction: Direction, line: &str) {
		let line = line.trim_end_matches(['\r', '\n']);
		if line.is_empty() {
			return;
		}

		let entry = format!("{}{}", direction.marker(), line).replace(['\r', '\n'], " ");
		if let Err(e) = self.ring.lock().write(entry.as_bytes()) {
			debug!(error = %e, len = entry.len(), "trace store: line not recorded");
		}
	}

	/// Every retained line, oldest first.
	pub fn snapshot(&self) -> String {
		self.ring.lock().to_string_lossy()
	}

	pub fn next_line(&self) -> Option<String> {
		self.ring.lock().next_line()
	}

	/// Rewind [`TraceStore::next_line`] to the oldest retained line.
	pub fn reset(&self) {
		self.ring.lock().reset_replay();
	}
}
