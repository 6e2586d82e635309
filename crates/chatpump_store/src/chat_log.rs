use std::io::Write;
use std::sync::Arc;

use chatpump_domain::{LogCategory, ParsedLine};
use chatpump_util::Shutdown;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::pump::{EventPump, PumpConfig, PumpError, PumpEvent, PumpPolicy, Subscription};

/// Append-only text sink for the chat log.
///
/// Written from a blocking writer task, never from the pump task.
pub type LogSink = Box<dyn Write + Send>;

/// Lines waiting for the sink writer before new ones are dropped.
const SINK_QUEUE_CAPACITY: usize = 1024;

impl PumpEvent for ParsedLine {
	type Kind = LogCategory;

	fn kind(&self) -> LogCategory {
		self.category()
	}
}

#[derive(Debug, Clone)]
pub struct ChatLogConfig {
	/// Number of lines kept in memory.
	pub history_capacity: usize,
	pub pump: PumpConfig,
}

impl Default for ChatLogConfig {
	fn default() -> Self {
		Self {
			history_capacity: 1024,
			pump: PumpConfig::named("chat"),
		}
	}
}

/// Fixed-size circular history with a single sequential read cursor.
#[derive(Debug)]
struct ChatHistory {
	slots: Vec<ParsedLine>,
	capacity: usize,
	write: usize,
	wrapped: bool,
	read: usize,
	unread: usize,
}

impl ChatHistory {
	fn new(capacity: usize) -> Self {
		let capacity = capacity.max(1);
		Self {
			slots: Vec::with_capacity(capacity),
			capacity,
			write: 0,
			wrapped: false,
			read: 0,
			unread: 0,
		}
	}

	fn push(&mut self, line: ParsedLine) {
		if self.slots.len() < self.capacity {
			self.slots.push(line);
		} else {
			self.slots[self.write] = line;
		}

		self.write += 1;
		if self.write >= self.capacity {
			self.write = 0;
			self.wrapped = true;
		}

		if self.unread == self.capacity {
			// oldest unread entry was just overwritten
			self.read = (self.read + 1) % self.capacity;
		} else {
			self.unread += 1;
		}
	}

	fn oldest(&self) -> usize {
		if self.wrapped { self.write } else { 0 }
	}

	fn read_all(&self) -> Vec<ParsedLine> {
		let start = self.oldest();
		self.slots[start..].iter().chain(&self.slots[..start]).cloned().collect()
	}

	fn read_next(&mut self) -> Option<ParsedLine> {
		if self.unread == 0 {
			return None;
		}
		let line = self.slots[self.read].clone();
		self.read = (self.read + 1) % self.capacity;
		self.unread -= 1;
		Some(line)
	}

	fn reset_cursor(&mut self) {
		self.read = self.oldest();
		self.unread = self.slots.len();
	}
}

struct ChatLogPolicy {
	history: Arc<Mutex<ChatHistory>>,
	sink: Option<mpsc::Sender<String>>,
}

impl PumpPolicy<ParsedLine> for ChatLogPolicy {
	type Reject = std::convert::Infallible;

	fn admit(&mut self, line: &ParsedLine) -> Result<(), Self::Reject> {
		self.history.lock().push(line.clone());
		Ok(())
	}

	fn after_forward(&mut self, line: &ParsedLine) {
		let Some(sink) = &self.sink else {
			return;
		};
		match sink.try_send(line.to_log_line()) {
			Ok(()) => {}
			Err(mpsc::error::TrySendError::Full(_)) => {
				metrics::counter!("chatpump_chat_log_sink_dropped_total").increment(1);
				warn!("chat log: sink writer lagging, line not persisted");
			}
			Err(mpsc::error::TrySendError::Closed(_)) => {
				debug!("chat log: sink writer gone");
				self.sink = None;
			}
		}
	}
}

fn spawn_sink_writer(mut sink: LogSink) -> (mpsc::Sender<String>, JoinHandle<()>) {
	let (tx, mut rx) = mpsc::channel::<String>(SINK_QUEUE_CAPACITY);
	let task = tokio::task::spawn_blocking(move || {
		while let Some(text) = rx.blocking_recv() {
			if let Err(e) = writeln!(sink, "{text}") {
				warn!(error = %e, "chat log: sink write failed");
			}
		}
		if let Err(e) = sink.flush() {
			warn!(error = %e, "chat log: sink flush failed");
		}
	});
	(tx, task)
}

/// Chat-line event pump with bounded history and an optional text sink.
#[derive(Debug, Clone)]
pub struct ChatLogStore {
	pub(crate) pump: EventPump<ParsedLine>,
	history: Arc<Mutex<ChatHistory>>,
}

impl ChatLogStore {
	pub fn spawn(cfg: ChatLogConfig, sink: Option<LogSink>, shutdown: Shutdown) -> (Self, JoinHandle<()>) {
		let history = Arc::new(Mutex::new(ChatHistory::new(cfg.history_capacity)));
		let (sink_tx, writer) = sink.map(spawn_sink_writer).unzip();
		let policy = ChatLogPolicy {
			history: history.clone(),
			sink: sink_tx,
		};
		let (pump, pump_task) = EventPump::spawn(cfg.pump, policy, shutdown);

		// The writer drains and flushes once the pump task drops the policy.
		let task = tokio::spawn(async move {
			if let Err(e) = pump_task.await {
				warn!(error = %e, "chat log: pump task failed");
			}
			if let Some(writer) = writer
				&& let Err(e) = writer.await
			{
				warn!(error = %e, "chat log: sink writer failed");
			}
		});
		(Self { pump, history }, task)
	}

	/// Submit a line. Never blocks; see [`EventPump::submit`].
	pub fn log_line(&self, line: ParsedLine) {
		self.pump.submit(line);
	}

	/// Subscribe to lines of the given categories (none = all).
	pub async fn subscribe(
		&self,
		name: impl Into<String>,
		categories: impl IntoIterator<Item = LogCategory>,
	) -> Result<Subscription<ParsedLine>, PumpError> {
		self.pump.subscribe(name, categories).await
	}

	pub fn unsubscribe(&self, subscription: &Subscription<ParsedLine>) {
		subscription.unsubscribe();
	}

	/// History in chronological order.
	pub fn read_all(&self) -> Vec<ParsedLine> {
		self.history.lock().read_all()
	}

	pub fn read_next(&self) -> Option<ParsedLine> {
		self.history.lock().read_next()
	}

	/// Rewind the history cursor to the oldest retained line.
	pub fn reset_cursor(&self) {
		self.history.lock().reset_cursor();
	}

	pub async fn close(&self) {
		self.pump.close().await;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn line(n: i64) -> ParsedLine {
		ParsedLine::system(n, format!("line {n}"))
	}

	fn stamps(lines: &[ParsedLine]) -> Vec<i64> {
		lines.iter().map(|l| l.timestamp_seconds()).collect()
	}

	#[test]
	fn history_reads_in_order_before_and_after_wrap() {
		let mut h = ChatHistory::new(3);
		h.push(line(1));
		h.push(line(2));
		assert_eq!(stamps(&h.read_all()), vec![1, 2]);

		h.push(line(3));
		h.push(line(4));
		assert!(h.wrapped);
		assert_eq!(stamps(&h.read_all()), vec![2, 3, 4]);
	}

	#[test]
	fn cursor_follows_and_skips_overwritten_entries() {
		let mut h = ChatHistory::new(3);
		h.push(line(1));
		assert_eq!(h.read_next().map(|l| l.timestamp_seconds()), Some(1));
		assert!(h.read_next().is_none());

		for n in 2..=6 {
			h.push(line(n));
		}
		let mut seen = Vec::new();
		while let Some(l) = h.read_next() {
			seen.push(l.timestamp_seconds());
		}
		assert_eq!(seen, vec![4, 5, 6]);
		assert!(h.read < h.capacity);

		h.reset_cursor();
		assert_eq!(h.read_next().map(|l| l.timestamp_seconds()), Some(4));
	}

	#[test]
	fn cursor_stays_in_range_at_capacity_boundary() {
		let mut h = ChatHistory::new(2);
		for n in 0..5 {
			h.push(line(n));
			assert!(h.write < h.capacity);
			assert!(h.read < h.capacity);
		}
	}
}
