#![forbid(unsafe_code)]

use std::io;
use std::sync::Arc;
use std::time::Duration;

use chatpump_domain::{AlertPayload, AlertType, LogCategory, ParsedLine, UserRef};
use chatpump_util::shutdown;
use parking_lot::Mutex;
use tokio::time::timeout;

use crate::{AlertPump, AlertPumpConfig, ChatLogConfig, ChatLogStore, PumpConfig};

const WAIT: Duration = Duration::from_secs(2);

#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl io::Write for SharedSink {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		self.0.lock().extend_from_slice(buf);
		Ok(buf.len())
	}

	fn flush(&mut self) -> io::Result<()> {
		Ok(())
	}
}

fn system(n: i64) -> ParsedLine {
	ParsedLine::system(n, format!("event {n}"))
}

fn chat_cfg(history: usize) -> ChatLogConfig {
	ChatLogConfig {
		history_capacity: history,
		pump: PumpConfig {
			name: "chat-test",
			intake_capacity: 1024,
			subscriber_queue_capacity: 1024,
		},
	}
}

#[tokio::test]
async fn subscriber_sees_events_in_submission_order() {
	let (_trigger, shutdown) = shutdown::channel();
	let (store, _task) = ChatLogStore::spawn(chat_cfg(16), None, shutdown);
	let mut sub = store.subscribe("reader", []).await.expect("subscribe");

	for n in 0..500 {
		store.log_line(system(n));
	}

	for n in 0..500 {
		let line = timeout(WAIT, sub.recv()).await.expect("timely").expect("open");
		assert_eq!(line.timestamp_seconds(), n);
	}
}

#[tokio::test]
async fn full_subscriber_does_not_block_others() {
	let (_trigger, shutdown) = shutdown::channel();
	let (store, _task) = ChatLogStore::spawn(chat_cfg(16), None, shutdown);

	let mut slow = store
		.pump
		.subscribe_with_capacity("slow", [], 1)
		.await
		.expect("subscribe slow");
	let mut fast = store.subscribe("fast", []).await.expect("subscribe fast");

	for n in 0..100 {
		store.log_line(system(n));
	}

	for n in 0..100 {
		let line = timeout(WAIT, fast.recv()).await.expect("timely").expect("open");
		assert_eq!(line.timestamp_seconds(), n);
	}

	assert_eq!(slow.try_recv().map(|l| l.timestamp_seconds()), Some(0));
	assert!(slow.try_recv().is_none());
}

#[tokio::test]
async fn interest_set_filters_categories() {
	let (_trigger, shutdown) = shutdown::channel();
	let (store, _task) = ChatLogStore::spawn(chat_cfg(16), None, shutdown);
	let mut filtered = store
		.subscribe("filtered-only", [LogCategory::Filtered])
		.await
		.expect("subscribe");

	store.log_line(system(1));
	store.log_line(ParsedLine::filtered(2, "hidden"));
	store.log_line(ParsedLine::silent(3, "quiet"));

	let line = timeout(WAIT, filtered.recv()).await.expect("timely").expect("open");
	assert_eq!(line.category(), LogCategory::Filtered);

	let nothing = timeout(Duration::from_millis(50), filtered.recv()).await;
	assert!(nothing.is_err(), "unexpected line for a foreign category");
}

#[tokio::test]
async fn unsubscribe_ends_the_stream() {
	let (_trigger, shutdown) = shutdown::channel();
	let (store, _task) = ChatLogStore::spawn(chat_cfg(16), None, shutdown);
	let mut sub = store.subscribe("leaver", []).await.expect("subscribe");

	store.log_line(system(1));
	store.unsubscribe(&sub);

	let mut seen = Vec::new();
	while let Some(line) = timeout(WAIT, sub.recv()).await.expect("stream must end") {
		seen.push(line.timestamp_seconds());
	}
	assert!(seen.len() <= 1);
}

#[tokio::test]
async fn shutdown_closes_every_subscriber() {
	let (trigger, shutdown) = shutdown::channel();
	let (store, task) = ChatLogStore::spawn(chat_cfg(16), None, shutdown);
	let mut a = store.subscribe("a", []).await.expect("subscribe");
	let mut b = store.subscribe("b", [LogCategory::Whisper]).await.expect("subscribe");

	trigger.trigger();
	timeout(WAIT, task).await.expect("pump stops").expect("no panic");

	assert!(timeout(WAIT, a.recv()).await.expect("timely").is_none());
	assert!(timeout(WAIT, b.recv()).await.expect("timely").is_none());
	assert!(store.subscribe("late", []).await.is_err());
}

#[tokio::test]
async fn dropping_every_handle_stops_the_pump() {
	let (_trigger, shutdown) = shutdown::channel();
	let (store, task) = ChatLogStore::spawn(chat_cfg(16), None, shutdown);
	let mut sub = store.subscribe("orphan", []).await.expect("subscribe");

	drop(store);
	timeout(WAIT, task).await.expect("pump stops").expect("no panic");
	assert!(timeout(WAIT, sub.recv()).await.expect("timely").is_none());
}

#[tokio::test]
async fn history_and_sink_follow_the_pump() {
	let (_trigger, shutdown) = shutdown::channel();
	let sink = SharedSink::default();
	let (store, _task) = ChatLogStore::spawn(chat_cfg(3), Some(Box::new(sink.clone())), shutdown);
	let mut sub = store.subscribe("sync", []).await.expect("subscribe");

	for n in 1..=4 {
		store.log_line(system(n));
	}
	for _ in 1..=4 {
		timeout(WAIT, sub.recv()).await.expect("timely").expect("open");
	}

	let all: Vec<_> = store.read_all().iter().map(|l| l.timestamp_seconds()).collect();
	assert_eq!(all, vec![2, 3, 4]);

	assert_eq!(store.read_next().map(|l| l.timestamp_seconds()), Some(2));
	store.reset_cursor();
	assert_eq!(store.read_next().map(|l| l.timestamp_seconds()), Some(2));

	// the sink is written by its own writer task
	timeout(WAIT, async {
		while sink.0.lock().iter().filter(|b| **b == b'\n').count() < 4 {
			tokio::time::sleep(Duration::from_millis(1)).await;
		}
	})
	.await
	.expect("sink written");

	let text = String::from_utf8(sink.0.lock().clone()).expect("utf8");
	assert!(text.lines().all(|l| l.starts_with("CHAT: ")));
	assert!(text.contains("*event 1"));
}

/// Blocks its first write until the gate opens.
struct GatedSink {
	gate: std::sync::mpsc::Receiver<()>,
	opened: bool,
	out: SharedSink,
}

impl io::Write for GatedSink {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		if !self.opened {
			let _ = self.gate.recv();
			self.opened = true;
		}
		io::Write::write(&mut self.out, buf)
	}

	fn flush(&mut self) -> io::Result<()> {
		Ok(())
	}
}

#[tokio::test]
async fn stalled_sink_does_not_delay_subscribers() {
	let (trigger, shutdown) = shutdown::channel();
	let (open_gate, gate) = std::sync::mpsc::channel();
	let out = SharedSink::default();
	let sink = GatedSink {
		gate,
		opened: false,
		out: out.clone(),
	};
	let (store, task) = ChatLogStore::spawn(chat_cfg(8), Some(Box::new(sink)), shutdown);
	let mut sub = store.subscribe("live", []).await.expect("subscribe");

	for n in 1..=3 {
		store.log_line(system(n));
	}
	for n in 1..=3 {
		let line = timeout(WAIT, sub.recv()).await.expect("timely").expect("open");
		assert_eq!(line.timestamp_seconds(), n);
	}
	assert!(out.0.lock().is_empty());

	open_gate.send(()).expect("writer waiting");
	trigger.trigger();
	timeout(WAIT, task).await.expect("store stops").expect("no panic");

	let text = String::from_utf8(out.0.lock().clone()).expect("utf8");
	assert_eq!(text.lines().count(), 3);
}

#[tokio::test]
async fn repeated_host_alert_is_forwarded_once() {
	let (_trigger, shutdown) = shutdown::channel();
	let (alerts, _task) = AlertPump::spawn(AlertPumpConfig::default(), shutdown);
	let mut sub = alerts.subscribe("ui", []).await.expect("subscribe");

	let host = UserRef::new("1", "friend");
	alerts.post(host.clone(), AlertPayload::Host { viewers: 42 });
	alerts.post(host.clone(), AlertPayload::Host { viewers: 42 });
	alerts.post(UserRef::nick("marker"), AlertPayload::Follow);

	let first = timeout(WAIT, sub.recv()).await.expect("timely").expect("open");
	assert_eq!(first.payload, AlertPayload::Host { viewers: 42 });
	let next = timeout(WAIT, sub.recv()).await.expect("timely").expect("open");
	assert_eq!(next.kind(), AlertType::Follow);

	assert_eq!(alerts.copy_recent_alerts().len(), 2);
}

#[tokio::test]
async fn bits_alerts_dedup_on_content() {
	let (_trigger, shutdown) = shutdown::channel();
	let (alerts, _task) = AlertPump::spawn(AlertPumpConfig::default(), shutdown);
	let mut sub = alerts.subscribe("bits", [AlertType::Bits]).await.expect("subscribe");

	let cheerer = UserRef::new("7", "cheerer");
	let bits = |content: &str| AlertPayload::Bits {
		bits: 100,
		content: content.to_string(),
	};
	alerts.post(cheerer.clone(), bits("cheer100 gg"));
	alerts.post(cheerer.clone(), bits("cheer100 gg"));
	alerts.post(cheerer.clone(), bits("cheer100 again"));

	let mut contents = Vec::new();
	for _ in 0..2 {
		let alert = timeout(WAIT, sub.recv()).await.expect("timely").expect("open");
		if let AlertPayload::Bits { content, .. } = alert.payload {
			contents.push(content);
		}
	}
	assert_eq!(contents, vec!["cheer100 gg", "cheer100 again"]);
	assert!(timeout(Duration::from_millis(50), sub.recv()).await.is_err());
}

#[tokio::test]
async fn none_alerts_are_always_forwarded() {
	let (_trigger, shutdown) = shutdown::channel();
	let (alerts, _task) = AlertPump::spawn(AlertPumpConfig::default(), shutdown);
	let mut sub = alerts.subscribe("all", []).await.expect("subscribe");

	for _ in 0..3 {
		alerts.post(UserRef::nick("system"), AlertPayload::None { text: "tick".into() });
	}
	for _ in 0..3 {
		let alert = timeout(WAIT, sub.recv()).await.expect("timely").expect("open");
		assert_eq!(alert.kind(), AlertType::None);
	}
	assert!(alerts.copy_recent_alerts().is_empty());
}
