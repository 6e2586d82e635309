use std::time::Duration;

use chatpump_store::{Direction, TraceStore};
use chatpump_util::Shutdown;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, warn};

use crate::ClientError;

/// Outbound message quota per fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
	pub quota: u32,
	pub window: Duration,
}

impl Default for RateLimit {
	fn default() -> Self {
		Self {
			quota: 20,
			window: Duration::from_secs(30),
		}
	}
}

/// Bounded queue of outbound protocol lines drained by one rate-limited task.
///
/// Lines are delayed, never dropped, while the quota is exhausted.
#[derive(Debug, Clone)]
pub struct OutboundQueue {
	tx: mpsc::Sender<String>,
}

impl OutboundQueue {
	pub fn spawn<W>(
		writer: W,
		limit: RateLimit,
		capacity: usize,
		trace: Option<TraceStore>,
		shutdown: Shutdown,
	) -> (Self, JoinHandle<()>)
	where
		W: AsyncWrite + Unpin + Send + 'static,
	{
		let (tx, rx) = mpsc::channel(capacity.max(1));
		let task = tokio::spawn(drain(writer, rx, limit, trace, shutdown));
		(Self { tx }, task)
	}

	/// Queue one line (without `\r\n`), waiting for queue space if needed.
	pub async fn send(&self, line: impl Into<String>) -> Result<(), ClientError> {
		self.tx.send(line.into()).await.map_err(|_| ClientError::NotConnected)
	}

	pub fn is_closed(&self) -> bool {
		self.tx.is_closed()
	}
}

fn traced_form(line: &str) -> String {
	if line.starts_with("PASS ") {
		"PASS <redacted>".to_string()
	} else {
		line.to_string()
	}
}

async fn write_line<W>(writer: &mut W, line: &str) -> std::io::Result<()>
where
	W: AsyncWrite + Unpin,
{
	writer.write_all(format!("{line}\r\n").as_bytes()).await?;
	writer.flush().await
}

async fn drain<W>(
	mut writer: W,
	mut rx: mpsc::Receiver<String>,
	limit: RateLimit,
	trace: Option<TraceStore>,
	mut shutdown: Shutdown,
) where
	W: AsyncWrite + Unpin + Send + 'static,
{
	let quota = limit.quota.max(1);
	let mut window = interval(limit.window.max(Duration::from_millis(1)));
	window.set_missed_tick_behavior(MissedTickBehavior::Delay);
	window.tick().await;

	let mut sent: u32 = 0;

	loop {
		if sent >= quota {
			debug!(quota, "irc outbound: quota exhausted, waiting for window");
			tokio::select! {
				biased;
				_ = shutdown.wait() => break,
				_ = window.tick() => {
					sent = 0;
				}
			}
			continue;
		}

		tokio::select! {
			biased;

			_ = shutdown.wait() => break,

			_ = window.tick() => {
				sent = 0;
			}

			line = rx.recv() => {
				let Some(line) = line else {
					break;
				};

				sent += 1;
				if let Some(trace) = &trace {
					trace.record(Direction::Outbound, &traced_form(&line));
				}

				// A peer that stops reading must not hold the task past shutdown.
				let res = tokio::select! {
					biased;
					_ = shutdown.wait() => {
						debug!("irc outbound: shutdown during write, line abandoned");
						break;
					}
					res = write_line(&mut writer, &line) => res,
				};
				match res {
					Ok(()) => metrics::counter!("chatpump_irc_outbound_sent_total").increment(1),
					Err(e) => {
						metrics::counter!("chatpump_irc_outbound_write_errors_total").increment(1);
						warn!(error = %e, "irc outbound: write failed");
					}
				}
			}
		}
	}

	debug!("irc outbound: drain stopped");
}
