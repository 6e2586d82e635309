#![forbid(unsafe_code)]

use std::time::Duration;

use chatpump_domain::{Alert, ParsedLine};
use chatpump_irc::{ChatClient, ClientError};
use chatpump_pubsub::PubSubEvent;
use chatpump_store::Subscription;
use chatpump_util::{Endpoint, Shutdown, backoff_delay};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
	pub min_delay: Duration,
	pub max_delay: Duration,
}

/// Keep one chat connection alive until shutdown.
///
/// Sessions that outlive the maximum delay reset the backoff.
pub async fn run_irc(client: ChatClient, endpoint: Endpoint, policy: ReconnectPolicy, mut shutdown: Shutdown) {
	let mut attempt: u32 = 0;

	loop {
		if shutdown.is_triggered() {
			break;
		}

		info!(endpoint = %endpoint, room = client.room(), "irc: connecting");
		let connect = tokio::select! {
			biased;
			_ = shutdown.wait() => break,
			res = TcpStream::connect(endpoint.hostport()) => res,
		};

		match connect {
			Ok(stream) => {
				metrics::counter!("chatpump_server_irc_connects_total").increment(1);
				if let Err(e) = stream.set_nodelay(true) {
					warn!(error = %e, "irc: set_nodelay failed");
				}

				let started = Instant::now();
				match client.run(stream, shutdown.clone()).await {
					Ok(()) if shutdown.is_triggered() => break,
					Ok(()) => info!(room = client.room(), "irc: connection ended"),
					Err(ClientError::ReconnectRequested) => {
						info!(room = client.room(), "irc: reconnecting on server request");
						attempt = 0;
					}
					Err(e) => warn!(error = %e, room = client.room(), "irc: connection failed"),
				}

				if started.elapsed() >= policy.max_delay {
					attempt = 0;
				}
			}
			Err(e) => warn!(error = %e, endpoint = %endpoint, "irc: connect failed"),
		}

		let delay = backoff_delay(attempt, policy.min_delay, policy.max_delay);
		attempt = attempt.saturating_add(1);
		info!(delay_ms = delay.as_millis() as u64, "irc: reconnecting after delay");

		tokio::select! {
			biased;
			_ = shutdown.wait() => break,
			_ = sleep(delay) => {}
		}
	}

	info!("irc: supervisor stopped");
}

pub async fn print_chat(mut lines: Subscription<ParsedLine>) {
	while let Some(line) = lines.recv().await {
		println!("{line}");
	}
}

pub async fn print_alerts(mut alerts: Subscription<Alert>) {
	while let Some(alert) = alerts.recv().await {
		println!("ALERT: {alert}");
	}
}

pub async fn print_pubsub_events(mut events: mpsc::Receiver<PubSubEvent>) {
	while let Some(event) = events.recv().await {
		match serde_json::to_string(&event) {
			Ok(json) => println!("EVENT: {json}"),
			Err(e) => warn!(error = %e, "pubsub: event not serializable"),
		}
	}
}
