#![forbid(unsafe_code)]

pub mod endpoint {
	use std::net::SocketAddr;

	use thiserror::Error;

	const SCHEME: &str = "irc://";

	#[derive(Debug, Error, Clone, PartialEq, Eq)]
	pub enum EndpointError {
		#[error("endpoint must be non-empty (expected irc://host:port)")]
		Empty,
		#[error("invalid endpoint (expected irc://host:port): {0}")]
		Scheme(String),
		#[error("invalid endpoint (expected irc://host:port without path/query/fragment): {0}")]
		Trailing(String),
		#[error("invalid endpoint host: {0}")]
		Host(String),
		#[error("invalid endpoint port (expected 1..=65535): {0}")]
		Port(String),
	}

	/// Parsed `irc://host:port` endpoint of the chat server.
	#[derive(Debug, Clone, PartialEq, Eq, Hash)]
	pub struct Endpoint {
		pub host: String,
		pub port: u16,
	}

	impl Endpoint {
		/// Returns `host:port`, suitable for `TcpStream::connect`.
		pub fn hostport(&self) -> String {
			format!("{}:{}", self.host, self.port)
		}

		pub fn to_socket_addr_if_ip_literal(&self) -> Option<SocketAddr> {
			self.hostport().parse().ok()
		}

		pub fn parse(s: &str) -> Result<Self, EndpointError> {
			let s = s.trim();
			if s.is_empty() {
				return Err(EndpointError::Empty);
			}

			let rest = s.strip_prefix(SCHEME).ok_or_else(|| EndpointError::Scheme(s.to_string()))?;
			if rest.contains(['/', '?', '#']) {
				return Err(EndpointError::Trailing(s.to_string()));
			}

			let (host, port_str) = rest
				.rsplit_once(':')
				.ok_or_else(|| EndpointError::Port(s.to_string()))?;

			let host = host.trim();
			if host.is_empty() || (host.contains(':') && !(host.starts_with('[') && host.ends_with(']'))) {
				return Err(EndpointError::Host(s.to_string()));
			}

			let port = port_str
				.trim()
				.parse::<u16>()
				.ok()
				.filter(|p| *p != 0)
				.ok_or_else(|| EndpointError::Port(s.to_string()))?;

			Ok(Self {
				host: host.to_string(),
				port,
			})
		}
	}

	impl core::fmt::Display for Endpoint {
		fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
			write!(f, "{SCHEME}{}", self.hostport())
		}
	}

	#[cfg(test)]
	mod tests {
		use super::*;

		#[test]
		fn parses_dns_hostname() {
			let e = Endpoint::parse("irc://irc.chat.twitch.tv:6667").unwrap();
			assert_eq!(e.host, "irc.chat.twitch.tv");
			assert_eq!(e.port, 6667);
			assert_eq!(e.to_string(), "irc://irc.chat.twitch.tv:6667");
			assert!(e.to_socket_addr_if_ip_literal().is_none());
		}

		#[test]
		fn parses_ip_literals() {
			let e = Endpoint::parse("irc://[::1]:6667").unwrap();
			assert_eq!(e.hostport(), "[::1]:6667");
			assert!(e.to_socket_addr_if_ip_literal().is_some());
			assert!(Endpoint::parse("irc://127.0.0.1:6667").is_ok());
		}

		#[test]
		fn rejects_malformed() {
			assert_eq!(Endpoint::parse(" "), Err(EndpointError::Empty));
			assert!(matches!(Endpoint::parse("quic://a:1"), Err(EndpointError::Scheme(_))));
			assert!(matches!(Endpoint::parse("irc://a:1/x"), Err(EndpointError::Trailing(_))));
			assert!(matches!(Endpoint::parse("irc://::1:6667"), Err(EndpointError::Host(_))));
			assert!(matches!(Endpoint::parse("irc://a:0"), Err(EndpointError::Port(_))));
			assert!(matches!(Endpoint::parse("irc://a"), Err(EndpointError::Port(_))));
		}
	}
}

pub mod backoff {
	use std::time::Duration;

	/// Exponential reconnect delay, clamped to `[min, max]`.
	pub fn backoff_delay(attempt: u32, min: Duration, max: Duration) -> Duration {
		let pow = attempt.min(16);
		let ms = min.as_millis().saturating_mul(1u128 << pow);
		let d = Duration::from_millis(ms.min(u64::MAX as u128) as u64);
		d.min(max).max(min)
	}

	#[cfg(test)]
	mod tests {
		use super::*;

		#[test]
		fn grows_then_caps() {
			let min = Duration::from_millis(500);
			let max = Duration::from_secs(30);
			assert_eq!(backoff_delay(0, min, max), min);
			assert_eq!(backoff_delay(1, min, max), Duration::from_secs(1));
			assert_eq!(backoff_delay(3, min, max), Duration::from_secs(4));
			assert_eq!(backoff_delay(10, min, max), max);
			assert_eq!(backoff_delay(u32::MAX, min, max), max);
		}
	}
}

pub mod shutdown {
	use tokio::sync::watch;

	/// Cancellation signal observed by long-running loops.
	#[derive(Debug, Clone)]
	pub struct Shutdown {
		rx: watch::Receiver<bool>,
	}

	/// Owning side of a [`Shutdown`]; dropping it also signals shutdown.
	#[derive(Debug)]
	pub struct ShutdownTrigger {
		tx: watch::Sender<bool>,
	}

	pub fn channel() -> (ShutdownTrigger, Shutdown) {
		let (tx, rx) = watch::channel(false);
		(ShutdownTrigger { tx }, Shutdown { rx })
	}

	impl ShutdownTrigger {
		pub fn trigger(&self) {
			let _ = self.tx.send(true);
		}

		pub fn subscribe(&self) -> Shutdown {
			Shutdown { rx: self.tx.subscribe() }
		}
	}

	impl Shutdown {
		pub fn is_triggered(&self) -> bool {
			*self.rx.borrow()
		}

		/// Resolves once shutdown was triggered or the trigger was dropped.
		pub async fn wait(&mut self) {
			let _ = self.rx.wait_for(|v| *v).await;
		}
	}

	#[cfg(test)]
	mod tests {
		use std::time::Duration;

		use super::*;

		#[tokio::test]
		async fn wait_resolves_on_trigger() {
			let (trigger, mut shutdown) = channel();
			let mut other = trigger.subscribe();
			assert!(!shutdown.is_triggered());

			trigger.trigger();
			tokio::time::timeout(Duration::from_secs(1), shutdown.wait()).await.unwrap();
			tokio::time::timeout(Duration::from_secs(1), other.wait()).await.unwrap();
			assert!(shutdown.is_triggered());
		}

		#[tokio::test]
		async fn wait_resolves_when_trigger_dropped() {
			let (trigger, mut shutdown) = channel();
			drop(trigger);
			tokio::time::timeout(Duration::from_secs(1), shutdown.wait()).await.unwrap();
		}
	}
}

pub use backoff::backoff_delay;
pub use endpoint::{Endpoint, EndpointError};
pub use shutdown::{Shutdown, ShutdownTrigger};
