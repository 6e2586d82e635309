#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use chatpump_domain::{SecretString, Topic};
use serde::Deserialize;
use tracing::{debug, info, warn};

const DEFAULT_IRC_ENDPOINT: &str = "irc://irc.chat.twitch.tv:6667";
const DEFAULT_PUBSUB_URL: &str = "wss://pubsub-edge.twitch.tv";

/// Default config path: `~/.chatpump/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".chatpump").join("config.toml"))
}

/// Load the config from TOML and env overrides. A missing file means defaults.
pub fn load_config_from_path(path: &Path) -> anyhow::Result<ChatpumpConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ChatpumpConfig::from_file(file_cfg);
	apply_env_overrides(&mut cfg);
	cfg.normalize();

	Ok(cfg)
}

#[derive(Debug, Clone, Default)]
pub struct ChatpumpConfig {
	pub irc: IrcSettings,
	pub pubsub: PubSubSettings,
	pub server: ServerSettings,
}

#[derive(Debug, Clone)]
pub struct IrcSettings {
	/// `irc://host:port`.
	pub endpoint: String,
	pub room: Option<String>,
	pub nick: Option<String>,
	pub token: Option<SecretString>,
	pub ignore: Vec<String>,

	/// Outbound lines allowed per window.
	pub rate_limit: u32,
	pub rate_limit_window: Duration,

	pub reconnect_min_delay: Duration,
	pub reconnect_max_delay: Duration,
}

impl Default for IrcSettings {
	fn default() -> Self {
		Self {
			endpoint: DEFAULT_IRC_ENDPOINT.to_string(),
			room: None,
			nick: None,
			token: None,
			ignore: Vec::new(),
			rate_limit: 20,
			rate_limit_window: Duration::from_secs(30),
			reconnect_min_delay: Duration::from_millis(500),
			reconnect_max_delay: Duration::from_secs(30),
		}
	}
}

impl IrcSettings {
	/// Chat ingestion needs a room plus login material.
	pub fn is_configured(&self) -> bool {
		self.room.is_some() && self.nick.is_some() && self.token.is_some()
	}
}

#[derive(Debug, Clone)]
pub struct PubSubSettings {
	pub enabled: bool,
	pub url: String,
	pub token: Option<SecretString>,
	pub topics: Vec<Topic>,
	pub ping_interval: Option<Duration>,
	pub pong_timeout: Option<Duration>,
	pub max_missed_pongs: Option<u32>,
	pub reconnect_min_delay: Option<Duration>,
	pub reconnect_max_delay: Option<Duration>,
}

impl Default for PubSubSettings {
	fn default() -> Self {
		Self {
			enabled: false,
			url: DEFAULT_PUBSUB_URL.to_string(),
			token: None,
			topics: Vec::new(),
			ping_interval: None,
			pong_timeout: None,
			max_missed_pongs: None,
			reconnect_min_delay: None,
			reconnect_max_delay: None,
		}
	}
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Append-only chat log file.
	pub log_path: Option<PathBuf>,
	/// Raw protocol trace written on shutdown.
	pub trace_path: Option<PathBuf>,
	pub history_capacity: usize,
	pub alert_history_capacity: usize,
	/// Bytes kept by the raw trace ring buffer.
	pub trace_capacity: usize,
}

impl Default for ServerSettings {
	fn default() -> Self {
		Self {
			metrics_bind: None,
			log_path: None,
			trace_path: None,
			history_capacity: 1024,
			alert_history_capacity: 10,
			trace_capacity: 256 * 1024,
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	irc: FileIrcSettings,

	#[serde(default)]
	pubsub: FilePubSubSettings,

	#[serde(default)]
	server: FileServerSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileIrcSettings {
	endpoint: Option<String>,
	room: Option<String>,
	nick: Option<String>,
	token: Option<String>,
	#[serde(default)]
	ignore: Vec<String>,
	rate_limit: Option<u32>,
	rate_limit_window_secs: Option<u64>,
	reconnect_min_delay_ms: Option<u64>,
	reconnect_max_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FilePubSubSettings {
	enabled: Option<bool>,
	url: Option<String>,
	token: Option<String>,
	#[serde(default)]
	topics: Vec<String>,
	ping_interval_secs: Option<u64>,
	pong_timeout_secs: Option<u64>,
	max_missed_pongs: Option<u32>,
	reconnect_min_delay_ms: Option<u64>,
	reconnect_max_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	metrics_bind: Option<String>,
	log_path: Option<String>,
	trace_path: Option<String>,
	history_capacity: Option<usize>,
	alert_history_capacity: Option<usize>,
	trace_capacity: Option<usize>,
}

fn non_empty(v: Option<String>) -> Option<String> {
	v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn parse_topics(raw: &[String]) -> Vec<Topic> {
	raw.iter()
		.filter_map(|t| match Topic::parse(t) {
			Ok(topic) => Some(topic),
			Err(e) => {
				warn!(topic = %t, error = %e, "pubsub config: skipping invalid topic");
				None
			}
		})
		.collect()
}

impl ChatpumpConfig {
	fn from_file(file: FileConfig) -> Self {
		let irc_defaults = IrcSettings::default();
		let server_defaults = ServerSettings::default();

		let irc = IrcSettings {
			endpoint: non_empty(file.irc.endpoint).unwrap_or(irc_defaults.endpoint),
			room: non_empty(file.irc.room),
			nick: non_empty(file.irc.nick),
			token: non_empty(file.irc.token).map(SecretString::new),
			ignore: file
				.irc
				.ignore
				.into_iter()
				.map(|n| n.trim().to_string())
				.filter(|n| !n.is_empty())
				.collect(),
			rate_limit: file.irc.rate_limit.unwrap_or(irc_defaults.rate_limit),
			rate_limit_window: file
				.irc
				.rate_limit_window_secs
				.map(Duration::from_secs)
				.unwrap_or(irc_defaults.rate_limit_window),
			reconnect_min_delay: file
				.irc
				.reconnect_min_delay_ms
				.map(Duration::from_millis)
				.unwrap_or(irc_defaults.reconnect_min_delay),
			reconnect_max_delay: file
				.irc
				.reconnect_max_delay_ms
				.map(Duration::from_millis)
				.unwrap_or(irc_defaults.reconnect_max_delay),
		};

		let pubsub = PubSubSettings {
			enabled: file.pubsub.enabled.unwrap_or(false),
			url: non_empty(file.pubsub.url).unwrap_or_else(|| DEFAULT_PUBSUB_URL.to_string()),
			token: non_empty(file.pubsub.token).map(SecretString::new),
			topics: parse_topics(&file.pubsub.topics),
			ping_interval: file.pubsub.ping_interval_secs.map(Duration::from_secs),
			pong_timeout: file.pubsub.pong_timeout_secs.map(Duration::from_secs),
			max_missed_pongs: file.pubsub.max_missed_pongs,
			reconnect_min_delay: file.pubsub.reconnect_min_delay_ms.map(Duration::from_millis),
			reconnect_max_delay: file.pubsub.reconnect_max_delay_ms.map(Duration::from_millis),
		};

		Self {
			irc,
			pubsub,
			server: ServerSettings {
				metrics_bind: non_empty(file.server.metrics_bind),
				log_path: non_empty(file.server.log_path).map(PathBuf::from),
				trace_path: non_empty(file.server.trace_path).map(PathBuf::from),
				history_capacity: file
					.server
					.history_capacity
					.filter(|v| *v > 0)
					.unwrap_or(server_defaults.history_capacity),
				alert_history_capacity: file
					.server
					.alert_history_capacity
					.filter(|v| *v > 0)
					.unwrap_or(server_defaults.alert_history_capacity),
				trace_capacity: file
					.server
					.trace_capacity
					.unwrap_or(server_defaults.trace_capacity),
			},
		}
	}

	fn normalize(&mut self) {
		if self.irc.reconnect_min_delay > self.irc.reconnect_max_delay {
			warn!(
				min_ms = self.irc.reconnect_min_delay.as_millis(),
				max_ms = self.irc.reconnect_max_delay.as_millis(),
				"irc config: reconnect_min_delay > reconnect_max_delay; swapping"
			);
			std::mem::swap(&mut self.irc.reconnect_min_delay, &mut self.irc.reconnect_max_delay);
		}

		if let (Some(min), Some(max)) = (self.pubsub.reconnect_min_delay, self.pubsub.reconnect_max_delay)
			&& min > max
		{
			warn!(
				min_ms = min.as_millis(),
				max_ms = max.as_millis(),
				"pubsub config: reconnect_min_delay > reconnect_max_delay; swapping"
			);
			self.pubsub.reconnect_min_delay = Some(max);
			self.pubsub.reconnect_max_delay = Some(min);
		}

		if self.irc.rate_limit == 0 {
			warn!("irc config: rate_limit of 0 would block every write; using 1");
			self.irc.rate_limit = 1;
		}
	}
}

fn parse_env_bool(v: &str) -> Option<bool> {
	match v.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => Ok(Some(parse_toml(&s)?)),
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn parse_toml(s: &str) -> anyhow::Result<FileConfig> {
	toml::from_str(s).context("parse TOML")
}

fn env_string(name: &str) -> Option<String> {
	std::env::var(name).ok().and_then(|v| non_empty(Some(v)))
}

fn apply_env_overrides(cfg: &mut ChatpumpConfig) {
	if let Some(v) = env_string("CHATPUMP_IRC_ENDPOINT") {
		cfg.irc.endpoint = v;
		info!("irc config: endpoint overridden by env");
	}

	if let Some(v) = env_string("CHATPUMP_IRC_ROOM") {
		cfg.irc.room = Some(v);
		info!("irc config: room overridden by env");
	}

	if let Some(v) = env_string("CHATPUMP_IRC_NICK") {
		cfg.irc.nick = Some(v);
		info!("irc config: nick overridden by env");
	}

	if let Some(v) = env_string("CHATPUMP_IRC_TOKEN") {
		cfg.irc.token = Some(SecretString::new(v));
		info!("irc config: token overridden by env");
	}

	if let Some(v) = env_string("CHATPUMP_IRC_RATE_LIMIT")
		&& let Ok(limit) = v.parse::<u32>()
	{
		cfg.irc.rate_limit = limit;
		info!(limit, "irc config: rate_limit overridden by env");
	}

	if let Some(v) = env_string("CHATPUMP_IRC_RECONNECT_MIN_DELAY_MS")
		&& let Ok(ms) = v.parse::<u64>()
	{
		cfg.irc.reconnect_min_delay = Duration::from_millis(ms);
		debug!("irc config: reconnect_min_delay overridden by env");
	}

	if let Some(v) = env_string("CHATPUMP_IRC_RECONNECT_MAX_DELAY_MS")
		&& let Ok(ms) = v.parse::<u64>()
	{
		cfg.irc.reconnect_max_delay = Duration::from_millis(ms);
		debug!("irc config: reconnect_max_delay overridden by env");
	}

	if let Some(v) = env_string("CHATPUMP_PUBSUB_ENABLED")
		&& let Some(enabled) = parse_env_bool(&v)
	{
		cfg.pubsub.enabled = enabled;
		info!(enabled, "pubsub config: enabled overridden by env");
	}

	if let Some(v) = env_string("CHATPUMP_PUBSUB_URL") {
		cfg.pubsub.url = v;
		info!("pubsub config: url overridden by env");
	}

	if let Some(v) = env_string("CHATPUMP_PUBSUB_TOKEN") {
		cfg.pubsub.token = Some(SecretString::new(v));
		info!("pubsub config: token overridden by env");
	}

	if let Some(v) = env_string("CHATPUMP_PUBSUB_TOPICS") {
		let raw: Vec<String> = v.split(',').map(str::to_string).collect();
		cfg.pubsub.topics = parse_topics(&raw);
		info!(topics = cfg.pubsub.topics.len(), "pubsub config: topics overridden by env");
	}

	if let Some(v) = env_string("CHATPUMP_LOG_PATH") {
		cfg.server.log_path = Some(PathBuf::from(v));
		info!("server config: log_path overridden by env");
	}

	if let Some(v) = env_string("CHATPUMP_TRACE_PATH") {
		cfg.server.trace_path = Some(PathBuf::from(v));
		info!("server config: trace_path overridden by env");
	}

	if let Some(v) = env_string("CHATPUMP_METRICS_BIND") {
		cfg.server.metrics_bind = Some(v);
		info!("server config: metrics_bind overridden by env");
	}
}
