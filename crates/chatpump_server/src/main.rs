#![forbid(unsafe_code)]

mod config;
mod supervisor;

use std::fs::OpenOptions;
use std::io::LineWriter;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use chatpump_domain::{AlertType, LogCategory, SecretString, StaticAuth, ViewerDirectory};
use chatpump_irc::{ChatClient, ClientConfig, RateLimit};
use chatpump_pubsub::{PubSubClient, PubSubConfig};
use chatpump_store::{AlertPump, AlertPumpConfig, ChatLogConfig, ChatLogStore, LogSink, TraceStore};
use chatpump_util::{Endpoint, shutdown};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{ChatpumpConfig, PubSubSettings};
use crate::supervisor::ReconnectPolicy;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: chatpump [--config path]\n\
\n\
Options:\n\
\t--config  Config file (default: ~/.chatpump/config.toml)\n\
\t--help    Show this help\n\
"
	);
	std::process::exit(2)
}

fn parse_args() -> Option<PathBuf> {
	let mut config_path = None;

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--config" | "-c" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--config must be non-empty");
					usage_and_exit();
				}
				config_path = Some(PathBuf::from(v));
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	config_path
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,chatpump_server=debug".to_string());

	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());
	let base = tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr));

	if let Some(endpoint) = otlp_endpoint {
		use opentelemetry::global;
		use opentelemetry::trace::TracerProvider as _;
		use opentelemetry_otlp::WithExportConfig;

		match opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.with_endpoint(endpoint.clone())
			.build()
		{
			Ok(exporter) => {
				let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
					.with_batch_exporter(exporter)
					.build();
				let tracer = tracer_provider.tracer("chatpump");
				global::set_tracer_provider(tracer_provider);

				let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
				base.with(otel_layer).init();
				info!(endpoint = %endpoint, "otlp tracing enabled");
			}
			Err(e) => {
				base.init();
				warn!(error = %e, "failed to initialize otlp tracing");
			}
		}
	} else {
		base.init();
	}
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<std::net::SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

fn open_log_sink(cfg: &ChatpumpConfig) -> anyhow::Result<Option<LogSink>> {
	let Some(path) = cfg.server.log_path.as_deref() else {
		return Ok(None);
	};
	let file = OpenOptions::new()
		.create(true)
		.append(true)
		.open(path)
		.with_context(|| format!("open chat log {}", path.display()))?;
	info!(path = %path.display(), "chat log file opened");
	Ok(Some(Box::new(LineWriter::new(file))))
}

fn pubsub_config(settings: &PubSubSettings, fallback_token: Option<&SecretString>) -> anyhow::Result<PubSubConfig> {
	let url = url::Url::parse(&settings.url).with_context(|| format!("parse pubsub url {}", settings.url))?;
	if !matches!(url.scheme(), "ws" | "wss") {
		return Err(anyhow!("pubsub url must use ws:// or wss:// (got {})", url.scheme()));
	}

	let token = settings
		.token
		.clone()
		.or_else(|| {
			fallback_token.map(|t| SecretString::new(t.expose().strip_prefix("oauth:").unwrap_or(t.expose())))
		})
		.ok_or_else(|| anyhow!("pubsub enabled but no token configured"))?;

	let mut cfg = PubSubConfig::new(url.as_str(), token);
	cfg.topics = settings.topics.clone();
	if let Some(v) = settings.ping_interval {
		cfg.ping_interval = v;
	}
	if let Some(v) = settings.pong_timeout {
		cfg.pong_timeout = v;
	}
	if let Some(v) = settings.max_missed_pongs {
		cfg.max_missed_pongs = v;
	}
	if let Some(v) = settings.reconnect_min_delay {
		cfg.reconnect_min_delay = v;
	}
	if let Some(v) = settings.reconnect_max_delay {
		cfg.reconnect_max_delay = v;
	}
	Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let config_path = match parse_args() {
		Some(path) => path,
		None => crate::config::default_config_path()?,
	};
	let cfg = crate::config::load_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded config (toml + env overrides)");

	init_metrics(cfg.server.metrics_bind.as_deref());

	let (trigger, shutdown) = shutdown::channel();
	let mut tasks: Vec<JoinHandle<()>> = Vec::new();

	let (chat_log, chat_task) = ChatLogStore::spawn(
		ChatLogConfig {
			history_capacity: cfg.server.history_capacity,
			..ChatLogConfig::default()
		},
		open_log_sink(&cfg)?,
		shutdown.clone(),
	);
	let (alerts, alert_task) = AlertPump::spawn(
		AlertPumpConfig {
			recent_capacity: cfg.server.alert_history_capacity,
			..AlertPumpConfig::default()
		},
		shutdown.clone(),
	);
	tasks.push(chat_task);
	tasks.push(alert_task);

	let trace = TraceStore::new(cfg.server.trace_capacity).context("create raw trace store")?;

	let printed: Vec<LogCategory> = LogCategory::ALL
		.into_iter()
		.filter(|c| *c != LogCategory::Silent)
		.collect();
	let chat_sub = chat_log.subscribe("stdout", printed).await?;
	let alert_sub = alerts.subscribe("stdout", Vec::<AlertType>::new()).await?;
	tokio::spawn(supervisor::print_chat(chat_sub));
	tokio::spawn(supervisor::print_alerts(alert_sub));

	if cfg.irc.is_configured() {
		let endpoint = Endpoint::parse(&cfg.irc.endpoint).map_err(|e| anyhow!("irc endpoint: {e}"))?;
		let auth = StaticAuth::new(cfg.irc.nick.clone().unwrap_or_default(), cfg.irc.token.clone().unwrap_or_default());

		let mut client_cfg = ClientConfig::new(cfg.irc.room.clone().unwrap_or_default());
		client_cfg.ignore = cfg.irc.ignore.iter().cloned().collect();
		client_cfg.rate_limit = RateLimit {
			quota: cfg.irc.rate_limit,
			window: cfg.irc.rate_limit_window,
		};

		let client = ChatClient::new(
			client_cfg,
			&auth,
			Arc::new(ViewerDirectory::auto_registering()),
			chat_log.clone(),
			alerts.clone(),
			trace.clone(),
		)
		.context("create chat client")?;

		let policy = ReconnectPolicy {
			min_delay: cfg.irc.reconnect_min_delay,
			max_delay: cfg.irc.reconnect_max_delay,
		};
		tasks.push(tokio::spawn(supervisor::run_irc(client, endpoint, policy, shutdown.clone())));
	} else {
		warn!("irc config: room, nick or token missing; chat ingestion disabled");
	}

	if cfg.pubsub.enabled {
		let pubsub_cfg = pubsub_config(&cfg.pubsub, cfg.irc.token.as_ref())?;
		let (events_tx, events_rx) = mpsc::channel(256);
		let (_handle, pubsub_task) = PubSubClient::spawn(pubsub_cfg, alerts.clone(), Some(events_tx), shutdown.clone());
		tokio::spawn(supervisor::print_pubsub_events(events_rx));
		tasks.push(tokio::spawn(async move {
			match pubsub_task.await {
				Ok(Ok(())) => {}
				Ok(Err(e)) => warn!(error = %e, "pubsub: client stopped with error"),
				Err(e) => warn!(error = %e, "pubsub: client task failed"),
			}
		}));
	}

	tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
	info!("shutdown requested");
	trigger.trigger();

	if tokio::time::timeout(SHUTDOWN_GRACE, futures::future::join_all(tasks))
		.await
		.is_err()
	{
		warn!("tasks did not stop within the grace period");
	}

	if let Some(path) = cfg.server.trace_path.as_deref() {
		match std::fs::write(path, trace.snapshot()) {
			Ok(()) => info!(path = %path.display(), "raw trace written"),
			Err(e) => warn!(error = %e, path = %path.display(), "failed to write raw trace"),
		}
	}

	Ok(())
}
