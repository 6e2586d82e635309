use chatpump_domain::{
	AlertPayload, ChatMode, HostUpdate, LogCategory, MessageDetail, ParsedLine, SubNotice, UserRef, Viewer,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::client::{CAPABILITIES, ChatClient, Phase};
use crate::ratelimit::OutboundQueue;
use crate::{ClientError, IrcMessage, MessageError, badges, emotes, host};

/// The service itself and its notification relay; never viewers.
const SYSTEM_USERS: [&str; 2] = ["tmi.twitch.tv", "jtv"];

const ACTION_PREFIX: &str = "\u{1}ACTION ";

fn now_secs() -> i64 {
	chrono::Utc::now().timestamp()
}

fn is_system_user(nick: &str) -> bool {
	SYSTEM_USERS.iter().any(|s| nick.eq_ignore_ascii_case(s))
}

fn strip_action(text: &str) -> Option<&str> {
	let inner = text.strip_prefix(ACTION_PREFIX)?;
	Some(inner.strip_suffix('\u{1}').unwrap_or(inner))
}

impl ChatClient {
	pub(crate) async fn dispatch(&self, msg: IrcMessage, queue: &OutboundQueue) -> Result<(), ClientError> {
		match msg.command.as_str() {
			"001" => self.on_welcome(queue).await?,
			"CAP" => self.on_cap(&msg),
			"JOIN" => self.on_join(&msg),
			"PART" => self.on_part(&msg),
			"353" => self.on_names(&msg),
			"366" => self.set_phase(Phase::Active),
			"PING" => {
				let token = msg.trailing().unwrap_or("tmi.twitch.tv");
				queue.send(format!("PONG :{token}")).await?;
			}
			"PRIVMSG" => self.on_privmsg(&msg).await,
			"WHISPER" => self.on_whisper(&msg).await,
			"USERNOTICE" => self.on_usernotice(&msg).await,
			"ROOMSTATE" => self.on_roomstate(&msg),
			"NOTICE" => self.on_notice(&msg),
			"HOSTTARGET" => self.on_hosttarget(&msg),
			"CLEARCHAT" => self.on_clearchat(&msg),
			"CLEARMSG" => self.on_clearmsg(&msg),
			"RECONNECT" => {
				info!(room = %self.room, "irc: server requested reconnect");
				return Err(ClientError::ReconnectRequested);
			}
			other => debug!(command = other, "irc: ignoring command"),
		}
		Ok(())
	}

	fn log_system(&self, body: impl Into<String>) {
		self.chat_log.log_line(ParsedLine::system(now_secs(), body));
	}

	async fn on_welcome(&self, queue: &OutboundQueue) -> Result<(), ClientError> {
		self.set_phase(Phase::Registered);
		queue.send(format!("CAP REQ :{CAPABILITIES}")).await?;
		queue.send(format!("JOIN #{}", self.room)).await?;
		self.log_system(format!("connected as {}", self.creds.name));
		Ok(())
	}

	fn on_cap(&self, msg: &IrcMessage) {
		let verb = msg.param(1).unwrap_or_default();
		let caps = msg.trailing().unwrap_or_default();
		if verb.eq_ignore_ascii_case("NAK") {
			warn!(caps, "irc: capabilities rejected");
		} else {
			debug!(verb, caps, "irc: capabilities");
		}
	}

	fn on_join(&self, msg: &IrcMessage) {
		let Some(nick) = msg.nick() else {
			return;
		};
		if nick.eq_ignore_ascii_case(&self.creds.name) {
			self.set_phase(Phase::Joined);
			self.log_system(format!("joined #{}", self.room));
			return;
		}
		self.state.presence.touch(nick, Instant::now());
	}

	fn on_part(&self, msg: &IrcMessage) {
		let Some(nick) = msg.nick() else {
			return;
		};
		if let Some(total) = self.state.presence.part(nick, Instant::now()) {
			debug!(nick, secs = total.as_secs(), "irc: viewer left");
		}
	}

	fn on_names(&self, msg: &IrcMessage) {
		let now = Instant::now();
		for nick in msg.trailing().unwrap_or_default().split_whitespace() {
			if !nick.eq_ignore_ascii_case(&self.creds.name) {
				self.state.presence.touch(nick, now);
			}
		}
	}

	/// Resolve by id first, then by nick.
	async fn resolve(&self, id: Option<&str>, nick: &str) -> Result<Viewer, MessageError> {
		if let Some(id) = id
			&& let Some(v) = self.resolver.resolve_by_id(id).await
		{
			return Ok(v);
		}
		if let Some(v) = self.resolver.resolve_by_nick(nick).await {
			return Ok(v);
		}
		Err(MessageError::UnresolvedUser {
			nick: nick.to_string(),
			id: id.map(str::to_string),
		})
	}

	async fn message_detail(&self, msg: &IrcMessage, login: &str, content: &str) -> Result<MessageDetail, MessageError> {
		let tag_id = msg.tags.get("user-id");
		let viewer = self.resolve(tag_id, login).await?;

		Ok(MessageDetail {
			user_id: tag_id.map(str::to_string).unwrap_or(viewer.id),
			nick: viewer.nick,
			bits: msg.tags.count("bits"),
			badge: badges::compact_badge(msg.tags.get("badges").unwrap_or_default()),
			content: content.to_string(),
			emotes: emotes::parse_emotes_tag(msg.tags.get("emotes").unwrap_or_default()),
		})
	}

	async fn on_privmsg(&self, msg: &IrcMessage) {
		let Some(sender) = msg.nick() else {
			warn!(error = %MessageError::MissingSender, "irc: dropping PRIVMSG");
			return;
		};
		let text = msg.trailing().unwrap_or_default();
		let (category, content) = match strip_action(text) {
			Some(action) => (LogCategory::Action, action),
			None => (LogCategory::Message, text),
		};

		if is_system_user(sender) {
			self.log_system(content);
			return;
		}

		self.state.presence.touch(sender, Instant::now());

		if self.ignore.contains(&sender.to_ascii_lowercase()) {
			self.chat_log
				.log_line(ParsedLine::filtered(now_secs(), format!("{sender} : {content}")));
			return;
		}

		if let Err(e) = self.log_message(msg, sender, category, content).await {
			warn!(error = %e, nick = sender, "irc: dropping message");
		}
	}

	async fn log_message(
		&self,
		msg: &IrcMessage,
		sender: &str,
		category: LogCategory,
		content: &str,
	) -> Result<(), MessageError> {
		let detail = self.message_detail(msg, sender, content).await?;
		let source = UserRef::new(detail.user_id.clone(), detail.nick.clone());
		let bits = detail.bits;

		let line = ParsedLine::from_message(now_secs(), category, detail)?;
		self.chat_log.log_line(line);

		if bits > 0 {
			self.alerts.post(
				source,
				AlertPayload::Bits {
					bits,
					content: content.to_string(),
				},
			);
		}
		Ok(())
	}

	async fn on_whisper(&self, msg: &IrcMessage) {
		let Some(sender) = msg.nick() else {
			warn!(error = %MessageError::MissingSender, "irc: dropping WHISPER");
			return;
		};
		let content = msg.trailing().unwrap_or_default();

		if is_system_user(sender) {
			self.log_system(content);
			return;
		}
		if self.ignore.contains(&sender.to_ascii_lowercase()) {
			self.chat_log
				.log_line(ParsedLine::filtered(now_secs(), format!("{sender} : {content}")));
			return;
		}

		let res = async {
			let detail = self.message_detail(msg, sender, content).await?;
			let source = UserRef::new(detail.user_id.clone(), detail.nick.clone());
			self.chat_log
				.log_line(ParsedLine::from_message(now_secs(), LogCategory::Whisper, detail)?);
			self.alerts.post(
				source,
				AlertPayload::Whisper {
					content: content.to_string(),
				},
			);
			Ok::<_, MessageError>(())
		}
		.await;

		if let Err(e) = res {
			warn!(error = %e, nick = sender, "irc: dropping whisper");
		}
	}

	async fn on_usernotice(&self, msg: &IrcMessage) {
		let kind = msg.tags.get("msg-id").unwrap_or_default();
		let system_msg = msg.tags.get("system-msg").unwrap_or(kind).to_string();

		let res = match kind {
			"sub" | "resub" => self.on_sub(msg, system_msg).await,
			"subgift" | "anonsubgift" => self.on_subgift(msg, system_msg).await,
			"raid" => self.on_raid(msg, system_msg).await,
			_ => {
				debug!(kind, "irc: unhandled user notice");
				self.chat_log.log_line(ParsedLine::unknown(now_secs(), system_msg));
				Ok(())
			}
		};

		if let Err(e) = res {
			warn!(error = %e, kind, "irc: dropping user notice");
		}
	}

	async fn on_sub(&self, msg: &IrcMessage, system_msg: String) -> Result<(), MessageError> {
		let login = msg
			.tags
			.get("login")
			.or_else(|| msg.nick())
			.ok_or(MessageError::MissingSender)?;
		let text = msg.trailing().filter(|_| msg.params.len() > 1).unwrap_or_default();

		let detail = self.message_detail(msg, login, text).await?;
		let source = UserRef::new(detail.user_id.clone(), detail.nick.clone());

		self.log_system(system_msg);
		if !text.is_empty() {
			self.chat_log
				.log_line(ParsedLine::from_message(now_secs(), LogCategory::Message, detail)?);
		}

		let months = match msg.tags.count("msg-param-cumulative-months") {
			0 => msg.tags.count("msg-param-months"),
			n => n,
		};
		self.alerts.post(
			source,
			AlertPayload::Sub(SubNotice {
				plan: msg.tags.get("msg-param-sub-plan").unwrap_or_default().to_string(),
				months,
				gift: false,
				message: text.to_string(),
			}),
		);
		Ok(())
	}

	async fn on_subgift(&self, msg: &IrcMessage, system_msg: String) -> Result<(), MessageError> {
		let recipient = msg
			.tags
			.get("msg-param-recipient-user-name")
			.ok_or(MessageError::MissingSender)?;
		let viewer = self
			.resolve(msg.tags.get("msg-param-recipient-id"), recipient)
			.await?;
		let id = msg
			.tags
			.get("msg-param-recipient-id")
			.map(str::to_string)
			.unwrap_or(viewer.id);

		self.log_system(system_msg);
		self.alerts.post(
			UserRef::new(id, viewer.nick),
			AlertPayload::Sub(SubNotice {
				plan: msg.tags.get("msg-param-sub-plan").unwrap_or_default().to_string(),
				months: msg.tags.count("msg-param-months"),
				gift: true,
				message: String::new(),
			}),
		);
		Ok(())
	}

	async fn on_raid(&self, msg: &IrcMessage, system_msg: String) -> Result<(), MessageError> {
		let raider = msg
			.tags
			.get("msg-param-login")
			.or_else(|| msg.tags.get("login"))
			.ok_or(MessageError::MissingSender)?;
		let tag_id = msg.tags.get("user-id");
		let viewer = self.resolve(tag_id, raider).await?;
		let id = tag_id.map(str::to_string).unwrap_or(viewer.id);
		let viewers = msg.tags.count("msg-param-viewerCount");

		self.log_system(system_msg);
		self.alerts.post(UserRef::new(id, viewer.nick), AlertPayload::Host { viewers });
		Ok(())
	}

	fn on_roomstate(&self, msg: &IrcMessage) {
		{
			let mut guard = self.state.mode.write();
			let mode: &mut ChatMode = &mut guard;
			let flags: [(&str, &mut bool); 5] = [
				("subs-only", &mut mode.subs_only),
				("emote-only", &mut mode.emote_only),
				("followers-only", &mut mode.followers_only),
				("slow", &mut mode.slow_mode),
				("r9k", &mut mode.r9k),
			];
			for (tag, slot) in flags {
				if let Some(v) = msg.tags.get_bool(tag) {
					*slot = v;
				}
			}
			if let Some(lang) = msg.tags.get("broadcaster-lang") {
				mode.language = lang.to_string();
			}
		}
		self.set_phase(Phase::Active);
	}

	fn on_notice(&self, msg: &IrcMessage) {
		let id = msg.tags.get("msg-id").unwrap_or_default();
		{
			let mut mode = self.state.mode.write();
			match id {
				"subs_on" => mode.subs_only = true,
				"subs_off" => mode.subs_only = false,
				"emote_only_on" => mode.emote_only = true,
				"emote_only_off" => mode.emote_only = false,
				"followers_on" | "followers_on_zero" => mode.followers_only = true,
				"followers_off" => mode.followers_only = false,
				"slow_on" => mode.slow_mode = true,
				"slow_off" => mode.slow_mode = false,
				"r9k_on" => mode.r9k = true,
				"r9k_off" => mode.r9k = false,
				"host_off" => {
					let stopped = HostUpdate::Stopped(UserRef::nick(self.room.clone()));
					mode.apply_host_update(&stopped, &self.room);
				}
				_ => {}
			}
		}
		self.log_system(msg.trailing().unwrap_or(id));
	}

	fn on_hosttarget(&self, msg: &IrcMessage) {
		let update = match host::parse_host_target(msg, &self.room) {
			Ok(u) => u,
			Err(e) => {
				warn!(error = %e, "irc: bad host target");
				return;
			}
		};

		self.state.mode.write().apply_host_update(&update, &self.room);

		match update {
			HostUpdate::NowHosting(target) => self.log_system(format!("now hosting {target}")),
			HostUpdate::Stopped(source) => self.log_system(format!("{source} stopped hosting")),
			HostUpdate::HostedBy { source, viewers } => {
				self.log_system(format!("hosted by {source} with {viewers} viewers"));
				self.alerts.post(source, AlertPayload::Host { viewers });
			}
		}
	}

	fn on_clearchat(&self, msg: &IrcMessage) {
		let body = match (msg.param(1), msg.tags.get("ban-duration")) {
			(Some(nick), Some(secs)) => format!("{nick} timed out for {secs}s"),
			(Some(nick), None) => format!("{nick} banned"),
			(None, _) => "chat cleared".to_string(),
		};
		self.log_system(body);
	}

	fn on_clearmsg(&self, msg: &IrcMessage) {
		let login = msg.tags.get("login").unwrap_or("someone");
		self.log_system(format!("message from {login} deleted"));
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn action_is_unwrapped() {
		assert_eq!(strip_action("\u{1}ACTION waves\u{1}"), Some("waves"));
		assert_eq!(strip_action("\u{1}ACTION waves"), Some("waves"));
		assert_eq!(strip_action("hello"), None);
	}

	#[test]
	fn system_users_match_case_insensitively() {
		assert!(is_system_user("jtv"));
		assert!(is_system_user("TMI.twitch.tv"));
		assert!(!is_system_user("dallas"));
	}
}
