use std::collections::HashMap;

use tracing::warn;

use crate::IrcParseError;

/// IRCv3 message tags, already unescaped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags(HashMap<String, String>);

impl Tags {
	fn parse(raw: &str) -> Self {
		let map = raw
			.split(';')
			.filter(|kv| !kv.is_empty())
			.map(|kv| match kv.split_once('=') {
				Some((k, v)) => (k.to_string(), unescape(v)),
				None => (kv.to_string(), String::new()),
			})
			.collect();
		Self(map)
	}

	/// Tag value; empty values are treated as absent.
	pub fn get(&self, key: &str) -> Option<&str> {
		self.0.get(key).map(String::as_str).filter(|v| !v.is_empty())
	}

	pub fn contains(&self, key: &str) -> bool {
		self.0.contains_key(key)
	}

	/// Numeric flag, on when `> 0`. Non-numeric values are logged and read as off.
	pub fn get_bool(&self, key: &str) -> Option<bool> {
		let raw = self.0.get(key)?;
		match raw.trim().parse::<i64>() {
			Ok(v) => Some(v > 0),
			Err(_) => {
				warn!(tag = key, value = %raw, "irc: non-numeric flag tag, treating as off");
				Some(false)
			}
		}
	}

	/// Non-negative count; absent or malformed values read as 0.
	pub fn count(&self, key: &str) -> u32 {
		let Some(raw) = self.get(key) else {
			return 0;
		};
		match raw.trim().parse::<u32>() {
			Ok(v) => v,
			Err(_) => {
				warn!(tag = key, value = %raw, "irc: malformed count tag, using 0");
				0
			}
		}
	}
}

fn unescape(v: &str) -> String {
	let mut out = String::with_capacity(v.len());
	let mut chars = v.chars();
	while let Some(c) = chars.next() {
		if c != '\\' {
			out.push(c);
			continue;
		}
		match chars.next() {
			Some(':') => out.push(';'),
			Some('s') => out.push(' '),
			Some('r') => out.push('\r'),
			Some('n') => out.push('\n'),
			Some(other) => out.push(other),
			None => {}
		}
	}
	out
}

/// One parsed protocol line: `[@tags] [:prefix] COMMAND [params] [:trailing]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcMessage {
	pub tags: Tags,
	pub prefix: Option<String>,
	pub command: String,
	pub params: Vec<String>,
}

impl IrcMessage {
	pub fn parse(line: &str) -> Result<Self, IrcParseError> {
		let mut rest = line.trim_end_matches(['\r', '\n']);
		if rest.trim().is_empty() {
			return Err(IrcParseError::Empty);
		}

		let mut tags = Tags::default();
		if let Some(tagged) = rest.strip_prefix('@') {
			let (raw, after) = tagged.split_once(' ').ok_or(IrcParseError::MissingCommand)?;
			tags = Tags::parse(raw);
			rest = after.trim_start();
		}

		let mut prefix = None;
		if let Some(prefixed) = rest.strip_prefix(':') {
			let (p, after) = prefixed.split_once(' ').ok_or(IrcParseError::MissingCommand)?;
			prefix = Some(p.to_string());
			rest = after.trim_start();
		}

		let (command, mut rest) = match rest.split_once(' ') {
			Some((c, r)) => (c, r),
			None => (rest, ""),
		};
		if command.is_empty() {
			return Err(IrcParseError::MissingCommand);
		}

		let mut params = Vec::new();
		loop {
			rest = rest.trim_start_matches(' ');
			if rest.is_empty() {
				break;
			}
			if let Some(trailing) = rest.strip_prefix(':') {
				params.push(trailing.to_string());
				break;
			}
			match rest.split_once(' ') {
				Some((p, r)) => {
					params.push(p.to_string());
					rest = r;
				}
				None => {
					params.push(rest.to_string());
					break;
				}
			}
		}

		Ok(Self {
			tags,
			prefix,
			command: command.to_ascii_uppercase(),
			params,
		})
	}

	/// Sender nick from `nick!user@host`, or the bare server name.
	pub fn nick(&self) -> Option<&str> {
		let prefix = self.prefix.as_deref()?;
		let nick = prefix.split_once('!').map(|(n, _)| n).unwrap_or(prefix);
		(!nick.is_empty()).then_some(nick)
	}

	pub fn param(&self, idx: usize) -> Option<&str> {
		self.params.get(idx).map(String::as_str)
	}

	/// Last parameter, usually the message text.
	pub fn trailing(&self) -> Option<&str> {
		self.params.last().map(String::as_str)
	}

	/// First parameter without its `#`, for channel-scoped commands.
	pub fn channel(&self) -> Option<&str> {
		self.param(0).and_then(|p| p.strip_prefix('#'))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_tagged_privmsg() {
		let m = IrcMessage::parse(
			"@badges=moderator/1;bits=100;display-name=Dallas;system-msg=hi\\sthere\\:) :dallas!dallas@dallas.tmi.twitch.tv PRIVMSG #room :cheer100 hello : world\r\n",
		)
		.unwrap();
		assert_eq!(m.command, "PRIVMSG");
		assert_eq!(m.nick(), Some("dallas"));
		assert_eq!(m.channel(), Some("room"));
		assert_eq!(m.trailing(), Some("cheer100 hello : world"));
		assert_eq!(m.tags.get("system-msg"), Some("hi there;)"));
		assert_eq!(m.tags.count("bits"), 100);
	}

	#[test]
	fn parses_numeric_and_bare_commands() {
		let m = IrcMessage::parse(":tmi.twitch.tv 001 bot :Welcome, GLHF!").unwrap();
		assert_eq!(m.command, "001");
		assert_eq!(m.nick(), Some("tmi.twitch.tv"));
		assert_eq!(m.params, vec!["bot", "Welcome, GLHF!"]);

		let ping = IrcMessage::parse("PING :tmi.twitch.tv").unwrap();
		assert_eq!(ping.prefix, None);
		assert_eq!(ping.trailing(), Some("tmi.twitch.tv"));

		let reconnect = IrcMessage::parse(":tmi.twitch.tv RECONNECT").unwrap();
		assert!(reconnect.params.is_empty());
	}

	#[test]
	fn rejects_empty_and_commandless_lines() {
		assert_eq!(IrcMessage::parse("\r\n"), Err(IrcParseError::Empty));
		assert_eq!(IrcMessage::parse("@a=b"), Err(IrcParseError::MissingCommand));
		assert_eq!(IrcMessage::parse(":prefix-only"), Err(IrcParseError::MissingCommand));
	}

	#[test]
	fn flag_and_count_defaults() {
		let m = IrcMessage::parse("@emote-only=1;slow=0;r9k=abc;followers-only=-1;bits=x :tmi.twitch.tv ROOMSTATE #room").unwrap();
		assert_eq!(m.tags.get_bool("emote-only"), Some(true));
		assert_eq!(m.tags.get_bool("slow"), Some(false));
		assert_eq!(m.tags.get_bool("r9k"), Some(false));
		assert_eq!(m.tags.get_bool("followers-only"), Some(false));
		assert_eq!(m.tags.get_bool("subs-only"), None);
		assert_eq!(m.tags.count("bits"), 0);
		assert_eq!(m.tags.count("missing"), 0);
	}
}
