use chatpump_domain::{HostUpdate, UserRef};
use tracing::warn;

use crate::{IrcMessage, IrcParseError};

const STOPPED: &str = "-";

/// Classify `HOSTTARGET #channel :<target|-> [viewers]` relative to `local_room`.
pub fn parse_host_target(msg: &IrcMessage, local_room: &str) -> Result<HostUpdate, IrcParseError> {
	let channel = msg
		.channel()
		.ok_or_else(|| IrcParseError::Host("missing channel".to_string()))?;
	let body = msg
		.param(1)
		.ok_or_else(|| IrcParseError::Host("missing target".to_string()))?;

	let mut parts = body.split_whitespace();
	let target = parts
		.next()
		.ok_or_else(|| IrcParseError::Host("empty target".to_string()))?;
	let viewers = match parts.next() {
		None => 0,
		Some(raw) => raw.parse().unwrap_or_else(|_| {
			warn!(value = raw, "irc: malformed host viewer count, using 0");
			0
		}),
	};

	if target == STOPPED {
		return Ok(HostUpdate::Stopped(UserRef::nick(channel)));
	}
	if channel.eq_ignore_ascii_case(local_room) {
		return Ok(HostUpdate::NowHosting(UserRef::nick(target)));
	}
	if target.eq_ignore_ascii_case(local_room) {
		return Ok(HostUpdate::HostedBy {
			source: UserRef::nick(channel),
			viewers,
		});
	}

	Err(IrcParseError::Host(format!(
		"neither {channel} nor {target} is the local room {local_room}"
	)))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn host(line: &str) -> Result<HostUpdate, IrcParseError> {
		parse_host_target(&IrcMessage::parse(line).unwrap(), "me")
	}

	#[test]
	fn three_way_outcome() {
		assert_eq!(
			host(":tmi.twitch.tv HOSTTARGET #me :friend 10").unwrap(),
			HostUpdate::NowHosting(UserRef::nick("friend"))
		);
		assert_eq!(
			host(":tmi.twitch.tv HOSTTARGET #friend :me 42").unwrap(),
			HostUpdate::HostedBy {
				source: UserRef::nick("friend"),
				viewers: 42
			}
		);
		assert_eq!(
			host(":tmi.twitch.tv HOSTTARGET #me :- 0").unwrap(),
			HostUpdate::Stopped(UserRef::nick("me"))
		);
	}

	#[test]
	fn viewer_count_defaults_to_zero() {
		assert_eq!(
			host(":tmi.twitch.tv HOSTTARGET #friend :me").unwrap(),
			HostUpdate::HostedBy {
				source: UserRef::nick("friend"),
				viewers: 0
			}
		);
		assert!(matches!(
			host(":tmi.twitch.tv HOSTTARGET #friend :me lots"),
			Ok(HostUpdate::HostedBy { viewers: 0, .. })
		));
	}

	#[test]
	fn unrelated_or_truncated_is_an_error() {
		assert!(host(":tmi.twitch.tv HOSTTARGET #a :b 1").is_err());
		assert!(host(":tmi.twitch.tv HOSTTARGET #a").is_err());
		assert!(host(":tmi.twitch.tv HOSTTARGET").is_err());
	}
}
