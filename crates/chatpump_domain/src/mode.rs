use serde::{Deserialize, Serialize};

use crate::UserRef;

/// Outcome of a host-target notification, relative to the local room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostUpdate {
	/// The local room started hosting this user.
	NowHosting(UserRef),
	/// The local room is being hosted by `source`.
	HostedBy { source: UserRef, viewers: u32 },
	/// The given room stopped hosting.
	Stopped(UserRef),
}

/// Room mode flags, updated by the chat client from room-state and notices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMode {
	pub subs_only: bool,
	pub emote_only: bool,
	pub followers_only: bool,
	pub slow_mode: bool,
	pub r9k: bool,
	pub language: String,
	hosting_target: Option<UserRef>,
}

impl ChatMode {
	pub fn hosting_target(&self) -> Option<&UserRef> {
		self.hosting_target.as_ref()
	}

	/// Apply a host transition. Only transitions that concern the local room
	/// touch `hosting_target`; being hosted by someone else leaves it alone.
	pub fn apply_host_update(&mut self, update: &HostUpdate, local_room: &str) {
		match update {
			HostUpdate::NowHosting(target) => {
				self.hosting_target = Some(target.clone());
			}
			HostUpdate::Stopped(source) => {
				if source.nick.eq_ignore_ascii_case(local_room) {
					self.hosting_target = None;
				}
			}
			HostUpdate::HostedBy { .. } => {}
		}
	}
}
