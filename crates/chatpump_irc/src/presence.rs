use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;

#[derive(Debug)]
struct PresenceEntry {
	last_active: Instant,
	in_room: Duration,
}

/// Point-in-time copy of one viewer's presence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceSnapshot {
	pub nick: String,
	pub last_active: Instant,
	pub time_in_room: Duration,
}

/// Per-viewer activity bookkeeping for the joined room.
///
/// The map lock guards insert/remove; each entry has its own lock for field
/// updates.
#[derive(Debug, Default)]
pub struct PresenceTable {
	viewers: RwLock<HashMap<String, Arc<Mutex<PresenceEntry>>>>,
}

impl PresenceTable {
	pub fn new() -> Self {
		Self::default()
	}

	/// Record activity: creates the entry, or accrues time since the last one.
	pub fn touch(&self, nick: &str, now: Instant) {
		let key = nick.to_ascii_lowercase();

		let existing = self.viewers.read().get(&key).cloned();
		let entry = match existing {
			Some(entry) => entry,
			None => {
				let mut map = self.viewers.write();
				match map.get(&key) {
					Some(entry) => entry.clone(),
					None => {
						map.insert(
							key,
							Arc::new(Mutex::new(PresenceEntry {
								last_active: now,
								in_room: Duration::ZERO,
							})),
						);
						return;
					}
				}
			}
		};

		let mut e = entry.lock();
		let last_active = e.last_active;
		e.in_room += now.saturating_duration_since(last_active);
		e.last_active = now;
	}

	/// Remove a viewer after one final accrual; returns the total time in room.
	pub fn part(&self, nick: &str, now: Instant) -> Option<Duration> {
		let entry = self.viewers.write().remove(&nick.to_ascii_lowercase())?;
		let mut e = entry.lock();
		let last_active = e.last_active;
		e.in_room += now.saturating_duration_since(last_active);
		e.last_active = now;
		Some(e.in_room)
	}

	pub fn len(&self) -> usize {
		self.viewers.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn clear(&self) {
		self.viewers.write().clear();
	}

	pub fn snapshot(&self) -> Vec<PresenceSnapshot> {
		let map = self.viewers.read();
		let mut out: Vec<_> = map
			.iter()
			.map(|(nick, entry)| {
				let e = entry.lock();
				PresenceSnapshot {
					nick: nick.clone(),
					last_active: e.last_active,
					time_in_room: e.in_room,
				}
			})
			.collect();
		out.sort_by(|a, b| a.nick.cmp(&b.nick));
		out
	}
}
