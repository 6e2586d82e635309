use core::fmt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Lightweight reference to a chat identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserRef {
	pub id: String,
	pub nick: String,
}

impl UserRef {
	pub fn new(id: impl Into<String>, nick: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			nick: nick.into(),
		}
	}

	/// Reference known only by nick.
	pub fn nick(nick: impl Into<String>) -> Self {
		Self::new(String::new(), nick)
	}

	/// Ids win when both sides have one; otherwise nicks compare case-insensitively.
	pub fn same_user(&self, other: &UserRef) -> bool {
		if !self.id.is_empty() && !other.id.is_empty() {
			return self.id == other.id;
		}
		self.nick.eq_ignore_ascii_case(&other.nick)
	}
}

impl fmt::Display for UserRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.nick)
	}
}

/// Durable viewer record owned by the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewer {
	pub id: String,
	pub nick: String,
	pub display_name: String,
}

impl Viewer {
	pub fn user_ref(&self) -> UserRef {
		UserRef::new(self.id.clone(), self.nick.clone())
	}
}

/// Turns protocol identities into viewer records.
#[async_trait]
pub trait UserResolver: Send + Sync {
	async fn resolve_by_nick(&self, nick: &str) -> Option<Viewer>;
	async fn resolve_by_id(&self, id: &str) -> Option<Viewer>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadgeInfo {
	pub id: String,
	pub version: String,
	pub title: String,
	pub image_url: String,
}

pub trait BadgeCatalog: Send + Sync {
	fn lookup(&self, badge_id: &str, version: &str) -> Option<BadgeInfo>;
}

/// Wrapper that redacts in logs.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	/// Access the inner secret string.
	pub fn expose(&self) -> &str {
		&self.0
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(<redacted>)")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<redacted>")
	}
}

#[derive(Debug, Clone, Default)]
pub struct Credentials {
	pub has_auth: bool,
	pub name: String,
	pub secret: SecretString,
}

/// Supplies login material to the chat client.
pub trait AuthProvider: Send + Sync {
	fn credentials(&self) -> Credentials;
}

/// Fixed credentials, typically loaded from configuration.
#[derive(Debug, Clone)]
pub struct StaticAuth {
	name: String,
	secret: SecretString,
}

impl StaticAuth {
	pub fn new(name: impl Into<String>, secret: SecretString) -> Self {
		Self {
			name: name.into(),
			secret,
		}
	}
}

impl AuthProvider for StaticAuth {
	fn credentials(&self) -> Credentials {
		let has_auth = !self.name.trim().is_empty() && !self.secret.is_empty();
		Credentials {
			has_auth,
			name: self.name.clone(),
			secret: self.secret.clone(),
		}
	}
}

/// In-memory badge catalog keyed by `(badge_id, version)`.
#[derive(Debug, Default)]
pub struct StaticBadgeCatalog {
	badges: HashMap<(String, String), BadgeInfo>,
}

impl StaticBadgeCatalog {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&mut self, info: BadgeInfo) {
		self.badges.insert((info.id.clone(), info.version.clone()), info);
	}
}

impl BadgeCatalog for StaticBadgeCatalog {
	fn lookup(&self, badge_id: &str, version: &str) -> Option<BadgeInfo> {
		self.badges.get(&(badge_id.to_string(), version.to_string())).cloned()
	}
}

#[derive(Debug, Default)]
struct Directory {
	by_id: HashMap<String, Viewer>,
	id_by_nick: HashMap<String, String>,
	by_nick_only: HashMap<String, Viewer>,
}

/// In-memory [`UserResolver`].
///
/// With `auto_register` enabled, unknown nicks resolve to a fresh viewer with
/// an empty id, so rooms work without an external user service.
#[derive(Debug, Default)]
pub struct ViewerDirectory {
	inner: RwLock<Directory>,
	auto_register: bool,
	registered: AtomicU64,
}

impl ViewerDirectory {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn auto_registering() -> Self {
		Self {
			auto_register: true,
			..Self::default()
		}
	}

	pub fn insert(&self, viewer: Viewer) {
		let mut dir = self.inner.write();
		let nick = viewer.nick.to_ascii_lowercase();
		dir.by_nick_only.remove(&nick);
		if viewer.id.is_empty() {
			dir.by_nick_only.insert(nick, viewer);
			return;
		}
		dir.id_by_nick.insert(nick, viewer.id.clone());
		dir.by_id.insert(viewer.id.clone(), viewer);
	}

	pub fn len(&self) -> usize {
		let dir = self.inner.read();
		dir.by_id.len() + dir.by_nick_only.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Number of viewers created by auto-registration.
	pub fn auto_registered(&self) -> u64 {
		self.registered.load(Ordering::Relaxed)
	}
}

#[async_trait]
impl UserResolver for ViewerDirectory {
	async fn resolve_by_nick(&self, nick: &str) -> Option<Viewer> {
		let key = nick.to_ascii_lowercase();
		{
			let dir = self.inner.read();
			if let Some(id) = dir.id_by_nick.get(&key)
				&& let Some(v) = dir.by_id.get(id)
			{
				return Some(v.clone());
			}
			if let Some(v) = dir.by_nick_only.get(&key) {
				return Some(v.clone());
			}
		}

		if !self.auto_register || key.is_empty() {
			return None;
		}

		let viewer = Viewer {
			id: String::new(),
			nick: key.clone(),
			display_name: nick.to_string(),
		};
		let mut dir = self.inner.write();
		let entry = dir.by_nick_only.entry(key).or_insert_with(|| {
			self.registered.fetch_add(1, Ordering::Relaxed);
			viewer
		});
		Some(entry.clone())
	}

	async fn resolve_by_id(&self, id: &str) -> Option<Viewer> {
		if id.is_empty() {
			return None;
		}
		self.inner.read().by_id.get(id).cloned()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn same_user_prefers_ids() {
		assert!(UserRef::new("1", "a").same_user(&UserRef::new("1", "renamed")));
		assert!(!UserRef::new("1", "a").same_user(&UserRef::new("2", "a")));
		assert!(UserRef::nick("Alice").same_user(&UserRef::new("9", "alice")));
	}

	#[test]
	fn secret_is_redacted() {
		let s = SecretString::new("oauth:abc");
		assert_eq!(format!("{s}"), "<redacted>");
		assert!(!format!("{s:?}").contains("abc"));
		assert_eq!(s.expose(), "oauth:abc");
	}

	#[test]
	fn static_auth_requires_name_and_secret() {
		assert!(StaticAuth::new("bot", SecretString::new("x")).credentials().has_auth);
		assert!(!StaticAuth::new("", SecretString::new("x")).credentials().has_auth);
		assert!(!StaticAuth::new("bot", SecretString::default()).credentials().has_auth);
	}

	#[test]
	fn badge_catalog_lookup() {
		let mut catalog = StaticBadgeCatalog::new();
		catalog.insert(BadgeInfo {
			id: "moderator".into(),
			version: "1".into(),
			title: "Moderator".into(),
			image_url: String::new(),
		});
		assert!(catalog.lookup("moderator", "1").is_some());
		assert!(catalog.lookup("moderator", "2").is_none());
	}

	#[tokio::test]
	async fn directory_resolves_known_and_registers_unknown() {
		let dir = ViewerDirectory::new();
		dir.insert(Viewer {
			id: "7".into(),
			nick: "dallas".into(),
			display_name: "Dallas".into(),
		});
		assert_eq!(dir.resolve_by_id("7").await.unwrap().nick, "dallas");
		assert_eq!(dir.resolve_by_nick("DALLAS").await.unwrap().id, "7");
		assert!(dir.resolve_by_nick("ghost").await.is_none());

		let auto = ViewerDirectory::auto_registering();
		let v = auto.resolve_by_nick("Ghost").await.unwrap();
		assert!(v.id.is_empty());
		assert_eq!(v.display_name, "Ghost");
		auto.resolve_by_nick("ghost").await.unwrap();
		assert_eq!(auto.auto_registered(), 1);
		assert!(auto.resolve_by_id("").await.is_none());
	}
}
