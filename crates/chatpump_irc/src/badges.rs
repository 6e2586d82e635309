use chatpump_domain::{BadgeCatalog, BadgeInfo};

/// Single-slot badge indicators, highest priority first.
const PRIORITY: [(&str, char); 5] = [
	("broadcaster", '~'),
	("staff", '&'),
	("global_mod", '%'),
	("moderator", '@'),
	("turbo", '+'),
];

const SUBSCRIBER: &str = "subscriber";
const SUBSCRIBER_MARK: char = '$';

/// Split a `badges` tag (`name/version,name/version`) into pairs.
pub fn parse_badges(tag: &str) -> Vec<(&str, &str)> {
	tag.split(',')
		.filter(|b| !b.is_empty())
		.map(|b| b.split_once('/').unwrap_or((b, "")))
		.collect()
}

/// Compact display form: the highest-priority indicator, then `$<tier>`
/// when a subscriber badge is present (e.g. `@$12`).
pub fn compact_badge(tag: &str) -> String {
	let badges = parse_badges(tag);
	let mut out = String::new();

	if let Some((_, mark)) = PRIORITY
		.iter()
		.find(|(name, _)| badges.iter().any(|(b, _)| b == name))
	{
		out.push(*mark);
	}

	if let Some((_, version)) = badges.iter().find(|(b, _)| *b == SUBSCRIBER) {
		out.push(SUBSCRIBER_MARK);
		out.push_str(version);
	}

	out
}

/// Catalog metadata for every badge in the tag; unknown badges are skipped.
pub fn describe_badges(tag: &str, catalog: &dyn BadgeCatalog) -> Vec<BadgeInfo> {
	parse_badges(tag)
		.into_iter()
		.filter_map(|(id, version)| catalog.lookup(id, version))
		.collect()
}

#[cfg(test)]
mod tests {
	use chatpump_domain::StaticBadgeCatalog;

	use super::*;

	#[test]
	fn moderator_beats_turbo() {
		assert_eq!(compact_badge("turbo/1,moderator/1"), "@");
		assert_eq!(compact_badge("broadcaster/1,moderator/1"), "~");
		assert_eq!(compact_badge("global_mod/1,turbo/1"), "%");
	}

	#[test]
	fn subscriber_tier_is_appended() {
		assert_eq!(compact_badge("subscriber/10"), "$10");
		assert_eq!(compact_badge("moderator/1,subscriber/12"), "@$12");
		assert_eq!(compact_badge(""), "");
		assert_eq!(compact_badge("premium/1"), "");
	}

	#[test]
	fn describe_skips_unknown() {
		let mut catalog = StaticBadgeCatalog::new();
		catalog.insert(BadgeInfo {
			id: "subscriber".into(),
			version: "12".into(),
			title: "1-Year Subscriber".into(),
			image_url: "https://example.invalid/sub12.png".into(),
		});
		let found = describe_badges("moderator/1,subscriber/12", &catalog);
		assert_eq!(found.len(), 1);
		assert_eq!(found[0].title, "1-Year Subscriber");
	}
}
