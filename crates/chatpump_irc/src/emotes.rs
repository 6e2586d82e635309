use chatpump_domain::EmoteSpan;
use tracing::warn;

/// Parse an `emotes` tag (`id:s-e,s-e/id:s-e`) into spans ordered by
/// descending `end`. Malformed ranges are logged and skipped.
pub fn parse_emotes_tag(tag: &str) -> Vec<EmoteSpan> {
	let mut spans = Vec::new();

	for group in tag.split('/').filter(|g| !g.is_empty()) {
		let Some((id, ranges)) = group.split_once(':') else {
			warn!(group, "irc: emote group without ranges");
			continue;
		};

		for range in ranges.split(',') {
			match parse_range(range) {
				Some((start, end)) => spans.push(EmoteSpan::new(id, start, end)),
				None => warn!(emote = id, range, "irc: malformed emote range"),
			}
		}
	}

	spans.sort_by(|a, b| b.end.cmp(&a.end).then(b.start.cmp(&a.start)));
	spans
}

fn parse_range(range: &str) -> Option<(usize, usize)> {
	let (s, e) = range.split_once('-')?;
	let start = s.trim().parse().ok()?;
	let end = e.trim().parse().ok()?;
	(start <= end).then_some((start, end))
}

/// Replace every span (code-point offsets, inclusive end) with `f(span, text)`.
///
/// Spans are applied back to front so replacements never move a span that is
/// still pending. Spans out of range or overlapping an applied one are skipped.
pub fn apply_emote_replacements<F>(text: &str, spans: &[EmoteSpan], mut f: F) -> String
where
	F: FnMut(&EmoteSpan, &str) -> String,
{
	let mut ordered: Vec<&EmoteSpan> = spans.iter().collect();
	ordered.sort_by(|a, b| b.end.cmp(&a.end));

	let mut chars: Vec<char> = text.chars().collect();
	let mut floor = chars.len();

	for span in ordered {
		if span.end >= floor || span.start > span.end {
			continue;
		}
		let original: String = chars[span.start..=span.end].iter().collect();
		let replacement = f(span, &original);
		chars.splice(span.start..=span.end, replacement.chars());
		floor = span.start;
	}

	chars.into_iter().collect()
}
