use thiserror::Error;

/// Record terminator stored after every write.
pub const TERMINATOR: u8 = b'\n';

const MIN_CAPACITY: usize = 4;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RingError {
	#[error("ring capacity must be at least {MIN_CAPACITY} bytes, got {0}")]
	InvalidCapacity(usize),
	#[error("empty write")]
	EmptyWrite,
	#[error("write of {len} bytes exceeds the {max} byte limit")]
	WriteTooBig { len: usize, max: usize },
	#[error("write contains the record terminator")]
	EmbeddedTerminator,
	#[error("destination of {available} bytes cannot hold the next {needed} byte record")]
	BufferTooSmallForLine { needed: usize, available: usize },
}

/// Fixed-capacity byte ring of terminator-delimited records.
///
/// Offsets are kept as monotonically increasing logical positions; the
/// physical index is `pos % capacity`. `head` is the oldest retained byte,
/// `tail` the next write position and `replay` an independent scan cursor
/// with `head <= replay <= tail`.
#[derive(Debug, Clone)]
pub struct RingBuffer {
	buf: Vec<u8>,
	head: u64,
	replay: u64,
	tail: u64,
}

impl RingBuffer {
	pub fn new(capacity: usize) -> Result<Self, RingError> {
		if capacity < MIN_CAPACITY {
			return Err(RingError::InvalidCapacity(capacity));
		}
		Ok(Self {
			buf: vec![0; capacity],
			head: 0,
			replay: 0,
			tail: 0,
		})
	}

	pub fn capacity(&self) -> usize {
		self.buf.len()
	}

	/// Largest accepted payload, excluding the terminator.
	pub fn max_write(&self) -> usize {
		self.capacity() / 2
	}

	/// Retained bytes, terminators included.
	pub fn len(&self) -> usize {
		(self.tail - self.head) as usize
	}

	pub fn is_empty(&self) -> bool {
		self.tail == self.head
	}

	pub fn write_offset(&self) -> usize {
		self.phys(self.tail)
	}

	pub fn read_offset(&self) -> usize {
		self.phys(self.head)
	}

	pub fn replay_offset(&self) -> usize {
		self.phys(self.replay)
	}

	/// Append one record, evicting the oldest records when space runs out.
	pub fn write(&mut self, data: &[u8]) -> Result<(), RingError> {
		if data.is_empty() {
			return Err(RingError::EmptyWrite);
		}
		if data.len() > self.max_write() {
			return Err(RingError::WriteTooBig {
				len: data.len(),
				max: self.max_write(),
			});
		}
		if data.contains(&TERMINATOR) {
			return Err(RingError::EmbeddedTerminator);
		}

		let record_len = data.len() as u64 + 1;
		let cap = self.capacity() as u64;
		while self.tail + record_len - self.head > cap {
			self.evict_oldest();
		}

		let start = self.phys(self.tail);
		let first = data.len().min(self.capacity() - start);
		self.buf[start..start + first].copy_from_slice(&data[..first]);
		self.buf[..data.len() - first].copy_from_slice(&data[first..]);
		self.tail += data.len() as u64;

		let end = self.phys(self.tail);
		self.buf[end] = TERMINATOR;
		self.tail += 1;
		Ok(())
	}

	/// Copy unread records from the replay cursor into `dst`, never splitting
	/// a record. Returns the number of bytes copied (0 when caught up).
	pub fn read(&mut self, dst: &mut [u8]) -> Result<usize, RingError> {
		let available = (self.tail - self.replay) as usize;
		if available == 0 {
			return Ok(0);
		}

		if available <= dst.len() {
			self.copy_out(self.replay, &mut dst[..available]);
			self.replay = self.tail;
			return Ok(available);
		}

		self.copy_out(self.replay, dst);
		let Some(last) = dst.iter().rposition(|b| *b == TERMINATOR) else {
			let needed = self
				.find_terminator(self.replay)
				.map(|pos| (pos - self.replay) as usize + 1)
				.unwrap_or(available);
			return Err(RingError::BufferTooSmallForLine {
				needed,
				available: dst.len(),
			});
		};

		let n = last + 1;
		self.replay += n as u64;
		Ok(n)
	}

	/// Consume one record from the replay cursor, without its terminator.
	pub fn next_line(&mut self) -> Option<String> {
		if self.replay == self.tail {
			return None;
		}

		let end = self.find_terminator(self.replay).unwrap_or(self.tail);
		let mut out = vec![0; (end - self.replay) as usize];
		self.copy_out(self.replay, &mut out);
		self.replay = (end + 1).min(self.tail);
		Some(String::from_utf8_lossy(&out).into_owned())
	}

	/// Move the replay cursor back to the oldest retained record.
	pub fn reset_replay(&mut self) {
		self.replay = self.head;
	}

	/// All retained bytes, oldest first.
	pub fn bytes(&self) -> Vec<u8> {
		let mut out = vec![0; self.len()];
		self.copy_out(self.head, &mut out);
		out
	}

	/// Retained bytes as text. Records are whole, so code points are never split.
	pub fn to_string_lossy(&self) -> String {
		String::from_utf8_lossy(&self.bytes()).into_owned()
	}

	fn phys(&self, pos: u64) -> usize {
		(pos % self.capacity() as u64) as usize
	}

	fn find_terminator(&self, from: u64) -> Option<u64> {
		(from..self.tail).find(|pos| self.buf[self.phys(*pos)] == TERMINATOR)
	}

	fn evict_oldest(&mut self) {
		self.head = match self.find_terminator(self.head) {
			Some(pos) => pos + 1,
			None => self.tail,
		};
		if self.replay < self.head {
			self.replay = self.head;
		}
	}

	fn copy_out(&self, from: u64, dst: &mut [u8]) {
		let start = self.phys(from);
		let first = dst.len().min(self.capacity() - start);
		dst[..first].copy_from_slice(&self.buf[start..start + first]);
		let rest = dst.len() - first;
		dst[first..].copy_from_slice(&self.buf[..rest]);
	}
}

#[cfg(test)]
mod tests {
	use std::collections::VecDeque;

	use proptest::prelude::*;

	use super::*;

	#[test]
	fn rejects_bad_writes_without_mutation() {
		let mut ring = RingBuffer::new(16).unwrap();
		ring.write(b"abc").unwrap();
		let before = ring.bytes();

		assert_eq!(ring.write(b""), Err(RingError::EmptyWrite));
		assert_eq!(ring.write(&[b'x'; 9]), Err(RingError::WriteTooBig { len: 9, max: 8 }));
		assert_eq!(ring.write(b"a\nb"), Err(RingError::EmbeddedTerminator));
		assert_eq!(ring.bytes(), before);
		assert_eq!(ring.write_offset(), 4);
	}

	#[test]
	fn rejects_tiny_capacity() {
		assert_eq!(RingBuffer::new(3).unwrap_err(), RingError::InvalidCapacity(3));
	}

	#[test]
	fn evicts_whole_records_and_wraps() {
		let mut ring = RingBuffer::new(16).unwrap();
		ring.write(b"aaaaaaa").unwrap();
		ring.write(b"bbbbbbb").unwrap();
		assert_eq!(ring.len(), 16);

		ring.write(b"cc").unwrap();
		assert_eq!(ring.to_string_lossy(), "bbbbbbb\ncc\n");
		assert_eq!(ring.read_offset(), 8);
		assert_eq!(ring.write_offset(), 3);
	}

	#[test]
	fn eviction_drags_replay_cursor_forward() {
		let mut ring = RingBuffer::new(16).unwrap();
		ring.write(b"one").unwrap();
		ring.write(b"two").unwrap();
		ring.write(b"three").unwrap();
		ring.write(b"fourfour").unwrap();

		assert_eq!(ring.next_line().as_deref(), Some("three"));
		assert_eq!(ring.next_line().as_deref(), Some("fourfour"));
		assert_eq!(ring.next_line(), None);

		ring.reset_replay();
		assert_eq!(ring.replay_offset(), ring.read_offset());
		assert_eq!(ring.next_line().as_deref(), Some("three"));
	}

	#[test]
	fn read_truncates_to_record_boundary() {
		let mut ring = RingBuffer::new(32).unwrap();
		ring.write(b"hello").unwrap();
		ring.write(b"world!").unwrap();

		let mut small = [0u8; 3];
		assert_eq!(
			ring.read(&mut small),
			Err(RingError::BufferTooSmallForLine { needed: 6, available: 3 })
		);

		let mut buf = [0u8; 10];
		let n = ring.read(&mut buf).unwrap();
		assert_eq!(&buf[..n], b"hello\n");

		let n = ring.read(&mut buf).unwrap();
		assert_eq!(&buf[..n], b"world!\n");
		assert_eq!(ring.read(&mut buf), Ok(0));
	}

	#[test]
	fn multibyte_records_survive_wrap() {
		let mut ring = RingBuffer::new(20).unwrap();
		for word in ["héllo", "wörld", "ñandú", "日本"] {
			ring.write(word.as_bytes()).unwrap();
		}
		let text = ring.to_string_lossy();
		assert!(!text.contains('\u{FFFD}'));
		assert!(text.ends_with("日本\n"));
	}

	fn record() -> impl Strategy<Value = Vec<u8>> {
		prop::collection::vec(any::<u8>().prop_filter("no terminator", |b| *b != TERMINATOR), 1..=32)
	}

	proptest! {
		#[test]
		fn unread_region_is_concatenation_of_retained_writes(
			cap in 64usize..256,
			writes in prop::collection::vec(record(), 1..64),
		) {
			let mut ring = RingBuffer::new(cap).unwrap();
			let mut model: VecDeque<Vec<u8>> = VecDeque::new();
			let mut used = 0usize;

			for w in writes {
				ring.write(&w).unwrap();
				while used + w.len() + 1 > cap {
					let old = model.pop_front().unwrap();
					used -= old.len() + 1;
				}
				used += w.len() + 1;
				model.push_back(w);
			}

			let mut expected = Vec::new();
			for w in &model {
				expected.extend_from_slice(w);
				expected.push(TERMINATOR);
			}
			prop_assert_eq!(ring.bytes(), expected);
		}

		#[test]
		fn oversized_writes_never_mutate(
			cap in 4usize..128,
			prefix in prop::collection::vec(record(), 0..8),
			extra in 1usize..64,
		) {
			let mut ring = RingBuffer::new(cap).unwrap();
			for w in prefix {
				if w.len() <= ring.max_write() {
					ring.write(&w).unwrap();
				}
			}
			let before = (ring.bytes(), ring.read_offset(), ring.write_offset(), ring.replay_offset());

			let big = vec![b'x'; ring.max_write() + extra];
			let is_too_big = matches!(ring.write(&big), Err(RingError::WriteTooBig { .. }));
			prop_assert!(is_too_big);
			prop_assert_eq!(before, (ring.bytes(), ring.read_offset(), ring.write_offset(), ring.replay_offset()));
		}
	}
}
