use std::collections::HashSet;

use super::tokenizer::{Tokenizer, Vocabulary};

/// Character pairs that may be joined without lifting the pen.
///
/// Pairs are ordered: `(a, b)` allows a stroke to flow from `a` into `b`.
#[derive(Clone, Debug, Default)]
pub struct LigatureTable {
	pairs: HashSet<(u32, u32)>,
}

impl LigatureTable {
	/// Empty table: nothing connects.
	pub fn new() -> Self {
		Self::default()
	}

	/// Cursive default: every lowercase letter connects to every lowercase letter.
	pub fn cursive(vocabulary: &Vocabulary) -> Self {
		let letters: Vec<u32> = ('a'..='z').filter_map(|c| vocabulary.get(c)).collect();
		let mut table = Self::new();
		for &a in &letters {
			for &b in &letters {
				table.pairs.insert((a, b));
			}
		}
		table
	}

	/// Marks `a → b` as connectable.
	pub fn connect(&mut self, a: u32, b: u32) {
		self.pairs.insert((a, b));
	}

	/// Whether a stroke may flow from `a` into `b`.
	pub fn connects(&self, a: u32, b: u32) -> bool {
		self.pairs.contains(&(a, b))
	}

	/// Number of connectable pairs.
	pub fn len(&self) -> usize {
		self.pairs.len()
	}

	pub fn is_empty(&self) -> bool {
		self.pairs.is_empty()
	}

	/// Builds a table from character pairs, skipping characters `tokenizer` cannot encode.
	pub fn from_pairs<T: Tokenizer>(tokenizer: &T, pairs: &[(char, char)]) -> Self {
		let mut table = Self::new();
		for &(a, b) in pairs {
			let a = tokenizer.encode(&a.to_string(), 1).ok().and_then(|t| t.first().copied());
			let b = tokenizer.encode(&b.to_string(), 1).ok().and_then(|t| t.first().copied());
			if let (Some(a), Some(b)) = (a, b) {
				table.connect(a, b);
			}
		}
		table
	}
}
