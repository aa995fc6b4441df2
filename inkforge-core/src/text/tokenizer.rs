use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::InputError;

/// Maps text to vocabulary indices.
pub trait Tokenizer {
	/// Encodes `text` into one index per character.
	///
	/// # Errors
	/// - `InputError::EmptyText` if `text` is empty
	/// - `InputError::TextTooLong` if `text` exceeds `max_len` characters
	/// - `InputError::UnknownCharacter` on the first character outside the vocabulary
	fn encode(&self, text: &str, max_len: usize) -> Result<Vec<u32>, InputError>;

	/// Number of distinct indices `encode` can produce.
	fn vocab_size(&self) -> usize;
}

/// Character-level vocabulary.
///
/// Each character owns the index of its position in `chars`.
///
/// # Invariants
/// - `chars` contains no duplicates
/// - `index` is the exact inverse of `chars`
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(from = "Vec<char>", into = "Vec<char>")]
pub struct Vocabulary {
	chars: Vec<char>,
	index: HashMap<char, u32>,
}

impl Vocabulary {
	/// Builds a vocabulary from an ordered character list.
	///
	/// Duplicates keep their first position.
	pub fn new<I: IntoIterator<Item = char>>(chars: I) -> Self {
		let mut vocabulary = Self { chars: Vec::new(), index: HashMap::new() };
		for c in chars {
			if !vocabulary.index.contains_key(&c) {
				vocabulary.index.insert(c, vocabulary.chars.len() as u32);
				vocabulary.chars.push(c);
			}
		}
		vocabulary
	}

	/// Index of `c`, if known.
	pub fn get(&self, c: char) -> Option<u32> {
		self.index.get(&c).copied()
	}

	/// Characters in index order.
	pub fn chars(&self) -> &[char] {
		&self.chars
	}
}

impl Default for Vocabulary {
	/// Printable ASCII, space (index 0) through `~`.
	fn default() -> Self {
		Self::new((0x20u8..=0x7e).map(char::from))
	}
}

impl From<Vec<char>> for Vocabulary {
	fn from(chars: Vec<char>) -> Self {
		Self::new(chars)
	}
}

impl From<Vocabulary> for Vec<char> {
	fn from(vocabulary: Vocabulary) -> Self {
		vocabulary.chars
	}
}

impl Tokenizer for Vocabulary {
	fn encode(&self, text: &str, max_len: usize) -> Result<Vec<u32>, InputError> {
		if text.is_empty() {
			return Err(InputError::EmptyText);
		}
		let len = text.chars().count();
		if len > max_len {
			return Err(InputError::TextTooLong { len, max: max_len });
		}

		text.chars()
			.enumerate()
			.map(|(position, ch)| self.get(ch).ok_or(InputError::UnknownCharacter { ch, position }))
			.collect()
	}

	fn vocab_size(&self) -> usize {
		self.chars.len()
	}
}
