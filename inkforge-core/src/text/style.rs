use std::collections::BTreeMap;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use crate::error::InputError;

/// Ids of the bundled style presets.
pub const PRESET_IDS: [&str; 5] = [
	"neat_cursive",
	"casual_print",
	"rushed_notes",
	"doctors_scrawl",
	"elegant_formal",
];

/// Base seed of the preset vectors; preset `i` uses `PRESET_SEED + i`.
const PRESET_SEED: u64 = 0x1a4f_0c9e;

/// Resolves a style id to its latent vector z.
pub trait StyleVectorProvider {
	/// Returns a copy of the style vector for `id`.
	///
	/// # Errors
	/// `InputError::UnknownStyle` if the id is not registered.
	fn style_vector(&self, id: &str) -> Result<Vec<f32>, InputError>;

	/// Dimension shared by every vector this provider returns.
	fn style_dim(&self) -> usize;
}

/// In-memory style table.
///
/// # Invariants
/// - Every stored vector has exactly `dim` components
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StyleBank {
	dim: usize,
	styles: BTreeMap<String, Vec<f32>>,
}

impl StyleBank {
	/// Creates an empty bank for vectors of size `dim`.
	pub fn new(dim: usize) -> Self {
		Self { dim, styles: BTreeMap::new() }
	}

	/// Creates a bank holding the bundled presets.
	///
	/// Preset vectors are drawn from a standard normal with a fixed seed,
	/// so every process sees the same vectors.
	pub fn presets(dim: usize) -> Self {
		let mut bank = Self::new(dim);
		for (i, id) in PRESET_IDS.iter().enumerate() {
			let mut rng = StdRng::seed_from_u64(PRESET_SEED + i as u64);
			let vector = (0..dim).map(|_| StandardNormal.sample(&mut rng)).collect();
			bank.styles.insert((*id).to_owned(), vector);
		}
		bank
	}

	/// Registers (or replaces) a style vector.
	///
	/// # Errors
	/// `InputError::StyleDimension` if `vector` does not have `dim` components.
	pub fn insert(&mut self, id: &str, vector: Vec<f32>) -> Result<(), InputError> {
		if vector.len() != self.dim {
			return Err(InputError::StyleDimension { expected: self.dim, actual: vector.len() });
		}
		self.styles.insert(id.to_owned(), vector);
		Ok(())
	}

	/// Registered ids, sorted.
	pub fn ids(&self) -> impl Iterator<Item = &str> {
		self.styles.keys().map(String::as_str)
	}
}

impl StyleVectorProvider for StyleBank {
	fn style_vector(&self, id: &str) -> Result<Vec<f32>, InputError> {
		self.styles
			.get(id)
			.cloned()
			.ok_or_else(|| InputError::UnknownStyle { id: id.to_owned() })
	}

	fn style_dim(&self) -> usize {
		self.dim
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn presets_are_reproducible() {
		let a = StyleBank::presets(128);
		let b = StyleBank::presets(128);
		for id in PRESET_IDS {
			let z = a.style_vector(id).unwrap();
			assert_eq!(z.len(), 128);
			assert_eq!(z, b.style_vector(id).unwrap());
		}
		assert_ne!(
			a.style_vector("neat_cursive").unwrap(),
			a.style_vector("casual_print").unwrap()
		);
	}

	#[test]
	fn unknown_style_is_an_input_error() {
		let bank = StyleBank::presets(8);
		assert_eq!(
			bank.style_vector("gothic"),
			Err(InputError::UnknownStyle { id: "gothic".to_owned() })
		);
	}

	#[test]
	fn insert_checks_dimension() {
		let mut bank = StyleBank::new(4);
		assert_eq!(
			bank.insert("mine", vec![0.0; 3]),
			Err(InputError::StyleDimension { expected: 4, actual: 3 })
		);
		bank.insert("mine", vec![1.0; 4]).unwrap();
		assert_eq!(bank.ids().collect::<Vec<_>>(), vec!["mine"]);
	}
}
