//! TOML configuration for the model, the sampler and the training loop.
//!
//! Every field has a default so a partial file (or an empty one) is valid.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::io;

/// Architecture of the stroke model.
///
/// Stored inside every checkpoint: a checkpoint is only loadable into a
/// model built from the same `ModelConfig`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
	/// Number of distinct character tokens (V).
	pub vocab_size: usize,

	/// Character embedding width.
	pub char_embed_dim: usize,

	/// Style latent width (z).
	pub style_dim: usize,

	/// Width of the input projection and of every recurrent layer.
	pub hidden_dim: usize,

	/// Number of stacked LSTM layers.
	pub num_layers: usize,

	/// Inter-layer dropout, applied while training only.
	pub dropout: f32,

	/// Number of bivariate Gaussian components (M).
	pub num_mixtures: usize,
}

impl Default for ModelConfig {
	fn default() -> Self {
		Self {
			vocab_size: 95,
			char_embed_dim: 256,
			style_dim: 128,
			hidden_dim: 512,
			num_layers: 3,
			dropout: 0.2,
			num_mixtures: 20,
		}
	}
}

impl ModelConfig {
	/// Width of the concatenated step input: embedding + z + previous stroke.
	pub fn input_dim(&self) -> usize {
		self.char_embed_dim + self.style_dim + crate::model::stroke::STROKE_DIM
	}

	/// Checks that every dimension is usable.
	///
	/// # Errors
	/// Returns the first offending field.
	pub fn validate(&self) -> Result<(), ConfigError> {
		let dims = [
			("vocab_size", self.vocab_size),
			("char_embed_dim", self.char_embed_dim),
			("style_dim", self.style_dim),
			("hidden_dim", self.hidden_dim),
			("num_layers", self.num_layers),
			("num_mixtures", self.num_mixtures),
		];
		for (field, value) in dims {
			if value == 0 {
				return Err(ConfigError::Invalid { field, reason: "must be > 0".to_owned() });
			}
		}
		if !(0.0..1.0).contains(&self.dropout) {
			return Err(ConfigError::Invalid {
				field: "dropout",
				reason: format!("{} is outside [0, 1)", self.dropout),
			});
		}
		Ok(())
	}
}

/// Sampler defaults used when a request does not override them.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
	/// Default sampling temperature τ.
	pub temperature: f32,

	/// Hard cap on the number of sampled stroke tuples.
	pub max_seq_len: usize,

	/// Steps spent on one character before the cursor moves on without a pen-up.
	pub steps_per_char: usize,

	/// Maximum accepted text length, in characters.
	pub max_text_len: usize,
}

impl Default for GenerationConfig {
	fn default() -> Self {
		Self {
			temperature: 0.4,
			max_seq_len: 700,
			steps_per_char: 30,
			max_text_len: 2000,
		}
	}
}

/// Training loop settings.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct TrainingConfig {
	pub learning_rate: f64,
	pub batch_size: usize,
	pub epochs: usize,

	/// Global gradient norm cap. `0.0` disables clipping.
	pub grad_clip: f64,

	/// Training sequences are truncated to this many timesteps.
	pub max_seq_len: usize,

	/// Seed for weight initialisation and batch shuffling.
	pub seed: u64,

	pub dataset: PathBuf,
	pub validation: Option<PathBuf>,
	pub checkpoint_dir: PathBuf,
}

impl Default for TrainingConfig {
	fn default() -> Self {
		Self {
			learning_rate: 1e-3,
			batch_size: 32,
			epochs: 10,
			grad_clip: 10.0,
			max_seq_len: 700,
			seed: 0,
			dataset: PathBuf::from("data/train.bin"),
			validation: None,
			checkpoint_dir: PathBuf::from("checkpoints"),
		}
	}
}

/// Whole configuration file.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct InkforgeConfig {
	pub model: ModelConfig,
	pub generation: GenerationConfig,
	pub training: TrainingConfig,
}

impl InkforgeConfig {
	/// Parses a TOML document and validates the model section.
	pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(contents)?;
		config.model.validate()?;
		Ok(config)
	}

	/// Loads and validates a TOML configuration file.
	pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let contents = io::read_file(path).map_err(|source| ConfigError::Io {
			path: path.to_path_buf(),
			source,
		})?;
		Self::from_toml_str(&contents)
	}
}
