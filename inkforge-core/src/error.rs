use std::path::PathBuf;

use thiserror::Error;

/// Rejected request input.
///
/// Raised before any model invocation: no session state exists when one of
/// these is returned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputError {
	#[error("text is empty")]
	EmptyText,

	#[error("text has {len} characters, maximum is {max}")]
	TextTooLong { len: usize, max: usize },

	#[error("character {ch:?} at position {position} is not in the vocabulary")]
	UnknownCharacter { ch: char, position: usize },

	#[error("unknown style id `{id}`")]
	UnknownStyle { id: String },

	#[error("{name} = {value} is outside [{min}, {max}]")]
	ParameterOutOfRange {
		name: &'static str,
		value: f32,
		min: f32,
		max: f32,
	},

	#[error("token index {index} is out of vocabulary (size {vocab_size})")]
	TokenOutOfVocabulary { index: u32, vocab_size: usize },

	#[error("style vector has {actual} dimensions, expected {expected}")]
	StyleDimension { expected: usize, actual: usize },

	#[error("temperature must be finite and >= 0, got {value}")]
	InvalidTemperature { value: f32 },

	#[error("maximum sequence length must be >= 1, got {value}")]
	InvalidMaxLength { value: usize },

	#[error("batch contains no samples or no valid timesteps")]
	EmptyBatch,

	#[error("sample {sample}: {reason}")]
	BatchShape { sample: usize, reason: String },
}

/// The model is missing or does not match what the caller expects.
///
/// Fatal for the session: no fallback model is ever substituted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelStateError {
	#[error("no model has been loaded")]
	NotLoaded,

	#[error("a model is already loaded")]
	AlreadyLoaded,

	#[error("checkpoint format version {found} is not supported (expected {expected})")]
	VersionMismatch { expected: u32, found: u32 },

	#[error("tensor `{name}` has shape {found:?}, expected {expected:?}")]
	ShapeMismatch {
		name: String,
		expected: Vec<usize>,
		found: Vec<usize>,
	},

	#[error("checkpoint is missing tensor `{name}`")]
	MissingTensor { name: String },

	#[error("checkpoint contains unknown tensor `{name}`")]
	UnexpectedTensor { name: String },

	#[error("checkpoint is corrupt: {reason}")]
	Corrupt { reason: String },

	#[error("model vocabulary size {model} differs from tokenizer vocabulary size {tokenizer}")]
	VocabularyMismatch { model: usize, tokenizer: usize },

	#[error("model style dimension {model} differs from style provider dimension {provider}")]
	StyleDimensionMismatch { model: usize, provider: usize },
}

/// NaN or infinity reached a place where it cannot be repaired.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NumericInstabilityError {
	#[error("loss is not finite ({value})")]
	NonFiniteLoss { value: f32 },

	#[error("gradient of `{name}` is not finite")]
	NonFiniteGradient { name: String },
}

/// Failure of a generation request.
#[derive(Debug, Error)]
pub enum GenerationError {
	#[error(transparent)]
	Input(#[from] InputError),

	#[error(transparent)]
	ModelState(#[from] ModelStateError),

	#[error("generation cancelled before step {step}")]
	Cancelled { step: usize },

	#[error("generation timed out before step {step}")]
	TimedOut { step: usize },

	#[error("tensor backend: {0}")]
	Tensor(#[from] candle_core::Error),
}

/// Failure of a training operation.
#[derive(Debug, Error)]
pub enum TrainError {
	#[error(transparent)]
	Input(#[from] InputError),

	#[error(transparent)]
	Numeric(#[from] NumericInstabilityError),

	#[error(transparent)]
	ModelState(#[from] ModelStateError),

	#[error("tensor backend: {0}")]
	Tensor(#[from] candle_core::Error),

	#[error("dataset `{path}`: {reason}")]
	Dataset { path: PathBuf, reason: String },

	#[error(transparent)]
	Io(#[from] std::io::Error),
}

/// Failure to load a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("cannot read `{path}`: {source}")]
	Io {
		path: PathBuf,
		source: std::io::Error,
	},

	#[error("invalid configuration: {0}")]
	Parse(#[from] toml::de::Error),

	#[error("{field}: {reason}")]
	Invalid { field: &'static str, reason: String },
}
