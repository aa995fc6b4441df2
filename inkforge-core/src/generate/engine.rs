use std::sync::{Arc, mpsc};
use std::thread;

use log::debug;

use crate::config::GenerationConfig;
use crate::error::{GenerationError, ModelStateError};
use crate::model::checkpoint::{ModelHandle, ModelSlot};
use crate::text::ligature::LigatureTable;
use crate::text::style::StyleVectorProvider;
use crate::text::tokenizer::Tokenizer;

use super::humanize::{HumanizationParams, Humanizer};
use super::sampler::{Cancellation, Generation, SamplingOptions, Session};

/// Everything a caller controls about one generation.
///
/// `temperature` and `max_len` fall back to the engine's `GenerationConfig`
/// when left to `None`.
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationRequest {
	pub text: String,
	pub style_id: String,
	pub params: HumanizationParams,
	pub temperature: Option<f32>,
	pub seed: u64,
	pub max_len: Option<usize>,
}

impl GenerationRequest {
	/// Request with default humanization, seed 0 and configured sampling limits.
	pub fn new(text: &str, style_id: &str) -> Self {
		Self {
			text: text.to_owned(),
			style_id: style_id.to_owned(),
			params: HumanizationParams::default(),
			temperature: None,
			seed: 0,
			max_len: None,
		}
	}

	pub fn with_params(mut self, params: HumanizationParams) -> Self {
		self.params = params;
		self
	}

	pub fn with_temperature(mut self, temperature: f32) -> Self {
		self.temperature = Some(temperature);
		self
	}

	pub fn with_seed(mut self, seed: u64) -> Self {
		self.seed = seed;
		self
	}

	pub fn with_max_len(mut self, max_len: usize) -> Self {
		self.max_len = Some(max_len);
		self
	}
}

/// Entry point of stroke generation.
///
/// # Responsibilities
/// - Validate a request completely before touching the model
/// - Resolve text and style through the injected collaborators
/// - Check that the published model matches those collaborators
/// - Run sessions, alone or concurrently, on the shared read-only model
///
/// # Notes
/// The engine holds the `ModelSlot`, not the model: it can be built before
/// the checkpoint is loaded and reports `NotLoaded` until then.
pub struct Engine<T, S> {
	slot: Arc<ModelSlot>,
	tokenizer: T,
	styles: S,
	ligatures: Arc<LigatureTable>,
	config: GenerationConfig,
}

impl<T: Tokenizer, S: StyleVectorProvider> Engine<T, S> {
	pub fn new(
		slot: Arc<ModelSlot>,
		tokenizer: T,
		styles: S,
		ligatures: Arc<LigatureTable>,
		config: GenerationConfig,
	) -> Self {
		Self { slot, tokenizer, styles, ligatures, config }
	}

	pub fn config(&self) -> &GenerationConfig {
		&self.config
	}

	pub fn tokenizer(&self) -> &T {
		&self.tokenizer
	}

	pub fn styles(&self) -> &S {
		&self.styles
	}

	/// Builds a session that the caller drives step by step.
	///
	/// # Errors
	/// Checked in this order, nothing is run on failure:
	/// - `InputError` for the humanization controls, temperature, length, text or style id
	/// - `ModelStateError::NotLoaded` if no model is published
	/// - `ModelStateError::VocabularyMismatch` / `StyleDimensionMismatch` if the
	///   model was trained for other collaborators
	pub fn session(&self, request: &GenerationRequest) -> Result<Session, GenerationError> {
		let humanizer = Humanizer::new(request.params, Arc::clone(&self.ligatures))?;
		let options = SamplingOptions {
			temperature: request.temperature.unwrap_or(self.config.temperature),
			max_len: request.max_len.unwrap_or(self.config.max_seq_len),
			steps_per_char: self.config.steps_per_char,
			seed: request.seed,
		};
		options.validate()?;

		let tokens = self.tokenizer.encode(&request.text, self.config.max_text_len)?;
		let style = self.styles.style_vector(&request.style_id)?;

		let model = self.compatible_model()?;
		Ok(Session::new(model, tokens, style, humanizer, options)?)
	}

	/// Runs a request to completion.
	pub fn generate(&self, request: &GenerationRequest) -> Result<Generation, GenerationError> {
		self.generate_with(request, &Cancellation::new())
	}

	/// Runs a request, giving up when `cancel` fires or its deadline passes.
	pub fn generate_with(&self, request: &GenerationRequest, cancel: &Cancellation) -> Result<Generation, GenerationError> {
		let generation = self.session(request)?.run(cancel)?;
		debug!(
			"generated {} strokes for {:?} ({:?})",
			generation.strokes.len(),
			request.style_id,
			generation.status
		);
		Ok(generation)
	}

	fn compatible_model(&self) -> Result<ModelHandle, ModelStateError> {
		let model = self.slot.get()?;
		let config = model.config();
		if config.vocab_size != self.tokenizer.vocab_size() {
			return Err(ModelStateError::VocabularyMismatch {
				model: config.vocab_size,
				tokenizer: self.tokenizer.vocab_size(),
			});
		}
		if config.style_dim != self.styles.style_dim() {
			return Err(ModelStateError::StyleDimensionMismatch {
				model: config.style_dim,
				provider: self.styles.style_dim(),
			});
		}
		Ok(model)
	}
}

impl<T: Tokenizer + Sync, S: StyleVectorProvider + Sync> Engine<T, S> {
	/// Runs independent requests concurrently.
	///
	/// Requests are spread over one worker per CPU; every session owns its
	/// state and random stream, so each result is the one `generate` would
	/// return. Results come back in request order.
	pub fn generate_many(&self, requests: &[GenerationRequest]) -> Vec<Result<Generation, GenerationError>> {
		if requests.is_empty() {
			return Vec::new();
		}
		let workers = num_cpus::get().clamp(1, requests.len());
		let chunk_size = requests.len().div_ceil(workers);

		let (tx, rx) = mpsc::channel();
		thread::scope(|scope| {
			for (chunk_index, chunk) in requests.chunks(chunk_size).enumerate() {
				let tx = tx.clone();
				scope.spawn(move || {
					for (offset, request) in chunk.iter().enumerate() {
						let index = chunk_index * chunk_size + offset;
						if tx.send((index, self.generate(request))).is_err() {
							return;
						}
					}
				});
			}
		});
		drop(tx);

		let mut results: Vec<(usize, Result<Generation, GenerationError>)> = rx.iter().collect();
		results.sort_by_key(|(index, _)| *index);
		results.into_iter().map(|(_, result)| result).collect()
	}
}
