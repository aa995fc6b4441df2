use candle_core::{D, DType, Device, Module, Tensor};
use candle_nn::rnn::{LSTM, LSTMConfig, RNN, lstm};
use candle_nn::{Embedding, Linear, VarBuilder, VarMap, embedding, linear};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};

use crate::config::ModelConfig;
use crate::error::{GenerationError, InputError, ModelStateError};

use super::mixture::{MixtureParameters, PARAMS_PER_COMPONENT};
use super::state::HiddenState;
use super::stroke::{DeltaStats, STROKE_DIM};

/// Number of pen logits (down, up, end).
pub const PEN_STATES: usize = 3;

/// Result of one recurrent step.
#[derive(Clone, Debug)]
pub struct StepOutput {
	/// Decoded mixture for this step (temperature not applied).
	pub mixture: MixtureParameters,

	/// Raw pen scores in `PenState` order.
	pub pen_logits: [f32; PEN_STATES],

	/// Number of non-finite head outputs replaced while decoding.
	pub repaired: usize,

	/// State to pass to the next step.
	pub state: HiddenState,
}

/// LSTM + mixture density network.
///
/// ```text
/// char ─ embedding ┐
/// z ───────────────┼─ concat ─ projection ─ LSTM × L ─┬─ mdn_head  (M × 6)
/// prev stroke ─────┘                                  └─ pen_head  (3)
/// ```
///
/// Deterministic for fixed weights, inputs and state: dropout is only
/// applied by `forward_t` with `train = true`, and every other source of
/// randomness lives in the sampler.
///
/// Weights live in a `VarMap` so the trainer can optimise them and the
/// checkpoint codec can read and overwrite them by name.
pub struct StrokeModel {
	config: ModelConfig,
	device: Device,
	varmap: VarMap,
	char_embedding: Embedding,
	input_projection: Linear,
	layers: Vec<LSTM>,
	mdn_head: Linear,
	pen_head: Linear,
	delta_stats: DeltaStats,
}

impl StrokeModel {
	/// Builds a model with weights drawn from `seed`.
	///
	/// Two models built from the same config and seed are identical.
	///
	/// # Errors
	/// Rejects a config that fails `ModelConfig::validate`.
	pub fn new(config: &ModelConfig, device: &Device, seed: u64) -> candle_core::Result<Self> {
		config.validate().map_err(|e| candle_core::Error::Msg(e.to_string()))?;
		let model = Self::build(config, device)?;
		model.reseed(seed)?;
		Ok(model)
	}

	/// Registers every layer in a fresh `VarMap`.
	fn build(config: &ModelConfig, device: &Device) -> candle_core::Result<Self> {
		let varmap = VarMap::new();
		let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);

		let char_embedding = embedding(config.vocab_size, config.char_embed_dim, vb.pp("char_embedding"))?;
		let input_projection = linear(config.input_dim(), config.hidden_dim, vb.pp("input_projection"))?;

		let mut layers = Vec::with_capacity(config.num_layers);
		for layer_idx in 0..config.num_layers {
			let layer_config = LSTMConfig { layer_idx, ..Default::default() };
			layers.push(lstm(config.hidden_dim, config.hidden_dim, layer_config, vb.pp("lstm"))?);
		}

		let mdn_head = linear(
			config.hidden_dim,
			config.num_mixtures * PARAMS_PER_COMPONENT,
			vb.pp("mdn_head"),
		)?;
		let pen_head = linear(config.hidden_dim, PEN_STATES, vb.pp("pen_head"))?;

		Ok(Self {
			config: config.clone(),
			device: device.clone(),
			varmap,
			char_embedding,
			input_projection,
			layers,
			mdn_head,
			pen_head,
			delta_stats: DeltaStats::default(),
		})
	}

	/// Overwrites every weight with seeded values.
	///
	/// Matrices get `N(0, 1/fan_in)`, biases start at zero. Variables are
	/// visited in name order so the draw sequence does not depend on hashing.
	fn reseed(&self, seed: u64) -> candle_core::Result<()> {
		let data = self
			.varmap
			.data()
			.lock()
			.map_err(|_| candle_core::Error::Msg("weight map lock poisoned".to_owned()))?;

		let mut names: Vec<&String> = data.keys().collect();
		names.sort();

		let mut rng = StdRng::seed_from_u64(seed);
		for name in names {
			let var = &data[name];
			let dims = var.dims().to_vec();
			let std = match dims.as_slice() {
				[_, fan_in] if !name.ends_with("bias") => 1.0 / (*fan_in as f32).sqrt(),
				_ => 0.0,
			};
			let values: Vec<f32> = (0..var.elem_count())
				.map(|_| {
					let n: f32 = StandardNormal.sample(&mut rng);
					n * std
				})
				.collect();
			var.set(&Tensor::from_vec(values, dims, &self.device)?)?;
		}
		Ok(())
	}

	pub fn config(&self) -> &ModelConfig {
		&self.config
	}

	/// Statistics the training deltas were normalized with.
	pub fn delta_stats(&self) -> &DeltaStats {
		&self.delta_stats
	}

	/// Attaches the statistics of the data this model is trained on.
	pub fn with_delta_stats(mut self, stats: DeltaStats) -> Self {
		self.delta_stats = stats;
		self
	}

	pub fn device(&self) -> &Device {
		&self.device
	}

	pub(crate) fn varmap(&self) -> &VarMap {
		&self.varmap
	}

	/// Total number of scalar weights.
	pub fn parameter_count(&self) -> usize {
		self.varmap.all_vars().iter().map(|v| v.elem_count()).sum()
	}

	/// Runs one timestep for a single session.
	///
	/// `state = None` starts from zero memory.
	///
	/// # Errors
	/// - `InputError::TokenOutOfVocabulary` if `token >= vocab_size`
	/// - `InputError::StyleDimension` if `z` does not have `style_dim` components
	/// - `ModelStateError::ShapeMismatch` if `state` comes from a model of another depth
	pub fn step(
		&self,
		token: u32,
		prior: &[f32; STROKE_DIM],
		z: &[f32],
		state: Option<&HiddenState>,
	) -> Result<StepOutput, GenerationError> {
		if token as usize >= self.config.vocab_size {
			return Err(InputError::TokenOutOfVocabulary { index: token, vocab_size: self.config.vocab_size }.into());
		}
		if z.len() != self.config.style_dim {
			return Err(InputError::StyleDimension { expected: self.config.style_dim, actual: z.len() }.into());
		}
		if let Some(state) = state {
			if state.depth() != self.layers.len() {
				return Err(ModelStateError::ShapeMismatch {
					name: "hidden_state".to_owned(),
					expected: vec![self.layers.len()],
					found: vec![state.depth()],
				}
				.into());
			}
		}

		let token = Tensor::new(&[token], &self.device)?;
		let embedded = self.char_embedding.forward(&token)?;
		let z = Tensor::from_slice(z, (1, self.config.style_dim), &self.device)?;
		let prior = Tensor::from_slice(prior, (1, STROKE_DIM), &self.device)?;
		let mut x = self.input_projection.forward(&Tensor::cat(&[&embedded, &z, &prior], 1)?)?;

		let mut next = Vec::with_capacity(self.layers.len());
		for (i, layer) in self.layers.iter().enumerate() {
			let previous = match state {
				Some(state) => state.layers()[i].clone(),
				None => layer.zero_state(1)?,
			};
			let updated = layer.step(&x, &previous)?;
			x = updated.h().clone();
			next.push(updated);
		}

		let raw = self.mdn_head.forward(&x)?.squeeze(0)?.to_vec1::<f32>()?;
		let scores = self.pen_head.forward(&x)?.squeeze(0)?.to_vec1::<f32>()?;

		let (mixture, mut repaired) = MixtureParameters::from_raw(&raw, self.config.num_mixtures);
		let mut pen_logits = [0.0; PEN_STATES];
		for (logit, score) in pen_logits.iter_mut().zip(scores) {
			if score.is_finite() {
				*logit = score;
			} else {
				repaired += 1;
			}
		}

		Ok(StepOutput { mixture, pen_logits, repaired, state: HiddenState::new(next) })
	}

	/// Teacher-forced pass over whole sequences.
	///
	/// - `chars`: `[batch, seq]` u32 token ids
	/// - `strokes`: `[batch, seq, 5]` previous-step stroke inputs
	/// - `style`: `[batch, style_dim]`
	///
	/// Returns raw `[batch, seq, M × 6]` mixture values and `[batch, seq, 3]` pen logits.
	pub fn forward_t(
		&self,
		chars: &Tensor,
		strokes: &Tensor,
		style: &Tensor,
		train: bool,
	) -> candle_core::Result<(Tensor, Tensor)> {
		let (batch, seq) = chars.dims2()?;
		let embedded = self.char_embedding.forward(chars)?;
		let style = style
			.unsqueeze(1)?
			.broadcast_as((batch, seq, self.config.style_dim))?
			.contiguous()?;
		let input = Tensor::cat(&[&embedded, &style, strokes], D::Minus1)?;
		let mut x = self.input_projection.forward(&input)?;

		let last = self.layers.len() - 1;
		for (i, layer) in self.layers.iter().enumerate() {
			let states = layer.seq(&x)?;
			x = layer.states_to_tensor(&states)?;
			if train && i < last && self.config.dropout > 0.0 {
				x = candle_nn::ops::dropout(&x, self.config.dropout)?;
			}
		}

		Ok((self.mdn_head.forward(&x)?, self.pen_head.forward(&x)?))
	}

	/// Every weight as `(name, shape, values)`, sorted by name.
	pub(crate) fn export_tensors(&self) -> candle_core::Result<Vec<(String, Vec<usize>, Vec<f32>)>> {
		let data = self
			.varmap
			.data()
			.lock()
			.map_err(|_| candle_core::Error::Msg("weight map lock poisoned".to_owned()))?;

		let mut tensors = Vec::with_capacity(data.len());
		for (name, var) in data.iter() {
			let values = var.as_tensor().flatten_all()?.to_vec1::<f32>()?;
			tensors.push((name.clone(), var.dims().to_vec(), values));
		}
		tensors.sort_by(|a, b| a.0.cmp(&b.0));
		Ok(tensors)
	}

	/// Names and shapes of every weight.
	pub(crate) fn tensor_shapes(&self) -> Vec<(String, Vec<usize>)> {
		match self.varmap.data().lock() {
			Ok(data) => data.iter().map(|(name, var)| (name.clone(), var.dims().to_vec())).collect(),
			Err(_) => Vec::new(),
		}
	}

	/// Replaces the weight `name` with `values`.
	///
	/// # Errors
	/// - `ModelStateError::UnexpectedTensor` if the model has no such weight
	/// - `ModelStateError::ShapeMismatch` if `shape` differs from the weight's shape
	pub(crate) fn load_tensor(&self, name: &str, shape: &[usize], values: Vec<f32>) -> Result<(), ModelStateError> {
		let data = self
			.varmap
			.data()
			.lock()
			.map_err(|_| ModelStateError::Corrupt { reason: "weight map lock poisoned".to_owned() })?;
		let var = data
			.get(name)
			.ok_or_else(|| ModelStateError::UnexpectedTensor { name: name.to_owned() })?;

		let expected = var.dims().to_vec();
		if expected != shape || values.len() != var.elem_count() {
			return Err(ModelStateError::ShapeMismatch {
				name: name.to_owned(),
				expected,
				found: shape.to_vec(),
			});
		}

		let tensor = Tensor::from_vec(values, shape, &self.device)
			.map_err(|e| ModelStateError::Corrupt { reason: e.to_string() })?;
		var.set(&tensor).map_err(|e| ModelStateError::Corrupt { reason: e.to_string() })
	}
}
