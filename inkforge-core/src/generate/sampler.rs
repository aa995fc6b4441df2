use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::{debug, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::weighted::WeightedIndex;
use rand_distr::{Distribution, StandardNormal};
use serde::Serialize;

use crate::error::{GenerationError, InputError};
use crate::model::checkpoint::ModelHandle;
use crate::model::mixture::{Component, MixtureParameters, argmax, softmax};
use crate::model::network::PEN_STATES;
use crate::model::state::HiddenState;
use crate::model::stroke::{CharacterCursor, CompletionStatus, PenState, STROKE_DIM, StrokeTuple, ZERO_INPUT};

use super::humanize::{Humanizer, SamplingAdjustment, TransformDescriptor};

/// Lifecycle of a generation session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
	Running,
	/// The end flag was sampled.
	Natural,
	/// `max_len` tuples were sampled without an end flag.
	Truncated,
}

/// Per-session sampling knobs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplingOptions {
	/// τ >= 0. `0` selects the dominant component's mean and the top pen state.
	pub temperature: f32,

	/// Maximum number of tuples, >= 1.
	pub max_len: usize,

	/// Steps on one character before the cursor moves on without a pen-up.
	pub steps_per_char: usize,

	/// Seed of the session's random stream.
	pub seed: u64,
}

impl SamplingOptions {
	pub(crate) fn validate(&self) -> Result<(), InputError> {
		if !self.temperature.is_finite() || self.temperature < 0.0 {
			return Err(InputError::InvalidTemperature { value: self.temperature });
		}
		if self.max_len == 0 {
			return Err(InputError::InvalidMaxLength { value: self.max_len });
		}
		Ok(())
	}
}

/// Cooperative cancellation: an external flag and an optional deadline.
///
/// Checked once before every step, never in the middle of one.
#[derive(Clone, Debug, Default)]
pub struct Cancellation {
	flag: Arc<AtomicBool>,
	deadline: Option<Instant>,
}

impl Cancellation {
	pub fn new() -> Self {
		Self::default()
	}

	/// Gives up `timeout` from now.
	pub fn with_timeout(timeout: Duration) -> Self {
		Self { flag: Arc::default(), deadline: Some(Instant::now() + timeout) }
	}

	/// Requests cancellation; every clone observes it.
	pub fn cancel(&self) {
		self.flag.store(true, Ordering::Relaxed);
	}

	pub fn is_cancelled(&self) -> bool {
		self.flag.load(Ordering::Relaxed)
	}

	fn check(&self, step: usize) -> Result<(), GenerationError> {
		if self.is_cancelled() {
			return Err(GenerationError::Cancelled { step });
		}
		if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
			return Err(GenerationError::TimedOut { step });
		}
		Ok(())
	}
}

/// Output of a finished session.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct Generation {
	pub strokes: Vec<StrokeTuple>,
	pub status: CompletionStatus,

	/// Post-accumulation geometry and renderer hints.
	pub transform: TransformDescriptor,

	/// Non-finite model outputs replaced during the session.
	pub repaired: usize,
}

/// One autoregressive generation run.
///
/// Owns everything that changes while sampling: the random stream, the
/// hidden state, the previous stroke and the character cursor. The model is
/// shared read-only.
///
/// The model samples and is fed back normalized deltas; the tuples handed
/// out are mapped back to raw units with the model's `DeltaStats`.
///
/// # Invariants
/// - `strokes.len() <= max_len`
/// - only the last stroke may carry the end flag, and only when `state == Natural`
/// - `z` is `style + adjustment.z_offset` for the character under the cursor
pub struct Session {
	model: ModelHandle,
	humanizer: Humanizer,
	options: SamplingOptions,
	tokens: Vec<u32>,
	style: Vec<f32>,
	z: Vec<f32>,
	adjustment: SamplingAdjustment,
	rng: StdRng,
	hidden: Option<HiddenState>,
	prior: [f32; STROKE_DIM],
	cursor: CharacterCursor,
	strokes: Vec<StrokeTuple>,
	state: SessionState,
	repaired: usize,
}

impl Session {
	/// Validates every input and prepares a running session.
	///
	/// # Errors
	/// `InputError` on an empty token list, an out-of-vocabulary token, a
	/// style vector of the wrong size or invalid options. Nothing is run.
	pub fn new(
		model: ModelHandle,
		tokens: Vec<u32>,
		style: Vec<f32>,
		humanizer: Humanizer,
		options: SamplingOptions,
	) -> Result<Self, InputError> {
		options.validate()?;
		let config = model.config();
		if tokens.is_empty() {
			return Err(InputError::EmptyText);
		}
		if let Some(&index) = tokens.iter().find(|&&t| t as usize >= config.vocab_size) {
			return Err(InputError::TokenOutOfVocabulary { index, vocab_size: config.vocab_size });
		}
		if style.len() != config.style_dim {
			return Err(InputError::StyleDimension { expected: config.style_dim, actual: style.len() });
		}

		let adjustment = humanizer.adjust(0, tokens[0], tokens.get(1).copied(), style.len());
		let z = offset(&style, &adjustment.z_offset);
		let cursor = CharacterCursor::new(tokens.len(), options.steps_per_char);
		debug!("session started: {} characters, seed {}, τ {}", tokens.len(), options.seed, options.temperature);

		Ok(Self {
			rng: StdRng::seed_from_u64(options.seed),
			model,
			humanizer,
			options,
			tokens,
			style,
			z,
			adjustment,
			hidden: None,
			prior: ZERO_INPUT,
			cursor,
			strokes: Vec::new(),
			state: SessionState::Running,
			repaired: 0,
		})
	}

	pub fn state(&self) -> SessionState {
		self.state
	}

	pub fn is_running(&self) -> bool {
		self.state == SessionState::Running
	}

	/// Tuples sampled so far.
	pub fn strokes(&self) -> &[StrokeTuple] {
		&self.strokes
	}

	/// Index of the character currently being written.
	pub fn cursor(&self) -> usize {
		self.cursor.position()
	}

	/// Style input of the current character (z plus its perturbation).
	pub fn style_input(&self) -> &[f32] {
		&self.z
	}

	/// Samples one tuple.
	///
	/// Returns `Ok(None)` once the session has terminated.
	pub fn step(&mut self) -> Result<Option<StrokeTuple>, GenerationError> {
		if !self.is_running() {
			return Ok(None);
		}

		let token = self.tokens[self.cursor.position()];
		let out = self.model.step(token, &self.prior, &self.z, self.hidden.as_ref())?;
		if out.repaired > 0 {
			warn!("step {}: replaced {} non-finite model outputs", self.strokes.len(), out.repaired);
			self.repaired += out.repaired;
		}

		let normalized = self.sample(&out.mixture, &out.pen_logits);
		let stroke = self.model.delta_stats().denormalize(normalized);
		self.hidden = Some(out.state);
		self.strokes.push(stroke);

		if stroke.is_end() {
			self.state = SessionState::Natural;
		} else if self.strokes.len() >= self.options.max_len {
			self.state = SessionState::Truncated;
		} else {
			self.prior = normalized.to_array();
			self.advance(stroke.pen);
		}

		if !self.is_running() {
			debug!("session finished: {:?} after {} steps", self.state, self.strokes.len());
		}
		Ok(Some(stroke))
	}

	/// Steps until termination, checking `cancel` before every step.
	pub fn run(mut self, cancel: &Cancellation) -> Result<Generation, GenerationError> {
		while self.is_running() {
			cancel.check(self.strokes.len())?;
			self.step()?;
		}
		self.finish()
	}

	/// Consumes a terminated session.
	///
	/// A session still running is reported as truncated at its current length.
	pub fn finish(self) -> Result<Generation, GenerationError> {
		let status = match self.state {
			SessionState::Natural => CompletionStatus::Natural,
			SessionState::Running | SessionState::Truncated => CompletionStatus::Truncated,
		};
		Ok(Generation {
			strokes: self.strokes,
			status,
			transform: self.humanizer.descriptor(),
			repaired: self.repaired,
		})
	}

	/// Temperature, component choice, Gaussian draw and pen draw.
	fn sample(&mut self, mixture: &MixtureParameters, pen_logits: &[f32; PEN_STATES]) -> StrokeTuple {
		let mut scores = *pen_logits;
		for (score, bias) in scores.iter_mut().zip(self.adjustment.pen_bias) {
			*score += bias;
		}

		let tau = self.options.temperature;
		if tau == 0.0 {
			let component = mixture.components()[mixture.dominant()];
			let pen = PenState::from_index(argmax(&scores)).unwrap_or(PenState::Down);
			return StrokeTuple::new(component.mu_x, component.mu_y, pen);
		}

		let tempered = mixture.tempered(tau, self.adjustment.sigma_scale);
		let weights: Vec<f32> = tempered.components().iter().map(|c| c.weight).collect();
		let component = tempered.components()[draw_index(&mut self.rng, &weights)];
		let (dx, dy) = draw_bivariate(&mut self.rng, &component);

		let pen_probs = softmax(&scores, tau);
		let pen = PenState::from_index(draw_index(&mut self.rng, &pen_probs)).unwrap_or(PenState::Down);
		StrokeTuple::new(dx, dy, pen)
	}

	/// Moves to the next character when the cursor says so and refreshes
	/// the adjustment for it.
	fn advance(&mut self, pen: PenState) {
		if !self.cursor.advance(pen) {
			return;
		}
		let position = self.cursor.position();
		let next = self.tokens.get(position + 1).copied();
		self.adjustment = self.humanizer.adjust(position, self.tokens[position], next, self.style.len());
		self.z = offset(&self.style, &self.adjustment.z_offset);
	}
}

fn offset(style: &[f32], delta: &[f32]) -> Vec<f32> {
	style.iter().zip(delta).map(|(z, d)| z + d).collect()
}

/// Categorical draw; falls back to the arg-max on degenerate weights.
fn draw_index(rng: &mut StdRng, weights: &[f32]) -> usize {
	match WeightedIndex::new(weights) {
		Ok(distribution) => distribution.sample(rng),
		Err(_) => argmax(weights),
	}
}

/// Correlated draw from one bivariate Gaussian.
///
/// `dx = μx + σx·n1`, `dy = μy + σy·(ρ·n1 + √(1−ρ²)·n2)`
fn draw_bivariate(rng: &mut StdRng, c: &Component) -> (f32, f32) {
	let n1: f32 = StandardNormal.sample(rng);
	let n2: f32 = StandardNormal.sample(rng);
	let dx = c.mu_x + c.sigma_x * n1;
	let dy = c.mu_y + c.sigma_y * (c.rho * n1 + (1.0 - c.rho * c.rho).sqrt() * n2);
	(dx, dy)
}
