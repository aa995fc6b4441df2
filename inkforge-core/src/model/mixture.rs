use serde::{Deserialize, Serialize};

/// Number of raw values per mixture component: π, μx, μy, σx, σy, ρ.
pub const PARAMS_PER_COMPONENT: usize = 6;

/// Lower clamp on log σ; σ never drops below e⁻⁹ ≈ 1.2e-4.
pub const LOG_SIGMA_MIN: f32 = -9.0;

/// Upper clamp on log σ, keeps exp() finite.
pub const LOG_SIGMA_MAX: f32 = 9.0;

/// |ρ| stays strictly below one: ρ = tanh(raw) · RHO_LIMIT.
pub const RHO_LIMIT: f32 = 0.9999;

/// Offsets of each parameter block inside the raw head output.
///
/// The head emits `M` values per block, blocks in this order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Block {
	Logit = 0,
	MuX = 1,
	MuY = 2,
	LogSigmaX = 3,
	LogSigmaY = 4,
	Rho = 5,
}

impl Block {
	/// Start offset of this block for `m` components.
	pub(crate) fn offset(self, m: usize) -> usize {
		self as usize * m
	}
}

/// One bivariate Gaussian of the mixture.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct Component {
	pub weight: f32,
	pub mu_x: f32,
	pub mu_y: f32,
	pub sigma_x: f32,
	pub sigma_y: f32,
	pub rho: f32,
}

/// Constrained mixture parameters of one timestep.
///
/// # Invariants
/// - weights are >= 0 and sum to 1
/// - σx, σy are finite and > 0
/// - ρ ∈ (−1, 1)
/// - `logits.len() == components.len()`
#[derive(Clone, Debug, PartialEq)]
pub struct MixtureParameters {
	logits: Vec<f32>,
	components: Vec<Component>,
}

impl MixtureParameters {
	/// Decodes one timestep of raw head output (`M × 6` values, block layout).
	///
	/// Non-finite raw values are replaced by `0.0` before the transforms
	/// (weight logit 0, mean 0, σ = 1, ρ = 0). Returns the parameters and the
	/// number of values repaired.
	pub fn from_raw(raw: &[f32], num_mixtures: usize) -> (Self, usize) {
		let m = num_mixtures;
		let mut repaired = 0;
		let mut read = |block: Block, k: usize| {
			let value = raw.get(block.offset(m) + k).copied().unwrap_or(f32::NAN);
			if value.is_finite() {
				value
			} else {
				repaired += 1;
				0.0
			}
		};

		let mut logits = Vec::with_capacity(m);
		let mut components = Vec::with_capacity(m);
		for k in 0..m {
			logits.push(read(Block::Logit, k));
			components.push(Component {
				weight: 0.0,
				mu_x: read(Block::MuX, k),
				mu_y: read(Block::MuY, k),
				sigma_x: sigma(read(Block::LogSigmaX, k)),
				sigma_y: sigma(read(Block::LogSigmaY, k)),
				rho: rho(read(Block::Rho, k)),
			});
		}

		let weights = softmax(&logits, 1.0);
		for (component, weight) in components.iter_mut().zip(weights) {
			component.weight = weight;
		}

		(Self { logits, components }, repaired)
	}

	pub fn components(&self) -> &[Component] {
		&self.components
	}

	/// Unnormalized weight scores.
	pub fn logits(&self) -> &[f32] {
		&self.logits
	}

	pub fn len(&self) -> usize {
		self.components.len()
	}

	pub fn is_empty(&self) -> bool {
		self.components.is_empty()
	}

	/// Applies a temperature `τ > 0` and an extra σ multiplier.
	///
	/// - weights become `softmax(logits / τ)`
	/// - every σ is scaled by `√τ · sigma_scale`
	///
	/// The stored logits stay unscaled: a tiny τ would push them to ±inf.
	pub fn tempered(&self, temperature: f32, sigma_scale: f32) -> Self {
		let weights = softmax(&self.logits, temperature);
		let scale = temperature.sqrt() * sigma_scale;

		let components = self
			.components
			.iter()
			.zip(weights)
			.map(|(c, weight)| Component {
				weight,
				sigma_x: c.sigma_x * scale,
				sigma_y: c.sigma_y * scale,
				..*c
			})
			.collect();

		Self { logits: self.logits.clone(), components }
	}

	/// Index of the highest-weight component (first one on ties).
	pub fn dominant(&self) -> usize {
		argmax(&self.logits)
	}
}

/// σ = exp(clamp(raw)).
pub(crate) fn sigma(raw: f32) -> f32 {
	raw.clamp(LOG_SIGMA_MIN, LOG_SIGMA_MAX).exp()
}

/// ρ = tanh(raw) · RHO_LIMIT.
pub(crate) fn rho(raw: f32) -> f32 {
	raw.tanh() * RHO_LIMIT
}

/// Softmax of `scores / temperature`.
///
/// The maximum is subtracted before dividing, so every exponent is `<= 0`
/// and the top score always contributes `exp(0)`. As τ shrinks the result
/// tends to the one-hot arg-max instead of overflowing.
pub(crate) fn softmax(scores: &[f32], temperature: f32) -> Vec<f32> {
	let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
	let exps: Vec<f32> = scores.iter().map(|s| ((s - max) / temperature).exp()).collect();
	let sum: f32 = exps.iter().sum();
	exps.into_iter().map(|e| e / sum).collect()
}

/// First index of the largest score.
pub(crate) fn argmax(scores: &[f32]) -> usize {
	let mut best = 0;
	for (i, s) in scores.iter().enumerate() {
		if *s > scores[best] {
			best = i;
		}
	}
	best
}
