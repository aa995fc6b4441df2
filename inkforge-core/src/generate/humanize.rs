use std::f32::consts::PI;
use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use crate::error::InputError;
use crate::model::network::PEN_STATES;
use crate::model::stroke::PenState;
use crate::text::ligature::LigatureTable;

/// Standard deviation of the z noise at `character_inconsistency = 1`.
pub const CHARACTER_NOISE_STD: f32 = 0.2;

/// σ multiplier gained per character when fatigue is enabled.
pub const FATIGUE_RATE: f32 = 0.005;

/// Ceiling of the fatigue σ multiplier.
pub const FATIGUE_MAX: f32 = 2.0;

/// Logit shift toward pen-down (and away from pen-up) on a ligature.
pub const LIGATURE_BIAS: f32 = 2.0;

/// Baseline drift amplitude at `baseline_drift = 1`, in stroke units.
pub const BASELINE_MAX_AMPLITUDE: f32 = 3.0;

/// Horizontal period of the baseline drift, in stroke units.
pub const BASELINE_WAVELENGTH: f32 = 250.0;

/// Mixes the position into the character noise seed.
const NOISE_SALT: u64 = 0x9e37_79b9_7f4a_7c15;

/// User-facing humanization controls.
///
/// Deserializes with per-field defaults; ranges are only enforced by
/// `validate`, which `Humanizer::new` always runs.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(default)]
pub struct HumanizationParams {
	/// Pressure variance, passed through to the renderer. [0, 1]
	pub stroke_width_variation: f32,

	/// Per-character noise on z. [0, 1]
	pub character_inconsistency: f32,

	/// Global slant, in degrees. [-30, 30]
	pub slant_angle: f32,

	/// Sinusoidal y drift applied after accumulation. [0, 1]
	pub baseline_drift: f32,

	/// Favour pen-down between connectable characters.
	pub ligature_enabled: bool,

	/// σ grows with the character position.
	pub fatigue_enabled: bool,

	/// Post-render diffusion, passed through to the renderer. [0, 1]
	pub ink_bleed: f32,
}

impl Default for HumanizationParams {
	fn default() -> Self {
		Self {
			stroke_width_variation: 0.5,
			character_inconsistency: 0.4,
			slant_angle: 5.0,
			baseline_drift: 0.3,
			ligature_enabled: true,
			fatigue_enabled: false,
			ink_bleed: 0.2,
		}
	}
}

impl HumanizationParams {
	/// Checks every bounded control. NaN is always out of range.
	///
	/// # Errors
	/// `InputError::ParameterOutOfRange` naming the first offending control.
	pub fn validate(&self) -> Result<(), InputError> {
		let bounded = [
			("stroke_width_variation", self.stroke_width_variation, 0.0, 1.0),
			("character_inconsistency", self.character_inconsistency, 0.0, 1.0),
			("slant_angle", self.slant_angle, -30.0, 30.0),
			("baseline_drift", self.baseline_drift, 0.0, 1.0),
			("ink_bleed", self.ink_bleed, 0.0, 1.0),
		];
		for (name, value, min, max) in bounded {
			if !(min..=max).contains(&value) {
				return Err(InputError::ParameterOutOfRange { name, value, min, max });
			}
		}
		Ok(())
	}
}

/// Per-character changes applied by the sampler.
#[derive(Clone, Debug, PartialEq)]
pub struct SamplingAdjustment {
	/// Added to the style vector for this character.
	pub z_offset: Vec<f32>,

	/// Multiplies every σ after temperature scaling.
	pub sigma_scale: f32,

	/// Added to the pen logits, `PenState` order.
	pub pen_bias: [f32; PEN_STATES],
}

/// Geometry and rendering hints for whoever draws the strokes.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct TransformDescriptor {
	/// Rotation applied to accumulated points, degrees, positive leans right.
	pub slant_degrees: f32,

	/// Amplitude of the sinusoidal baseline offset.
	pub baseline_amplitude: f32,

	/// Period of that offset along x.
	pub baseline_wavelength: f32,

	/// Renderer-only: pressure variance.
	pub stroke_width_variation: f32,

	/// Renderer-only: diffusion radius factor.
	pub ink_bleed: f32,
}

impl TransformDescriptor {
	/// Applies slant rotation then baseline drift to absolute points.
	pub fn apply(&self, points: &mut [(f32, f32)]) {
		let (sin, cos) = self.slant_degrees.to_radians().sin_cos();
		for (x, y) in points.iter_mut() {
			let rx = *x * cos + *y * sin;
			let ry = -*x * sin + *y * cos;
			let drift = self.baseline_amplitude * (2.0 * PI * rx / self.baseline_wavelength).sin();
			*x = rx;
			*y = ry + drift;
		}
	}
}

/// Maps validated controls to sampling adjustments.
///
/// A pure function of its inputs: the character noise is drawn from a
/// generator seeded by the position and the character, so asking twice for
/// the same position gives the same answer.
#[derive(Clone, Debug)]
pub struct Humanizer {
	params: HumanizationParams,
	ligatures: Arc<LigatureTable>,
}

impl Humanizer {
	/// Validates `params` and binds them to an adjacency table.
	pub fn new(params: HumanizationParams, ligatures: Arc<LigatureTable>) -> Result<Self, InputError> {
		params.validate()?;
		Ok(Self { params, ligatures })
	}

	pub fn params(&self) -> &HumanizationParams {
		&self.params
	}

	/// Adjustment for the character at `position`.
	///
	/// - `current`: token being written
	/// - `next`: following token, `None` on the last character
	/// - `style_dim`: length of the z offset to produce
	pub fn adjust(&self, position: usize, current: u32, next: Option<u32>, style_dim: usize) -> SamplingAdjustment {
		SamplingAdjustment {
			z_offset: self.z_offset(position, current, style_dim),
			sigma_scale: self.sigma_scale(position),
			pen_bias: self.pen_bias(current, next),
		}
	}

	/// Renderer-side descriptor; independent of position.
	pub fn descriptor(&self) -> TransformDescriptor {
		TransformDescriptor {
			slant_degrees: self.params.slant_angle,
			baseline_amplitude: self.params.baseline_drift * BASELINE_MAX_AMPLITUDE,
			baseline_wavelength: BASELINE_WAVELENGTH,
			stroke_width_variation: self.params.stroke_width_variation,
			ink_bleed: self.params.ink_bleed,
		}
	}

	fn z_offset(&self, position: usize, current: u32, style_dim: usize) -> Vec<f32> {
		let std = CHARACTER_NOISE_STD * self.params.character_inconsistency;
		if std == 0.0 {
			return vec![0.0; style_dim];
		}

		let seed = (((position as u64) << 32) | current as u64).wrapping_mul(NOISE_SALT);
		let mut rng = StdRng::seed_from_u64(seed);
		(0..style_dim)
			.map(|_| {
				let n: f32 = StandardNormal.sample(&mut rng);
				n * std
			})
			.collect()
	}

	fn sigma_scale(&self, position: usize) -> f32 {
		if self.params.fatigue_enabled {
			(1.0 + FATIGUE_RATE * position as f32).min(FATIGUE_MAX)
		} else {
			1.0
		}
	}

	fn pen_bias(&self, current: u32, next: Option<u32>) -> [f32; PEN_STATES] {
		let mut bias = [0.0; PEN_STATES];
		let joined = next.is_some_and(|next| self.ligatures.connects(current, next));
		if self.params.ligature_enabled && joined {
			bias[PenState::Down.index()] = LIGATURE_BIAS;
			bias[PenState::Up.index()] = -LIGATURE_BIAS;
		}
		bias
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::text::tokenizer::Vocabulary;

	fn humanizer(params: HumanizationParams) -> Humanizer {
		let ligatures = Arc::new(LigatureTable::cursive(&Vocabulary::default()));
		Humanizer::new(params, ligatures).unwrap()
	}

	fn variance(values: &[f32]) -> f32 {
		let mean = values.iter().sum::<f32>() / values.len() as f32;
		values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / values.len() as f32
	}

	#[test]
	fn defaults_are_valid() {
		assert_eq!(HumanizationParams::default().validate(), Ok(()));
	}

	#[test]
	fn out_of_range_controls_are_named() {
		let params = HumanizationParams { slant_angle: 31.0, ..Default::default() };
		assert_eq!(
			params.validate(),
			Err(InputError::ParameterOutOfRange { name: "slant_angle", value: 31.0, min: -30.0, max: 30.0 })
		);

		let params = HumanizationParams { ink_bleed: f32::NAN, ..Default::default() };
		assert!(matches!(
			params.validate(),
			Err(InputError::ParameterOutOfRange { name: "ink_bleed", .. })
		));

		let ligatures = Arc::new(LigatureTable::new());
		let params = HumanizationParams { character_inconsistency: -0.1, ..Default::default() };
		assert!(Humanizer::new(params, ligatures).is_err());
	}

	#[test]
	fn missing_fields_take_defaults() {
		let params: HumanizationParams = toml::from_str("slant_angle = -12.5").unwrap();
		assert_eq!(params.slant_angle, -12.5);
		assert_eq!(params.ink_bleed, 0.2);
	}

	#[test]
	fn adjust_is_pure() {
		let h = humanizer(HumanizationParams::default());
		assert_eq!(h.adjust(7, 40, Some(41), 32), h.adjust(7, 40, Some(41), 32));
		assert_ne!(h.adjust(7, 40, None, 32).z_offset, h.adjust(8, 40, None, 32).z_offset);
	}

	#[test]
	fn zero_inconsistency_means_zero_offset() {
		let h = humanizer(HumanizationParams { character_inconsistency: 0.0, ..Default::default() });
		for position in 0..20 {
			assert!(h.adjust(position, 65, None, 128).z_offset.iter().all(|v| *v == 0.0));
		}
	}

	#[test]
	fn more_inconsistency_means_more_variance() {
		let half = humanizer(HumanizationParams { character_inconsistency: 0.5, ..Default::default() });
		let full = humanizer(HumanizationParams { character_inconsistency: 1.0, ..Default::default() });

		let collect = |h: &Humanizer| -> Vec<f32> {
			(0..50).flat_map(|p| h.adjust(p, 70, None, 128).z_offset).collect()
		};
		let half = variance(&collect(&half));
		let full = variance(&collect(&full));
		assert!(full > half * 3.0, "full {full} vs half {half}");
		assert!((full.sqrt() - CHARACTER_NOISE_STD).abs() < 0.02);
	}

	#[test]
	fn fatigue_ramps_linearly_then_caps() {
		let h = humanizer(HumanizationParams { fatigue_enabled: true, ..Default::default() });
		assert_eq!(h.adjust(0, 0, None, 1).sigma_scale, 1.0);
		assert!((h.adjust(100, 0, None, 1).sigma_scale - 1.5).abs() < 1e-6);
		assert_eq!(h.adjust(10_000, 0, None, 1).sigma_scale, FATIGUE_MAX);

		let rested = humanizer(HumanizationParams { fatigue_enabled: false, ..Default::default() });
		assert_eq!(rested.adjust(500, 0, None, 1).sigma_scale, 1.0);
	}

	#[test]
	fn ligature_bias_only_between_connectable_pairs() {
		let vocabulary = Vocabulary::default();
		let a = vocabulary.get('a').unwrap();
		let b = vocabulary.get('b').unwrap();
		let space = vocabulary.get(' ').unwrap();

		let h = humanizer(HumanizationParams::default());
		assert_eq!(h.adjust(0, a, Some(b), 1).pen_bias, [LIGATURE_BIAS, -LIGATURE_BIAS, 0.0]);
		assert_eq!(h.adjust(0, a, Some(space), 1).pen_bias, [0.0; 3]);
		assert_eq!(h.adjust(0, a, None, 1).pen_bias, [0.0; 3]);

		let off = humanizer(HumanizationParams { ligature_enabled: false, ..Default::default() });
		assert_eq!(off.adjust(0, a, Some(b), 1).pen_bias, [0.0; 3]);
	}

	#[test]
	fn descriptor_carries_render_controls() {
		let h = humanizer(HumanizationParams {
			slant_angle: -10.0,
			baseline_drift: 0.5,
			stroke_width_variation: 0.7,
			ink_bleed: 0.9,
			..Default::default()
		});
		let d = h.descriptor();
		assert_eq!(d.slant_degrees, -10.0);
		assert_eq!(d.baseline_amplitude, 0.5 * BASELINE_MAX_AMPLITUDE);
		assert_eq!(d.stroke_width_variation, 0.7);
		assert_eq!(d.ink_bleed, 0.9);
	}

	#[test]
	fn descriptor_rotates_and_drifts() {
		let flat = TransformDescriptor {
			slant_degrees: 90.0,
			baseline_amplitude: 0.0,
			baseline_wavelength: BASELINE_WAVELENGTH,
			stroke_width_variation: 0.0,
			ink_bleed: 0.0,
		};
		let mut points = [(0.0, 1.0)];
		flat.apply(&mut points);
		assert!((points[0].0 - 1.0).abs() < 1e-6);
		assert!(points[0].1.abs() < 1e-6);

		let wavy = TransformDescriptor { slant_degrees: 0.0, baseline_amplitude: 2.0, ..flat };
		let mut points = [(BASELINE_WAVELENGTH / 4.0, 0.0)];
		wavy.apply(&mut points);
		assert!((points[0].1 - 2.0).abs() < 1e-5);
	}
}
