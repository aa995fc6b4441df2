use candle_core::{Device, Tensor};

use crate::config::ModelConfig;
use crate::error::{InputError, TrainError};
use crate::model::stroke::{CharacterCursor, STROKE_DIM, ZERO_INPUT};

use super::dataset::StrokeSample;

/// Padded, teacher-forced tensors for one optimisation step.
///
/// For every sample and timestep `t < len`:
/// - `chars[t]` is the character the cursor points at before stroke `t`
/// - `inputs[t]` is stroke `t - 1` (zeros at `t = 0`)
/// - `targets[t]` / `target_pen[t]` describe stroke `t`
/// - `mask[t] = 1`
///
/// Padded timesteps hold zeros and `mask = 0`.
#[derive(Debug)]
pub struct StrokeBatch {
	chars: Tensor,
	inputs: Tensor,
	targets: Tensor,
	target_pen: Tensor,
	mask: Tensor,
	style: Tensor,
	valid_steps: usize,
}

impl StrokeBatch {
	/// Pads `samples` to their longest stroke sequence.
	///
	/// # Errors
	/// - `InputError::EmptyBatch` if `samples` is empty
	/// - `InputError::BatchShape` for a sample without characters or strokes
	/// - `InputError::TokenOutOfVocabulary` / `StyleDimension` if a sample does
	///   not fit `config`
	pub fn new(
		samples: &[&StrokeSample],
		config: &ModelConfig,
		steps_per_char: usize,
		device: &Device,
	) -> Result<Self, TrainError> {
		if samples.is_empty() {
			return Err(InputError::EmptyBatch.into());
		}
		for (i, sample) in samples.iter().enumerate() {
			validate(i, sample, config)?;
		}

		let batch = samples.len();
		let seq = samples.iter().map(|s| s.strokes.len()).max().unwrap_or(0);

		let mut chars = vec![0u32; batch * seq];
		let mut inputs = vec![0f32; batch * seq * STROKE_DIM];
		let mut targets = vec![0f32; batch * seq * 2];
		let mut target_pen = vec![0u32; batch * seq];
		let mut mask = vec![0u8; batch * seq];
		let mut style = Vec::with_capacity(batch * config.style_dim);

		for (b, sample) in samples.iter().enumerate() {
			style.extend_from_slice(&sample.style);

			let mut cursor = CharacterCursor::new(sample.tokens.len(), steps_per_char);
			let mut prior = ZERO_INPUT;
			for (t, stroke) in sample.strokes.iter().enumerate() {
				let at = b * seq + t;
				chars[at] = sample.tokens[cursor.position()];
				inputs[at * STROKE_DIM..(at + 1) * STROKE_DIM].copy_from_slice(&prior);
				targets[at * 2] = stroke.dx;
				targets[at * 2 + 1] = stroke.dy;
				target_pen[at] = stroke.pen.index() as u32;
				mask[at] = 1;

				prior = stroke.to_array();
				cursor.advance(stroke.pen);
			}
		}

		let valid_steps = samples.iter().map(|s| s.strokes.len()).sum();
		Ok(Self {
			chars: Tensor::from_vec(chars, (batch, seq), device)?,
			inputs: Tensor::from_vec(inputs, (batch, seq, STROKE_DIM), device)?,
			targets: Tensor::from_vec(targets, (batch, seq, 2), device)?,
			target_pen: Tensor::from_vec(target_pen, (batch, seq), device)?,
			mask: Tensor::from_vec(mask, (batch, seq), device)?,
			style: Tensor::from_vec(style, (batch, config.style_dim), device)?,
			valid_steps,
		})
	}

	/// `[batch, seq]` u32 character per timestep.
	pub fn chars(&self) -> &Tensor {
		&self.chars
	}

	/// `[batch, seq, 5]` previous stroke per timestep.
	pub fn inputs(&self) -> &Tensor {
		&self.inputs
	}

	/// `[batch, seq, 2]` ground-truth Δx, Δy.
	pub fn targets(&self) -> &Tensor {
		&self.targets
	}

	/// `[batch, seq]` u32 ground-truth pen state index.
	pub fn target_pen(&self) -> &Tensor {
		&self.target_pen
	}

	/// `[batch, seq]` u8, 1 on real timesteps.
	pub fn mask(&self) -> &Tensor {
		&self.mask
	}

	/// `[batch, style_dim]`.
	pub fn style(&self) -> &Tensor {
		&self.style
	}

	/// Number of unmasked timesteps.
	pub fn valid_steps(&self) -> usize {
		self.valid_steps
	}
}

fn validate(index: usize, sample: &StrokeSample, config: &ModelConfig) -> Result<(), InputError> {
	if sample.tokens.is_empty() {
		return Err(InputError::BatchShape { sample: index, reason: "no characters".to_owned() });
	}
	if sample.strokes.is_empty() {
		return Err(InputError::BatchShape { sample: index, reason: "no strokes".to_owned() });
	}
	if let Some(&token) = sample.tokens.iter().find(|&&t| t as usize >= config.vocab_size) {
		return Err(InputError::TokenOutOfVocabulary { index: token, vocab_size: config.vocab_size });
	}
	if sample.style.len() != config.style_dim {
		return Err(InputError::StyleDimension { expected: config.style_dim, actual: sample.style.len() });
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::network::tests::tiny_config;
	use crate::model::stroke::{PenState, StrokeTuple};

	fn sample(tokens: &[u32], pens: &[PenState]) -> StrokeSample {
		StrokeSample {
			tokens: tokens.to_vec(),
			style: vec![0.1; 16],
			strokes: pens
				.iter()
				.enumerate()
				.map(|(i, &pen)| StrokeTuple::new(i as f32 + 1.0, 0.5, pen))
				.collect(),
		}
	}

	#[test]
	fn pads_shifts_and_masks() {
		let long = sample(&[7, 8], &[PenState::Down, PenState::Up, PenState::Down, PenState::End]);
		let short = sample(&[9], &[PenState::Down, PenState::End]);
		let batch = StrokeBatch::new(&[&long, &short], &tiny_config(), 30, &Device::Cpu).unwrap();

		assert_eq!(batch.valid_steps(), 6);
		assert_eq!(batch.mask().to_vec2::<u8>().unwrap(), vec![vec![1, 1, 1, 1], vec![1, 1, 0, 0]]);
		assert_eq!(batch.chars().to_vec2::<u32>().unwrap(), vec![vec![7, 7, 8, 8], vec![9, 9, 0, 0]]);
		assert_eq!(batch.target_pen().to_vec2::<u32>().unwrap(), vec![vec![0, 1, 0, 2], vec![0, 2, 0, 0]]);

		let inputs = batch.inputs().to_vec3::<f32>().unwrap();
		assert_eq!(inputs[0][0], ZERO_INPUT.to_vec());
		assert_eq!(inputs[0][2], vec![2.0, 0.5, 0.0, 1.0, 0.0]);
		assert_eq!(inputs[1][3], vec![0.0; 5]);

		let targets = batch.targets().to_vec3::<f32>().unwrap();
		assert_eq!(targets[1][1], vec![2.0, 0.5]);
		assert_eq!(targets[1][2], vec![0.0, 0.0]);
	}

	#[test]
	fn step_budget_moves_the_character() {
		let strokes = [PenState::Down; 5];
		let s = sample(&[1, 2, 3], &strokes);
		let batch = StrokeBatch::new(&[&s], &tiny_config(), 2, &Device::Cpu).unwrap();
		assert_eq!(batch.chars().to_vec2::<u32>().unwrap(), vec![vec![1, 1, 2, 2, 3]]);
	}

	#[test]
	fn rejects_unusable_samples() {
		let config = tiny_config();
		assert!(matches!(
			StrokeBatch::new(&[], &config, 30, &Device::Cpu),
			Err(TrainError::Input(InputError::EmptyBatch))
		));

		let no_strokes = sample(&[1], &[]);
		assert!(matches!(
			StrokeBatch::new(&[&no_strokes], &config, 30, &Device::Cpu),
			Err(TrainError::Input(InputError::BatchShape { sample: 0, .. }))
		));

		let ok = sample(&[1], &[PenState::End]);
		let unknown = sample(&[200], &[PenState::End]);
		assert!(matches!(
			StrokeBatch::new(&[&ok, &unknown], &config, 30, &Device::Cpu),
			Err(TrainError::Input(InputError::TokenOutOfVocabulary { index: 200, .. }))
		));

		let mut narrow = ok.clone();
		narrow.style = vec![0.0; 3];
		assert!(matches!(
			StrokeBatch::new(&[&narrow], &config, 30, &Device::Cpu),
			Err(TrainError::Input(InputError::StyleDimension { expected: 16, actual: 3 }))
		));
	}
}
