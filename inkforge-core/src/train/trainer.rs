use std::path::{Path, PathBuf};

use candle_core::Device;
use candle_core::backprop::GradStore;
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use log::{info, warn};

use crate::config::TrainingConfig;
use crate::error::{InputError, ModelStateError, NumericInstabilityError, TrainError};
use crate::model::checkpoint::Checkpoint;
use crate::model::network::StrokeModel;

use super::batch::StrokeBatch;
use super::dataset::{StrokeDataset, StrokeSample};
use super::loss::mdn_loss;

/// File name of the checkpoint with the lowest validation loss.
pub const BEST_CHECKPOINT: &str = "best.ckpt";

/// File name of the checkpoint written after every epoch.
pub const LAST_CHECKPOINT: &str = "last.ckpt";

/// Losses of one epoch.
#[derive(Clone, Debug, PartialEq)]
pub struct EpochReport {
	pub epoch: usize,

	/// Mean training loss over the batches that were applied.
	pub train_loss: f32,

	pub validation_loss: Option<f32>,

	/// Batches dropped because their loss or gradients were not finite.
	pub skipped: usize,
}

/// Owns a model and its optimiser for the duration of a training run.
///
/// # Responsibilities
/// - Run teacher-forced steps with dropout enabled
/// - Refuse to apply a non-finite loss or gradient
/// - Clip the global gradient norm before AdamW
/// - Evaluate without dropout, save last and best checkpoints
pub struct Trainer {
	model: StrokeModel,
	optimizer: AdamW,
	config: TrainingConfig,
	steps_per_char: usize,
}

impl Trainer {
	/// Wraps `model` with a fresh AdamW state.
	pub fn new(model: StrokeModel, config: TrainingConfig, steps_per_char: usize) -> Result<Self, TrainError> {
		let params = ParamsAdamW { lr: config.learning_rate, ..Default::default() };
		let optimizer = AdamW::new(model.varmap().all_vars(), params)?;
		Ok(Self { model, optimizer, config, steps_per_char })
	}

	/// Continues from a saved checkpoint. The optimiser state starts fresh.
	pub fn resume<P: AsRef<Path>>(
		path: P,
		config: TrainingConfig,
		steps_per_char: usize,
		device: &Device,
	) -> Result<Self, TrainError> {
		let model = Checkpoint::load(&path, device)?;
		info!("resuming from {}", path.as_ref().display());
		Self::new(model, config, steps_per_char)
	}

	pub fn model(&self) -> &StrokeModel {
		&self.model
	}

	pub fn into_model(self) -> StrokeModel {
		self.model
	}

	/// Builds the padded tensors for `samples` on the model's device.
	pub fn batch(&self, samples: &[&StrokeSample]) -> Result<StrokeBatch, TrainError> {
		StrokeBatch::new(samples, self.model.config(), self.steps_per_char, self.model.device())
	}

	/// One optimisation step; returns the batch loss before the update.
	///
	/// # Errors
	/// - `NumericInstabilityError::NonFiniteLoss` before any backward pass
	/// - `NumericInstabilityError::NonFiniteGradient` before any weight changes
	///
	/// Either way the weights are left untouched.
	pub fn train_step(&mut self, batch: &StrokeBatch) -> Result<f32, TrainError> {
		let (mdn, pen) = self.model.forward_t(batch.chars(), batch.inputs(), batch.style(), true)?;
		let loss = mdn_loss(&mdn, &pen, batch, self.model.config().num_mixtures)?;
		let value = loss.to_scalar::<f32>()?;
		if !value.is_finite() {
			return Err(NumericInstabilityError::NonFiniteLoss { value }.into());
		}

		let mut grads = loss.backward()?;
		self.clip(&mut grads)?;
		self.optimizer.step(&grads)?;
		Ok(value)
	}

	/// Scales every gradient so the global L2 norm is at most `grad_clip`.
	fn clip(&self, grads: &mut GradStore) -> Result<(), TrainError> {
		let vars = {
			let data = self
				.model
				.varmap()
				.data()
				.lock()
				.map_err(|_| ModelStateError::Corrupt { reason: "weight map lock poisoned".to_owned() })?;
			let mut vars: Vec<(String, candle_core::Var)> =
				data.iter().map(|(name, var)| (name.clone(), var.clone())).collect();
			vars.sort_by(|a, b| a.0.cmp(&b.0));
			vars
		};

		let mut squared = 0f64;
		for (name, var) in &vars {
			if let Some(grad) = grads.get(var.as_tensor()) {
				let sum = grad.sqr()?.sum_all()?.to_scalar::<f32>()? as f64;
				if !sum.is_finite() {
					return Err(NumericInstabilityError::NonFiniteGradient { name: name.clone() }.into());
				}
				squared += sum;
			}
		}

		let norm = squared.sqrt();
		if self.config.grad_clip <= 0.0 || norm <= self.config.grad_clip {
			return Ok(());
		}
		let scale = self.config.grad_clip / norm;
		for (_, var) in &vars {
			if let Some(grad) = grads.get(var.as_tensor()) {
				let clipped = grad.affine(scale, 0.0)?;
				grads.insert(var.as_tensor(), clipped);
			}
		}
		Ok(())
	}

	/// Mean loss over `dataset` without dropout or updates.
	///
	/// # Errors
	/// `InputError::EmptyBatch` on an empty dataset.
	pub fn evaluate(&self, dataset: &StrokeDataset) -> Result<f32, TrainError> {
		let mut total = 0f64;
		let mut steps = 0usize;
		for samples in dataset.sequential_batches(self.config.batch_size) {
			let batch = self.batch(&samples)?;
			let (mdn, pen) = self.model.forward_t(batch.chars(), batch.inputs(), batch.style(), false)?;
			let loss = mdn_loss(&mdn, &pen, &batch, self.model.config().num_mixtures)?.to_scalar::<f32>()?;
			total += loss as f64 * batch.valid_steps() as f64;
			steps += batch.valid_steps();
		}
		if steps == 0 {
			return Err(InputError::EmptyBatch.into());
		}
		Ok((total / steps as f64) as f32)
	}

	/// Runs `config.epochs` epochs over `train`.
	///
	/// Batches with a non-finite loss or gradient are logged and skipped.
	/// After every epoch `last.ckpt` is written to `checkpoint_dir`, and
	/// `best.ckpt` whenever the validation loss (or the training loss when
	/// there is no validation set) improves.
	pub fn fit(&mut self, train: &StrokeDataset, validation: Option<&StrokeDataset>) -> Result<Vec<EpochReport>, TrainError> {
		let mut reports = Vec::with_capacity(self.config.epochs);
		let mut best = f32::INFINITY;

		for epoch in 0..self.config.epochs {
			let seed = self.config.seed.wrapping_add(epoch as u64);
			let mut total = 0f64;
			let mut applied = 0usize;
			let mut skipped = 0usize;

			for samples in train.batches(self.config.batch_size, seed) {
				let batch = self.batch(&samples)?;
				match self.train_step(&batch) {
					Ok(loss) => {
						total += loss as f64;
						applied += 1;
					}
					Err(TrainError::Numeric(e)) => {
						warn!("epoch {epoch}: skipping batch: {e}");
						skipped += 1;
					}
					Err(e) => return Err(e),
				}
			}

			let train_loss = if applied > 0 { (total / applied as f64) as f32 } else { f32::NAN };
			let validation_loss = validation.map(|v| self.evaluate(v)).transpose()?;
			info!(
				"epoch {epoch}: train {train_loss:.4}, validation {}, skipped {skipped}",
				validation_loss.map_or("-".to_owned(), |l| format!("{l:.4}"))
			);

			Checkpoint::save(&self.model, self.checkpoint_path(LAST_CHECKPOINT))?;
			let score = validation_loss.unwrap_or(train_loss);
			if score < best {
				best = score;
				Checkpoint::save(&self.model, self.checkpoint_path(BEST_CHECKPOINT))?;
			}

			reports.push(EpochReport { epoch, train_loss, validation_loss, skipped });
		}
		Ok(reports)
	}

	fn checkpoint_path(&self, name: &str) -> PathBuf {
		self.config.checkpoint_dir.join(name)
	}
}
