use std::f64::consts::TAU;

use candle_core::{D, Tensor};
use candle_nn::ops::log_softmax;

use crate::model::mixture::{Block, LOG_SIGMA_MAX, LOG_SIGMA_MIN, RHO_LIMIT};

use super::batch::StrokeBatch;

/// Mean masked MDN loss of a batch.
///
/// `mdn_raw` and `pen_logits` are the outputs of `StrokeModel::forward_t`.
/// Padded timesteps are excluded from both the sum and the count.
pub fn mdn_loss(mdn_raw: &Tensor, pen_logits: &Tensor, batch: &StrokeBatch, num_mixtures: usize) -> candle_core::Result<Tensor> {
	let losses = step_losses(
		mdn_raw,
		pen_logits,
		batch.targets(),
		batch.target_pen(),
		batch.mask(),
		num_mixtures,
	)?;
	losses.sum_all()?.affine(1.0 / batch.valid_steps().max(1) as f64, 0.0)
}

/// Per-timestep loss `−log p(Δx, Δy) + CE(pen)`, shape `[batch, seq]`.
///
/// `log p` is the log-sum-exp over components of `log π_k + log N_k`, with the
/// maximum subtracted before exponentiating. σ and ρ go through the same
/// clamp and `tanh` transforms as inference. Entries where `mask == 0` are
/// exactly zero, whatever the raw outputs hold there.
pub fn step_losses(
	mdn_raw: &Tensor,
	pen_logits: &Tensor,
	targets: &Tensor,
	target_pen: &Tensor,
	mask: &Tensor,
	num_mixtures: usize,
) -> candle_core::Result<Tensor> {
	let m = num_mixtures;
	let block = |b: Block| mdn_raw.narrow(D::Minus1, b.offset(m), m);

	let log_pi = log_softmax(&block(Block::Logit)?, D::Minus1)?;
	let mu_x = block(Block::MuX)?;
	let mu_y = block(Block::MuY)?;
	let log_sigma_x = block(Block::LogSigmaX)?.clamp(LOG_SIGMA_MIN, LOG_SIGMA_MAX)?;
	let log_sigma_y = block(Block::LogSigmaY)?.clamp(LOG_SIGMA_MIN, LOG_SIGMA_MAX)?;
	let rho = block(Block::Rho)?.tanh()?.affine(RHO_LIMIT as f64, 0.0)?;

	let x = targets.narrow(D::Minus1, 0, 1)?;
	let y = targets.narrow(D::Minus1, 1, 1)?;
	let zx = x.broadcast_sub(&mu_x)?.div(&log_sigma_x.exp()?)?;
	let zy = y.broadcast_sub(&mu_y)?.div(&log_sigma_y.exp()?)?;

	// 1 - ρ², bounded away from zero by RHO_LIMIT
	let one_minus_rho2 = rho.sqr()?.affine(-1.0, 1.0)?;
	let quad = ((zx.sqr()? + zy.sqr()?)? - (rho * (zx * zy)?)?.affine(2.0, 0.0)?)?;
	let log_norm = (log_sigma_x + log_sigma_y)?
		.affine(-1.0, -TAU.ln())?
		.sub(&one_minus_rho2.log()?.affine(0.5, 0.0)?)?
		.sub(&quad.div(&one_minus_rho2.affine(2.0, 0.0)?)?)?;

	let log_joint = (log_pi + log_norm)?;
	let max = log_joint.max_keepdim(D::Minus1)?.detach();
	let log_likelihood = log_joint
		.broadcast_sub(&max)?
		.exp()?
		.sum_keepdim(D::Minus1)?
		.log()?
		.add(&max)?
		.squeeze(D::Minus1)?;

	let pen_nll = log_softmax(pen_logits, D::Minus1)?
		.gather(&target_pen.unsqueeze(D::Minus1)?, D::Minus1)?
		.squeeze(D::Minus1)?
		.neg()?;

	let losses = (pen_nll - log_likelihood)?;
	mask.where_cond(&losses, &losses.zeros_like()?)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::mixture::MixtureParameters;
	use crate::model::network::StrokeModel;
	use crate::model::network::tests::tiny_config;
	use crate::model::stroke::{PenState, StrokeTuple};
	use crate::train::dataset::StrokeSample;
	use candle_core::Device;

	const M: usize = 2;

	fn raw_step() -> Vec<f32> {
		[
			vec![0.3, -0.2],  // logits
			vec![0.5, -1.0],  // μx
			vec![0.0, 2.0],   // μy
			vec![-0.5, 0.2],  // log σx
			vec![0.1, -0.3],  // log σy
			vec![0.4, -0.7],  // raw ρ
		]
		.concat()
	}

	/// Host-side reference: −log Σ π N(x, y) − log softmax(pen)[target].
	fn reference(raw: &[f32], x: f32, y: f32, pen: &[f32; 3], target: usize) -> f32 {
		let (mixture, _) = MixtureParameters::from_raw(raw, M);
		let density: f32 = mixture
			.components()
			.iter()
			.map(|c| {
				let zx = (x - c.mu_x) / c.sigma_x;
				let zy = (y - c.mu_y) / c.sigma_y;
				let r = 1.0 - c.rho * c.rho;
				let q = zx * zx + zy * zy - 2.0 * c.rho * zx * zy;
				c.weight * (-q / (2.0 * r)).exp() / (std::f32::consts::TAU * c.sigma_x * c.sigma_y * r.sqrt())
			})
			.sum();
		let max = pen.iter().copied().fold(f32::NEG_INFINITY, f32::max);
		let log_z = max + pen.iter().map(|p| (p - max).exp()).sum::<f32>().ln();
		-density.ln() + (log_z - pen[target])
	}

	fn tensors(
		raw: Vec<f32>,
		targets: Vec<f32>,
		pen: Vec<f32>,
		target_pen: Vec<u32>,
		mask: Vec<u8>,
		steps: usize,
	) -> (Tensor, Tensor, Tensor, Tensor, Tensor) {
		let device = Device::Cpu;
		(
			Tensor::from_vec(raw, (1, steps, M * 6), &device).unwrap(),
			Tensor::from_vec(pen, (1, steps, 3), &device).unwrap(),
			Tensor::from_vec(targets, (1, steps, 2), &device).unwrap(),
			Tensor::from_vec(target_pen, (1, steps), &device).unwrap(),
			Tensor::from_vec(mask, (1, steps), &device).unwrap(),
		)
	}

	#[test]
	fn matches_host_reference() {
		let pen = [0.2f32, -0.4, 1.1];
		let (raw, logits, targets, target_pen, mask) =
			tensors(raw_step(), vec![0.7, 0.3], pen.to_vec(), vec![1], vec![1], 1);

		let losses = step_losses(&raw, &logits, &targets, &target_pen, &mask, M).unwrap();
		let got = losses.to_vec2::<f32>().unwrap()[0][0];
		let expected = reference(&raw_step(), 0.7, 0.3, &pen, 1);
		assert!((got - expected).abs() < 1e-4, "{got} vs {expected}");
	}

	#[test]
	fn padded_steps_contribute_exactly_zero() {
		let garbage = vec![80.0f32; M * 6];
		let raw = [raw_step(), garbage.clone(), garbage].concat();
		let (raw, logits, targets, target_pen, mask) = tensors(
			raw,
			vec![0.7, 0.3, 1e6, -1e6, 0.0, 0.0],
			vec![0.2, -0.4, 1.1, 90.0, -90.0, 0.0, 0.0, 0.0, 0.0],
			vec![1, 2, 0],
			vec![1, 0, 0],
			3,
		);

		let losses = step_losses(&raw, &logits, &targets, &target_pen, &mask, M)
			.unwrap()
			.to_vec2::<f32>()
			.unwrap();
		assert_eq!(losses[0][1], 0.0);
		assert_eq!(losses[0][2], 0.0);

		let expected = reference(&raw_step(), 0.7, 0.3, &[0.2, -0.4, 1.1], 1);
		assert!((losses[0][0] - expected).abs() < 1e-4);
	}

	#[test]
	fn extreme_outputs_stay_finite() {
		let raw: Vec<f32> = [vec![0.0; M], vec![0.0; M], vec![0.0; M], vec![-500.0; M], vec![500.0; M], vec![40.0; M]].concat();
		let (raw, logits, targets, target_pen, mask) =
			tensors(raw, vec![0.01, 0.02], vec![0.0, 0.0, 0.0], vec![0], vec![1], 1);

		let loss = step_losses(&raw, &logits, &targets, &target_pen, &mask, M)
			.unwrap()
			.sum_all()
			.unwrap()
			.to_scalar::<f32>()
			.unwrap();
		assert!(loss.is_finite(), "{loss}");
	}

	#[test]
	fn mean_divides_by_valid_steps_only() {
		let config = tiny_config();
		let sample = |tokens: &[u32], pens: &[PenState]| StrokeSample {
			tokens: tokens.to_vec(),
			style: vec![0.2; 16],
			strokes: pens
				.iter()
				.enumerate()
				.map(|(i, &pen)| StrokeTuple::new(0.5 * i as f32, -0.25, pen))
				.collect(),
		};
		let long = sample(&[7, 8], &[PenState::Down, PenState::Up, PenState::Down, PenState::End]);
		let short = sample(&[9], &[PenState::Down, PenState::End]);
		let batch = StrokeBatch::new(&[&long, &short], &config, 30, &Device::Cpu).unwrap();
		assert_eq!(batch.valid_steps(), 6);

		let model = StrokeModel::new(&config, &Device::Cpu, 4).unwrap();
		let (raw, pen) = model.forward_t(batch.chars(), batch.inputs(), batch.style(), false).unwrap();
		let per_step = step_losses(&raw, &pen, batch.targets(), batch.target_pen(), batch.mask(), config.num_mixtures)
			.unwrap()
			.to_vec2::<f32>()
			.unwrap();
		let total: f32 = per_step.iter().flatten().sum();
		let mean = mdn_loss(&raw, &pen, &batch, config.num_mixtures).unwrap().to_scalar::<f32>().unwrap();

		assert!((mean - total / 6.0).abs() < 1e-4, "{mean} vs {}", total / 6.0);
		assert!((mean - total / 8.0).abs() > 1e-3);
	}
}
