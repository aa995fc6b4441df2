use std::path::Path;

use log::info;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::error::TrainError;
use crate::io;
use crate::model::stroke::{DeltaStats, StrokeTuple, normalize_deltas};

/// Current dataset file layout version.
pub const DATASET_VERSION: u32 = 1;

/// One transcribed handwriting sample.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StrokeSample {
	/// Vocabulary indices of the transcription.
	pub tokens: Vec<u32>,

	/// Style vector of the writer.
	pub style: Vec<f32>,

	/// Ground-truth pen motion, normally ending with an end flag.
	pub strokes: Vec<StrokeTuple>,
}

/// Preprocessed training or validation split.
///
/// Stored as postcard `(DATASET_VERSION, samples)`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct StrokeDataset {
	samples: Vec<StrokeSample>,
}

impl StrokeDataset {
	pub fn new(samples: Vec<StrokeSample>) -> Self {
		Self { samples }
	}

	pub fn samples(&self) -> &[StrokeSample] {
		&self.samples
	}

	pub fn len(&self) -> usize {
		self.samples.len()
	}

	pub fn is_empty(&self) -> bool {
		self.samples.is_empty()
	}

	/// Reads a dataset file.
	///
	/// # Errors
	/// - `TrainError::Io` if the file cannot be read
	/// - `TrainError::Dataset` on another layout version or an undecodable body
	pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TrainError> {
		let path = path.as_ref();
		let bytes = io::read_bytes(path)?;
		let corrupt = |reason: String| TrainError::Dataset { path: path.to_path_buf(), reason };

		let (version, body) = postcard::take_from_bytes::<u32>(&bytes).map_err(|e| corrupt(e.to_string()))?;
		if version != DATASET_VERSION {
			return Err(corrupt(format!("format version {version}, expected {DATASET_VERSION}")));
		}
		let dataset: Self = postcard::from_bytes(body).map_err(|e| corrupt(e.to_string()))?;

		info!("loaded {} samples from {}", dataset.len(), path.display());
		Ok(dataset)
	}

	/// Writes the dataset to `path`.
	pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), TrainError> {
		let path = path.as_ref();
		let bytes = postcard::to_stdvec(&(DATASET_VERSION, self))
			.map_err(|e| TrainError::Dataset { path: path.to_path_buf(), reason: e.to_string() })?;
		io::write_bytes(path, &bytes)?;
		Ok(())
	}

	/// Cuts every stroke sequence to at most `max_len` timesteps.
	///
	/// Samples whose strokes or transcription are empty are dropped.
	/// Returns the number of samples that were shortened.
	pub fn truncate(&mut self, max_len: usize) -> usize {
		self.samples.retain(|s| !s.strokes.is_empty() && !s.tokens.is_empty());
		let mut shortened = 0;
		for sample in &mut self.samples {
			if sample.strokes.len() > max_len {
				sample.strokes.truncate(max_len);
				shortened += 1;
			}
		}
		shortened
	}

	/// Normalizes Δx and Δy over the whole dataset.
	///
	/// The returned statistics map generated deltas back to raw units.
	pub fn normalize(&mut self) -> DeltaStats {
		let mut all: Vec<StrokeTuple> = self.samples.iter().flat_map(|s| s.strokes.iter().copied()).collect();
		let stats = normalize_deltas(&mut all);

		let mut normalized = all.into_iter();
		for sample in &mut self.samples {
			for (stroke, value) in sample.strokes.iter_mut().zip(normalized.by_ref()) {
				*stroke = value;
			}
		}
		stats
	}

	/// Normalizes Δx and Δy with statistics computed elsewhere.
	///
	/// Validation splits and resumed runs reuse the training statistics.
	pub fn normalize_with(&mut self, stats: &DeltaStats) {
		for stroke in self.samples.iter_mut().flat_map(|s| s.strokes.iter_mut()) {
			*stroke = stats.normalize(*stroke);
		}
	}

	/// Shuffled mini-batches of at most `batch_size` samples.
	///
	/// The order depends only on `seed`. The last batch may be smaller.
	pub fn batches(&self, batch_size: usize, seed: u64) -> Vec<Vec<&StrokeSample>> {
		let mut order: Vec<usize> = (0..self.samples.len()).collect();
		order.shuffle(&mut StdRng::seed_from_u64(seed));
		order
			.chunks(batch_size.max(1))
			.map(|chunk| chunk.iter().map(|&i| &self.samples[i]).collect())
			.collect()
	}

	/// Batches in storage order, for evaluation.
	pub fn sequential_batches(&self, batch_size: usize) -> Vec<Vec<&StrokeSample>> {
		self.samples.chunks(batch_size.max(1)).map(|chunk| chunk.iter().collect()).collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::stroke::PenState;

	fn sample(tokens: &[u32], steps: usize) -> StrokeSample {
		let mut strokes: Vec<StrokeTuple> =
			(0..steps).map(|i| StrokeTuple::new(i as f32, -(i as f32), PenState::Down)).collect();
		if let Some(last) = strokes.last_mut() {
			last.pen = PenState::End;
		}
		StrokeSample { tokens: tokens.to_vec(), style: vec![0.25; 4], strokes }
	}

	#[test]
	fn file_round_trip() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("train.bin");
		let dataset = StrokeDataset::new(vec![sample(&[1, 2], 4), sample(&[3], 2)]);

		dataset.save(&path).unwrap();
		assert_eq!(StrokeDataset::load(&path).unwrap(), dataset);
	}

	#[test]
	fn other_version_is_rejected() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("old.bin");
		let bytes = postcard::to_stdvec(&(DATASET_VERSION + 1, StrokeDataset::default())).unwrap();
		std::fs::write(&path, bytes).unwrap();

		assert!(matches!(StrokeDataset::load(&path), Err(TrainError::Dataset { .. })));
		assert!(matches!(StrokeDataset::load(dir.path().join("missing.bin")), Err(TrainError::Io(_))));
	}

	#[test]
	fn truncate_shortens_and_drops_empty_samples() {
		let mut dataset = StrokeDataset::new(vec![sample(&[1], 10), sample(&[2], 3), sample(&[], 3), sample(&[4], 0)]);
		assert_eq!(dataset.truncate(5), 1);
		assert_eq!(dataset.len(), 2);
		assert_eq!(dataset.samples()[0].strokes.len(), 5);
		assert_eq!(dataset.samples()[1].strokes.len(), 3);
	}

	#[test]
	fn batches_cover_every_sample_once() {
		let dataset = StrokeDataset::new((0..7).map(|i| sample(&[i], 2)).collect());
		let batches = dataset.batches(3, 42);
		assert_eq!(batches.iter().map(Vec::len).collect::<Vec<_>>(), vec![3, 3, 1]);

		let mut seen: Vec<u32> = batches.iter().flatten().map(|s| s.tokens[0]).collect();
		seen.sort();
		assert_eq!(seen, (0..7).collect::<Vec<_>>());

		let again: Vec<u32> = dataset.batches(3, 42).iter().flatten().map(|s| s.tokens[0]).collect();
		let first: Vec<u32> = batches.iter().flatten().map(|s| s.tokens[0]).collect();
		assert_eq!(first, again);
	}

	#[test]
	fn normalize_spans_all_samples() {
		let mut dataset = StrokeDataset::new(vec![sample(&[1], 3), sample(&[2], 5)]);
		let stats = dataset.normalize();
		let all: Vec<f32> = dataset.samples().iter().flat_map(|s| s.strokes.iter().map(|t| t.dx)).collect();
		let mean = all.iter().sum::<f32>() / all.len() as f32;

		assert!(mean.abs() < 1e-5);
		assert!(stats.std.0 > 0.0);
		assert_eq!(dataset.samples()[1].strokes.len(), 5);
	}

	#[test]
	fn validation_reuses_training_statistics() {
		let mut train = StrokeDataset::new(vec![sample(&[1], 3), sample(&[2], 5)]);
		let mut validation = StrokeDataset::new(vec![sample(&[3], 4)]);
		let raw = validation.clone();

		let stats = train.normalize();
		validation.normalize_with(&stats);

		for (normalized, original) in validation.samples()[0].strokes.iter().zip(&raw.samples()[0].strokes) {
			assert!((normalized.dx - (original.dx - stats.mean.0) / stats.std.0).abs() < 1e-6);
			assert!((normalized.dy - (original.dy - stats.mean.1) / stats.std.1).abs() < 1e-6);
			assert_eq!(normalized.pen, original.pen);
		}
	}
}
