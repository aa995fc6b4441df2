use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};

use candle_core::Device;
use log::info;
use serde::{Deserialize, Serialize};

use crate::config::ModelConfig;
use crate::error::ModelStateError;
use crate::io;

use super::network::StrokeModel;
use super::stroke::DeltaStats;

/// Leading bytes of every checkpoint.
const MAGIC: [u8; 4] = *b"INKF";

/// Current checkpoint layout version.
pub const CHECKPOINT_VERSION: u32 = 2;

/// Shared read-only model handed to every session.
pub type ModelHandle = Arc<StrokeModel>;

/// One named weight.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
struct TensorRecord {
	name: String,
	shape: Vec<usize>,
	values: Vec<f32>,
}

/// Serialized model: architecture, delta statistics and every weight.
///
/// Binary layout (postcard):
/// `MAGIC` · `format_version: u32` · `{ config, delta_stats, tensors }`
///
/// The version is decoded on its own before the body, so a checkpoint from
/// another layout version is reported as such instead of as garbage.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Checkpoint {
	config: ModelConfig,
	delta_stats: DeltaStats,
	tensors: Vec<TensorRecord>,
}

impl Checkpoint {
	/// Copies every weight of `model`.
	pub fn capture(model: &StrokeModel) -> Result<Self, ModelStateError> {
		let tensors = model
			.export_tensors()
			.map_err(|e| ModelStateError::Corrupt { reason: e.to_string() })?
			.into_iter()
			.map(|(name, shape, values)| TensorRecord { name, shape, values })
			.collect();
		Ok(Self { config: model.config().clone(), delta_stats: *model.delta_stats(), tensors })
	}

	/// Architecture stored in the checkpoint.
	pub fn config(&self) -> &ModelConfig {
		&self.config
	}

	/// Statistics generated deltas are mapped back with.
	pub fn delta_stats(&self) -> &DeltaStats {
		&self.delta_stats
	}

	pub fn to_bytes(&self) -> Result<Vec<u8>, ModelStateError> {
		let mut bytes = MAGIC.to_vec();
		let body = postcard::to_stdvec(&(CHECKPOINT_VERSION, self))
			.map_err(|e| ModelStateError::Corrupt { reason: e.to_string() })?;
		bytes.extend(body);
		Ok(bytes)
	}

	/// Decodes a checkpoint blob.
	///
	/// # Errors
	/// - `ModelStateError::Corrupt` on a bad magic or undecodable body
	/// - `ModelStateError::VersionMismatch` on another layout version
	pub fn from_bytes(bytes: &[u8]) -> Result<Self, ModelStateError> {
		let rest = bytes
			.strip_prefix(&MAGIC[..])
			.ok_or_else(|| ModelStateError::Corrupt { reason: "missing checkpoint header".to_owned() })?;

		let (version, body) = postcard::take_from_bytes::<u32>(rest)
			.map_err(|e| ModelStateError::Corrupt { reason: e.to_string() })?;
		if version != CHECKPOINT_VERSION {
			return Err(ModelStateError::VersionMismatch { expected: CHECKPOINT_VERSION, found: version });
		}

		postcard::from_bytes(body).map_err(|e| ModelStateError::Corrupt { reason: e.to_string() })
	}

	/// Builds a model from the stored architecture and weights.
	///
	/// The checkpoint must cover every weight of that architecture exactly:
	/// missing, unknown or reshaped tensors are rejected and no partially
	/// loaded model escapes.
	pub fn restore(self, device: &Device) -> Result<StrokeModel, ModelStateError> {
		self.config
			.validate()
			.map_err(|e| ModelStateError::Corrupt { reason: e.to_string() })?;
		let model = StrokeModel::new(&self.config, device, 0)
			.map_err(|e| ModelStateError::Corrupt { reason: e.to_string() })?
			.with_delta_stats(self.delta_stats);

		let mut pending: HashSet<String> = model.tensor_shapes().into_iter().map(|(name, _)| name).collect();
		for record in self.tensors {
			if !pending.remove(&record.name) {
				return Err(ModelStateError::UnexpectedTensor { name: record.name });
			}
			model.load_tensor(&record.name, &record.shape, record.values)?;
		}

		let mut missing: Vec<String> = pending.into_iter().collect();
		missing.sort();
		if let Some(name) = missing.into_iter().next() {
			return Err(ModelStateError::MissingTensor { name });
		}

		Ok(model)
	}

	/// Captures `model` and writes it to `path`.
	pub fn save<P: AsRef<Path>>(model: &StrokeModel, path: P) -> Result<(), ModelStateError> {
		let bytes = Self::capture(model)?.to_bytes()?;
		io::write_bytes(&path, &bytes).map_err(|e| ModelStateError::Corrupt { reason: e.to_string() })?;
		info!("checkpoint saved to {}", path.as_ref().display());
		Ok(())
	}

	/// Reads and restores the model stored at `path`.
	pub fn load<P: AsRef<Path>>(path: P, device: &Device) -> Result<StrokeModel, ModelStateError> {
		let bytes = io::read_bytes(&path).map_err(|e| ModelStateError::Corrupt { reason: e.to_string() })?;
		Self::from_bytes(&bytes)?.restore(device)
	}
}

/// Process-wide home of the published model.
///
/// # Responsibilities
/// - Run at most one load at a time
/// - Publish the model only once it is completely loaded
/// - Refuse to replace a published model
/// - Report `NotLoaded` instead of handing out an empty model
#[derive(Default)]
pub struct ModelSlot {
	model: OnceLock<ModelHandle>,
	loading: Mutex<()>,
}

impl ModelSlot {
	pub fn new() -> Self {
		Self::default()
	}

	/// Decodes `bytes` and publishes the resulting model.
	///
	/// # Errors
	/// - `ModelStateError::AlreadyLoaded` if a model is already published
	/// - any decoding or validation error from `Checkpoint`
	pub fn load(&self, bytes: &[u8], device: &Device) -> Result<ModelHandle, ModelStateError> {
		let _guard = self
			.loading
			.lock()
			.map_err(|_| ModelStateError::Corrupt { reason: "load lock poisoned".to_owned() })?;
		if self.model.get().is_some() {
			return Err(ModelStateError::AlreadyLoaded);
		}

		let model = Checkpoint::from_bytes(bytes)?.restore(device)?;
		info!("model loaded: {} parameters", model.parameter_count());
		self.publish_locked(model)
	}

	/// Publishes an already built model (freshly seeded or trained).
	pub fn publish(&self, model: StrokeModel) -> Result<ModelHandle, ModelStateError> {
		let _guard = self
			.loading
			.lock()
			.map_err(|_| ModelStateError::Corrupt { reason: "load lock poisoned".to_owned() })?;
		self.publish_locked(model)
	}

	fn publish_locked(&self, model: StrokeModel) -> Result<ModelHandle, ModelStateError> {
		let handle = Arc::new(model);
		self.model
			.set(Arc::clone(&handle))
			.map_err(|_| ModelStateError::AlreadyLoaded)?;
		Ok(handle)
	}

	/// The published model.
	///
	/// # Errors
	/// `ModelStateError::NotLoaded` until a load or publish succeeded.
	pub fn get(&self) -> Result<ModelHandle, ModelStateError> {
		self.model.get().cloned().ok_or(ModelStateError::NotLoaded)
	}

	pub fn is_loaded(&self) -> bool {
		self.model.get().is_some()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::network::tests::tiny_config;

	fn tiny_model(seed: u64) -> StrokeModel {
		StrokeModel::new(&tiny_config(), &Device::Cpu, seed).unwrap()
	}

	#[test]
	fn bytes_restore_identical_weights() {
		let model = tiny_model(11);
		let bytes = Checkpoint::capture(&model).unwrap().to_bytes().unwrap();
		let restored = Checkpoint::from_bytes(&bytes).unwrap().restore(&Device::Cpu).unwrap();

		assert_eq!(restored.config(), model.config());
		assert_eq!(restored.export_tensors().unwrap(), model.export_tensors().unwrap());
	}

	#[test]
	fn file_round_trip() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("ckpt/model.ckpt");
		let stats = DeltaStats { mean: (1.5, -0.25), std: (3.0, 0.5) };
		let model = tiny_model(5).with_delta_stats(stats);

		Checkpoint::save(&model, &path).unwrap();
		let restored = Checkpoint::load(&path, &Device::Cpu).unwrap();
		assert_eq!(restored.export_tensors().unwrap(), model.export_tensors().unwrap());
		assert_eq!(restored.delta_stats(), &stats);
	}

	#[test]
	fn other_version_is_rejected() {
		let checkpoint = Checkpoint::capture(&tiny_model(1)).unwrap();
		let mut bytes = MAGIC.to_vec();
		bytes.extend(postcard::to_stdvec(&(CHECKPOINT_VERSION + 1, &checkpoint)).unwrap());

		assert_eq!(
			Checkpoint::from_bytes(&bytes),
			Err(ModelStateError::VersionMismatch { expected: CHECKPOINT_VERSION, found: CHECKPOINT_VERSION + 1 })
		);
	}

	#[test]
	fn garbage_is_corrupt() {
		assert!(matches!(Checkpoint::from_bytes(b"nope"), Err(ModelStateError::Corrupt { .. })));
		assert!(matches!(Checkpoint::from_bytes(b"INKF\x02\xff"), Err(ModelStateError::Corrupt { .. })));
	}

	#[test]
	fn tensor_set_must_match_exactly() {
		let mut checkpoint = Checkpoint::capture(&tiny_model(1)).unwrap();
		let removed = checkpoint.tensors.pop().unwrap();
		assert_eq!(
			checkpoint.clone().restore(&Device::Cpu).err(),
			Some(ModelStateError::MissingTensor { name: removed.name.clone() })
		);

		checkpoint.tensors.push(removed.clone());
		checkpoint.tensors.push(TensorRecord { name: "extra".to_owned(), ..removed });
		assert_eq!(
			checkpoint.restore(&Device::Cpu).err(),
			Some(ModelStateError::UnexpectedTensor { name: "extra".to_owned() })
		);
	}

	#[test]
	fn reshaped_tensor_is_rejected() {
		let mut checkpoint = Checkpoint::capture(&tiny_model(1)).unwrap();
		let record = checkpoint.tensors.iter_mut().find(|t| t.name == "pen_head.bias").unwrap();
		record.shape = vec![1, 3];
		assert!(matches!(
			checkpoint.restore(&Device::Cpu),
			Err(ModelStateError::ShapeMismatch { .. })
		));
	}

	#[test]
	fn slot_publishes_once() {
		let slot = ModelSlot::new();
		assert_eq!(slot.get().err(), Some(ModelStateError::NotLoaded));

		let bytes = Checkpoint::capture(&tiny_model(2)).unwrap().to_bytes().unwrap();
		slot.load(&bytes, &Device::Cpu).unwrap();
		assert!(slot.is_loaded());
		assert_eq!(slot.load(&bytes, &Device::Cpu).err(), Some(ModelStateError::AlreadyLoaded));
		assert_eq!(slot.publish(tiny_model(3)).err(), Some(ModelStateError::AlreadyLoaded));
	}

	#[test]
	fn failed_load_publishes_nothing() {
		let slot = ModelSlot::new();
		assert!(slot.load(b"INKF", &Device::Cpu).is_err());
		assert_eq!(slot.get().err(), Some(ModelStateError::NotLoaded));
	}
}
