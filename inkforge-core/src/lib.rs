//! Handwriting synthesis core.
//!
//! This crate provides the generative side of a handwriting synthesizer:
//! - A recurrent mixture density network over pen strokes (candle)
//! - Its masked likelihood objective and training loop
//! - An autoregressive sampler with temperature, truncation and cancellation
//! - Humanization controls mapped to sampling-time perturbations
//! - Checkpoint loading, published once and shared read-only
//!
//! Text, style and ligature lookups are behind small traits so callers can
//! plug their own vocabularies and style banks.

/// Typed errors of every public operation.
pub mod error;

/// TOML configuration (model, generation, training).
pub mod config;

/// Tokenizer, style vectors, ligature adjacency.
pub mod text;

/// Stroke model, mixture parameters, checkpoints.
pub mod model;

/// Sessions, humanization and the generation engine.
pub mod generate;

/// Dataset, batches, loss and trainer.
pub mod train;

/// I/O utilities (file loading, staged writes).
///
/// Not exposed
pub(crate) mod io;

pub use config::{GenerationConfig, InkforgeConfig, ModelConfig, TrainingConfig};
pub use error::{ConfigError, GenerationError, InputError, ModelStateError, NumericInstabilityError, TrainError};
pub use generate::engine::{Engine, GenerationRequest};
pub use generate::humanize::{HumanizationParams, TransformDescriptor};
pub use generate::sampler::{Cancellation, Generation, Session};
pub use model::checkpoint::{Checkpoint, ModelSlot};
pub use model::network::StrokeModel;
pub use model::stroke::{CompletionStatus, PenState, StrokeTuple};
pub use text::ligature::LigatureTable;
pub use text::style::{StyleBank, StyleVectorProvider};
pub use text::tokenizer::{Tokenizer, Vocabulary};
