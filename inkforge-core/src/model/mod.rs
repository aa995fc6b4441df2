//! The generative stroke model.
//!
//! This module contains:
//! - Stroke tuples and pen states (`StrokeTuple`, `PenState`)
//! - Constrained mixture parameters (`MixtureParameters`)
//! - The recurrent network itself (`StrokeModel`)
//! - Its per-session memory (`HiddenState`)
//! - The checkpoint codec and the publish-once model slot

/// Pen motion tuples, completion status, delta utilities.
pub mod stroke;

/// Mixture-of-bivariate-Gaussians parameters and their constraining transforms.
pub mod mixture;

/// Embedding + LSTM stack + MDN and pen heads (candle).
pub mod network;

/// Recurrent memory threaded explicitly from step to step.
pub mod state;

/// Checkpoint encoding, validation and model publication.
pub mod checkpoint;
