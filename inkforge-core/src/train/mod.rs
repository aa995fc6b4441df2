//! Supervised training of the stroke model.
//!
//! This module contains:
//! - Preprocessed samples and their on-disk dataset format
//! - Teacher-forced batch construction with padding masks
//! - The masked MDN negative log-likelihood + pen cross-entropy
//! - The AdamW training loop with clipping, validation and checkpoints

/// Samples, dataset files, truncation, shuffled batching.
pub mod dataset;

/// Padded tensors and masks for one step.
pub mod batch;

/// Mixture density loss.
pub mod loss;

/// Optimisation loop.
pub mod trainer;
