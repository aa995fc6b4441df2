//! Autoregressive stroke generation.
//!
//! This module contains:
//! - The humanization controls and their mapping to sampling adjustments
//! - The per-session sampler (`Session`) and its cancellation handle
//! - The request-level `Engine`, single and concurrent

/// Humanization controls → z noise, σ scale, pen bias, render descriptor.
pub mod humanize;

/// Session state machine: temperature, mixture draw, pen draw, termination.
pub mod sampler;

/// Request validation and session orchestration.
pub mod engine;
