//! Text-side collaborators of the generator.
//!
//! - Character tokenizer (`Vocabulary`)
//! - Style id → latent vector lookup (`StyleBank`)
//! - Ligature adjacency table (`LigatureTable`)

/// Character → vocabulary index mapping.
pub mod tokenizer;

/// Style vector providers and the bundled presets.
pub mod style;

/// Connectable character pairs used by the ligature control.
pub mod ligature;
