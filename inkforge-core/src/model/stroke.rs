use serde::{Deserialize, Serialize};

/// Width of a stroke tuple fed back into the model: Δx, Δy, down, up, end.
pub const STROKE_DIM: usize = 5;

/// Mutually exclusive pen states, in pen-logit order.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PenState {
	Down,
	Up,
	End,
}

impl PenState {
	/// Every state, indexed like the pen logits.
	pub const ALL: [PenState; 3] = [PenState::Down, PenState::Up, PenState::End];

	/// Position of this state in the pen logits.
	pub fn index(self) -> usize {
		match self {
			PenState::Down => 0,
			PenState::Up => 1,
			PenState::End => 2,
		}
	}

	/// State at logit position `index`.
	pub fn from_index(index: usize) -> Option<Self> {
		Self::ALL.get(index).copied()
	}
}

/// One timestep of pen motion.
///
/// Exactly one pen flag is set by construction: the pen is stored as a
/// single `PenState` and only expanded to three flags on the way out.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct StrokeTuple {
	pub dx: f32,
	pub dy: f32,
	pub pen: PenState,
}

impl StrokeTuple {
	pub fn new(dx: f32, dy: f32, pen: PenState) -> Self {
		Self { dx, dy, pen }
	}

	/// `(pen_down, pen_up, pen_end)` flags.
	pub fn flags(&self) -> [bool; 3] {
		let mut flags = [false; 3];
		flags[self.pen.index()] = true;
		flags
	}

	pub fn is_end(&self) -> bool {
		self.pen == PenState::End
	}

	/// Model input encoding: `[Δx, Δy, down, up, end]`.
	pub fn to_array(&self) -> [f32; STROKE_DIM] {
		let [down, up, end] = self.flags().map(|f| if f { 1.0 } else { 0.0 });
		[self.dx, self.dy, down, up, end]
	}
}

/// Model input for the very first timestep: no motion, no pen flag.
pub const ZERO_INPUT: [f32; STROKE_DIM] = [0.0; STROKE_DIM];

/// How a generation session ended.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
	/// The model sampled the end flag.
	Natural,
	/// The length cap was reached first.
	Truncated,
}

/// Tracks which character of the text a timestep belongs to.
///
/// Moves to the next character after a pen-up, or after `steps_per_char`
/// steps on the same one. Stays on the last character once there. Sampling
/// and training batches share this rule so both feed the model the same
/// token for the same stroke history.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CharacterCursor {
	len: usize,
	steps_per_char: usize,
	position: usize,
	steps: usize,
}

impl CharacterCursor {
	/// Cursor over a text of `len` characters. `steps_per_char = 0` never forces a move.
	pub fn new(len: usize, steps_per_char: usize) -> Self {
		Self { len, steps_per_char, position: 0, steps: 0 }
	}

	/// Index of the current character.
	pub fn position(&self) -> usize {
		self.position
	}

	/// Records one step drawn with `pen`; returns `true` if the cursor moved.
	pub fn advance(&mut self, pen: PenState) -> bool {
		self.steps += 1;
		let budget_spent = self.steps_per_char > 0 && self.steps >= self.steps_per_char;
		if !(pen == PenState::Up || budget_spent) || self.position + 1 >= self.len {
			return false;
		}
		self.position += 1;
		self.steps = 0;
		true
	}
}

/// Accumulates deltas into absolute pen positions, starting at the origin.
///
/// The returned vector has one point per tuple: the position after applying it.
pub fn to_absolute(strokes: &[StrokeTuple]) -> Vec<(f32, f32)> {
	strokes
		.iter()
		.scan((0.0f32, 0.0f32), |(x, y), s| {
			*x += s.dx;
			*y += s.dy;
			Some((*x, *y))
		})
		.collect()
}

/// Per-axis statistics removed by `normalize_deltas`.
///
/// The default is the identity (mean 0, std 1).
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct DeltaStats {
	pub mean: (f32, f32),
	pub std: (f32, f32),
}

impl Default for DeltaStats {
	fn default() -> Self {
		Self { mean: (0.0, 0.0), std: (1.0, 1.0) }
	}
}

/// Normalizes Δx and Δy in place to zero mean and unit variance.
///
/// An axis with zero variance is only centred.
/// Returns the statistics so generated deltas can be mapped back.
pub fn normalize_deltas(strokes: &mut [StrokeTuple]) -> DeltaStats {
	if strokes.is_empty() {
		return DeltaStats::default();
	}

	let n = strokes.len() as f32;
	let mean_x = strokes.iter().map(|s| s.dx).sum::<f32>() / n;
	let mean_y = strokes.iter().map(|s| s.dy).sum::<f32>() / n;
	let var_x = strokes.iter().map(|s| (s.dx - mean_x).powi(2)).sum::<f32>() / n;
	let var_y = strokes.iter().map(|s| (s.dy - mean_y).powi(2)).sum::<f32>() / n;
	let std_x = if var_x > 0.0 { var_x.sqrt() } else { 1.0 };
	let std_y = if var_y > 0.0 { var_y.sqrt() } else { 1.0 };

	let stats = DeltaStats { mean: (mean_x, mean_y), std: (std_x, std_y) };
	for s in strokes.iter_mut() {
		*s = stats.normalize(*s);
	}
	stats
}

impl DeltaStats {
	/// Maps one raw tuple into the normalized space.
	pub fn normalize(&self, stroke: StrokeTuple) -> StrokeTuple {
		StrokeTuple {
			dx: (stroke.dx - self.mean.0) / self.std.0,
			dy: (stroke.dy - self.mean.1) / self.std.1,
			pen: stroke.pen,
		}
	}

	/// Undoes `normalize_deltas` on one tuple.
	pub fn denormalize(&self, stroke: StrokeTuple) -> StrokeTuple {
		StrokeTuple {
			dx: stroke.dx * self.std.0 + self.mean.0,
			dy: stroke.dy * self.std.1 + self.mean.1,
			pen: stroke.pen,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn exactly_one_flag_is_set() {
		for pen in PenState::ALL {
			let stroke = StrokeTuple::new(0.5, -1.0, pen);
			assert_eq!(stroke.flags().iter().filter(|f| **f).count(), 1);
			assert_eq!(PenState::from_index(pen.index()), Some(pen));
		}
		assert_eq!(PenState::from_index(3), None);
	}

	#[test]
	fn model_encoding_is_one_hot() {
		let stroke = StrokeTuple::new(1.5, 2.0, PenState::Up);
		assert_eq!(stroke.to_array(), [1.5, 2.0, 0.0, 1.0, 0.0]);
	}

	#[test]
	fn absolute_positions_accumulate() {
		let strokes = [
			StrokeTuple::new(1.0, 0.0, PenState::Down),
			StrokeTuple::new(1.0, 2.0, PenState::Down),
			StrokeTuple::new(-0.5, 1.0, PenState::End),
		];
		assert_eq!(to_absolute(&strokes), vec![(1.0, 0.0), (2.0, 2.0), (1.5, 3.0)]);
	}

	#[test]
	fn normalization_round_trips() {
		let original = vec![
			StrokeTuple::new(2.0, 5.0, PenState::Down),
			StrokeTuple::new(4.0, 5.0, PenState::Up),
			StrokeTuple::new(6.0, 5.0, PenState::End),
		];
		let mut strokes = original.clone();
		let stats = normalize_deltas(&mut strokes);

		assert!((stats.mean.0 - 4.0).abs() < 1e-6);
		assert_eq!(stats.std.1, 1.0);
		let mean: f32 = strokes.iter().map(|s| s.dx).sum::<f32>() / 3.0;
		assert!(mean.abs() < 1e-6);
		for (restored, expected) in strokes.iter().zip(&original) {
			let restored = stats.denormalize(*restored);
			assert!((restored.dx - expected.dx).abs() < 1e-5);
			assert_eq!(restored.dy, expected.dy);
		}
	}

	#[test]
	fn cursor_follows_pen_ups_and_budget() {
		let mut cursor = CharacterCursor::new(3, 2);
		assert!(!cursor.advance(PenState::Down));
		assert!(cursor.advance(PenState::Down));
		assert_eq!(cursor.position(), 1);
		assert!(cursor.advance(PenState::Up));
		assert_eq!(cursor.position(), 2);
		assert!(!cursor.advance(PenState::Up));
		assert!(!cursor.advance(PenState::Down));
		assert_eq!(cursor.position(), 2);

		let mut unbounded = CharacterCursor::new(2, 0);
		for _ in 0..50 {
			unbounded.advance(PenState::Down);
		}
		assert_eq!(unbounded.position(), 0);
	}
}
