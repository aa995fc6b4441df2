use candle_nn::rnn::LSTMState;

/// Recurrent memory of one generation session.
///
/// One `(h, c)` pair per stacked layer. A value is produced by every model
/// step and handed to the next one; it is never shared between sessions.
///
/// # Invariants
/// - `layers.len()` equals the model's layer count
/// - every tensor has batch dimension 1
#[derive(Clone, Debug)]
pub struct HiddenState {
	layers: Vec<LSTMState>,
}

impl HiddenState {
	pub(crate) fn new(layers: Vec<LSTMState>) -> Self {
		Self { layers }
	}

	pub(crate) fn layers(&self) -> &[LSTMState] {
		&self.layers
	}

	/// Number of recurrent layers this state covers.
	pub fn depth(&self) -> usize {
		self.layers.len()
	}
}
