//! Mode a forward pass runs in

/// Whether a pass belongs to training or to evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Training,
    Evaluation,
}

/// Carried by every `Network::forward` call and reported to hooks.
///
/// Ranking statistics are gathered from evaluation passes only.
#[derive(Debug, Clone, Default)]
pub struct Context {
    mode: Mode,
}

impl Context {
    /// Training-mode context
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluation-mode context
    pub fn evaluation() -> Self {
        Self {
            mode: Mode::Evaluation,
        }
    }

    pub fn train(&mut self) {
        self.mode = Mode::Training;
    }

    pub fn eval(&mut self) {
        self.mode = Mode::Evaluation;
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_training(&self) -> bool {
        self.mode == Mode::Training
    }
}
