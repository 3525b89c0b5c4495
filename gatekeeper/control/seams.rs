use anyhow::Result;
use gatekeeper_induction::{Action, Outcome, State, Verdict};

/// Feedback handed back to the proposer after a rejected attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplanFeedback {
    /// Zero-based attempt index within the step.
    pub attempt: usize,
    /// Explanations of every earlier rejected attempt, joined with a space.
    pub explanations: String,
    /// Suggestion attached to the latest rejection.
    pub suggestion: String,
}

/// The agent that proposes the next action.
pub trait ActionProposer {
    /// Proposes an action for `state`, taking earlier rejections into account.
    fn propose(&mut self, state: &State, feedback: &ReplanFeedback) -> Result<Action>;
}

/// The stochastic predictor whose verdicts the rule library cross-checks.
pub trait OutcomePredictor {
    /// Predicts whether `action` will succeed in `state`.
    fn predict(&mut self, state: &State, action: &Action) -> Result<Verdict>;
}

/// The environment actions are executed in.
pub trait Environment {
    /// Current observed state.
    fn observe(&mut self) -> Result<State>;
    /// Executes an action and returns the ground-truth outcome.
    fn execute(&mut self, action: &Action) -> Result<Outcome>;
    /// Whether the task is finished.
    fn is_done(&self) -> bool;
}
