use gatekeeper_induction::{
    classifier::SceneGraphHistory, EpisodeInput, Outcome, Rule, State, Trajectory, Transition,
};

use crate::runtime::StepRecord;

/// Accumulates the real and hypothetical trajectories of one episode.
#[derive(Debug, Clone, Default)]
pub struct EpisodeRecorder {
    episode_id: String,
    real: Trajectory,
    hypothetical: Trajectory,
    history: SceneGraphHistory,
}

impl EpisodeRecorder {
    /// Starts an empty recording.
    #[must_use]
    pub fn new(episode_id: impl Into<String>) -> Self {
        Self {
            episode_id: episode_id.into(),
            ..Self::default()
        }
    }

    /// Episode identifier.
    #[must_use]
    pub fn episode_id(&self) -> &str {
        &self.episode_id
    }

    /// Steps recorded so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.real.len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.real.is_empty()
    }

    /// Ground-truth trajectory.
    #[must_use]
    pub const fn real(&self) -> &Trajectory {
        &self.real
    }

    /// Arbitrated trajectory.
    #[must_use]
    pub const fn hypothetical(&self) -> &Trajectory {
        &self.hypothetical
    }

    /// Records the committed action of a step with both its predicted and real outcome.
    pub fn record(&mut self, state: State, step: &StepRecord, outcome: Outcome) {
        let index = self.real.len();
        self.hypothetical.push(Transition::new(
            state.clone(),
            step.committed.clone(),
            step.hypothetical.clone(),
        ));
        self.real
            .push(Transition::new(state, step.committed.clone(), outcome));
        self.history.insert(index, step.scene_graph.clone());
    }

    /// Hands the recording to the induction pipeline.
    #[must_use]
    pub fn into_input(self, candidates: Vec<Rule>) -> EpisodeInput {
        EpisodeInput {
            episode_id: self.episode_id,
            real: self.real,
            hypothetical: self.hypothetical,
            scene_history: self.history,
            candidates,
        }
    }
}
