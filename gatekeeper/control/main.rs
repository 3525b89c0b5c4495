use anyhow::{bail, Context, Result};
use gatekeeper_induction::{
    config::{GatekeeperConfig, DEFAULT_MAX_STEPS, DEFAULT_REPLAN_LIMIT},
    Action, Outcome, PipelineTelemetry, RuleLibrary, SceneGraphExport, State, Verdict,
};
use serde::Serialize;
use serde_json::json;
use shared_logging::LogLevel;

use crate::{
    arbiter::{ArbitrationDecision, Arbiter, DecisionSource},
    recorder::EpisodeRecorder,
    seams::{ActionProposer, Environment, OutcomePredictor, ReplanFeedback},
};

/// One propose/predict/arbitrate round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attempt {
    /// Proposed action.
    pub action: Action,
    /// Predictor's verdict.
    pub predicted: Verdict,
    /// Final arbitrated verdict.
    pub verdict: Verdict,
    /// Which side produced `verdict`.
    pub source: DecisionSource,
}

/// Result of one control step.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    /// Step index within the episode.
    pub step: usize,
    /// Every attempt made, in order.
    pub attempts: Vec<Attempt>,
    /// Action handed to the environment.
    pub committed: Action,
    /// Whether the committed action was accepted by arbitration.
    pub accepted: bool,
    /// Hypothetical outcome: the final arbitration triple for the committed action.
    pub hypothetical: Outcome,
    /// Scene graph used for the final arbitration.
    pub scene_graph: SceneGraphExport,
}

impl StepRecord {
    /// Whether the replan budget ran out before an action was accepted.
    #[must_use]
    pub const fn exhausted(&self) -> bool {
        !self.accepted
    }
}

/// Summary of a full episode run.
#[derive(Debug, Clone, Serialize)]
pub struct EpisodeSummary {
    /// Steps executed.
    pub steps: usize,
    /// Steps committed without acceptance.
    pub exhausted_steps: usize,
    /// Whether the environment reported completion.
    pub completed: bool,
}

/// Gates each proposed action through the arbiter with a bounded replan budget.
#[derive(Debug, Clone)]
pub struct ControlLoop {
    arbiter: Arbiter,
    library: RuleLibrary,
    replan_limit: usize,
    max_steps: usize,
    telemetry: Option<PipelineTelemetry>,
}

impl ControlLoop {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> ControlLoopBuilder {
        ControlLoopBuilder::default()
    }

    /// Library used for arbitration.
    #[must_use]
    pub const fn library(&self) -> &RuleLibrary {
        &self.library
    }

    /// Swaps in a freshly merged library.
    pub fn set_library(&mut self, library: RuleLibrary) {
        self.library = library;
    }

    /// Attempts per step.
    #[must_use]
    pub const fn replan_limit(&self) -> usize {
        self.replan_limit
    }

    /// Arbitrates one proposed action against the current library.
    pub fn arbitrate(
        &mut self,
        state: &State,
        action: &Action,
        predicted: Verdict,
    ) -> ArbitrationDecision {
        self.arbiter.arbitrate(&self.library, state, action, predicted)
    }

    /// Runs propose → predict → arbitrate until an action is accepted or the
    /// replan budget is spent. On exhaustion the last proposal is committed anyway.
    pub fn step<P, Q>(
        &mut self,
        proposer: &mut P,
        predictor: &mut Q,
        state: &State,
        step: usize,
    ) -> Result<StepRecord>
    where
        P: ActionProposer + ?Sized,
        Q: OutcomePredictor + ?Sized,
    {
        let mut attempts: Vec<Attempt> = Vec::with_capacity(self.replan_limit);
        let mut feedback = ReplanFeedback::default();
        let mut last: Option<ArbitrationDecision> = None;

        for attempt in 0..self.replan_limit {
            feedback.attempt = attempt;
            let action = proposer
                .propose(state, &feedback)
                .with_context(|| format!("proposing action for step {step}, attempt {attempt}"))?;
            let predicted = predictor
                .predict(state, &action)
                .with_context(|| format!("predicting outcome of `{action}`"))?;
            let decision = self.arbitrate(state, &action, predicted);
            attempts.push(Attempt {
                action,
                predicted: decision.predictor.clone(),
                verdict: decision.verdict.clone(),
                source: decision.source,
            });
            if decision.accepted() {
                last = Some(decision);
                break;
            }
            let explanations: Vec<&str> = attempts
                .iter()
                .map(|a| a.verdict.explanation.as_str())
                .filter(|e| !e.is_empty())
                .collect();
            feedback.explanations = explanations.join(" ");
            feedback.suggestion.clone_from(&decision.verdict.suggestion);
            last = Some(decision);
        }

        let (Some(decision), Some(final_attempt)) = (last, attempts.last()) else {
            bail!("replan limit is zero; no action was proposed");
        };
        let accepted = decision.accepted();
        let committed = final_attempt.action.clone();
        if !accepted {
            if let Some(tel) = &self.telemetry {
                let _ = tel.log(
                    LogLevel::Warn,
                    "control.replan.exhausted",
                    json!({
                        "step": step,
                        "attempts": attempts.len(),
                        "committed": committed.to_string(),
                        "explanation": decision.verdict.explanation,
                    }),
                );
            }
        }
        if let Some(tel) = &self.telemetry {
            let _ = tel.event(
                "control.step.committed",
                json!({
                    "step": step,
                    "action": committed.to_string(),
                    "accepted": accepted,
                    "attempts": attempts.len(),
                }),
            );
        }
        Ok(StepRecord {
            step,
            attempts,
            committed,
            accepted,
            hypothetical: decision.verdict.into(),
            scene_graph: decision.context,
        })
    }

    /// Drives a full episode: observe, step, execute, record, until the
    /// environment is done or the step limit is reached.
    pub fn run_episode<E, P, Q>(
        &mut self,
        env: &mut E,
        proposer: &mut P,
        predictor: &mut Q,
        recorder: &mut EpisodeRecorder,
    ) -> Result<EpisodeSummary>
    where
        E: Environment + ?Sized,
        P: ActionProposer + ?Sized,
        Q: OutcomePredictor + ?Sized,
    {
        self.arbiter.reset();
        let mut summary = EpisodeSummary {
            steps: 0,
            exhausted_steps: 0,
            completed: false,
        };
        while summary.steps < self.max_steps && !env.is_done() {
            let state = env.observe().context("observing environment")?;
            let record = self.step(proposer, predictor, &state, summary.steps)?;
            let outcome = env
                .execute(&record.committed)
                .with_context(|| format!("executing `{}`", record.committed))?;
            if record.exhausted() {
                summary.exhausted_steps += 1;
            }
            recorder.record(state, &record, outcome);
            summary.steps += 1;
        }
        summary.completed = env.is_done();
        if let Some(tel) = &self.telemetry {
            let _ = tel.log(
                LogLevel::Info,
                "control.episode.finished",
                json!({
                    "episode": recorder.episode_id(),
                    "steps": summary.steps,
                    "exhausted_steps": summary.exhausted_steps,
                    "completed": summary.completed,
                }),
            );
        }
        Ok(summary)
    }
}

/// Builder for [`ControlLoop`].
#[derive(Debug, Clone)]
pub struct ControlLoopBuilder {
    library: RuleLibrary,
    replan_limit: usize,
    max_steps: usize,
    telemetry: Option<PipelineTelemetry>,
}

impl Default for ControlLoopBuilder {
    fn default() -> Self {
        Self {
            library: RuleLibrary::new(),
            replan_limit: DEFAULT_REPLAN_LIMIT,
            max_steps: DEFAULT_MAX_STEPS,
            telemetry: None,
        }
    }
}

impl ControlLoopBuilder {
    /// Sets telemetry.
    #[must_use]
    pub fn telemetry(mut self, telemetry: PipelineTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Sets the rule library.
    #[must_use]
    pub fn library(mut self, library: RuleLibrary) -> Self {
        self.library = library;
        self
    }

    /// Sets the number of attempts per step.
    #[must_use]
    pub fn replan_limit(mut self, limit: usize) -> Self {
        self.replan_limit = limit;
        self
    }

    /// Sets the step limit per episode.
    #[must_use]
    pub fn max_steps(mut self, steps: usize) -> Self {
        self.max_steps = steps;
        self
    }

    /// Applies `[control]` settings from a loaded configuration.
    #[must_use]
    pub fn config(mut self, config: &GatekeeperConfig) -> Self {
        self.replan_limit = config.control.replan_limit;
        self.max_steps = config.control.max_steps;
        self
    }

    /// Builds the loop.
    pub fn build(self) -> Result<ControlLoop> {
        if self.replan_limit == 0 {
            bail!("replan limit must be greater than zero");
        }
        Ok(ControlLoop {
            arbiter: Arbiter::new(self.telemetry.clone()),
            library: self.library,
            replan_limit: self.replan_limit,
            max_steps: self.max_steps,
            telemetry: self.telemetry,
        })
    }
}
