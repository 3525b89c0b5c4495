use gatekeeper_induction::{
    evaluate_chain, Action, RuleLibrary, SceneGraph, SceneGraphExport, State, Verdict,
};
use gatekeeper_induction::PipelineTelemetry;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;

/// Which side produced the final triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// The library was empty; the predictor's triple was used unchanged.
    Predictor,
    /// The rule chain's triple was used.
    RuleChain,
}

/// Outcome of arbitrating one proposed action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArbitrationDecision {
    /// Final explanation, verdict and suggestion.
    pub verdict: Verdict,
    /// Source of `verdict`.
    pub source: DecisionSource,
    /// What the predictor said.
    pub predictor: Verdict,
    /// Rule that decided the chain, when one did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    /// Rules skipped because they errored.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<String>,
    /// Scene graph the rules were evaluated against.
    pub context: SceneGraphExport,
}

impl ArbitrationDecision {
    /// Whether the action may be executed.
    #[must_use]
    pub const fn accepted(&self) -> bool {
        self.verdict.success
    }

    /// Whether the rule chain and the predictor reached the same verdict.
    #[must_use]
    pub fn agrees_with_predictor(&self) -> bool {
        self.verdict.success == self.predictor.success
    }
}

/// Reconciles predictor output with the rule library, keeping the scene graph current.
#[derive(Debug, Clone, Default)]
pub struct Arbiter {
    graph: SceneGraph,
    telemetry: Option<PipelineTelemetry>,
}

impl Arbiter {
    /// Creates an arbiter with an empty scene graph.
    #[must_use]
    pub fn new(telemetry: Option<PipelineTelemetry>) -> Self {
        Self {
            graph: SceneGraph::new(),
            telemetry,
        }
    }

    /// Current scene-graph snapshot.
    #[must_use]
    pub fn snapshot(&self) -> SceneGraphExport {
        self.graph.export()
    }

    /// Drops everything the graph has accumulated, for a new episode.
    pub fn reset(&mut self) {
        self.graph = SceneGraph::new();
    }

    /// Folds `state` into the scene graph, then decides.
    ///
    /// With an empty library the predictor's triple is returned unchanged.
    /// Otherwise the rule chain's triple is returned, whether or not it agrees
    /// with the predictor.
    pub fn arbitrate(
        &mut self,
        library: &RuleLibrary,
        state: &State,
        action: &Action,
        predicted: Verdict,
    ) -> ArbitrationDecision {
        self.graph.update(state);
        let context = self.graph.export();

        let decision = if library.is_empty() {
            ArbitrationDecision {
                verdict: predicted.clone(),
                source: DecisionSource::Predictor,
                predictor: predicted,
                decided_by: None,
                skipped: Vec::new(),
                context,
            }
        } else {
            let chain = evaluate_chain(library.rules(), state, action, &context);
            ArbitrationDecision {
                verdict: chain.verdict,
                source: DecisionSource::RuleChain,
                predictor: predicted,
                decided_by: chain.decided_by,
                skipped: chain.skipped.into_iter().map(|(name, _)| name).collect(),
                context,
            }
        };

        if let Some(tel) = &self.telemetry {
            let _ = tel.log(
                LogLevel::Debug,
                "control.arbitration.decided",
                json!({
                    "action": action.to_string(),
                    "source": decision.source,
                    "accepted": decision.accepted(),
                    "predictor_success": decision.predictor.success,
                    "decided_by": decision.decided_by,
                    "skipped": decision.skipped,
                }),
            );
        }
        decision
    }
}
