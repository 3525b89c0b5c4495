use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Action, ActionKind, Outcome, State};
use crate::scene_graph::SceneGraphExport;

/// Explanation, success verdict and suggestion produced by a rule or a predictor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// Why the action is (in)feasible.
    #[serde(default)]
    pub explanation: String,
    /// Whether the action is feasible.
    pub success: bool,
    /// What to do instead.
    #[serde(default)]
    pub suggestion: String,
}

impl Verdict {
    /// Feasible, with an explanation.
    #[must_use]
    pub fn pass(explanation: impl Into<String>) -> Self {
        Self {
            explanation: explanation.into(),
            success: true,
            suggestion: String::new(),
        }
    }

    /// Infeasible, with an explanation and suggestion.
    #[must_use]
    pub fn fail(explanation: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self {
            explanation: explanation.into(),
            success: false,
            suggestion: suggestion.into(),
        }
    }

    /// The `("", true, "")` triple returned for actions a rule does not govern.
    #[must_use]
    pub fn pass_through() -> Self {
        Self::pass("")
    }
}

impl From<Outcome> for Verdict {
    fn from(outcome: Outcome) -> Self {
        Self {
            explanation: outcome.feedback,
            success: outcome.success,
            suggestion: outcome.suggestion,
        }
    }
}

impl From<Verdict> for Outcome {
    fn from(verdict: Verdict) -> Self {
        Self {
            feedback: verdict.explanation,
            success: verdict.success,
            suggestion: verdict.suggestion,
        }
    }
}

/// Failures while building or evaluating a rule.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuleError {
    /// The action lacks an argument the rule reads.
    #[error("action `{kind}` is missing argument `{argument}`")]
    MissingArgument {
        /// Action kind.
        kind: ActionKind,
        /// Argument name.
        argument: &'static str,
    },
    /// A location referenced by the action is not present in the state.
    #[error("unknown location `{0}`")]
    UnknownLocation(String),
    /// A rule definition could not be interpreted.
    #[error("rule `{name}` is malformed: {reason}")]
    MalformedDefinition {
        /// Rule name.
        name: String,
        /// What is wrong.
        reason: String,
    },
    /// A rule references a catalog entry that does not exist.
    #[error("no catalog rule named `{0}`")]
    UnknownCatalogRule(String),
    /// Any other evaluation failure.
    #[error("evaluation failed: {0}")]
    Evaluation(String),
}

/// Signature of a rule body: `(state, action, context) -> verdict`.
pub type RulePredicate =
    dyn Fn(&State, &Action, &SceneGraphExport) -> Result<Verdict, RuleError> + Send + Sync;

/// Where a rule's definition came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOrigin {
    /// Native predicate resolved by name from the catalog.
    Catalog,
    /// Compiled from a declarative requirement list.
    Declarative,
}

/// Named, action-scoped feasibility predicate.
#[derive(Clone)]
pub struct Rule {
    name: String,
    action_kind: ActionKind,
    origin: RuleOrigin,
    definition: String,
    predicate: Arc<RulePredicate>,
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("action_kind", &self.action_kind)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

impl Rule {
    /// Wraps a predicate as a rule governing `action_kind`.
    pub fn new<F>(
        name: impl Into<String>,
        action_kind: ActionKind,
        origin: RuleOrigin,
        definition: impl Into<String>,
        predicate: F,
    ) -> Self
    where
        F: Fn(&State, &Action, &SceneGraphExport) -> Result<Verdict, RuleError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            action_kind,
            origin,
            definition: definition.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Unique rule name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Action kind the rule governs.
    #[must_use]
    pub const fn action_kind(&self) -> &ActionKind {
        &self.action_kind
    }

    /// Definition origin.
    #[must_use]
    pub const fn origin(&self) -> RuleOrigin {
        self.origin
    }

    /// Source text the rule was built from (catalog name or TOML spec).
    #[must_use]
    pub fn definition(&self) -> &str {
        &self.definition
    }

    /// Evaluates the rule. Actions of another kind pass through untouched.
    pub fn evaluate(
        &self,
        state: &State,
        action: &Action,
        context: &SceneGraphExport,
    ) -> Result<Verdict, RuleError> {
        if action.kind != self.action_kind {
            return Ok(Verdict::pass_through());
        }
        (self.predicate)(state, action, context)
    }
}

/// Result of running an ordered rule list against one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainOutcome {
    /// Combined verdict.
    pub verdict: Verdict,
    /// Rule whose verdict was returned, if any rule evaluated cleanly.
    pub decided_by: Option<String>,
    /// Rules that raised an error and were skipped.
    pub skipped: Vec<(String, RuleError)>,
}

/// Evaluates rules in order.
///
/// The first failing verdict is returned immediately. When every rule passes,
/// the verdict of the last rule evaluated is returned. Rules that error are
/// skipped; if nothing evaluated cleanly the result is the pass-through triple.
pub fn evaluate_chain(
    rules: &[Rule],
    state: &State,
    action: &Action,
    context: &SceneGraphExport,
) -> ChainOutcome {
    let mut verdict = Verdict::pass_through();
    let mut decided_by = None;
    let mut skipped = Vec::new();
    for rule in rules {
        match rule.evaluate(state, action, context) {
            Ok(current) => {
                let failed = !current.success;
                verdict = current;
                decided_by = Some(rule.name().to_string());
                if failed {
                    break;
                }
            }
            Err(err) => {
                tracing::debug!(rule = rule.name(), error = %err, "rule skipped");
                skipped.push((rule.name().to_string(), err));
            }
        }
    }
    ChainOutcome {
        verdict,
        decided_by,
        skipped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(name: &str, kind: ActionKind, verdict: Verdict) -> Rule {
        Rule::new(name, kind, RuleOrigin::Catalog, name, move |_, _, _| {
            Ok(verdict.clone())
        })
    }

    fn erroring(name: &str) -> Rule {
        Rule::new(name, ActionKind::Open, RuleOrigin::Catalog, name, |_, _, _| {
            Err(RuleError::Evaluation("boom".into()))
        })
    }

    fn open() -> Action {
        Action::new(ActionKind::Open).with_recep("cabinet 1")
    }

    #[test]
    fn other_kinds_pass_through() {
        let rule = fixed("deny_open", ActionKind::Open, Verdict::fail("no", "wait"));
        let verdict = rule
            .evaluate(
                &State::default(),
                &Action::new(ActionKind::Goto).with_recep("cabinet 1"),
                &SceneGraphExport::empty(),
            )
            .unwrap();
        assert_eq!(verdict, Verdict::pass_through());
    }

    #[test]
    fn first_failure_wins() {
        let rules = vec![
            fixed("a", ActionKind::Open, Verdict::pass("a ok")),
            fixed("b", ActionKind::Open, Verdict::fail("b says no", "do b")),
            fixed("c", ActionKind::Open, Verdict::fail("c says no", "do c")),
        ];
        let outcome = evaluate_chain(&rules, &State::default(), &open(), &SceneGraphExport::empty());
        assert_eq!(outcome.verdict, Verdict::fail("b says no", "do b"));
        assert_eq!(outcome.decided_by.as_deref(), Some("b"));
    }

    #[test]
    fn all_pass_returns_last_evaluated() {
        let rules = vec![
            fixed("a", ActionKind::Open, Verdict::pass("a ok")),
            fixed("b", ActionKind::Open, Verdict::pass("b ok")),
            erroring("c"),
        ];
        let outcome = evaluate_chain(&rules, &State::default(), &open(), &SceneGraphExport::empty());
        assert_eq!(outcome.verdict, Verdict::pass("b ok"));
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].0, "c");
    }

    #[test]
    fn empty_or_erroring_chain_passes_through() {
        let empty = evaluate_chain(&[], &State::default(), &open(), &SceneGraphExport::empty());
        assert_eq!(empty.verdict, Verdict::pass_through());
        assert!(empty.decided_by.is_none());

        let broken = evaluate_chain(
            &[erroring("x"), erroring("y")],
            &State::default(),
            &open(),
            &SceneGraphExport::empty(),
        );
        assert_eq!(broken.verdict, Verdict::pass_through());
        assert_eq!(broken.skipped.len(), 2);
    }

    #[test]
    fn verdict_converts_from_outcome() {
        let verdict = Verdict::from(Outcome::failure("closed", "open it first"));
        assert!(!verdict.success);
        assert_eq!(Outcome::from(verdict).suggestion, "open it first");
    }
}
