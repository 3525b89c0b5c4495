use serde::Serialize;
use serde_json::json;
use shared_logging::LogLevel;

use crate::classifier::TransitionStore;
use crate::model::TransitionKey;
use crate::rule::Rule;
use crate::telemetry::PipelineTelemetry;

/// Why a candidate was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectionReason {
    /// The rule returned `false` on a transition that actually succeeded.
    FalseFailure {
        /// Explanation the rule gave.
        explanation: String,
    },
    /// The rule raised an error.
    Error {
        /// Error message.
        message: String,
    },
}

/// A refused candidate and its first counterexample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    /// Rule name.
    pub rule: String,
    /// Transition that refuted it.
    pub key: TransitionKey,
    /// What happened.
    pub reason: RejectionReason,
}

/// Result of the soundness filter.
#[derive(Debug, Clone, Default)]
pub struct ValidityReport {
    /// Rules that passed every known success, in candidate order.
    pub valid: Vec<Rule>,
    /// Refused rules.
    pub rejected: Vec<Rejection>,
}

impl ValidityReport {
    /// Names of the valid rules.
    #[must_use]
    pub fn valid_names(&self) -> Vec<String> {
        self.valid.iter().map(|rule| rule.name().to_string()).collect()
    }
}

/// Keeps only candidates that never contradict a known success.
#[derive(Debug, Clone, Default)]
pub struct ValidityFilter {
    telemetry: Option<PipelineTelemetry>,
}

impl ValidityFilter {
    /// Creates a filter.
    #[must_use]
    pub const fn new(telemetry: Option<PipelineTelemetry>) -> Self {
        Self { telemetry }
    }

    /// A rule is valid iff it returns `true` (without error) on every
    /// agreement record whose ground truth is success.
    pub fn filter(&self, candidates: Vec<Rule>, agreement: &TransitionStore) -> ValidityReport {
        let mut report = ValidityReport::default();
        'candidates: for rule in candidates {
            for record in agreement.successful() {
                let transition = &record.transition;
                let reason = match rule.evaluate(&transition.state, &transition.action, &record.scene_graph) {
                    Ok(verdict) if verdict.success => continue,
                    Ok(verdict) => RejectionReason::FalseFailure {
                        explanation: verdict.explanation,
                    },
                    Err(err) => RejectionReason::Error {
                        message: err.to_string(),
                    },
                };
                tracing::debug!(rule = rule.name(), key = %record.key, "candidate rejected");
                report.rejected.push(Rejection {
                    rule: rule.name().to_string(),
                    key: record.key.clone(),
                    reason,
                });
                continue 'candidates;
            }
            report.valid.push(rule);
        }

        if let Some(tel) = &self.telemetry {
            for rejection in &report.rejected {
                let _ = tel.log(
                    LogLevel::Debug,
                    "induction.validity.rejected",
                    json!({
                        "rule": rejection.rule,
                        "key": rejection.key.to_string(),
                        "reason": rejection.reason,
                    }),
                );
            }
            let _ = tel.log(
                LogLevel::Info,
                "induction.validity.completed",
                json!({
                    "valid": report.valid_names(),
                    "rejected": report.rejected.len(),
                    "evidence": agreement.successful().count(),
                }),
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{Classification, ClassificationRecord};
    use crate::model::{Action, ActionKind, Outcome, State, Transition};
    use crate::rule::{RuleError, RuleOrigin, Verdict};
    use crate::scene_graph::SceneGraphExport;

    fn record(step: usize, action: Action, success: bool) -> ClassificationRecord {
        let outcome = if success {
            Outcome::success("done")
        } else {
            Outcome::failure("Nothing happens.", "")
        };
        ClassificationRecord {
            global_id: 0,
            key: TransitionKey::new("ep", step),
            classification: Classification::Agreement,
            transition: Transition::new(State::default(), action, outcome.clone()),
            predicted: outcome,
            scene_graph: SceneGraphExport::empty(),
        }
    }

    fn always(name: &str, kind: ActionKind, success: bool) -> Rule {
        Rule::new(name, kind, RuleOrigin::Catalog, name, move |_, _, _| {
            Ok(if success {
                Verdict::pass("fine")
            } else {
                Verdict::fail("refused", "")
            })
        })
    }

    #[test]
    fn counterexample_rejects_rule() {
        let mut agreement = TransitionStore::new();
        agreement.upsert(record(
            0,
            Action::new(ActionKind::Take).with_obj("apple 1").with_recep("countertop 1"),
            true,
        ));
        agreement.upsert(record(1, Action::new(ActionKind::Goto).with_recep("fridge 1"), true));

        let report = ValidityFilter::default().filter(
            vec![
                always("deny_take", ActionKind::Take, false),
                always("allow_take", ActionKind::Take, true),
                always("deny_clean", ActionKind::Clean, false),
            ],
            &agreement,
        );
        assert_eq!(report.valid_names(), vec!["allow_take", "deny_clean"]);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].rule, "deny_take");
        assert_eq!(report.rejected[0].key, TransitionKey::new("ep", 0));
    }

    #[test]
    fn failed_agreements_are_not_evidence() {
        let mut agreement = TransitionStore::new();
        agreement.upsert(record(0, Action::new(ActionKind::Open).with_recep("drawer 1"), false));
        let report =
            ValidityFilter::default().filter(vec![always("deny_open", ActionKind::Open, false)], &agreement);
        assert_eq!(report.valid.len(), 1);
    }

    #[test]
    fn erroring_rule_is_invalid() {
        let mut agreement = TransitionStore::new();
        agreement.upsert(record(0, Action::new(ActionKind::Open), true));
        let broken = Rule::new("broken", ActionKind::Open, RuleOrigin::Catalog, "broken", |_, _, _| {
            Err(RuleError::Evaluation("no receptacle".into()))
        });
        let report = ValidityFilter::default().filter(vec![broken], &agreement);
        assert!(report.valid.is_empty());
        assert!(matches!(report.rejected[0].reason, RejectionReason::Error { .. }));
    }

    #[test]
    fn empty_inputs_yield_empty_or_everything() {
        let filter = ValidityFilter::default();
        assert!(filter.filter(Vec::new(), &TransitionStore::new()).valid.is_empty());
        let report = filter.filter(
            vec![always("deny_take", ActionKind::Take, false)],
            &TransitionStore::new(),
        );
        assert_eq!(report.valid.len(), 1);
    }
}
