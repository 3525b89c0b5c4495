use serde_json::json;
use shared_logging::LogLevel;

use crate::classifier::TransitionStore;
use crate::model::TransitionKey;
use crate::rule::Rule;
use crate::telemetry::PipelineTelemetry;

/// Boolean matrix: rows are rules, columns are disagreement transitions.
///
/// Cell `(r, t)` is set iff rule `r` evaluates cleanly on `t` and its verdict
/// equals `t`'s ground-truth success. Errors count as not covering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageMatrix {
    columns: Vec<TransitionKey>,
    cells: Vec<Vec<bool>>,
}

impl CoverageMatrix {
    /// Evaluates every rule against every disagreement record.
    #[must_use]
    pub fn build(rules: &[Rule], disagreement: &TransitionStore) -> Self {
        let columns = disagreement.iter().map(|record| record.key.clone()).collect();
        let cells = rules
            .iter()
            .map(|rule| {
                disagreement
                    .iter()
                    .map(|record| {
                        let transition = &record.transition;
                        rule.evaluate(&transition.state, &transition.action, &record.scene_graph)
                            .is_ok_and(|verdict| verdict.success == transition.outcome.success)
                    })
                    .collect()
            })
            .collect();
        Self { columns, cells }
    }

    /// Number of rule rows.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.cells.len()
    }

    /// Column keys in disagreement-store order.
    #[must_use]
    pub fn columns(&self) -> &[TransitionKey] {
        &self.columns
    }

    /// Whether rule `row` covers column `col`.
    #[must_use]
    pub fn covers(&self, row: usize, col: usize) -> bool {
        self.cells
            .get(row)
            .and_then(|cells| cells.get(col))
            .copied()
            .unwrap_or(false)
    }

    fn gain(&self, row: usize, covered: &[bool]) -> usize {
        self.cells[row]
            .iter()
            .zip(covered)
            .filter(|(hit, done)| **hit && !**done)
            .count()
    }
}

/// One greedy pick.
#[derive(Debug, Clone)]
pub struct SelectedRule {
    /// Chosen rule.
    pub rule: Rule,
    /// Newly covered columns at the time of the pick.
    pub marginal_gain: usize,
    /// Row index of the rule among the valid candidates.
    pub row: usize,
}

/// Ordered greedy selection with its achieved coverage.
#[derive(Debug, Clone, Default)]
pub struct CoverageSelection {
    /// Picks in pick order.
    pub selected: Vec<SelectedRule>,
    /// Columns covered by the selection.
    pub covered: usize,
    /// Total disagreement columns.
    pub total: usize,
}

impl CoverageSelection {
    /// Covered fraction; `0.0` when there was nothing to cover.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn coverage(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.covered as f64 / self.total as f64
        }
    }

    /// Selected rules in pick order.
    #[must_use]
    pub fn rules(&self) -> Vec<Rule> {
        self.selected.iter().map(|pick| pick.rule.clone()).collect()
    }

    /// Selected rule names in pick order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.selected
            .iter()
            .map(|pick| pick.rule.name().to_string())
            .collect()
    }
}

/// Greedy maximum-coverage selection under a rule budget.
#[derive(Debug, Clone)]
pub struct CoverageSelector {
    budget: usize,
    telemetry: Option<PipelineTelemetry>,
}

impl CoverageSelector {
    /// Creates a selector keeping at most `budget` rules.
    #[must_use]
    pub const fn new(budget: usize, telemetry: Option<PipelineTelemetry>) -> Self {
        Self { budget, telemetry }
    }

    /// Maximum number of rules selected.
    #[must_use]
    pub const fn budget(&self) -> usize {
        self.budget
    }

    /// Picks rules by strictly largest marginal gain, lowest row on ties.
    ///
    /// Stops when the best gain is zero, every column is covered, or the
    /// budget is reached.
    pub fn select(&self, valid: &[Rule], disagreement: &TransitionStore) -> CoverageSelection {
        if disagreement.is_empty() {
            return CoverageSelection::default();
        }
        let matrix = CoverageMatrix::build(valid, disagreement);
        let total = matrix.columns().len();
        let mut covered = vec![false; total];
        let mut taken = vec![false; matrix.rows()];
        let mut selection = CoverageSelection {
            total,
            ..CoverageSelection::default()
        };

        while selection.selected.len() < self.budget && selection.covered < total {
            let mut best: Option<(usize, usize)> = None;
            for row in (0..matrix.rows()).filter(|row| !taken[*row]) {
                let gain = matrix.gain(row, &covered);
                match best {
                    Some((_, best_gain)) if gain <= best_gain => {}
                    _ => best = Some((row, gain)),
                }
            }
            let Some((row, gain)) = best.filter(|(_, gain)| *gain > 0) else {
                break;
            };
            for (col, done) in covered.iter_mut().enumerate() {
                if matrix.covers(row, col) {
                    *done = true;
                }
            }
            taken[row] = true;
            selection.covered += gain;
            selection.selected.push(SelectedRule {
                rule: valid[row].clone(),
                marginal_gain: gain,
                row,
            });
        }

        if let Some(tel) = &self.telemetry {
            let picks: Vec<_> = selection
                .selected
                .iter()
                .map(|pick| json!({ "rule": pick.rule.name(), "gain": pick.marginal_gain }))
                .collect();
            let _ = tel.log(
                LogLevel::Info,
                "induction.coverage.selected",
                json!({
                    "picks": picks,
                    "covered": selection.covered,
                    "total": selection.total,
                    "budget": self.budget,
                }),
            );
        }
        selection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{Classification, ClassificationRecord};
    use crate::model::{Action, ActionKind, LocationContents, Outcome, State, Status, Transition};
    use crate::rule::{RuleError, RuleOrigin, Verdict};
    use crate::scene_graph::SceneGraphExport;

    fn failed_open(step: usize, recep: &str, status: Status) -> ClassificationRecord {
        let mut state = State::default();
        state.items_in_locations.insert(
            recep.to_string(),
            LocationContents {
                items: vec![],
                status,
            },
        );
        ClassificationRecord {
            global_id: 0,
            key: TransitionKey::new("ep", step),
            classification: Classification::Disagreement,
            transition: Transition::new(
                state,
                Action::new(ActionKind::Open).with_recep(recep),
                Outcome::failure("Nothing happens.", ""),
            ),
            predicted: Outcome::success("opened"),
            scene_graph: SceneGraphExport::empty(),
        }
    }

    fn open_requires_closed() -> Rule {
        Rule::new("R1", ActionKind::Open, RuleOrigin::Catalog, "R1", |state, action, _| {
            let recep = action.recep().unwrap_or_default();
            let closed = state
                .location(recep)
                .is_some_and(|contents| contents.status == Status::Closed);
            Ok(if closed {
                Verdict::pass("closed")
            } else {
                Verdict::fail("not closed", "close it")
            })
        })
    }

    fn always_pass(name: &str) -> Rule {
        Rule::new(name, ActionKind::Open, RuleOrigin::Catalog, name, |_, _, _| {
            Ok(Verdict::pass("fine"))
        })
    }

    fn three_failed_opens() -> TransitionStore {
        let mut store = TransitionStore::new();
        store.upsert(failed_open(0, "cabinet 1", Status::Open));
        store.upsert(failed_open(1, "drawer 1", Status::Unknown));
        store.upsert(failed_open(2, "fridge 1", Status::Open));
        store
    }

    #[test]
    fn budget_of_one_picks_full_cover() {
        let selection = CoverageSelector::new(1, None).select(
            &[always_pass("R2"), open_requires_closed()],
            &three_failed_opens(),
        );
        assert_eq!(selection.names(), vec!["R1"]);
        assert_eq!(selection.selected[0].marginal_gain, 3);
        assert_eq!(selection.selected[0].row, 1);
        assert!((selection.coverage() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn ties_go_to_lowest_row_and_zero_gain_stops() {
        let disagreement = three_failed_opens();
        let selection = CoverageSelector::new(5, None).select(
            &[
                always_pass("R0"),
                open_requires_closed(),
                Rule::new("R1b", ActionKind::Open, RuleOrigin::Catalog, "R1b", |_, _, _| {
                    Ok(Verdict::fail("never", ""))
                }),
            ],
            &disagreement,
        );
        assert_eq!(selection.names(), vec!["R1"]);
        assert_eq!(selection.covered, 3);
    }

    #[test]
    fn greedy_respects_marginal_gain() {
        let disagreement = three_failed_opens();
        let only = |name: &'static str, hit: &'static [&'static str]| {
            Rule::new(name, ActionKind::Open, RuleOrigin::Catalog, name, move |_, action, _| {
                let recep = action.recep().unwrap_or_default();
                Ok(if hit.iter().any(|h| *h == recep) {
                    Verdict::fail("blocked", "")
                } else {
                    Verdict::pass("ok")
                })
            })
        };
        let erroring = Rule::new("E", ActionKind::Open, RuleOrigin::Catalog, "E", |_, _, _| {
            Err(RuleError::Evaluation("boom".into()))
        });
        let rules = [
            erroring,
            only("A", &["cabinet 1"]),
            only("B", &["cabinet 1", "drawer 1"]),
            only("C", &["fridge 1"]),
        ];
        let matrix = CoverageMatrix::build(&rules, &disagreement);
        assert!(!matrix.covers(0, 0));
        assert!(matrix.covers(2, 1));

        let selection = CoverageSelector::new(5, None).select(&rules, &disagreement);
        assert_eq!(selection.names(), vec!["B", "C"]);
        let gains: Vec<_> = selection.selected.iter().map(|pick| pick.marginal_gain).collect();
        assert_eq!(gains, vec![2, 1]);

        let capped = CoverageSelector::new(1, None).select(&rules, &disagreement);
        assert_eq!(capped.names(), vec!["B"]);
        assert!((capped.coverage() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn empty_disagreement_selects_nothing() {
        let selection =
            CoverageSelector::new(5, None).select(&[always_pass("R2")], &TransitionStore::new());
        assert!(selection.selected.is_empty());
        assert!(selection.coverage().abs() < f64::EPSILON);
    }
}
