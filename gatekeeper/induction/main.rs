use anyhow::{bail, Context, Result};
use serde::Serialize;
use serde_json::json;
use shared_logging::LogLevel;

use crate::{
    catalog::RuleCatalog,
    classifier::{SceneGraphHistory, TransitionClassifier, TransitionStore},
    config::{GatekeeperConfig, DEFAULT_BUDGET},
    coverage::CoverageSelector,
    model::Trajectory,
    registry::{merge, ManifestEntry, RuleLibrary},
    rule::Rule,
    store::PipelineStore,
    telemetry::PipelineTelemetry,
    validity::{Rejection, ValidityFilter},
};

/// Cumulative state carried from one episode to the next.
#[derive(Debug, Clone, Default)]
pub struct InductionState {
    /// Transitions where the predictor was right.
    pub agreement: TransitionStore,
    /// Transitions where the predictor was wrong.
    pub disagreement: TransitionStore,
    /// Current rule library.
    pub library: RuleLibrary,
    /// Persisted entries this build could not resolve; saved back as they were.
    pub unresolved: Vec<ManifestEntry>,
}

/// Everything one episode contributes.
#[derive(Debug, Clone, Default)]
pub struct EpisodeInput {
    /// Episode identifier.
    pub episode_id: String,
    /// Ground-truth trajectory.
    pub real: Trajectory,
    /// Predictor's hypothetical trajectory.
    pub hypothetical: Trajectory,
    /// Scene-graph snapshot per step.
    pub scene_history: SceneGraphHistory,
    /// Candidate rules proposed for this episode.
    pub candidates: Vec<Rule>,
}

/// A selected rule as reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectionEntry {
    /// Rule name.
    pub rule: String,
    /// Newly covered disagreement transitions when picked.
    pub marginal_gain: usize,
}

/// Summary of one episode's induction run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EpisodeReport {
    /// Episode identifier.
    pub episode_id: String,
    /// Steps compared.
    pub compared: usize,
    /// Agreeing steps in this episode.
    pub agreement: usize,
    /// Disagreeing steps in this episode.
    pub disagreement: usize,
    /// Cumulative agreement size after classification.
    pub cumulative_agreement: usize,
    /// Cumulative disagreement size after classification.
    pub cumulative_disagreement: usize,
    /// Candidates that survived the validity filter.
    pub valid: Vec<String>,
    /// Candidates refused by the validity filter.
    pub rejected: Vec<Rejection>,
    /// Greedy picks in pick order.
    pub selected: Vec<SelectionEntry>,
    /// Fraction of the cumulative disagreement set covered by the picks.
    pub coverage: f64,
    /// Library names after the merge.
    pub library: Vec<String>,
}

/// Classify, filter, select and merge for one episode at a time.
#[derive(Debug, Clone)]
pub struct InductionPipeline {
    classifier: TransitionClassifier,
    filter: ValidityFilter,
    selector: CoverageSelector,
    telemetry: Option<PipelineTelemetry>,
}

impl InductionPipeline {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> InductionPipelineBuilder {
        InductionPipelineBuilder::default()
    }

    /// Selection budget in use.
    #[must_use]
    pub const fn budget(&self) -> usize {
        self.selector.budget()
    }

    /// Runs one episode against the cumulative state and returns the updated state.
    ///
    /// The validity filter sees the updated agreement set and the selector
    /// the updated disagreement set, so this episode's evidence counts.
    #[must_use]
    pub fn run_episode(
        &self,
        state: InductionState,
        input: EpisodeInput,
    ) -> (InductionState, EpisodeReport) {
        let InductionState {
            mut agreement,
            mut disagreement,
            library,
            unresolved,
        } = state;
        let EpisodeInput {
            episode_id,
            real,
            hypothetical,
            scene_history,
            candidates,
        } = input;

        let classified = self.classifier.classify(
            &episode_id,
            &real,
            &hypothetical,
            &scene_history,
            &mut agreement,
            &mut disagreement,
        );
        let validity = self.filter.filter(candidates, &agreement);
        let selection = self.selector.select(&validity.valid, &disagreement);
        let library = merge(library.rules(), &selection.rules());

        let report = EpisodeReport {
            episode_id,
            compared: classified.compared,
            agreement: classified.agreement.len(),
            disagreement: classified.disagreement.len(),
            cumulative_agreement: agreement.len(),
            cumulative_disagreement: disagreement.len(),
            valid: validity.valid_names(),
            rejected: validity.rejected,
            selected: selection
                .selected
                .iter()
                .map(|pick| SelectionEntry {
                    rule: pick.rule.name().to_string(),
                    marginal_gain: pick.marginal_gain,
                })
                .collect(),
            coverage: selection.coverage(),
            library: library.names(),
        };

        if let Some(tel) = &self.telemetry {
            let _ = tel.log(
                LogLevel::Info,
                "induction.library.merged",
                json!({
                    "episode": report.episode_id,
                    "selected": selection.names(),
                    "library": report.library,
                }),
            );
            let _ = tel.event(
                "induction.library.merged",
                json!({
                    "episode": report.episode_id,
                    "coverage": report.coverage,
                    "library": report.library.len(),
                }),
            );
        }

        (
            InductionState {
                agreement,
                disagreement,
                library,
                unresolved,
            },
            report,
        )
    }

    /// Loads the cumulative state from `store`, runs the episode and saves everything back,
    /// including the episode's scene-graph snapshots.
    pub fn run_persisted(
        &self,
        store: &PipelineStore,
        catalog: &RuleCatalog,
        input: EpisodeInput,
    ) -> Result<EpisodeReport> {
        let (state, loaded) = store
            .load_state(catalog)
            .context("loading cumulative induction state")?;
        if !loaded.rejected.is_empty() {
            if let Some(tel) = &self.telemetry {
                let names: Vec<_> = loaded.rejected.iter().map(|(name, _)| name).collect();
                let _ = tel.log(
                    LogLevel::Warn,
                    "induction.library.skipped",
                    json!({ "rules": names }),
                );
            }
        }
        store
            .save_scene_history(&input.episode_id, &input.scene_history)
            .with_context(|| format!("saving scene graphs for {}", input.episode_id))?;
        let (state, report) = self.run_episode(state, input);
        store
            .save_state(&state)
            .context("saving cumulative induction state")?;
        Ok(report)
    }
}

/// Builder for [`InductionPipeline`].
#[derive(Debug, Clone)]
pub struct InductionPipelineBuilder {
    telemetry: Option<PipelineTelemetry>,
    budget: usize,
}

impl Default for InductionPipelineBuilder {
    fn default() -> Self {
        Self {
            telemetry: None,
            budget: DEFAULT_BUDGET,
        }
    }
}

impl InductionPipelineBuilder {
    /// Sets telemetry.
    #[must_use]
    pub fn telemetry(mut self, telemetry: PipelineTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Sets the selection budget.
    #[must_use]
    pub fn budget(mut self, budget: usize) -> Self {
        self.budget = budget;
        self
    }

    /// Applies settings from a loaded configuration.
    #[must_use]
    pub fn config(mut self, config: &GatekeeperConfig) -> Self {
        self.budget = config.selection.budget;
        self
    }

    /// Builds the pipeline.
    pub fn build(self) -> Result<InductionPipeline> {
        if self.budget == 0 {
            bail!("selection budget must be greater than zero");
        }
        Ok(InductionPipeline {
            classifier: TransitionClassifier::new(self.telemetry.clone()),
            filter: ValidityFilter::new(self.telemetry.clone()),
            selector: CoverageSelector::new(self.budget, self.telemetry.clone()),
            telemetry: self.telemetry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::standard_specs;
    use crate::model::{
        Action, ActionKind, LocationContents, Outcome, Position, State, Status, Transition,
    };
    use crate::rule::RuleOrigin;
    use crate::scene_graph::SceneGraph;
    use shared_event_bus::MemoryEventBus;
    use std::{fs, sync::Arc};
    use tempfile::tempdir;

    fn at_cabinet(status: Status) -> State {
        let mut state = State {
            reachable_locations: vec!["cabinet 1".into()],
            current_position: Position {
                location_name: Some("cabinet 1".into()),
                status: Status::Unknown,
            },
            ..State::default()
        };
        state.items_in_locations.insert(
            "cabinet 1".into(),
            LocationContents {
                items: vec![],
                status,
            },
        );
        state
    }

    fn open_step(status: Status, success: bool) -> Transition {
        let outcome = if success {
            Outcome::success("You open the cabinet 1.")
        } else {
            Outcome::failure("Nothing happens.", "")
        };
        Transition::new(
            at_cabinet(status),
            Action::new(ActionKind::Open).with_recep("cabinet 1"),
            outcome,
        )
    }

    fn candidates() -> Vec<Rule> {
        let open_spec = standard_specs()
            .into_iter()
            .find(|spec| spec.name == "open_requires_closed_receptacle")
            .unwrap();
        vec![
            RuleCatalog::builtin()
                .resolve("goto_requires_new_reachable_target")
                .unwrap(),
            open_spec.compile().unwrap(),
        ]
    }

    fn episode(id: &str) -> EpisodeInput {
        EpisodeInput {
            episode_id: id.to_string(),
            real: [
                open_step(Status::Closed, true),
                open_step(Status::Open, false),
                open_step(Status::Open, false),
            ]
            .into_iter()
            .collect(),
            hypothetical: [
                open_step(Status::Closed, true),
                open_step(Status::Open, true),
                open_step(Status::Open, true),
            ]
            .into_iter()
            .collect(),
            scene_history: SceneGraphHistory::new(),
            candidates: candidates(),
        }
    }

    #[test]
    fn episode_selects_and_merges() {
        let pipeline = InductionPipeline::builder().budget(1).build().unwrap();
        let (state, report) = pipeline.run_episode(InductionState::default(), episode("ep-1"));
        assert_eq!(report.agreement, 1);
        assert_eq!(report.disagreement, 2);
        assert_eq!(report.valid.len(), 2);
        assert_eq!(
            report.selected,
            vec![SelectionEntry {
                rule: "open_requires_closed_receptacle".into(),
                marginal_gain: 2,
            }]
        );
        assert!((report.coverage - 1.0).abs() < f64::EPSILON);
        assert_eq!(state.library.names(), vec!["open_requires_closed_receptacle"]);

        let (again, second) = pipeline.run_episode(state, episode("ep-1"));
        assert_eq!(second.cumulative_disagreement, 2);
        assert_eq!(again.library.len(), 1);
    }

    #[test]
    fn empty_episode_keeps_library() {
        let pipeline = InductionPipeline::builder().build().unwrap();
        let (state, _) = pipeline.run_episode(InductionState::default(), episode("ep-1"));
        let (state, report) = pipeline.run_episode(
            state,
            EpisodeInput {
                episode_id: "ep-2".into(),
                ..EpisodeInput::default()
            },
        );
        assert!(report.selected.is_empty());
        assert_eq!(report.cumulative_disagreement, 2);
        assert_eq!(state.library.len(), 1);
    }

    #[test]
    fn unresolvable_library_entries_survive_a_persisted_run() {
        let dir = tempdir().unwrap();
        let store = PipelineStore::open(dir.path()).unwrap();
        let catalog = RuleCatalog::builtin();
        let foreign = ManifestEntry {
            name: "native_from_other_build".into(),
            action: ActionKind::Cool,
            origin: RuleOrigin::Catalog,
            definition: "native_from_other_build".into(),
        };
        let mut manifest = RuleLibrary::from_rules(candidates()).manifest();
        manifest.rules.insert(0, foreign.clone());
        fs::write(
            dir.path().join("library.json"),
            serde_json::to_vec(&manifest).unwrap(),
        )
        .unwrap();

        let pipeline = InductionPipeline::builder().build().unwrap();
        let report = pipeline
            .run_persisted(
                &store,
                &catalog,
                EpisodeInput {
                    episode_id: "ep-empty".into(),
                    ..EpisodeInput::default()
                },
            )
            .unwrap();
        assert_eq!(report.library.len(), 2);

        let after = store.load_manifest().unwrap();
        assert_eq!(after.rules.len(), 3);
        assert!(after.rules.contains(&foreign));
        let loaded = store.load_library(&catalog).unwrap();
        assert_eq!(loaded.unresolved, vec![foreign]);
        assert_eq!(loaded.library.len(), 2);
    }

    #[test]
    fn zero_budget_is_refused() {
        assert!(InductionPipeline::builder().budget(0).build().is_err());
    }

    #[test]
    fn persisted_run_round_trips_and_reports() {
        let dir = tempdir().unwrap();
        let bus = Arc::new(MemoryEventBus::new(8));
        let telemetry = PipelineTelemetry::builder("induction")
            .log_path(dir.path().join("induction.log"))
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        let pipeline = InductionPipeline::builder()
            .telemetry(telemetry)
            .build()
            .unwrap();
        let store = PipelineStore::open(dir.path().join("store")).unwrap();
        let catalog = RuleCatalog::builtin();

        let mut input = episode("kitchen-1");
        input
            .scene_history
            .insert(0, SceneGraph::from_state(&at_cabinet(Status::Closed)).export());
        let report = pipeline.run_persisted(&store, &catalog, input).unwrap();
        assert_eq!(report.library, vec!["open_requires_closed_receptacle"]);

        let (state, loaded) = store.load_state(&catalog).unwrap();
        assert!(loaded.rejected.is_empty());
        assert_eq!(state.agreement.len(), 1);
        assert_eq!(state.disagreement.len(), 2);
        assert_eq!(state.library.names(), report.library);
        assert_eq!(store.load_scene_history("kitchen-1").unwrap().len(), 1);
        assert_eq!(bus.events_of_type("induction.library.merged").len(), 1);

        let records = shared_logging::read_records(dir.path().join("induction.log")).unwrap();
        let messages: Vec<_> = records.iter().map(|r| r.message.as_str()).collect();
        assert!(messages.contains(&"induction.classify.completed"));
        assert!(messages.contains(&"induction.coverage.selected"));
    }
}
