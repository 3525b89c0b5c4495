use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;

use crate::model::{Outcome, Trajectory, Transition, TransitionKey};
use crate::scene_graph::SceneGraphExport;
use crate::telemetry::PipelineTelemetry;

/// Per-episode scene-graph snapshots keyed by step index.
pub type SceneGraphHistory = IndexMap<usize, SceneGraphExport>;

/// Whether the predictor's assumed success matched ground truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Predicted success equals actual success.
    Agreement,
    /// Predicted success differs from actual success.
    Disagreement,
}

/// Ground-truth transition annotated with its context and classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationRecord {
    /// Insertion ordinal within the owning collection; stable across overwrites.
    pub global_id: u64,
    /// Episode/step identity.
    pub key: TransitionKey,
    /// Agreement or disagreement.
    pub classification: Classification,
    /// Ground-truth transition.
    pub transition: Transition,
    /// Outcome the predictor assumed for this step.
    #[serde(default)]
    pub predicted: Outcome,
    /// Scene graph at the time of the step (empty when none was recorded).
    #[serde(default)]
    pub scene_graph: SceneGraphExport,
}

impl ClassificationRecord {
    /// Ground-truth success of the step.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.transition.outcome.success
    }
}

/// Cumulative keyed collection of classification records.
///
/// Keys are unique and the collection never shrinks. Re-inserting an
/// existing key replaces the payload but keeps the original `global_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<ClassificationRecord>", into = "Vec<ClassificationRecord>")]
pub struct TransitionStore {
    records: IndexMap<TransitionKey, ClassificationRecord>,
    next_id: u64,
}

impl TransitionStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites by key. Returns `true` when the key was new.
    pub fn upsert(&mut self, mut record: ClassificationRecord) -> bool {
        if let Some(existing) = self.records.get_mut(&record.key) {
            record.global_id = existing.global_id;
            *existing = record;
            false
        } else {
            record.global_id = self.next_id;
            self.next_id += 1;
            self.records.insert(record.key.clone(), record);
            true
        }
    }

    /// Record for a key.
    #[must_use]
    pub fn get(&self, key: &TransitionKey) -> Option<&ClassificationRecord> {
        self.records.get(key)
    }

    /// Whether the key is present.
    #[must_use]
    pub fn contains(&self, key: &TransitionKey) -> bool {
        self.records.contains_key(key)
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &ClassificationRecord> {
        self.records.values()
    }

    /// Records whose ground-truth outcome is success.
    pub fn successful(&self) -> impl Iterator<Item = &ClassificationRecord> {
        self.iter().filter(|record| record.succeeded())
    }

    /// Records belonging to one episode.
    pub fn episode<'a>(
        &'a self,
        episode_id: &'a str,
    ) -> impl Iterator<Item = &'a ClassificationRecord> + 'a {
        self.iter()
            .filter(move |record| record.key.episode_id == episode_id)
    }
}

impl From<Vec<ClassificationRecord>> for TransitionStore {
    fn from(records: Vec<ClassificationRecord>) -> Self {
        let next_id = records
            .iter()
            .map(|record| record.global_id + 1)
            .max()
            .unwrap_or(0);
        let mut store = Self {
            records: IndexMap::with_capacity(records.len()),
            next_id,
        };
        for record in records {
            // Persisted ids are kept; duplicate keys collapse onto the first id.
            if let Some(existing) = store.records.get_mut(&record.key) {
                let global_id = existing.global_id;
                *existing = ClassificationRecord {
                    global_id,
                    ..record
                };
            } else {
                store.records.insert(record.key.clone(), record);
            }
        }
        store
    }
}

impl From<TransitionStore> for Vec<ClassificationRecord> {
    fn from(store: TransitionStore) -> Self {
        store.records.into_values().collect()
    }
}

/// Per-episode classification result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EpisodeClassification {
    /// Episode identifier.
    pub episode_id: String,
    /// Agreeing steps of this episode.
    pub agreement: IndexMap<usize, ClassificationRecord>,
    /// Disagreeing steps of this episode.
    pub disagreement: IndexMap<usize, ClassificationRecord>,
    /// Number of steps compared (length of the shorter trajectory).
    pub compared: usize,
}

/// Splits ground-truth vs hypothetical transitions into agreement/disagreement.
#[derive(Debug, Clone, Default)]
pub struct TransitionClassifier {
    telemetry: Option<PipelineTelemetry>,
}

impl TransitionClassifier {
    /// Creates a classifier.
    #[must_use]
    pub const fn new(telemetry: Option<PipelineTelemetry>) -> Self {
        Self { telemetry }
    }

    /// Classifies one episode and folds the result into the cumulative stores.
    ///
    /// Steps are paired index by index up to the shorter trajectory. A step
    /// missing from `history` is annotated with an empty scene graph.
    pub fn classify(
        &self,
        episode_id: &str,
        real: &Trajectory,
        hypothetical: &Trajectory,
        history: &SceneGraphHistory,
        agreement: &mut TransitionStore,
        disagreement: &mut TransitionStore,
    ) -> EpisodeClassification {
        let mut result = EpisodeClassification {
            episode_id: episode_id.to_string(),
            ..EpisodeClassification::default()
        };
        for (step, (actual, predicted)) in real.iter().zip(hypothetical.iter()).enumerate() {
            let classification = if actual.outcome.success == predicted.outcome.success {
                Classification::Agreement
            } else {
                Classification::Disagreement
            };
            let record = ClassificationRecord {
                global_id: 0,
                key: TransitionKey::new(episode_id, step),
                classification,
                transition: actual.clone(),
                predicted: predicted.outcome.clone(),
                scene_graph: history.get(&step).cloned().unwrap_or_default(),
            };
            let (target, local) = match classification {
                Classification::Agreement => (&mut *agreement, &mut result.agreement),
                Classification::Disagreement => (&mut *disagreement, &mut result.disagreement),
            };
            target.upsert(record.clone());
            let stored = target.get(&record.key).map_or(record.global_id, |r| r.global_id);
            local.insert(
                step,
                ClassificationRecord {
                    global_id: stored,
                    ..record
                },
            );
            result.compared += 1;
        }

        if let Some(tel) = &self.telemetry {
            let _ = tel.log(
                LogLevel::Info,
                "induction.classify.completed",
                json!({
                    "episode": episode_id,
                    "compared": result.compared,
                    "agreement": result.agreement.len(),
                    "disagreement": result.disagreement.len(),
                    "cumulative_agreement": agreement.len(),
                    "cumulative_disagreement": disagreement.len(),
                }),
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Action, ActionKind, State};
    use crate::scene_graph::SceneGraph;

    fn step(success: bool) -> Transition {
        let outcome = if success {
            Outcome::success("ok")
        } else {
            Outcome::failure("Nothing happens.", "")
        };
        Transition::new(
            State::default(),
            Action::new(ActionKind::Open).with_recep("cabinet 1"),
            outcome,
        )
    }

    fn trajectory(flags: &[bool]) -> Trajectory {
        flags.iter().copied().map(step).collect()
    }

    #[test]
    fn partitions_by_success_flag() {
        let classifier = TransitionClassifier::default();
        let mut agreement = TransitionStore::new();
        let mut disagreement = TransitionStore::new();
        let mut history = SceneGraphHistory::new();
        history.insert(1, SceneGraph::from_state(&State::default()).export());

        let result = classifier.classify(
            "ep-1",
            &trajectory(&[true, false, true, false]),
            &trajectory(&[true, true, false]),
            &history,
            &mut agreement,
            &mut disagreement,
        );
        assert_eq!(result.compared, 3);
        assert_eq!(result.agreement.keys().copied().collect::<Vec<_>>(), vec![0]);
        assert_eq!(
            result.disagreement.keys().copied().collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert!(!result.disagreement[&1].scene_graph.is_empty());
        assert!(result.disagreement[&2].scene_graph.is_empty());
        assert_eq!(agreement.len(), 1);
        assert_eq!(disagreement.len(), 2);
        assert!(disagreement.contains(&TransitionKey::new("ep-1", 2)));
    }

    #[test]
    fn reprocessing_overwrites_without_growth() {
        let classifier = TransitionClassifier::default();
        let mut agreement = TransitionStore::new();
        let mut disagreement = TransitionStore::new();
        let real = trajectory(&[true, false]);
        let hypo = trajectory(&[true, true]);
        let history = SceneGraphHistory::new();
        classifier.classify("ep-1", &real, &hypo, &history, &mut agreement, &mut disagreement);
        classifier.classify("ep-2", &real, &hypo, &history, &mut agreement, &mut disagreement);
        let before = (agreement.clone(), disagreement.clone());
        classifier.classify("ep-1", &real, &hypo, &history, &mut agreement, &mut disagreement);
        assert_eq!((agreement.clone(), disagreement.clone()), before);
        assert_eq!(disagreement.len(), 2);
        let ids: Vec<_> = disagreement.iter().map(|r| r.global_id).collect();
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn overwrite_keeps_global_id() {
        let mut store = TransitionStore::new();
        let key = TransitionKey::new("ep-1", 0);
        let record = |feedback: &str| ClassificationRecord {
            global_id: 99,
            key: key.clone(),
            classification: Classification::Agreement,
            transition: Transition::new(
                State::default(),
                Action::new(ActionKind::Goto).with_recep("fridge 1"),
                Outcome::success(feedback),
            ),
            predicted: Outcome::success(""),
            scene_graph: SceneGraphExport::empty(),
        };
        assert!(store.upsert(record("first")));
        assert!(store.upsert(ClassificationRecord {
            key: TransitionKey::new("ep-1", 1),
            ..record("other")
        }));
        assert!(!store.upsert(record("second")));
        let stored = store.get(&key).unwrap();
        assert_eq!(stored.global_id, 0);
        assert_eq!(stored.transition.outcome.feedback, "second");
        assert_eq!(store.successful().count(), 2);
        assert_eq!(store.episode("ep-1").count(), 2);
    }

    #[test]
    fn store_round_trips_as_list() {
        let classifier = TransitionClassifier::default();
        let mut agreement = TransitionStore::new();
        let mut disagreement = TransitionStore::new();
        classifier.classify(
            "kitchen",
            &trajectory(&[true, true, false]),
            &trajectory(&[true, true, false]),
            &SceneGraphHistory::new(),
            &mut agreement,
            &mut disagreement,
        );
        let value = serde_json::to_value(&agreement).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 3);
        let mut back: TransitionStore = serde_json::from_value(value).unwrap();
        assert_eq!(back, agreement);
        let new_key = ClassificationRecord {
            key: TransitionKey::new("kitchen", 7),
            ..back.iter().next().unwrap().clone()
        };
        back.upsert(new_key);
        assert_eq!(back.get(&TransitionKey::new("kitchen", 7)).unwrap().global_id, 3);
    }
}
