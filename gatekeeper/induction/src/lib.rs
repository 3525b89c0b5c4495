#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rust_2018_idioms,
    missing_docs
)]

//! Gatekeeper induction core – learns symbolic precondition rules from the
//! transitions where an outcome predictor was wrong.
//!
//! One episode flows through [`pipeline::InductionPipeline`]: transitions are
//! classified against the predictor's hypothetical trajectory, candidate rules
//! are vetted against known successes, a budgeted greedy cover of the known
//! failures is selected, and the picks are merged into the rule library.

/// Telemetry builder for the induction stages.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// Wire-compatible state, action, outcome and trajectory types.
#[path = "../model.rs"]
pub mod model;

/// Incremental agent/location/item scene graph.
#[path = "../scene_graph.rs"]
pub mod scene_graph;

/// Rule contract and ordered chain evaluation.
#[path = "../rule.rs"]
pub mod rule;

/// Native rule catalog and declarative rule specs.
#[path = "../catalog.rs"]
pub mod catalog;

/// Agreement/disagreement classification of transitions.
#[path = "../classifier.rs"]
pub mod classifier;

/// Soundness filter over known successes.
#[path = "../validity.rs"]
pub mod validity;

/// Greedy maximum-coverage rule selection.
#[path = "../coverage.rs"]
pub mod coverage;

/// Rule library and merge.
#[path = "../registry.rs"]
pub mod registry;

/// File-backed persistence for collections, library and scene graphs.
#[path = "../store.rs"]
pub mod store;

/// TOML configuration.
#[path = "../config.rs"]
pub mod config;

/// Per-episode induction pipeline.
#[path = "../main.rs"]
pub mod pipeline;

pub use catalog::{standard_specs, CandidateSet, Requirement, RuleCatalog, RuleSpec};
pub use classifier::{
    Classification, ClassificationRecord, EpisodeClassification, SceneGraphHistory,
    TransitionClassifier, TransitionStore,
};
pub use config::GatekeeperConfig;
pub use coverage::{CoverageMatrix, CoverageSelection, CoverageSelector, SelectedRule};
pub use model::{
    Action, ActionArgs, ActionKind, Outcome, State, Status, Trajectory, Transition, TransitionKey,
};
pub use pipeline::{EpisodeInput, EpisodeReport, InductionPipeline, InductionState};
pub use registry::{merge, LibraryManifest, LoadedLibrary, ManifestEntry, RuleLibrary};
pub use rule::{evaluate_chain, ChainOutcome, Rule, RuleError, RuleOrigin, Verdict};
pub use scene_graph::{SceneGraph, SceneGraphExport};
pub use store::{PipelineStore, StoreError};
pub use telemetry::{PipelineTelemetry, PipelineTelemetryBuilder};
pub use validity::{Rejection, ValidityFilter, ValidityReport};
