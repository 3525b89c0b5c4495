#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rust_2018_idioms,
    missing_docs
)]

//! Gatekeeper control – gates an agent's proposed actions through the learned
//! rule library before they reach the environment.
//!
//! The loop proposes an action, asks an outcome predictor what will happen,
//! and lets [`arbiter::Arbiter`] reconcile the prediction with the rule chain.
//! Rejected actions are replanned with the accumulated explanations until the
//! replan budget runs out.

/// Predictor/rule-chain arbitration over a persistent scene graph.
#[path = "../arbiter.rs"]
pub mod arbiter;

/// Planner, predictor and environment seams.
#[path = "../seams.rs"]
pub mod seams;

/// Episode recording for the induction pipeline.
#[path = "../recorder.rs"]
pub mod recorder;

/// Propose/predict/arbitrate control loop.
#[path = "../main.rs"]
pub mod runtime;

pub use arbiter::{ArbitrationDecision, Arbiter, DecisionSource};
pub use recorder::EpisodeRecorder;
pub use runtime::{Attempt, ControlLoop, ControlLoopBuilder, EpisodeSummary, StepRecord};
pub use seams::{ActionProposer, Environment, OutcomePredictor, ReplanFeedback};
