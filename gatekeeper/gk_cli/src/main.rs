use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gatekeeper_control::Arbiter;
use gatekeeper_induction::{
    merge, store::read_scene_dir, Action, CoverageSelector, GatekeeperConfig, Outcome,
    PipelineStore, PipelineTelemetry, RuleCatalog, State, Trajectory, TransitionClassifier,
    ValidityFilter, Verdict,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use shared_event_bus::FileEventPublisher;
use shared_logging::LogLevel;

#[derive(Parser, Debug)]
#[command(name = "gk", version, about = "Rule induction and action gating over a pipeline store")]
struct Cli {
    /// Pipeline configuration (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Store directory; overrides `[storage] root`.
    #[arg(long, global = true)]
    store: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classifies one episode into the cumulative agreement/disagreement sets.
    Classify {
        #[arg(long)]
        episode: String,
        /// Ground-truth episode log (flat `state_i`/`action_i`/`action_result_i` JSON).
        #[arg(long)]
        real: PathBuf,
        /// Predictor's hypothetical episode log, same shape.
        #[arg(long)]
        hypothetical: PathBuf,
        /// Directory of `scene_graph_<step>.json` snapshots.
        #[arg(long)]
        scene_graphs: Option<PathBuf>,
    },
    /// Filters, selects and merges candidate rules into the library.
    Induce {
        /// Candidate file; defaults to every built-in rule.
        #[arg(long)]
        candidates: Option<PathBuf>,
    },
    /// Decides one proposed action against the persisted library.
    Arbitrate {
        #[arg(long)]
        state: PathBuf,
        #[arg(long)]
        action: PathBuf,
        /// Predictor outcome (`{feedback, success, suggestion}`).
        #[arg(long)]
        prediction: PathBuf,
    },
    /// Lists the persisted library.
    Library,
}

struct Session {
    config: GatekeeperConfig,
    store: PipelineStore,
    catalog: RuleCatalog,
    telemetry: Option<PipelineTelemetry>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let ctx = open_session(cli.config.as_deref(), cli.store)?;
    match cli.command {
        Commands::Classify {
            episode,
            real,
            hypothetical,
            scene_graphs,
        } => handle_classify(&ctx, &episode, &real, &hypothetical, scene_graphs.as_deref()),
        Commands::Induce { candidates } => handle_induce(&ctx, candidates.as_deref()),
        Commands::Arbitrate {
            state,
            action,
            prediction,
        } => handle_arbitrate(&ctx, &state, &action, &prediction),
        Commands::Library => handle_library(&ctx),
    }
}

fn open_session(config: Option<&Path>, store: Option<PathBuf>) -> Result<Session> {
    let config = match config {
        Some(path) => GatekeeperConfig::load(path)?,
        None => GatekeeperConfig::default(),
    };
    let root = store.unwrap_or_else(|| config.storage.root.clone());
    let store = PipelineStore::open(&root)
        .with_context(|| format!("opening store {}", root.display()))?;
    let telemetry = build_telemetry(&config)?;
    Ok(Session {
        config,
        store,
        catalog: RuleCatalog::builtin(),
        telemetry,
    })
}

fn build_telemetry(config: &GatekeeperConfig) -> Result<Option<PipelineTelemetry>> {
    let settings = &config.telemetry;
    if settings.log_path.is_none() && settings.event_log.is_none() {
        return Ok(None);
    }
    let mut builder = PipelineTelemetry::builder("gk").maybe_log_path(settings.log_path.clone());
    if let Some(path) = &settings.event_log {
        let publisher = FileEventPublisher::new(path)
            .with_context(|| format!("opening event log {}", path.display()))?;
        builder = builder.event_publisher(Arc::new(publisher));
    }
    builder.build().map(Some)
}

fn handle_classify(
    ctx: &Session,
    episode: &str,
    real: &Path,
    hypothetical: &Path,
    scene_graphs: Option<&Path>,
) -> Result<()> {
    let real = read_trajectory(real)?;
    let hypothetical = read_trajectory(hypothetical)?;
    let history = match scene_graphs {
        Some(dir) => read_scene_dir(dir)
            .with_context(|| format!("reading scene graphs from {}", dir.display()))?,
        None => ctx.store.load_scene_history(episode)?,
    };

    let mut agreement = ctx.store.load_agreement()?;
    let mut disagreement = ctx.store.load_disagreement()?;
    let classified = TransitionClassifier::new(ctx.telemetry.clone()).classify(
        episode,
        &real,
        &hypothetical,
        &history,
        &mut agreement,
        &mut disagreement,
    );
    ctx.store.save_scene_history(episode, &history)?;
    ctx.store.save_agreement(&agreement)?;
    ctx.store.save_disagreement(&disagreement)?;

    print_json(&json!({
        "episode": episode,
        "compared": classified.compared,
        "agreement": classified.agreement.keys().collect::<Vec<_>>(),
        "disagreement": classified.disagreement.keys().collect::<Vec<_>>(),
        "cumulative_agreement": agreement.len(),
        "cumulative_disagreement": disagreement.len(),
    }))
}

fn handle_induce(ctx: &Session, candidates: Option<&Path>) -> Result<()> {
    let rules = match candidates {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading candidates {}", path.display()))?;
            let set = ctx.catalog.load_candidates(&text)?;
            for err in &set.rejected {
                log(
                    ctx,
                    LogLevel::Warn,
                    "gk.candidate.rejected",
                    json!({ "error": err.to_string() }),
                );
            }
            set.rules
        }
        None => ctx.catalog.candidates()?,
    };

    let agreement = ctx.store.load_agreement()?;
    let disagreement = ctx.store.load_disagreement()?;
    let loaded = ctx.store.load_library(&ctx.catalog)?;
    for (name, err) in &loaded.rejected {
        log(
            ctx,
            LogLevel::Warn,
            "induction.library.skipped",
            json!({ "rule": name, "error": err.to_string() }),
        );
    }

    let validity = ValidityFilter::new(ctx.telemetry.clone()).filter(rules, &agreement);
    let selection = CoverageSelector::new(ctx.config.selection.budget, ctx.telemetry.clone())
        .select(&validity.valid, &disagreement);
    let library = merge(loaded.library.rules(), &selection.rules());
    ctx.store.save_library_retaining(&library, &loaded.unresolved)?;

    print_json(&json!({
        "valid": validity.valid_names(),
        "rejected": validity.rejected,
        "selected": selection
            .selected
            .iter()
            .map(|pick| json!({ "rule": pick.rule.name(), "marginal_gain": pick.marginal_gain }))
            .collect::<Vec<_>>(),
        "coverage": selection.coverage(),
        "library": library.names(),
    }))
}

fn handle_arbitrate(ctx: &Session, state: &Path, action: &Path, prediction: &Path) -> Result<()> {
    let state: State = read_json(state)?;
    let action: Action = read_json(action)?;
    let predicted: Outcome = read_json(prediction)?;
    let library = ctx.store.load_library(&ctx.catalog)?.library;

    let mut arbiter = Arbiter::new(ctx.telemetry.clone());
    let decision = arbiter.arbitrate(&library, &state, &action, Verdict::from(predicted));
    print_json(&decision)
}

fn handle_library(ctx: &Session) -> Result<()> {
    let manifest = ctx.store.load_manifest()?;
    if manifest.rules.is_empty() {
        println!("library is empty");
        return Ok(());
    }
    let loaded = manifest.load(&ctx.catalog);
    for entry in &manifest.rules {
        let status = loaded
            .rejected
            .iter()
            .find(|(name, _)| name == &entry.name)
            .map_or_else(|| "ok".to_string(), |(_, err)| format!("rejected: {err}"));
        println!(
            "{} | {} | {:?} | {}",
            entry.name, entry.action, entry.origin, status
        );
    }
    Ok(())
}

fn read_trajectory(path: &Path) -> Result<Trajectory> {
    let value: Value = read_json(path)?;
    Trajectory::from_flat_json(&value)
        .with_context(|| format!("extracting trajectory from {}", path.display()))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn log(ctx: &Session, level: LogLevel, message: &str, metadata: Value) {
    if let Some(tel) = &ctx.telemetry {
        let _ = tel.log(level, message, metadata);
    }
}
