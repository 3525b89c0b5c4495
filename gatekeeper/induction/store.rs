use std::{
    fs, io,
    path::{Path, PathBuf},
};

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::catalog::RuleCatalog;
use crate::classifier::{SceneGraphHistory, TransitionStore};
use crate::pipeline::InductionState;
use crate::registry::{LibraryManifest, LoadedLibrary, ManifestEntry, RuleLibrary};
use crate::scene_graph::SceneGraphExport;

const AGREEMENT_FILE: &str = "agreement.json";
const DISAGREEMENT_FILE: &str = "disagreement.json";
const LIBRARY_FILE: &str = "library.json";
const SCENE_GRAPH_DIR: &str = "scene_graphs";
const SCENE_GRAPH_PREFIX: &str = "scene_graph_";

/// Persistence failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        /// Affected path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// A persisted document could not be (de)serialised.
    #[error("invalid json in {}: {source}", path.display())]
    Serde {
        /// Affected path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
    /// The episode id cannot be used as a directory name.
    #[error("invalid episode id `{0}`")]
    InvalidEpisodeId(String),
}

/// Directory-backed store for the cumulative collections, library and scene graphs.
///
/// Writes go through a temp file renamed into place and are serialised by an
/// internal lock so a single store is a single writer.
#[derive(Debug)]
pub struct PipelineStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl PipelineStore {
    /// Opens (or creates) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// Store root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Cumulative agreement collection (empty when never saved).
    pub fn load_agreement(&self) -> Result<TransitionStore, StoreError> {
        read_or_default(&self.root.join(AGREEMENT_FILE))
    }

    /// Cumulative disagreement collection (empty when never saved).
    pub fn load_disagreement(&self) -> Result<TransitionStore, StoreError> {
        read_or_default(&self.root.join(DISAGREEMENT_FILE))
    }

    /// Persists the agreement collection.
    pub fn save_agreement(&self, store: &TransitionStore) -> Result<(), StoreError> {
        self.write_atomic(&self.root.join(AGREEMENT_FILE), store)
    }

    /// Persists the disagreement collection.
    pub fn save_disagreement(&self, store: &TransitionStore) -> Result<(), StoreError> {
        self.write_atomic(&self.root.join(DISAGREEMENT_FILE), store)
    }

    /// Raw library manifest (empty when never saved).
    pub fn load_manifest(&self) -> Result<LibraryManifest, StoreError> {
        read_or_default(&self.root.join(LIBRARY_FILE))
    }

    /// Library rebuilt through the catalog; unresolvable entries are reported, not loaded.
    pub fn load_library(&self, catalog: &RuleCatalog) -> Result<LoadedLibrary, StoreError> {
        Ok(self.load_manifest()?.load(catalog))
    }

    /// Persists the library manifest.
    pub fn save_library(&self, library: &RuleLibrary) -> Result<(), StoreError> {
        self.write_atomic(&self.root.join(LIBRARY_FILE), &library.manifest())
    }

    /// Persists the library followed by the `unresolved` entries it does not redefine.
    pub fn save_library_retaining(
        &self,
        library: &RuleLibrary,
        unresolved: &[ManifestEntry],
    ) -> Result<(), StoreError> {
        self.write_atomic(
            &self.root.join(LIBRARY_FILE),
            &library.manifest_retaining(unresolved),
        )
    }

    /// Loads agreement, disagreement and library together.
    pub fn load_state(
        &self,
        catalog: &RuleCatalog,
    ) -> Result<(InductionState, LoadedLibrary), StoreError> {
        let loaded = self.load_library(catalog)?;
        let state = InductionState {
            agreement: self.load_agreement()?,
            disagreement: self.load_disagreement()?,
            library: loaded.library.clone(),
            unresolved: loaded.unresolved.clone(),
        };
        Ok((state, loaded))
    }

    /// Persists agreement, disagreement and library as one set.
    ///
    /// All three documents are staged before any is renamed into place, so a
    /// serialisation or write failure leaves every file as it was. Renames run
    /// in the order agreement, disagreement, library.
    pub fn save_state(&self, state: &InductionState) -> Result<(), StoreError> {
        let documents = vec![
            encode(&self.root.join(AGREEMENT_FILE), &state.agreement)?,
            encode(&self.root.join(DISAGREEMENT_FILE), &state.disagreement)?,
            encode(
                &self.root.join(LIBRARY_FILE),
                &state.library.manifest_retaining(&state.unresolved),
            )?,
        ];
        self.write_set(documents)
    }

    /// Writes one step's scene-graph export.
    pub fn save_scene_graph(
        &self,
        episode_id: &str,
        step: usize,
        graph: &SceneGraphExport,
    ) -> Result<PathBuf, StoreError> {
        let path = self
            .episode_dir(episode_id)?
            .join(format!("{SCENE_GRAPH_PREFIX}{step}.json"));
        self.write_atomic(&path, graph)?;
        Ok(path)
    }

    /// Writes every snapshot of an episode.
    pub fn save_scene_history(
        &self,
        episode_id: &str,
        history: &SceneGraphHistory,
    ) -> Result<(), StoreError> {
        for (step, graph) in history {
            self.save_scene_graph(episode_id, *step, graph)?;
        }
        Ok(())
    }

    /// Reads every snapshot saved for an episode, ordered by step.
    pub fn load_scene_history(&self, episode_id: &str) -> Result<SceneGraphHistory, StoreError> {
        let dir = self.episode_dir(episode_id)?;
        read_scene_dir(&dir)
    }

    /// Directory for an episode's snapshots. Ids that need cleaning up get a
    /// short digest of the raw id appended so distinct ids never share a directory.
    fn episode_dir(&self, episode_id: &str) -> Result<PathBuf, StoreError> {
        let sanitized: String = episode_id
            .trim()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
            return Err(StoreError::InvalidEpisodeId(episode_id.to_string()));
        }
        let name = if sanitized == episode_id {
            sanitized
        } else {
            let digest = Uuid::new_v5(&Uuid::NAMESPACE_OID, episode_id.as_bytes())
                .simple()
                .to_string();
            format!("{sanitized}-{}", &digest[..8])
        };
        Ok(self.root.join(SCENE_GRAPH_DIR).join(name))
    }

    fn write_atomic<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> Result<(), StoreError> {
        self.write_set(vec![encode(path, value)?])
    }

    /// Writes every document to a temp file, then renames them into place in order.
    fn write_set(&self, documents: Vec<(PathBuf, Vec<u8>)>) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        let mut staged: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(documents.len());
        for (path, data) in documents {
            match stage(&path, &data) {
                Ok(tmp) => staged.push((tmp, path)),
                Err(err) => {
                    discard(&staged);
                    return Err(err);
                }
            }
        }
        for (idx, (tmp, path)) in staged.iter().enumerate() {
            if let Err(source) = fs::rename(tmp, path) {
                discard(&staged[idx..]);
                return Err(StoreError::Io {
                    path: path.clone(),
                    source,
                });
            }
        }
        Ok(())
    }
}

fn encode<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> Result<(PathBuf, Vec<u8>), StoreError> {
    let data = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Serde {
        path: path.to_path_buf(),
        source,
    })?;
    Ok((path.to_path_buf(), data))
}

/// Writes `data` next to `path` under a unique temp name.
/// A directory squatting on `path` is refused here, before anything is renamed.
fn stage(path: &Path, data: &[u8]) -> Result<PathBuf, StoreError> {
    let io_err = |source: io::Error| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    if path.is_dir() {
        return Err(io_err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "a directory occupies the target path",
        )));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
    fs::write(&tmp, data).map_err(io_err)?;
    Ok(tmp)
}

fn discard(staged: &[(PathBuf, PathBuf)]) {
    for (tmp, _) in staged {
        let _ = fs::remove_file(tmp);
    }
}

fn read_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T, StoreError> {
    read_json(path).map(Option::unwrap_or_default)
}

/// Reads a JSON document; `None` when the file does not exist.
fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_slice(&raw)
        .map(Some)
        .map_err(|source| StoreError::Serde {
            path: path.to_path_buf(),
            source,
        })
}

/// Reads `scene_graph_<step>.json` files from a directory, ordered by step.
/// Other files are ignored; a missing directory yields an empty history.
pub fn read_scene_dir(dir: &Path) -> Result<SceneGraphHistory, StoreError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(SceneGraphHistory::new()),
        Err(source) => {
            return Err(StoreError::Io {
                path: dir.to_path_buf(),
                source,
            })
        }
    };
    let mut steps = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let step = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.strip_prefix(SCENE_GRAPH_PREFIX))
            .and_then(|rest| rest.strip_suffix(".json"))
            .and_then(|step| step.parse::<usize>().ok());
        if let Some(step) = step {
            steps.push((step, path));
        }
    }
    steps.sort_by_key(|(step, _)| *step);
    let mut history = SceneGraphHistory::with_capacity(steps.len());
    for (step, path) in steps {
        if let Some(graph) = read_json(&path)? {
            history.insert(step, graph);
        }
    }
    Ok(history)
}
