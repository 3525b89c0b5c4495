use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Status attached to a location (open/closed) or to a held item (dirty, heated, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum Status {
    /// No status reported (`null`).
    #[default]
    Unknown,
    /// Receptacle is open.
    Open,
    /// Receptacle is closed.
    Closed,
    /// Any other reported status, kept verbatim.
    Other(String),
}

impl Status {
    /// Parses a status string; `null`, `none` and blank mean unknown.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty()
            || trimmed.eq_ignore_ascii_case("null")
            || trimmed.eq_ignore_ascii_case("none")
        {
            Self::Unknown
        } else if trimmed.eq_ignore_ascii_case("open") {
            Self::Open
        } else if trimmed.eq_ignore_ascii_case("closed") {
            Self::Closed
        } else {
            Self::Other(trimmed.to_string())
        }
    }

    /// Textual form, `None` when unknown.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Unknown => None,
            Self::Open => Some("open"),
            Self::Closed => Some("closed"),
            Self::Other(other) => Some(other),
        }
    }
}

impl From<Option<String>> for Status {
    fn from(raw: Option<String>) -> Self {
        raw.as_deref().map_or(Self::Unknown, Self::parse)
    }
}

impl From<Status> for Option<String> {
    fn from(status: Status) -> Self {
        status.as_str().map(str::to_string)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str().unwrap_or("unknown"))
    }
}

/// Items contained in a location plus the location's own status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationContents {
    /// Item names in observation order.
    #[serde(default)]
    pub items: Vec<String>,
    /// Status of the location itself.
    #[serde(default)]
    pub status: Status,
}

/// The item in the agent's hand.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeldItem {
    /// Item name, absent when the hand is empty.
    #[serde(default)]
    pub item_name: Option<String>,
    /// Item status (clean, heated, ...).
    #[serde(default)]
    pub status: Status,
}

/// The agent's current location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Location name.
    #[serde(default)]
    pub location_name: Option<String>,
    /// Status of that location.
    #[serde(default)]
    pub status: Status,
}

/// Structured snapshot of the partially observed environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    /// Location names the agent can move to.
    #[serde(default)]
    pub reachable_locations: Vec<String>,
    /// Known contents and status per location.
    #[serde(default)]
    pub items_in_locations: IndexMap<String, LocationContents>,
    /// Item in hand.
    #[serde(default)]
    pub item_in_hand: HeldItem,
    /// Current position.
    #[serde(default)]
    pub current_position: Position,
}

impl State {
    /// Name of the current location, ignoring blank or `null` placeholders.
    #[must_use]
    pub fn current_location(&self) -> Option<&str> {
        present(self.current_position.location_name.as_deref())
    }

    /// Name of the held item, ignoring blank or `null` placeholders.
    #[must_use]
    pub fn held_item(&self) -> Option<&str> {
        present(self.item_in_hand.item_name.as_deref())
    }

    /// Contents of a location, if the location is known.
    #[must_use]
    pub fn location(&self, name: &str) -> Option<&LocationContents> {
        self.items_in_locations.get(name)
    }

    /// Whether the location appears in `reachable_locations`.
    #[must_use]
    pub fn is_reachable(&self, name: &str) -> bool {
        self.reachable_locations.iter().any(|loc| loc == name)
    }

    /// Whether the location is reachable or has recorded contents.
    #[must_use]
    pub fn knows_location(&self, name: &str) -> bool {
        self.is_reachable(name) || self.items_in_locations.contains_key(name)
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("null"))
}

/// Discriminant of an action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActionKind {
    /// Move to a receptacle/location.
    Goto,
    /// Take an object from a receptacle.
    Take,
    /// Put the held object into/onto a receptacle.
    Put,
    /// Open a receptacle.
    Open,
    /// Close a receptacle.
    Close,
    /// Clean an object with a receptacle (sink).
    Clean,
    /// Heat an object with an appliance.
    Heat,
    /// Cool an object with an appliance.
    Cool,
    /// Use a tool (lamp, ...).
    Use,
    /// Any other action name, kept verbatim.
    Other(String),
}

impl ActionKind {
    /// Canonical lower-case name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Goto => "goto",
            Self::Take => "take",
            Self::Put => "put",
            Self::Open => "open",
            Self::Close => "close",
            Self::Clean => "clean",
            Self::Heat => "heat",
            Self::Cool => "cool",
            Self::Use => "use",
            Self::Other(name) => name,
        }
    }
}

impl From<&str> for ActionKind {
    fn from(raw: &str) -> Self {
        let normalized = raw.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "goto" | "go to" | "go_to" => Self::Goto,
            "take" => Self::Take,
            "put" | "move" => Self::Put,
            "open" => Self::Open,
            "close" => Self::Close,
            "clean" => Self::Clean,
            "heat" => Self::Heat,
            "cool" => Self::Cool,
            "use" => Self::Use,
            _ => Self::Other(normalized),
        }
    }
}

impl From<String> for ActionKind {
    fn from(raw: String) -> Self {
        Self::from(raw.as_str())
    }
}

impl From<ActionKind> for String {
    fn from(kind: ActionKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named arguments of an action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionArgs {
    /// Object acted upon.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obj: Option<String>,
    /// Receptacle or location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recep: Option<String>,
    /// Tool used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
}

/// Proposed or executed action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// Action kind.
    #[serde(rename = "action_name")]
    pub kind: ActionKind,
    /// Kind-specific arguments.
    #[serde(default)]
    pub args: ActionArgs,
}

/// Raised when an action cannot be rendered as an executor command.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActionCommandError {
    /// The kind has no command form.
    #[error("unknown action: {0}")]
    UnknownAction(String),
    /// A required argument is absent.
    #[error("action `{kind}` requires argument `{argument}`")]
    MissingArgument {
        /// Action kind.
        kind: ActionKind,
        /// Missing argument name.
        argument: &'static str,
    },
}

impl Action {
    /// Creates an action without arguments.
    #[must_use]
    pub fn new(kind: impl Into<ActionKind>) -> Self {
        Self {
            kind: kind.into(),
            args: ActionArgs::default(),
        }
    }

    /// Sets the object argument.
    #[must_use]
    pub fn with_obj(mut self, obj: impl Into<String>) -> Self {
        self.args.obj = Some(obj.into());
        self
    }

    /// Sets the receptacle argument.
    #[must_use]
    pub fn with_recep(mut self, recep: impl Into<String>) -> Self {
        self.args.recep = Some(recep.into());
        self
    }

    /// Sets the tool argument.
    #[must_use]
    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.args.tool = Some(tool.into());
        self
    }

    /// Object argument, ignoring blanks.
    #[must_use]
    pub fn obj(&self) -> Option<&str> {
        present(self.args.obj.as_deref())
    }

    /// Receptacle argument, ignoring blanks.
    #[must_use]
    pub fn recep(&self) -> Option<&str> {
        present(self.args.recep.as_deref())
    }

    /// Tool argument, ignoring blanks.
    #[must_use]
    pub fn tool(&self) -> Option<&str> {
        present(self.args.tool.as_deref())
    }

    /// Renders the text command understood by the executor.
    pub fn command(&self) -> Result<String, ActionCommandError> {
        let obj = || self.require(self.obj(), "obj");
        let recep = || self.require(self.recep(), "recep");
        let command = match &self.kind {
            ActionKind::Goto => format!("go to {}", recep()?),
            ActionKind::Take => format!("take {} from {}", obj()?, recep()?),
            ActionKind::Put => format!("move {} to {}", obj()?, recep()?),
            ActionKind::Open => format!("open {}", recep()?),
            ActionKind::Close => format!("close {}", recep()?),
            ActionKind::Clean => format!("clean {} with {}", obj()?, recep()?),
            ActionKind::Heat => format!("heat {} with {}", obj()?, recep()?),
            ActionKind::Cool => format!("cool {} with {}", obj()?, recep()?),
            ActionKind::Use => format!("use {}", self.require(self.tool(), "tool")?),
            ActionKind::Other(name) => return Err(ActionCommandError::UnknownAction(name.clone())),
        };
        Ok(command)
    }

    fn require<'a>(
        &self,
        value: Option<&'a str>,
        argument: &'static str,
    ) -> Result<&'a str, ActionCommandError> {
        value.ok_or_else(|| ActionCommandError::MissingArgument {
            kind: self.kind.clone(),
            argument,
        })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.command() {
            Ok(command) => f.write_str(&command),
            Err(_) => write!(f, "{} {:?}", self.kind, self.args),
        }
    }
}

/// Outcome of executing (or predicting) an action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    /// Free-text explanation.
    #[serde(default)]
    pub feedback: String,
    /// Whether the action succeeded.
    #[serde(default)]
    pub success: bool,
    /// Free-text suggestion.
    #[serde(default)]
    pub suggestion: String,
}

const FAILURE_PHRASES: &[&str] = &["nothing happens"];

impl Outcome {
    /// Successful outcome with feedback.
    #[must_use]
    pub fn success(feedback: impl Into<String>) -> Self {
        Self {
            feedback: feedback.into(),
            success: true,
            suggestion: String::new(),
        }
    }

    /// Failed outcome with feedback and suggestion.
    #[must_use]
    pub fn failure(feedback: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self {
            feedback: feedback.into(),
            success: false,
            suggestion: suggestion.into(),
        }
    }

    /// Derives the ground-truth outcome from the environment's observation text.
    #[must_use]
    pub fn from_observation(text: &str) -> Self {
        let lowered = text.to_lowercase();
        let success = !FAILURE_PHRASES.iter().any(|phrase| lowered.contains(phrase));
        Self {
            feedback: text.trim().to_string(),
            success,
            suggestion: String::new(),
        }
    }
}

/// One (state, action, outcome) step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    /// State before acting.
    pub state: State,
    /// Action taken.
    pub action: Action,
    /// Outcome of the action.
    #[serde(rename = "action_result")]
    pub outcome: Outcome,
}

impl Transition {
    /// Creates a transition.
    #[must_use]
    pub fn new(state: State, action: Action, outcome: Outcome) -> Self {
        Self {
            state,
            action,
            outcome,
        }
    }
}

/// Unique identity of a transition across episodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransitionKey {
    /// Episode identifier.
    pub episode_id: String,
    /// Step index within the episode.
    pub step_id: usize,
}

impl TransitionKey {
    /// Creates a key.
    #[must_use]
    pub fn new(episode_id: impl Into<String>, step_id: usize) -> Self {
        Self {
            episode_id: episode_id.into(),
            step_id,
        }
    }
}

impl fmt::Display for TransitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.episode_id, self.step_id)
    }
}

/// Errors raised while reading a flat episode log.
#[derive(Debug, Error)]
pub enum TrajectoryError {
    /// The input is not a JSON object.
    #[error("trajectory must be a JSON object")]
    NotAnObject,
    /// A step entry could not be decoded.
    #[error("step {step}: invalid `{field}`: {source}")]
    InvalidStep {
        /// Step index.
        step: usize,
        /// Offending key prefix.
        field: &'static str,
        /// Decoding failure.
        #[source]
        source: serde_json::Error,
    },
}

/// Ordered transitions of one episode, indexed from zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Trajectory {
    transitions: Vec<Transition>,
}

impl Trajectory {
    /// Creates an empty trajectory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a transition.
    pub fn push(&mut self, transition: Transition) {
        self.transitions.push(transition);
    }

    /// Number of transitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    /// Whether no transitions are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    /// Transition at a step index.
    #[must_use]
    pub fn get(&self, step: usize) -> Option<&Transition> {
        self.transitions.get(step)
    }

    /// Iterates transitions in step order.
    pub fn iter(&self) -> std::slice::Iter<'_, Transition> {
        self.transitions.iter()
    }

    /// Reads the flat `{state_i, action_i, action_result_i}` episode log.
    /// Extraction stops at the first missing `state_i`; a missing result counts as failure.
    pub fn from_flat_json(value: &Value) -> Result<Self, TrajectoryError> {
        let map = value.as_object().ok_or(TrajectoryError::NotAnObject)?;
        let mut transitions = Vec::new();
        let mut step = 0;
        while let Some(state) = map.get(&format!("state_{step}")) {
            let state = decode(step, "state", state.clone())?;
            let action = decode(
                step,
                "action",
                map.get(&format!("action_{step}")).cloned().unwrap_or(Value::Null),
            )?;
            let outcome = match map.get(&format!("action_result_{step}")) {
                Some(raw) => decode(step, "action_result", raw.clone())?,
                None => Outcome::default(),
            };
            transitions.push(Transition::new(state, action, outcome));
            step += 1;
        }
        Ok(Self { transitions })
    }

    /// Writes the flat episode-log form.
    pub fn to_flat_json(&self) -> Result<Value, serde_json::Error> {
        let mut map = Map::new();
        for (step, transition) in self.transitions.iter().enumerate() {
            map.insert(format!("state_{step}"), serde_json::to_value(&transition.state)?);
            map.insert(format!("action_{step}"), serde_json::to_value(&transition.action)?);
            map.insert(
                format!("action_result_{step}"),
                serde_json::to_value(&transition.outcome)?,
            );
        }
        Ok(Value::Object(map))
    }
}

impl FromIterator<Transition> for Trajectory {
    fn from_iter<T: IntoIterator<Item = Transition>>(iter: T) -> Self {
        Self {
            transitions: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Trajectory {
    type Item = &'a Transition;
    type IntoIter = std::slice::Iter<'a, Transition>;

    fn into_iter(self) -> Self::IntoIter {
        self.transitions.iter()
    }
}

fn decode<T: serde::de::DeserializeOwned>(
    step: usize,
    field: &'static str,
    value: Value,
) -> Result<T, TrajectoryError> {
    serde_json::from_value(value).map_err(|source| TrajectoryError::InvalidStep {
        step,
        field,
        source,
    })
}
