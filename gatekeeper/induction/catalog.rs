//! Named rule sources: native predicates plus a declarative requirement language.
//!
//! Candidate rules arrive either as the name of a native predicate registered
//! in [`RuleCatalog`] or as a [`RuleSpec`] (TOML) listing [`Requirement`]s.
//! Both resolve to a [`Rule`] before they reach the induction stages.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::model::{Action, ActionKind, State, Status};
use crate::rule::{Rule, RuleError, RuleOrigin, Verdict};
use crate::scene_graph::{Relation, SceneGraphExport, AGENT_NODE};

/// Appliances that can cool an object.
const COOLING_APPLIANCES: &[&str] = &["fridge", "freezer", "cooler"];
/// Object names that can plausibly be cooled.
const COOLABLE_OBJECTS: &[&str] = &[
    "apple", "bread", "cup", "egg", "lettuce", "mug", "pan", "plate", "pot", "potato", "tomato",
    "winebottle",
];

/// One precondition of a declarative rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum Requirement {
    /// The agent's current location equals the action's receptacle.
    AgentAtReceptacle,
    /// Nothing is in hand.
    HandEmpty,
    /// The action's object is in hand.
    HoldingObject,
    /// The receptacle has the given status. Errors when the receptacle is unknown.
    ReceptacleStatus {
        /// Expected status (`open`, `closed`, ...).
        status: String,
    },
    /// The action's object is listed among the receptacle's items.
    ObjectInReceptacle,
    /// The receptacle is in `reachable_locations`.
    ReceptacleReachable,
    /// The receptacle is reachable or has recorded contents.
    ReceptacleKnown,
    /// The receptacle name contains one of the keywords.
    ReceptacleNameContains {
        /// Accepted keywords.
        any_of: Vec<String>,
    },
    /// The object name contains one of the keywords.
    ObjectNameContains {
        /// Accepted keywords.
        any_of: Vec<String>,
    },
    /// The scene graph has a `holding` edge to the action's object.
    HoldingInSceneGraph,
}

#[derive(Debug, Clone, Copy)]
enum Argument {
    Obj,
    Recep,
}

impl Argument {
    const fn name(self) -> &'static str {
        match self {
            Self::Obj => "obj",
            Self::Recep => "recep",
        }
    }
}

impl Requirement {
    const fn arguments(&self) -> &'static [Argument] {
        match self {
            Self::AgentAtReceptacle
            | Self::ReceptacleStatus { .. }
            | Self::ReceptacleReachable
            | Self::ReceptacleKnown
            | Self::ReceptacleNameContains { .. } => &[Argument::Recep],
            Self::HandEmpty => &[],
            Self::HoldingObject | Self::ObjectNameContains { .. } | Self::HoldingInSceneGraph => {
                &[Argument::Obj]
            }
            Self::ObjectInReceptacle => &[Argument::Obj, Argument::Recep],
        }
    }

    /// `Ok(None)` when satisfied, `Ok(Some(verdict))` with the failing verdict otherwise.
    fn check(
        &self,
        state: &State,
        action: &Action,
        context: &SceneGraphExport,
    ) -> Result<Option<Verdict>, RuleError> {
        let obj = || argument(action, Argument::Obj);
        let recep = || argument(action, Argument::Recep);
        let violation = match self {
            Self::AgentAtReceptacle => {
                let recep = recep()?;
                match state.current_location() {
                    Some(here) if here == recep => None,
                    here => Some(Verdict::fail(
                        format!(
                            "You are not at {recep}; you are at {}.",
                            here.unwrap_or("an unknown location")
                        ),
                        format!("go to {recep} first"),
                    )),
                }
            }
            Self::HandEmpty => state.held_item().map(|held| {
                Verdict::fail(
                    format!("You are already holding {held}."),
                    format!("put {held} somewhere first"),
                )
            }),
            Self::HoldingObject => {
                let obj = obj()?;
                (state.held_item() != Some(obj)).then(|| {
                    Verdict::fail(
                        format!("You are not holding {obj}."),
                        format!("take {obj} first"),
                    )
                })
            }
            Self::ReceptacleStatus { status } => {
                let recep = recep()?;
                let contents = state
                    .location(recep)
                    .ok_or_else(|| RuleError::UnknownLocation(recep.to_string()))?;
                let expected = Status::parse(status);
                (contents.status != expected).then(|| {
                    Verdict::fail(
                        format!("{recep} is {}, not {expected}.", contents.status),
                        status_suggestion(&expected, recep),
                    )
                })
            }
            Self::ObjectInReceptacle => {
                let (obj, recep) = (obj()?, recep()?);
                let present = state
                    .location(recep)
                    .is_some_and(|contents| contents.items.iter().any(|item| item == obj));
                (!present).then(|| {
                    Verdict::fail(
                        format!("{obj} is not in {recep}."),
                        format!("look for {obj} elsewhere"),
                    )
                })
            }
            Self::ReceptacleReachable => {
                let recep = recep()?;
                (!state.is_reachable(recep)).then(|| {
                    Verdict::fail(
                        format!("{recep} is not reachable."),
                        "go to a reachable location",
                    )
                })
            }
            Self::ReceptacleKnown => {
                let recep = recep()?;
                (!state.knows_location(recep)).then(|| {
                    Verdict::fail(
                        format!("{recep} is not a known location."),
                        "pick one of the reachable locations",
                    )
                })
            }
            Self::ReceptacleNameContains { any_of } => {
                let recep = recep()?;
                (!contains_keyword(recep, any_of.as_slice())).then(|| {
                    Verdict::fail(
                        format!("{recep} cannot be used for {}.", action.kind),
                        format!("use one of: {}", any_of.join(", ")),
                    )
                })
            }
            Self::ObjectNameContains { any_of } => {
                let obj = obj()?;
                (!contains_keyword(obj, any_of.as_slice())).then(|| {
                    Verdict::fail(
                        format!("{obj} cannot be used with {}.", action.kind),
                        "choose another object",
                    )
                })
            }
            Self::HoldingInSceneGraph => {
                let obj = obj()?;
                (!context.has_edge(AGENT_NODE, obj, Relation::Holding)).then(|| {
                    Verdict::fail(
                        format!("The scene graph does not show you holding {obj}."),
                        format!("take {obj} first"),
                    )
                })
            }
        };
        Ok(violation)
    }
}

fn argument(action: &Action, argument: Argument) -> Result<&str, RuleError> {
    let value = match argument {
        Argument::Obj => action.obj(),
        Argument::Recep => action.recep(),
    };
    value.ok_or_else(|| RuleError::MissingArgument {
        kind: action.kind.clone(),
        argument: argument.name(),
    })
}

fn contains_keyword(name: &str, keywords: &[impl AsRef<str>]) -> bool {
    let lowered = name.to_lowercase();
    keywords
        .iter()
        .any(|keyword| lowered.contains(&keyword.as_ref().to_lowercase()))
}

fn status_suggestion(expected: &Status, recep: &str) -> String {
    match expected {
        Status::Open => format!("open {recep} first"),
        Status::Closed => format!("close {recep} first"),
        _ => format!("check the state of {recep}"),
    }
}

/// Arguments an action kind carries.
const fn kind_arguments(kind: &ActionKind) -> (bool, bool) {
    match kind {
        ActionKind::Goto | ActionKind::Open | ActionKind::Close => (false, true),
        ActionKind::Take
        | ActionKind::Put
        | ActionKind::Clean
        | ActionKind::Heat
        | ActionKind::Cool => (true, true),
        ActionKind::Use | ActionKind::Other(_) => (false, false),
    }
}

/// Declarative rule: an action kind plus an ordered list of requirements.
///
/// ```toml
/// name = "open_requires_closed_receptacle"
/// action = "open"
/// description = "The receptacle is closed and within reach."
///
/// [[requires]]
/// check = "agent_at_receptacle"
///
/// [[requires]]
/// check = "receptacle_status"
/// status = "closed"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    /// Unique rule name.
    pub name: String,
    /// Governed action kind.
    pub action: ActionKind,
    /// Explanation returned when every requirement holds.
    #[serde(default)]
    pub description: String,
    /// Overrides the requirement's own suggestion on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// Requirements checked in order; the first violation decides.
    pub requires: Vec<Requirement>,
}

impl RuleSpec {
    /// Parses a single spec from TOML.
    pub fn parse(text: &str) -> Result<Self, RuleError> {
        toml::from_str(text).map_err(|err| RuleError::MalformedDefinition {
            name: "<unparsed>".into(),
            reason: err.to_string(),
        })
    }

    /// Serialises the spec back to TOML; stored as the rule's definition.
    pub fn to_definition(&self) -> Result<String, RuleError> {
        toml::to_string(self).map_err(|err| self.malformed(err.to_string()))
    }

    /// Rejects specs that cannot be evaluated meaningfully.
    pub fn validate(&self) -> Result<(), RuleError> {
        if self.name.trim().is_empty() {
            return Err(self.malformed("name is empty"));
        }
        if let ActionKind::Other(kind) = &self.action {
            return Err(self.malformed(format!("unsupported action `{kind}`")));
        }
        if self.requires.is_empty() {
            return Err(self.malformed("no requirements"));
        }
        let (has_obj, has_recep) = kind_arguments(&self.action);
        for requirement in &self.requires {
            for argument in requirement.arguments() {
                let available = match argument {
                    Argument::Obj => has_obj,
                    Argument::Recep => has_recep,
                };
                if !available {
                    return Err(self.malformed(format!(
                        "`{}` actions have no `{}` argument",
                        self.action,
                        argument.name()
                    )));
                }
            }
            match requirement {
                Requirement::ReceptacleStatus { status }
                    if Status::parse(status) == Status::Unknown =>
                {
                    return Err(self.malformed("receptacle_status needs a status"));
                }
                Requirement::ReceptacleNameContains { any_of }
                | Requirement::ObjectNameContains { any_of }
                    if any_of.iter().all(|k| k.trim().is_empty()) =>
                {
                    return Err(self.malformed("keyword list is empty"));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Validates and compiles the spec into a rule.
    pub fn compile(&self) -> Result<Rule, RuleError> {
        self.validate()?;
        let definition = self.to_definition()?;
        let requires = self.requires.clone();
        let description = if self.description.is_empty() {
            format!("{} preconditions hold", self.action)
        } else {
            self.description.clone()
        };
        let suggestion = self.suggestion.clone();
        Ok(Rule::new(
            self.name.clone(),
            self.action.clone(),
            RuleOrigin::Declarative,
            definition,
            move |state, action, context| {
                for requirement in &requires {
                    if let Some(mut verdict) = requirement.check(state, action, context)? {
                        if let Some(suggestion) = &suggestion {
                            verdict.suggestion.clone_from(suggestion);
                        }
                        return Ok(verdict);
                    }
                }
                Ok(Verdict::pass(description.clone()))
            },
        ))
    }

    fn malformed(&self, reason: impl Into<String>) -> RuleError {
        RuleError::MalformedDefinition {
            name: self.name.clone(),
            reason: reason.into(),
        }
    }
}

/// Candidate file: native rule names plus declarative specs.
///
/// ```toml
/// catalog = ["goto_requires_new_reachable_target"]
///
/// [[rules]]
/// name = "take_requires_empty_hand"
/// action = "take"
/// requires = [{ check = "hand_empty" }]
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CandidateFile {
    /// Names resolved against the catalog.
    #[serde(default)]
    pub catalog: Vec<String>,
    /// Declarative specs.
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

/// Rules admitted from a candidate source, plus the ones refused.
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    /// Admitted rules in declaration order (catalog names first).
    pub rules: Vec<Rule>,
    /// Entries that failed to resolve or compile.
    pub rejected: Vec<RuleError>,
}

type NativePredicate = fn(&State, &Action, &SceneGraphExport) -> Result<Verdict, RuleError>;

#[derive(Clone)]
struct NativeRule {
    action_kind: ActionKind,
    predicate: NativePredicate,
}

/// Registry of native rule predicates, addressed by name.
#[derive(Clone, Default)]
pub struct RuleCatalog {
    natives: IndexMap<String, NativeRule>,
}

impl std::fmt::Debug for RuleCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleCatalog")
            .field("natives", &self.natives.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RuleCatalog {
    /// Empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the built-in native rules.
    #[must_use]
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.register(
            "cool_requires_coolable_context",
            ActionKind::Cool,
            cool_requires_coolable_context,
        );
        catalog.register(
            "goto_requires_new_reachable_target",
            ActionKind::Goto,
            goto_requires_new_reachable_target,
        );
        catalog.register(
            "take_requires_visible_object",
            ActionKind::Take,
            take_requires_visible_object,
        );
        catalog.register(
            "heat_requires_object_in_appliance",
            ActionKind::Heat,
            heat_requires_object_in_appliance,
        );
        catalog
    }

    /// Registers (or replaces) a native predicate.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        action_kind: ActionKind,
        predicate: NativePredicate,
    ) {
        self.natives.insert(
            name.into(),
            NativeRule {
                action_kind,
                predicate,
            },
        );
    }

    /// Registered native names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.natives.keys().map(String::as_str).collect()
    }

    /// Resolves a native rule by name.
    pub fn resolve(&self, name: &str) -> Result<Rule, RuleError> {
        let native = self
            .natives
            .get(name)
            .ok_or_else(|| RuleError::UnknownCatalogRule(name.to_string()))?;
        Ok(Rule::new(
            name,
            native.action_kind.clone(),
            RuleOrigin::Catalog,
            name,
            native.predicate,
        ))
    }

    /// Rebuilds a rule from its persisted form.
    pub fn load(&self, name: &str, origin: RuleOrigin, definition: &str) -> Result<Rule, RuleError> {
        let rule = match origin {
            RuleOrigin::Catalog => self.resolve(definition)?,
            RuleOrigin::Declarative => RuleSpec::parse(definition)?.compile()?,
        };
        if rule.name() != name {
            return Err(RuleError::MalformedDefinition {
                name: name.to_string(),
                reason: format!("definition declares `{}`", rule.name()),
            });
        }
        Ok(rule)
    }

    /// Parses a candidate file and admits what resolves.
    pub fn load_candidates(&self, text: &str) -> Result<CandidateSet, RuleError> {
        let file: CandidateFile =
            toml::from_str(text).map_err(|err| RuleError::MalformedDefinition {
                name: "<candidates>".into(),
                reason: err.to_string(),
            })?;
        let mut set = CandidateSet::default();
        let resolved = file
            .catalog
            .iter()
            .map(|name| self.resolve(name))
            .chain(file.rules.iter().map(RuleSpec::compile));
        for result in resolved {
            match result {
                Ok(rule) => set.rules.push(rule),
                Err(err) => set.rejected.push(err),
            }
        }
        Ok(set)
    }

    /// Every native rule followed by every standard spec.
    pub fn candidates(&self) -> Result<Vec<Rule>, RuleError> {
        let mut rules = self
            .natives
            .keys()
            .map(|name| self.resolve(name))
            .collect::<Result<Vec<_>, _>>()?;
        for spec in standard_specs() {
            rules.push(spec.compile()?);
        }
        Ok(rules)
    }
}

/// Standard feasibility checks: location, hand and receptacle prerequisites.
#[must_use]
pub fn standard_specs() -> Vec<RuleSpec> {
    use Requirement::{AgentAtReceptacle, HandEmpty, HoldingObject, ObjectInReceptacle};

    let spec = |name: &str, action: ActionKind, description: &str, requires: Vec<Requirement>| {
        RuleSpec {
            name: name.to_string(),
            action,
            description: description.to_string(),
            suggestion: None,
            requires,
        }
    };
    let status = |status: &str| Requirement::ReceptacleStatus {
        status: status.to_string(),
    };
    vec![
        spec(
            "take_requires_location_and_empty_hand",
            ActionKind::Take,
            "You are at the receptacle, your hand is empty and the object is there.",
            vec![AgentAtReceptacle, HandEmpty, ObjectInReceptacle],
        ),
        spec(
            "put_requires_location_and_held_object",
            ActionKind::Put,
            "You are at the receptacle holding the object.",
            vec![AgentAtReceptacle, HoldingObject],
        ),
        spec(
            "open_requires_closed_receptacle",
            ActionKind::Open,
            "The receptacle is closed and you are next to it.",
            vec![AgentAtReceptacle, status("closed")],
        ),
        spec(
            "close_requires_open_receptacle",
            ActionKind::Close,
            "The receptacle is open and you are next to it.",
            vec![AgentAtReceptacle, status("open")],
        ),
        spec(
            "clean_requires_location_and_held_object",
            ActionKind::Clean,
            "You are at the sink holding the object.",
            vec![AgentAtReceptacle, HoldingObject],
        ),
        spec(
            "heat_requires_location_and_held_object",
            ActionKind::Heat,
            "You are at the appliance holding the object.",
            vec![AgentAtReceptacle, HoldingObject],
        ),
        spec(
            "cool_requires_location_and_held_object",
            ActionKind::Cool,
            "You are at the appliance holding the object.",
            vec![AgentAtReceptacle, HoldingObject],
        ),
    ]
}

fn cool_requires_coolable_context(
    _state: &State,
    action: &Action,
    context: &SceneGraphExport,
) -> Result<Verdict, RuleError> {
    let obj = argument(action, Argument::Obj)?;
    let recep = argument(action, Argument::Recep)?;
    if !contains_keyword(recep, COOLING_APPLIANCES) {
        return Ok(Verdict::fail(
            format!("{recep} cannot cool anything."),
            "cool it with a fridge",
        ));
    }
    if !contains_keyword(obj, COOLABLE_OBJECTS) {
        return Ok(Verdict::fail(
            format!("{obj} is not something that can be cooled."),
            "choose a food or container to cool",
        ));
    }
    if context.held_item() != Some(obj) {
        return Ok(Verdict::fail(
            format!("You need to hold {obj} to cool it."),
            format!("take {obj} first"),
        ));
    }
    Ok(Verdict::pass(format!("{obj} can be cooled with {recep}.")))
}

fn goto_requires_new_reachable_target(
    state: &State,
    action: &Action,
    _context: &SceneGraphExport,
) -> Result<Verdict, RuleError> {
    let recep = argument(action, Argument::Recep)?;
    if state.current_location() == Some(recep) {
        return Ok(Verdict::fail(
            format!("You are already at {recep}."),
            "act on something here or go somewhere else",
        ));
    }
    if !state.knows_location(recep) {
        return Ok(Verdict::fail(
            format!("{recep} is not a known location."),
            "pick one of the reachable locations",
        ));
    }
    Ok(Verdict::pass(format!("You can go to {recep}.")))
}

fn take_requires_visible_object(
    state: &State,
    action: &Action,
    context: &SceneGraphExport,
) -> Result<Verdict, RuleError> {
    let obj = argument(action, Argument::Obj)?;
    let recep = argument(action, Argument::Recep)?;
    let listed = state
        .location(recep)
        .is_some_and(|contents| contents.items.iter().any(|item| item == obj));
    if listed || context.has_edge(recep, obj, Relation::Contains) {
        Ok(Verdict::pass(format!("{obj} is in {recep}.")))
    } else {
        Ok(Verdict::fail(
            format!("You do not see {obj} in {recep}."),
            format!("look for {obj} elsewhere"),
        ))
    }
}

fn heat_requires_object_in_appliance(
    state: &State,
    action: &Action,
    _context: &SceneGraphExport,
) -> Result<Verdict, RuleError> {
    let obj = argument(action, Argument::Obj)?;
    let recep = argument(action, Argument::Recep)?;
    let contents = state
        .location(recep)
        .ok_or_else(|| RuleError::UnknownLocation(recep.to_string()))?;
    if contents.items.iter().any(|item| item == obj) {
        Ok(Verdict::pass(format!("{obj} is inside {recep}.")))
    } else {
        Ok(Verdict::fail(
            format!("{obj} is not inside {recep}."),
            format!("put {obj} in {recep} first"),
        ))
    }
}
