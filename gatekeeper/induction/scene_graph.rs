use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::model::State;

/// Node id of the agent.
pub const AGENT_NODE: &str = "agent";
/// Location assumed when the agent has never reported a position.
pub const DEFAULT_LOCATION: &str = "middle_of_room";

/// Node type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// The acting agent.
    Agent,
    /// A location or receptacle.
    Location,
    /// A movable item.
    Item,
}

/// Edge relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Relation {
    /// location -> item.
    Contains,
    /// agent -> location.
    At,
    /// agent -> item.
    Holding,
}

/// Exported node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeExport {
    /// Node id (location, item or agent name).
    pub id: String,
    /// Node type.
    #[serde(rename = "type")]
    pub kind: NodeKind,
}

/// Exported edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeExport {
    /// Source node id.
    pub source: String,
    /// Target node id.
    pub target: String,
    /// Relation.
    pub relation: Relation,
}

/// Read-only node/edge snapshot handed to rules as evaluation context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneGraphExport {
    /// Nodes in insertion order.
    #[serde(default)]
    pub nodes: Vec<NodeExport>,
    /// Edges: every `contains`, then `at`, then `holding`.
    #[serde(default)]
    pub edges: Vec<EdgeExport>,
}

impl SceneGraphExport {
    /// Empty snapshot used when no context was recorded.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether the snapshot has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    /// Type of a node, if present.
    #[must_use]
    pub fn node_kind(&self, id: &str) -> Option<NodeKind> {
        self.nodes.iter().find(|n| n.id == id).map(|n| n.kind)
    }

    /// Whether the exact edge exists.
    #[must_use]
    pub fn has_edge(&self, source: &str, target: &str, relation: Relation) -> bool {
        self.edges
            .iter()
            .any(|e| e.relation == relation && e.source == source && e.target == target)
    }

    /// Location the agent is at.
    #[must_use]
    pub fn agent_location(&self) -> Option<&str> {
        self.agent_target(Relation::At)
    }

    /// Item the agent is holding.
    #[must_use]
    pub fn held_item(&self) -> Option<&str> {
        self.agent_target(Relation::Holding)
    }

    /// Locations that contain the item.
    #[must_use]
    pub fn containers_of(&self, item: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.relation == Relation::Contains && e.target == item)
            .map(|e| e.source.as_str())
            .collect()
    }

    /// Items contained in the location.
    #[must_use]
    pub fn contents_of(&self, location: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.relation == Relation::Contains && e.source == location)
            .map(|e| e.target.as_str())
            .collect()
    }

    fn agent_target(&self, relation: Relation) -> Option<&str> {
        self.edges
            .iter()
            .find(|e| e.relation == relation && e.source == AGENT_NODE)
            .map(|e| e.target.as_str())
    }
}

/// Incrementally maintained agent/location/item relation graph.
///
/// `update` is the only mutator. The agent has at most one `at` and one
/// `holding` edge by construction, and a held item is never the target of a
/// `contains` edge.
#[derive(Debug, Clone, Default)]
pub struct SceneGraph {
    nodes: IndexMap<String, NodeKind>,
    contains: IndexSet<(String, String)>,
    at: Option<String>,
    holding: Option<String>,
}

impl SceneGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a graph from a single state.
    #[must_use]
    pub fn from_state(state: &State) -> Self {
        let mut graph = Self::new();
        graph.update(state);
        graph
    }

    /// Folds a state snapshot into the graph. Repeating the same state is a no-op.
    pub fn update(&mut self, state: &State) {
        for (location, contents) in &state.items_in_locations {
            self.ensure_node(location, NodeKind::Location);
            for item in &contents.items {
                self.ensure_node(item, NodeKind::Item);
                self.contains.insert((location.clone(), item.clone()));
            }
        }

        let location = state
            .current_location()
            .map(str::to_string)
            .or_else(|| self.at.clone())
            .unwrap_or_else(|| DEFAULT_LOCATION.to_string());
        self.ensure_node(AGENT_NODE, NodeKind::Agent);
        self.ensure_node(&location, NodeKind::Location);
        self.at = Some(location);

        self.holding = None;
        if let Some(item) = state.held_item() {
            self.ensure_node(item, NodeKind::Item);
            self.contains.retain(|(_, contained)| contained != item);
            self.holding = Some(item.to_string());
        }
    }

    /// Deterministic export of all nodes and edges.
    #[must_use]
    pub fn export(&self) -> SceneGraphExport {
        let nodes = self
            .nodes
            .iter()
            .map(|(id, kind)| NodeExport {
                id: id.clone(),
                kind: *kind,
            })
            .collect();
        let mut edges: Vec<EdgeExport> = self
            .contains
            .iter()
            .map(|(location, item)| EdgeExport {
                source: location.clone(),
                target: item.clone(),
                relation: Relation::Contains,
            })
            .collect();
        for (target, relation) in [(&self.at, Relation::At), (&self.holding, Relation::Holding)] {
            if let Some(target) = target {
                edges.push(EdgeExport {
                    source: AGENT_NODE.to_string(),
                    target: target.clone(),
                    relation,
                });
            }
        }
        SceneGraphExport { nodes, edges }
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.contains.len() + usize::from(self.at.is_some()) + usize::from(self.holding.is_some())
    }

    fn ensure_node(&mut self, id: &str, kind: NodeKind) {
        if !self.nodes.contains_key(id) {
            self.nodes.insert(id.to_string(), kind);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HeldItem, LocationContents, Position, Status};
    use serde_json::json;

    fn state(location: Option<&str>, held: Option<&str>, counter: &[&str]) -> State {
        let mut state = State {
            reachable_locations: vec!["countertop 1".into(), "fridge 1".into()],
            ..State::default()
        };
        state.items_in_locations.insert(
            "countertop 1".into(),
            LocationContents {
                items: counter.iter().map(|s| (*s).to_string()).collect(),
                status: Status::Unknown,
            },
        );
        state.items_in_locations.insert(
            "fridge 1".into(),
            LocationContents {
                items: vec!["egg 1".into()],
                status: Status::Closed,
            },
        );
        state.current_position = Position {
            location_name: location.map(str::to_string),
            status: Status::Unknown,
        };
        state.item_in_hand = HeldItem {
            item_name: held.map(str::to_string),
            status: Status::Unknown,
        };
        state
    }

    fn assert_invariants(export: &SceneGraphExport) {
        let at = export
            .edges
            .iter()
            .filter(|e| e.source == AGENT_NODE && e.relation == Relation::At)
            .count();
        let holding: Vec<_> = export
            .edges
            .iter()
            .filter(|e| e.source == AGENT_NODE && e.relation == Relation::Holding)
            .collect();
        assert_eq!(at, 1);
        assert!(holding.len() <= 1);
        for edge in holding {
            assert!(export.containers_of(&edge.target).is_empty());
        }
    }

    #[test]
    fn update_is_idempotent() {
        let snapshot = state(Some("countertop 1"), Some("apple 1"), &["apple 1", "knife 1"]);
        let mut graph = SceneGraph::new();
        graph.update(&snapshot);
        let first = graph.export();
        graph.update(&snapshot);
        assert_eq!(graph.export(), first);
        assert_eq!(graph.edge_count(), first.edges.len());
    }

    #[test]
    fn invariants_hold_across_updates() {
        let mut graph = SceneGraph::new();
        let sequence = [
            state(None, None, &["apple 1"]),
            state(Some("countertop 1"), None, &["apple 1", "knife 1"]),
            state(Some("countertop 1"), Some("apple 1"), &["apple 1", "knife 1"]),
            state(Some("fridge 1"), Some("knife 1"), &["knife 1"]),
            state(None, None, &[]),
        ];
        for snapshot in &sequence {
            graph.update(snapshot);
            assert_invariants(&graph.export());
        }
        let export = graph.export();
        assert_eq!(export.agent_location(), Some("fridge 1"));
        assert_eq!(export.held_item(), None);
        // Contains edges are only dropped when the item is picked up.
        assert!(!export.has_edge("countertop 1", "apple 1", Relation::Contains));
        assert!(!export.has_edge("countertop 1", "knife 1", Relation::Contains));
        assert!(export.has_edge("fridge 1", "egg 1", Relation::Contains));
    }

    #[test]
    fn missing_position_falls_back() {
        let graph = SceneGraph::from_state(&state(None, None, &[]));
        let export = graph.export();
        assert_eq!(export.agent_location(), Some(DEFAULT_LOCATION));
        assert_eq!(export.node_kind(DEFAULT_LOCATION), Some(NodeKind::Location));
        assert_eq!(export.node_kind(AGENT_NODE), Some(NodeKind::Agent));
    }

    #[test]
    fn held_item_leaves_its_container() {
        let graph = SceneGraph::from_state(&state(
            Some("countertop 1"),
            Some("apple 1"),
            &["apple 1", "knife 1"],
        ));
        let export = graph.export();
        assert_eq!(export.held_item(), Some("apple 1"));
        assert!(export.containers_of("apple 1").is_empty());
        assert_eq!(export.contents_of("countertop 1"), vec!["knife 1"]);
    }

    #[test]
    fn export_uses_wire_names() {
        let graph = SceneGraph::from_state(&state(Some("fridge 1"), None, &[]));
        let value = serde_json::to_value(graph.export()).unwrap();
        assert_eq!(value["nodes"][0], json!({ "id": "countertop 1", "type": "location" }));
        assert!(value["edges"]
            .as_array()
            .unwrap()
            .contains(&json!({ "source": "agent", "target": "fridge 1", "relation": "at" })));
        let back: SceneGraphExport = serde_json::from_value(value).unwrap();
        assert_eq!(back, graph.export());
    }
}
