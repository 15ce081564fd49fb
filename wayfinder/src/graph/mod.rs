//! Persistent directed multigraph of screens (nodes) and learned action
//! sequences (paths). Keys are content-addressed: a node's identity is its
//! program name plus a quantized hash of its visible UI.

mod store;

pub use store::GraphStore;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::actions::Action;
use crate::element::UIElement;
use crate::errors::NavigationError;

pub const GRAPH_VERSION: &str = "1.0.0";

/// Default per-path execution budget in milliseconds.
pub const DEFAULT_PATH_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeId {
    pub program_name: String,
    pub state_hash: String,
}

impl NodeId {
    pub fn new(program_name: impl Into<String>, state_hash: impl Into<String>) -> Self {
        Self {
            program_name: program_name.into(),
            state_hash: state_hash.into(),
        }
    }

    /// The synthetic bootstrap node for the OS quick-launcher.
    pub fn spotlight() -> Self {
        Self::new("Spotlight", "default")
    }

    /// Placeholder destination for freshly learned paths; must never be
    /// persisted.
    pub fn pending() -> Self {
        Self::new("Unknown", "pending")
    }

    pub fn is_pending(&self) -> bool {
        self.state_hash == "pending"
    }

    /// Stable string form used as map key and on disk.
    pub fn key(&self) -> String {
        format!("{}::{}", self.program_name, self.state_hash)
    }

    pub fn from_key(key: &str) -> Option<Self> {
        let (program, hash) = key.split_once("::")?;
        Some(Self::new(program, hash))
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}", self.program_name, self.state_hash)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Optional base64 PNG archival of the screen this node was learned from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(default)]
    pub ui_elements: Vec<UIElement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_visited_at: DateTime<Utc>,
    pub visit_count: u64,
    #[serde(default)]
    pub children_ids: Vec<NodeId>,
}

impl Node {
    pub fn new(id: NodeId, ui_elements: Vec<UIElement>) -> Self {
        let now = Utc::now();
        Self {
            id,
            title: None,
            screenshot: None,
            ui_elements,
            description: None,
            created_at: now,
            last_visited_at: now,
            visit_count: 1,
            children_ids: Vec::new(),
        }
    }

    /// The Spotlight bootstrap node, present from initialization with a
    /// visit count of zero.
    pub fn spotlight() -> Self {
        let mut node = Self::new(NodeId::spotlight(), Vec::new());
        node.title = Some("Spotlight".to_string());
        node.description = Some("OS quick-launcher; universal entry point".to_string());
        node.visit_count = 0;
        node
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathValidation {
    #[serde(default)]
    pub expected_elements: Vec<UIElement>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expected_text: Vec<String>,
    #[serde(rename = "timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for PathValidation {
    fn default() -> Self {
        Self {
            expected_elements: Vec::new(),
            expected_text: Vec::new(),
            timeout_ms: DEFAULT_PATH_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrCheck {
    pub full_text: String,
    pub elements_found: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VlmCheck {
    #[serde(rename = "match")]
    pub matched: bool,
    pub confidence: f32,
    pub reason: String,
}

/// One verification record, appended per executed action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathVerification {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub action_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr_result: Option<OcrCheck>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlm_result: Option<VlmCheck>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathOrigin {
    Vlm,
    Manual,
    Recorded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathMetadata {
    pub success_rate: f64,
    pub last_used: DateTime<Utc>,
    pub usage_count: u64,
    #[serde(rename = "averageDuration_ms")]
    pub average_duration_ms: f64,
    pub learned_by: PathOrigin,
}

impl PathMetadata {
    pub fn new(learned_by: PathOrigin) -> Self {
        Self {
            success_rate: 0.0,
            last_used: Utc::now(),
            usage_count: 0,
            average_duration_ms: 0.0,
            learned_by,
        }
    }

    /// Fold one execution attempt into the running statistics. The usage
    /// count is incremented exactly once per attempt and the success rate
    /// stays the arithmetic mean of all outcomes.
    pub fn record_execution(&mut self, success: bool, duration_ms: f64) {
        self.usage_count += 1;
        let n = self.usage_count as f64;
        let outcome = if success { 1.0 } else { 0.0 };
        self.success_rate = (self.success_rate * (n - 1.0) + outcome) / n;
        self.average_duration_ms += (duration_ms - self.average_duration_ms) / n;
        self.last_used = Utc::now();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Path {
    pub id: Uuid,
    pub from_node_id: NodeId,
    pub to_node_id: NodeId,
    pub actions: Vec<Action>,
    #[serde(default)]
    pub validation: PathValidation,
    #[serde(default)]
    pub verification_history: Vec<PathVerification>,
    pub metadata: PathMetadata,
}

impl Path {
    /// A freshly learned path: destination starts as the pending
    /// placeholder and is patched after the first successful execution.
    pub fn learned(from: NodeId, actions: Vec<Action>, validation: PathValidation) -> Self {
        Self {
            id: Uuid::new_v4(),
            from_node_id: from,
            to_node_id: NodeId::pending(),
            actions,
            validation,
            verification_history: Vec::new(),
            metadata: PathMetadata::new(PathOrigin::Vlm),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphStats {
    pub node_count: usize,
    pub path_count: usize,
    pub version: String,
}

/// In-memory graph. All mutation goes through methods so the path-upsert
/// invariant holds everywhere.
#[derive(Debug, Clone)]
pub struct NavigationGraph {
    nodes: HashMap<String, Node>,
    edges: HashMap<String, Vec<Path>>,
    pub current_node_id: Option<NodeId>,
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for NavigationGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl NavigationGraph {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            nodes: HashMap::new(),
            edges: HashMap::new(),
            current_node_id: None,
            version: GRAPH_VERSION.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn add_node(&mut self, node: Node) {
        self.nodes.insert(node.id.key(), node);
    }

    pub fn get_node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(&id.key())
    }

    pub fn get_node_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id.key())
    }

    pub fn update_node(&mut self, node: Node) {
        self.nodes.insert(node.id.key(), node);
    }

    pub fn contains_node(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(&id.key())
    }

    /// Bump visit bookkeeping on re-identification.
    pub fn record_visit(&mut self, id: &NodeId) {
        if let Some(node) = self.nodes.get_mut(&id.key()) {
            node.visit_count += 1;
            node.last_visited_at = Utc::now();
        }
    }

    /// Upsert an outgoing path. Replaces any existing entry with the same
    /// id or the same destination, preserving its list position; appends
    /// otherwise. At most one path per (from, to) pair survives.
    pub fn add_path(&mut self, path: Path) -> Result<(), NavigationError> {
        if path.to_node_id.is_pending() {
            return Err(NavigationError::InvalidArgument(
                "Refusing to store a path with a pending destination".to_string(),
            ));
        }

        let list = self.edges.entry(path.from_node_id.key()).or_default();
        let matching: Vec<usize> = list
            .iter()
            .enumerate()
            .filter(|(_, existing)| {
                existing.id == path.id || existing.to_node_id == path.to_node_id
            })
            .map(|(index, _)| index)
            .collect();

        match matching.first() {
            Some(&first) => {
                for &index in matching.iter().skip(1).rev() {
                    list.remove(index);
                }
                list[first] = path;
            }
            None => list.push(path),
        }
        Ok(())
    }

    pub fn paths_from(&self, from: &NodeId) -> &[Path] {
        self.edges.get(&from.key()).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get_path(&self, from: &NodeId, to: &NodeId) -> Option<&Path> {
        self.paths_from(from).iter().find(|p| &p.to_node_id == to)
    }

    /// Replace a stored path by id. Returns false when the path is unknown.
    pub fn update_path(&mut self, path: Path) -> bool {
        if let Some(list) = self.edges.get_mut(&path.from_node_id.key()) {
            if let Some(existing) = list.iter_mut().find(|p| p.id == path.id) {
                *existing = path;
                return true;
            }
        }
        false
    }

    /// Explicit prune operation; the only way a path is ever deleted.
    pub fn delete_path(&mut self, id: &Uuid) -> bool {
        for list in self.edges.values_mut() {
            if let Some(index) = list.iter().position(|p| &p.id == id) {
                list.remove(index);
                return true;
            }
        }
        false
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.edges.clear();
        self.current_node_id = None;
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            node_count: self.nodes.len(),
            path_count: self.edges.values().map(Vec::len).sum(),
            version: self.version.clone(),
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&String, &Node)> {
        self.nodes.iter()
    }

    pub fn edges(&self) -> impl Iterator<Item = (&String, &Vec<Path>)> {
        self.edges.iter()
    }

    pub(crate) fn insert_edge_list(&mut self, key: String, paths: Vec<Path>) {
        let kept: Vec<Path> = paths
            .into_iter()
            .filter(|path| {
                if path.to_node_id.is_pending() {
                    warn!("Dropping stored path {} with pending destination", path.id);
                    false
                } else {
                    true
                }
            })
            .collect();
        if !kept.is_empty() {
            self.edges.insert(key, kept);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path_between(from: &NodeId, to: &NodeId) -> Path {
        let mut path = Path::learned(from.clone(), vec![Action::wait(10)], PathValidation::default());
        path.to_node_id = to.clone();
        path
    }

    #[test]
    fn upsert_replaces_same_destination() {
        let mut graph = NavigationGraph::new();
        let a = NodeId::new("Finder", "aaaa");
        let b = NodeId::new("Finder", "bbbb");

        let first = path_between(&a, &b);
        let second = path_between(&a, &b);
        graph.add_path(first.clone()).unwrap();
        graph.add_path(second.clone()).unwrap();

        let paths = graph.paths_from(&a);
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].id, second.id);
    }

    #[test]
    fn upsert_replaces_same_id_with_new_destination() {
        let mut graph = NavigationGraph::new();
        let a = NodeId::new("Finder", "aaaa");
        let b = NodeId::new("Finder", "bbbb");
        let c = NodeId::new("Finder", "cccc");

        let mut path = path_between(&a, &b);
        graph.add_path(path.clone()).unwrap();
        path.to_node_id = c.clone();
        graph.add_path(path).unwrap();

        let paths = graph.paths_from(&a);
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].to_node_id, c);
    }

    #[test]
    fn upsert_preserves_insertion_order() {
        let mut graph = NavigationGraph::new();
        let a = NodeId::new("Finder", "aaaa");
        let b = NodeId::new("Finder", "bbbb");
        let c = NodeId::new("Finder", "cccc");

        graph.add_path(path_between(&a, &b)).unwrap();
        graph.add_path(path_between(&a, &c)).unwrap();
        // Re-learning the first edge must keep it in first position.
        graph.add_path(path_between(&a, &b)).unwrap();

        let destinations: Vec<&NodeId> =
            graph.paths_from(&a).iter().map(|p| &p.to_node_id).collect();
        assert_eq!(destinations, vec![&b, &c]);
    }

    #[test]
    fn pending_destinations_are_rejected() {
        let mut graph = NavigationGraph::new();
        let a = NodeId::new("Finder", "aaaa");
        let pending = Path::learned(a, vec![Action::wait(10)], PathValidation::default());
        assert!(graph.add_path(pending).is_err());
    }

    #[test]
    fn success_rate_converges_to_outcome_mean() {
        let mut metadata = PathMetadata::new(PathOrigin::Vlm);
        let outcomes = [true, false, true, true, false, true];
        for &outcome in &outcomes {
            metadata.record_execution(outcome, 100.0);
        }
        let expected = outcomes.iter().filter(|&&o| o).count() as f64 / outcomes.len() as f64;
        assert!((metadata.success_rate - expected).abs() < 1e-9);
        assert_eq!(metadata.usage_count, outcomes.len() as u64);
        assert!((metadata.average_duration_ms - 100.0).abs() < 1e-9);
    }

    #[test]
    fn delete_path_is_keyed_by_id() {
        let mut graph = NavigationGraph::new();
        let a = NodeId::new("Finder", "aaaa");
        let b = NodeId::new("Finder", "bbbb");
        let path = path_between(&a, &b);
        let id = path.id;
        graph.add_path(path).unwrap();

        assert!(graph.delete_path(&id));
        assert!(!graph.delete_path(&id));
        assert!(graph.paths_from(&a).is_empty());
    }
}
