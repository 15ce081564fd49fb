//! Graph persistence: one JSON document, rewritten whole on every mutation.
//! Readers never observe partial JSON because writes go to a temp file that
//! is renamed into place.

use std::fs;
use std::path::{Path as FsPath, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::NavigationError;

use super::{NavigationGraph, Node, NodeId, Path};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphDoc {
    nodes: Vec<(String, Node)>,
    edges: Vec<(String, Vec<Path>)>,
    current_node_id: Option<NodeId>,
    version: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl GraphDoc {
    fn encode(graph: &NavigationGraph) -> Self {
        let mut nodes: Vec<(String, Node)> = graph
            .nodes()
            .map(|(key, node)| (key.clone(), node.clone()))
            .collect();
        nodes.sort_by(|a, b| a.0.cmp(&b.0));

        let mut edges: Vec<(String, Vec<Path>)> = graph
            .edges()
            .map(|(key, paths)| {
                let kept: Vec<Path> = paths
                    .iter()
                    .filter(|path| {
                        if path.to_node_id.is_pending() {
                            warn!(
                                "Not persisting path {} with pending destination",
                                path.id
                            );
                            false
                        } else {
                            true
                        }
                    })
                    .cloned()
                    .collect();
                (key.clone(), kept)
            })
            .filter(|(_, paths)| !paths.is_empty())
            .collect();
        edges.sort_by(|a, b| a.0.cmp(&b.0));

        Self {
            nodes,
            edges,
            current_node_id: graph.current_node_id.clone(),
            version: graph.version.clone(),
            created_at: graph.created_at,
            updated_at: graph.updated_at,
        }
    }

    fn decode(self) -> NavigationGraph {
        let mut graph = NavigationGraph::new();
        graph.current_node_id = self.current_node_id;
        graph.version = self.version;
        graph.created_at = self.created_at;
        graph.updated_at = self.updated_at;

        for (_, node) in self.nodes {
            graph.add_node(node);
        }
        for (key, paths) in self.edges {
            graph.insert_edge_list(key, paths);
        }
        graph
    }
}

/// Disk access for the navigation graph. Every mutating brain operation
/// saves through here before returning to the caller.
pub struct GraphStore {
    path: PathBuf,
}

impl GraphStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &FsPath {
        &self.path
    }

    /// Load the graph, recovering from a missing or corrupt file with an
    /// empty graph. Corruption costs the stored data; the next save
    /// overwrites the bad document.
    pub fn load(&self) -> NavigationGraph {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No graph file at {}, starting empty", self.path.display());
                return NavigationGraph::new();
            }
            Err(e) => {
                warn!(
                    "Failed to read graph file {}: {e}; starting empty",
                    self.path.display()
                );
                return NavigationGraph::new();
            }
        };

        match serde_json::from_str::<GraphDoc>(&raw) {
            Ok(doc) => {
                let graph = doc.decode();
                let stats = graph.stats();
                info!(
                    nodes = stats.node_count,
                    paths = stats.path_count,
                    "Loaded navigation graph from {}",
                    self.path.display()
                );
                graph
            }
            Err(e) => {
                warn!(
                    "Graph file {} is corrupt ({e}); starting empty and overwriting on next save",
                    self.path.display()
                );
                NavigationGraph::new()
            }
        }
    }

    /// Serialize and atomically rewrite the whole file.
    pub fn save(&self, graph: &mut NavigationGraph) -> Result<(), NavigationError> {
        graph.updated_at = Utc::now();

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let doc = GraphDoc::encode(graph);
        let json = serde_json::to_string_pretty(&doc)?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::Action;
    use crate::graph::{PathValidation, Path as GraphPath};
    use tempfile::TempDir;

    fn sample_graph() -> NavigationGraph {
        let mut graph = NavigationGraph::new();
        let a = NodeId::new("Finder", "aaaa1111aaaa1111");
        let b = NodeId::new("Settings", "bbbb2222bbbb2222");
        graph.add_node(Node::new(a.clone(), Vec::new()));
        graph.add_node(Node::new(b.clone(), Vec::new()));

        let mut path = GraphPath::learned(
            a.clone(),
            vec![Action::click_text("Settings")],
            PathValidation::default(),
        );
        path.to_node_id = b.clone();
        graph.add_path(path).unwrap();
        graph.current_node_id = Some(a);
        graph
    }

    #[test]
    fn graph_round_trips_through_disk() {
        let dir = TempDir::new().unwrap();
        let store = GraphStore::new(dir.path().join("brain").join("navigation.json"));

        let mut graph = sample_graph();
        store.save(&mut graph).unwrap();
        let loaded = store.load();

        assert_eq!(loaded.stats(), graph.stats());
        assert_eq!(loaded.current_node_id, graph.current_node_id);

        let a = NodeId::new("Finder", "aaaa1111aaaa1111");
        let b = NodeId::new("Settings", "bbbb2222bbbb2222");
        assert_eq!(
            loaded.get_path(&a, &b).map(|p| p.id),
            graph.get_path(&a, &b).map(|p| p.id)
        );
        assert_eq!(loaded.get_node(&b), graph.get_node(&b));
    }

    #[test]
    fn edge_list_order_survives_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = GraphStore::new(dir.path().join("navigation.json"));

        let mut graph = NavigationGraph::new();
        let from = NodeId::new("Finder", "aaaa");
        graph.add_node(Node::new(from.clone(), Vec::new()));
        for hash in ["dddd", "bbbb", "cccc"] {
            let to = NodeId::new("Finder", hash);
            graph.add_node(Node::new(to.clone(), Vec::new()));
            let mut path = GraphPath::learned(from.clone(), vec![], PathValidation::default());
            path.to_node_id = to;
            graph.add_path(path).unwrap();
        }

        store.save(&mut graph).unwrap();
        let loaded = store.load();

        let order: Vec<String> = loaded
            .paths_from(&from)
            .iter()
            .map(|p| p.to_node_id.state_hash.clone())
            .collect();
        assert_eq!(order, vec!["dddd", "bbbb", "cccc"]);
    }

    #[test]
    fn corrupt_file_loads_as_empty_graph() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("navigation.json");
        fs::write(&path, "{\"nodes\": [[\"Finder::aaaa\", {\"id\"").unwrap();

        let store = GraphStore::new(&path);
        let graph = store.load();
        assert_eq!(graph.stats().node_count, 0);

        // The next save must produce a well-formed document.
        let mut graph = sample_graph();
        store.save(&mut graph).unwrap();
        assert_eq!(store.load().stats().node_count, 2);
    }

    #[test]
    fn missing_file_loads_as_empty_graph() {
        let dir = TempDir::new().unwrap();
        let store = GraphStore::new(dir.path().join("nope.json"));
        assert_eq!(store.load().stats().node_count, 0);
    }

    #[test]
    fn timestamps_are_iso8601_strings_on_disk() {
        let dir = TempDir::new().unwrap();
        let store = GraphStore::new(dir.path().join("navigation.json"));
        let mut graph = sample_graph();
        store.save(&mut graph).unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let created = value["createdAt"].as_str().unwrap();
        assert!(created.contains('T'));
        assert!(chrono::DateTime::parse_from_rfc3339(created).is_ok());
        assert_eq!(value["version"], "1.0.0");
    }
}
