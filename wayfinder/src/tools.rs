//! Typed request/response shapes for the three tool-invocable operations
//! the brain exposes to an agent loop. Schema derivation lets the caller
//! surface them to a model without hand-written JSON schemas.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::brain::{Brain, NavigationOutcome};
use crate::graph::{GraphStats, Node, NodeId, Path};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct NavigateToArgs {
    #[schemars(description = "Natural-language description of the target screen")]
    pub target: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct GetCurrentNodeArgs {}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct LaunchAppArgs {
    #[schemars(description = "Name of the application to launch via the system launcher")]
    pub app_name: String,
}

/// Compact view of an outgoing path, enough for an agent to pick one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathSummary {
    pub id: Uuid,
    pub to_node_id: NodeId,
    pub success_rate: f64,
    pub usage_count: u64,
}

impl From<&Path> for PathSummary {
    fn from(path: &Path) -> Self {
        Self {
            id: path.id,
            to_node_id: path.to_node_id.clone(),
            success_rate: path.metadata.success_rate,
            usage_count: path.metadata.usage_count,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetCurrentNodeResult {
    pub current_node: Option<Node>,
    pub available_paths: Vec<PathSummary>,
    pub graph_stats: GraphStats,
}

impl Brain {
    /// `navigate_to { target } → { success, currentNode, message }`
    pub async fn tool_navigate_to(&self, args: NavigateToArgs) -> NavigationOutcome {
        self.navigate_to(&args.target).await
    }

    /// `get_current_node {} → { currentNode, availablePaths, graphStats }`
    pub async fn tool_get_current_node(&self, _args: GetCurrentNodeArgs) -> GetCurrentNodeResult {
        let current_node = self.current_node().await;
        let available_paths = self
            .paths_from_current()
            .await
            .iter()
            .map(PathSummary::from)
            .collect();

        GetCurrentNodeResult {
            current_node,
            available_paths,
            graph_stats: self.graph_stats().await,
        }
    }

    /// `launch_app { appName } → success`
    pub async fn tool_launch_app(&self, args: LaunchAppArgs) -> bool {
        self.launch_app(&args.app_name).await
    }
}
