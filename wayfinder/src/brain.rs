//! Top-level orchestration: identify the current screen, find or learn a
//! path to a target, execute it with per-step verification, and fold the
//! result back into the persistent graph.
//!
//! Every public entry point serializes behind one async mutex; a single
//! logical task drives a navigation from start to finish.

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine as _;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::actions::{Action, KeyModifier};
use crate::config::BrainConfig;
use crate::element::UIElement;
use crate::errors::NavigationError;
use crate::executor::ActionExecutor;
use crate::graph::{
    GraphStats, GraphStore, NavigationGraph, Node, NodeId, OcrCheck, Path, PathValidation,
    PathVerification, VlmCheck,
};
use crate::hash::hash_elements;
use crate::input::InputDriver;
use crate::llm::Orchestrator;
use crate::perception::Perception;
use crate::shadow::ShadowDom;
use crate::vlm::VlmAdapter;

/// Plans below this confidence are rejected outright.
const MIN_LEARN_CONFIDENCE: f32 = 0.3;
/// VLM verification must be at least this confident to pass.
const MIN_VERIFY_CONFIDENCE: f32 = 0.5;
/// Backoff before re-executing a failed action that allows retry.
const ACTION_RETRY_DELAY: Duration = Duration::from_secs(1);
/// Settle after launching an application before re-identifying.
const LAUNCH_SETTLE: Duration = Duration::from_secs(1);
/// Settle after closing the frontmost application.
const CLOSE_SETTLE: Duration = Duration::from_millis(500);

/// Result of a navigation entry point. The brain never throws across its
/// public surface; failures come back as `success = false` plus a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationOutcome {
    pub success: bool,
    pub current_node: Option<NodeId>,
    pub message: String,
}

struct ExecutionReport {
    success: bool,
    message: String,
}

struct BrainState {
    graph: NavigationGraph,
    shadow: Option<ShadowDom>,
}

pub struct Brain {
    config: BrainConfig,
    perception: Arc<Perception>,
    executor: ActionExecutor,
    vlm: VlmAdapter,
    store: GraphStore,
    state: Mutex<BrainState>,
    cancel: CancellationToken,
}

impl Brain {
    pub fn new(
        config: BrainConfig,
        perception: Arc<Perception>,
        input: Arc<dyn InputDriver>,
        llm: Arc<Orchestrator>,
    ) -> Self {
        let executor = ActionExecutor::new(input, Arc::clone(&perception), config.action_settle);
        let vlm = VlmAdapter::new(llm);
        let store = GraphStore::new(&config.graph_path);

        Self {
            config,
            perception,
            executor,
            vlm,
            store,
            state: Mutex::new(BrainState {
                graph: NavigationGraph::new(),
                shadow: None,
            }),
            cancel: CancellationToken::new(),
        }
    }

    /// Load the persisted graph and make sure the Spotlight bootstrap node
    /// exists.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<(), NavigationError> {
        let mut state = self.state.lock().await;
        state.graph = self.store.load();

        let spotlight = NodeId::spotlight();
        if !state.graph.contains_node(&spotlight) {
            state.graph.add_node(Node::spotlight());
        }
        self.store.save(&mut state.graph)?;

        let stats = state.graph.stats();
        info!(
            nodes = stats.node_count,
            paths = stats.path_count,
            "Navigation brain initialized"
        );
        Ok(())
    }

    /// Capture and identify the screen in front of us. Returns `None` when
    /// capture or the vision model yields nothing usable.
    #[instrument(skip(self))]
    pub async fn identify_current_node(&self) -> Option<NodeId> {
        let mut state = self.state.lock().await;
        match self.identify_locked(&mut state).await {
            Ok(node_id) => Some(node_id),
            Err(e) => {
                warn!("Identification failed: {e}");
                None
            }
        }
    }

    /// Register a node directly, bypassing perception. Useful for manual
    /// graph seeding.
    pub async fn add_node(
        &self,
        program_name: &str,
        ui_elements: Vec<UIElement>,
        description: Option<String>,
    ) -> Result<NodeId, NavigationError> {
        let mut state = self.state.lock().await;
        let node_id = NodeId::new(program_name, hash_elements(&ui_elements));

        if state.graph.contains_node(&node_id) {
            state.graph.record_visit(&node_id);
        } else {
            let mut node = Node::new(node_id.clone(), ui_elements);
            node.description = description;
            state.graph.add_node(node);
        }
        self.store.save(&mut state.graph)?;
        Ok(node_id)
    }

    /// Ask the vision model for an action sequence to `target`, starting at
    /// the current node. The returned path carries the pending destination
    /// placeholder and is not stored.
    pub async fn learn_path(&self, target: &str) -> Result<Path, NavigationError> {
        let mut state = self.state.lock().await;
        self.learn_path_locked(&mut state, target).await
    }

    /// Execute a path's actions with per-step verification, updating its
    /// metadata and (when the path is known to the graph) persisting it.
    pub async fn execute_path(&self, path: &mut Path) -> bool {
        let mut state = self.state.lock().await;
        let report = self.execute_path_locked(&mut state, path).await;
        if state.graph.update_path(path.clone()) {
            if let Err(e) = self.store.save(&mut state.graph) {
                warn!("Failed to persist path metadata: {e}");
            }
        }
        report.success
    }

    /// Full navigation: replay a known path to a node matching `target`,
    /// or learn a new one, execute it, and commit it on success.
    #[instrument(skip(self))]
    pub async fn navigate_to(&self, target: &str) -> NavigationOutcome {
        let mut state = self.state.lock().await;
        match self.navigate_locked(&mut state, target).await {
            Ok(outcome) => outcome,
            Err(e) => NavigationOutcome {
                success: false,
                current_node: state.graph.current_node_id.clone(),
                message: e.to_string(),
            },
        }
    }

    /// Canonical launcher sequence: Spotlight hotkey, app name, Enter, then
    /// settle and re-identify.
    #[instrument(skip(self))]
    pub async fn launch_app(&self, app_name: &str) -> bool {
        let mut state = self.state.lock().await;

        let actions = [
            Action::hotkey(&["space"], &[KeyModifier::Command])
                .with_description("Open the system launcher"),
            Action::type_text(app_name, true)
                .with_description(format!("Launch {app_name}")),
        ];
        for action in &actions {
            if !self.executor.execute(action).await {
                return false;
            }
        }

        sleep(LAUNCH_SETTLE).await;
        match self.identify_locked(&mut state).await {
            Ok(node_id) => {
                info!("Launched {app_name}, now at {node_id}");
                true
            }
            Err(e) => {
                warn!("Launched {app_name} but could not identify the result: {e}");
                false
            }
        }
    }

    /// Quit the frontmost application. A helper for external callers, not
    /// part of navigation itself.
    pub async fn close_current_app(&self) -> bool {
        let _state = self.state.lock().await;
        let action = Action::hotkey(&["q"], &[KeyModifier::Command]);
        let ok = self.executor.execute(&action).await;
        sleep(CLOSE_SETTLE).await;
        ok
    }

    /// Delete paths that keep failing: at least `min_usage` attempts and a
    /// success rate below `min_success_rate`.
    pub async fn prune_paths(
        &self,
        min_success_rate: f64,
        min_usage: u64,
    ) -> Result<usize, NavigationError> {
        let mut state = self.state.lock().await;
        let doomed: Vec<uuid::Uuid> = state
            .graph
            .edges()
            .flat_map(|(_, paths)| paths.iter())
            .filter(|path| {
                path.metadata.usage_count >= min_usage
                    && path.metadata.success_rate < min_success_rate
            })
            .map(|path| path.id)
            .collect();

        for id in &doomed {
            state.graph.delete_path(id);
        }
        if !doomed.is_empty() {
            self.store.save(&mut state.graph)?;
        }
        Ok(doomed.len())
    }

    /// Cooperative cancellation, polled at action boundaries.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn current_node_id(&self) -> Option<NodeId> {
        self.state.lock().await.graph.current_node_id.clone()
    }

    pub async fn current_node(&self) -> Option<Node> {
        let state = self.state.lock().await;
        let id = state.graph.current_node_id.clone()?;
        state.graph.get_node(&id).cloned()
    }

    pub async fn shadow_dom(&self) -> Option<ShadowDom> {
        self.state.lock().await.shadow.clone()
    }

    pub async fn graph_stats(&self) -> GraphStats {
        self.state.lock().await.graph.stats()
    }

    pub async fn paths_from_current(&self) -> Vec<Path> {
        let state = self.state.lock().await;
        match &state.graph.current_node_id {
            Some(id) => state.graph.paths_from(id).to_vec(),
            None => Vec::new(),
        }
    }

    // ---- internals; all run under the entry-point lock ----

    async fn identify_locked(&self, state: &mut BrainState) -> Result<NodeId, NavigationError> {
        let png = self.perception.capture().await?;
        let ocr = self.perception.analyze(&png).await;

        let ocr_texts: Vec<String> = ocr
            .as_ref()
            .map(|o| o.elements.iter().map(|e| e.text.clone()).collect())
            .unwrap_or_default();

        let program = self.vlm.extract_program_name(&png, &ocr_texts).await;
        let screen = self.vlm.identify_ui_elements(&png, ocr.as_ref()).await;

        if program == "Unknown" && screen.elements.is_empty() {
            return Err(NavigationError::IdentificationFailed(
                "Vision model produced neither a program name nor elements".to_string(),
            ));
        }

        let node_id = NodeId::new(program, hash_elements(&screen.elements));
        debug!("Identified screen as {node_id}");

        if state.graph.contains_node(&node_id) {
            state.graph.record_visit(&node_id);
        } else {
            let mut node = Node::new(node_id.clone(), screen.elements.clone());
            node.description = Some(screen.description.clone());
            if self.config.store_screenshots {
                node.screenshot =
                    Some(base64::engine::general_purpose::STANDARD.encode(&png));
            }
            state.graph.add_node(node);
        }
        state.graph.current_node_id = Some(node_id.clone());

        state.shadow = Some(ShadowDom::from_parts(
            node_id.clone(),
            &png,
            ocr,
            screen.elements,
            Some(screen.description),
        ));

        self.store.save(&mut state.graph)?;
        Ok(node_id)
    }

    async fn learn_path_locked(
        &self,
        state: &mut BrainState,
        target: &str,
    ) -> Result<Path, NavigationError> {
        let from = match state.graph.current_node_id.clone() {
            Some(id) => id,
            None => self.identify_locked(state).await?,
        };

        let png = self.perception.capture().await?;
        let ocr = self.perception.analyze(&png).await;
        let plan = self.vlm.learn_navigation_path(&png, target, ocr.as_ref()).await;

        if plan.actions.is_empty() || plan.confidence < MIN_LEARN_CONFIDENCE {
            return Err(NavigationError::LearningRejected(format!(
                "Plan for '{target}' has {} actions at confidence {:.2}",
                plan.actions.len(),
                plan.confidence
            )));
        }

        info!(
            actions = plan.actions.len(),
            confidence = plan.confidence,
            "Learned candidate path to '{target}'"
        );

        let validation = PathValidation {
            timeout_ms: self.config.default_timeout.as_millis() as u64,
            ..PathValidation::default()
        };
        Ok(Path::learned(from, plan.actions, validation))
    }

    async fn execute_path_locked(
        &self,
        state: &mut BrainState,
        path: &mut Path,
    ) -> ExecutionReport {
        let started = Instant::now();
        let budget = Duration::from_millis(path.validation.timeout_ms.max(1));
        let actions = path.actions.clone();
        let mut failure: Option<String> = None;

        for (index, action) in actions.iter().enumerate() {
            if self.cancel.is_cancelled() {
                failure = Some("cancelled".to_string());
                path.verification_history
                    .push(failed_step(index, "cancelled"));
                break;
            }
            if started.elapsed() > budget {
                failure = Some("timeout".to_string());
                path.verification_history.push(failed_step(index, "timeout"));
                break;
            }

            let mut ok = self.executor.execute(action).await;
            if !ok && action.retry_on_failure {
                debug!("Retrying action {index} once");
                sleep(ACTION_RETRY_DELAY).await;
                ok = self.executor.execute(action).await;
            }
            if !ok {
                let reason = format!("Action {index} ({}) failed", action.data.kind());
                path.verification_history.push(failed_step(index, &reason));
                failure = Some(reason);
                break;
            }

            sleep(self.config.verify_settle).await;

            match self.verify_step(state, path, index).await {
                Ok(entry) => {
                    let failed = !entry.success;
                    let reason = entry.failure_reason.clone();
                    path.verification_history.push(entry);
                    if failed {
                        failure = reason.or_else(|| Some("verification failed".to_string()));
                        break;
                    }
                }
                Err(e) => {
                    let reason = format!("Could not verify action {index}: {e}");
                    path.verification_history.push(failed_step(index, &reason));
                    failure = Some(reason);
                    break;
                }
            }
        }

        let success = failure.is_none();
        path.metadata
            .record_execution(success, started.elapsed().as_millis() as f64);

        ExecutionReport {
            success,
            message: failure.unwrap_or_else(|| "ok".to_string()),
        }
    }

    /// Rebuild the shadow snapshot and check it against the path's
    /// validation criteria.
    async fn verify_step(
        &self,
        state: &mut BrainState,
        path: &Path,
        index: usize,
    ) -> Result<PathVerification, NavigationError> {
        let png = self.perception.capture().await?;
        let node_id = state
            .graph
            .current_node_id
            .clone()
            .unwrap_or_else(NodeId::pending);
        let shadow = ShadowDom::from_capture(&self.perception, &self.vlm, node_id, &png).await;

        let mut entry = PathVerification {
            timestamp: Utc::now(),
            success: true,
            action_index: index,
            ocr_result: shadow.ocr.as_ref().map(|ocr| OcrCheck {
                full_text: ocr.full_text.clone(),
                elements_found: ocr.elements.len(),
            }),
            vlm_result: None,
            failure_reason: None,
        };

        if let Some(missing) = path
            .validation
            .expected_text
            .iter()
            .find(|query| !shadow.contains_text(query))
        {
            entry.success = false;
            entry.failure_reason = Some(format!("Expected text not found: {missing}"));
            state.shadow = Some(shadow);
            return Ok(entry);
        }

        if !path.validation.expected_elements.is_empty() {
            let outcome = self
                .vlm
                .verify_screen_state(
                    &png,
                    &path.validation.expected_elements,
                    &path.validation.expected_text,
                )
                .await;
            entry.vlm_result = Some(VlmCheck {
                matched: outcome.matched,
                confidence: outcome.confidence,
                reason: outcome.reason.clone(),
            });
            if !outcome.matched || outcome.confidence < MIN_VERIFY_CONFIDENCE {
                entry.success = false;
                entry.failure_reason = Some(outcome.reason);
            }
        }

        state.shadow = Some(shadow);
        Ok(entry)
    }

    async fn navigate_locked(
        &self,
        state: &mut BrainState,
        target: &str,
    ) -> Result<NavigationOutcome, NavigationError> {
        let current = match state.graph.current_node_id.clone() {
            Some(id) => id,
            None => self.identify_locked(state).await?,
        };

        // Replay a known edge when one exists.
        if let Some(destination) = find_target_node(&state.graph, target) {
            if let Some(known) = state.graph.get_path(&current, &destination).cloned() {
                debug!("Replaying known path {} -> {}", current, destination);
                let mut path = known;
                let report = self.execute_path_locked(state, &mut path).await;
                state.graph.update_path(path.clone());

                if report.success {
                    state.graph.record_visit(&destination);
                    state.graph.current_node_id = Some(destination.clone());
                    self.store.save(&mut state.graph)?;
                    return Ok(NavigationOutcome {
                        success: true,
                        current_node: Some(destination.clone()),
                        message: format!("Replayed known path to {destination}"),
                    });
                }

                self.store.save(&mut state.graph)?;
                return Ok(NavigationOutcome {
                    success: false,
                    current_node: state.graph.current_node_id.clone(),
                    message: format!(
                        "Known path to {destination} failed ({}); it may be stale",
                        report.message
                    ),
                });
            }
        }

        // No usable edge: learn one, execute it, commit on success.
        let mut path = self.learn_path_locked(state, target).await?;
        let report = self.execute_path_locked(state, &mut path).await;
        if !report.success {
            return Ok(NavigationOutcome {
                success: false,
                current_node: state.graph.current_node_id.clone(),
                message: format!("Learned path failed during execution: {}", report.message),
            });
        }

        // Patch the pending placeholder with the re-identified destination.
        // A path whose destination cannot be established is never stored.
        match self.identify_locked(state).await {
            Ok(destination) => {
                path.to_node_id = destination.clone();
                state.graph.add_path(path)?;
                self.store.save(&mut state.graph)?;
                info!("Committed new path {} -> {}", current, destination);
                Ok(NavigationOutcome {
                    success: true,
                    current_node: Some(destination),
                    message: format!("Learned and executed a new path to '{target}'"),
                })
            }
            Err(e) => Ok(NavigationOutcome {
                success: false,
                current_node: state.graph.current_node_id.clone(),
                message: format!(
                    "Actions executed but the destination could not be identified ({e}); \
                     path not saved"
                ),
            }),
        }
    }
}

fn failed_step(index: usize, reason: &str) -> PathVerification {
    PathVerification {
        timestamp: Utc::now(),
        success: false,
        action_index: index,
        ocr_result: None,
        vlm_result: None,
        failure_reason: Some(reason.to_string()),
    }
}

/// Find a stored node matching a natural-language target: case-insensitive
/// substring over program name, title, and description.
fn find_target_node(graph: &NavigationGraph, target: &str) -> Option<NodeId> {
    let needle = target.to_lowercase();
    let matches_needle = |value: &Option<String>| {
        value
            .as_deref()
            .map(|v| v.to_lowercase().contains(&needle))
            .unwrap_or(false)
    };

    graph
        .nodes()
        .filter(|(_, node)| {
            node.id.program_name.to_lowercase().contains(&needle)
                || matches_needle(&node.title)
                || matches_needle(&node.description)
        })
        .map(|(_, node)| node.id.clone())
        .next()
}
