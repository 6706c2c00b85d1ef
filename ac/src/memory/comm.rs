//! Inter-worker communication memory
//!
//! Typed messages between workers plus a latest-per-worker context record.
//! Distinct from the execution log: this is a mailbox used to shape the
//! next prompt, not an archive.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use vectorstore::{MIME_TEXT, MetaValue, Metadata, VectorStore};

/// Message categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Context,
    Error,
    Result,
    Request,
    Advice,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MessageType::Context => "context",
            MessageType::Error => "error",
            MessageType::Result => "result",
            MessageType::Request => "request",
            MessageType::Advice => "advice",
        };
        f.write_str(s)
    }
}

/// Worker execution state as recorded in context records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Starting,
    InProgress,
    Completed,
    Failed,
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionState::Starting => "starting",
            ExecutionState::InProgress => "in_progress",
            ExecutionState::Completed => "completed",
            ExecutionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What a worker produced, as seen by downstream consumers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerOutputs {
    pub success: bool,
    pub message_content: String,
    pub execution_time_secs: f64,
    pub failure_reasons: Vec<String>,
}

/// A message between two workers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub from_agent: String,
    pub to_agent: String,
    pub message_type: MessageType,
    pub content: String,
    pub metadata: Metadata,
    pub timestamp: String,
    pub message_id: String,
}

/// Latest-known context for a worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentContext {
    pub agent_name: String,
    pub current_task: String,
    pub execution_state: ExecutionState,
    pub relevant_info: Metadata,
    pub dependencies: Vec<String>,
    pub outputs: Option<WorkerOutputs>,
    pub timestamp: String,
}

struct CommInner {
    /// Latest record per worker
    contexts: HashMap<String, AgentContext>,
    /// Append-only; append order is time order
    messages: Vec<AgentMessage>,
    /// worker -> upstream workers, injected at driver startup
    dependencies: BTreeMap<String, Vec<String>>,
    store: Option<VectorStore>,
}

/// Communication memory manager
pub struct CommunicationMemory {
    inner: Mutex<CommInner>,
}

impl Default for CommunicationMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl CommunicationMemory {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CommInner {
                contexts: HashMap::new(),
                messages: Vec::new(),
                dependencies: BTreeMap::new(),
                store: None,
            }),
        }
    }

    pub async fn attach_store(&self, store: VectorStore) {
        self.inner.lock().await.store = Some(store);
    }

    pub async fn has_store(&self) -> bool {
        self.inner.lock().await.store.is_some()
    }

    pub async fn close(&self) {
        self.inner.lock().await.store = None;
    }

    /// Inject the dependency map derived from the chain configuration
    pub async fn set_dependencies(&self, dependencies: BTreeMap<String, Vec<String>>) {
        self.inner.lock().await.dependencies = dependencies;
    }

    pub async fn dependencies_of(&self, agent_name: &str) -> Vec<String> {
        self.inner
            .lock()
            .await
            .dependencies
            .get(agent_name)
            .cloned()
            .unwrap_or_default()
    }

    /// Overwrite the context record for a worker and mirror it to the store
    pub async fn update_agent_context(
        &self,
        agent_name: &str,
        current_task: &str,
        execution_state: ExecutionState,
        relevant_info: Metadata,
        dependencies: Vec<String>,
        outputs: Option<WorkerOutputs>,
    ) {
        let context = AgentContext {
            agent_name: agent_name.to_string(),
            current_task: current_task.to_string(),
            execution_state,
            relevant_info,
            dependencies,
            outputs,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        let mut inner = self.inner.lock().await;

        let content = format!(
            "Agent Context: {}\nTask: {}\nState: {}\nTimestamp: {}\nDependencies: {}\nOutputs: {}",
            context.agent_name,
            context.current_task,
            context.execution_state,
            context.timestamp,
            context.dependencies.join(", "),
            context
                .outputs
                .as_ref()
                .and_then(|o| serde_json::to_string(o).ok())
                .unwrap_or_default(),
        );
        let metadata: Metadata = [
            ("type".to_string(), MetaValue::from("agent_context")),
            ("agent_name".to_string(), MetaValue::from(context.agent_name.clone())),
            ("execution_state".to_string(), MetaValue::from(context.execution_state.to_string())),
            ("timestamp".to_string(), MetaValue::from(context.timestamp.clone())),
        ]
        .into_iter()
        .collect();

        if let Some(store) = inner.store.as_mut() {
            if let Err(e) = store.add(&content, MIME_TEXT, metadata) {
                warn!(agent = agent_name, error = %e, "failed to mirror context to store");
            }
        }

        debug!(agent = agent_name, state = %execution_state, "updated agent context");
        inner.contexts.insert(agent_name.to_string(), context);
    }

    pub async fn get_agent_context(&self, agent_name: &str) -> Option<AgentContext> {
        self.inner.lock().await.contexts.get(agent_name).cloned()
    }

    /// Send a typed message; returns its id
    pub async fn send_message(
        &self,
        from_agent: &str,
        to_agent: &str,
        message_type: MessageType,
        content: &str,
        metadata: Metadata,
    ) -> String {
        let message = AgentMessage {
            from_agent: from_agent.to_string(),
            to_agent: to_agent.to_string(),
            message_type,
            content: content.to_string(),
            metadata,
            timestamp: chrono::Utc::now().to_rfc3339(),
            message_id: Uuid::now_v7().to_string(),
        };

        let mut inner = self.inner.lock().await;

        let mirror = format!(
            "Message: {} -> {}\nType: {}\nContent: {}\nTimestamp: {}",
            message.from_agent, message.to_agent, message.message_type, message.content, message.timestamp,
        );
        let mirror_meta: Metadata = [
            ("type".to_string(), MetaValue::from("agent_message")),
            ("from_agent".to_string(), MetaValue::from(message.from_agent.clone())),
            ("to_agent".to_string(), MetaValue::from(message.to_agent.clone())),
            ("message_type".to_string(), MetaValue::from(message.message_type.to_string())),
            ("message_id".to_string(), MetaValue::from(message.message_id.clone())),
        ]
        .into_iter()
        .collect();

        if let Some(store) = inner.store.as_mut() {
            if let Err(e) = store.add(&mirror, MIME_TEXT, mirror_meta) {
                warn!(error = %e, "failed to mirror message to store");
            }
        }

        debug!(from = from_agent, to = to_agent, kind = %message_type, "message sent");

        let id = message.message_id.clone();
        inner.messages.push(message);
        id
    }

    /// Messages addressed to a worker, newest first
    pub async fn get_messages_for_agent(
        &self,
        agent_name: &str,
        message_type: Option<MessageType>,
        from_agent: Option<&str>,
        limit: usize,
    ) -> Vec<AgentMessage> {
        let inner = self.inner.lock().await;
        inner
            .messages
            .iter()
            .rev()
            .filter(|m| m.to_agent == agent_name)
            .filter(|m| message_type.is_none_or(|t| m.message_type == t))
            .filter(|m| from_agent.is_none_or(|f| m.from_agent == f))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Merged, time-ordered conversation between two workers
    pub async fn conversation_between(&self, agent_a: &str, agent_b: &str, limit: usize) -> Vec<AgentMessage> {
        let inner = self.inner.lock().await;
        let conversation: Vec<AgentMessage> = inner
            .messages
            .iter()
            .filter(|m| {
                (m.from_agent == agent_a && m.to_agent == agent_b)
                    || (m.from_agent == agent_b && m.to_agent == agent_a)
            })
            .cloned()
            .collect();

        let skip = conversation.len().saturating_sub(limit);
        conversation.into_iter().skip(skip).collect()
    }

    /// Latest outputs of each upstream worker
    pub async fn get_dependency_outputs(&self, agent_name: &str) -> BTreeMap<String, WorkerOutputs> {
        let inner = self.inner.lock().await;

        let Some(deps) = inner.dependencies.get(agent_name) else {
            return BTreeMap::new();
        };

        deps.iter()
            .filter_map(|dep| {
                inner
                    .contexts
                    .get(dep)
                    .and_then(|ctx| ctx.outputs.clone())
                    .map(|outputs| (dep.clone(), outputs))
            })
            .collect()
    }

    /// Dependency contexts plus the most recently completed other workers
    pub async fn relevant_contexts_for(&self, agent_name: &str) -> Vec<AgentContext> {
        let inner = self.inner.lock().await;
        let mut contexts = Vec::new();

        if let Some(deps) = inner.dependencies.get(agent_name) {
            for dep in deps {
                if let Some(ctx) = inner.contexts.get(dep) {
                    contexts.push(ctx.clone());
                }
            }
        }

        let mut recent: Vec<&AgentContext> = inner
            .contexts
            .values()
            .filter(|ctx| ctx.execution_state == ExecutionState::Completed && ctx.agent_name != agent_name)
            .collect();
        recent.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        contexts.extend(recent.into_iter().take(3).cloned());

        contexts
    }

    /// One-line suggestions derived from pending dependencies and unread
    /// messages
    pub async fn suggest_next_actions(&self, agent_name: &str) -> Vec<String> {
        let current = self.get_agent_context(agent_name).await;

        let Some(current) = current else {
            return vec!["start executing the task".to_string()];
        };

        let mut suggestions = Vec::new();

        let incomplete: Vec<String> = {
            let inner = self.inner.lock().await;
            current
                .dependencies
                .iter()
                .filter(|dep| {
                    inner
                        .contexts
                        .get(*dep)
                        .is_none_or(|ctx| ctx.execution_state != ExecutionState::Completed)
                })
                .cloned()
                .collect()
        };

        if !incomplete.is_empty() {
            suggestions.push(format!("waiting on incomplete dependencies: {}", incomplete.join(", ")));
        }

        if !self
            .get_messages_for_agent(agent_name, Some(MessageType::Error), None, usize::MAX)
            .await
            .is_empty()
        {
            suggestions.push("address the error messages received".to_string());
        }

        if !self
            .get_messages_for_agent(agent_name, Some(MessageType::Context), None, usize::MAX)
            .await
            .is_empty()
        {
            suggestions.push("incorporate the context information received".to_string());
        }

        if suggestions.is_empty() {
            vec!["continue current task".to_string()]
        } else {
            suggestions
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(pairs: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
            .collect()
    }

    #[tokio::test]
    async fn test_context_overwrite_keeps_latest() {
        let memory = CommunicationMemory::new();

        memory
            .update_agent_context("writer", "write code", ExecutionState::Starting, Metadata::new(), vec![], None)
            .await;
        memory
            .update_agent_context(
                "writer",
                "write code",
                ExecutionState::Completed,
                Metadata::new(),
                vec![],
                Some(WorkerOutputs {
                    success: true,
                    message_content: "done".to_string(),
                    ..Default::default()
                }),
            )
            .await;

        let context = memory.get_agent_context("writer").await.unwrap();
        assert_eq!(context.execution_state, ExecutionState::Completed);
        assert!(context.outputs.unwrap().success);
    }

    #[tokio::test]
    async fn test_message_filtering() {
        let memory = CommunicationMemory::new();

        memory
            .send_message("test_runner", "refactor", MessageType::Error, "tests failed", Metadata::new())
            .await;
        memory
            .send_message("test_runner", "refactor", MessageType::Context, "environment info", Metadata::new())
            .await;
        memory
            .send_message("writer", "scanner", MessageType::Result, "code written", Metadata::new())
            .await;

        let errors = memory
            .get_messages_for_agent("refactor", Some(MessageType::Error), None, 10)
            .await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].content, "tests failed");

        let all = memory.get_messages_for_agent("refactor", None, None, 10).await;
        assert_eq!(all.len(), 2);
        // Newest first
        assert_eq!(all[0].message_type, MessageType::Context);

        let from_writer = memory
            .get_messages_for_agent("scanner", None, Some("writer"), 10)
            .await;
        assert_eq!(from_writer.len(), 1);
    }

    #[tokio::test]
    async fn test_dependency_outputs() {
        let memory = CommunicationMemory::new();
        memory.set_dependencies(deps(&[("test_gen", &["writer"])])).await;

        // Upstream has no outputs yet
        assert!(memory.get_dependency_outputs("test_gen").await.is_empty());

        memory
            .update_agent_context(
                "writer",
                "write code",
                ExecutionState::Completed,
                Metadata::new(),
                vec![],
                Some(WorkerOutputs {
                    success: true,
                    message_content: "functions written".to_string(),
                    ..Default::default()
                }),
            )
            .await;

        let outputs = memory.get_dependency_outputs("test_gen").await;
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs["writer"].message_content, "functions written");
    }

    #[tokio::test]
    async fn test_suggestions() {
        let memory = CommunicationMemory::new();

        // No context at all
        assert_eq!(memory.suggest_next_actions("writer").await, vec!["start executing the task"]);

        memory
            .update_agent_context(
                "writer",
                "write code",
                ExecutionState::Starting,
                Metadata::new(),
                vec!["planner".to_string()],
                None,
            )
            .await;

        let suggestions = memory.suggest_next_actions("writer").await;
        assert!(suggestions[0].contains("planner"));

        // Complete the dependency; no messages pending -> default suggestion
        memory
            .update_agent_context("planner", "plan", ExecutionState::Completed, Metadata::new(), vec![], None)
            .await;
        memory
            .update_agent_context(
                "writer",
                "write code",
                ExecutionState::Starting,
                Metadata::new(),
                vec!["planner".to_string()],
                None,
            )
            .await;
        assert_eq!(memory.suggest_next_actions("writer").await, vec!["continue current task"]);
    }

    #[tokio::test]
    async fn test_relevant_contexts_include_dependencies_and_recent() {
        let memory = CommunicationMemory::new();
        memory.set_dependencies(deps(&[("test_gen", &["writer"])])).await;

        memory
            .update_agent_context("writer", "write", ExecutionState::Starting, Metadata::new(), vec![], None)
            .await;
        memory
            .update_agent_context("planner", "plan", ExecutionState::Completed, Metadata::new(), vec![], None)
            .await;

        let contexts = memory.relevant_contexts_for("test_gen").await;
        let names: Vec<&str> = contexts.iter().map(|c| c.agent_name.as_str()).collect();

        // The dependency comes first even when not completed; recently
        // completed others follow
        assert_eq!(names, vec!["writer", "planner"]);
    }

    #[tokio::test]
    async fn test_conversation_between() {
        let memory = CommunicationMemory::new();

        memory
            .send_message("test_runner", "refactor", MessageType::Error, "first", Metadata::new())
            .await;
        memory
            .send_message("refactor", "test_runner", MessageType::Context, "second", Metadata::new())
            .await;
        memory
            .send_message("writer", "refactor", MessageType::Advice, "unrelated", Metadata::new())
            .await;

        let conversation = memory.conversation_between("test_runner", "refactor", 10).await;
        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation[0].content, "first");
        assert_eq!(conversation[1].content, "second");
    }
}
