//! Execution log manager
//!
//! Vector-indexed record of every worker invocation, queryable by text
//! similarity with post-filters. Recording and query errors are logged and
//! swallowed; the log must never fail a run.

use std::collections::BTreeMap;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use vectorstore::{Hit, MIME_TEXT, MetaValue, Metadata, VectorStore};

use crate::analysis::ResultAnalysis;

/// Coarse task type derived from the task description
pub fn classify_task(task_description: &str) -> &'static str {
    let lower = task_description.to_lowercase();

    if ["refactor", "repair", "optimi"].iter().any(|kw| lower.contains(kw)) {
        "refactoring"
    } else if ["test", "verif"].iter().any(|kw| lower.contains(kw)) {
        "testing"
    } else if ["scan", "lint", "quality"].iter().any(|kw| lower.contains(kw)) {
        "scanning"
    } else if ["plan", "design"].iter().any(|kw| lower.contains(kw)) {
        "planning"
    } else if ["code", "implement", "write", "function"].iter().any(|kw| lower.contains(kw)) {
        "coding"
    } else {
        "general"
    }
}

/// Per-agent or per-task-type aggregate
#[derive(Debug, Clone, Default)]
pub struct AgentStats {
    pub total: u64,
    pub success: u64,
    pub failure: u64,
}

/// Aggregate view over the whole log
#[derive(Debug, Clone, Default)]
pub struct LogStatistics {
    pub total: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub success_rate: f64,
    pub per_agent: BTreeMap<String, AgentStats>,
    pub per_task_type: BTreeMap<String, AgentStats>,
    pub earliest: Option<String>,
    pub latest: Option<String>,
}

/// Execution log manager
pub struct ExecutionLog {
    store: Mutex<Option<VectorStore>>,
}

impl Default for ExecutionLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self {
            store: Mutex::new(None),
        }
    }

    pub async fn attach_store(&self, store: VectorStore) {
        *self.store.lock().await = Some(store);
    }

    pub async fn has_store(&self) -> bool {
        self.store.lock().await.is_some()
    }

    pub async fn close(&self) {
        *self.store.lock().await = None;
    }

    /// Record one worker invocation
    ///
    /// Context values must be scalar; the caller stringifies anything
    /// structured.
    pub async fn record_execution(
        &self,
        agent_name: &str,
        task_description: &str,
        result: &ResultAnalysis,
        success: bool,
        duration_secs: f64,
        context: Metadata,
    ) {
        let timestamp = chrono::Utc::now().to_rfc3339();

        let mut content_parts = vec![
            format!("Agent: {}", agent_name),
            format!("Task: {}", task_description),
            format!("Success: {}", success),
            format!("Duration: {:.2}s", duration_secs),
            format!("Timestamp: {}", timestamp),
        ];
        if let Ok(result_json) = serde_json::to_string(result) {
            content_parts.push(format!("Result: {}", result_json));
        }
        let content = content_parts.join("\n");

        let mut metadata: Metadata = [
            ("agent_name".to_string(), MetaValue::from(agent_name)),
            ("success".to_string(), MetaValue::from(success)),
            ("timestamp".to_string(), MetaValue::from(timestamp)),
            ("duration".to_string(), MetaValue::from(duration_secs)),
            ("task_type".to_string(), MetaValue::from(classify_task(task_description))),
        ]
        .into_iter()
        .collect();
        metadata.extend(context);

        let mut guard = self.store.lock().await;
        match guard.as_mut() {
            Some(store) => {
                if let Err(e) = store.add(&content, MIME_TEXT, metadata) {
                    warn!(agent = agent_name, error = %e, "failed to record execution");
                }
            }
            None => warn!(agent = agent_name, "execution log has no store attached, dropping record"),
        }

        debug!(agent = agent_name, success, "recorded execution");
    }

    /// Similarity query with post-filters on agent name and success
    pub async fn get_similar_executions(
        &self,
        query: &str,
        agent_name: Option<&str>,
        success_only: bool,
        top_k: usize,
    ) -> Vec<Hit> {
        let search_query = match agent_name {
            Some(agent) if !query.trim().is_empty() => format!("Agent: {} {}", agent, query),
            Some(agent) => format!("Agent: {}", agent),
            None => query.to_string(),
        };

        let guard = self.store.lock().await;
        let Some(store) = guard.as_ref() else {
            warn!("execution log has no store attached, returning no results");
            return Vec::new();
        };

        store
            .query(&search_query, top_k)
            .into_iter()
            .filter(|hit| !success_only || hit.metadata.get("success").is_some_and(MetaValue::as_bool))
            .filter(|hit| {
                agent_name.is_none_or(|agent| {
                    hit.metadata.get("agent_name").and_then(MetaValue::as_str) == Some(agent)
                })
            })
            .collect()
    }

    /// Search for past successful handling of a similar error
    ///
    /// Runs several phrasings of the query and de-duplicates by record id.
    pub async fn get_error_solutions(&self, error_description: &str, top_k: usize) -> Vec<Hit> {
        let queries = [
            format!("error solution: {}", error_description),
            format!("Error: {}", error_description),
            error_description.to_string(),
            format!("failure {}", error_description),
        ];

        let mut seen = std::collections::HashSet::new();
        let mut unique = Vec::new();

        for query in &queries {
            for hit in self.get_similar_executions(query, None, true, top_k).await {
                if seen.insert(hit.id.clone()) {
                    unique.push(hit);
                }
            }
        }

        unique.truncate(top_k);
        unique
    }

    /// Aggregate statistics over every stored record
    pub async fn statistics(&self) -> LogStatistics {
        let guard = self.store.lock().await;
        let Some(store) = guard.as_ref() else {
            return LogStatistics::default();
        };

        let mut stats = LogStatistics::default();
        let mut timestamps: Vec<String> = Vec::new();

        for record in store.records() {
            let agent = record
                .metadata
                .get("agent_name")
                .and_then(MetaValue::as_str)
                .unwrap_or("unknown")
                .to_string();
            let task_type = record
                .metadata
                .get("task_type")
                .and_then(MetaValue::as_str)
                .unwrap_or("general")
                .to_string();
            let success = record.metadata.get("success").is_some_and(MetaValue::as_bool);

            stats.total += 1;
            if success {
                stats.success_count += 1;
            } else {
                stats.failure_count += 1;
            }

            for (key, bucket) in [(agent, &mut stats.per_agent), (task_type, &mut stats.per_task_type)] {
                let entry = bucket.entry(key).or_default();
                entry.total += 1;
                if success {
                    entry.success += 1;
                } else {
                    entry.failure += 1;
                }
            }

            if let Some(MetaValue::Str(ts)) = record.metadata.get("timestamp") {
                timestamps.push(ts.clone());
            }
        }

        if stats.total > 0 {
            stats.success_rate = stats.success_count as f64 / stats.total as f64;
        }
        timestamps.sort();
        stats.earliest = timestamps.first().cloned();
        stats.latest = timestamps.last().cloned();

        stats
    }
}
