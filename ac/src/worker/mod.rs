//! Worker abstraction
//!
//! A worker is one externally invocable participant: stable name,
//! capability text, completion markers, and an opaque invoke handle. The
//! orchestrator owns the state but not the logic; worker identity is a
//! name-keyed table, never an inheritance hierarchy.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use eyre::Result;

mod llm_worker;

pub use llm_worker::{LlmWorker, standard_roster};

/// Canonical worker names
pub const PLANNER: &str = "planner";
pub const WRITER: &str = "writer";
pub const TEST_GEN: &str = "test_gen";
pub const TEST_RUNNER: &str = "test_runner";
pub const REFACTOR: &str = "refactor";
pub const SCANNER: &str = "scanner";
pub const STRUCTURER: &str = "structurer";

/// Response bundle from a worker invocation
#[derive(Debug, Clone, Default)]
pub struct WorkerResponse {
    /// The worker's final message
    pub primary_content: String,
    /// Intermediate messages produced while working
    pub inner_messages: Vec<String>,
    /// Tool-call traces; never interpreted, only concatenated as text
    pub tool_traces: Vec<String>,
}

impl WorkerResponse {
    /// A response with only primary content
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            primary_content: content.into(),
            ..Default::default()
        }
    }

    /// All content concatenated for analysis
    pub fn combined(&self) -> String {
        let mut parts = vec![self.primary_content.as_str()];
        parts.extend(self.inner_messages.iter().map(String::as_str));
        parts.extend(self.tool_traces.iter().map(String::as_str));
        parts.retain(|p| !p.is_empty());
        parts.join(" ")
    }
}

/// One externally invocable participant
#[async_trait]
pub trait Worker: Send + Sync {
    /// Stable identity
    fn name(&self) -> &str;

    /// Human-readable capability text
    fn description(&self) -> &str;

    /// Sentinel substrings whose presence denotes self-declared success
    fn completion_markers(&self) -> &[String];

    /// Invoke with an orchestrator-built prompt
    async fn invoke(&self, prompt: &str) -> Result<WorkerResponse>;
}

/// Name-keyed worker table preserving registration order
pub struct WorkerSet {
    order: Vec<String>,
    by_name: BTreeMap<String, Arc<dyn Worker>>,
}

impl WorkerSet {
    pub fn new(workers: Vec<Arc<dyn Worker>>) -> Self {
        let order = workers.iter().map(|w| w.name().to_string()).collect();
        let by_name = workers.into_iter().map(|w| (w.name().to_string(), w)).collect();
        Self { order, by_name }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Worker>> {
        self.by_name.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Worker names in registration order
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// name -> capability text, for the task ledger
    pub fn capabilities(&self) -> BTreeMap<String, String> {
        self.by_name
            .iter()
            .map(|(name, w)| (name.clone(), w.description().to_string()))
            .collect()
    }
}

/// The fixed completion-marker table
///
/// Markers are cheap, deliberately self-declared signals; the analyzer
/// decides what a missing or present marker means per worker.
pub fn completion_markers_for(worker: &str) -> Vec<String> {
    let markers: &[&str] = match worker {
        PLANNER => &["PLANNING_COMPLETE"],
        WRITER => &["CODING_COMPLETE", "Successfully wrote content"],
        TEST_GEN => &["TESTING_COMPLETE", "Successfully wrote content"],
        TEST_RUNNER => &["UNIT_TESTING_COMPLETE"],
        REFACTOR => &["REFACTORING_COMPLETE"],
        SCANNER => &["SCANNING_COMPLETE"],
        STRUCTURER => &["PROJECT_STRUCTURE_COMPLETE"],
        _ => &[],
    };
    markers.iter().map(|m| m.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubWorker {
        name: String,
        markers: Vec<String>,
    }

    #[async_trait]
    impl Worker for StubWorker {
        fn name(&self) -> &str {
            &self.name
        }

        fn description(&self) -> &str {
            "stub"
        }

        fn completion_markers(&self) -> &[String] {
            &self.markers
        }

        async fn invoke(&self, _prompt: &str) -> Result<WorkerResponse> {
            Ok(WorkerResponse::text("done"))
        }
    }

    #[test]
    fn test_worker_set_lookup_and_order() {
        let set = WorkerSet::new(vec![
            Arc::new(StubWorker {
                name: WRITER.to_string(),
                markers: vec![],
            }),
            Arc::new(StubWorker {
                name: PLANNER.to_string(),
                markers: vec![],
            }),
        ]);

        assert_eq!(set.names(), &[WRITER.to_string(), PLANNER.to_string()]);
        assert!(set.contains(PLANNER));
        assert!(!set.contains(SCANNER));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_completion_marker_table() {
        assert_eq!(completion_markers_for(PLANNER), vec!["PLANNING_COMPLETE"]);
        assert!(completion_markers_for(WRITER).contains(&"Successfully wrote content".to_string()));
        assert!(completion_markers_for("unknown").is_empty());
    }

    #[test]
    fn test_combined_filters_empty_parts() {
        let response = WorkerResponse {
            primary_content: "main".to_string(),
            inner_messages: vec![String::new(), "inner".to_string()],
            tool_traces: vec!["trace".to_string()],
        };
        assert_eq!(response.combined(), "main inner trace");
    }
}
