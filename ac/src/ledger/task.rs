//! TaskLedger - global task state and plan

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::memory::WorkerOutputs;

/// Project file-naming configuration
///
/// File paths are a cross-cutting contract between workers; centralizing
/// them here prevents skew between the planner's announcement and worker
/// behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub project_name: String,
    pub main_file: String,
    pub test_file: String,
    pub base_dir: String,
    pub main_file_path: String,
    pub test_file_path: String,
}

/// One recorded failure, written by the router on test failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Worker that produced the failure
    pub source: String,
    pub failure_reasons: Vec<String>,
    /// Content exactly as the analyzer saw it
    pub raw_output: String,
    /// Monotonic run time, seconds
    pub timestamp: f64,
}

/// Per-worker context snapshot captured just before invocation
#[derive(Debug, Clone, Default)]
pub struct EnhancedContext {
    pub dependency_outputs: BTreeMap<String, WorkerOutputs>,
    pub incoming_messages: Vec<String>,
    pub suggestions: Vec<String>,
}

/// Task ledger - one per run
#[derive(Debug, Default)]
pub struct TaskLedger {
    pub original_task: String,
    /// Facts produced by the planning phase (append-only)
    pub facts: Vec<String>,
    /// Current plan (replaced on replan)
    pub plan: Vec<String>,
    /// worker name -> capability text
    pub agent_capabilities: BTreeMap<String, String>,
    /// Workers abandoned after exhausting retries
    pub failed_paths: Vec<String>,
    /// Append-only failure log consumed by the repair instruction builder
    pub error_history: Vec<ErrorRecord>,
    /// Per-worker pre-invocation snapshots
    pub enhanced_contexts: HashMap<String, EnhancedContext>,
    project_config: Option<ProjectConfig>,
    default_base_dir: String,
}

impl TaskLedger {
    pub fn new(base_dir: impl Into<String>) -> Self {
        Self {
            default_base_dir: base_dir.into(),
            ..Default::default()
        }
    }

    /// Set the project naming; file paths are derived deterministically
    pub fn set_project_config(&mut self, project_name: &str, main_file: &str, test_file: &str, base_dir: &str) {
        self.project_config = Some(ProjectConfig {
            project_name: project_name.to_string(),
            main_file: main_file.to_string(),
            test_file: test_file.to_string(),
            base_dir: base_dir.to_string(),
            main_file_path: format!("{}/{}", base_dir, main_file),
            test_file_path: format!("{}/{}", base_dir, test_file),
        });
    }

    pub fn project_config(&self) -> Option<&ProjectConfig> {
        self.project_config.as_ref()
    }

    pub fn project_name(&self) -> &str {
        self.project_config
            .as_ref()
            .map(|c| c.project_name.as_str())
            .unwrap_or("custom_project")
    }

    /// The configured base directory, or the run default before planning
    pub fn base_dir(&self) -> &str {
        self.project_config
            .as_ref()
            .map(|c| c.base_dir.as_str())
            .unwrap_or(&self.default_base_dir)
    }

    /// Configured path for "main" or "test"; documented defaults otherwise
    pub fn get_file_path(&self, kind: &str) -> String {
        match (kind, &self.project_config) {
            ("main", Some(config)) => config.main_file_path.clone(),
            ("test", Some(config)) => config.test_file_path.clone(),
            ("main", None) => format!("{}/main.py", self.default_base_dir),
            ("test", None) => format!("{}/test_main.py", self.default_base_dir),
            (other, _) => format!("{}/{}", self.base_dir(), other),
        }
    }

    /// Append newly confirmed facts
    pub fn update_facts(&mut self, new_facts: Vec<String>) {
        self.facts.extend(new_facts);
    }

    /// Replace the execution plan
    pub fn update_plan(&mut self, new_plan: Vec<String>) {
        self.plan = new_plan;
    }

    /// Append a failure record
    pub fn record_error(&mut self, source: &str, failure_reasons: Vec<String>, raw_output: &str, timestamp: f64) {
        self.error_history.push(ErrorRecord {
            source: source.to_string(),
            failure_reasons,
            raw_output: raw_output.to_string(),
            timestamp,
        });
    }

    /// Latest recorded failure, if any
    pub fn latest_error(&self) -> Option<&ErrorRecord> {
        self.error_history.last()
    }

    /// Mark a worker as abandoned after exhausting its retries
    pub fn mark_failed_path(&mut self, worker: &str) {
        if !self.failed_paths.iter().any(|w| w == worker) {
            self.failed_paths.push(worker.to_string());
        }
    }

    /// Team description for LLM prompts
    pub fn format_team_description(&self) -> String {
        self.agent_capabilities
            .iter()
            .map(|(name, description)| format!("{}: {}", name, description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_path_concatenation() {
        let mut ledger = TaskLedger::new("/tmp/out");
        ledger.set_project_config("string_utils", "string_operations.py", "test_string_operations.py", "/tmp/out");

        assert_eq!(ledger.get_file_path("main"), "/tmp/out/string_operations.py");
        assert_eq!(ledger.get_file_path("test"), "/tmp/out/test_string_operations.py");
        assert_eq!(ledger.get_file_path("report.json"), "/tmp/out/report.json");
    }

    #[test]
    fn test_file_path_defaults_before_planning() {
        let ledger = TaskLedger::new("/data/output");
        assert_eq!(ledger.get_file_path("main"), "/data/output/main.py");
        assert_eq!(ledger.get_file_path("test"), "/data/output/test_main.py");
    }

    #[test]
    fn test_facts_append_plan_replace() {
        let mut ledger = TaskLedger::new("/tmp");

        ledger.update_facts(vec!["fact one".to_string()]);
        ledger.update_facts(vec!["fact two".to_string()]);
        assert_eq!(ledger.facts.len(), 2);

        ledger.update_plan(vec!["plan v1".to_string()]);
        ledger.update_plan(vec!["plan v2".to_string()]);
        assert_eq!(ledger.plan, vec!["plan v2"]);
    }

    #[test]
    fn test_error_history_append_only() {
        let mut ledger = TaskLedger::new("/tmp");

        ledger.record_error("test_runner", vec!["assertion failed".to_string()], "raw output", 1.0);
        ledger.record_error("test_runner", vec![], "more output", 2.0);

        assert_eq!(ledger.error_history.len(), 2);
        assert_eq!(ledger.latest_error().unwrap().raw_output, "more output");
        assert!(ledger.latest_error().unwrap().timestamp > ledger.error_history[0].timestamp);
    }

    #[test]
    fn test_team_description() {
        let mut ledger = TaskLedger::new("/tmp");
        ledger
            .agent_capabilities
            .insert("writer".to_string(), "writes code".to_string());
        ledger
            .agent_capabilities
            .insert("planner".to_string(), "plans work".to_string());

        let description = ledger.format_team_description();
        assert!(description.contains("writer: writes code"));
        assert!(description.contains("planner: plans work"));
    }
}
