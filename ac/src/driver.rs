//! Orchestrator driver - the inner loop
//!
//! Drives round-by-round execution: select a worker, prepare its context,
//! build the prompt, invoke, analyze, record, communicate, route. Nothing
//! inside the loop aborts the run except an unrecoverable planning failure;
//! router decisions subsume error handling.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use eyre::{Result, bail};
use regex::Regex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use vectorstore::{MetaValue, Metadata};

use crate::analysis::{ResultAnalysis, analyze_response};
use crate::chain::ChainConfig;
use crate::instruction::build_enhanced_prompt;
use crate::ledger::{EnhancedContext, NodeState, ProgressLedger, TaskLedger};
use crate::llm::LlmClient;
use crate::memory::{ExecutionState, MemorySystem, MessageType, WorkerOutputs};
use crate::planner::outer_loop_planning;
use crate::router;
use crate::selector::select_next_speaker;
use crate::worker::{PLANNER, REFACTOR, SCANNER, STRUCTURER, TEST_GEN, TEST_RUNNER, WRITER, Worker, WorkerSet};

/// Well-known test-report artifact name under the base directory
const TEST_REPORT_FILE: &str = "test_report.json";

/// Hard round budget so a misbehaving route cannot spin forever
const DEFAULT_MAX_ROUNDS: u32 = 50;

/// Replans allowed per run; the second stall exhaustion terminates
const MAX_REPLANS: u32 = 1;

/// Events emitted while a run progresses
#[derive(Debug, Clone)]
pub enum RunEvent {
    RoundCompleted { worker: String, success: bool, round: u32 },
    Replanned,
    Finished(RunSummary),
}

/// Structured summary emitted on termination
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub total_rounds: u32,
    pub completed_agents: usize,
    pub total_agents: usize,
    pub success_rate: f64,
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    pub failed_paths: Vec<String>,
    pub final_states: BTreeMap<String, NodeState>,
}

/// The orchestrator driver
///
/// Owns both ledgers for the duration of a run. Workers and memory are
/// injected at construction and immutable thereafter.
pub struct Orchestrator {
    chain: ChainConfig,
    workers: WorkerSet,
    llm: Arc<dyn LlmClient>,
    memory: Arc<MemorySystem>,
    base_dir: PathBuf,
    max_rounds: u32,
    events: Option<mpsc::Sender<RunEvent>>,
}

impl Orchestrator {
    pub fn new(
        chain: ChainConfig,
        workers: Vec<Arc<dyn Worker>>,
        llm: Arc<dyn LlmClient>,
        memory: Arc<MemorySystem>,
        base_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let workers = WorkerSet::new(workers);

        for agent in &chain.agents {
            if !workers.contains(agent) {
                bail!("chain '{}' requires worker '{}' which was not provided", chain.name, agent);
            }
        }

        Ok(Self {
            chain,
            workers,
            llm,
            memory,
            base_dir: base_dir.into(),
            max_rounds: DEFAULT_MAX_ROUNDS,
            events: None,
        })
    }

    /// Attach an event channel for per-round progress
    pub fn with_events(mut self, events: mpsc::Sender<RunEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    async fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }

    /// Run the workflow for one task
    pub async fn run(&self, task: &str) -> Result<RunSummary> {
        self.memory.initialize().await;
        self.memory.comm.set_dependencies(self.chain.dependencies.clone()).await;

        let result = self.run_inner(task).await;

        self.memory.close().await;
        result
    }

    async fn run_inner(&self, task: &str) -> Result<RunSummary> {
        let mut task_ledger = TaskLedger::new(self.base_dir.display().to_string());
        task_ledger.original_task = task.to_string();
        task_ledger.agent_capabilities = self.workers.capabilities();

        let mut progress = ProgressLedger::new(self.chain.agents.iter().cloned());

        // Outer loop: planning failures abort the run
        outer_loop_planning(&self.llm, task, &mut task_ledger).await?;

        let report_path = self.base_dir.join(TEST_REPORT_FILE);
        let mut current: Vec<String> = self.chain.source_node().map(|s| vec![s.to_string()]).unwrap_or_default();
        let mut round = 0u32;
        let mut replans = 0u32;

        while !current.is_empty() && progress.stall_count < self.chain.max_stalls && round < self.max_rounds {
            round += 1;

            let Some(worker_name) =
                select_next_speaker(&self.llm, &current, &task_ledger, &mut progress, &self.base_dir).await
            else {
                break;
            };

            progress.current_active_nodes = [worker_name.clone()].into_iter().collect();

            let Some(worker) = self.workers.get(&worker_name).cloned() else {
                warn!(worker = %worker_name, "selected worker is not registered, stopping");
                break;
            };

            info!(round, worker = %worker_name, "executing worker");

            self.prepare_agent_execution(&worker_name, &mut task_ledger).await;

            let prompt =
                build_enhanced_prompt(&self.llm, worker.as_ref(), &task_ledger, &mut progress, &self.base_dir).await;

            progress.update_node_state(&worker_name, NodeState::InProgress);

            let started = Instant::now();
            let (analysis, duration_secs) = match worker.invoke(&prompt).await {
                Ok(response) => {
                    let analysis = analyze_response(worker.as_ref(), &response, &report_path).await;
                    (analysis, started.elapsed().as_secs_f64())
                }
                Err(e) => {
                    warn!(worker = %worker_name, error = %e, "worker invocation raised");
                    (ResultAnalysis::execution_exception(&e), 0.0)
                }
            };

            if analysis.success {
                progress.update_node_state_with_result(&worker_name, NodeState::Completed, Some(analysis.clone()));
                progress.decrement_stall();
            } else {
                progress.update_node_state_with_result(&worker_name, NodeState::Failed, Some(analysis.clone()));
                progress.increment_stall();
                progress.increment_retry(&worker_name);
            }

            self.record_round(&worker_name, &prompt, &analysis, duration_secs, &progress).await;
            self.process_agent_execution_result(&worker_name, &analysis, duration_secs).await;

            // Repeated failure preempts routing: look for an alternative path
            if !analysis.success && should_reselect(&progress, &worker_name, &analysis) {
                let alternatives = router::alternative_nodes(&worker_name, &self.chain);
                if !alternatives.is_empty() {
                    info!(worker = %worker_name, ?alternatives, "reselecting after repeated failure");
                    task_ledger.mark_failed_path(&worker_name);
                    current = alternatives;
                    self.emit(RunEvent::RoundCompleted {
                        worker: worker_name,
                        success: false,
                        round,
                    })
                    .await;
                    continue;
                }
            }

            // Stall budget exhausted: replan once, then let the loop end
            if progress.stall_count >= self.chain.max_stalls && replans < MAX_REPLANS {
                warn!(stalls = progress.stall_count, "stall budget exhausted, replanning");
                outer_loop_planning(&self.llm, task, &mut task_ledger).await?;
                replans += 1;
                progress.reset_stall();
                current = self.chain.source_node().map(|s| vec![s.to_string()]).unwrap_or_default();
                self.emit(RunEvent::Replanned).await;
                continue;
            }

            current = router::next_candidates(&worker_name, &analysis, &self.chain, &mut task_ledger, &mut progress);
            debug!(?current, "router decision");

            self.emit(RunEvent::RoundCompleted {
                worker: worker_name,
                success: analysis.success,
                round,
            })
            .await;
        }

        let summary = build_summary(round, &task_ledger, &progress);
        info!(
            rounds = summary.total_rounds,
            completed = summary.completed_agents,
            total = summary.total_agents,
            "workflow finished"
        );
        self.emit(RunEvent::Finished(summary.clone())).await;

        Ok(summary)
    }

    /// Pre-invocation: record the starting context and snapshot the
    /// collaboration view into the task ledger
    async fn prepare_agent_execution(&self, worker_name: &str, task_ledger: &mut TaskLedger) {
        let current_task = current_task_for(worker_name);
        let dependencies = self.memory.comm.dependencies_of(worker_name).await;

        self.memory
            .comm
            .update_agent_context(
                worker_name,
                current_task,
                ExecutionState::Starting,
                Metadata::new(),
                dependencies,
                None,
            )
            .await;

        let dependency_outputs = self.memory.comm.get_dependency_outputs(worker_name).await;
        let incoming = self.memory.comm.get_messages_for_agent(worker_name, None, None, 3).await;
        let incoming_messages = incoming
            .iter()
            .map(|m| {
                let preview: String = m.content.chars().take(100).collect();
                format!("{} ({}): {}", m.from_agent, m.message_type, preview)
            })
            .collect();
        let suggestions = self.memory.comm.suggest_next_actions(worker_name).await;

        task_ledger.enhanced_contexts.insert(
            worker_name.to_string(),
            EnhancedContext {
                dependency_outputs,
                incoming_messages,
                suggestions,
            },
        );
    }

    /// Post-invocation: archive the round and keep the unit-test memory
    /// current for the repair worker
    async fn record_round(
        &self,
        worker_name: &str,
        prompt: &str,
        analysis: &ResultAnalysis,
        duration_secs: f64,
        progress: &ProgressLedger,
    ) {
        let task_preview: String = prompt.chars().take(200).collect();

        let context: Metadata = [
            ("stall_count".to_string(), MetaValue::Int(progress.stall_count as i64)),
            (
                "workflow_stage".to_string(),
                MetaValue::from(workflow_stage(progress, self.chain.agents.len())),
            ),
        ]
        .into_iter()
        .collect();

        self.memory
            .exec_log
            .record_execution(worker_name, &task_preview, analysis, analysis.success, duration_secs, context)
            .await;

        if worker_name == TEST_RUNNER {
            let test_files = extract_test_files(&analysis.message_content);
            let test_reports = extract_test_reports(&analysis.message_content);
            self.memory
                .unit_test
                .record_complete_test_execution(
                    worker_name,
                    &task_preview,
                    &analysis.message_content,
                    analysis,
                    analysis.success,
                    duration_secs,
                    test_files,
                    test_reports,
                )
                .await;
        }
    }

    /// Post-invocation: update the terminal context and notify dependents
    async fn process_agent_execution_result(&self, worker_name: &str, analysis: &ResultAnalysis, duration_secs: f64) {
        let state = if analysis.success { ExecutionState::Completed } else { ExecutionState::Failed };
        let dependencies = self.memory.comm.dependencies_of(worker_name).await;

        let outputs = WorkerOutputs {
            success: analysis.success,
            message_content: analysis.message_content.clone(),
            execution_time_secs: duration_secs,
            failure_reasons: analysis.failure_reasons.clone(),
        };

        self.memory
            .comm
            .update_agent_context(
                worker_name,
                current_task_for(worker_name),
                state,
                Metadata::new(),
                dependencies,
                Some(outputs),
            )
            .await;

        // Notify every worker that consumes this one's output
        let dependents: Vec<String> = self
            .chain
            .dependencies
            .iter()
            .filter(|(agent, ups)| ups.iter().any(|u| u == worker_name) && self.chain.contains(agent))
            .map(|(agent, _)| agent.clone())
            .collect();

        for dependent in dependents {
            if analysis.success {
                let preview: String = analysis.message_content.chars().take(200).collect();
                let metadata: Metadata = [
                    ("execution_time".to_string(), MetaValue::Float(duration_secs)),
                    ("success".to_string(), MetaValue::Bool(true)),
                ]
                .into_iter()
                .collect();
                self.memory
                    .comm
                    .send_message(
                        worker_name,
                        &dependent,
                        MessageType::Result,
                        &format!("{} executed successfully. Output: {}", worker_name, preview),
                        metadata,
                    )
                    .await;
            } else {
                let metadata: Metadata = [
                    ("success".to_string(), MetaValue::Bool(false)),
                    (
                        "failure_reasons".to_string(),
                        MetaValue::from(analysis.failure_reasons.join("; ")),
                    ),
                ]
                .into_iter()
                .collect();
                self.memory
                    .comm
                    .send_message(
                        worker_name,
                        &dependent,
                        MessageType::Error,
                        &format!("{} failed. Errors: {}", worker_name, analysis.failure_reasons.join("; ")),
                        metadata,
                    )
                    .await;
            }
        }

        if analysis.success {
            self.handle_execution_success(worker_name, analysis).await;
        } else {
            self.handle_execution_failure(worker_name, analysis).await;
        }
    }

    /// Failure special case: a test failure ships the full error payload to
    /// the repair worker
    async fn handle_execution_failure(&self, worker_name: &str, analysis: &ResultAnalysis) {
        if worker_name != TEST_RUNNER || !self.chain.contains(REFACTOR) {
            return;
        }

        let detailed = self.memory.unit_test.get_detailed_test_info_for_refactoring(TEST_RUNNER).await;

        let metadata: Metadata = [
            ("priority".to_string(), MetaValue::from("high")),
            ("has_detailed_info".to_string(), MetaValue::Bool(detailed.is_some())),
        ]
        .into_iter()
        .collect();

        self.memory
            .comm
            .send_message(
                TEST_RUNNER,
                REFACTOR,
                MessageType::Error,
                &format!("unit tests failed and need repair. Error detail: {}", analysis.message_content),
                metadata.clone(),
            )
            .await;

        let context_content = match detailed {
            Some(info) => {
                let raw_preview: String = info.raw_output.chars().take(1000).collect();
                let failure_names: Vec<&str> = info.failures.iter().map(|f| f.test_name.as_str()).collect();
                format!(
                    "=== Complete test output ===\n{}\n\n\
                     === Parsed failures ===\n{}\n\n\
                     === Repair recommendations ===\n{}\n\n\
                     === Error patterns ===\n{}",
                    raw_preview,
                    failure_names.join(", "),
                    info.detailed_recommendations.join("\n"),
                    info.analysis.error_patterns.join(", "),
                )
            }
            None => "no detailed test information recorded".to_string(),
        };

        self.memory
            .comm
            .send_message(TEST_RUNNER, REFACTOR, MessageType::Context, &context_content, metadata)
            .await;
    }

    /// Success special cases: repair notifies the test runner, the scanner
    /// feeds the structurer
    async fn handle_execution_success(&self, worker_name: &str, analysis: &ResultAnalysis) {
        let preview: String = analysis.message_content.chars().take(200).collect();

        if worker_name == REFACTOR && self.chain.contains(TEST_RUNNER) {
            let metadata: Metadata = [("priority".to_string(), MetaValue::from("high"))].into_iter().collect();
            self.memory
                .comm
                .send_message(
                    REFACTOR,
                    TEST_RUNNER,
                    MessageType::Context,
                    &format!("code repair complete. Changes: {}", preview),
                    metadata,
                )
                .await;
        } else if worker_name == SCANNER && self.chain.contains(STRUCTURER) {
            self.memory
                .comm
                .send_message(
                    SCANNER,
                    STRUCTURER,
                    MessageType::Result,
                    &format!("code scan complete. Findings: {}", preview),
                    Metadata::new(),
                )
                .await;
        }
    }
}

/// True when a worker has failed repeatedly enough to look for another path
fn should_reselect(progress: &ProgressLedger, worker_name: &str, analysis: &ResultAnalysis) -> bool {
    progress.retry_count(worker_name) >= 2 && !analysis.success
}

/// Short task description per worker, for context records
fn current_task_for(worker_name: &str) -> &'static str {
    match worker_name {
        PLANNER => "produce the implementation plan",
        WRITER => "write the function code",
        TEST_GEN => "generate the test cases",
        TEST_RUNNER => "execute the unit tests",
        REFACTOR => "repair the code problems",
        SCANNER => "run the code scan",
        STRUCTURER => "organize the project structure",
        _ => "execute the specialty task",
    }
}

/// Coarse progress stage for log metadata
fn workflow_stage(progress: &ProgressLedger, total_agents: usize) -> &'static str {
    let completed = progress.completed_nodes().len();
    if completed == 0 {
        "initial"
    } else if completed < total_agents / 2 {
        "early"
    } else if completed < total_agents {
        "middle"
    } else {
        "final"
    }
}

/// Test-file paths mentioned in a response
fn extract_test_files(content: &str) -> Vec<String> {
    let re = Regex::new(r"[\w./\\-]*test_\w+\.py").expect("static regex");

    let mut seen = std::collections::HashSet::new();
    let mut files = Vec::new();
    for m in re.find_iter(content) {
        if seen.insert(m.as_str().to_string()) {
            files.push(m.as_str().to_string());
        }
    }
    files
}

/// Embedded JSON test reports mentioned in a response
fn extract_test_reports(content: &str) -> serde_json::Value {
    let re = Regex::new(r#"\{[^{}]*"test_files"[^{}]*\}"#).expect("static regex");

    let mut reports = serde_json::Map::new();
    for (i, m) in re.find_iter(content).enumerate() {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(m.as_str()) {
            reports.insert(format!("report_{}", i + 1), value);
        }
    }

    if content.contains("test_report.md") {
        reports.insert("markdown_report".to_string(), serde_json::Value::String("test_report.md".to_string()));
    }

    serde_json::Value::Object(reports)
}

fn build_summary(total_rounds: u32, task_ledger: &TaskLedger, progress: &ProgressLedger) -> RunSummary {
    let completed = progress.completed_nodes();
    let failed: Vec<String> = progress
        .node_states
        .iter()
        .filter(|(_, state)| **state == NodeState::Failed)
        .map(|(name, _)| name.clone())
        .collect();

    // Rate over workers that actually ran; a skipped worker (the repair
    // path on a clean run) does not count against success
    let invoked: std::collections::BTreeSet<&str> =
        progress.execution_history.iter().map(|entry| entry.node.as_str()).collect();
    let total_agents = invoked.len();
    let success_rate = if total_agents > 0 {
        completed.len() as f64 / total_agents as f64
    } else {
        0.0
    };

    RunSummary {
        total_rounds,
        completed_agents: completed.len(),
        total_agents,
        success_rate,
        completed,
        failed,
        failed_paths: task_ledger.failed_paths.clone(),
        final_states: progress.node_states.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_test_files_dedupes() {
        let content = "wrote /out/test_string_operations.py then ran /out/test_string_operations.py and test_extra.py";
        let files = extract_test_files(content);
        assert_eq!(files, vec!["/out/test_string_operations.py", "test_extra.py"]);
    }

    #[test]
    fn test_extract_test_reports() {
        let content = r#"report: {"test_files": 2, "passed": 5} and see test_report.md"#;
        let reports = extract_test_reports(content);

        assert_eq!(reports["report_1"]["passed"], 5);
        assert_eq!(reports["markdown_report"], "test_report.md");
    }

    #[test]
    fn test_extract_test_reports_empty() {
        let reports = extract_test_reports("nothing structured here");
        assert!(reports.as_object().unwrap().is_empty());
    }

    #[test]
    fn test_workflow_stage_boundaries() {
        let chain = ChainConfig::standard();
        let mut progress = ProgressLedger::new(chain.agents.iter().cloned());

        assert_eq!(workflow_stage(&progress, 7), "initial");

        progress.update_node_state(PLANNER, NodeState::Completed);
        assert_eq!(workflow_stage(&progress, 7), "early");

        for agent in [WRITER, TEST_GEN, TEST_RUNNER, SCANNER] {
            progress.update_node_state(agent, NodeState::Completed);
        }
        assert_eq!(workflow_stage(&progress, 7), "middle");

        for agent in [REFACTOR, STRUCTURER] {
            progress.update_node_state(agent, NodeState::Completed);
        }
        assert_eq!(workflow_stage(&progress, 7), "final");
    }

    #[test]
    fn test_should_reselect_threshold() {
        let chain = ChainConfig::standard();
        let mut progress = ProgressLedger::new(chain.agents.iter().cloned());

        let failed = ResultAnalysis {
            success: false,
            failure_reasons: vec![],
            message_content: String::new(),
            has_completion_marker: false,
        };

        assert!(!should_reselect(&progress, WRITER, &failed));

        progress.increment_retry(WRITER);
        progress.increment_retry(WRITER);
        assert!(should_reselect(&progress, WRITER, &failed));

        let succeeded = ResultAnalysis {
            success: true,
            ..failed.clone()
        };
        assert!(!should_reselect(&progress, WRITER, &succeeded));
    }
}
