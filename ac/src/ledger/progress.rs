//! ProgressLedger - per-worker state machine and execution history

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::analysis::ResultAnalysis;

/// Worker execution state
///
/// Legal transitions: NotStarted -> InProgress -> Completed | Failed;
/// Failed -> Retrying -> InProgress. Completed -> NotStarted happens only
/// for the test runner, only via the router after a successful repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    NotStarted,
    InProgress,
    Completed,
    Failed,
    Retrying,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeState::NotStarted => "not_started",
            NodeState::InProgress => "in_progress",
            NodeState::Completed => "completed",
            NodeState::Failed => "failed",
            NodeState::Retrying => "retrying",
        };
        f.write_str(s)
    }
}

/// One entry in the execution history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub node: String,
    pub state: NodeState,
    /// Monotonic run time, seconds
    pub timestamp: f64,
    /// Attached on terminal transitions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultAnalysis>,
}

/// Progress ledger - one per run
#[derive(Debug)]
pub struct ProgressLedger {
    pub node_states: BTreeMap<String, NodeState>,
    /// Append-only, totally ordered by append order
    pub execution_history: Vec<HistoryEntry>,
    pub current_active_nodes: BTreeSet<String>,
    pub stall_count: u32,
    pub retry_counts: BTreeMap<String, u32>,
    node_instructions: BTreeMap<String, String>,
    epoch: Instant,
}

impl ProgressLedger {
    pub fn new(worker_names: impl IntoIterator<Item = String>) -> Self {
        Self {
            node_states: worker_names.into_iter().map(|n| (n, NodeState::NotStarted)).collect(),
            execution_history: Vec::new(),
            current_active_nodes: BTreeSet::new(),
            stall_count: 0,
            retry_counts: BTreeMap::new(),
            node_instructions: BTreeMap::new(),
            epoch: Instant::now(),
        }
    }

    /// Monotonic run time in seconds
    pub fn monotonic_now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Write a state and append it to the history
    pub fn update_node_state(&mut self, name: &str, state: NodeState) {
        self.update_node_state_with_result(name, state, None);
    }

    /// Write a state, appending the analysis on terminal transitions
    pub fn update_node_state_with_result(&mut self, name: &str, state: NodeState, result: Option<ResultAnalysis>) {
        self.node_states.insert(name.to_string(), state);
        self.execution_history.push(HistoryEntry {
            node: name.to_string(),
            state,
            timestamp: self.monotonic_now(),
            result,
        });
    }

    /// Reset a worker for re-execution (router-only; the repair micro-loop)
    pub fn reset_node(&mut self, name: &str) {
        self.retry_counts.insert(name.to_string(), 0);
        self.update_node_state(name, NodeState::NotStarted);
    }

    /// Increment the retry counter; returns the new count
    pub fn increment_retry(&mut self, name: &str) -> u32 {
        let count = self.retry_counts.entry(name.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn retry_count(&self, name: &str) -> u32 {
        self.retry_counts.get(name).copied().unwrap_or(0)
    }

    pub fn state_of(&self, name: &str) -> NodeState {
        self.node_states.get(name).copied().unwrap_or(NodeState::NotStarted)
    }

    /// Workers currently in the Completed state
    pub fn completed_nodes(&self) -> Vec<String> {
        self.node_states
            .iter()
            .filter(|(_, state)| **state == NodeState::Completed)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Latest attached result for a worker
    pub fn last_result_of(&self, name: &str) -> Option<&ResultAnalysis> {
        self.execution_history
            .iter()
            .rev()
            .filter(|entry| entry.node == name)
            .find_map(|entry| entry.result.as_ref())
    }

    /// History entries for one worker
    pub fn history_of(&self, name: &str) -> Vec<&HistoryEntry> {
        self.execution_history.iter().filter(|entry| entry.node == name).collect()
    }

    /// Stall accounting: +1 on failure
    pub fn increment_stall(&mut self) {
        self.stall_count += 1;
    }

    /// Stall accounting: -1 on success, floor 0
    pub fn decrement_stall(&mut self) {
        self.stall_count = self.stall_count.saturating_sub(1);
    }

    pub fn reset_stall(&mut self) {
        self.stall_count = 0;
    }

    /// Store a generated instruction for one invocation
    pub fn set_instruction(&mut self, name: &str, instruction: String) {
        self.node_instructions.insert(name.to_string(), instruction);
    }

    /// Consume the stored instruction; successive invocations regenerate
    pub fn take_instruction(&mut self, name: &str) -> Option<String> {
        self.node_instructions.remove(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ledger() -> ProgressLedger {
        ProgressLedger::new(["planner".to_string(), "writer".to_string()])
    }

    #[test]
    fn test_initial_states() {
        let ledger = ledger();
        assert_eq!(ledger.state_of("planner"), NodeState::NotStarted);
        assert_eq!(ledger.state_of("writer"), NodeState::NotStarted);
        assert_eq!(ledger.stall_count, 0);
        assert!(ledger.execution_history.is_empty());
    }

    #[test]
    fn test_history_is_monotone() {
        let mut ledger = ledger();
        ledger.update_node_state("planner", NodeState::InProgress);
        ledger.update_node_state("planner", NodeState::Completed);
        ledger.update_node_state("writer", NodeState::InProgress);

        let times: Vec<f64> = ledger.execution_history.iter().map(|e| e.timestamp).collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_retry_counting() {
        let mut ledger = ledger();
        assert_eq!(ledger.retry_count("writer"), 0);
        assert_eq!(ledger.increment_retry("writer"), 1);
        assert_eq!(ledger.increment_retry("writer"), 2);
        assert_eq!(ledger.retry_count("writer"), 2);
    }

    #[test]
    fn test_reset_node_clears_retries() {
        let mut ledger = ledger();
        ledger.increment_retry("writer");
        ledger.update_node_state("writer", NodeState::Completed);

        ledger.reset_node("writer");
        assert_eq!(ledger.state_of("writer"), NodeState::NotStarted);
        assert_eq!(ledger.retry_count("writer"), 0);
    }

    #[test]
    fn test_stall_floor() {
        let mut ledger = ledger();
        ledger.decrement_stall();
        assert_eq!(ledger.stall_count, 0);

        ledger.increment_stall();
        ledger.increment_stall();
        ledger.decrement_stall();
        assert_eq!(ledger.stall_count, 1);
    }

    #[test]
    fn test_instruction_consumed_once() {
        let mut ledger = ledger();
        ledger.set_instruction("writer", "write the code".to_string());

        assert_eq!(ledger.take_instruction("writer"), Some("write the code".to_string()));
        assert_eq!(ledger.take_instruction("writer"), None);
    }

    #[test]
    fn test_last_result_of() {
        let mut ledger = ledger();
        ledger.update_node_state("writer", NodeState::InProgress);
        ledger.update_node_state_with_result(
            "writer",
            NodeState::Failed,
            Some(ResultAnalysis {
                success: false,
                failure_reasons: vec!["too short".to_string()],
                message_content: "x".to_string(),
                has_completion_marker: false,
            }),
        );

        let result = ledger.last_result_of("writer").unwrap();
        assert!(!result.success);
        assert!(ledger.last_result_of("planner").is_none());
    }

    proptest! {
        /// Serializing then deserializing the history preserves order and state
        #[test]
        fn prop_history_serialization_round_trip(transitions in proptest::collection::vec(0usize..4, 1..20)) {
            let states = [NodeState::InProgress, NodeState::Completed, NodeState::Failed, NodeState::Retrying];
            let mut ledger = ledger();
            for idx in &transitions {
                ledger.update_node_state("writer", states[*idx]);
            }

            let json = serde_json::to_string(&ledger.execution_history).unwrap();
            let restored: Vec<HistoryEntry> = serde_json::from_str(&json).unwrap();

            prop_assert_eq!(restored.len(), ledger.execution_history.len());
            for (a, b) in restored.iter().zip(ledger.execution_history.iter()) {
                prop_assert_eq!(&a.node, &b.node);
                prop_assert_eq!(a.state, b.state);
            }
        }
    }
}
