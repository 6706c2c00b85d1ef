//! Dependency checker
//!
//! Reports which upstream workers have completed and what artifacts should
//! exist for a given worker. Returns a formatted multi-line string because
//! its consumer is the LLM, not code.

use crate::ledger::{NodeState, ProgressLedger, TaskLedger};
use crate::worker::{REFACTOR, SCANNER, STRUCTURER, TEST_GEN, TEST_RUNNER, WRITER};

/// Produce the dependency report for a worker
pub fn dependency_report(worker: &str, task: &TaskLedger, progress: &ProgressLedger) -> String {
    let completed = progress.completed_nodes();
    let main_file_path = task.get_file_path("main");
    let test_file_path = task.get_file_path("test");

    let mut lines = vec![format!("Completed workers: {:?}", completed)];

    let done = |name: &str| completed.iter().any(|c| c == name);

    match worker {
        TEST_GEN => {
            if done(WRITER) {
                lines.push("writer has completed; the generated code file can be read".to_string());
                lines.push(format!("expected code file location: {}", main_file_path));
            } else {
                lines.push("writer has not completed; tests cannot be generated yet".to_string());
            }
        }
        TEST_RUNNER => {
            if done(TEST_GEN) {
                lines.push("test_gen has completed; the test suite can be executed".to_string());
                lines.push(format!("expected test file location: {}", test_file_path));
            } else {
                lines.push("test_gen has not completed; tests cannot be executed yet".to_string());
            }
        }
        REFACTOR => {
            // The only worker whose dependency is a specific failure state
            match progress.node_states.get(TEST_RUNNER) {
                Some(NodeState::Failed) => {
                    lines.push("test_runner failed; repair can proceed".to_string());
                }
                Some(_) => {
                    lines.push("test_runner has not failed; repair may be unnecessary".to_string());
                }
                None => {
                    lines.push("test_runner has not executed; nothing to repair yet".to_string());
                }
            }
        }
        SCANNER => {
            if done(WRITER) {
                lines.push("writer has completed; the code can be scanned".to_string());
                lines.push(format!("expected scan target: {}", main_file_path));
            } else {
                lines.push("writer has not completed; nothing to scan yet".to_string());
            }
        }
        STRUCTURER => {
            if done(WRITER) && done(TEST_GEN) {
                lines.push("code and test files are complete; project structure can be created".to_string());
                lines.push(format!("source file location: {}", main_file_path));
                lines.push(format!("test file location: {}", test_file_path));
            } else {
                lines.push("waiting for code and test files before structuring the project".to_string());
            }
        }
        _ => {}
    }

    lines.join("\n")
}
