//! Instruction builder
//!
//! Produces the per-worker natural-language instruction (LLM-generated with
//! a static fallback table) and composes the enhanced prompt the worker is
//! actually invoked with.

use std::path::Path;
use std::sync::Arc;

use tracing::warn;

use crate::deps::dependency_report;
use crate::ledger::{HistoryEntry, ProgressLedger, TaskLedger};
use crate::llm::{CompletionRequest, LlmClient};
use crate::memory::WorkerOutputs;
use crate::paths::ProjectLayout;
use crate::worker::{PLANNER, REFACTOR, SCANNER, STRUCTURER, TEST_GEN, TEST_RUNNER, WRITER, Worker};

const INSTRUCTION_MAX_TOKENS: u32 = 1024;

/// Generate a specific instruction for a worker via the LLM
///
/// Falls back to the static per-worker default on any LLM failure; a run
/// must not stall because the LLM is slow or noisy.
pub async fn generate_instruction(
    llm: &Arc<dyn LlmClient>,
    worker_name: &str,
    task: &TaskLedger,
    progress: &ProgressLedger,
    base_dir: &Path,
) -> String {
    let dependency_info = dependency_report(worker_name, task, progress);
    let layout = ProjectLayout::discover(base_dir);
    let path_info = layout.format_hints(base_dir);

    let history = progress.history_of(worker_name);
    let prompt = format!(
        "Generate a specific execution instruction for the worker '{}'.\n\n\
         Current task: {}\n\n\
         Worker capability: {}\n\n\
         Execution plan: {}\n\n\
         Recent history:\n{}\n\n\
         Dependency check:\n{}\n\n\
         {}\n\n\
         Produce one concrete, self-contained instruction telling this worker what to do. It should:\n\
         1. state the specific goal\n\
         2. include the relevant file paths from the path information above\n\
         3. call out problems to avoid when there are past failures\n\
         4. state the expected output and success criteria\n\
         Return only the instruction text, no extra commentary.",
        worker_name,
        task.original_task,
        task.agent_capabilities.get(worker_name).map(String::as_str).unwrap_or("unknown"),
        task.plan.first().map(String::as_str).unwrap_or("no plan available"),
        format_node_history(&history),
        dependency_info,
        path_info,
    );

    match llm.complete(CompletionRequest::user(prompt, INSTRUCTION_MAX_TOKENS)).await {
        Ok(response) => response.content.trim().to_string(),
        Err(e) => {
            warn!(worker = worker_name, error = %e, "instruction generation failed, using default");
            default_instruction(worker_name, task, &dependency_info)
        }
    }
}

/// Static per-worker default instruction referencing the configured paths
pub fn default_instruction(worker_name: &str, task: &TaskLedger, dependency_info: &str) -> String {
    let main_file_path = task.get_file_path("main");
    let test_file_path = task.get_file_path("test");
    let project_name = task.project_name();
    let base_dir = task.base_dir().to_string();

    let base = match worker_name {
        PLANNER => format!(
            "Analyze the {} requirements and produce a detailed implementation plan. All files live under {}; the main code file is {} and the test file is {}.",
            project_name, base_dir, main_file_path, test_file_path
        ),
        WRITER => format!(
            "Write the complete {} code and save it to {}. Include every required function implementation.",
            project_name, main_file_path
        ),
        TEST_GEN => format!(
            "Read the code in {} and generate complete test cases for every function, saved to {}.",
            main_file_path, test_file_path
        ),
        TEST_RUNNER => format!(
            "Execute the test cases in {} and produce a detailed test report. Make sure {} is importable from the working directory.",
            test_file_path, base_dir
        ),
        REFACTOR => format!(
            "Analyze the test error information and repair the fault. Read {} and {}, choose a repair strategy based on the error type, and make the tests pass.",
            main_file_path, test_file_path
        ),
        SCANNER => format!("Scan {} with static analysis and produce a quality report.", main_file_path),
        STRUCTURER => format!(
            "Create a complete project layout from the files in {}, with src, tests and docs directories and the necessary configuration files.",
            base_dir
        ),
        other => format!("Complete the {} task according to your specialty.", other),
    };

    format!(
        "{}\n\nDependency information:\n{}\n\n\
         Make sure to:\n\
         1. follow the instruction precisely\n\
         2. produce complete output including the required completion marker\n\
         3. state clearly any dependency problem you hit",
        base, dependency_info
    )
}

/// Compose the full prompt a worker is invoked with
///
/// Consumes the stored one-shot instruction (regenerating when absent) and
/// layers on task background, project configuration, plan, current state,
/// collaboration info, and the repair error payload when applicable.
pub async fn build_enhanced_prompt(
    llm: &Arc<dyn LlmClient>,
    worker: &dyn Worker,
    task: &TaskLedger,
    progress: &mut ProgressLedger,
    base_dir: &Path,
) -> String {
    let worker_name = worker.name();

    let instruction = match progress.take_instruction(worker_name) {
        Some(instruction) => instruction,
        None => generate_instruction(llm, worker_name, task, progress, base_dir).await,
    };

    let mut prompt = format!(
        "## Execution instruction\n{}\n\n\
         ## Task background\nOriginal task: {}\n\n\
         ## Project configuration\nProject name: {}\nMain file path: {}\nTest file path: {}\n\n\
         ## Execution plan\n{}\n\n\
         ## Current state\n{}",
        instruction,
        task.original_task,
        task.project_name(),
        task.get_file_path("main"),
        task.get_file_path("test"),
        task.plan.first().map(String::as_str).unwrap_or("no plan available"),
        format_current_state(progress),
    );

    if let Some(context) = task.enhanced_contexts.get(worker_name) {
        if !context.dependency_outputs.is_empty() {
            prompt.push_str(&format!(
                "\n\n## Upstream worker outputs\n{}",
                format_dependency_outputs(&context.dependency_outputs)
            ));
        }
        if !context.incoming_messages.is_empty() {
            let lines: Vec<String> = context.incoming_messages.iter().map(|m| format!("- {}", m)).collect();
            prompt.push_str(&format!("\n\n## Messages received\n{}", lines.join("\n")));
        }
        if !context.suggestions.is_empty() {
            let lines: Vec<String> = context.suggestions.iter().map(|s| format!("- {}", s)).collect();
            prompt.push_str(&format!("\n\n## Suggested actions\n{}", lines.join("\n")));
        }
    }

    if worker_name == REFACTOR {
        if let Some(error) = task.latest_error() {
            prompt.push_str(&format!(
                "\n\n## Test Error Information\nSource: {}\nReasons: {}\n\n\
                 ## Test Output Detail\n{}\n\n\
                 ## Fix Guidance\n\
                 Analyze the test errors above and decide whether the fault is in the code or the tests:\n\
                 1. mismatched function names, parameters or return values -> fix the code\n\
                 2. incorrectly written test cases -> fix the tests\n\
                 3. wrong logic in the implementation -> fix the code\n\
                 4. verify the tests pass after the repair",
                error.source,
                error.failure_reasons.join("; "),
                error.raw_output,
            ));
        }
    }

    prompt.push_str(&format!(
        "\n\n## Reminder\n\
         - follow the execution instruction exactly\n\
         - when your task is fully complete, emit your completion marker: {}\n\
         - if you hit a problem, describe it in detail",
        worker.completion_markers().join(" or "),
    ));

    prompt
}

/// Current execution state, one line per worker
pub fn format_current_state(progress: &ProgressLedger) -> String {
    progress
        .node_states
        .iter()
        .map(|(node, state)| format!("{}: {} (retries: {})", node, state, progress.retry_count(node)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Last three attempts of one worker
pub fn format_node_history(history: &[&HistoryEntry]) -> String {
    let with_results: Vec<&&HistoryEntry> = history.iter().filter(|e| e.result.is_some()).collect();
    if with_results.is_empty() {
        return "no execution history".to_string();
    }

    let skip = with_results.len().saturating_sub(3);
    with_results
        .iter()
        .skip(skip)
        .enumerate()
        .flat_map(|(i, entry)| {
            let result = entry.result.as_ref().expect("filtered on is_some");
            let mut lines = vec![format!(
                "attempt {}: {}",
                i + 1,
                if result.success { "success" } else { "failure" }
            )];
            if !result.failure_reasons.is_empty() {
                lines.push(format!("  reasons: {}", result.failure_reasons.join(", ")));
            }
            lines
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Upstream outputs, truncated for prompt use
fn format_dependency_outputs(outputs: &std::collections::BTreeMap<String, WorkerOutputs>) -> String {
    outputs
        .iter()
        .map(|(agent, out)| {
            let preview: String = out.message_content.chars().take(100).collect();
            format!("{}: success={}, output: {}", agent, out.success, preview)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
