//! Planner - the outer loop
//!
//! One-shot task fingerprinting: derive project file naming, collect facts,
//! write the plan. Three LLM calls; the naming call has a keyword fallback
//! table, the facts and plan calls propagate errors (an unrecoverable
//! planning failure aborts the run).

use std::sync::Arc;

use eyre::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use crate::ledger::TaskLedger;
use crate::llm::{CompletionRequest, LlmClient, extract_first_json};

const PLANNING_MAX_TOKENS: u32 = 4096;

/// Project naming derived from the task description
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ProjectNaming {
    pub project_name: String,
    pub main_file: String,
    pub test_file: String,
    #[serde(default)]
    pub description: String,
}

/// Derive project naming from the task, LLM-assisted
///
/// Any failure - call error, missing JSON, wrong shape - falls back to the
/// keyword table.
pub async fn derive_project_naming(llm: &Arc<dyn LlmClient>, task: &str) -> ProjectNaming {
    let prompt = format!(
        "Analyze the following task and derive project naming:\n\n\
         Task: {}\n\n\
         Determine:\n\
         1. the project type and theme\n\
         2. a fitting project name (english, underscore separated)\n\
         3. the main code file name (ending in .py)\n\
         4. the test file name (starting with test_, ending in .py)\n\n\
         Reply with only this JSON, nothing else:\n\
         {{\n\
             \"project_name\": \"name\",\n\
             \"main_file\": \"name.py\",\n\
             \"test_file\": \"test_name.py\",\n\
             \"description\": \"one line\"\n\
         }}\n\n\
         Examples:\n\
         - \"create a string manipulation library\" -> {{\"project_name\": \"string_utils\", \"main_file\": \"string_operations.py\", \"test_file\": \"test_string_operations.py\"}}\n\
         - \"develop a math calculation library\" -> {{\"project_name\": \"math_utils\", \"main_file\": \"math_calculator.py\", \"test_file\": \"test_math_calculator.py\"}}",
        task
    );

    let reply = match llm.complete(CompletionRequest::user(prompt, PLANNING_MAX_TOKENS)).await {
        Ok(response) => response.content,
        Err(e) => {
            warn!(error = %e, "naming call failed, using keyword fallback");
            return default_project_naming(task);
        }
    };

    match extract_first_json(&reply).map(serde_json::from_value::<ProjectNaming>) {
        Some(Ok(naming)) => naming,
        _ => {
            warn!("naming reply had no usable JSON, using keyword fallback");
            default_project_naming(task)
        }
    }
}

/// Keyword fallback table for project naming
pub fn default_project_naming(task: &str) -> ProjectNaming {
    let lower = task.to_lowercase();

    let (project_name, main_file, test_file, description) = if lower.contains("string") {
        ("string_utils", "string_operations.py", "test_string_operations.py", "string manipulation library")
    } else if lower.contains("math") || lower.contains("calc") {
        ("math_utils", "math_calculator.py", "test_math_calculator.py", "math calculation library")
    } else if lower.contains("file") {
        ("file_utils", "file_processor.py", "test_file_processor.py", "file processing utilities")
    } else if lower.contains("network") || lower.contains("http") {
        ("network_utils", "network_client.py", "test_network_client.py", "network utilities")
    } else {
        ("custom_utils", "main_module.py", "test_main_module.py", "general utility library")
    };

    ProjectNaming {
        project_name: project_name.to_string(),
        main_file: main_file.to_string(),
        test_file: test_file.to_string(),
        description: description.to_string(),
    }
}

/// Run the outer planning loop, filling the task ledger
///
/// Planning is stateless and bounded; its outputs are read-only for the
/// rest of the traversal (until a replan re-enters here).
pub async fn outer_loop_planning(llm: &Arc<dyn LlmClient>, task: &str, ledger: &mut TaskLedger) -> Result<()> {
    info!("starting task planning phase");

    // Naming first: the file-path contract everything downstream reads
    let naming = derive_project_naming(llm, task).await;
    let base_dir = ledger.base_dir().to_string();
    ledger.set_project_config(&naming.project_name, &naming.main_file, &naming.test_file, &base_dir);

    info!(
        project = %naming.project_name,
        main = %ledger.get_file_path("main"),
        "project naming derived"
    );

    // Facts analysis
    let facts_prompt = format!(
        "Analyze the following task and collect the relevant facts:\n\n\
         Task: {}\n\n\
         Project configuration:\n\
         - project name: {}\n\
         - main file path: {}\n\
         - test file path: {}\n\n\
         List:\n\
         1. facts stated explicitly in the task\n\
         2. information that needs to be looked up\n\
         3. information that needs to be derived\n\
         4. educated guesses\n\n\
         Available worker team:\n{}",
        task,
        naming.project_name,
        ledger.get_file_path("main"),
        ledger.get_file_path("test"),
        ledger.format_team_description(),
    );

    let facts = llm
        .complete(CompletionRequest::user(facts_prompt, PLANNING_MAX_TOKENS))
        .await
        .context("facts analysis call failed")?
        .content;
    ledger.update_facts(vec![facts.clone()]);

    // Execution plan, consuming the facts
    let plan_prompt = format!(
        "Produce a detailed execution plan from the following information:\n\n\
         Task: {}\n\
         Facts analysis: {}\n\n\
         Project configuration:\n\
         - main file path: {}\n\
         - test file path: {}\n\n\
         Available workers:\n{}\n\n\
         Write a step-by-step plan naming each worker's concrete task and the file paths involved.",
        task,
        facts,
        ledger.get_file_path("main"),
        ledger.get_file_path("test"),
        ledger.format_team_description(),
    );

    let plan = llm
        .complete(CompletionRequest::user(plan_prompt, PLANNING_MAX_TOKENS))
        .await
        .context("plan call failed")?
        .content;
    ledger.update_plan(vec![plan]);

    info!("planning phase complete");
    Ok(())
}
