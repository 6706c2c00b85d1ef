//! Next-speaker selector
//!
//! Given a candidate set, either trivially returns the sole candidate or
//! asks the LLM the fixed five-question progress-ledger prompt and extracts
//! the answer. Every failure path falls back to the first candidate, so
//! selection never stalls a run.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::instruction::generate_instruction;
use crate::ledger::{ProgressLedger, TaskLedger};
use crate::llm::{CompletionRequest, LlmClient, extract_first_json};

const SELECTOR_MAX_TOKENS: u32 = 2048;

/// Canned instruction used when selection falls back
const FALLBACK_INSTRUCTION: &str = "continue your specialty task";

/// Pick the next worker from a non-empty candidate list
///
/// Stores the chosen worker's instruction into the progress ledger as a
/// side effect. Returns `None` only for an empty candidate list.
pub async fn select_next_speaker(
    llm: &Arc<dyn LlmClient>,
    candidates: &[String],
    task: &TaskLedger,
    progress: &mut ProgressLedger,
    base_dir: &Path,
) -> Option<String> {
    let first = candidates.first()?.clone();

    if candidates.len() == 1 {
        let instruction = generate_instruction(llm, &first, task, progress, base_dir).await;
        debug!(worker = %first, "sole candidate selected");
        progress.set_instruction(&first, instruction);
        return Some(first);
    }

    let prompt = progress_ledger_prompt(candidates, task, progress);

    let reply = match llm.complete(CompletionRequest::user(prompt, SELECTOR_MAX_TOKENS)).await {
        Ok(response) => response.content,
        Err(e) => {
            warn!(error = %e, "next-speaker call failed, falling back to first candidate");
            progress.set_instruction(&first, FALLBACK_INSTRUCTION.to_string());
            return Some(first);
        }
    };

    let Some(analysis) = extract_first_json(&reply) else {
        warn!("next-speaker reply had no parseable JSON, falling back to first candidate");
        progress.set_instruction(&first, FALLBACK_INSTRUCTION.to_string());
        return Some(first);
    };

    let speaker = analysis["next_speaker"]["answer"].as_str().unwrap_or_default();
    let instruction = analysis["instruction_or_question"]["answer"]
        .as_str()
        .unwrap_or(FALLBACK_INSTRUCTION)
        .to_string();

    let selected = if candidates.iter().any(|c| c == speaker) {
        speaker.to_string()
    } else {
        debug!(proposed = speaker, "proposed speaker not among candidates, using first");
        first
    };

    debug!(worker = %selected, "next speaker selected");
    progress.set_instruction(&selected, instruction);
    Some(selected)
}

/// The fixed-schema progress-ledger prompt
fn progress_ledger_prompt(candidates: &[String], task: &TaskLedger, progress: &ProgressLedger) -> String {
    let candidate_list = candidates.join(", ");

    format!(
        "Recall the request we are working on:\n\n{}\n\n\
         We have assembled the following team:\n\n{}\n\n\
         To make progress on the request, answer the following questions, including necessary reasoning:\n\n\
         - Is the request fully satisfied? (True if complete, False if the original request has not yet been successfully and fully addressed)\n\
         - Are we in a loop, repeating the same requests and/or getting the same responses? Loops can span multiple turns\n\
         - Are we making forward progress? (True if just getting started or recent messages are adding value; False if recent messages show evidence of being stuck or there is a significant barrier to success)\n\
         - Who should speak next? (select from: {})\n\
         - What instruction or question would you give this team member? (speak to them directly, and include any specific information they may need)\n\n\
         Conversation history:\n{}\n\n\
         Output the answers in the following JSON format. The JSON object must be directly parseable; output only JSON and do not deviate from this schema:\n\n\
         {{\n\
            \"is_request_satisfied\": {{\"reason\": \"string\", \"answer\": boolean}},\n\
            \"is_in_loop\": {{\"reason\": \"string\", \"answer\": boolean}},\n\
            \"is_progress_being_made\": {{\"reason\": \"string\", \"answer\": boolean}},\n\
            \"next_speaker\": {{\"reason\": \"string\", \"answer\": \"string (one of: {})\"}},\n\
            \"instruction_or_question\": {{\"reason\": \"string\", \"answer\": \"string\"}}\n\
         }}",
        task.original_task,
        task.format_team_description(),
        candidate_list,
        format_conversation_history(progress),
        candidate_list,
    )
}

/// Recent execution history as a short conversation transcript
fn format_conversation_history(progress: &ProgressLedger) -> String {
    let with_results: Vec<_> = progress
        .execution_history
        .iter()
        .filter(|entry| entry.result.is_some())
        .collect();

    if with_results.is_empty() {
        return "no conversation history".to_string();
    }

    let skip = with_results.len().saturating_sub(5);
    with_results
        .iter()
        .skip(skip)
        .flat_map(|entry| {
            let result = entry.result.as_ref().expect("filtered on is_some");
            let mut lines = vec![format!("{}: {}", entry.node, if result.success { "success" } else { "failure" })];
            if !result.message_content.is_empty() {
                let preview: String = result.message_content.chars().take(100).collect();
                lines.push(format!("  output: {}", preview));
            }
            lines
        })
        .collect::<Vec<_>>()
        .join("\n")
}
