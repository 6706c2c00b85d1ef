//! LLM-backed worker implementation

use std::sync::Arc;

use async_trait::async_trait;
use eyre::Result;
use tracing::debug;

use crate::chain::ChainConfig;
use crate::llm::{CompletionRequest, LlmClient, Message};

use super::{
    PLANNER, REFACTOR, SCANNER, STRUCTURER, TEST_GEN, TEST_RUNNER, WRITER, Worker, WorkerResponse,
    completion_markers_for,
};

/// A worker backed by an LLM with a capability system prompt
///
/// Tool-equipped workers (filesystem, code runner) live outside this
/// process; this implementation covers the pure-text participants and is
/// the default roster for CLI runs.
pub struct LlmWorker {
    name: String,
    description: String,
    markers: Vec<String>,
    system_prompt: String,
    llm: Arc<dyn LlmClient>,
    max_tokens: u32,
}

impl LlmWorker {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        system_prompt: impl Into<String>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        let name = name.into();
        let markers = completion_markers_for(&name);
        Self {
            name,
            description: description.into(),
            markers,
            system_prompt: system_prompt.into(),
            llm,
            max_tokens: 8192,
        }
    }
}

#[async_trait]
impl Worker for LlmWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn completion_markers(&self) -> &[String] {
        &self.markers
    }

    async fn invoke(&self, prompt: &str) -> Result<WorkerResponse> {
        debug!(worker = %self.name, prompt_len = prompt.len(), "invoking worker");

        let request = CompletionRequest {
            system_prompt: self.system_prompt.clone(),
            messages: vec![Message::user(prompt)],
            max_tokens: self.max_tokens,
        };

        let response = self.llm.complete(request).await?;
        Ok(WorkerResponse::text(response.content))
    }
}

fn system_prompt_for(name: &str, marker: &str) -> String {
    let role = match name {
        PLANNER => "You are a code planning specialist. Break the task into a concrete implementation plan: functions, signatures, file layout and edge cases.",
        WRITER => "You are a function writing specialist. Produce complete, working code for the planned functions, targeting the file paths given in the instruction.",
        TEST_GEN => "You are a test generation specialist. Read the produced code and write thorough unit tests for every function, targeting the test file path given in the instruction.",
        TEST_RUNNER => "You are a test execution specialist. Run the generated test suite, report results verbatim, and produce a structured test report.",
        REFACTOR => "You are a code repair specialist. Analyze the test errors you are given, decide whether the fault is in the code or the tests, and fix it.",
        SCANNER => "You are a static analysis specialist. Scan the produced code and report quality findings.",
        STRUCTURER => "You are a project structuring specialist. Organize the produced files into a complete project layout with supporting configuration.",
        _ => "You are a specialist agent. Complete the task you are given.",
    };

    format!("{} When you have fully completed your task, end your reply with {}.", role, marker)
}

fn description_for(name: &str) -> &'static str {
    match name {
        PLANNER => "Plans code implementation: function breakdown, signatures, file layout",
        WRITER => "Writes complete function implementations to the project main file",
        TEST_GEN => "Generates unit test cases for every written function",
        TEST_RUNNER => "Executes the test suite and reports detailed results",
        REFACTOR => "Repairs code or tests based on test failure analysis",
        SCANNER => "Performs static analysis and code quality scanning",
        STRUCTURER => "Arranges produced files into a full project structure",
        _ => "General-purpose specialist",
    }
}

/// Build the LLM-backed roster for a chain
pub fn standard_roster(chain: &ChainConfig, llm: Arc<dyn LlmClient>) -> Vec<Arc<dyn Worker>> {
    chain
        .agents
        .iter()
        .map(|name| {
            let markers = completion_markers_for(name);
            let marker = markers.first().cloned().unwrap_or_else(|| "DONE".to_string());
            Arc::new(LlmWorker::new(
                name.clone(),
                description_for(name),
                system_prompt_for(name, &marker),
                Arc::clone(&llm),
            )) as Arc<dyn Worker>
        })
        .collect()
}
