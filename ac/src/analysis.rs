//! Result analyzer - classifies worker responses as success or failure
//!
//! Completion markers are cheap, self-declared signals. The test runner is
//! the exception: its own declaration of "done" is unreliable, so actual
//! test outcomes from the report artifact override it.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::worker::{TEST_RUNNER, Worker, WorkerResponse};

/// Keywords whose presence in test output indicates failure
const TEST_FAILURE_KEYWORDS: [&str; 3] = ["failed", "error", "assertion"];

/// Classification of one worker response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultAnalysis {
    pub success: bool,
    pub failure_reasons: Vec<String>,
    /// Primary content, inner messages and tool traces concatenated
    pub message_content: String,
    pub has_completion_marker: bool,
}

impl ResultAnalysis {
    /// Analysis for a worker invocation that raised instead of returning
    pub fn execution_exception(error: &eyre::Report) -> Self {
        Self {
            success: false,
            failure_reasons: vec![format!("execution exception: {}", error)],
            message_content: String::new(),
            has_completion_marker: false,
        }
    }
}

/// Case-insensitive substring check (ASCII lowering, no normalization)
pub fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Classify a worker response
///
/// `report_path` is the well-known test-report artifact location, consulted
/// only for the test runner.
pub async fn analyze_response(worker: &dyn Worker, response: &WorkerResponse, report_path: &Path) -> ResultAnalysis {
    let combined = response.combined();
    let expected_markers = worker.completion_markers();
    let has_marker = expected_markers.iter().any(|m| combined.contains(m.as_str()));

    let mut failure_reasons = Vec::new();

    let success = if !has_marker {
        // No self-declared completion: require substantive output
        combined.len() > 50
    } else if worker.name() == TEST_RUNNER {
        match inspect_test_report(report_path).await {
            Some((failures, errors)) => {
                if failures > 0 || errors > 0 {
                    failure_reasons.push(format!("report shows {} failures, {} errors", failures, errors));
                    false
                } else {
                    true
                }
            }
            None => {
                // No report artifact: fall back to scanning the output
                let failed = TEST_FAILURE_KEYWORDS.iter().any(|kw| contains_ci(&combined, kw));
                if failed {
                    failure_reasons.push("test failure indicators detected in output".to_string());
                }
                !failed
            }
        }
    } else {
        true
    };

    if !has_marker {
        if combined.len() <= 50 {
            failure_reasons.push(format!(
                "missing completion marker {:?} and output too short",
                expected_markers
            ));
        } else {
            failure_reasons.push(format!("missing completion marker {:?}", expected_markers));
        }
    }

    debug!(worker = %worker.name(), success, has_marker, "analyzed worker response");

    ResultAnalysis {
        success,
        failure_reasons,
        message_content: combined,
        has_completion_marker: has_marker,
    }
}

/// Read (failures, errors) from the test-report artifact; None when absent
/// or unparseable
async fn inspect_test_report(report_path: &Path) -> Option<(u64, u64)> {
    let content = tokio::fs::read_to_string(report_path).await.ok()?;
    let report: serde_json::Value = serde_json::from_str(&content).ok()?;

    let summary = report.get("summary")?;
    let failures = summary.get("failures").and_then(|v| v.as_u64()).unwrap_or(0);
    let errors = summary.get("errors").and_then(|v| v.as_u64()).unwrap_or(0);
    Some((failures, errors))
}
