//! Dynamic router
//!
//! Decides the next candidate set from the completed worker and its
//! analysis. The static chain is authoritative only as a description of
//! allowed participants; these rules are the real scheduler, including the
//! repair micro-loop (test runner -> refactor -> test runner) and the
//! reflection skip. Returning an empty set terminates the inner loop.

use tracing::{debug, info};

use crate::analysis::{ResultAnalysis, contains_ci};
use crate::chain::ChainConfig;
use crate::ledger::{NodeState, ProgressLedger, TaskLedger};
use crate::worker::{PLANNER, REFACTOR, SCANNER, STRUCTURER, TEST_GEN, TEST_RUNNER, WRITER};

/// Keywords that mark test output as carrying actionable errors
const TEST_ERROR_KEYWORDS: [&str; 4] = ["failed", "error", "assertion", "traceback"];

/// The canonical linear flow used as the default route
const NORMAL_FLOW: [&str; 6] = [PLANNER, WRITER, TEST_GEN, TEST_RUNNER, SCANNER, STRUCTURER];

/// Compute the next candidate set after a worker completes
///
/// Writes to the ledgers in two places: the error-history append on a test
/// failure (rule 1) and the test-runner reset after a successful repair
/// (rule 3) - the only place a Completed worker returns to NotStarted.
pub fn next_candidates(
    completed: &str,
    analysis: &ResultAnalysis,
    chain: &ChainConfig,
    task: &mut TaskLedger,
    progress: &mut ProgressLedger,
) -> Vec<String> {
    // Rule 1: test failure with detected errors routes to repair
    if completed == TEST_RUNNER && !analysis.success && chain.contains(REFACTOR) {
        let has_test_errors = !analysis.failure_reasons.is_empty()
            || TEST_ERROR_KEYWORDS.iter().any(|kw| contains_ci(&analysis.message_content, kw));

        if has_test_errors {
            info!("test failure detected, routing error payload to repair");
            task.record_error(
                TEST_RUNNER,
                analysis.failure_reasons.clone(),
                &analysis.message_content,
                progress.monotonic_now(),
            );
            return vec![REFACTOR.to_string()];
        }
    }

    // Rule 2: test failure with no clear error retries while budget remains
    if completed == TEST_RUNNER && !analysis.success && progress.retry_count(TEST_RUNNER) <= chain.max_retries {
        debug!("no clear test error, retrying the test runner");
        progress.update_node_state(TEST_RUNNER, NodeState::Retrying);
        return vec![TEST_RUNNER.to_string()];
    }

    // Rule 3: successful repair re-arms the test runner
    if completed == REFACTOR && analysis.success && chain.contains(TEST_RUNNER) {
        info!("repair complete, re-running the test suite");
        progress.reset_node(TEST_RUNNER);
        return vec![TEST_RUNNER.to_string()];
    }

    // Rule 4: test success skips any reflection step and goes to scanning
    if completed == TEST_RUNNER && analysis.success && chain.contains(SCANNER) {
        return vec![SCANNER.to_string()];
    }

    if !analysis.success {
        // Rule 5: general failure with retries remaining
        if progress.retry_count(completed) <= chain.max_retries {
            debug!(worker = completed, "retrying after failure");
            progress.update_node_state(completed, NodeState::Retrying);
            return vec![completed.to_string()];
        }

        // Rule 6: retries exhausted; the alternative table decides, and an
        // empty result ends the run
        info!(worker = completed, "retries exhausted, abandoning path");
        task.mark_failed_path(completed);
        return alternative_nodes(completed, chain);
    }

    // Rule 7: default linear flow restricted to chain members
    successor_in_flow(completed, chain)
}

/// Static fallback table for workers whose retries are exhausted
pub fn alternative_nodes(failed: &str, chain: &ChainConfig) -> Vec<String> {
    let alternatives: &[&str] = match failed {
        WRITER => &[PLANNER],
        TEST_GEN => &[WRITER],
        TEST_RUNNER => &[TEST_GEN],
        _ => &[],
    };

    alternatives
        .iter()
        .filter(|alt| chain.contains(alt))
        .map(|alt| alt.to_string())
        .collect()
}

/// Next chain member after `completed` in the canonical flow
fn successor_in_flow(completed: &str, chain: &ChainConfig) -> Vec<String> {
    let Some(position) = NORMAL_FLOW.iter().position(|node| *node == completed) else {
        return Vec::new();
    };

    NORMAL_FLOW[position + 1..]
        .iter()
        .find(|node| chain.contains(node))
        .map(|node| vec![node.to_string()])
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixtures(chain: &ChainConfig) -> (TaskLedger, ProgressLedger) {
        let task = TaskLedger::new("/tmp/out");
        let progress = ProgressLedger::new(chain.agents.iter().cloned());
        (task, progress)
    }

    fn success(content: &str) -> ResultAnalysis {
        ResultAnalysis {
            success: true,
            failure_reasons: vec![],
            message_content: content.to_string(),
            has_completion_marker: true,
        }
    }

    fn failure(content: &str, reasons: &[&str]) -> ResultAnalysis {
        ResultAnalysis {
            success: false,
            failure_reasons: reasons.iter().map(|r| r.to_string()).collect(),
            message_content: content.to_string(),
            has_completion_marker: false,
        }
    }

    #[test]
    fn test_rule1_test_failure_routes_to_refactor() {
        let chain = ChainConfig::standard();
        let (mut task, mut progress) = fixtures(&chain);

        let analysis = failure("AssertionError: Expected 'Hi' but got 'hi'", &[]);
        let next = next_candidates(TEST_RUNNER, &analysis, &chain, &mut task, &mut progress);

        assert_eq!(next, vec![REFACTOR]);
        assert_eq!(task.error_history.len(), 1);
        assert_eq!(task.error_history[0].source, TEST_RUNNER);
        assert_eq!(task.error_history[0].raw_output, analysis.message_content);
    }

    #[test]
    fn test_rule1_fires_on_failure_reasons_alone() {
        let chain = ChainConfig::standard();
        let (mut task, mut progress) = fixtures(&chain);

        let analysis = failure("no keywords here", &["report shows 2 failures, 0 errors"]);
        let next = next_candidates(TEST_RUNNER, &analysis, &chain, &mut task, &mut progress);

        assert_eq!(next, vec![REFACTOR]);
    }

    #[test]
    fn test_rule1_skipped_when_refactor_not_in_chain() {
        let chain = ChainConfig::minimal();
        let (mut task, mut progress) = fixtures(&chain);

        let analysis = failure("AssertionError in output", &["reason"]);
        let next = next_candidates(TEST_RUNNER, &analysis, &chain, &mut task, &mut progress);

        // No refactor in the chain: falls through to retry
        assert_eq!(next, vec![TEST_RUNNER]);
        assert!(task.error_history.is_empty());
    }

    #[test]
    fn test_rule2_unclear_test_failure_retries() {
        let chain = ChainConfig::standard();
        let (mut task, mut progress) = fixtures(&chain);

        // No keywords, no failure reasons
        let analysis = failure("something vague happened here that is long enough", &[]);
        let next = next_candidates(TEST_RUNNER, &analysis, &chain, &mut task, &mut progress);

        assert_eq!(next, vec![TEST_RUNNER]);
        assert_eq!(progress.state_of(TEST_RUNNER), NodeState::Retrying);
        assert!(task.error_history.is_empty());
    }

    #[test]
    fn test_rule3_refactor_success_rearms_test_runner() {
        let chain = ChainConfig::standard();
        let (mut task, mut progress) = fixtures(&chain);

        progress.update_node_state(TEST_RUNNER, NodeState::Completed);
        progress.increment_retry(TEST_RUNNER);

        let next = next_candidates(REFACTOR, &success("fixed it REFACTORING_COMPLETE"), &chain, &mut task, &mut progress);

        assert_eq!(next, vec![TEST_RUNNER]);
        assert_eq!(progress.state_of(TEST_RUNNER), NodeState::NotStarted);
        assert_eq!(progress.retry_count(TEST_RUNNER), 0);
    }

    #[test]
    fn test_rule4_test_success_skips_to_scanner() {
        let chain = ChainConfig::standard();
        let (mut task, mut progress) = fixtures(&chain);

        let next = next_candidates(TEST_RUNNER, &success("all green"), &chain, &mut task, &mut progress);
        assert_eq!(next, vec![SCANNER]);
    }

    #[test]
    fn test_rule5_general_failure_retries() {
        let chain = ChainConfig::standard();
        let (mut task, mut progress) = fixtures(&chain);

        progress.increment_retry(WRITER);
        let next = next_candidates(WRITER, &failure("x", &["too short"]), &chain, &mut task, &mut progress);
        assert_eq!(next, vec![WRITER]);
        assert_eq!(progress.state_of(WRITER), NodeState::Retrying);
    }

    #[test]
    fn test_rule6_exhausted_retries_use_alternatives() {
        let chain = ChainConfig::standard();
        let (mut task, mut progress) = fixtures(&chain);

        for _ in 0..3 {
            progress.increment_retry(WRITER);
        }

        let next = next_candidates(WRITER, &failure("x", &["too short"]), &chain, &mut task, &mut progress);
        assert_eq!(next, vec![PLANNER]);
        assert_eq!(task.failed_paths, vec![WRITER]);
    }

    #[test]
    fn test_rule6_no_alternative_terminates() {
        let chain = ChainConfig::standard();
        let (mut task, mut progress) = fixtures(&chain);

        for _ in 0..3 {
            progress.increment_retry(REFACTOR);
        }

        let next = next_candidates(REFACTOR, &failure("still broken", &["missing marker"]), &chain, &mut task, &mut progress);
        assert!(next.is_empty());
        assert_eq!(task.failed_paths, vec![REFACTOR]);
    }

    #[test]
    fn test_rule7_linear_flow() {
        let chain = ChainConfig::standard();
        let (mut task, mut progress) = fixtures(&chain);

        let next = next_candidates(PLANNER, &success("planned"), &chain, &mut task, &mut progress);
        assert_eq!(next, vec![WRITER]);

        let next = next_candidates(SCANNER, &success("scanned"), &chain, &mut task, &mut progress);
        assert_eq!(next, vec![STRUCTURER]);

        // Last node has no successor
        let next = next_candidates(STRUCTURER, &success("structured"), &chain, &mut task, &mut progress);
        assert!(next.is_empty());
    }

    #[test]
    fn test_rule7_skips_non_members() {
        // quality chain: writer, test_runner, scanner
        let chain = ChainConfig::quality();
        let (mut task, mut progress) = fixtures(&chain);

        // writer's successor in the flow is test_gen, which is not a member;
        // the flow skips ahead to test_runner
        let next = next_candidates(WRITER, &success("written"), &chain, &mut task, &mut progress);
        assert_eq!(next, vec![TEST_RUNNER]);
    }

    #[test]
    fn test_minimal_chain_terminates_after_test_runner() {
        let chain = ChainConfig::minimal();
        let (mut task, mut progress) = fixtures(&chain);

        // No scanner or structurer in the chain
        let next = next_candidates(TEST_RUNNER, &success("all pass"), &chain, &mut task, &mut progress);
        assert!(next.is_empty());
    }

    #[test]
    fn test_prototype_chain_terminates_after_writer() {
        let chain = ChainConfig::prototype();
        let (mut task, mut progress) = fixtures(&chain);

        let next = next_candidates(WRITER, &success("written"), &chain, &mut task, &mut progress);
        assert!(next.is_empty());
    }

    #[test]
    fn test_alternatives_filtered_by_chain() {
        // quality chain has no test_gen, so the test_runner alternative is empty
        let chain = ChainConfig::quality();
        assert!(alternative_nodes(TEST_RUNNER, &chain).is_empty());

        let standard = ChainConfig::standard();
        assert_eq!(alternative_nodes(TEST_RUNNER, &standard), vec![TEST_GEN]);
        assert!(alternative_nodes(REFACTOR, &standard).is_empty());
    }
}
