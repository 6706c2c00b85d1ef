//! Chain configurations
//!
//! A chain selects which workers participate in a run, their dependency
//! edges, and the stall/retry limits. The named chains are frozen; the
//! router and dependency checker treat membership here as authoritative.

use std::collections::BTreeMap;

use crate::worker::{PLANNER, REFACTOR, SCANNER, STRUCTURER, TEST_GEN, TEST_RUNNER, WRITER};

/// A named selection of workers and their dependency edges
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub name: String,
    pub description: String,
    /// Participating workers in canonical flow order
    pub agents: Vec<String>,
    /// worker -> upstream workers it consumes output from
    pub dependencies: BTreeMap<String, Vec<String>>,
    /// Consecutive-failure budget before a replan
    pub max_stalls: u32,
    /// Per-worker retry budget
    pub max_retries: u32,
}

/// Summary of a chain for display
#[derive(Debug, Clone)]
pub struct ChainInfo {
    pub name: String,
    pub description: String,
    pub agent_count: usize,
    pub flow: String,
    pub max_stalls: u32,
    pub max_retries: u32,
}

fn deps(pairs: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
    pairs
        .iter()
        .map(|(agent, ups)| (agent.to_string(), ups.iter().map(|u| u.to_string()).collect()))
        .collect()
}

fn agents(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

impl ChainConfig {
    /// The full seven-worker flow: plan, write, test, run, repair, scan, structure
    pub fn standard() -> Self {
        Self {
            name: "standard".to_string(),
            description: "Full flow with planning, coding, testing, repair, scanning and structuring".to_string(),
            agents: agents(&[PLANNER, WRITER, TEST_GEN, TEST_RUNNER, REFACTOR, SCANNER, STRUCTURER]),
            dependencies: deps(&[
                (WRITER, &[PLANNER]),
                (TEST_GEN, &[WRITER]),
                (TEST_RUNNER, &[TEST_GEN]),
                (REFACTOR, &[TEST_RUNNER]),
                (SCANNER, &[TEST_RUNNER, REFACTOR]),
                (STRUCTURER, &[SCANNER]),
            ]),
            max_stalls: 3,
            max_retries: 2,
        }
    }

    /// The minimum viable flow: plan, write, generate tests, run them
    pub fn minimal() -> Self {
        Self {
            name: "minimal".to_string(),
            description: "Core flow with planning, coding, test generation and verification".to_string(),
            agents: agents(&[PLANNER, WRITER, TEST_GEN, TEST_RUNNER]),
            dependencies: deps(&[(WRITER, &[PLANNER]), (TEST_GEN, &[WRITER]), (TEST_RUNNER, &[TEST_GEN])]),
            max_stalls: 2,
            max_retries: 1,
        }
    }

    /// Concept-validation flow: plan and write only
    pub fn prototype() -> Self {
        Self {
            name: "prototype".to_string(),
            description: "Planning and coding only, for quick concept validation".to_string(),
            agents: agents(&[PLANNER, WRITER]),
            dependencies: deps(&[(WRITER, &[PLANNER])]),
            max_stalls: 1,
            max_retries: 1,
        }
    }

    /// Quality-focused flow: write, verify, scan
    pub fn quality() -> Self {
        Self {
            name: "quality".to_string(),
            description: "Quality assurance flow focused on verification and scanning".to_string(),
            agents: agents(&[WRITER, TEST_RUNNER, SCANNER]),
            dependencies: deps(&[(TEST_RUNNER, &[WRITER]), (SCANNER, &[TEST_RUNNER])]),
            max_stalls: 2,
            max_retries: 1,
        }
    }

    /// Look up a chain by name
    pub fn get(name: &str) -> Option<Self> {
        match name {
            "standard" => Some(Self::standard()),
            "minimal" => Some(Self::minimal()),
            "prototype" => Some(Self::prototype()),
            "quality" => Some(Self::quality()),
            _ => None,
        }
    }

    /// All named chains
    pub fn all() -> Vec<Self> {
        vec![Self::standard(), Self::minimal(), Self::prototype(), Self::quality()]
    }

    /// Whether a worker participates in this chain
    pub fn contains(&self, worker: &str) -> bool {
        self.agents.iter().any(|a| a == worker)
    }

    /// The entry node of the chain
    pub fn source_node(&self) -> Option<&str> {
        self.agents.first().map(String::as_str)
    }

    /// Display summary
    pub fn info(&self) -> ChainInfo {
        ChainInfo {
            name: self.name.clone(),
            description: self.description.clone(),
            agent_count: self.agents.len(),
            flow: self.agents.join(" -> "),
            max_stalls: self.max_stalls,
            max_retries: self.max_retries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_chains_frozen_contents() {
        let standard = ChainConfig::standard();
        assert_eq!(standard.agents.len(), 7);
        assert_eq!(standard.max_stalls, 3);
        assert_eq!(standard.max_retries, 2);

        let minimal = ChainConfig::minimal();
        assert_eq!(
            minimal.agents,
            vec![PLANNER, WRITER, TEST_GEN, TEST_RUNNER]
        );
        assert_eq!(minimal.max_stalls, 2);
        assert_eq!(minimal.max_retries, 1);

        let prototype = ChainConfig::prototype();
        assert_eq!(prototype.agents, vec![PLANNER, WRITER]);
        assert_eq!(prototype.max_stalls, 1);

        let quality = ChainConfig::quality();
        assert_eq!(quality.agents, vec![WRITER, TEST_RUNNER, SCANNER]);
        assert!(!quality.contains(PLANNER));
    }

    #[test]
    fn test_get_by_name() {
        assert!(ChainConfig::get("standard").is_some());
        assert!(ChainConfig::get("nonexistent").is_none());
        assert_eq!(ChainConfig::all().len(), 4);
    }

    #[test]
    fn test_source_node() {
        assert_eq!(ChainConfig::standard().source_node(), Some(PLANNER));
        assert_eq!(ChainConfig::quality().source_node(), Some(WRITER));
    }

    #[test]
    fn test_dependency_edges() {
        let standard = ChainConfig::standard();
        assert_eq!(standard.dependencies[REFACTOR], vec![TEST_RUNNER]);
        assert_eq!(standard.dependencies[SCANNER], vec![TEST_RUNNER, REFACTOR]);
        assert!(!standard.dependencies.contains_key(PLANNER));
    }

    #[test]
    fn test_info_flow_string() {
        let info = ChainConfig::prototype().info();
        assert_eq!(info.flow, "planner -> writer");
        assert_eq!(info.agent_count, 2);
    }
}
