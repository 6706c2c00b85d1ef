//! agentchain CLI entry point

use std::sync::Arc;

use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use tracing::info;

use agentchain::chain::ChainConfig;
use agentchain::cli::{Cli, Command};
use agentchain::config::Config;
use agentchain::driver::{Orchestrator, RunEvent};
use agentchain::memory::MemorySystem;
use agentchain::worker::standard_roster;

fn setup_logging(verbose: bool) {
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Run { task, chain, base_dir } => {
            let chain_name = chain.unwrap_or_else(|| config.orchestrator.default_chain.clone());
            let chain = ChainConfig::get(&chain_name)
                .ok_or_else(|| eyre!("unknown chain '{}'; available: standard, minimal, prototype, quality", chain_name))?;
            let base_dir = base_dir.unwrap_or_else(|| config.orchestrator.base_dir.clone());

            info!(chain = %chain.name, base_dir = %base_dir.display(), "starting workflow");

            let llm = agentchain::llm::create_client(&config.llm).context("Failed to create LLM client")?;
            let workers = standard_roster(&chain, Arc::clone(&llm));
            let memory = Arc::new(MemorySystem::new(config.orchestrator.memory_dir.clone()));

            let (event_tx, mut event_rx) = tokio::sync::mpsc::channel(32);
            let printer = tokio::spawn(async move {
                while let Some(event) = event_rx.recv().await {
                    match event {
                        RunEvent::RoundCompleted { worker, success, round } => {
                            let mark = if success { "✓".green() } else { "✗".red() };
                            println!("{} round {}: {} execution completed", mark, round, worker.cyan());
                        }
                        RunEvent::Replanned => {
                            println!("{} stall budget exhausted, replanned the task", "↻".yellow());
                        }
                        RunEvent::Finished(_) => break,
                    }
                }
            });

            let orchestrator = Orchestrator::new(chain, workers, llm, memory, base_dir)?
                .with_events(event_tx)
                .with_max_rounds(config.orchestrator.max_rounds);

            let summary = orchestrator.run(&task).await?;
            let _ = printer.await;

            println!();
            println!("Rounds: {}", summary.total_rounds);
            println!(
                "Workers completed: {}/{} (success rate {:.0}%)",
                summary.completed_agents,
                summary.total_agents,
                summary.success_rate * 100.0
            );
            if !summary.completed.is_empty() {
                println!("{} {}", "completed:".green(), summary.completed.join(", "));
            }
            if !summary.failed.is_empty() {
                println!("{} {}", "failed:".red(), summary.failed.join(", "));
            }
            if !summary.failed_paths.is_empty() {
                println!("{} {}", "abandoned paths:".yellow(), summary.failed_paths.join(", "));
            }
        }
        Command::Chains => {
            for chain in ChainConfig::all() {
                let info = chain.info();
                println!("{}", info.name.to_uppercase().bold());
                println!("  {}", info.description);
                println!("  workers ({}): {}", info.agent_count, info.flow.cyan());
                println!("  max stalls: {}, max retries: {}", info.max_stalls, info.max_retries);
                println!();
            }
        }
        Command::Memory {
            query,
            agent,
            success_only,
            stats,
            limit,
        } => {
            let memory = MemorySystem::new(config.orchestrator.memory_dir.clone());
            memory.initialize().await;

            if stats {
                let statistics = memory.exec_log.statistics().await;
                println!("Records: {}", statistics.total);
                println!(
                    "Success: {} / Failure: {} (rate {:.0}%)",
                    statistics.success_count,
                    statistics.failure_count,
                    statistics.success_rate * 100.0
                );
                for (agent, bucket) in &statistics.per_agent {
                    println!("  {}: {} total, {} failed", agent.cyan(), bucket.total, bucket.failure);
                }
            } else {
                let hits = memory
                    .exec_log
                    .get_similar_executions(query.as_deref().unwrap_or(""), agent.as_deref(), success_only, limit)
                    .await;
                for hit in hits {
                    let first_line = hit.content.lines().next().unwrap_or_default();
                    println!(
                        "{} {} {}",
                        hit.id.yellow(),
                        format!("(similarity {:.2})", hit.similarity()).dimmed(),
                        first_line
                    );
                }
            }

            memory.close().await;
        }
    }

    Ok(())
}
