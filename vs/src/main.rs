use std::io::Read;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tracing::info;

use vectorstore::cli::{Cli, Command};
use vectorstore::config::Config;
use vectorstore::{MIME_TEXT, MetaValue, Metadata, VectorStore};

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()),
        )
        .init();
}

fn parse_meta(entries: &[String]) -> Metadata {
    entries
        .iter()
        .filter_map(|entry| {
            entry
                .split_once('=')
                .map(|(k, v)| (k.to_string(), MetaValue::Str(v.to_string())))
        })
        .collect()
}

fn main() -> Result<()> {
    setup_logging();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!(store = %config.store_path.display(), "vectorstore starting");

    match cli.command {
        Command::Add { content, meta } => {
            let content = match content {
                Some(c) => c,
                None => {
                    let mut buf = String::new();
                    std::io::stdin().read_to_string(&mut buf).context("Failed to read stdin")?;
                    buf
                }
            };

            let mut store = VectorStore::open(&config.store_path)?;
            let id = store.add(&content, MIME_TEXT, parse_meta(&meta))?;
            println!("{} Added record: {}", "✓".green(), id.cyan());
        }
        Command::Query { text, top_k } => {
            let store = VectorStore::open(&config.store_path)?;
            for hit in store.query(&text, top_k) {
                println!(
                    "{} {} {}",
                    hit.id.yellow(),
                    format!("(similarity {:.2})", hit.similarity()).dimmed(),
                    preview(&hit.content)
                );
            }
        }
        Command::List { limit } => {
            let store = VectorStore::open(&config.store_path)?;
            for record in store.records().iter().rev().take(limit) {
                println!("{} {} {}", record.id.yellow(), record.created_at.dimmed(), preview(&record.content));
            }
        }
        Command::Stats => {
            let store = VectorStore::open(&config.store_path)?;
            let stats = store.stats();
            println!("Records: {}", stats.record_count);
            println!("Content bytes: {}", stats.total_bytes);
        }
        Command::Delete { id } => {
            let mut store = VectorStore::open(&config.store_path)?;
            if store.delete(&id)? {
                println!("{} Deleted record: {}", "✓".green(), id.cyan());
            } else {
                println!("{} No record with id: {}", "✗".red(), id);
            }
        }
        Command::Clear => {
            let mut store = VectorStore::open(&config.store_path)?;
            store.clear()?;
            println!("{} Store cleared", "✓".green());
        }
    }

    Ok(())
}

fn preview(content: &str) -> String {
    let flat = content.replace('\n', " ");
    if flat.chars().count() > 80 {
        format!("{}...", flat.chars().take(80).collect::<String>())
    } else {
        flat
    }
}
