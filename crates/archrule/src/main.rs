use anyhow::Result;
use archrule_common::{logger, AppConfig};
use archrule_vector::{GuidanceSearchEngine, ScoredGuidance};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::warn;

/// Find project root by looking for .git directory
fn find_project_root() -> Option<PathBuf> {
    let mut current_dir = std::env::current_dir().ok()?;

    loop {
        if current_dir.join(".git").exists() {
            return Some(current_dir);
        }

        if !current_dir.pop() {
            break;
        }
    }

    None
}

/// Load .env file from project root
fn load_dotenv_from_project_root() {
    if let Some(root) = find_project_root() {
        let env_path = root.join(".env");
        if env_path.exists() {
            dotenv::from_path(&env_path).ok();
        }
    } else {
        dotenv::dotenv().ok();
    }
}

#[derive(Parser)]
#[command(name = "archrule")]
#[command(about = "ArchRule - semantic search over architectural guidance", long_about = None)]
struct Cli {
    /// Embedding backend: auto, openai, ollama or local
    #[arg(long, global = true)]
    backend: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find guidance relevant to a query
    Search {
        query: String,

        /// Project scope; global guidance is always included
        #[arg(long)]
        scope: Option<String>,

        /// Maximum number of results
        #[arg(long)]
        limit: Option<usize>,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show embedding backend and store status
    Status {
        #[arg(long)]
        json: bool,
    },
}

fn print_results(results: &[ScoredGuidance]) {
    if results.is_empty() {
        println!("No relevant guidance found.");
        return;
    }

    for (rank, hit) in results.iter().enumerate() {
        println!(
            "{}. [{}] {} ({:.3})",
            rank + 1,
            hit.rule_id,
            hit.title,
            hit.similarity
        );
        if !hit.category.is_empty() || !hit.priority.is_empty() {
            println!("   {} / {}", hit.category, hit.priority);
        }
        println!("   {}", hit.guidance);
        if let Some(rationale) = hit.rationale.as_deref().filter(|r| !r.is_empty()) {
            println!("   Why: {}", rationale);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    load_dotenv_from_project_root();

    if let Some(backend) = &cli.backend {
        std::env::set_var("ARCHRULE_EMBEDDING_BACKEND", backend);
    }

    let config = AppConfig::from_env()?;
    logger::setup_logging(&config.log_dir, &config.log_level)?;

    let engine = GuidanceSearchEngine::from_config(&config)?;

    match cli.command {
        Commands::Search {
            query,
            scope,
            limit,
            json,
        } => {
            let limit = limit.unwrap_or(config.search.default_limit);
            let report = engine.search_detailed(&query, scope.as_deref(), limit).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                if let Some(reason) = &report.degraded {
                    warn!("Search degraded at {:?}: {}", report.stage, reason);
                }
                print_results(&report.results);
            }
        }
        Commands::Status { json } => {
            let health = engine.health_check().await;

            if json {
                println!("{}", serde_json::to_string_pretty(&health)?);
            } else {
                let provider = &health.embedding;
                println!("Status:     {}", health.status);
                println!(
                    "Embedding:  {} (mode {}, {} dims)",
                    provider
                        .backend
                        .map(|b| format!("{} / {}", b, provider.model.as_deref().unwrap_or("-")))
                        .unwrap_or_else(|| "unavailable".to_string()),
                    provider.mode,
                    provider.dimensions
                );
                match (&health.records, &health.store_error) {
                    (Some(count), _) => println!("Store:      {} ({} records)", health.store, count),
                    (None, Some(e)) => println!("Store:      {} ({})", health.store, e),
                    (None, None) => println!("Store:      {}", health.store),
                }
            }
        }
    }

    engine.shutdown().await;
    Ok(())
}
