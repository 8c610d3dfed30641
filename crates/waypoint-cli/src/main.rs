//! Waypoint CLI - inspect guideline batching and relationship resolution

mod fixture;

use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use waypoint_core::config::Config;
use waypoint_core::guidelines::Guideline;
use waypoint_core::matching::{
    GuidelineCategory, OptimizationPolicy, categorize, disambiguation_targets, partition,
};
use waypoint_core::relational::RelationalGuidelineResolver;

use fixture::Fixture;

#[derive(Parser)]
#[command(name = "waypoint")]
#[command(author, version, about = "Guideline matching engine tools", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Categorize and batch the guidelines of a fixture without calling the oracle
    Plan {
        /// Fixture file (JSON)
        fixture: PathBuf,
    },

    /// Apply relationship resolution to the matches of a fixture
    Resolve {
        /// Fixture file (JSON)
        fixture: PathBuf,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("waypoint=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Plan { fixture } => cmd_plan(&fixture, cli.format).await,
        Commands::Resolve { fixture } => cmd_resolve(&fixture, cli.format).await,
        Commands::Config { action } => cmd_config(action, cli.quiet),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn cmd_plan(path: &Path, format: OutputFormat) -> anyhow::Result<()> {
    let config = Config::load()?;
    let policy = config.optimization_policy();

    let fixture = Fixture::load(path)?;
    let guidelines = fixture.guidelines()?;
    let store = fixture.relationship_store().await?;

    let targets = disambiguation_targets(&store, &guidelines).await?;
    let categorized = categorize(&guidelines, &fixture.applied(), &targets);

    let buckets: [(GuidelineCategory, &[Guideline]); 5] = [
        (GuidelineCategory::Observational, categorized.observational.as_slice()),
        (GuidelineCategory::PreviouslyApplied, categorized.previously_applied.as_slice()),
        (
            GuidelineCategory::PreviouslyAppliedCustomerDependent,
            categorized.previously_applied_customer_dependent.as_slice(),
        ),
        (GuidelineCategory::Actionable, categorized.actionable.as_slice()),
        (GuidelineCategory::Continuous, categorized.continuous.as_slice()),
    ];

    let planned: Vec<(GuidelineCategory, Vec<Vec<Guideline>>)> = buckets
        .into_iter()
        .map(|(category, bucket)| {
            let count = policy.guideline_matching_batch_count(bucket.len());
            (category, partition(bucket, count))
        })
        .collect();

    let total_batches = planned.iter().map(|(_, chunks)| chunks.len()).sum::<usize>()
        + categorized.disambiguation_groups.len();
    debug!(
        guidelines = guidelines.len(),
        batches = total_batches,
        "Plan computed"
    );

    match format {
        OutputFormat::Json => {
            let buckets: Vec<_> = planned
                .iter()
                .map(|(category, chunks)| {
                    json!({
                        "category": category.as_str(),
                        "batches": chunks
                            .iter()
                            .map(|chunk| chunk.iter().map(|g| g.id.as_str()).collect::<Vec<_>>())
                            .collect::<Vec<_>>(),
                    })
                })
                .collect();
            let groups: Vec<_> = categorized
                .disambiguation_groups
                .iter()
                .map(|group| {
                    json!({
                        "head": group.head.id.as_str(),
                        "targets": group.targets.iter().map(|g| g.id.as_str()).collect::<Vec<_>>(),
                    })
                })
                .collect();
            let output = json!({
                "buckets": buckets,
                "disambiguation_groups": groups,
                "total_batches": total_batches,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            println!("Matching plan ({} guidelines)", guidelines.len());
            println!("==========================");
            for (category, chunks) in &planned {
                if chunks.is_empty() {
                    continue;
                }
                let sizes: Vec<String> = chunks.iter().map(|c| c.len().to_string()).collect();
                println!(
                    "{}: {} batch(es) [{}]",
                    category,
                    chunks.len(),
                    sizes.join(", ")
                );
            }
            for group in &categorized.disambiguation_groups {
                let targets: Vec<&str> = group.targets.iter().map(|g| g.id.as_str()).collect();
                println!(
                    "{}: {} -> {}",
                    GuidelineCategory::Disambiguation,
                    group.head.id,
                    targets.join(", ")
                );
            }
            println!();
            println!("Total batches: {}", total_batches);
        }
    }

    Ok(())
}

async fn cmd_resolve(path: &Path, format: OutputFormat) -> anyhow::Result<()> {
    let fixture = Fixture::load(path)?;
    let guidelines = fixture.guidelines()?;
    let matches = fixture.matches(&guidelines)?;
    let store = fixture.relationship_store().await?;

    let resolver = RelationalGuidelineResolver::new(Arc::new(store));
    let resolved = resolver.resolve(&guidelines, matches).await?;

    match format {
        OutputFormat::Json => {
            let output: Vec<_> = resolved
                .iter()
                .map(|m| {
                    json!({
                        "guideline_id": m.guideline_id().as_str(),
                        "score": m.score,
                        "rationale": m.rationale,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            if resolved.is_empty() {
                println!("No matches remain.");
            }
            for m in &resolved {
                println!("{} (score {}): {}", m.guideline_id(), m.score, m.rationale);
            }
        }
    }

    Ok(())
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            for (key, value) in config.list()? {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}
