//! specfab - evidence-gated product spec runner
//!
//! `specfab run` replays a captured fixture through the round orchestrator and
//! prints the resulting product record as JSON. `specfab check-rules` compiles
//! a rule table and reports what is wrong with it.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use specfab_common::config::{ConfigResolver, TomlConfig};
use specfab_common::events::EventBus;
use specfab_common::logging::init_tracing;
use specfab_core::normalize::ComponentDb;
use specfab_core::orchestrator::InMemoryFrontier;
use specfab_core::replay::Fixture;
use specfab_core::rules::load_rule_table;
use specfab_core::{OrchestratorSettings, RoundOrchestrator};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "specfab", version, about = "Evidence-gated product spec pipeline")]
struct Cli {
    /// Configuration file (overrides SPECFAB_CONFIG and the default locations)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a fixture through the orchestrator and print the product record
    Run {
        /// Fixture JSON (product, sources, scripted responses)
        fixture: PathBuf,

        /// Rule table JSON (defaults to `rules_path` from the config)
        #[arg(long)]
        rules: Option<PathBuf>,

        /// Component database JSON (defaults to `components_path` from the config)
        #[arg(long)]
        components: Option<PathBuf>,
    },

    /// Compile a rule table and report errors
    CheckRules {
        /// Rule table JSON
        rules: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, source) = ConfigResolver::default()
        .resolve(cli.config.as_deref())
        .context("Failed to load configuration")?;
    init_tracing(&config.logging).context("Failed to initialize logging")?;

    info!("Starting specfab v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration: {:?}", source);

    match cli.command {
        Command::Run {
            fixture,
            rules,
            components,
        } => run(&config, &fixture, rules, components).await,
        Command::CheckRules { rules } => check_rules(&rules),
    }
}

async fn run(
    config: &TomlConfig,
    fixture_path: &Path,
    rules: Option<PathBuf>,
    components: Option<PathBuf>,
) -> Result<()> {
    let rules_path = rules
        .or_else(|| config.rules_path.clone())
        .context("No rule table given (use --rules or set rules_path)")?;
    let table = load_rule_table(&rules_path)
        .with_context(|| format!("Failed to load rule table {}", rules_path.display()))?;
    info!(
        "Rule table: {} v{} ({} fields)",
        table.category,
        table.version.as_deref().unwrap_or("-"),
        table.len()
    );

    let component_db = match components.or_else(|| config.components_path.clone()) {
        Some(path) => ComponentDb::load(&path)
            .with_context(|| format!("Failed to load component database {}", path.display()))?,
        None => ComponentDb::new(),
    };

    let fixture = Fixture::load(fixture_path)
        .with_context(|| format!("Failed to load fixture {}", fixture_path.display()))?;
    let (request, fetcher, identity) = fixture.into_parts();

    let settings = OrchestratorSettings::from_config(config);
    let orchestrator = RoundOrchestrator::new(
        Arc::new(table),
        Arc::new(component_db),
        Arc::new(fetcher),
        EventBus::default(),
        settings,
    )
    .with_identity(Arc::new(identity))
    .with_frontier(Arc::new(InMemoryFrontier::new(chrono::Duration::zero())));

    let (_, record) = orchestrator.run(request).await?;
    println!("{}", record.to_json_pretty()?);
    Ok(())
}

fn check_rules(path: &Path) -> Result<()> {
    match load_rule_table(path) {
        Ok(table) => {
            println!(
                "{}: category '{}' v{}, {} field(s), {} cross rule(s)",
                path.display(),
                table.category,
                table.version.as_deref().unwrap_or("-"),
                table.len(),
                table.cross_rules().len()
            );
            println!("validation order: {}", table.field_order().join(", "));
            Ok(())
        }
        Err(e) => {
            eprintln!("{}: {}", path.display(), e);
            Err(e.into())
        }
    }
}
