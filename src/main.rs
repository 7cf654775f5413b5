use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tml_tools::client::{DirectoryTarget, RestTarget, TargetClient};
use tml_tools::config::{ExistingPolicy, MigrationConfig};
use tml_tools::deploy::{self, CancelHandle};
use tml_tools::error::ErrorClass;
use tml_tools::migrate;
use tml_tools::plan::DeploymentPlan;
use tml_tools::report::MigrationReport;
use tml_tools::{Result, ToolError};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error}");
            match error.class() {
                ErrorClass::Input | ErrorClass::Graph => ExitCode::from(2),
                ErrorClass::Environment => ExitCode::FAILURE,
            }
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    init_logging()?;
    match cli.command {
        Command::Migrate(args) => execute_migrate(args).await,
        Command::Plan(args) => execute_plan(args),
        Command::MappingDetails(args) => execute_mapping_details(args),
    }
}

fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| ToolError::Logging(err.to_string()))
}

async fn execute_migrate(args: MigrateArgs) -> Result<ExitCode> {
    let config = args.resolve_config()?;
    let client = args.target_client(&config)?;

    let (handle, signal) = deploy::cancellation();
    tokio::spawn(cancel_on_interrupt(handle));

    let run = migrate::migrate_directory(
        &args.env.path,
        &args.env.source,
        &args.env.dest,
        client.as_ref(),
        &config,
        &signal,
    )
    .await?;
    let execution = &run.execution;

    print_report(&execution.report);
    if let Some(path) = &args.report {
        migrate::write_report(path, &execution.report)?;
    }
    if let Err(error) = run.mapping_saved {
        eprintln!("identifier mapping was not saved; entries of this run:");
        eprintln!("{}", serde_json::to_string_pretty(&execution.mapping)?);
        return Err(error);
    }

    if execution.report.has_failures() || execution.report.cancelled {
        Ok(ExitCode::from(3))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn execute_plan(args: EnvironmentArgs) -> Result<ExitCode> {
    let plan = migrate::plan_directory(&args.path, &args.source, &args.dest)?;
    print_plan(&plan);
    Ok(ExitCode::SUCCESS)
}

fn execute_mapping_details(args: EnvironmentArgs) -> Result<ExitCode> {
    let (details, path) = migrate::mapping_details(&args.path, &args.source, &args.dest)?;
    println!("Mappings from {} to {}", args.source, args.dest);
    println!(
        "{:<20} {:<36} {:<36} {:<15}",
        "Name",
        format!("{} GUID", args.source),
        format!("{} GUID", args.dest),
        "Type"
    );
    for detail in &details {
        println!(
            "{:<20} {:<36} {:<36} {:<15}",
            detail.name, detail.source_guid, detail.destination_guid, detail.kind
        );
    }
    println!("details written to {}", path.display());
    Ok(ExitCode::SUCCESS)
}

async fn cancel_on_interrupt(handle: CancelHandle) {
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupt received, stopping after the current batch");
        handle.cancel();
    }
}

fn print_plan(plan: &DeploymentPlan) {
    for batch in &plan.batches {
        println!("batch {}", batch.index);
        for object in &batch.objects {
            println!("  {:<10} {:<36} {}", object.kind(), object.identifier(), object.name());
        }
    }
    println!(
        "{} objects in {} batches",
        plan.object_count(),
        plan.batches.len()
    );
}

fn print_report(report: &MigrationReport) {
    for entry in &report.entries {
        println!(
            "{:<5} {:<10} {:<36} {:<30} {}",
            entry.batch, entry.kind, entry.identifier, entry.name, entry.outcome
        );
    }
    let summary = report.summary();
    println!(
        "deployed: {}, skipped: {}, failed: {}{}",
        summary.deployed,
        summary.skipped,
        summary.failed,
        if report.cancelled { " (cancelled)" } else { "" }
    );
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Migrate TML content between platform environments."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Deploy a TML directory into the destination environment.
    Migrate(MigrateArgs),
    /// Show the deployment batches for a TML directory without deploying.
    Plan(EnvironmentArgs),
    /// Export the stored GUID mapping with names and types.
    MappingDetails(EnvironmentArgs),
}

#[derive(clap::Args)]
struct EnvironmentArgs {
    /// Root folder of the TML file system.
    #[arg(long)]
    path: PathBuf,

    /// Name of the environment the TML came from.
    #[arg(long)]
    source: String,

    /// Name of the environment the TML is deployed into.
    #[arg(long)]
    dest: String,
}

#[derive(clap::Args)]
struct MigrateArgs {
    #[command(flatten)]
    env: EnvironmentArgs,

    /// TOML file with migration settings.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stage deploy-ready TML in this directory instead of calling the platform.
    #[arg(long, conflicts_with = "url", required_unless_present = "url")]
    target_dir: Option<PathBuf>,

    /// Base URL of the destination platform.
    #[arg(long)]
    url: Option<String>,

    /// Tag assigned to every imported object; repeat for several tags.
    #[arg(long = "tag", requires = "url")]
    tags: Vec<String>,

    /// Bearer token for the destination platform.
    #[arg(long, env = "TML_TOOLS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Maximum concurrent deployments per batch.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Treatment of objects already present in the destination.
    #[arg(long, value_enum)]
    existing: Option<ExistingArg>,

    /// Attempts per object before a transport failure is final.
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Write the migration report as JSON to this file.
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ExistingArg {
    Skip,
    Overwrite,
}

impl From<ExistingArg> for ExistingPolicy {
    fn from(arg: ExistingArg) -> Self {
        match arg {
            ExistingArg::Skip => ExistingPolicy::Skip,
            ExistingArg::Overwrite => ExistingPolicy::Overwrite,
        }
    }
}

impl MigrateArgs {
    fn resolve_config(&self) -> Result<MigrationConfig> {
        let mut config = match &self.config {
            Some(path) => MigrationConfig::from_toml_file(path)?,
            None => MigrationConfig::default(),
        };
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(existing) = self.existing {
            config.existing = existing.into();
        }
        if let Some(max_attempts) = self.max_attempts {
            config.retry.max_attempts = max_attempts;
        }
        config.validate()?;
        Ok(config)
    }

    fn target_client(&self, config: &MigrationConfig) -> Result<Box<dyn TargetClient>> {
        match (&self.url, &self.token, &self.target_dir) {
            (Some(url), Some(token), _) => Ok(Box::new(
                RestTarget::new(url, token.clone(), config.call_timeout())?
                    .with_tags(self.tags.clone()),
            )),
            (Some(_), None, _) => Err(ToolError::InvalidConfig(
                "--url needs a token (--token or TML_TOOLS_TOKEN)".into(),
            )),
            (None, _, Some(dir)) => {
                migrate::ensure_outside_source(&self.env.path, dir)?;
                Ok(Box::new(DirectoryTarget::new(dir, self.env.dest.clone())))
            }
            (None, _, None) => Err(ToolError::InvalidConfig(
                "either --target-dir or --url is required".into(),
            )),
        }
    }
}
