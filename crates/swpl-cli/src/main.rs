use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use swpl_sync::{GroupFailurePolicy, SyncConfig, SyncPipeline};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "swpl-cli")]
#[command(about = "Load SWAPI people into Postgres")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch the configured id range and persist every person
    Sync(SyncArgs),
    /// Create the people table if it does not exist
    Migrate,
}

#[derive(Debug, Default, Args)]
struct SyncArgs {
    /// First person id to fetch
    #[arg(long)]
    start: Option<u32>,
    /// Stop before this id
    #[arg(long)]
    end: Option<u32>,
    /// Ids fetched concurrently per group
    #[arg(long)]
    group_size: Option<usize>,
    /// Records per insert transaction
    #[arg(long)]
    batch_size: Option<usize>,
    /// Drop a failed fetch group instead of aborting the run
    #[arg(long)]
    skip_failed_groups: bool,
    /// Fetch everything but keep rows in memory instead of Postgres
    #[arg(long)]
    dry_run: bool,
}

impl SyncArgs {
    fn apply(&self, config: &mut SyncConfig) {
        if let Some(start) = self.start {
            config.id_range.start = start;
        }
        if let Some(end) = self.end {
            config.id_range.end = end;
        }
        if let Some(group_size) = self.group_size {
            config.fetch_group_size = group_size;
        }
        if let Some(batch_size) = self.batch_size {
            config.insert_batch_size = batch_size;
        }
        if self.skip_failed_groups {
            config.group_failure = GroupFailurePolicy::SkipGroup;
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();
    let mut config = SyncConfig::from_env()?;

    match cli.command.unwrap_or(Commands::Sync(SyncArgs::default())) {
        Commands::Sync(args) => {
            args.apply(&mut config);
            let pipeline = if args.dry_run {
                SyncPipeline::dry_run(config)?
            } else {
                SyncPipeline::connect(config).await?
            };
            let summary = pipeline.run_once().await?;
            println!(
                "sync complete: run_id={} range={} fetched={} batches={} persisted={}",
                summary.run_id,
                summary.id_range,
                summary.fetched_records,
                summary.scheduled_batches,
                summary.persisted_rows
            );
            println!("{:?}", summary.elapsed());
        }
        Commands::Migrate => {
            swpl_sync::migrate(&config).await?;
            info!("people table ready");
        }
    }

    Ok(())
}
