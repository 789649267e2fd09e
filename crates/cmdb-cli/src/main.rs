use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Debug, Parser)]
#[command(name = "cmdb")]
#[command(about = "Commodity market data dispatcher")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the scheduling daemon in the foreground
    Start,
    /// Run a single job on demand; exits non-zero unless the job succeeds
    Run {
        /// Name of the configured job to run
        job: String,
    },
    /// List the jobs due today
    Today {
        /// Execute the due jobs with the retry policy instead of listing them
        #[arg(long)]
        execute: bool,
    },
    /// Print the freshness view: last success and overdue-ness per job
    Status,
    /// Print all configured jobs and whether they are schedulable
    List,
    /// Print the resolved fire calendar for the coming week
    Schedule,
    /// Apply pending database migrations
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = cmdb_core::load_app_config()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Start => commands::start(&config).await,
        Commands::Run { job } => commands::run(&config, &job).await,
        Commands::Today { execute } => commands::today(&config, execute).await,
        Commands::Status => commands::status(&config).await,
        Commands::List => commands::list(&config),
        Commands::Schedule => commands::schedule(&config),
        Commands::Migrate => commands::migrate(&config).await,
    }
}
