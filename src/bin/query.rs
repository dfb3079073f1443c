use anyhow::Result;
use clap::{Parser, Subcommand};
use facilitator_sync::config::Config;
use facilitator_sync::query::commands::{EventQuery, cmd_events, cmd_stats, cmd_watermarks};
use facilitator_sync::query::formatters::OutputFormat;
use facilitator_sync::repository::{Database, TransferEventRepository};

#[derive(Parser)]
#[command(name = "query")]
#[command(about = "Query synced facilitator transfer events", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "table")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Events {
        #[arg(long)]
        chain: Option<String>,

        #[arg(long)]
        facilitator: Option<String>,

        /// Facilitator address that submitted the transaction.
        #[arg(long)]
        from: Option<String>,

        #[arg(long)]
        to: Option<String>,

        #[arg(long)]
        since: Option<String>,

        #[arg(long)]
        until: Option<String>,

        #[arg(long, default_value = "100")]
        limit: usize,

        #[arg(long, default_value = "0")]
        offset: usize,
    },
    Stats {
        #[arg(long)]
        chain: Option<String>,
    },
    Watermarks,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let format = OutputFormat::from(cli.format.as_str());

    let config = Config::from_env()?;

    let db = Database::new(&config.database_url)?;
    let conn = db.lock()?;
    let repo = TransferEventRepository::new(&conn);

    match cli.command {
        Commands::Events {
            chain,
            facilitator,
            from,
            to,
            since,
            until,
            limit,
            offset,
        } => {
            let query = EventQuery {
                chain,
                facilitator,
                from,
                to,
                since,
                until,
                limit,
                offset,
            };
            cmd_events(&repo, query, &format)?;
        }
        Commands::Stats { chain } => {
            cmd_stats(&repo, chain.as_deref(), &format)?;
        }
        Commands::Watermarks => {
            cmd_watermarks(&repo, &format)?;
        }
    }

    Ok(())
}
