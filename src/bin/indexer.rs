use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use facilitator_sync::{ConfigError, SyncError};
use facilitator_sync::config::{Config, JobConfig, SyncFile};
use facilitator_sync::facilitators::FacilitatorRegistry;
use facilitator_sync::provider::HttpTransport;
use facilitator_sync::repository::Database;
use facilitator_sync::sync::SyncJob;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Sync facilitator transfer events from indexing providers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one configured job to completion.
    Run { job: String },
    /// Run every configured job concurrently.
    RunAll,
    /// Print configured jobs and their schedules.
    List,
}

async fn run_job(job: SyncJob) -> Result<()> {
    let name = job.config().name.clone();
    let max_duration = job.config().max_duration;

    match tokio::time::timeout(max_duration, job.run()).await {
        Ok(Ok(summary)) => {
            info!(
                job = %name,
                addresses = summary.synced.len(),
                fetched = summary.total_fetched(),
                saved = summary.total_saved(),
                skipped = summary.skipped,
                "job completed"
            );
            Ok(())
        }
        Ok(Err(SyncError::PartialFailure(summary))) => {
            for failure in &summary.failures {
                warn!(
                    job = %name,
                    facilitator = %failure.facilitator_id,
                    address = %failure.address,
                    error = %failure.error,
                    "address failed"
                );
            }
            bail!(
                "job {name}: {} of {} addresses failed",
                summary.failures.len(),
                summary.failures.len() + summary.synced.len()
            )
        }
        Ok(Err(e)) => Err(e).with_context(|| format!("job {name} failed")),
        Err(_) => bail!("job {name} exceeded its max duration of {max_duration:?}"),
    }
}

fn build_job(
    config: &Config,
    job: JobConfig,
    registry: &Arc<FacilitatorRegistry>,
    db: &Database,
) -> Result<SyncJob> {
    let transport = HttpTransport::for_provider(config, job.provider)
        .with_context(|| format!("job {}", job.name))?;
    Ok(SyncJob::new(
        job,
        Arc::clone(registry),
        Arc::new(transport),
        db.clone(),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = Config::from_env()?;
    let sync_file = SyncFile::load(&config.sync_config_path)?;
    let registry = Arc::new(sync_file.registry()?);
    let jobs = sync_file.jobs(&registry)?;
    info!(
        path = %config.sync_config_path,
        facilitators = registry.all().len(),
        jobs = jobs.len(),
        "configuration loaded"
    );

    match cli.command {
        Commands::List => {
            for job in &jobs {
                println!(
                    "{:<24} {:<10} {:<9} {:<16} max {}s",
                    job.name,
                    job.chain.as_str(),
                    job.provider.as_str(),
                    job.cron,
                    job.max_duration.as_secs()
                );
            }
            Ok(())
        }
        Commands::Run { job } => {
            let Some(job) = jobs.into_iter().find(|j| j.name == job) else {
                return Err(ConfigError::UnknownJob(job).into());
            };
            let db = Database::new(&config.database_url)?;
            let job = build_job(&config, job, &registry, &db)?;
            run_job(job).await
        }
        Commands::RunAll => {
            let db = Database::new(&config.database_url)?;
            let mut runs = Vec::with_capacity(jobs.len());
            for job in jobs {
                runs.push(run_job(build_job(&config, job, &registry, &db)?));
            }

            let results = futures::future::join_all(runs).await;
            let failed = results.iter().filter(|r| r.is_err()).count();
            for e in results.into_iter().filter_map(Result::err) {
                error!("{e:#}");
            }
            if failed > 0 {
                bail!("{failed} job(s) failed");
            }
            Ok(())
        }
    }
}
