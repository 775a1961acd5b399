use std::sync::Arc;

use acfy_sync::{
    open_database, AppConfig, Collaborators, ReconcileReport, SyncPipeline, WorkflowReport,
};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "acfy-cli")]
#[command(about = "AutoContentify command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// One full pipeline run (default).
    Sync,
    /// Create the local schema.
    Migrate,
    #[command(subcommand)]
    Keywords(KeywordCommands),
    #[command(subcommand)]
    Blogs(BlogCommands),
    #[command(subcommand)]
    Products(ProductCommands),
    #[command(subcommand)]
    Ads(AdCommands),
    /// Serve the status endpoints.
    Serve,
    /// Run the pipeline on the configured cron expressions until interrupted.
    Schedule,
}

#[derive(Debug, Subcommand)]
enum KeywordCommands {
    Discover {
        /// Extra seed keyword; repeatable.
        #[arg(long = "seed")]
        seeds: Vec<String>,
    },
    Refresh,
}

#[derive(Debug, Subcommand)]
enum BlogCommands {
    Pull,
    Push,
    Generate,
}

#[derive(Debug, Subcommand)]
enum ProductCommands {
    Pull,
    Delete { remote_id: i64 },
}

#[derive(Debug, Subcommand)]
enum AdCommands {
    Create,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let summary = build_pipeline(config).await?.run_once().await?;
            let failed = summary
                .jobs
                .iter()
                .filter(|j| j.status == acfy_sync::JobStatus::Failed)
                .count();
            println!(
                "sync complete: run_id={} jobs={} failed={} aborted={} reports={}",
                summary.run_id,
                summary.jobs.len(),
                failed,
                summary.aborted,
                summary.reports_dir
            );
        }
        Commands::Migrate => {
            open_database(&config).await?;
            println!("schema ready: {}", config.database_url);
        }
        Commands::Keywords(cmd) => {
            let pipeline = build_pipeline(config).await?;
            let report = match cmd {
                KeywordCommands::Discover { seeds } => pipeline.discover_keywords(&seeds).await?,
                KeywordCommands::Refresh => pipeline.refresh_keyword_metrics().await?,
            };
            print_report("keywords", &report);
        }
        Commands::Blogs(cmd) => {
            let pipeline = build_pipeline(config).await?;
            match cmd {
                BlogCommands::Pull => print_report("blogs pull", &pipeline.pull_blogs().await?),
                BlogCommands::Push => print_report("blogs push", &pipeline.push_blogs().await?),
                BlogCommands::Generate => {
                    print_workflow(&pipeline.generate_blogs(Uuid::new_v4()).await?)
                }
            }
        }
        Commands::Products(cmd) => {
            let pipeline = build_pipeline(config).await?;
            match cmd {
                ProductCommands::Pull => {
                    print_report("products pull", &pipeline.pull_products().await?)
                }
                ProductCommands::Delete { remote_id } => {
                    if pipeline.delete_product(remote_id).await? {
                        println!("deleted product {remote_id}");
                    } else {
                        println!("product {remote_id} not found locally");
                    }
                }
            }
        }
        Commands::Ads(AdCommands::Create) => {
            let pipeline = build_pipeline(config).await?;
            print_workflow(&pipeline.create_ad_campaign(Uuid::new_v4()).await?);
        }
        Commands::Serve => {
            let db = open_database(&config).await?;
            acfy_web::serve(&config, db).await?;
        }
        Commands::Schedule => {
            let pipeline = Arc::new(build_pipeline(config).await?);
            let Some(mut sched) = pipeline.maybe_build_scheduler().await? else {
                bail!("scheduler is disabled; set ACFY_SCHEDULER_ENABLED=true");
            };
            sched.start().await.context("starting scheduler")?;
            info!(
                cron_1 = %pipeline.config().sync_cron_1,
                cron_2 = %pipeline.config().sync_cron_2,
                "scheduler running"
            );
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
    }

    Ok(())
}

async fn build_pipeline(config: AppConfig) -> Result<SyncPipeline> {
    let db = open_database(&config).await?;
    let collaborators = Collaborators::from_config(&config)?;
    Ok(SyncPipeline::new(config, db, collaborators))
}

fn print_report(label: &str, report: &ReconcileReport) {
    println!(
        "{label}: inserted={} updated={} skipped={} duplicates={} failed={}{}",
        report.inserted,
        report.updated,
        report.skipped,
        report.duplicates_discarded,
        report.failures.len(),
        if report.aborted { " (aborted on auth failure)" } else { "" }
    );
    for failure in &report.failures {
        println!("  {}: {}", failure.key, failure.error);
    }
}

fn print_workflow(report: &WorkflowReport) {
    let steps: Vec<&str> = report.completed_steps.iter().map(|s| s.as_str()).collect();
    println!(
        "{} run_id={} steps=[{}] created={}",
        report.workflow,
        report.run_id,
        steps.join(", "),
        report.created_resources.len()
    );
    for resource in &report.created_resources {
        println!("  {} {}", resource.kind, resource.resource);
    }
    if let Some(halt) = &report.halted {
        println!("  halted at {}: {}", halt.step, halt.error);
    }
}
