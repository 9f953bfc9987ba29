use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use metrics_gatherer::{health, GathererConfig, Scheduler};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Gather once over --from..--to and exit instead of running the scheduler
    #[arg(long, default_value_t = false)]
    once: bool,

    /// First day to gather (YYYY-MM-DD), used with --once
    #[arg(long)]
    from: Option<NaiveDate>,

    /// Last day to gather (YYYY-MM-DD), defaults to --from
    #[arg(long)]
    to: Option<NaiveDate>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Arc::new(GathererConfig::from_env());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter().into()),
        )
        .init();

    info!(
        elasticsearch = %config.elastic_host_for_logs(),
        postgres = %config.postgres.host,
        retirement = config.retirement_enabled(),
        "Metrics gatherer starting"
    );

    let scheduler = Scheduler::new(Arc::clone(&config));

    if args.once {
        let Some(from) = args.from else {
            bail!("--once requires --from");
        };
        let to = args.to.unwrap_or(from);
        if to < from {
            bail!("--to ({}) is before --from ({})", to, from);
        }
        let summary = scheduler
            .run_range(from, to)
            .await
            .context("one-shot gathering failed")?;
        info!(?summary, "One-shot gathering finished");
        return Ok(());
    }

    let scheduler_task = tokio::spawn(async move { scheduler.run_forever().await });
    tokio::select! {
        served = health::serve(Arc::clone(&config)) => {
            served.context("health endpoint stopped")?;
        }
        joined = scheduler_task => {
            if let Err(err) = joined {
                error!(error = %err, "Scheduler task ended");
            }
        }
    }
    Ok(())
}
