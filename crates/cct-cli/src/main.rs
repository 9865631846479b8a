use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::warn;

use cct_core::ViewModel;
use cct_engine::{
    spawn_refresh_scheduler, tracker_from_config, JobScheduler, Tracker, TrackerConfig,
};

#[derive(Debug, Parser)]
#[command(name = "cct")]
#[command(about = "Competitive contest tracker command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch the upstream feed once and print the schedule.
    Fetch,
    /// Keep re-rendering the schedule on every tick until interrupted.
    Watch,
    /// Serve the web dashboard.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = TrackerConfig::from_env().with_platforms_file("platforms.yaml")?;
    let tracker = tracker_from_config(&config).await?;

    match cli.command.unwrap_or(Commands::Fetch) {
        Commands::Fetch => {
            let summary = tracker.refresh(Utc::now()).await?;
            let view = tracker.render(Utc::now()).await;
            print_schedule(&view);
            println!(
                "run {}: {} fetched, {} normalized, {} skipped",
                summary.run_id, summary.fetched, summary.normalized, summary.skipped
            );
        }
        Commands::Watch => {
            refresh_or_warn(&tracker).await;
            let _scheduler = maybe_scheduler(&config, &tracker).await?;
            let mut ticker = tokio::time::interval(config.tick_period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let view = tracker.render(Utc::now()).await;
                        print_schedule(&view);
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }
        Commands::Serve => {
            refresh_or_warn(&tracker).await;
            let _scheduler = maybe_scheduler(&config, &tracker).await?;
            cct_web::serve_from_env(tracker).await?;
        }
    }

    Ok(())
}

// Startup refresh is best-effort: the schedule stays empty until the next
// refresh succeeds, which the UI reports alongside the retained error.
async fn refresh_or_warn(tracker: &Arc<Tracker>) {
    if let Err(err) = tracker.refresh(Utc::now()).await {
        warn!(%err, "initial refresh failed");
    }
}

async fn maybe_scheduler(
    config: &TrackerConfig,
    tracker: &Arc<Tracker>,
) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }
    let scheduler = spawn_refresh_scheduler(Arc::clone(tracker), &config.refresh_cron).await?;
    Ok(Some(scheduler))
}

fn print_schedule(view: &ViewModel) {
    if view.rows.is_empty() {
        if view.counts.total == 0 {
            println!("No upcoming contests found");
        } else {
            println!("No contests match the selected filters");
        }
        return;
    }
    for row in &view.rows {
        let star = if row.marked { "*" } else { " " };
        println!(
            "{star} [{:<11}] {:<42} {:<22} {:>7}  {}",
            row.platform_name, row.name, row.start_display, row.duration_display, row.display
        );
    }
    let marked = if view.counts.marked > 0 {
        format!(" \u{2022} {} marked", view.counts.marked)
    } else {
        String::new()
    };
    println!(
        "Showing {} of {} upcoming contests{marked}",
        view.counts.shown, view.counts.total
    );
}
