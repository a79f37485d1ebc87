use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use proxy_harvest::{HarvestConfig, Harvester, JobRecord, JobTracker, RunReport};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Harvests proxies from many sources and keeps a scored catalog
#[derive(Parser)]
#[command(name = "proxy-harvest")]
#[command(about = "Harvests proxies from many sources and keeps a scored catalog")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database URL, overrides the config file
    #[arg(short, long, global = true)]
    database: Option<String>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every configured collector once, without job tracking
    Run,
    /// Run a tracked harvest job and wait for it
    Job {
        /// Job name
        #[arg(short, long, default_value = "spider")]
        name: String,
    },
    /// Submit a tracked harvest job on a fixed interval
    Schedule {
        /// Seconds between runs
        #[arg(short, long, default_value = "600")]
        interval: u64,
        /// Job name
        #[arg(short, long, default_value = "spider")]
        name: String,
    },
    /// List catalog entries, best first
    List {
        #[arg(short, long, default_value = "50")]
        limit: i64,
    },
    /// List recent harvest jobs
    Jobs {
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },
    /// List known collector identifiers
    Collectors,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    let mut config = HarvestConfig::load(cli.config.as_deref())?;
    if let Some(url) = cli.database {
        config.database.url = url;
    }

    let harvester = Arc::new(Harvester::from_config(&config).await?);

    match cli.command {
        Commands::Run => {
            let report = harvester.run_once().await?;
            print_report(&report);
        }
        Commands::Job { name } => {
            let tracker = JobTracker::new(harvester);
            let handle = tracker.submit(&name).await?;
            println!("Submitted job {}", handle.id());
            let job = handle.wait().await?;
            print_job(&job);
        }
        Commands::Schedule { interval, name } => {
            let tracker = JobTracker::new(harvester);
            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "cannot listen for Ctrl-C");
                    std::future::pending::<()>().await;
                }
            };
            tracker
                .schedule(&name, Duration::from_secs(interval.max(1)), shutdown, print_job)
                .await;
        }
        Commands::List { limit } => {
            let entries = harvester.catalog().database().list_proxies(limit).await?;
            if entries.is_empty() {
                println!("Catalog is empty.");
            }
            for entry in entries {
                println!(
                    "{:<28} {:<11} {:>6.2}s  score {:>3} (power {})  {}  [{}]",
                    entry.to_string(),
                    entry.anonymity.to_string(),
                    entry.speed,
                    entry.score.score,
                    entry.score.power,
                    entry.area.as_deref().unwrap_or("-"),
                    entry.origin
                );
            }
        }
        Commands::Jobs { limit } => {
            let jobs = harvester.catalog().database().list_jobs(limit).await?;
            if jobs.is_empty() {
                println!("No jobs found.");
            }
            for job in &jobs {
                print_job(job);
            }
        }
        Commands::Collectors => {
            for name in harvester.registry().names() {
                let marker = if config.collectors.iter().any(|c| c == name) {
                    "*"
                } else {
                    " "
                };
                println!("{} {}", marker, name);
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: u8, format: LogFormat) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = match verbose {
        0 => "proxy_harvest=info",
        1 => "proxy_harvest=debug",
        _ => "proxy_harvest=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match format {
        LogFormat::Text => fmt().with_env_filter(env_filter).with_target(false).init(),
        LogFormat::Json => fmt().json().with_env_filter(env_filter).init(),
    }
}

fn print_report(report: &RunReport) {
    for collector in &report.collectors {
        println!(
            "{:<20} inserted {:>4}  updated {:>4}  invalid {:>4}  skipped {:>4}",
            collector.collector, collector.inserted, collector.updated, collector.rejected, collector.failed
        );
        if let Some(fault) = &collector.fault {
            println!("{:<20} stopped early: {}", "", fault);
        }
    }
    println!(
        "Total: {} inserted, {} updated, {} invalid, {} skipped",
        report.inserted(),
        report.updated(),
        report.rejected(),
        report.failed()
    );
}

fn print_job(job: &JobRecord) {
    let ended = job
        .end_time
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{}  {:<10} {:<8} harvest {:>5}  ended {}",
        job.id,
        job.name,
        job.status.as_str(),
        job.harvest,
        ended
    );
    if let Some(error) = &job.error {
        println!("    {}", error);
    }
}
