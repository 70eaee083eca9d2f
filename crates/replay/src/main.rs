use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use load_core::collector::SearchStatsCollector;
use load_core::store::{csv_file_path, per_request_log};
use load_core::{Outcome, ReplayConfig, ReplayMetrics, Reporter, RunConfig};
use tokio::io::BufReader;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "replay")]
#[command(about = "Replays a loadspec read on stdin against an HTTP search service and collects metrics")]
struct Args {
    /// Directory receiving the CSV reports
    #[arg(long = "results_path")]
    results_path: PathBuf,

    /// Experiment identifier, suffixed to every report file
    #[arg(long = "exp_id", default_value = "1")]
    exp_id: String,

    /// Interval between metrics collections
    #[arg(long = "mon_interval", default_value = "5s", value_parser = humantime::parse_duration)]
    mon_interval: Duration,

    /// Statistics endpoint of the monitored server; leave empty to skip
    /// external collection
    #[arg(long = "mon_host", default_value = "")]
    mon_host: String,

    /// Timeout applied to every connection to the server
    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
    timeout: Duration,

    /// Number of active clients making requests
    #[arg(long = "num_clients", short = 'c', default_value_t = 10)]
    num_clients: usize,

    /// Dump requests and responses
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if args.results_path.as_os_str().is_empty() {
        anyhow::bail!("results path can not be empty; set --results_path");
    }
    if args.num_clients < 1 {
        anyhow::bail!("number of clients must be positive");
    }
    std::fs::create_dir_all(&args.results_path)
        .with_context(|| format!("failed to create results dir {:?}", args.results_path))?;

    let path = |metric: &str| csv_file_path(&args.results_path, metric, &args.exp_id);

    let metrics = ReplayMetrics::new();
    let mut builder = Reporter::builder(args.mon_interval, args.timeout)
        .histogram_csv(&metrics.response_times, &path("response.time"))?
        .histogram_csv(&metrics.pause_times, &path("pause.time.millis"))?
        .counter_csv(&metrics.requests_sent, &path("requests.sent"))?
        .counter_csv(&metrics.errors, &path("errors"))?;

    if !args.mon_host.is_empty() {
        let collector = Arc::new(SearchStatsCollector::new(
            &args.mon_host,
            args.timeout,
            args.debug,
        )?);
        builder = builder
            .gauge_set_csv(&collector.mem.young, &path("mem.young"))?
            .gauge_set_csv(&collector.mem.tenured, &path("mem.tenured"))?
            .gauge_set_csv(&collector.mem.survivor, &path("mem.survivor"))?
            .gauge_set_csv(&collector.mem.heap, &path("mem.heap"))?
            .gauge_set_csv(&collector.mem.non_heap, &path("mem.nonheap"))?
            .gauge_set_csv(&collector.mem.os, &path("mem.os"))?
            .gauge_set_csv(&collector.mem.swap, &path("mem.swap"))?
            .gauge_csv(&collector.cpu_percent, &path("cpu.percent"))?
            .gauge_set_csv(&collector.gc.young, &path("gc.young"))?
            .gauge_set_csv(&collector.gc.full, &path("gc.full"))?
            .collector(collector);
    }
    let reporter = builder.start();

    let (per_sink, per_log) = per_request_log(&path("per.request"))?;

    RunConfig {
        results_path: args.results_path.clone(),
        exp_id: args.exp_id.clone(),
        mon_host: (!args.mon_host.is_empty()).then(|| args.mon_host.clone()),
        timeout_ms: args.timeout.as_millis() as u64,
        collect_interval_ms: args.mon_interval.as_millis() as u64,
        num_clients: args.num_clients,
        debug: args.debug,
        start_time: chrono::Utc::now(),
    }
    .write()
    .context("failed to write the run config")?;

    info!(
        num_clients = args.num_clients,
        timeout = %humantime::format_duration(args.timeout),
        "replaying loadspec from stdin"
    );

    let outcome = load_core::replay::run(
        ReplayConfig {
            timeout: args.timeout,
            num_clients: args.num_clients,
            debug: args.debug,
        },
        metrics,
        Some(per_sink),
        BufReader::new(tokio::io::stdin()),
    )
    .await;

    // Flush every report before surfacing the run result, so a fatal
    // response still leaves complete CSVs behind.
    reporter.finish().await;
    per_log.finish().await?;

    match outcome {
        Ok(Outcome::Completed) => {
            info!(results = %args.results_path.display(), "load test finished successfully");
            Ok(())
        }
        Ok(Outcome::Interrupted) => {
            info!(results = %args.results_path.display(), "load test interrupted");
            Ok(())
        }
        Err(e) => Err(e).context("replay failed"),
    }
}
