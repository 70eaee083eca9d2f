use std::io::{BufRead, BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use load_core::anon::{Anonymizer, FieldRegexps, FieldsMap};
use load_core::entry::write_jsonl;
use load_core::slowlog::{build_loadspec, total_delay, ParseOptions};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "parseslowlog")]
#[command(about = "Outputs a replayable loadspec built from a slow-query log read on stdin")]
struct Args {
    /// Target URL; its scheme and authority replace the logged host
    url: Option<String>,

    /// Override for the logged index names; repeat the flag to spread the
    /// load over several indexes round-robin
    #[arg(long = "index_override")]
    index_override: Vec<String>,

    /// Maximum duration of the generated loadspec. It can come out smaller
    /// when the log covers a shorter time frame
    #[arg(long = "max_duration", value_parser = humantime::parse_duration)]
    max_duration: Option<Duration>,

    /// field::regex pairs naming source fields to anonymize
    #[arg(long = "anon_field")]
    anon_field: Vec<String>,

    /// Path of the persisted anonymization map; read if present, updated
    /// on completion
    #[arg(long = "anon_map_path")]
    anon_map_path: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut anonymizer = if args.anon_field.is_empty() {
        None
    } else {
        let map = match &args.anon_map_path {
            Some(path) if path.exists() => FieldsMap::load(path)
                .with_context(|| format!("failed to load anonymization map {path:?}"))?,
            _ => FieldsMap::new(),
        };
        Some(Anonymizer::new(map, FieldRegexps::parse(&args.anon_field)?))
    };

    let lines: Vec<String> = std::io::stdin()
        .lock()
        .lines()
        .collect::<std::io::Result<_>>()
        .context("failed to read the slowlog from stdin")?;

    let opts = ParseOptions {
        url_override: args.url.clone(),
        index_overrides: args.index_override.clone(),
        max_duration: args.max_duration,
    };
    let entries = build_loadspec(
        lines.into_iter().enumerate().map(|(i, l)| (i + 1, l)),
        &opts,
        anonymizer.as_mut(),
    )?;

    let stdout = std::io::stdout().lock();
    let mut out = BufWriter::new(stdout);
    for entry in &entries {
        write_jsonl(&mut out, entry)?;
    }
    out.flush()?;

    if let (Some(anon), Some(path)) = (&anonymizer, &args.anon_map_path) {
        anon.map
            .save(path)
            .with_context(|| format!("failed to save anonymization map {path:?}"))?;
    }

    info!(
        entries = entries.len(),
        duration = %humantime::format_duration(total_delay(&entries)),
        "loadspec generated"
    );
    Ok(())
}
