use std::io::{BufWriter, Read, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use load_core::gen::{generate, RDICT_TOKEN};
use load_core::interarrival::{ArrivalSpec, InterArrival};
use load_core::slowlog::search_url;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "genspec")]
#[command(about = "Outputs a replayable loadspec built from a query template read on stdin")]
struct Args {
    /// Inter-arrival time specification, e.g. const:10 or poisson:50
    #[arg(long = "arrival_spec")]
    arrival_spec: String,

    /// Newline delimited dictionary of substitution terms
    #[arg(long = "dictionary_file")]
    dictionary_file: Option<PathBuf>,

    /// Total duration covered by the generated loadspec
    #[arg(long, value_parser = humantime::parse_duration)]
    duration: Duration,

    /// HTTP address of the search service
    #[arg(long, default_value = "http://localhost:9200")]
    addr: String,

    /// Index to perform queries against
    #[arg(long, default_value = "wikipediax")]
    index: String,

    /// Index type to be acted upon
    #[arg(long = "type", default_value = "")]
    types: String,

    /// Type of search, for search queries
    #[arg(long = "search_type", default_value = "")]
    search_type: String,
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

    let mut template = String::new();
    std::io::stdin()
        .read_to_string(&mut template)
        .context("failed to read the query template from stdin")?;

    if template.contains(RDICT_TOKEN) && args.dictionary_file.is_none() {
        anyhow::bail!(
            "the query template uses {RDICT_TOKEN}, which implies a dictionary; pass --dictionary_file"
        );
    }
    let terms = match &args.dictionary_file {
        Some(path) => load_terms(path)?,
        None => Vec::new(),
    };
    if !terms.is_empty() {
        info!(terms = terms.len(), "dictionary loaded");
    }

    let url = search_url(&args.addr, &args.index, &args.types, &args.search_type);
    let mut gen = InterArrival::new(ArrivalSpec::parse(&args.arrival_spec)?);
    let mut rng = SmallRng::from_entropy();

    let stdout = std::io::stdout().lock();
    let mut out = BufWriter::new(stdout);
    let written = generate(
        &template,
        &terms,
        &url,
        args.duration,
        &mut gen,
        &mut rng,
        &mut out,
    )?;
    out.flush()?;

    info!(entries = written, duration = %humantime::format_duration(args.duration), "loadspec generated");
    Ok(())
}

fn load_terms(path: &std::path::Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read dictionary {path:?}"))?;
    Ok(contents
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect())
}
