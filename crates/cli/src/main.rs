#![forbid(unsafe_code)]

mod args;

use anyhow::{Context, Result, bail};
use args::{Cli, Command, IngestArgs, QueryArgs};
use clap::Parser;
use dv_core::WindowRequest;
use dv_engine::{EngineConfig, Session};
use dv_storage::IndexKind;
use serde_json::json;
use std::io::Read;
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = EngineConfig::load(cli.global.config.as_deref())
        .context("failed to resolve configuration")?;
    cli.global.apply(&mut config);
    config.validate().context("invalid configuration")?;

    let mut session = Session::new(config);
    let outcome = run(&mut session, cli.command);
    session.close().context("failed to close store session")?;
    outcome
}

fn run(session: &mut Session, command: Command) -> Result<()> {
    match command {
        Command::Generate { count } => {
            session
                .generate(count)
                .with_context(|| format!("generator at {}", session.config().generator_url))?;
            print_json(&json!({ "generated": count }))
        }
        Command::Ingest(args) => ingest(session, &args),
        Command::Query(args) => query(session, &args),
        Command::Show { name } => {
            let Some(record) = session.record(&name)? else {
                bail!("no record named `{name}`");
            };
            print_json(&json!({
                "record": record,
                "ancestors": record.ancestors(),
            }))
        }
        Command::Stats => stats(session),
    }
}

fn ingest(session: &mut Session, args: &IngestArgs) -> Result<()> {
    let report = match &args.file {
        Some(path) if path == Path::new("-") => session.ingest_reader(std::io::stdin().lock())?,
        Some(path) => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("cannot open payload {}", path.display()))?;
            session.ingest_reader(file)?
        }
        None => session.ingest_url(args.url.as_deref())?,
    };
    match report {
        Some(report) => print_json(&report),
        None => {
            tracing::info!("ingestion superseded; no report");
            Ok(())
        }
    }
}

fn query(session: &mut Session, args: &QueryArgs) -> Result<()> {
    let mut request = match &args.request {
        Some(path) => read_request(path)?,
        None => args.to_request(),
    };
    if args.projected && session.projection().is_empty() {
        session.hydrate_projection()?;
    }

    for page in 0..args.pages.max(1) {
        let response = if args.projected {
            session.fetch_projected(&request)?
        } else {
            session.fetch(&request)?
        };
        let Some(response) = response else {
            tracing::info!(page, "query superseded");
            return Ok(());
        };
        print_json(&response)?;
        if response.at_edge {
            break;
        }
        request = request.continue_from(&response.records, args.invert);
    }
    Ok(())
}

fn stats(session: &mut Session) -> Result<()> {
    let total = session.total_count()?;
    let created_at = session.created_at()?;
    let by_object_type = session.histogram(IndexKind::ObjectType)?;
    let by_change_type = session.histogram(IndexKind::ChangeType)?;
    let config = session.config();
    print_json(&json!({
        "dataset": config.dataset,
        "storage_dir": config.storage_dir,
        "created_at": created_at,
        "total": total,
        "by_object_type": to_object(by_object_type),
        "by_change_type": to_object(by_change_type),
    }))
}

fn to_object(counts: Vec<(String, u64)>) -> serde_json::Map<String, serde_json::Value> {
    counts
        .into_iter()
        .map(|(value, count)| (value, json!(count)))
        .collect()
}

fn read_request(path: &Path) -> Result<WindowRequest> {
    let mut raw = String::new();
    if path == Path::new("-") {
        std::io::stdin()
            .read_to_string(&mut raw)
            .context("cannot read request from stdin")?;
    } else {
        raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read request {}", path.display()))?;
    }
    serde_json::from_str(&raw).context("request must be a JSON window request")
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    let line = serde_json::to_string(value).context("failed to encode output")?;
    println!("{line}");
    Ok(())
}
