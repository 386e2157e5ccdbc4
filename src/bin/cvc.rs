//! Thin CLI driver (`spec.md` §6: CLI arg handling / REPL is out of
//! scope beyond "takes a single fixture path argument").
//!
//! Usage: `cvc <circuit.json> [--cvcrc path/to/.cvcrc]`

use std::{env, fs, process::ExitCode};

use cvc::config::CvcConfig;
use cvc::engine::Engine;
use cvc::ingest::{build_database, CircuitDescription};

fn parse_flag(args: &[String], key: &str) -> Option<String> {
    let mut it = args.iter();
    while let Some(a) = it.next() {
        if a == key {
            return it.next().cloned();
        }
    }
    None
}

fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let fixture_path = args.first().ok_or_else(|| anyhow::anyhow!("usage: cvc <circuit.json> [--cvcrc path]"))?;

    let config = match parse_flag(&args, "--cvcrc") {
        Some(path) => {
            let text = fs::read_to_string(&path).map_err(|e| anyhow::anyhow!("read {path}: {e}"))?;
            CvcConfig::parse(&text).map_err(|e| anyhow::anyhow!("parse {path}: {e}"))?
        }
        None => CvcConfig::default(),
    };

    let fixture_text = fs::read_to_string(fixture_path).map_err(|e| anyhow::anyhow!("read {fixture_path}: {e}"))?;
    let description = CircuitDescription::from_json(&fixture_text)?;
    let db = build_database(&description)?;

    tracing::info!(nets = db.net_count(), devices = db.device_count(), "loaded circuit");

    let mut engine = Engine::new(db, config);
    let report = engine.run()?;

    tracing::info!(
        power_short_leaks = report.power_short_leaks.len(),
        error_records = report.error_records.len(),
        "verification complete"
    );
    for (kind, count) in &report.error_totals {
        tracing::info!(kind = ?kind, count, "error kind total");
    }

    if !report.error_records.is_empty() {
        eprintln!("{} electrical-rule findings (see log for detail)", report.error_records.len());
    }

    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "cvc failed");
            ExitCode::FAILURE
        }
    }
}
