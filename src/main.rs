use anyhow::{bail, Context, Result};
use rusqlite::Connection;
use std::env;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use peer_reconciliation::{
    io, save_report, setup_database, NormalizationTable, Reconciler, ReconciliationConfig, VERSION,
};

const USAGE: &str = "usage: peer-recon <config.json> <data-dir> [--db <path>]";

fn main() -> Result<()> {
    // Logs go to stderr; stdout carries only the JSON report
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let (config_path, data_dir, db_path) = parse_args(&args)?;

    info!(version = VERSION, config = ?config_path, data = ?data_dir, "peer-recon starting");

    // 1. Configuration + normalization tables (fatal if inconsistent)
    let config = ReconciliationConfig::from_file(&config_path)?;
    let tables = NormalizationTable::load_all(data_dir.join("tables.json"))?;
    let reconciler = Reconciler::new(config, tables).context("Invalid configuration")?;

    // 2. Inputs
    let input = io::load_data_dir(&data_dir, reconciler.config())?;

    // 3. Run
    let report = reconciler.run(&input);

    // 4. Optional persistence
    if let Some(db_path) = db_path {
        let conn = Connection::open(&db_path)
            .with_context(|| format!("Failed to open database: {:?}", db_path))?;
        setup_database(&conn)?;
        let run_id = save_report(&conn, &report)?;
        info!(run_id = %run_id, db = ?db_path, "run saved");
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn parse_args(args: &[String]) -> Result<(PathBuf, PathBuf, Option<PathBuf>)> {
    let mut positional = Vec::new();
    let mut db = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--db" => match iter.next() {
                Some(path) => db = Some(PathBuf::from(path)),
                None => bail!("--db needs a path\n{}", USAGE),
            },
            "-h" | "--help" => {
                eprintln!("{}", USAGE);
                std::process::exit(0);
            }
            _ => positional.push(Path::new(arg).to_path_buf()),
        }
    }

    match positional.as_slice() {
        [config, data] => Ok((config.clone(), data.clone(), db)),
        _ => bail!(USAGE),
    }
}
