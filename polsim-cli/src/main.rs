//
// Copyright (c) The Polsim Contributors
//
// SPDX-License-Identifier: MIT
//

#![warn(rust_2018_idioms)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_appender::rolling;
use tracing_subscriber::prelude::*;

use polsim_core::driver::{self, SimulationContext};
use polsim_core::matchmode::MatchMode;
use polsim_core::probe;
use polsim_ingest::{csv_io, db, excel, fortigate, ParsedRules};

#[derive(Parser, Debug)]
#[command(name = "polsim", about = "Static firewall traffic policy simulator")]
struct Cli {
    /// FortiGate CLI config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Excel rules workbook
    #[arg(long)]
    excel: Option<PathBuf>,

    /// MariaDB user
    #[arg(long)]
    db_user: Option<String>,

    /// MariaDB password
    #[arg(long)]
    db_password: Option<String>,

    /// MariaDB host
    #[arg(long)]
    db_host: Option<String>,

    /// MariaDB database
    #[arg(long)]
    db_name: Option<String>,

    /// Fabrication plant name to filter rules
    #[arg(long)]
    fab_name: Option<String>,

    /// Source CIDR list CSV
    #[arg(long)]
    src_csv: PathBuf,

    /// Destination CIDR list CSV
    #[arg(long)]
    dst_csv: PathBuf,

    /// Ports list file
    #[arg(long)]
    ports: PathBuf,

    /// Output CSV path
    #[arg(long)]
    out: PathBuf,

    /// Ignore policy schedules
    #[arg(long)]
    ignore_schedule: bool,

    /// Address match mode
    #[arg(long, value_enum, default_value_t = MatchModeArg::Segment)]
    match_mode: MatchModeArg,

    /// Max hosts for expand mode
    #[arg(long, default_value_t = 256)]
    max_hosts: u64,

    /// Worker thread count (0=auto, 1=disable parallelism)
    #[arg(long, default_value_t = 0)]
    workers: i64,

    /// Only output results matching this Policy ID
    #[arg(long)]
    filter_policy_id: Option<String>,

    /// Logging verbosity
    #[arg(long, value_enum, default_value_t = LogLevelArg::Info)]
    log_level: LogLevelArg,

    /// Optional log file path (defaults to console output)
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum MatchModeArg {
    Segment,
    SampleIp,
    Expand,
    Fuzzy,
}

impl std::fmt::Display for MatchModeArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MatchModeArg::Segment => "segment",
            MatchModeArg::SampleIp => "sample-ip",
            MatchModeArg::Expand => "expand",
            MatchModeArg::Fuzzy => "fuzzy",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum LogLevelArg {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl std::fmt::Display for LogLevelArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogLevelArg::Debug => "debug",
            LogLevelArg::Info => "info",
            LogLevelArg::Warning => "warning",
            LogLevelArg::Error => "error",
            LogLevelArg::Fatal => "fatal",
        };
        write!(f, "{s}")
    }
}

impl LogLevelArg {
    fn as_filter(self) -> LevelFilter {
        match self {
            LogLevelArg::Debug => LevelFilter::DEBUG,
            LogLevelArg::Info => LevelFilter::INFO,
            LogLevelArg::Warning => LevelFilter::WARN,
            LogLevelArg::Error | LogLevelArg::Fatal => LevelFilter::ERROR,
        }
    }
}

fn init_tracing(level: LogLevelArg, log_file: Option<&Path>) {
    let filter = level.as_filter();

    let file_layer = log_file.map(|path| {
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
        let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| "polsim.log".to_string());
        let appender = rolling::never(dir, file_name);
        tracing_subscriber::fmt::layer()
            .with_writer(appender)
            .with_target(false)
            .with_ansi(false)
    });

    let stdout_layer = log_file.is_none().then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

#[derive(Debug)]
enum CliError {
    Validation(String),
    Ingest(polsim_ingest::Error),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Validation(msg) => write!(f, "{msg}"),
            CliError::Ingest(e) => write!(f, "{e}"),
        }
    }
}

impl From<polsim_ingest::Error> for CliError {
    fn from(e: polsim_ingest::Error) -> Self {
        CliError::Ingest(e)
    }
}

fn select_rule_source(cli: &Cli) -> Result<(), CliError> {
    let db_selected = cli.db_user.is_some() || cli.db_password.is_some() || cli.db_host.is_some() || cli.db_name.is_some();
    let provided = [cli.config.is_some(), cli.excel.is_some(), db_selected]
        .iter()
        .filter(|v| **v)
        .count();
    if provided != 1 {
        return Err(CliError::Validation(
            "Specify exactly one of --config, --excel, or MariaDB args".to_string(),
        ));
    }
    Ok(())
}

fn load_rules(cli: &Cli) -> Result<ParsedRules, CliError> {
    if let Some(config_path) = &cli.config {
        let contents = std::fs::read_to_string(config_path)
            .map_err(|e| CliError::Validation(format!("failed to read {}: {e}", config_path.display())))?;
        Ok(fortigate::parse_fortigate_config(contents.lines())?)
    } else if let Some(excel_path) = &cli.excel {
        Ok(excel::parse_excel(excel_path)?)
    } else {
        let missing: Vec<&str> = [
            ("--db-user", cli.db_user.is_some()),
            ("--db-password", cli.db_password.is_some()),
            ("--db-host", cli.db_host.is_some()),
            ("--db-name", cli.db_name.is_some()),
        ]
        .into_iter()
        .filter(|(_, present)| !present)
        .map(|(name, _)| name)
        .collect();
        if !missing.is_empty() {
            return Err(CliError::Validation(format!(
                "Missing required MariaDB args: {}",
                missing.join(", ")
            )));
        }
        let config = db::DatabaseConfig {
            user: cli.db_user.as_deref().unwrap(),
            password: cli.db_password.as_deref().unwrap(),
            host: cli.db_host.as_deref().unwrap(),
            database: cli.db_name.as_deref().unwrap(),
            fab_name: cli.fab_name.as_deref(),
        };
        let runtime = tokio::runtime::Runtime::new()
            .map_err(|e| CliError::Validation(format!("failed to start async runtime: {e}")))?;
        Ok(runtime.block_on(db::parse_database(config))?)
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    tracing::info!("starting static traffic analysis");
    select_rule_source(&cli)?;

    let data = load_rules(&cli)?;

    let src_records = csv_io::read_source_csv(&cli.src_csv)?;
    let dst_records = csv_io::read_destination_csv(&cli.dst_csv)?;
    let ports = csv_io::read_ports_file(&cli.ports)?;
    tracing::info!(
        sources = src_records.len(),
        destinations = dst_records.len(),
        ports = ports.len(),
        "loaded input records"
    );

    if cli.max_hosts < 1 {
        return Err(CliError::Validation("--max-hosts must be a positive integer".to_string()));
    }
    let match_mode = match cli.match_mode {
        MatchModeArg::Segment => MatchMode::Segment,
        MatchModeArg::SampleIp => MatchMode::SampleIp,
        MatchModeArg::Expand => MatchMode::expand(cli.max_hosts)
            .map_err(|e| CliError::Validation(e.to_string()))?,
        MatchModeArg::Fuzzy => MatchMode::Fuzzy,
    };

    data.address_book.flatten_all();
    data.service_book.flatten_all();
    tracing::debug!("flattened address and service groups");

    let context = SimulationContext {
        policies: data.policies,
        address_book: data.address_book,
        service_book: data.service_book,
        mode: match_mode,
        ignore_schedule: cli.ignore_schedule,
    };

    if cli.workers < 0 {
        return Err(CliError::Validation("--workers must be zero or a positive integer".to_string()));
    }
    let probes = probe::plan_probes(&src_records, &dst_records, &ports, match_mode);
    let worker_count = driver::resolve_worker_count(cli.workers as usize, src_records.len());
    tracing::info!(workers = worker_count, "resolved worker count");

    let mut results = driver::run(&context, probes, worker_count);
    if let Some(policy_id) = &cli.filter_policy_id {
        results = driver::filter_by_policy_id(results, policy_id);
    }

    let routable = driver::routable_rows(&results, match_mode);

    let output_rows: Vec<_> = results.iter().map(csv_io::output_row_from_result).collect();
    csv_io::write_output_rows(&cli.out, &output_rows)?;
    tracing::info!(rows = output_rows.len(), path = %cli.out.display(), "wrote output");

    if matches!(match_mode, MatchMode::Fuzzy) {
        let routable_path = cli.out.with_file_name("routable.csv");
        let routable_rows: Vec<_> = routable.iter().map(csv_io::output_row_from_routable).collect();
        csv_io::write_output_rows(&routable_path, &routable_rows)?;
        tracing::info!(rows = routable_rows.len(), path = %routable_path.display(), "wrote routable companion output");
    }

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_level, cli.log_file.as_deref());

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Validation(msg)) => {
            tracing::warn!(error = %msg, "parsing failed");
            eprintln!("{msg}");
            ExitCode::FAILURE
        }
        Err(CliError::Ingest(e)) => {
            tracing::warn!(error = %e, "parsing failed");
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
