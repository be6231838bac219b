use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use cardflock_config::{ensure_config, load_config, validate_config};
use cardflock_core::RunStatus;
use cardflock_core::window::time_windows;
use cardflock_store::{SqliteStore, next_model_no};
use cardflockd::queue::{QueueOptions, WindowJob, run_windows};
use cardflockd::runner::{WindowRequest, run_window};
use clap::Parser;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum LogFormat {
    #[default]
    Human,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "human" => Ok(Self::Human),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "invalid log format '{other}', expected one of: human, json"
            )),
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Card-aggregation risk detector over medical-insurance settlements"
)]
struct Cli {
    #[arg(
        long,
        default_value = "cardflock.toml",
        help = "Path to the TOML configuration file"
    )]
    config: PathBuf,

    #[arg(long, help = "SQLite database path (overrides storage.db_path)")]
    db: Option<PathBuf>,

    #[arg(long, help = "Range start: YYYY-MM-DD, YYYYMMDD, YYYY-MM or YYYYMM")]
    start_date: Option<String>,

    #[arg(long, help = "Range end: YYYY-MM-DD, YYYYMMDD, YYYY-MM or YYYYMM")]
    end_date: Option<String>,

    #[arg(
        long,
        help = "Jurisdiction filter; blank, all, null and none mean unrestricted"
    )]
    admdvs: Option<String>,

    #[arg(long, default_value_t = 1, help = "Concurrent window workers")]
    workers: usize,

    #[arg(
        long,
        default_value = "human",
        value_parser = parse_log_format,
        help = "Log format: human or json"
    )]
    log_format: LogFormat,

    #[arg(long, help = "Write a default configuration file and exit")]
    init_config: bool,
}

fn parse_log_format(value: &str) -> Result<LogFormat, String> {
    value.parse()
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    if cli.init_config {
        ensure_config(&cli.config).context("write default configuration")?;
        info!(path = %cli.config.display(), "configuration file ready");
        return Ok(());
    }

    let config = load_config(&cli.config).context("load configuration")?;
    let issues = validate_config(&config);
    if !issues.is_empty() {
        for issue in &issues {
            error!(%issue, "invalid configuration");
        }
        bail!("configuration has {} issue(s)", issues.len());
    }

    let (Some(start_date), Some(end_date)) = (cli.start_date.as_deref(), cli.end_date.as_deref())
    else {
        bail!("--start-date and --end-date are required");
    };

    let windows = time_windows(
        start_date,
        end_date,
        config.schedule.window_size,
        config.schedule.step_size,
    )
    .context("compute time windows")?;
    let Some(&(range_begin, _)) = windows.first() else {
        bail!("date range produced no windows");
    };
    let Some(&(_, range_end)) = windows.last() else {
        bail!("date range produced no windows");
    };

    let db_path = cli
        .db
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.storage.db_path));

    let model_no = next_model_no();
    let store = SqliteStore::open(&db_path).context("open database")?;
    store.record_run_status(
        &model_no,
        RunStatus::Running,
        range_begin,
        range_end,
        cli.admdvs.as_deref(),
    )?;
    drop(store);

    info!(
        model_no = %model_no,
        windows = windows.len(),
        workers = cli.workers,
        db = %db_path.display(),
        "starting card-aggregation detection"
    );

    let jobs: Vec<WindowJob> = windows
        .iter()
        .map(|&(begin, end)| WindowJob { begin, end })
        .collect();
    let options = QueueOptions {
        workers: cli.workers.max(1),
        window_timeout: Duration::from_secs(config.schedule.window_timeout_secs.max(1)),
    };
    let params = config.detection.clone();
    let admdvs = cli.admdvs.clone();
    let request_model_no = model_no.clone();
    let results = run_windows(jobs, &options, |job, cancel| {
        let request = WindowRequest {
            begin: job.begin,
            end: job.end,
            admdvs: admdvs.clone(),
            model_no: request_model_no.clone(),
        };
        run_window(&db_path, &params, &request, cancel)
    });

    let mut failed = 0usize;
    let mut persisted = 0u64;
    for result in &results {
        match &result.outcome {
            Ok(rows) => {
                info!(
                    begin = %result.job.begin,
                    end = %result.job.end,
                    rows,
                    "window complete"
                );
                persisted += rows;
            }
            Err(window_error) => {
                failed += 1;
                error!(
                    begin = %result.job.begin,
                    end = %result.job.end,
                    error = %window_error,
                    "window failed"
                );
            }
        }
    }

    let status = if failed == 0 {
        RunStatus::Succeeded
    } else {
        RunStatus::Failed
    };
    let store = SqliteStore::open(&db_path).context("reopen database")?;
    store.record_run_status(
        &model_no,
        status,
        range_begin,
        range_end,
        cli.admdvs.as_deref(),
    )?;

    if failed > 0 {
        bail!("{failed} of {} windows failed", results.len());
    }
    info!(model_no = %model_no, rows = persisted, "detection finished");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match format {
        LogFormat::Human => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
    }
}
