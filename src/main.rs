use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};

use vgclient::api::client::HttpClient;
use vgclient::api::transport::{timeouts_for, RetryingTransport, LARGE_FILE_BYTES};
use vgclient::batch::observer::LogObserver;
use vgclient::batch::orchestrator::{BatchMode, BatchOrchestrator};
use vgclient::request::config::ConfigFile;
use vgclient::request::schema::load_schema;
use vgclient::request::validate::validate;
use vgclient::settings::{Settings, DEFAULT_BASE_URL};
use vgclient::status::StatusChecker;
use vgclient::task::TaskCoordinator;
use vgclient::upload::{UploadCoordinator, UploadLedger};

/// Upload files, create analysis tasks and check their status on the Virtual Geneticist API
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the token file containing the API token
    #[arg(short, long, env = "VG_TOKEN_FILE")]
    token: PathBuf,

    /// Base URL of the API
    #[arg(long, env = "VG_API_URL", default_value = DEFAULT_BASE_URL)]
    api_url: String,

    /// Directory for batch result files
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a single file
    Upload {
        /// .vcf, .vcf.gz, .pdf or .txt file
        #[arg(short, long)]
        file: PathBuf,
        /// Prefix for file organisation on the server
        #[arg(short, long)]
        prefix: Option<String>,
    },
    /// Upload the files of a task configuration and create the task
    Task {
        /// Task configuration JSON file
        #[arg(short = 'c', long)]
        config: PathBuf,
    },
    /// Check the status of a submitted task
    Status {
        #[arg(short, long)]
        submission_id: String,
        /// Keep polling until the task finishes
        #[arg(short, long)]
        monitor: bool,
        /// Seconds between checks when monitoring
        #[arg(long, default_value_t = 30)]
        interval: u64,
        /// Maximum number of checks when monitoring
        #[arg(long, default_value_t = 20, value_parser = clap::value_parser!(u32).range(1..))]
        max_checks: u32,
    },
    /// Upload files and create tasks for every row of a CSV manifest
    Batch {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long, value_enum, default_value_t = BatchMode::Full)]
        mode: BatchMode,
        /// Directory that relative manifest paths are resolved against
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    info!("vgclient starting up");

    let args = Args::parse();
    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Run the selected command, `Ok(false)` means it finished but something failed
async fn run(args: Args) -> Result<bool> {
    let data_dir = match &args.command {
        Command::Batch { data_dir, .. } => data_dir.clone(),
        _ => None,
    };
    let settings = Settings::new(&args.api_url, &args.token, args.output_dir, data_dir)?;
    let client = HttpClient::new(settings.base_url.clone(), settings.token.clone());
    let transport = RetryingTransport::new(Arc::new(client));

    match args.command {
        Command::Upload { file, prefix } => {
            let uploader = UploadCoordinator::new(transport, &settings.endpoints.upload);
            let remote = uploader.upload(&file, prefix.as_deref()).await.map_err(|e| anyhow!("{}: {e}", e.kind()))?;
            println!("Remote path: {remote}");
            Ok(true)
        }
        Command::Task { config } => {
            let id = create_single_task(&config, &settings, transport).await?;
            println!("Submission ID: {id}");
            Ok(true)
        }
        Command::Status { submission_id, monitor, interval, max_checks } => {
            let checker = StatusChecker::new(transport, &settings.endpoints.status);
            let status = match monitor {
                true => {
                    checker
                        .monitor(&submission_id, Duration::from_secs(interval), max_checks, |status, changed| match changed {
                            true => match status.render() {
                                Ok(text) => println!("{text}"),
                                Err(err) => warn!("{err}"),
                            },
                            false => println!("Status still {}", status.phase),
                        })
                        .await?
                }
                false => {
                    let status = checker.check(&submission_id).await?;
                    println!("{}", status.render()?);
                    status
                }
            };
            Ok(!matches!(status.phase, vgclient::status::TaskPhase::Failed | vgclient::status::TaskPhase::Cancelled))
        }
        Command::Batch { csv, mode, .. } => {
            let mut observer = LogObserver;
            let orchestrator = BatchOrchestrator::new(transport, &settings, mode, &mut observer);
            let run = orchestrator.run(&csv).await?;
            println!("{}", run.report.summary(&mode.to_string(), &csv, run.rows, &settings.output_dir)?);
            Ok(!run.report.has_failures())
        }
        Command::Config => {
            show_configuration(&settings, &transport);
            Ok(true)
        }
    }
}

/// Validate a task config, upload its files into a fresh ledger and submit it
async fn create_single_task(path: &Path, settings: &Settings, transport: RetryingTransport) -> Result<String> {
    let config_file = ConfigFile { path: path.to_path_buf(), compiled_schema: load_schema()? };
    let config = config_file.read()?;
    let task = validate(&config).map_err(|e| anyhow!("{}: {e}", e.kind()))?;

    let uploader = UploadCoordinator::new(transport.clone(), &settings.endpoints.upload);
    let mut ledger = UploadLedger::default();
    for (field, local) in config.files() {
        uploader
            .upload_once(local, Some(&config.title), &mut ledger)
            .await
            .map_err(|e| anyhow!("{}: {e}", e.kind()))
            .with_context(|| format!("uploading {field}"))?;
    }

    let tasker = TaskCoordinator::new(transport, &settings.endpoints.create_task);
    tasker.create_task(&task, &ledger).await.map_err(|e| anyhow!("{}: {e}", e.kind()))
}

fn show_configuration(settings: &Settings, transport: &RetryingTransport) {
    let policy = transport.policy();
    let small = timeouts_for(0);
    let large = timeouts_for(LARGE_FILE_BYTES);
    println!("API base URL:    {}", settings.base_url);
    println!("Upload endpoint: {}", settings.endpoints.upload);
    println!("Task endpoint:   {}", settings.endpoints.create_task);
    println!("Status endpoint: {}", settings.endpoints.status);
    println!("Output dir:      {}", settings.output_dir.display());
    println!("Timeouts:        connect {:?}, read {:?} (read {:?}, overall {:?} for files >= 100 MiB)", small.connect, small.read, large.read, large.overall);
    println!("Retries:         {} attempts, backoff 2^n x {:?}", policy.max_attempts, policy.backoff_unit);
}
