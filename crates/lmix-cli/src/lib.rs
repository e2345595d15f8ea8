//! Command-line front end for the LevelMix client.

pub mod cli_args;
pub mod terminal;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use cli_args::{BillingCommand, Cli, Command, ConfigCommand, UploadArgs};
use lmix_core::{
    ApiClient, BillingClient, ClientConfig, JobBoard, JobId, JobRow, JobStatus, LoggingDestination,
    PollSettings, Preset, ProcessingMode, RenderMode, ResultMetadata, RuntimeOverrides,
    SessionController, UploadClient, UploadOptions, ViewState, apply_runtime_overrides,
    config_path, init_logging, load_config, metadata_lines, save_config,
};
use terminal::TerminalRenderer;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Parse the process arguments and execute the selected command.
pub async fn run() -> Result<(), String> {
    dispatch(Cli::parse()).await
}

pub async fn dispatch(cli: Cli) -> Result<(), String> {
    let mut overrides = cli.global.to_runtime_overrides();
    if matches!(&cli.command, Command::Upload(args) if args.direct) {
        overrides.render_mode = Some(RenderMode::Direct);
    }

    match cli.command {
        Command::Config(cmd) => handle_config_command(cmd, overrides),
        Command::Presets => {
            print_presets();
            Ok(())
        }
        command => {
            let config = prepare_config(overrides);
            match init_logging(LoggingDestination::FileOnly) {
                Ok(Some(dir)) => info!(dir = %dir.display(), "Logging to file"),
                Ok(None) => {}
                Err(err) => eprintln!("Warning: {err}"),
            }
            run_command(command, config).await
        }
    }
}

/// Load `config.toml`, then layer environment and command-line overrides.
fn prepare_config(cli_overrides: RuntimeOverrides) -> ClientConfig {
    let loaded = load_config();
    let mut warnings = loaded.warnings;
    let mut config = loaded.config;

    let env_overrides = RuntimeOverrides::from_env(&mut warnings);
    let overrides = env_overrides.merged_with(cli_overrides);
    if !overrides.is_empty() {
        apply_runtime_overrides(&mut config, &overrides, &mut warnings);
    }
    for warning in warnings {
        eprintln!("Warning: {warning}");
    }
    config
}

async fn run_command(command: Command, config: ClientConfig) -> Result<(), String> {
    let api = ApiClient::new(&config).map_err(|err| err.to_string())?;
    match command {
        Command::Upload(args) => handle_upload(args, api, &config).await,
        Command::Status(args) => {
            let id = JobId::new(args.id);
            if args.watch {
                follow_job(api, &config, id).await
            } else {
                print_status(&api, &id).await
            }
        }
        Command::Watch(args) => {
            let ids = args.ids.into_iter().map(JobId::new).collect();
            watch_jobs(api, &config, ids).await
        }
        Command::Retry(args) => retry_job(api, &config, JobId::new(args.id)).await,
        Command::Cancel(args) => {
            let id = JobId::new(args.id);
            let status = api.cancel(&id).await.map_err(|err| err.to_string())?;
            println!("Job {id}: {status}");
            Ok(())
        }
        Command::Download(args) => {
            let destination = resolve_output(args.output.as_deref())?;
            let id = JobId::new(args.id);
            let (path, bytes) = api
                .download(&id, &destination)
                .await
                .map_err(|err| err.to_string())?;
            println!("Saved {} ({bytes} bytes)", path.display());
            Ok(())
        }
        Command::Billing(cmd) => handle_billing_command(cmd, api).await,
        Command::Presets | Command::Config(_) => Ok(()),
    }
}

async fn handle_upload(
    args: UploadArgs,
    api: ApiClient,
    config: &ClientConfig,
) -> Result<(), String> {
    let choice = args.resolve()?;
    let options = UploadOptions {
        preset: choice.preset.unwrap_or(config.upload.default_preset),
        mode: choice.mode.unwrap_or(config.upload.default_mode),
        custom_target: choice.custom_target,
    };
    let path = shellexpand::tilde(&args.file).into_owned();

    let uploader = UploadClient::new(api.clone(), config.account.tier);
    let mut controller =
        SessionController::new(Arc::new(api), uploader, config, TerminalRenderer::new());
    controller.session_mut().set_options(options);
    controller.select_file(&path).map_err(|err| err.to_string())?;

    if let Err(err) = controller.submit().await {
        controller.renderer().clear();
        return Err(err.to_string());
    }
    let interrupt = interrupt_on_ctrl_c();
    controller.run(&interrupt).await;
    settle(&controller)
}

/// Attach to an existing job and render it until it finishes.
///
/// Ctrl-C only stops watching; the job is never cancelled from here.
async fn follow_job(api: ApiClient, config: &ClientConfig, id: JobId) -> Result<(), String> {
    let snapshot = api.status(&id).await.map_err(|err| err.to_string())?;
    if snapshot.status.is_terminal() {
        print_snapshot(
            &id,
            &snapshot.status,
            snapshot.error.as_deref(),
            &snapshot.metadata(),
        );
        return Ok(());
    }

    let uploader = UploadClient::new(api.clone(), config.account.tier);
    let mut controller =
        SessionController::new(Arc::new(api), uploader, config, TerminalRenderer::new());
    controller
        .resume(id, config.upload.default_mode)
        .map_err(|err| err.to_string())?;

    let interrupt = interrupt_on_ctrl_c();
    controller.watch(&interrupt).await;
    settle(&controller)
}

async fn watch_jobs(api: ApiClient, config: &ClientConfig, ids: Vec<JobId>) -> Result<(), String> {
    let mut board = JobBoard::new(Arc::new(api), PollSettings::from_config(config));
    for id in ids {
        match board.track(id.clone(), config.upload.default_mode).await {
            Ok(row) => print_row(row),
            Err(err) => eprintln!("Job {id}: {err}"),
        }
    }
    drain_board(&mut board).await;
    summarize(board.rows())
}

async fn retry_job(api: ApiClient, config: &ClientConfig, id: JobId) -> Result<(), String> {
    let mut board = JobBoard::new(Arc::new(api), PollSettings::from_config(config));
    let row = board
        .track(id.clone(), config.upload.default_mode)
        .await
        .map_err(|err| err.to_string())?;
    if !row.can_retry() {
        return Err(format!(
            "Job {id} is {}; only failed jobs can be retried.",
            row.status
        ));
    }
    let status = board.retry(&id).await.map_err(|err| err.to_string())?;
    println!("Job {id}: retry accepted ({status})");
    drain_board(&mut board).await;
    summarize(board.rows())
}

/// Print row changes until every tracked job settles or Ctrl-C is pressed.
async fn drain_board(board: &mut JobBoard<ApiClient>) {
    let interrupt = interrupt_on_ctrl_c();
    tokio::select! {
        _ = board.run_until_idle(print_row) => {}
        _ = interrupt.cancelled() => {
            warn!("Interrupted while watching jobs");
            eprintln!("Stopped watching; jobs keep running on the server.");
        }
    }
    board.stop_all();
}

fn summarize(rows: &[JobRow]) -> Result<(), String> {
    let failed = rows
        .iter()
        .filter(|row| row.status == JobStatus::Failed)
        .count();
    if failed > 0 {
        return Err(format!("{failed} of {} job(s) failed", rows.len()));
    }
    Ok(())
}

async fn print_status(api: &ApiClient, id: &JobId) -> Result<(), String> {
    let snapshot = api.status(id).await.map_err(|err| err.to_string())?;
    print_snapshot(id, &snapshot.status, snapshot.error.as_deref(), &snapshot.metadata());
    if let Some(progress) = snapshot.authoritative_progress() {
        println!("  Progress: {progress:.0}%");
    }
    Ok(())
}

fn print_snapshot(
    id: &JobId,
    status: &JobStatus,
    error: Option<&str>,
    metadata: &ResultMetadata,
) {
    println!("Job {id}: {status}");
    if let Some(error) = error {
        println!("  Error: {error}");
    }
    for line in metadata_lines(metadata) {
        println!("  {line}");
    }
}

fn print_row(row: &JobRow) {
    let time = row
        .updated_at
        .with_timezone(&chrono::Local)
        .format("%H:%M:%S");
    match row.error.as_deref() {
        Some(error) => println!("[{time}] {:<12} {:<10} {error}", row.id, row.status),
        None => println!(
            "[{time}] {:<12} {:<10} {:>3.0}%  {}",
            row.id, row.status, row.percent, row.message
        ),
    }
}

/// Report how an interactive session ended.
fn settle(controller: &SessionController<ApiClient, TerminalRenderer>) -> Result<(), String> {
    match controller.view() {
        ViewState::Error { message } => Err(message.clone()),
        ViewState::Processing { job_id, .. } => {
            controller.renderer().clear();
            eprintln!("Stopped watching; job {job_id} keeps running on the server.");
            eprintln!("  Check on it with: lmix status {job_id} --watch");
            Ok(())
        }
        _ => Ok(()),
    }
}

fn interrupt_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    token
}

fn resolve_output(output: Option<&str>) -> Result<PathBuf, String> {
    match output {
        Some(raw) => shellexpand::full(raw)
            .map(|expanded| PathBuf::from(expanded.as_ref()))
            .map_err(|err| format!("Invalid output path '{raw}': {err}")),
        None => std::env::current_dir().map_err(|err| err.to_string()),
    }
}

fn print_presets() {
    println!("Preset      Target      Description");
    for preset in Preset::ALL {
        let target = preset
            .target_lufs()
            .map(|lufs| format!("{lufs} LUFS"))
            .unwrap_or_else(|| "--lufs".to_string());
        println!(
            "{name:<10}  {target:<10}  {description}",
            name = preset.as_str(),
            description = preset.description()
        );
    }
    println!();
    println!(
        "Modes: {} (fast), {} (precise). Custom targets require a premium plan.",
        ProcessingMode::Fast.display_name(),
        ProcessingMode::Precise.display_name()
    );
}

async fn handle_billing_command(cmd: BillingCommand, api: ApiClient) -> Result<(), String> {
    let billing = BillingClient::new(api);
    let (url, open) = match cmd {
        BillingCommand::Portal { open } => (
            billing.portal_url().await.map_err(|err| err.to_string())?,
            open,
        ),
        BillingCommand::Checkout {
            plan,
            interval,
            open,
        } => (
            billing
                .checkout_url(&plan, interval)
                .await
                .map_err(|err| err.to_string())?,
            open,
        ),
    };
    println!("{url}");
    if open {
        open::that(&url).map_err(|err| format!("Failed to open browser: {err}"))?;
    }
    Ok(())
}

fn handle_config_command(cmd: ConfigCommand, overrides: RuntimeOverrides) -> Result<(), String> {
    match cmd {
        ConfigCommand::Path => {
            println!("{}", config_path().display());
            Ok(())
        }
        ConfigCommand::Show => {
            let config = prepare_config(overrides);
            let rendered = toml::to_string_pretty(&config).map_err(|err| err.to_string())?;
            print!("{rendered}");
            Ok(())
        }
        ConfigCommand::Init { force } => {
            if config_path().exists() && !force {
                return Err(format!(
                    "{} already exists; pass --force to overwrite it.",
                    config_path().display()
                ));
            }
            let path = save_config(&ClientConfig::default()).map_err(|err| err.to_string())?;
            println!("Wrote {}", path.display());
            Ok(())
        }
    }
}
