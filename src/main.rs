use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use discdup::config::AppConfig;
use discdup::context::AppContext;
use discdup::core::progress::format_duration;
use discdup::core::{
    CopyJob, CopyMode, DriveCandidate, JobEvent, Orchestrator, ProgressReport, TranscodeRequest,
    TransferStatus, transcode_title,
};
use discdup::logging::{self, LogConfig};
use discdup::settings::Settings;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{info, warn};

const DISCLAIMER: &str = "\
discdup does not remove or bypass any copy protection (CSS, AACS or similar).
Only copy discs you own and are legally allowed to back up, such as home
recordings or educational material. It is intended for personal and
educational use.";

#[derive(Parser)]
#[command(name = "discdup")]
#[command(about = "Back up DVDs as a disc image or a folder", version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Log as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Use drives from `simulated_drives` in the config instead of hardware
    #[arg(long, global = true)]
    simulation: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List candidate DVD drives
    Drives,
    /// Show the raw device and mount point used for a drive
    Resolve { drive: String },
    /// Copy a disc
    Copy(CopyArgs),
    /// Convert the VOB files in a copied disc folder into one file
    Transcode(TranscodeArgs),
    /// Print the effective configuration as TOML
    Config,
    /// Show the activity log
    Log,
    /// Show the usage disclaimer
    About,
}

#[derive(Args)]
struct CopyArgs {
    /// Drive to copy from; defaults to the last used or first detected drive
    #[arg(long)]
    drive: Option<String>,

    /// Image file (image mode) or folder (tree mode); defaults to the last used
    #[arg(long)]
    dest: Option<PathBuf>,

    #[arg(long, value_enum)]
    mode: Option<CopyMode>,

    /// Convert the copied VOB files into one file afterwards (tree mode)
    #[arg(long)]
    transcode: bool,

    /// Copy streams instead of re-encoding when converting
    #[arg(long)]
    stream_copy: bool,

    /// Hash while copying and check the result
    #[arg(long)]
    verify: bool,

    /// Accept the usage disclaimer
    #[arg(long)]
    accept_disclaimer: bool,
}

#[derive(Args)]
struct TranscodeArgs {
    /// Copied disc folder containing VIDEO_TS
    dir: PathBuf,

    #[arg(long)]
    output: Option<PathBuf>,

    #[arg(long)]
    stream_copy: bool,
}

/// Flags layered over the file and environment; unset flags are omitted.
#[derive(Serialize, Default)]
struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    verbose: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    json_logs: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    simulation: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    verify: Option<bool>,
}

impl ConfigOverrides {
    fn from_cli(cli: &Cli) -> Self {
        let verify = match &cli.command {
            Commands::Copy(args) => args.verify,
            _ => false,
        };
        Self {
            verbose: cli.verbose.then_some(true),
            json_logs: cli.json_logs.then_some(true),
            simulation: cli.simulation.then_some(true),
            verify: verify.then_some(true),
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let overrides = ConfigOverrides::from_cli(&cli);
    let config = AppConfig::new(Some(&overrides), cli.config.as_deref())?;
    logging::init(LogConfig {
        json: config.json_logs,
        verbose: config.verbose,
    });

    let ctx = AppContext::new(config);

    match cli.command {
        Commands::Drives => run_drives(&ctx),
        Commands::Resolve { drive } => run_resolve(&ctx, &drive),
        Commands::Copy(args) => run_copy(ctx, args)
            .await
            .context("Copy did not complete"),
        Commands::Transcode(args) => run_transcode(&ctx, args).await,
        Commands::Config => {
            print!("{}", ctx.config.to_toml()?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Log => run_log(&ctx),
        Commands::About => {
            println!("discdup {}\n\n{}", env!("CARGO_PKG_VERSION"), DISCLAIMER);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_drives(ctx: &AppContext) -> Result<ExitCode> {
    for drive in ctx.adapter.list_drives() {
        println!("{}", drive);
    }
    Ok(ExitCode::SUCCESS)
}

fn run_resolve(ctx: &AppContext, drive: &str) -> Result<ExitCode> {
    let drive = DriveCandidate::new(drive);
    println!("device: {}", ctx.adapter.raw_device_path(&drive).display());
    match ctx.adapter.mount_point(&drive) {
        Some(mount) => println!("mount:  {}", mount.display()),
        None => println!("mount:  (not mounted)"),
    }
    Ok(ExitCode::SUCCESS)
}

fn run_log(ctx: &AppContext) -> Result<ExitCode> {
    let path = &ctx.config.activity_log_path;
    match std::fs::read_to_string(path) {
        Ok(content) => {
            println!("{}\n", path.display());
            print!("{}", content);
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            println!("No activity yet ({})", path.display());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", path.display()));
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Pick the drive to copy from: explicit, then last used if still present,
/// then the first detected.
fn choose_drive(
    ctx: &AppContext,
    requested: Option<String>,
    settings: &Settings,
) -> Result<DriveCandidate> {
    if let Some(drive) = requested {
        return Ok(DriveCandidate::new(drive));
    }

    let drives = ctx.adapter.list_drives();
    if let Some(last) = &settings.last_drive {
        if let Some(drive) = drives.iter().find(|d| d.as_str() == last) {
            return Ok(drive.clone());
        }
    }
    match drives.into_iter().next() {
        Some(drive) if !drive.is_none_found() => Ok(drive),
        _ => bail!("No DVD drive detected. Pass --drive to choose one"),
    }
}

fn bar_style() -> Result<ProgressStyle> {
    Ok(ProgressStyle::default_bar()
        .template("[{elapsed_precise}] [{bar:40.green/black}] {wide_msg}")?
        .progress_chars("■ "))
}

fn spinner_style() -> Result<ProgressStyle> {
    Ok(ProgressStyle::default_spinner().template("{spinner} [{elapsed_precise}] {wide_msg}")?)
}

async fn run_copy(ctx: AppContext, args: CopyArgs) -> Result<ExitCode> {
    let mut settings = ctx.settings.load();
    if !settings.acknowledged {
        if !args.accept_disclaimer {
            eprintln!("{}\n", DISCLAIMER);
            bail!("Re-run with --accept-disclaimer to confirm you accept these terms");
        }
        settings.acknowledged = true;
    }

    let drive = choose_drive(&ctx, args.drive, &settings)?;
    let mode = args.mode.or(settings.last_mode).unwrap_or(CopyMode::Tree);
    let Some(destination) = args.dest.or_else(|| settings.last_destination.clone()) else {
        bail!("No destination given. Pass --dest with an image file or folder");
    };

    settings.last_drive = Some(drive.to_string());
    settings.last_destination = Some(destination.clone());
    settings.last_mode = Some(mode);
    if let Err(e) = ctx.settings.save(&settings) {
        warn!(error = %e, "Failed to save settings");
    }

    let orchestrator = Orchestrator::new(ctx);
    let source = orchestrator.source_for(&drive, mode);
    let mut job = CopyJob::new(source, &destination, mode);
    if args.transcode {
        job = job.with_transcode(TranscodeRequest {
            output: None,
            stream_copy: args.stream_copy,
        });
    }

    info!(job_id = %job.id, drive = %drive, mode = %mode, "Starting copy");
    let mut handle = orchestrator.start(job)?;

    let cancel = handle.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling...");
            cancel.cancel();
        }
    });

    let bar = ProgressBar::no_length();
    bar.set_style(bar_style()?);
    let mut spinner: Option<ProgressBar> = None;

    while let Some(event) = handle.next_event().await {
        match event {
            JobEvent::Started { source, destination, .. } => {
                bar.println(format!("Copying {} -> {}", source.display(), destination.display()));
            }
            JobEvent::Transfer(TransferStatus::InProgress(sample)) => {
                if let Some(total) = sample.total_bytes {
                    bar.set_length(total);
                }
                bar.set_position(sample.bytes_copied);
                bar.set_message(ProgressReport::from_sample(&sample).to_string());
            }
            JobEvent::Transfer(TransferStatus::FileFailed(failure)) => {
                bar.println(format!(
                    "Failed to copy {}: {}",
                    failure.relative_path.display(),
                    failure.message
                ));
            }
            JobEvent::TranscodeStarted { output, files } => {
                bar.finish();
                let pb = ProgressBar::new_spinner();
                pb.set_style(spinner_style()?);
                pb.enable_steady_tick(Duration::from_millis(120));
                pb.set_message(format!("Converting {} file(s) to {}", files, output.display()));
                spinner = Some(pb);
            }
            JobEvent::TranscodeProgress(position) => {
                if let Some(pb) = &spinner {
                    pb.set_message(format!("Encoded {}", format_duration(position.as_secs())));
                }
            }
        }
    }
    bar.finish();
    if let Some(pb) = &spinner {
        pb.finish_and_clear();
    }

    let summary = handle.wait().await?;
    let transfer = match summary.result {
        Ok(transfer) => transfer,
        Err(e) => {
            if e.is_access_denied() && mode == CopyMode::Image {
                eprintln!("Hint: discdup copy --mode tree --dest <folder> copies the mounted files instead.");
            }
            return Err(e.into());
        }
    };

    println!("{}", transfer.summary());
    if transfer.is_cancelled() {
        if let Some(sample) = orchestrator.context().progress.latest().await {
            println!("Stopped at {}", ProgressReport::from_sample(&sample));
        }
        println!("Partial output left at {}", destination.display());
        return Ok(ExitCode::from(130));
    }

    match summary.transcode {
        Some(Ok(path)) => println!("Converted to {}", path.display()),
        Some(Err(e)) => eprintln!("Conversion failed: {}", e),
        None => {}
    }

    if transfer.failures.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(2))
    }
}

async fn run_transcode(ctx: &AppContext, args: TranscodeArgs) -> Result<ExitCode> {
    let mut config = ctx.config.transcode.clone();
    if args.stream_copy {
        config.reencode = false;
    }
    let output = args
        .output
        .unwrap_or_else(|| args.dir.join(&config.output_name));

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(spinner_style()?);
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner.set_message(format!("Converting {}", args.dir.display()));

    let pb = spinner.clone();
    let dir = args.dir.clone();
    let result = tokio::task::spawn_blocking(move || {
        transcode_title(&dir, &output, &config, &mut |position| {
            pb.set_message(format!("Encoded {}", format_duration(position.as_secs())));
        })
    })
    .await
    .context("Transcode worker stopped unexpectedly")?;
    spinner.finish_and_clear();

    let path = result?;
    ctx.activity
        .record(&format!("Transcode complete: {}", path.display()));
    println!("Converted to {}", path.display());
    Ok(ExitCode::SUCCESS)
}
