//! droid-lane CLI.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::error;

use droid_lane::pipeline::scaffold::CopyScaffolder;
use droid_lane::{
    logging, progress, BuildGovernor, BuildJob, BuildRequest, BuildService, LaneConfig, LaneError,
    LaneResult, ProjectKind, TemplateSpec,
};

#[derive(Parser)]
#[command(name = "droid-lane", about = "Supervised build lane for Android app packaging")]
struct Cli {
    /// Path to a droid-lane.toml config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one build to completion and print the published artifact path.
    Build {
        /// Stable requester identity (the admission key).
        #[arg(long)]
        requester: String,

        /// What kind of build to run.
        #[arg(long, value_enum)]
        kind: BuildKind,

        /// Uploaded project archive (required for the zip kinds).
        #[arg(long)]
        source: Option<PathBuf>,

        /// App/artifact name.
        #[arg(long)]
        name: String,

        /// Wrapped site URL (required for the template kind).
        #[arg(long)]
        url: Option<String>,
    },

    /// Re-run failure extraction over a saved build log.
    ExplainFailure {
        /// Path to the build log (or `.error` dump).
        log: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum BuildKind {
    /// Scaffold from the configured project template.
    Template,
    /// Uploaded Flutter project ZIP.
    FlutterZip,
    /// Uploaded Gradle project ZIP.
    GradleZip,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.log_level.as_deref());

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::from(e.exit_code().clamp(0, 255) as u8)
        }
    }
}

fn run(cli: Cli) -> LaneResult<()> {
    let config = LaneConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Build {
            requester,
            kind,
            source,
            name,
            url,
        } => {
            let job = build_job(kind, source, name, url)?;
            run_build(config, BuildRequest { requester, job })
        }
        Commands::ExplainFailure { log } => {
            let output = std::fs::read_to_string(&log)?;
            let summary = lane_classifier::extract_failure_summary(&output, &Default::default());
            println!("{summary}");
            Ok(())
        }
    }
}

fn build_job(
    kind: BuildKind,
    source: Option<PathBuf>,
    name: String,
    url: Option<String>,
) -> LaneResult<BuildJob> {
    match kind {
        BuildKind::Template => {
            let site_url = url.ok_or_else(|| {
                LaneError::Config("--url is required for template builds".to_string())
            })?;
            Ok(BuildJob::Templated {
                spec: TemplateSpec {
                    app_name: name,
                    site_url,
                },
            })
        }
        BuildKind::FlutterZip | BuildKind::GradleZip => {
            let archive = source.ok_or_else(|| {
                LaneError::Config("--source is required for zip builds".to_string())
            })?;
            let project_kind = match kind {
                BuildKind::FlutterZip => ProjectKind::Flutter,
                _ => ProjectKind::Gradle,
            };
            Ok(BuildJob::Archive {
                kind: project_kind,
                archive,
                label: name,
            })
        }
    }
}

fn run_build(config: LaneConfig, request: BuildRequest) -> LaneResult<()> {
    let governor = Arc::new(BuildGovernor::from_config(&config));
    let _watchdog = governor.spawn_watchdog(config.watchdog_period());

    let template_dir = config
        .template_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("template"));
    let scaffolder = Arc::new(CopyScaffolder::new(template_dir));
    let service = BuildService::new(config, Arc::clone(&governor), scaffolder);

    // Ctrl-C requests a kill; the supervisor notices on its next poll.
    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        ctrlc::set_handler(move || {
            eprintln!("interrupt received, stopping build");
            cancel.store(true, Ordering::SeqCst);
        })
        .map_err(|e| LaneError::Config(format!("cannot install signal handler: {e}")))?;
    }

    let (progress_tx, progress_rx) = progress::channel();
    let printer = thread::spawn(move || {
        for line in progress_rx {
            println!("[build] {line}");
        }
    });

    let result = service.submit_with_cancel(&request, progress_tx, cancel);
    // Sender side is gone once the build returns; the printer drains and exits.
    drop(service);
    let _ = printer.join();

    let artifact = result?;
    println!("{}", artifact.display());
    Ok(())
}
