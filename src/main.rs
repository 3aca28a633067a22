// LogBoop - main.rs
//
// Application entry point. Handles:
// 1. CLI argument parsing
// 2. Config loading (explicit --config path or the platform default)
// 3. Logging initialisation (debug mode support)
// 4. Ctrl+C handling (finish in-flight lineages, start no new ones)
// 5. Pipeline run and summary output
//
// Exit codes: 0 every lineage committed or skipped, 1 at least one lineage
// failed, 2 usage or setup error (nothing was processed).

use clap::Parser;
use logboop::app::{pipeline, report};
use logboop::platform::config::{self, AppConfig, PlatformPaths};
use logboop::platform::fs::RealFs;
use logboop::util::error::{ConfigError, DiscoveryError, LogBoopError, Result};
use logboop::util::{constants, logging};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const EXIT_SETUP: i32 = 2;

/// LogBoop - parse, split, and destroy rotated log files.
///
/// Every rotation lineage under INPUT is read oldest first, split into
/// per-stream files under OUTPUT (mirroring the input tree), and its input
/// files are deleted once the output is durably written.
#[derive(Parser, Debug)]
#[command(name = "logboop", version, about)]
struct Cli {
    /// Directory tree containing rotated log files.
    input: PathBuf,

    /// Output root (created if missing).
    #[arg(default_value = constants::DEFAULT_OUTPUT_DIR)]
    output: PathBuf,

    /// Config file (defaults to the platform config directory).
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Worker threads (0 = one per CPU core).
    #[arg(short = 'j', long = "workers")]
    workers: Option<usize>,

    /// Keep input files after a successful commit.
    #[arg(long = "keep-input")]
    keep_input: bool,

    /// Print the run summary as JSON on stdout.
    #[arg(long = "json")]
    json: bool,

    /// Enable debug logging (equivalent to RUST_LOG=debug).
    #[arg(short = 'd', long = "debug")]
    debug: bool,
}

fn main() {
    let cli = Cli::parse();

    let (mut app_config, config_warnings) = match load_app_config(cli.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(EXIT_SETUP);
        }
    };

    logging::init(
        cli.debug,
        app_config.log_level.as_deref(),
        app_config.log_file.as_deref(),
    );
    tracing::info!(
        version = constants::APP_VERSION,
        debug = cli.debug,
        "LogBoop starting"
    );
    for warning in &config_warnings {
        tracing::warn!(warning = %warning, "Config warning");
    }

    if let Err(e) = prepare_roots(&cli.input, &cli.output) {
        tracing::error!(error = %e, "Setup failed");
        eprintln!("Error: {e}");
        std::process::exit(EXIT_SETUP);
    }

    // CLI overrides
    if let Some(workers) = cli.workers {
        if workers > constants::MAX_WORKER_THREADS {
            tracing::warn!(
                requested = workers,
                max = constants::MAX_WORKER_THREADS,
                "Worker count clamped"
            );
        }
        app_config.worker_threads = workers.min(constants::MAX_WORKER_THREADS);
    }
    if cli.keep_input {
        app_config.delete_input = false;
    }

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        if let Err(e) = ctrlc::set_handler(move || {
            cancel.store(true, Ordering::SeqCst);
            tracing::warn!("Interrupt received; finishing in-flight lineages");
        }) {
            tracing::warn!(error = %e, "Could not install Ctrl+C handler");
        }
    }

    let settings = pipeline::PipelineSettings::from_config(&app_config, cli.input, cli.output);
    let summary = match pipeline::run(&settings, &RealFs, &report::TracingSink, &cancel) {
        Ok(summary) => summary,
        Err(e) => {
            tracing::error!(error = %e, "Run aborted");
            eprintln!("Error: {e}");
            std::process::exit(EXIT_SETUP);
        }
    };

    if cli.json {
        match report::render_json(&summary) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialise summary");
                eprintln!("Error: cannot render summary: {e}");
            }
        }
    } else {
        print!("{}", report::render_text(&summary));
    }

    std::process::exit(summary.exit_code());
}

/// Load config from an explicit path (must exist) or the platform default
/// (absence means defaults).
fn load_app_config(explicit: Option<&Path>) -> Result<(AppConfig, Vec<String>)> {
    match explicit {
        Some(path) => match config::read_raw_config(path)? {
            Some(raw) => Ok(config::validate(raw)),
            None => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source: io::Error::new(io::ErrorKind::NotFound, "file does not exist"),
            }
            .into()),
        },
        None => {
            let paths = PlatformPaths::resolve();
            Ok(config::load_config(&paths.config_file()))
        }
    }
}

/// Check the input root and create the output root.
fn prepare_roots(input: &Path, output: &Path) -> Result<()> {
    if !input.exists() {
        return Err(DiscoveryError::RootNotFound {
            path: input.to_path_buf(),
        }
        .into());
    }
    if !input.is_dir() {
        return Err(DiscoveryError::NotADirectory {
            path: input.to_path_buf(),
        }
        .into());
    }
    if output.exists() && !output.is_dir() {
        return Err(LogBoopError::Io {
            path: output.to_path_buf(),
            operation: "prepare output root",
            source: io::Error::new(io::ErrorKind::AlreadyExists, "exists and is not a directory"),
        });
    }
    std::fs::create_dir_all(output).map_err(|source| LogBoopError::Io {
        path: output.to_path_buf(),
        operation: "create output root",
        source,
    })
}
