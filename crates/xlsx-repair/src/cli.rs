//! Command-line surface for `xlsx-repair`.
//!
//! A background thread waits for Ctrl-C or SIGTERM. On a signal it removes the
//! scratch directory and any output or report temp file still being staged,
//! then exits with status 130. Files already renamed into place are kept.

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;

use crate::{repair_workbook_with, RepairOptions, SalvageStrategy};

/// Exit status when `--fail-on-corrupt` is set and corrupt parts were found.
const CORRUPT_EXIT_CODE: i32 = 2;
/// Conventional status for a process stopped by SIGINT.
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Parser, Debug)]
#[command(
    name = "xlsx-repair",
    about = "Detect corruption in an XLSX workbook and salvage damaged worksheets."
)]
pub struct Args {
    /// Workbook to inspect. It is never modified.
    file: PathBuf,

    /// Detect, analyze, and repackage only; leave malformed parts as they are.
    #[arg(long)]
    no_repair: bool,

    /// Write the diagnostic report to `<stem>_diagnostic.json` beside the input.
    #[arg(long, alias = "json-log")]
    json_report: bool,

    /// Output workbook (default: `<stem>_repaired.<ext>` beside the input).
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// How surviving rows are located in a damaged worksheet.
    #[arg(long, value_enum, default_value_t = SalvageStrategy::Auto)]
    salvage_strategy: SalvageStrategy,

    /// Exit with status 2 when any XML part was found corrupt.
    #[arg(long)]
    fail_on_corrupt: bool,

    /// Only log warnings and errors (`RUST_LOG` still takes precedence).
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn options(&self) -> RepairOptions {
        RepairOptions {
            repair: !self.no_repair,
            emit_report: self.json_report,
            output: self.output.clone(),
            salvage: self.salvage_strategy,
        }
    }
}

pub fn run() -> Result<()> {
    let args = Args::parse();
    run_with_args(args)
}

pub fn run_with_args(args: Args) -> Result<()> {
    init_logging(args.quiet);

    let temp_paths: TempPaths = Arc::new(Mutex::new(Vec::new()));
    install_interrupt_cleanup(Arc::clone(&temp_paths));

    let options = args.options();
    let result = repair_workbook_with(&args.file, &options, |path| {
        if let Ok(mut paths) = temp_paths.lock() {
            paths.push(path.to_path_buf());
        }
    });
    // Whatever the outcome, the run has already cleaned up after itself.
    if let Ok(mut paths) = temp_paths.lock() {
        paths.clear();
    }
    let outcome = result.with_context(|| format!("repair {}", args.file.display()))?;

    let corrupt = outcome.report.corrupt_count();
    if corrupt == 0 {
        log::info!("analysis complete, no corrupt parts found");
    } else {
        log::info!("analysis complete, {corrupt} corrupt part(s) found");
    }
    log::info!("output written to {}", outcome.output.display());

    if args.fail_on_corrupt && corrupt > 0 {
        std::process::exit(CORRUPT_EXIT_CODE);
    }
    Ok(())
}

fn init_logging(quiet: bool) {
    let default_filter = if quiet { "warn" } else { "info" };
    // A logger may already be installed when embedded; keep that one.
    let env = env_logger::Env::default().default_filter_or(default_filter);
    let _ = env_logger::Builder::from_env(env)
        .target(env_logger::Target::Stderr)
        .try_init();
}

type TempPaths = Arc<Mutex<Vec<PathBuf>>>;

/// Watch for Ctrl-C / SIGTERM on a background thread. On a signal, remove the
/// registered temp paths and exit with status 130.
fn install_interrupt_cleanup(temp_paths: TempPaths) {
    let spawned = thread::Builder::new()
        .name("xlsx-repair-signals".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    log::warn!("interrupt cleanup unavailable: {err}");
                    return;
                }
            };
            runtime.block_on(interrupt_signal());

            log::warn!("interrupted, cleaning up");
            let paths = temp_paths
                .lock()
                .map(|mut paths| std::mem::take(&mut *paths))
                .unwrap_or_default();
            remove_temp_paths(&paths);
            std::process::exit(INTERRUPTED_EXIT_CODE);
        });
    if let Err(err) = spawned {
        log::warn!("interrupt cleanup unavailable: {err}");
    }
}

/// Remove each path that still exists, directories recursively.
fn remove_temp_paths(paths: &[PathBuf]) {
    for path in paths {
        let removed = match fs::symlink_metadata(path) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
            Ok(_) => fs::remove_file(path),
            Err(_) => continue,
        };
        match removed {
            Ok(()) => log::info!("removed {}", path.display()),
            Err(err) => log::warn!("failed to remove {}: {err}", path.display()),
        }
    }
}

async fn interrupt_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            log::warn!("failed to install Ctrl-C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                log::warn!("failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
