//! `lasercal` – command line front end for laser pointing calibration.
//!
//! Subcommands:
//!
//! - `run <scan.toml> [--output path]` – assemble the bench described by the
//!   scan file and run the scan to completion.  Ctrl-C cancels the scan; the
//!   rows captured so far are still written.
//! - `devices <scan.toml>` – list the devices the scan file would use.
//! - `example` – print a sample scan file.

mod bench;
mod config;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::warn;

use lasercal_runtime::{CancelToken, ScanController, ScanOutcome, ScanReport, init_tracing};

#[derive(Parser, Debug)]
#[command(name = "lasercal")]
#[command(about = "Grid scans for laser pointing calibration")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scan described by a TOML file
    Run {
        /// Scan file
        scan: PathBuf,

        /// CSV destination, overriding `scan.output`
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the devices a scan file would use
    Devices {
        /// Scan file
        scan: PathBuf,
    },

    /// Print a sample scan file
    Example,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Hold the guard until exit so pending spans are flushed.
    let _guard = init_tracing("lasercal");

    let result = match args.command {
        Command::Run { scan, output } => run_scan(&scan, output),
        Command::Devices { scan } => list_devices(&scan),
        Command::Example => {
            print!("{}", config::EXAMPLE);
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// run
// ─────────────────────────────────────────────────────────────────────────────

fn run_scan(path: &Path, output: Option<PathBuf>) -> Result<(), String> {
    let mut file = config::load_from(path)?;
    if output.is_some() {
        file.scan.output = output;
    }
    let settings = file.scan.settings()?;
    let bench = bench::assemble(&file).map_err(|e| e.to_string())?;

    let token = CancelToken::new();
    let handler_token = token.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping scan …".yellow().bold());
        handler_token.cancel();
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; the scan cannot be cancelled");
    }

    let mut scan = ScanController::new(bench.axes, Box::new(bench.sensor), bench.output, settings)
        .with_cancel_token(token);

    println!(
        "  Scan {} on {} axis(es), tick {} ms",
        scan.id().to_string().bold(),
        scan.axes().len(),
        file.scan.tick().as_millis()
    );
    for axis in scan.axes() {
        println!(
            "    • {} ({}) {} point(s) in [{}, {}]",
            axis.name().bold(),
            axis.kind(),
            axis.points().len(),
            axis.min(),
            axis.max()
        );
    }

    // Runtime is created after tracing so the OTLP exporter never needs one.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to start async runtime: {}", e))?;
    let report = runtime
        .block_on(scan.run(file.scan.tick()))
        .map_err(|e| e.to_string())?;

    print_report(&report);
    // Remaining devices are put into a safe state here.
    drop(bench.registry);
    Ok(())
}

fn print_report(report: &ScanReport) {
    let outcome = match &report.outcome {
        ScanOutcome::Completed => "completed".green().bold(),
        ScanOutcome::Cancelled { step } => format!("cancelled at step {step}").yellow().bold(),
        ScanOutcome::Aborted { step, reason } => {
            format!("aborted at step {step}: {reason}").red().bold()
        }
    };
    println!();
    println!("  Scan {}", outcome);
    println!("    steps: {}", report.steps);
    println!("    rows:  {}", report.rows);
    match &report.path {
        Some(path) => println!("    saved: {}", path.display().to_string().bold()),
        None => println!("    {}", "no output file configured".dimmed()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// devices
// ─────────────────────────────────────────────────────────────────────────────

fn list_devices(path: &Path) -> Result<(), String> {
    let file = config::load_from(path)?;
    let registry = bench::registry_for(&file).map_err(|e| e.to_string())?;
    println!("  {} device(s):", registry.devices().len());
    for device in registry.devices() {
        println!("    • {:<20} {}", device.id.bold(), device.class.to_string().dimmed());
    }
    Ok(())
}
