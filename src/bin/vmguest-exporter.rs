//! vmguest-exporter - VMware guest metrics for the node-exporter textfile
//! collector.
//!
//! Runs one sampling pass against the vSphere Guest API and writes the
//! result as a Prometheus textfile, then exits. Scheduling repeated runs is
//! the job of cron or a systemd timer.

use std::path::PathBuf;

use clap::Parser;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

use vmguest_exporter::export;
use vmguest_exporter::guestlib::NativeGuestLib;
use vmguest_exporter::rates::SAMPLE_INTERVAL;
use vmguest_exporter::session::Session;
use vmguest_exporter::snapshot;

/// VMware guest metrics exporter for the node-exporter textfile collector.
#[derive(Parser)]
#[command(
    name = "vmguest-exporter",
    about = "VMware guest metrics for the node-exporter textfile collector",
    version
)]
struct Args {
    /// Path to file with metrics.
    #[arg(short, long, default_value = "/etc/node-exporter/vmware.prom")]
    output_file: PathBuf,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Initializes the tracing subscriber with the appropriate log level.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("vmguest_exporter={}", level).parse().unwrap());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let lib = NativeGuestLib::load()?;
    let mut session = Session::open(lib)?;

    let snap = snapshot::collect(&mut session, SAMPLE_INTERVAL)?;
    export::write_textfile(&snap, &args.output_file)?;
    info!(
        "Snapshot written to {}: cpu_used={}%, cpu_stolen={}%, effective={}MHz",
        args.output_file.display(),
        snap.cpu_used_percent,
        snap.cpu_stolen_percent,
        snap.effective_mhz
    );

    session.close()?;
    Ok(())
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    info!("vmguest-exporter {} starting", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(&args) {
        error!("Sampling pass failed: {}", e);
        std::process::exit(1);
    }
}
