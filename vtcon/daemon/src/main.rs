//! vtcon Daemon
//!
//! Session lifecycle controller process. Builds the application stack (event
//! loop, signal watchers, symbol table, video and input contexts, VT
//! controller, terminal session), runs the dispatch loop until a termination
//! request, then tears everything down in reverse order.
//!
//! # Usage
//!
//! ```bash
//! # Simulated VT (default): runs anywhere, no VT capability needed
//! vtcon-daemon
//!
//! # Real kernel VT, allocated from the free pool
//! vtcon-daemon --kernel
//!
//! # Real kernel VT number 8, two headless displays
//! vtcon-daemon --kernel --vt 8 --displays 2
//!
//! # With verbose logging
//! RUST_LOG=debug vtcon-daemon
//! ```
//!
//! # Environment Variables
//!
//! - `VTCON_VT_MODE`: `kernel` or `simulated`
//! - `VTCON_VT`: fixed VT number for kernel mode
//! - `VTCON_DISPLAYS`: headless display count
//! - `RUST_LOG`: log level (trace, debug, info, warn, error)
//!
//! # Signals
//!
//! - SIGTERM/SIGINT: request shutdown (observed at the next loop iteration)
//! - SIGCHLD: reap exited children
//! - SIGUSR1/SIGUSR2: VT release/acquire; in simulated mode these drive
//!   LEAVE/ENTER directly, so a backgrounded session can be exercised with
//!   plain `kill`
//!
//! # Exit Codes
//!
//! 0 on clean shutdown (including a VT- or session-requested close);
//! non-zero on any setup or dispatch failure.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use vtcon_core::{
    Application, Config, HeadlessBackend, KernelVt, SessionBackend, SimVt, VtDevice, VtError,
    VtMode,
};

/// Session lifecycle controller for VT-hosted display sessions.
#[derive(Parser, Debug)]
#[command(name = "vtcon-daemon", version, about)]
struct Cli {
    /// Config file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Run on a real kernel VT
    #[arg(long)]
    kernel: bool,

    /// Run on the simulated VT (the default)
    #[arg(long, conflicts_with = "kernel")]
    simulate: bool,

    /// Fixed VT number for kernel mode; allocated from the free pool when
    /// omitted
    #[arg(long, value_name = "N")]
    vt: Option<u16>,

    /// Headless display count
    #[arg(long, value_name = "COUNT")]
    displays: Option<u32>,
}

/// Set up, run, and tear down one session over the given VT device.
fn run_session<B, D, F>(backend: &mut B, open_vt: F) -> anyhow::Result<()>
where
    B: SessionBackend,
    D: VtDevice + 'static,
    F: FnOnce() -> Result<D, VtError>,
{
    let mut app = Application::setup(backend, open_vt).context("session setup failed")?;

    info!("starting main loop");
    let result = app.run();
    info!("stopping main loop");

    // Teardown always runs, dispatch error or not.
    app.teardown();
    result.context("event dispatch failed")?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("vtcon_core=info".parse()?)
                .add_directive("vtcon_daemon=info".parse()?),
        )
        .with_target(true)
        .init();

    info!(pid = std::process::id(), "vtcon daemon starting");

    let mut config = Config::default();
    if let Some(path) = &cli.config {
        let file = vtcon_core::load_config(path)?;
        config.apply_file(&file);
    }
    config.apply_env();
    if cli.kernel {
        config.vt_mode = VtMode::Kernel;
    }
    if cli.simulate {
        config.vt_mode = VtMode::Simulated;
    }
    if let Some(vt) = cli.vt {
        config.vt_number = Some(vt);
    }
    if let Some(displays) = cli.displays {
        config.displays = displays;
    }

    let mut backend = HeadlessBackend::new(config.displays);
    let result = match config.vt_mode {
        VtMode::Kernel => {
            let number = config.vt_number;
            info!(vt = ?number, "running on a kernel VT");
            run_session(&mut backend, move || KernelVt::open(number))
        }
        VtMode::Simulated => {
            info!("running on a simulated VT");
            run_session(&mut backend, || Ok(SimVt::new()))
        }
    };

    match &result {
        Ok(()) => info!("vtcon daemon terminating"),
        Err(err) => tracing::error!(error = ?err, "vtcon daemon failed"),
    }
    result
}
