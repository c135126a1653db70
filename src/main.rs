/*!
 * Lumen CLI - runs the display loop
 */

use clap::{Parser, ValueEnum};
use lumen::{
    config::{LogLevel, LumenConfig},
    context::{AppContext, Collaborators},
    error::{LumenError, Result, EXIT_RESTART, EXIT_SUCCESS},
    logging,
    orchestrator::{Orchestrator, RunExit},
    render::TerminalRenderer,
    restart,
    source::{connectivity_for, HttpConnector, HttpDataSource},
};
use lumen_core_resilience::CancelSignal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "lumen")]
#[command(version, about = "Always-on display loop with fetch retry and self-recovery", long_about = None)]
struct Cli {
    /// Configuration file (defaults to <config dir>/lumen/lumen.toml when present)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, value_enum)]
    log_level: Option<LogLevelArg>,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Write JSON logs to this file instead of stdout
    #[arg(long = "log-file", value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Run a single iteration and exit
    #[arg(long)]
    once: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    check_config: bool,

    /// Write the effective configuration to FILE and exit
    #[arg(long, value_name = "FILE")]
    write_config: Option<PathBuf>,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    if let Some(path) = &cli.write_config {
        config.to_file(path)?;
        println!("Configuration written to {}", path.display());
        return Ok(EXIT_SUCCESS);
    }
    if cli.check_config {
        config.validate()?;
        println!("Configuration OK");
        return Ok(EXIT_SUCCESS);
    }

    if let Err(e) = logging::init_logging(&config.logging) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }
    config.validate()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(config, cli.once))
}

fn load_config(cli: &Cli) -> Result<LumenConfig> {
    let mut config = match &cli.config {
        Some(path) => LumenConfig::from_file(path)?,
        None => match LumenConfig::default_path().filter(|path| path.exists()) {
            Some(path) => LumenConfig::from_file(&path)?,
            None => LumenConfig::default(),
        },
    };

    if let Some(level) = cli.log_level {
        config.logging.level = level.into();
    }
    if cli.verbose {
        config.logging.verbose = true;
    }
    if let Some(file) = &cli.log_file {
        config.logging.file = Some(file.clone());
    }
    Ok(config)
}

async fn serve(config: LumenConfig, once: bool) -> Result<i32> {
    let cancel = CancelSignal::with_slice(Duration::from_millis(config.cycle.wait_slice_ms));
    let restart_delay = Duration::from_secs(config.restart.delay_secs);

    let source = HttpDataSource::new(&config.api)?;
    let parts = Collaborators::new(
        Arc::new(HttpConnector::new(&config.api)),
        Arc::new(source),
        Box::new(TerminalRenderer::stdout(&config.render)),
    )
    .with_connectivity(connectivity_for(&config.connection))
    .with_cancel(cancel.clone());

    let mut orchestrator = Orchestrator::new(AppContext::new(config, parts));
    if once {
        orchestrator = orchestrator.with_max_cycles(1);
    }

    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping");
            signal.cancel();
        }
    });

    let exit = orchestrator.run().await;
    orchestrator.context_mut().shutdown().await;

    match exit {
        RunExit::Shutdown => Ok(EXIT_SUCCESS),
        RunExit::Restart(reason) => {
            warn!(%reason, delay_secs = restart_delay.as_secs(), "Restarting");
            if cancel.sleep(restart_delay).await.is_err() {
                return Ok(EXIT_SUCCESS);
            }
            let err: LumenError = restart::restart_process();
            error!(error = %err, "Re-exec failed, leaving the restart to the supervisor");
            Ok(EXIT_RESTART)
        }
    }
}
