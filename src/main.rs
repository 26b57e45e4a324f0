mod config;
mod failure;
mod input;
mod ring_buffer;
mod runner;
mod scheduler;
mod signals;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use config::{ConfigError, FileConfig, Mode, Overrides, Settings};
use input::ReaderLines;
use ring_buffer::RingBuffer;
use runner::ShellRunner;
use scheduler::Scheduler;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Run a watch command periodically and fire an action command once it has
/// failed a number of times in a row, then back off before firing again.
///
/// Both commands are passed to `sh -c`, so pipes and redirection work.
/// With `-s`, stdin is kept in a rolling buffer of lines that is piped into
/// the watch command at each check.
#[derive(Parser, Debug)]
#[command(name = "keepwatch", version, about)]
pub struct Cli {
    /// Watch command; its exit code decides health
    #[arg(short = 'w', long = "watch", value_name = "COMMAND")]
    watch: Option<String>,

    /// Action command, run after repeated failures
    #[arg(short = 'a', long = "action", value_name = "COMMAND")]
    action: Option<String>,

    /// Seconds between checks [default: 30]
    #[arg(short = 'i', long = "interval", value_name = "SECS")]
    interval: Option<u64>,

    /// Consecutive failures before the action fires [default: 4]
    #[arg(short = 'c', long = "count", value_name = "N")]
    count: Option<u32>,

    /// Seconds to back off after the action fires [default: 14400]
    #[arg(short = 'b', long = "backoff", value_name = "SECS")]
    backoff: Option<u64>,

    /// Exit code that means healthy [default: 0]
    #[arg(
        short = 'e',
        long = "expect",
        value_name = "CODE",
        allow_negative_numbers = true
    )]
    expect: Option<i32>,

    /// Buffer this many stdin lines and pipe them into the watch command
    #[arg(short = 's', long = "stdin-lines", value_name = "LINES")]
    stdin_lines: Option<usize>,

    /// Verbosity: 0 silent, 1 normal, 10 debug [default: 1]
    #[arg(short = 'v', long = "verbosity", value_name = "LEVEL")]
    verbosity: Option<u8>,

    /// Kill watch and action commands running longer than this
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// TOML config file; flags override its values
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            watch_command: self.watch.clone(),
            action_command: self.action.clone(),
            interval_secs: self.interval,
            failure_threshold: self.count,
            backoff_secs: self.backoff,
            expected_ok_code: self.expect,
            stdin_buffer_lines: self.stdin_lines,
            verbosity: self.verbosity,
            timeout_secs: self.timeout,
        }
    }

    fn settings(&self) -> Result<Settings, ConfigError> {
        let file = match &self.config {
            Some(path) => config::load_file(path)?,
            None => FileConfig::default(),
        };
        Settings::resolve(file, self.overrides())
    }
}

fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::OFF,
        1..=9 => LevelFilter::INFO,
        _ => LevelFilter::DEBUG,
    }
}

fn init_logging(verbosity: u8) {
    let level = level_for(verbosity);
    let filter = if level == LevelFilter::OFF {
        EnvFilter::new("off")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::default().add_directive(level.into()))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

fn usage_error(message: impl std::fmt::Display) -> ExitCode {
    eprintln!("error: {message}\n");
    eprintln!("{}", Cli::command().render_usage());
    eprintln!("\nFor more information, try '--help'.");
    ExitCode::from(1)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                e.exit();
            }
            e.print().ok();
            return ExitCode::from(1);
        }
    };

    let settings = match cli.settings() {
        Ok(settings) => settings,
        Err(e) => return usage_error(e),
    };

    init_logging(settings.verbosity);
    tracing::debug!(?cli, "parsed CLI arguments");

    if cli.dry_run {
        println!("{settings}");
        return ExitCode::SUCCESS;
    }

    let runner = ShellRunner::new(settings.command_timeout);
    let mut scheduler = Scheduler::new(&settings, runner);

    let watch = async {
        match settings.mode() {
            Mode::Direct => scheduler.run_direct().await,
            Mode::Buffered { lines } => {
                scheduler
                    .run_buffered(ReaderLines::stdin(), RingBuffer::new(lines))
                    .await
            }
        }
    };

    let stop = async {
        match signals::shutdown_signal().await {
            Ok(signal) => signal,
            Err(e) => {
                tracing::warn!(error = %e, "cannot install signal handlers, stop with SIGKILL");
                std::future::pending::<signals::Shutdown>().await
            }
        }
    };

    tokio::select! {
        () = watch => {}
        signal = stop => {
            tracing::info!(signal = signal.name(), "shutting down");
        }
    }

    // The stdin reader may be parked in a blocking read that would stall
    // runtime shutdown.
    std::process::exit(0)
}
