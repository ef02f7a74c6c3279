// casket/src/main.rs
use std::fs;
use std::process;

use casket_common::config::Config;
use casket_common::error::{CasketError, Result as CasketResult};
use clap::Parser;
use colored::Colorize;
use tracing::level_filters::LevelFilter;
use tracing::{debug, error};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::CliArgs;

fn init_logging(config: &Config, verbose: u8) {
    let level_filter = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let max_log_level = level_filter.into_level().unwrap_or(tracing::Level::INFO);

    let env_filter = EnvFilter::builder()
        .with_default_directive(level_filter.into())
        .with_env_var("CASKET_LOG")
        .from_env_lossy();

    let log_dir = config.logs_dir();
    if verbose > 0 {
        match fs::create_dir_all(&log_dir) {
            Ok(()) => {
                let file_appender = tracing_appender::rolling::daily(&log_dir, "casket.log");
                let (non_blocking_appender, guard) = tracing_appender::non_blocking(file_appender);

                let stderr_writer = std::io::stderr.with_max_level(max_log_level);
                let file_writer = non_blocking_appender.with_max_level(max_log_level);

                let _ = tracing_subscriber::fmt()
                    .with_env_filter(env_filter)
                    .with_writer(stderr_writer.and(file_writer))
                    .with_ansi(true)
                    .without_time()
                    .try_init();

                Box::leak(Box::new(guard));
                debug!(
                    "Verbose logging enabled. Writing logs to: {}/casket.log",
                    log_dir.display()
                );
                return;
            }
            Err(e) => eprintln!(
                "{} Failed to create log directory {}: {}",
                "Error:".red().bold(),
                log_dir.display(),
                e
            ),
        }
    }

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .without_time()
        .try_init();
}

fn main() -> CasketResult<()> {
    let cli_args = CliArgs::parse();

    let config = Config::load()
        .map_err(|e| CasketError::Config(format!("Could not load config: {e}")))?;
    init_logging(&config, cli_args.verbose);

    if let Err(e) = cli_args.command.run(config, cli_args.verbose > 0) {
        error!("Command failed: {:#}", e);
        eprintln!("{}: {:#}", "Error".red().bold(), e);
        process::exit(1);
    }

    debug!("Command completed successfully.");
    Ok(())
}
