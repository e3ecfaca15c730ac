use std::env::consts::{
    ARCH, DLL_EXTENSION, DLL_PREFIX, DLL_SUFFIX, EXE_EXTENSION, EXE_SUFFIX, FAMILY, OS,
};
use std::fs::create_dir_all;
use std::path::Path;

use anyhow::Error;
use tracing::trace;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::civitai::io::{CONFIG_NAME, Config, LoggingConfig};
use crate::program::Program;

mod civitai;
mod program;

/// Name of the rolling log file.
const LOG_FILE_NAME: &str = "civitai_downloader.log";

/// Filter of the file layer. The file always gets the full detail of this crate.
const FILE_FILTER: &str = "civitai_downloader=debug";

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = match Config::load_or_create(Path::new(CONFIG_NAME)) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Failed to load {}: {}. Using the default configuration.", CONFIG_NAME, err);
            Config::default()
        }
    };

    let _guard = initialize_logger(&config.logging);
    log_system_information();

    let program = Program::new(config);
    program.run().await
}

/// Initializes the terminal logger and, when enabled, the daily rolling log file.
///
/// The returned guard flushes the file writer when dropped and must live until exit.
fn initialize_logger(logging: &LoggingConfig) -> Option<WorkerGuard> {
    let terminal_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let terminal = fmt::layer()
        .with_target(false)
        .with_filter(terminal_filter);

    let mut guard = None;
    let file = if logging.log_to_file {
        match create_dir_all(&logging.log_directory) {
            Ok(()) => {
                let appender = tracing_appender::rolling::daily(&logging.log_directory, LOG_FILE_NAME);
                let (writer, file_guard) = tracing_appender::non_blocking(appender);
                guard = Some(file_guard);
                Some(
                    fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer)
                        .with_filter(EnvFilter::new(FILE_FILTER)),
                )
            }
            Err(err) => {
                eprintln!(
                    "Failed to create log directory {}: {}. Logging will only output to terminal.",
                    logging.log_directory, err
                );
                None
            }
        }
    } else {
        None
    };

    if let Err(err) = tracing_subscriber::registry().with(terminal).with(file).try_init() {
        eprintln!("Failed to initialize logger: {}", err);
    }

    guard
}

/// Logs important information about the system being used.
fn log_system_information() {
    trace!("Printing system information out into log for debug purposes...");
    trace!("ARCH:           \"{}\"", ARCH);
    trace!("DLL_EXTENSION:  \"{}\"", DLL_EXTENSION);
    trace!("DLL_PREFIX:     \"{}\"", DLL_PREFIX);
    trace!("DLL_SUFFIX:     \"{}\"", DLL_SUFFIX);
    trace!("EXE_EXTENSION:  \"{}\"", EXE_EXTENSION);
    trace!("EXE_SUFFIX:     \"{}\"", EXE_SUFFIX);
    trace!("FAMILY:         \"{}\"", FAMILY);
    trace!("OS:             \"{}\"", OS);
}
