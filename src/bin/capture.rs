//! Minimal CLI entry point: `capture --device <name> --port <int> --level info|debug`.

use std::process::ExitCode;

use mysql_capture::capture::{self, PacketSource};
use mysql_capture::config::{CaptureConfig, LogLevel};
use mysql_capture::context::CaptureContext;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_logging(level: LogLevel) {
    let default_directive = match level {
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn start_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = match CaptureConfig::try_from(args.as_slice()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("invalid configuration: {err}");
            return ExitCode::FAILURE;
        }
    };

    init_logging(config.level);
    info!(device = %config.device, port = config.port, "starting mysql-capture");

    let source = match PacketSource::open(&config) {
        Ok(source) => source,
        Err(err) => {
            error!(error = %err, "failed to open capture device");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(error = %err, "failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };

    let working_dir = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(err) => {
            error!(error = %err, "failed to resolve working directory");
            return ExitCode::FAILURE;
        }
    };

    let context = match CaptureContext::new(config, &working_dir, &start_timestamp()) {
        Ok(context) => context,
        Err(err) => {
            error!(error = %err, "failed to construct capture context");
            return ExitCode::FAILURE;
        }
    };

    let handle = runtime.handle().clone();
    capture::run(source, context, handle);

    ExitCode::SUCCESS
}
