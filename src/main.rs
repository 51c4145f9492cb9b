use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ocimetrics::cli::{self, AuthArgs, ReportArgs};
use ocimetrics::config::Config;
use ocimetrics::oci::api::OciConnector;
use ocimetrics::oci::auth;
use ocimetrics::oci::http::{build_http_client, format_oci_error};
use ocimetrics::regions::RegionClientManager;
use ocimetrics::server::{self, AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// OCI Monitoring metrics explorer
#[derive(Parser, Debug)]
#[command(name = "ocimetrics", version = ocimetrics::VERSION, about, long_about = None)]
struct Args {
    /// Log level (RUST_LOG takes precedence)
    #[arg(long, value_enum, default_value = "info", global = true)]
    log_level: LogLevel,

    /// Write logs to a file instead of stderr; without a path the log goes
    /// to the config directory
    #[arg(long, global = true, num_args = 0..=1)]
    log_file: Option<Option<PathBuf>>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the JSON HTTP API
    Serve {
        #[command(flatten)]
        auth: AuthArgs,

        /// Address to bind
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Port to listen on [default: 8080]
        #[arg(short, long, env = "PORT")]
        port: Option<u16>,
    },
    /// Generate an HTML or JSON metrics report
    Report(ReportArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

fn setup_logging(
    level: LogLevel,
    log_file: Option<Option<PathBuf>>,
) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directive()));

    let (writer, guard, log_path) = match log_file {
        Some(path) => {
            let log_path = path.unwrap_or_else(default_log_path);
            if let Some(parent) = log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)
                .with_context(|| format!("Failed to open log file {}", log_path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            (writer, guard, Some(log_path))
        }
        None => {
            let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
            (writer, guard, None)
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(log_path.is_none())
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::debug!("ocimetrics {} started with log level: {:?}", ocimetrics::VERSION, level);
    if let Some(path) = log_path {
        tracing::info!("Log file: {:?}", path);
    }

    Ok(guard)
}

fn default_log_path() -> PathBuf {
    if let Some(config_dir) = Config::config_dir() {
        return config_dir.join("ocimetrics.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".ocimetrics").join("ocimetrics.log");
    }
    PathBuf::from("ocimetrics.log")
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let _log_guard = match setup_logging(args.log_level, args.log_file) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Error: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    let config = Config::load();

    let result = match &args.command {
        Command::Serve { auth, host, port } => serve(&config, auth, host, *port).await,
        Command::Report(report) => cli::run(report, &config).await,
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            tracing::error!("{:#}", err);
            eprintln!("Error: {}", format_oci_error(&err));
            ExitCode::FAILURE
        }
    }
}

async fn serve(config: &Config, auth_args: &AuthArgs, host: &str, port: Option<u16>) -> Result<u8> {
    let settings = config.auth_settings(auth_args.overrides());
    let http = build_http_client()?;

    let credentials = match auth::resolve_credentials(&settings, &http).await {
        Ok(credentials) => credentials,
        Err(e) => {
            tracing::error!("Failed to initialize OCI credentials: {:#}", e);
            eprintln!("Error: Failed to initialize OCI client: {}", format_oci_error(&e));
            return Ok(1);
        }
    };
    tracing::info!(
        "Authenticated with {} in {} (tenancy {})",
        credentials.info.auth_type,
        credentials.info.region,
        credentials.info.tenancy_id
    );

    let connector = OciConnector::new(http, credentials.signer.clone());
    let manager = Arc::new(RegionClientManager::new(credentials.info, Arc::new(connector)));

    let addr: SocketAddr = format!("{}:{}", host, config.effective_port(port))
        .parse()
        .with_context(|| format!("Invalid listen address {}", host))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    server::serve(listener, AppState::new(manager)).await?;
    Ok(0)
}
