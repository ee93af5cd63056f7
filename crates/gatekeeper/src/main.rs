use std::process;
use std::sync::Arc;

use tracing::error;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use gatekeeper::config::USAGE;
use gatekeeper::transport::serve;
use gatekeeper::{AdmissionService, ArgsError, Config, VersionInfo};

/// Initialize tracing with GATEKEEPER_LOG and LOG_FORMAT support.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match std::env::var("GATEKEEPER_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("trace") => "trace",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("gatekeeper={level}"))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let service = AdmissionService::new(config.initial_limit)?
        .with_max_work_delay(config.max_work_delay)
        .with_version(VersionInfo::from_env());

    serve(config.server, Arc::new(service)).await
}

#[tokio::main]
async fn main() {
    let config = match Config::load() {
        Ok(config) => config,
        Err(ArgsError::Help) => {
            println!("{USAGE}");
            return;
        }
        Err(e) => {
            eprintln!("error: {e}");
            eprintln!();
            eprintln!("{USAGE}");
            process::exit(2);
        }
    };

    init_tracing();

    if let Err(e) = run(config).await {
        error!(error = %e, "gatekeeper exited with error");
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}
