//! Process configuration: environment variables, overridden by flags.

use std::time::Duration;

use crate::transport::ServerConfig;

pub const DEFAULT_LIMIT: i64 = 10;
pub const DEFAULT_MAX_WORK_DELAY: Duration = Duration::from_millis(500);

pub const USAGE: &str = "\
Usage: gatekeeper [options]

Options:
  --host <addr>                  Listen address [env: GATEKEEPER_HOST] [default: 0.0.0.0]
  --port <port>                  Listen port [env: GATEKEEPER_PORT] [default: 8080]
  --limit <n>                    Initial admission limit [env: GATEKEEPER_LIMIT] [default: 10]
  --max-work-delay-ms <ms>       Upper bound of simulated work per request
                                 [env: GATEKEEPER_MAX_WORK_DELAY_MS] [default: 500]
  --shutdown-timeout-secs <s>    Graceful shutdown deadline
                                 [env: GATEKEEPER_SHUTDOWN_TIMEOUT_SECS] [default: 5]
  -h, --help                     Print this help";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArgsError {
    #[error("help requested")]
    Help,
    #[error("{0} requires a value")]
    MissingValue(String),
    #[error("invalid value '{value}' for {name}")]
    InvalidValue { name: String, value: String },
    #[error("unknown flag: {0}")]
    UnknownFlag(String),
    #[error("unexpected argument: {0}")]
    UnexpectedArgument(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub server: ServerConfig,
    /// Validated when the admission service is built, not here.
    pub initial_limit: i64,
    pub max_work_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            initial_limit: DEFAULT_LIMIT,
            max_work_delay: DEFAULT_MAX_WORK_DELAY,
        }
    }
}

fn parse<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ArgsError> {
    value.trim().parse().map_err(|_| ArgsError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
    })
}

impl Config {
    /// Build from the process environment and `std::env::args()`.
    pub fn load() -> Result<Self, ArgsError> {
        let args: Vec<String> = std::env::args().collect();
        Self::from_sources(|key| std::env::var(key).ok(), &args)
    }

    /// `args[0]` is the program name and is skipped.
    pub fn from_sources(
        env: impl Fn(&str) -> Option<String>,
        args: &[String],
    ) -> Result<Self, ArgsError> {
        let mut config = Self::default();

        if let Some(host) = env("GATEKEEPER_HOST") {
            config.server.host = host;
        }
        if let Some(port) = env("GATEKEEPER_PORT") {
            config.server.port = parse("GATEKEEPER_PORT", &port)?;
        }
        if let Some(limit) = env("GATEKEEPER_LIMIT") {
            config.initial_limit = parse("GATEKEEPER_LIMIT", &limit)?;
        }
        if let Some(ms) = env("GATEKEEPER_MAX_WORK_DELAY_MS") {
            config.max_work_delay =
                Duration::from_millis(parse("GATEKEEPER_MAX_WORK_DELAY_MS", &ms)?);
        }
        if let Some(secs) = env("GATEKEEPER_SHUTDOWN_TIMEOUT_SECS") {
            config.server.shutdown_timeout =
                Duration::from_secs(parse("GATEKEEPER_SHUTDOWN_TIMEOUT_SECS", &secs)?);
        }

        let mut i = 1; // skip argv[0]
        while i < args.len() {
            let flag = args[i].as_str();
            let mut value = || {
                i += 1;
                args.get(i)
                    .map(String::as_str)
                    .ok_or_else(|| ArgsError::MissingValue(flag.to_string()))
            };

            match flag {
                "--host" => config.server.host = value()?.to_string(),
                "--port" => config.server.port = parse(flag, value()?)?,
                "--limit" => config.initial_limit = parse(flag, value()?)?,
                "--max-work-delay-ms" => {
                    config.max_work_delay = Duration::from_millis(parse(flag, value()?)?)
                }
                "--shutdown-timeout-secs" => {
                    config.server.shutdown_timeout = Duration::from_secs(parse(flag, value()?)?)
                }
                "--help" | "-h" => return Err(ArgsError::Help),
                arg if arg.starts_with('-') => return Err(ArgsError::UnknownFlag(arg.to_string())),
                arg => return Err(ArgsError::UnexpectedArgument(arg.to_string())),
            }
            i += 1;
        }

        Ok(config)
    }
}
