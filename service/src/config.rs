use clap::builder::TypedValueParser as _;
use clap::Parser;
use dotenvy::dotenv;
use log::LevelFilter;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq)]
pub enum RustEnv {
    Development,
    Production,
    Staging,
}

#[derive(Debug, PartialEq, Eq)]
pub struct RustEnvParseError;

impl FromStr for RustEnv {
    type Err = RustEnvParseError;
    fn from_str(level: &str) -> Result<RustEnv, Self::Err> {
        match level.to_lowercase().as_str() {
            "development" => Ok(RustEnv::Development),
            "production" => Ok(RustEnv::Production),
            "staging" => Ok(RustEnv::Staging),
            _ => Err(RustEnvParseError),
        }
    }
}

impl fmt::Display for RustEnv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RustEnv::Development => write!(f, "development"),
            RustEnv::Production => write!(f, "production"),
            RustEnv::Staging => write!(f, "staging"),
        }
    }
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// A list of full CORS origin URLs that allowed to receive server responses.
    #[arg(
        long,
        env,
        value_delimiter = ',',
        use_value_delimiter = true,
        default_value = "http://localhost:3000,https://localhost:3000"
    )]
    pub allowed_origins: Vec<String>,

    /// The host interface to listen for incoming connections
    #[arg(short, long, env, default_value = "127.0.0.1")]
    pub interface: Option<String>,

    /// The host TCP port to listen for incoming connections
    #[arg(short, long, env, default_value_t = 4000)]
    pub port: u16,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap()),
        )]
    pub log_level_filter: LevelFilter,

    /// Set the Rust runtime environment to use.
    #[arg(
    short,
    long,
    env,
    default_value_t = RustEnv::Development,
    value_parser = clap::builder::PossibleValuesParser::new([
        "DEVELOPMENT", "PRODUCTION", "STAGING",
        "development", "production", "staging"
    ])
        .map(|s| s.parse::<RustEnv>().unwrap()),
    )]
    pub runtime_env: RustEnv,

    /// HS256 secret used to validate the tokens clients present at handshake.
    #[arg(long, env, hide_env_values = true)]
    jwt_secret: Option<String>,

    /// Maximum number of undelivered notifications buffered per connection
    /// before the oldest is dropped.
    #[arg(long, env, default_value_t = 256)]
    pub outbound_queue_capacity: usize,

    /// Maximum number of broker records fetched per poll
    #[arg(long, env, default_value_t = 64)]
    pub consumer_batch_size: usize,

    /// Initial delay in milliseconds before a consumer retries after a broker error
    #[arg(long, env, default_value_t = 200)]
    pub consumer_backoff_base_ms: u64,

    /// Upper bound in milliseconds for the consumer retry delay
    #[arg(long, env, default_value_t = 10_000)]
    pub consumer_backoff_max_ms: u64,

    /// Resources whose last sync version is remembered for stale-delta filtering
    #[arg(long, env, default_value_t = 100_000)]
    pub sync_tracked_resources: usize,

    /// Seconds without any inbound frame before a connection is evicted
    #[arg(long, env, default_value_t = 90)]
    pub connection_idle_timeout_secs: u64,

    /// How often, in seconds, to look for idle connections
    #[arg(long, env, default_value_t = 15)]
    pub idle_sweep_interval_secs: u64,

    /// Consecutive invalid frames tolerated before a connection is evicted
    #[arg(long, env, default_value_t = 20)]
    pub max_invalid_frames: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    pub fn set_jwt_secret(mut self, jwt_secret: String) -> Self {
        self.jwt_secret = Some(jwt_secret);
        self
    }

    pub fn jwt_secret(&self) -> Option<&str> {
        self.jwt_secret.as_deref()
    }

    pub fn interface(&self) -> &str {
        self.interface.as_deref().unwrap_or("127.0.0.1")
    }

    pub fn consumer_backoff_base(&self) -> Duration {
        Duration::from_millis(self.consumer_backoff_base_ms)
    }

    pub fn consumer_backoff_max(&self) -> Duration {
        Duration::from_millis(self.consumer_backoff_max_ms)
    }

    pub fn connection_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_idle_timeout_secs)
    }

    pub fn idle_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.idle_sweep_interval_secs.max(1))
    }

    pub fn runtime_env(&self) -> RustEnv {
        self.runtime_env.clone()
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["notebook_realtime"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn flags_override_defaults() {
        let config = parse(&[
            "--port",
            "0",
            "--outbound-queue-capacity",
            "8",
            "--max-invalid-frames",
            "3",
            "--jwt-secret",
            "s3cret",
            "--runtime-env",
            "production",
            "--sync-tracked-resources",
            "500",
        ]);
        assert_eq!(config.port, 0);
        assert_eq!(config.outbound_queue_capacity, 8);
        assert_eq!(config.max_invalid_frames, 3);
        assert_eq!(config.jwt_secret(), Some("s3cret"));
        assert_eq!(config.runtime_env(), RustEnv::Production);
        assert_eq!(config.sync_tracked_resources, 500);
    }

    #[test]
    fn durations_are_derived_from_numeric_flags() {
        let config = parse(&[
            "--consumer-backoff-base-ms",
            "50",
            "--connection-idle-timeout-secs",
            "30",
            "--idle-sweep-interval-secs",
            "0",
        ]);
        assert_eq!(config.consumer_backoff_base(), Duration::from_millis(50));
        assert_eq!(config.connection_idle_timeout(), Duration::from_secs(30));
        assert_eq!(config.idle_sweep_interval(), Duration::from_secs(1));
    }

    #[test]
    fn rust_env_parses_case_insensitively() {
        assert_eq!("STAGING".parse::<RustEnv>(), Ok(RustEnv::Staging));
        assert_eq!("bogus".parse::<RustEnv>(), Err(RustEnvParseError));
        assert_eq!(RustEnv::Development.to_string(), "development");
    }
}
