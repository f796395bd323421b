use tracing_subscriber::{filter::LevelFilter, EnvFilter};

/// Logging arguments shared by every subcommand.
#[derive(Debug, Clone, clap::Args)]
pub struct LogArgs {
    /// The log verbosity. Overridden by `RUST_LOG` directives, when set.
    #[arg(long = "log.level", value_enum, default_value_t = LogLevel::Warn, env = "RANKD_LOG_LEVEL")]
    pub level: LogLevel,
    /// The format of log lines written to stderr. Defaults to `text` when
    /// stderr is a terminal, and `json` otherwise.
    #[arg(long = "log.format", value_enum, env = "RANKD_LOG_FORMAT")]
    pub format: Option<LogFormat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Off,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Off => LevelFilter::OFF,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    Json,
    Text,
}

/// Install the global tracing subscriber. Logs go to stderr, as stdout
/// carries the response.
pub fn init_logging(args: &LogArgs) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from(args.level).into())
        .from_env_lossy();

    let format = args.format.unwrap_or(if atty::is(atty::Stream::Stderr) {
        LogFormat::Text
    } else {
        LogFormat::Json
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Json => builder
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_target(false)
            .init(),
        LogFormat::Text => builder.with_target(false).init(),
    }
}
