//! Process-wide logging setup.

pub mod logging {
    //! The viewer logs under a handful of `stage_viewer::*` targets. The
    //! chosen level applies to those targets; everything else (HTTP client,
    //! websocket stack, runtime) stays at `info` once the viewer itself is
    //! at `debug` or finer.

    use clap::ValueEnum;
    use std::fs::OpenOptions;
    use std::path::PathBuf;
    use std::sync::OnceLock;
    use tracing_appender::non_blocking::WorkerGuard;
    use tracing_subscriber::EnvFilter;

    /// Replaces the computed filter with raw `EnvFilter` directives.
    pub const LOG_FILTER_ENV: &str = "STAGE_VIEWER_LOG_FILTER";

    const EMITTED_TARGETS: &[&str] = &[
        "stage_viewer::session",
        "stage_viewer::registry",
        "stage_viewer::scene",
        "stage_viewer::runtime",
        "stage_viewer::channel",
    ];

    #[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
    pub enum LogLevel {
        Error,
        #[default]
        Warn,
        Info,
        Debug,
        Trace,
    }

    impl LogLevel {
        pub fn as_str(self) -> &'static str {
            match self {
                LogLevel::Error => "error",
                LogLevel::Warn => "warn",
                LogLevel::Info => "info",
                LogLevel::Debug => "debug",
                LogLevel::Trace => "trace",
            }
        }
    }

    #[derive(Clone, Debug, Default)]
    pub struct LogConfig {
        pub level: LogLevel,
        /// Append to this file instead of writing to stderr.
        pub file: Option<PathBuf>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum InitError {
        #[error("failed to open log file {path:?}: {source}")]
        Io {
            path: PathBuf,
            source: std::io::Error,
        },
        #[error("invalid log filter '{directives}': {message}")]
        Filter { directives: String, message: String },
        #[error("failed to install logger: {0}")]
        Install(String),
    }

    static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

    /// Installs the global subscriber once; later calls are no-ops.
    pub fn init(config: &LogConfig) -> Result<(), InitError> {
        if GUARD.get().is_some() {
            return Ok(());
        }
        let filter = build_filter(config.level, std::env::var(LOG_FILTER_ENV).ok())?;

        let (writer, guard) = match &config.file {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| InitError::Io {
                        path: path.clone(),
                        source,
                    })?;
                tracing_appender::non_blocking(file)
            }
            None => tracing_appender::non_blocking(std::io::stderr()),
        };

        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(config.level >= LogLevel::Debug)
            .with_ansi(config.file.is_none())
            .with_writer(writer)
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .map_err(|err| InitError::Install(err.to_string()))?;

        let _ = GUARD.set(guard);
        Ok(())
    }

    fn build_filter(level: LogLevel, custom: Option<String>) -> Result<EnvFilter, InitError> {
        let directives = custom.unwrap_or_else(|| directives_for(level));
        EnvFilter::try_new(&directives).map_err(|err| InitError::Filter {
            message: err.to_string(),
            directives,
        })
    }

    fn directives_for(level: LogLevel) -> String {
        if level < LogLevel::Debug {
            return level.as_str().to_string();
        }
        let mut directives = String::from("info");
        for target in EMITTED_TARGETS {
            directives.push(',');
            directives.push_str(target);
            directives.push('=');
            directives.push_str(level.as_str());
        }
        directives
    }

}
