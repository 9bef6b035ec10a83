use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{StreamSource, ViewerMode};
use crate::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "stage-viewer",
    about = "Start a streamed stage application and mirror its scene graph",
    author,
    version
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "STAGE_VIEWER_CONFIG",
        value_name = "PATH",
        help = "TOML file with viewer settings"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_name = "URL",
        help = "Base URL of the application catalog service"
    )]
    pub app_server: Option<String>,

    #[arg(
        long,
        global = true,
        value_name = "URL",
        help = "Base URL of the streaming session registry"
    )]
    pub stream_server: Option<String>,

    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        global = true,
        env = "STAGE_VIEWER_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        global = true,
        env = "STAGE_VIEWER_LOG_FILE",
        help = "Write logs to the specified file instead of stderr"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List applications offered by the catalog
    Apps,
    /// List published versions of an application
    Versions { app: String },
    /// List streaming profiles of an application version
    Profiles { app: String, version: String },
    /// List active streaming sessions
    Sessions,
    /// Create a session and wait until it is ready
    Start(SessionArgs),
    /// Verify and destroy a session
    End { session_id: String },
    /// Create a session and mirror its scene graph interactively
    View(ViewArgs),
}

#[derive(Args, Debug, Clone)]
pub struct SessionArgs {
    pub app: String,
    pub version: String,
    pub profile: String,
}

#[derive(Args, Debug, Clone)]
pub struct ViewArgs {
    #[command(flatten)]
    pub session: SessionArgs,

    #[arg(
        long,
        value_name = "URL",
        help = "Message channel URL (defaults to the session's signaling route)"
    )]
    pub channel_url: Option<String>,

    #[arg(long, value_name = "NAME", help = "Catalog asset to open once the stream is up")]
    pub asset: Option<String>,

    #[arg(long, value_enum, help = "Override the configured viewer mode")]
    pub mode: Option<ViewerMode>,

    #[arg(long, value_enum, help = "Override where the streamed application runs")]
    pub source: Option<StreamSource>,
}
