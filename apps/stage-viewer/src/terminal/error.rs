use thiserror::Error;

use crate::channel::ChannelError;
use crate::config::ConfigError;
use crate::registry::RegistryError;
use crate::scene::SceneError;
use crate::session::SessionError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Registry(#[from] RegistryError),
    #[error("{0}")]
    Session(#[from] SessionError),
    #[error("{0}")]
    Scene(#[from] SceneError),
    #[error("{0}")]
    Channel(#[from] ChannelError),
    #[error("logging initialization failed: {0}")]
    Logging(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
