use navwatch::NavError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    /// Error when starting the runtime or registering signals
    #[error("io::Error eg from tokio start")]
    Io(#[from] std::io::Error),
    /// Configuration file could not be read or extracted
    #[error("Config error: {0}")]
    Config(#[from] Box<figment::Error>),
    /// Configuration loaded but describes something that cannot be checked
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    /// Error from the monitor
    #[error(transparent)]
    Nav(#[from] NavError),
    /// Status could not be written out
    #[error("Json error")]
    Json(#[from] serde_json::Error),
}

impl From<figment::Error> for CliError {
    fn from(err: figment::Error) -> Self {
        CliError::Config(Box::new(err))
    }
}
