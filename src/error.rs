use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config validation error: {0}")]
    ConfigValidation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("text generation error: {0}")]
    Generation(String),

    #[error("github api error: {0}")]
    RemoteAccess(String),

    #[error("malformed generator response: {0}")]
    MalformedResponse(String),

    #[error("process error: {0}")]
    Process(String),

    #[error("process timed out after {0:?}")]
    ProcessTimeout(Duration),

    #[error("git error: {0}")]
    Git(String),

    #[error("prompt error: {0}")]
    Prompt(String),

    #[error("record store error: {0}")]
    Store(String),

    #[error("orchestrator error: {0}")]
    Orchestrator(String),
}

pub type Result<T> = std::result::Result<T, Error>;
