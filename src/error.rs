use thiserror::Error;

/// Raised by detector arithmetic that would otherwise yield NaN or infinity.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectError {
    #[error("baseline for {0} is zero, percentage change is undefined")]
    ZeroBaseline(&'static str),
    #[error("non-finite value for {0}")]
    NonFinite(&'static str),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("unknown chain id {0}")]
    UnknownChain(u64),
    #[error("invalid schedule for job {job}: {reason}")]
    Schedule { job: String, reason: String },
    #[error("missing required setting: {0}")]
    Missing(&'static str),
}

/// Process-level failure classes, each with its own exit code.
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("cache unavailable: {0}")]
    Cache(#[source] anyhow::Error),
    #[error("job task {0} panicked")]
    JobPanicked(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::Config(_) => 2,
            AppError::Cache(_) => 3,
            AppError::JobPanicked(_) => 70,
            AppError::Other(_) => 1,
        }
    }
}
