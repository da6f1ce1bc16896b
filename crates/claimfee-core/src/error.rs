use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClaimFeeError {
    #[error("config not found: {0}")]
    ConfigNotFound(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid cuboid '{0}': expected six comma-separated integers")]
    InvalidCuboid(String),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, ClaimFeeError>;
