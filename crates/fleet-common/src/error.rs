use thiserror::Error;

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("invalid job request: {0}")]
    InvalidRequest(String),

    #[error("port range starting at {start} with {count} slots exceeds 65535")]
    PortOverflow { start: u16, count: u32 },

    #[error("invalid node list '{0}'")]
    InvalidNodeList(String),

    #[error("missing configuration: {0} is not set")]
    MissingConfig(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FleetError>;
