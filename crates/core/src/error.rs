use thiserror::Error;

pub type CampaignResult<T> = Result<T, CampaignError>;

#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid delay specification: {0}")]
    InvalidDelaySpec(String),

    #[error("Invalid recurrence: {0}")]
    InvalidRecurrence(String),

    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    #[error("Campaign {0} requires a subject identifier")]
    MissingSubject(String),

    #[error("Campaign {0} not found")]
    CampaignNotFound(String),

    #[error("Campaign store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
