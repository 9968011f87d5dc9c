//! Error types for hivemind-core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HivemindError {
    #[error("Invalid issue: {0}")]
    InvalidIssue(String),

    #[error("Invalid constraint: {0}")]
    InvalidConstraint(String),

    #[error("Invalid option: {0}")]
    InvalidOption(String),

    #[error("Invalid opinion: {0}")]
    InvalidOpinion(String),

    #[error("Signature is not valid for address {0}")]
    SignatureInvalid(String),

    #[error("Stale timestamp {timestamp} for {address} on {message}: must be more recent than any previous signature")]
    StaleTimestamp {
        address: String,
        message: String,
        timestamp: u64,
    },

    #[error("Address not permitted: {0}")]
    AddressNotPermitted(String),

    #[error("Address {address} already added {limit} options")]
    OptionsPerAddressExceeded { address: String, limit: u32 },

    #[error("Option already added: {0}")]
    DuplicateOption(String),

    #[error("State is finalized")]
    Finalized,

    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    #[error("Address and signature are required")]
    MissingCredentials,

    #[error("Auto ranking unavailable: {0}")]
    AutoRankingUnavailable(String),

    #[error("Could not decode CAS object {cid}: {reason}")]
    CasDecodeError { cid: String, reason: String },

    #[error("CAS request timed out: {0}")]
    CasTimeout(String),

    #[error("CAS object not found: {0}")]
    CasNotFound(String),

    #[error("Question index {0} is out of range")]
    InvalidQuestion(usize),

    #[error("No issue set on state")]
    IssueNotSet,

    #[error("No options available for question {0}")]
    NoOptions(usize),

    #[error("Invalid state chain: {0}")]
    InvalidStateChain(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, HivemindError>;
