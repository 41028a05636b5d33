use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum BrokerError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{referencing} references {missing} which is not defined in the submission")]
    ReferentialIntegrity { referencing: String, missing: String },

    #[error("assay {assay} must belong to exactly one project, found {found}")]
    ProjectCardinality { assay: String, found: usize },

    #[error("can't do export as no staging area has been created for {0}")]
    MissingStagingArea(String),

    #[error("ingest request failed: {0}")]
    IngestHttp(String),

    #[error("ingest returned status {status}: {message}")]
    IngestStatus { status: u16, message: String },

    #[error("staging request failed: {0}")]
    StagingHttp(String),

    #[error("staging returned status {status}: {message}")]
    StagingStatus { status: u16, message: String },

    #[error("data store request failed: {0}")]
    DataStoreHttp(String),

    #[error("data store returned status {status}: {message}")]
    DataStoreStatus { status: u16, message: String },

    #[error("malformed resource: {0}")]
    MalformedResource(String),

    #[error("{0} is an invalid uuid value")]
    InvalidUuid(String),

    #[error("an authentication token must be supplied when uploading a spreadsheet")]
    MissingToken,

    #[error("missing config file ingest-broker.json")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("background worker is no longer accepting jobs")]
    WorkerStopped,
}

impl BrokerError {
    pub fn referential(referencing: impl Into<String>, missing: impl Into<String>) -> Self {
        BrokerError::ReferentialIntegrity {
            referencing: referencing.into(),
            missing: missing.into(),
        }
    }

    /// True for failures that originate from a remote collaborator rather than local input.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            BrokerError::IngestHttp(_)
                | BrokerError::IngestStatus { .. }
                | BrokerError::StagingHttp(_)
                | BrokerError::StagingStatus { .. }
                | BrokerError::DataStoreHttp(_)
                | BrokerError::DataStoreStatus { .. }
        )
    }

    /// True for errors caused by the submitted metadata itself.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            BrokerError::Validation(_)
                | BrokerError::ReferentialIntegrity { .. }
                | BrokerError::ProjectCardinality { .. }
        )
    }
}
