use crate::cache::ResourceKind;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("no session for id {0}")]
    SessionMissing(String),

    #[error("population of {kind} failed: {message}")]
    PopulationFailed { kind: ResourceKind, message: String },

    #[error("remote query failed: {0}")]
    RemoteQueryFailed(String),

    #[error("failed to decode hook service response: {0}")]
    DecodeFailed(String),

    #[error("configuration error: {0}")]
    ConfigurationError(String),

    #[error("wait for {0} interrupted by shutdown")]
    Interrupted(ResourceKind),

    #[error("FHIR error: {0}")]
    Fhir(#[from] fhir::FhirError),
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
