//! FHIR R4 wire/boundary support for Careview.
//!
//! This crate provides **wire models** and **translation helpers** for the handful of FHIR
//! resources Careview reads from a remote clinical-data server:
//! - coded values (`Coding`, `CodeableConcept`, `Reference`)
//! - search result `Bundle`s (entries plus paging links)
//! - `Encounter`, `Observation` and `Patient` resources
//!
//! This crate focuses on:
//! - FHIR JSON deserialisation with field-path error reporting
//! - translation between wire structs and flat domain carriers
//!
//! It does not perform any I/O. Fetching resources is the job of `careview-core`.

pub mod bundle;
pub mod coding;
pub mod encounter;
pub mod observation;
pub mod patient;

// Re-export facades
pub use bundle::Bundle;
pub use encounter::Encounter;
pub use observation::Observation;
pub use patient::Patient;

// Re-export public domain-level types
pub use bundle::{BundleData, BundleEntry};
pub use coding::{CodeableConcept, Coding, Reference};
pub use encounter::EncounterData;
pub use observation::{ObservationData, Quantity};
pub use patient::{NameUse, PatientData};

use serde::de::DeserializeOwned;

/// Errors returned by the `fhir` boundary crate.
#[derive(Debug, thiserror::Error)]
pub enum FhirError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("translation error: {0}")]
    Translation(String),
}

/// Type alias for Results that can fail with a [`FhirError`].
pub type FhirResult<T> = Result<T, FhirError>;

/// Deserialise a wire struct from an already-parsed JSON value.
///
/// Uses `serde_path_to_error` so schema mismatches name the failing field (for example
/// `code.coding.0.system`).
pub(crate) fn wire_from_value<W: DeserializeOwned>(
    value: serde_json::Value,
    label: &str,
) -> FhirResult<W> {
    serde_path_to_error::deserialize::<_, W>(value).map_err(|err| {
        let path = err.path().to_string();
        let source = err.into_inner();
        let path = if path.is_empty() {
            "<root>"
        } else {
            path.as_str()
        };
        FhirError::Translation(format!("{label} schema mismatch at {path}: {source}"))
    })
}

/// Deserialise a wire struct from JSON text.
pub(crate) fn wire_from_str<W: DeserializeOwned>(json_text: &str, label: &str) -> FhirResult<W> {
    let mut deserializer = serde_json::Deserializer::from_str(json_text);
    serde_path_to_error::deserialize::<_, W>(&mut deserializer).map_err(|err| {
        let path = err.path().to_string();
        let source = err.into_inner();
        let path = if path.is_empty() {
            "<root>"
        } else {
            path.as_str()
        };
        FhirError::Translation(format!("{label} schema mismatch at {path}: {source}"))
    })
}

/// Reject a resource whose `resourceType` is not the expected one.
pub(crate) fn expect_resource_type(actual: &str, expected: &str) -> FhirResult<()> {
    if actual != expected {
        return Err(FhirError::InvalidInput(format!(
            "Expected resourceType '{expected}', got '{actual}'"
        )));
    }
    Ok(())
}
