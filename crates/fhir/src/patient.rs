//! FHIR-aligned patient wire models and translation helpers.
//!
//! This module provides both domain-level types and wire models for patient resources,
//! which represent patient demographics and identification information.
//!
//! Responsibilities:
//! - Define public domain-level types for external API use
//! - Define a wire model for serialisation/deserialisation of FHIR JSON
//! - Provide translation helpers between domain primitives and the wire model
//!
//! Notes:
//! - Remote servers return many more fields than are modelled here; unknown keys are ignored
//! - The rendered JSON is what Careview sends as hook-service prefetch

use crate::{expect_resource_type, wire_from_str, wire_from_value, FhirError, FhirResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Public domain-level types
// ============================================================================

/// Purpose of a human name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NameUse {
    /// Official name.
    Official,
    /// Usual/preferred name.
    Usual,
    /// Temporary name.
    Temp,
    /// Nickname or informal name.
    Nickname,
    /// Anonymous name.
    Anonymous,
    /// Old name (no longer in use).
    Old,
    /// Maiden name.
    Maiden,
}

impl NameUse {
    /// Convert to FHIR wire format string.
    fn to_wire(self) -> &'static str {
        match self {
            NameUse::Official => "official",
            NameUse::Usual => "usual",
            NameUse::Temp => "temp",
            NameUse::Nickname => "nickname",
            NameUse::Anonymous => "anonymous",
            NameUse::Old => "old",
            NameUse::Maiden => "maiden",
        }
    }

    /// Parse from FHIR wire format string.
    fn from_wire(s: &str) -> Option<Self> {
        match s {
            "official" => Some(NameUse::Official),
            "usual" => Some(NameUse::Usual),
            "temp" => Some(NameUse::Temp),
            "nickname" => Some(NameUse::Nickname),
            "anonymous" => Some(NameUse::Anonymous),
            "old" => Some(NameUse::Old),
            "maiden" => Some(NameUse::Maiden),
            _ => None,
        }
    }
}

/// Domain-level carrier for patient data (flat structure).
///
/// The wire format supports multiple names, but this flat structure extracts the first
/// (primary) name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PatientData {
    /// Server-assigned logical id.
    pub id: String,

    /// Purpose of the name (official, usual, nickname, etc.).
    pub use_type: Option<NameUse>,

    /// Family name (surname).
    pub family: Option<String>,

    /// Given names (first name, middle names).
    pub given: Vec<String>,

    /// Administrative gender as sent by the server.
    pub gender: Option<String>,

    /// Patient's date of birth (ISO 8601 date format: YYYY-MM-DD).
    pub birth_date: Option<String>,

    /// Last updated timestamp.
    pub last_updated: Option<DateTime<Utc>>,
}

impl PatientData {
    /// "Given Family" display name, or `None` when no name parts are known.
    pub fn display_name(&self) -> Option<String> {
        let mut parts: Vec<&str> = self.given.iter().map(String::as_str).collect();
        if let Some(family) = self.family.as_deref() {
            parts.push(family);
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}

// ============================================================================
// Internal nested types
// ============================================================================

/// Internal nested representation matching the FHIR structure.
#[derive(Clone, Debug, PartialEq, Eq)]
struct PatientDataNested {
    pub id: String,
    pub names: Vec<FullName>,
    pub gender: Option<String>,
    pub birth_date: Option<String>,
    pub meta: Option<PatientMeta>,
}

/// Human name representation (internal).
#[derive(Clone, Debug, PartialEq, Eq)]
struct FullName {
    pub use_type: Option<NameUse>,
    pub family: Option<String>,
    pub given: Vec<String>,
}

/// Patient resource metadata (internal).
#[derive(Clone, Debug, PartialEq, Eq)]
struct PatientMeta {
    pub last_updated: Option<DateTime<Utc>>,
}

// ============================================================================
// Public Patient operations
// ============================================================================

/// Patient resource operations.
///
/// This is a zero-sized type used for namespacing patient-related operations.
/// All methods are associated functions.
pub struct Patient;

impl Patient {
    /// Parse a patient resource from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError`] if:
    /// - the JSON does not represent a valid patient resource,
    /// - any modelled field has an unexpected type,
    /// - resourceType is not "Patient",
    /// - the resource has no id.
    pub fn parse(json_text: &str) -> FhirResult<PatientData> {
        let wire: PatientWire = wire_from_str(json_text, "Patient")?;
        wire_to_domain(wire)
    }

    /// Parse a patient resource from an already-decoded JSON value.
    pub fn from_value(value: serde_json::Value) -> FhirResult<PatientData> {
        let wire: PatientWire = wire_from_value(value, "Patient")?;
        wire_to_domain(wire)
    }

    /// Render a patient resource as FHIR JSON.
    pub fn render(data: &PatientData) -> FhirResult<String> {
        let wire = domain_to_wire(data);
        serde_json::to_string(&wire)
            .map_err(|e| FhirError::Translation(format!("Failed to serialise patient: {e}")))
    }

    /// Render a patient resource as a JSON value (for embedding in larger documents).
    pub fn to_value(data: &PatientData) -> FhirResult<serde_json::Value> {
        let wire = domain_to_wire(data);
        serde_json::to_value(&wire)
            .map_err(|e| FhirError::Translation(format!("Failed to serialise patient: {e}")))
    }
}

// ============================================================================
// Wire types (internal)
// ============================================================================

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
struct PatientWire {
    #[serde(rename = "resourceType")]
    pub resource_type: String,

    #[serde(default)]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub name: Vec<FullNameWire>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,

    #[serde(rename = "birthDate", default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<PatientMetaWire>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
struct FullNameWire {
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub use_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub given: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
struct PatientMetaWire {
    #[serde(rename = "lastUpdated", default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

// ============================================================================
// Helper functions (internal)
// ============================================================================

fn wire_to_nested(wire: PatientWire) -> FhirResult<PatientDataNested> {
    expect_resource_type(&wire.resource_type, "Patient")?;

    let id = wire
        .id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| FhirError::InvalidInput("Patient resource has no id".into()))?;

    let names = wire
        .name
        .into_iter()
        .map(|n| FullName {
            use_type: n.use_type.as_deref().and_then(NameUse::from_wire),
            family: n.family,
            given: n.given,
        })
        .collect();

    let meta = wire.meta.map(|m| PatientMeta {
        last_updated: m
            .last_updated
            .as_deref()
            .and_then(|s| s.parse::<DateTime<Utc>>().ok()),
    });

    Ok(PatientDataNested {
        id,
        names,
        gender: wire.gender,
        birth_date: wire.birth_date,
        meta,
    })
}

fn nested_to_wire(nested: &PatientDataNested) -> PatientWire {
    PatientWire {
        resource_type: "Patient".to_string(),
        id: Some(nested.id.clone()),
        name: nested
            .names
            .iter()
            .map(|n| FullNameWire {
                use_type: n.use_type.map(|u| u.to_wire().to_string()),
                family: n.family.clone(),
                given: n.given.clone(),
            })
            .collect(),
        gender: nested.gender.clone(),
        birth_date: nested.birth_date.clone(),
        meta: nested.meta.as_ref().map(|m| PatientMetaWire {
            last_updated: m.last_updated.map(|dt| dt.to_rfc3339()),
        }),
    }
}

fn flat_to_nested(data: &PatientData) -> PatientDataNested {
    let names = if data.use_type.is_some() || data.family.is_some() || !data.given.is_empty() {
        vec![FullName {
            use_type: data.use_type,
            family: data.family.clone(),
            given: data.given.clone(),
        }]
    } else {
        vec![]
    };

    PatientDataNested {
        id: data.id.clone(),
        names,
        gender: data.gender.clone(),
        birth_date: data.birth_date.clone(),
        meta: data.last_updated.map(|lu| PatientMeta {
            last_updated: Some(lu),
        }),
    }
}

fn nested_to_flat(nested: PatientDataNested) -> PatientData {
    let first_name = nested.names.first();

    PatientData {
        id: nested.id.clone(),
        use_type: first_name.and_then(|n| n.use_type),
        family: first_name.and_then(|n| n.family.clone()),
        given: first_name.map(|n| n.given.clone()).unwrap_or_default(),
        gender: nested.gender,
        birth_date: nested.birth_date,
        last_updated: nested.meta.and_then(|m| m.last_updated),
    }
}

fn wire_to_domain(wire: PatientWire) -> FhirResult<PatientData> {
    let nested = wire_to_nested(wire)?;
    Ok(nested_to_flat(nested))
}

fn domain_to_wire(data: &PatientData) -> PatientWire {
    nested_to_wire(&flat_to_nested(data))
}
