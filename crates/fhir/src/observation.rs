//! FHIR-aligned observation wire model.
//!
//! Readings (blood pressure, pulse, ...) arrive as observations. Besides the measured values
//! Careview needs the codings that reveal where the reading was taken: the observation's
//! category, its code, its `meta.tag`s and the encounter it was recorded in.

use crate::{
    expect_resource_type, wire_from_str, wire_from_value, CodeableConcept, Coding, FhirResult,
    Reference,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Public domain-level types
// ============================================================================

/// A measured amount with a unit.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    #[serde(default)]
    pub value: Option<f64>,

    #[serde(default)]
    pub unit: Option<String>,

    #[serde(default)]
    pub system: Option<String>,

    #[serde(default)]
    pub code: Option<String>,
}

/// One component of a multi-part observation (systolic/diastolic for blood pressure).
#[derive(Clone, Debug, PartialEq)]
pub struct ObservationComponent {
    pub code: CodeableConcept,
    pub value: Option<Quantity>,
}

/// Domain-level carrier for an observation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObservationData {
    pub id: Option<String>,
    pub status: Option<String>,
    pub category: Vec<CodeableConcept>,
    pub code: CodeableConcept,
    pub subject: Option<Reference>,
    pub encounter: Option<Reference>,
    pub effective: Option<DateTime<Utc>>,
    pub value: Option<Quantity>,
    pub components: Vec<ObservationComponent>,

    /// Resource tags (`meta.tag`); device-uploaded readings are tagged here.
    pub tags: Vec<Coding>,
}

impl ObservationData {
    /// The first coding of the first category, if any.
    pub fn category_coding(&self) -> Option<&Coding> {
        self.category.iter().flat_map(|c| c.coding.iter()).next()
    }

    /// Logical id of the encounter this observation was recorded in.
    pub fn encounter_id(&self) -> Option<&str> {
        self.encounter.as_ref().and_then(|r| r.id_for("Encounter"))
    }
}

// ============================================================================
// Public Observation operations
// ============================================================================

/// Observation resource operations.
pub struct Observation;

impl Observation {
    /// Parse an observation from JSON text.
    pub fn parse(json_text: &str) -> FhirResult<ObservationData> {
        let wire: ObservationWire = wire_from_str(json_text, "Observation")?;
        wire_to_domain(wire)
    }

    /// Parse an observation from a bundle entry's resource.
    pub fn from_value(value: serde_json::Value) -> FhirResult<ObservationData> {
        let wire: ObservationWire = wire_from_value(value, "Observation")?;
        wire_to_domain(wire)
    }
}

// ============================================================================
// Wire types (internal)
// ============================================================================

#[derive(Clone, Debug, Deserialize, Serialize)]
struct ObservationWire {
    #[serde(rename = "resourceType")]
    resource_type: String,

    #[serde(default)]
    id: Option<String>,

    #[serde(default)]
    meta: Option<MetaWire>,

    #[serde(default)]
    status: Option<String>,

    #[serde(default)]
    category: Vec<CodeableConcept>,

    #[serde(default)]
    code: CodeableConcept,

    #[serde(default)]
    subject: Option<Reference>,

    #[serde(default)]
    encounter: Option<Reference>,

    #[serde(rename = "effectiveDateTime", default)]
    effective_date_time: Option<String>,

    #[serde(rename = "valueQuantity", default)]
    value_quantity: Option<Quantity>,

    #[serde(default)]
    component: Vec<ComponentWire>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct MetaWire {
    #[serde(default)]
    tag: Vec<Coding>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct ComponentWire {
    #[serde(default)]
    code: CodeableConcept,

    #[serde(rename = "valueQuantity", default)]
    value_quantity: Option<Quantity>,
}

// ============================================================================
// Helper functions (internal)
// ============================================================================

fn wire_to_domain(wire: ObservationWire) -> FhirResult<ObservationData> {
    expect_resource_type(&wire.resource_type, "Observation")?;

    // FHIR dateTime allows partial dates; those carry no instant and are dropped.
    let effective = wire
        .effective_date_time
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    Ok(ObservationData {
        id: wire.id,
        status: wire.status,
        category: wire.category,
        code: wire.code,
        subject: wire.subject,
        encounter: wire.encounter,
        effective,
        value: wire.value_quantity,
        components: wire
            .component
            .into_iter()
            .map(|c| ObservationComponent {
                code: c.code,
                value: c.value_quantity,
            })
            .collect(),
        tags: wire.meta.map(|m| m.tag).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BP_READING: &str = r#"{
        "resourceType": "Observation",
        "id": "bp-1",
        "meta": {"tag": [{"system": "https://careview.example/tags", "code": "omron-bluetooth"}]},
        "status": "final",
        "category": [{"coding": [{"system": "http://terminology.hl7.org/CodeSystem/observation-category", "code": "vital-signs"}]}],
        "code": {"coding": [{"system": "http://loinc.org", "code": "55284-4", "display": "Blood pressure"}]},
        "subject": {"reference": "Patient/p1"},
        "encounter": {"reference": "Encounter/enc-9"},
        "effectiveDateTime": "2024-03-01T09:30:00Z",
        "component": [
            {"code": {"coding": [{"system": "http://loinc.org", "code": "8480-6"}]}, "valueQuantity": {"value": 128, "unit": "mmHg"}},
            {"code": {"coding": [{"system": "http://loinc.org", "code": "8462-4"}]}, "valueQuantity": {"value": 82, "unit": "mmHg"}}
        ]
    }"#;

    #[test]
    fn parses_blood_pressure_reading() {
        let obs = Observation::parse(BP_READING).expect("parse observation");
        assert_eq!(obs.id.as_deref(), Some("bp-1"));
        assert_eq!(obs.encounter_id(), Some("enc-9"));
        assert_eq!(obs.components.len(), 2);
        assert_eq!(
            obs.components[0].value.as_ref().and_then(|q| q.value),
            Some(128.0)
        );
        assert_eq!(obs.tags.len(), 1);
        assert_eq!(
            obs.category_coding().and_then(|c| c.code()),
            Some("vital-signs")
        );
        assert!(obs.effective.is_some());
    }

    #[test]
    fn partial_dates_do_not_fail_parsing() {
        let input = r#"{"resourceType": "Observation", "effectiveDateTime": "2024-03"}"#;
        let obs = Observation::parse(input).expect("parse observation");
        assert!(obs.effective.is_none());
    }

    #[test]
    fn wrong_shape_reports_field_path() {
        let input = r#"{"resourceType": "Observation", "code": {"coding": "nope"}}"#;
        let err = Observation::parse(input).expect_err("should fail");
        assert!(err.to_string().contains("code.coding"), "{err}");
    }
}
