//! FHIR-aligned encounter wire model.
//!
//! Careview only needs the encounter's class and type codings, which drive the
//! office/home classification of readings recorded during the encounter.

use crate::{expect_resource_type, wire_from_str, wire_from_value, CodeableConcept, Coding, FhirResult};
use serde::{Deserialize, Serialize};

/// Domain-level carrier for an encounter.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EncounterData {
    pub id: Option<String>,

    pub status: Option<String>,

    /// Encounter class (for example `AMB`, `HH`, `VR`).
    pub class: Option<Coding>,

    /// Specific encounter types.
    pub types: Vec<CodeableConcept>,
}

impl EncounterData {
    /// All codings of every type concept, in document order.
    pub fn type_codings(&self) -> impl Iterator<Item = &Coding> {
        self.types.iter().flat_map(|t| t.coding.iter())
    }
}

/// Encounter resource operations.
pub struct Encounter;

impl Encounter {
    /// Parse an encounter from JSON text.
    pub fn parse(json_text: &str) -> FhirResult<EncounterData> {
        let wire: EncounterWire = wire_from_str(json_text, "Encounter")?;
        wire_to_domain(wire)
    }

    /// Parse an encounter from a bundle entry's resource.
    pub fn from_value(value: serde_json::Value) -> FhirResult<EncounterData> {
        let wire: EncounterWire = wire_from_value(value, "Encounter")?;
        wire_to_domain(wire)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct EncounterWire {
    #[serde(rename = "resourceType")]
    resource_type: String,

    #[serde(default)]
    id: Option<String>,

    #[serde(default)]
    status: Option<String>,

    #[serde(default)]
    class: Option<Coding>,

    #[serde(rename = "type", default)]
    types: Vec<CodeableConcept>,
}

fn wire_to_domain(wire: EncounterWire) -> FhirResult<EncounterData> {
    expect_resource_type(&wire.resource_type, "Encounter")?;
    Ok(EncounterData {
        id: wire.id,
        status: wire.status,
        class: wire.class,
        types: wire.types,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_class_and_types() {
        let input = r#"{
            "resourceType": "Encounter",
            "id": "enc-1",
            "status": "finished",
            "class": {"system": "http://terminology.hl7.org/CodeSystem/v3-ActCode", "code": "AMB", "display": "ambulatory"},
            "type": [
                {"coding": [{"system": "hh", "code": "home-health"}, {"system": "x", "code": "y"}]},
                {"text": "free text only"}
            ],
            "period": {"start": "2024-01-01"}
        }"#;

        let encounter = Encounter::parse(input).expect("parse encounter");
        assert_eq!(encounter.id.as_deref(), Some("enc-1"));
        assert_eq!(
            encounter.class.as_ref().and_then(|c| c.code()),
            Some("AMB")
        );
        let codes: Vec<_> = encounter.type_codings().filter_map(|c| c.code()).collect();
        assert_eq!(codes, vec!["home-health", "y"]);
    }

    #[test]
    fn encounter_without_class_or_type() {
        let encounter =
            Encounter::parse(r#"{"resourceType": "Encounter"}"#).expect("parse encounter");
        assert!(encounter.class.is_none());
        assert_eq!(encounter.type_codings().count(), 0);
    }

    #[test]
    fn rejects_observation_passed_as_encounter() {
        let value = serde_json::json!({"resourceType": "Observation"});
        assert!(Encounter::from_value(value).is_err());
    }
}
