//! Coded-value datatypes shared by every resource.
//!
//! FHIR servers add optional fields freely, so these types tolerate unknown keys and only
//! model what Careview reads.

use serde::{Deserialize, Serialize};

/// A single code from a code system.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl Coding {
    /// Convenience constructor for a system-qualified code.
    pub fn new(system: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            code: Some(code.into()),
            ..Self::default()
        }
    }

    /// Builder-style display text setter.
    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }

    pub fn system(&self) -> Option<&str> {
        self.system.as_deref()
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn display(&self) -> Option<&str> {
        self.display.as_deref()
    }
}

/// A concept expressed as one or more codings plus optional free text.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeableConcept {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub coding: Vec<Coding>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl CodeableConcept {
    pub fn from_coding(coding: Coding) -> Self {
        Self {
            coding: vec![coding],
            text: None,
        }
    }

    /// True if any coding carries exactly this system and code.
    pub fn has_coding(&self, system: &str, code: &str) -> bool {
        self.coding
            .iter()
            .any(|c| c.system() == Some(system) && c.code() == Some(code))
    }
}

/// A literal reference to another resource (`Encounter/123` or an absolute URL).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl Reference {
    pub fn to(resource_type: &str, id: &str) -> Self {
        Self {
            reference: Some(format!("{resource_type}/{id}")),
            display: None,
        }
    }

    /// Returns the logical id if this reference points at `resource_type`.
    ///
    /// Accepts relative (`Encounter/123`), absolute (`https://x/fhir/Encounter/123`) and
    /// versioned (`Encounter/123/_history/2`) forms.
    pub fn id_for(&self, resource_type: &str) -> Option<&str> {
        let reference = self.reference.as_deref()?;
        let reference = match reference.find("/_history/") {
            Some(pos) => &reference[..pos],
            None => reference,
        };
        let mut parts = reference.rsplit('/');
        let id = parts.next()?;
        let kind = parts.next()?;
        if kind == resource_type && !id.is_empty() {
            Some(id)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_extracts_relative_id() {
        let r = Reference::to("Encounter", "123");
        assert_eq!(r.id_for("Encounter"), Some("123"));
        assert_eq!(r.id_for("Patient"), None);
    }

    #[test]
    fn reference_extracts_absolute_and_versioned_ids() {
        let r = Reference {
            reference: Some("https://ehr.example/fhir/Encounter/abc/_history/3".into()),
            display: None,
        };
        assert_eq!(r.id_for("Encounter"), Some("abc"));
    }

    #[test]
    fn reference_without_type_segment_is_none() {
        let r = Reference {
            reference: Some("abc".into()),
            display: None,
        };
        assert_eq!(r.id_for("Encounter"), None);
    }

    #[test]
    fn codeable_concept_matches_system_and_code() {
        let concept = CodeableConcept::from_coding(Coding::new("http://loinc.org", "55284-4"));
        assert!(concept.has_coding("http://loinc.org", "55284-4"));
        assert!(!concept.has_coding("http://snomed.info/sct", "55284-4"));
    }

    #[test]
    fn coding_tolerates_unknown_keys() {
        let json = r#"{"system":"s","code":"c","userSelected":true}"#;
        let coding: Coding = serde_json::from_str(json).expect("parse coding");
        assert_eq!(coding.code(), Some("c"));
    }
}
