//! Clinical catalog: value sets, resource bindings and source classification rules.
//!
//! The catalog is a single YAML document loaded once at startup. It is parsed strictly
//! (unknown keys are rejected) and fully validated before anything uses it, so a typo in a
//! rule pattern or an unknown value-set oid stops the process instead of silently producing
//! empty result sets.
//!
//! ```yaml
//! value_sets:
//!   - oid: 2.16.840.1.113883.3.526.3.1032
//!     name: Blood pressure
//!     concepts:
//!       - system: http://loinc.org
//!         code: 85354-9
//! resources:
//!   observations:
//!     resource_type: Observation
//!     value_set: 2.16.840.1.113883.3.526.3.1032
//!     params:
//!       status: final
//! source_rules:
//!   office:
//!     encounter:
//!       class_include: [AMB]
//! prefetch:
//!   patient: patient
//! ```

use crate::cache::ResourceKind;
use crate::classifier::{RuleSet, RuleSetSpec, SourceRule, SourceRules};
use crate::error::{CoreError, CoreResult};
use crate::value_set::{Concept, ValueSet, ValueSetLookup, ValueSetRegistry};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

// ============================================================================
// Public domain-level types
// ============================================================================

/// How one resource kind is fetched from the FHIR server.
#[derive(Clone, Debug)]
pub struct ResourceBinding {
    resource_type: String,
    value_set: Option<Arc<ValueSet>>,
    params: Vec<(String, String)>,
}

impl ResourceBinding {
    pub fn new(resource_type: impl Into<String>, value_set: Option<Arc<ValueSet>>) -> Self {
        Self {
            resource_type: resource_type.into(),
            value_set,
            params: Vec::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// Value set restricting the search, or `None` for an un-coded search.
    pub fn value_set(&self) -> Option<&Arc<ValueSet>> {
        self.value_set.as_ref()
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }
}

/// Validated clinical catalog.
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    value_sets: ValueSetRegistry,
    bindings: HashMap<ResourceKind, ResourceBinding>,
    source_rules: SourceRules,
    prefetch: HashMap<String, ResourceKind>,
}

impl Catalog {
    /// Parse and validate catalog YAML.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConfigurationError`] if the YAML does not match the catalog
    /// schema (the message carries the failing path), a value-set oid is declared twice,
    /// a binding references an unknown oid, a binding is given for `patient`, or any
    /// classification pattern is malformed.
    pub fn parse(yaml_text: &str) -> CoreResult<Self> {
        let deserializer = serde_yaml::Deserializer::from_str(yaml_text);

        let wire = match serde_path_to_error::deserialize::<_, CatalogWire>(deserializer) {
            Ok(parsed) => parsed,
            Err(err) => {
                let path = err.path().to_string();
                let source = err.into_inner();
                let path = if path.is_empty() || path == "." {
                    "<root>"
                } else {
                    path.as_str()
                };
                return Err(CoreError::ConfigurationError(format!(
                    "catalog schema mismatch at {path}: {source}"
                )));
            }
        };

        Self::from_wire(wire)
    }

    /// Read and parse a catalog file.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CoreError::ConfigurationError(format!("cannot read catalog {}: {e}", path.display()))
        })?;
        Self::parse(&text)
    }

    pub fn value_sets(&self) -> &ValueSetRegistry {
        &self.value_sets
    }

    pub fn binding(&self, kind: ResourceKind) -> Option<&ResourceBinding> {
        self.bindings.get(&kind)
    }

    pub fn source_rules(&self) -> &SourceRules {
        &self.source_rules
    }

    /// Resource kind configured for a hook-service prefetch key.
    pub fn prefetch_kind(&self, key: &str) -> Option<ResourceKind> {
        self.prefetch.get(key).copied()
    }

    fn from_wire(wire: CatalogWire) -> CoreResult<Self> {
        let mut value_sets = ValueSetRegistry::new();
        for set in wire.value_sets {
            let oid = set.oid.trim().to_string();
            if oid.is_empty() {
                return Err(CoreError::ConfigurationError(
                    "value set oid cannot be empty".into(),
                ));
            }
            if value_sets.contains(&oid) {
                return Err(CoreError::ConfigurationError(format!(
                    "value set {oid} is declared more than once"
                )));
            }
            value_sets.insert(ValueSet::new(oid, set.name, set.concepts));
        }

        let mut bindings = HashMap::new();
        for (kind, spec) in wire.resources {
            if kind == ResourceKind::Patient {
                return Err(CoreError::ConfigurationError(
                    "the patient resource is read by id and cannot have a binding".into(),
                ));
            }
            let value_set = spec
                .value_set
                .map(|oid| {
                    value_sets.value_set(&oid).ok_or_else(|| {
                        CoreError::ConfigurationError(format!(
                            "binding for {kind} references unknown value set {oid}"
                        ))
                    })
                })
                .transpose()?;
            let mut binding = ResourceBinding::new(spec.resource_type, value_set);
            binding.params = spec.params.into_iter().collect();
            bindings.insert(kind, binding);
        }

        let rules = wire.source_rules;
        let source_rules = SourceRules {
            office: source_rule(rules.office)?,
            home: source_rule(rules.home)?,
            home_bluetooth: source_rule(rules.home_bluetooth)?,
        };

        Ok(Self {
            value_sets,
            bindings,
            source_rules,
            prefetch: wire.prefetch,
        })
    }
}

// ============================================================================
// Wire types (internal)
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogWire {
    #[serde(default)]
    value_sets: Vec<ValueSetWire>,

    #[serde(default)]
    resources: BTreeMap<ResourceKind, BindingWire>,

    #[serde(default)]
    source_rules: SourceRulesWire,

    #[serde(default)]
    prefetch: HashMap<String, ResourceKind>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ValueSetWire {
    oid: String,

    #[serde(default)]
    name: Option<String>,

    #[serde(default)]
    concepts: Vec<Concept>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BindingWire {
    resource_type: String,

    #[serde(default)]
    value_set: Option<String>,

    #[serde(default)]
    params: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SourceRulesWire {
    #[serde(default)]
    office: SourceRuleWire,

    #[serde(default)]
    home: SourceRuleWire,

    #[serde(default)]
    home_bluetooth: SourceRuleWire,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SourceRuleWire {
    #[serde(default)]
    observation: Option<RuleSetSpec>,

    #[serde(default)]
    encounter: Option<RuleSetSpec>,
}

// ============================================================================
// Helper functions (internal)
// ============================================================================

fn source_rule(wire: SourceRuleWire) -> CoreResult<SourceRule> {
    Ok(SourceRule {
        observation: wire.observation.as_ref().map(RuleSet::from_spec).transpose()?,
        encounter: wire.encounter.as_ref().map(RuleSet::from_spec).transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ObservationSource;
    use fhir::{CodeableConcept, Coding, EncounterData};
    use std::io::Write;

    const CATALOG: &str = r#"
value_sets:
  - oid: 1.2.3
    name: Blood pressure
    concepts:
      - system: http://loinc.org
        code: 85354-9
      - system: http://loinc.org
        code: 8480-6
resources:
  observations:
    resource_type: Observation
    value_set: 1.2.3
    params:
      status: final
  encounters:
    resource_type: Encounter
source_rules:
  office:
    encounter:
      class_include: [AMB]
      type_exclude: ["hh|home-health"]
  home:
    encounter:
      type_include: ["hh|home-health"]
prefetch:
  patient: patient
  observations: observations
"#;

    #[test]
    fn parses_complete_catalog() {
        let catalog = Catalog::parse(CATALOG).expect("catalog parses");

        let vs = catalog.value_sets().value_set("1.2.3").expect("value set");
        assert_eq!(vs.len(), 2);
        assert_eq!(vs.name(), Some("Blood pressure"));

        let obs = catalog
            .binding(ResourceKind::Observations)
            .expect("observation binding");
        assert_eq!(obs.resource_type(), "Observation");
        assert_eq!(obs.value_set().map(|v| v.oid()), Some("1.2.3"));
        assert_eq!(obs.params(), &[("status".to_string(), "final".to_string())]);

        let enc = catalog
            .binding(ResourceKind::Encounters)
            .expect("encounter binding");
        assert!(enc.value_set().is_none());
        assert!(catalog.binding(ResourceKind::Conditions).is_none());

        assert_eq!(
            catalog.prefetch_kind("observations"),
            Some(ResourceKind::Observations)
        );
        assert_eq!(catalog.prefetch_kind("goals"), None);
    }

    #[test]
    fn parsed_rules_classify_encounters() {
        let catalog = Catalog::parse(CATALOG).expect("catalog parses");
        let amb = EncounterData {
            id: Some("e1".into()),
            status: None,
            class: Some(Coding::new("http://hl7.org/v3", "AMB")),
            types: vec![],
        };
        assert_eq!(
            catalog.source_rules().encounter_source(&amb),
            ObservationSource::Office
        );

        let home = EncounterData {
            types: vec![CodeableConcept::from_coding(Coding::new("hh", "home-health"))],
            ..amb
        };
        assert_eq!(
            catalog.source_rules().encounter_source(&home),
            ObservationSource::Home
        );
    }

    #[test]
    fn unknown_field_reports_path() {
        let err = Catalog::parse("value_sets:\n  - oid: 1.2.7\n    colour: red\n")
            .expect_err("unknown field rejected");
        let message = err.to_string();
        assert!(message.contains("value_sets[0]"), "{message}");
        assert!(message.contains("colour"), "{message}");
    }

    #[test]
    fn rejects_unknown_value_set_reference() {
        let yaml = "resources:\n  conditions:\n    resource_type: Condition\n    value_set: 9.9.9.9\n";
        let err = Catalog::parse(yaml).expect_err("unknown oid");
        assert!(matches!(err, CoreError::ConfigurationError(_)));
        assert!(err.to_string().contains("9.9.9.9"));
    }

    #[test]
    fn rejects_duplicate_oid() {
        let yaml = "value_sets:\n  - oid: 1.2.7\n  - oid: 1.2.7\n";
        assert!(Catalog::parse(yaml).is_err());
    }

    #[test]
    fn rejects_patient_binding() {
        let yaml = "resources:\n  patient:\n    resource_type: Patient\n";
        assert!(Catalog::parse(yaml).is_err());
    }

    #[test]
    fn rejects_malformed_pattern() {
        let yaml = "source_rules:\n  home:\n    observation:\n      type_include: [\"a|b|c\"]\n";
        let err = Catalog::parse(yaml).expect_err("bad pattern");
        assert!(err.to_string().contains("more than one"));
    }

    #[test]
    fn empty_document_is_an_empty_catalog() {
        let catalog = Catalog::parse("{}").expect("empty catalog");
        assert!(catalog.value_sets().is_empty());
        assert_eq!(catalog.source_rules(), &SourceRules::default());
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(CATALOG.as_bytes()).expect("write catalog");
        let catalog = Catalog::load(file.path()).expect("catalog loads");
        assert_eq!(catalog.value_sets().len(), 1);

        let missing = Catalog::load(Path::new("/definitely/not/here.yaml"));
        assert!(matches!(missing, Err(CoreError::ConfigurationError(_))));
    }
}
