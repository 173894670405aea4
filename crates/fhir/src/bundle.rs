//! FHIR search-result bundles.
//!
//! A search response is a `Bundle` of type `searchset`. Careview only needs the entries and
//! the `next` paging link; everything else is ignored.

use crate::{expect_resource_type, wire_from_str, wire_from_value, FhirResult};
use serde::{Deserialize, Serialize};

// ============================================================================
// Public domain-level types
// ============================================================================

/// One entry of a search result.
#[derive(Clone, Debug, PartialEq)]
pub struct BundleEntry {
    /// Absolute URL of the resource, when the server supplies one.
    pub full_url: Option<String>,

    /// The resource itself, kept as raw JSON so callers decide how to translate it.
    pub resource: serde_json::Value,
}

impl BundleEntry {
    /// The `resourceType` of the contained resource, if present.
    pub fn resource_type(&self) -> Option<&str> {
        self.resource.get("resourceType").and_then(|v| v.as_str())
    }

    /// The logical id of the contained resource, if present.
    pub fn resource_id(&self) -> Option<&str> {
        self.resource.get("id").and_then(|v| v.as_str())
    }
}

/// Domain-level carrier for one page of search results.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BundleData {
    pub entries: Vec<BundleEntry>,

    /// URL of the next page, if the server paginated the result.
    pub next: Option<String>,

    /// Total matches reported by the server (across all pages), if any.
    pub total: Option<u64>,
}

// ============================================================================
// Public Bundle operations
// ============================================================================

/// Bundle operations.
///
/// This is a zero-sized type used for namespacing bundle-related operations.
pub struct Bundle;

impl Bundle {
    /// Parse a search bundle from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`crate::FhirError`] if the JSON does not match the bundle wire schema or the
    /// resourceType is not `Bundle`.
    pub fn parse(json_text: &str) -> FhirResult<BundleData> {
        let wire: BundleWire = wire_from_str(json_text, "Bundle")?;
        wire_to_domain(wire)
    }

    /// Parse a search bundle from an already-decoded JSON value.
    pub fn from_value(value: serde_json::Value) -> FhirResult<BundleData> {
        let wire: BundleWire = wire_from_value(value, "Bundle")?;
        wire_to_domain(wire)
    }

    /// Render a bundle as searchset JSON.
    ///
    /// Mostly useful for building fixtures and prefetch payloads.
    pub fn render(data: &BundleData) -> FhirResult<String> {
        let wire = domain_to_wire(data);
        Ok(serde_json::to_string(&wire)?)
    }

    /// Render a bundle as a searchset JSON value.
    pub fn to_value(data: &BundleData) -> FhirResult<serde_json::Value> {
        let wire = domain_to_wire(data);
        Ok(serde_json::to_value(&wire)?)
    }
}

// ============================================================================
// Wire types (internal)
// ============================================================================

#[derive(Clone, Debug, Deserialize, Serialize)]
struct BundleWire {
    #[serde(rename = "resourceType")]
    resource_type: String,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    bundle_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    total: Option<u64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    link: Vec<BundleLinkWire>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    entry: Vec<BundleEntryWire>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct BundleLinkWire {
    relation: String,
    url: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct BundleEntryWire {
    #[serde(rename = "fullUrl", default, skip_serializing_if = "Option::is_none")]
    full_url: Option<String>,

    #[serde(default)]
    resource: serde_json::Value,
}

// ============================================================================
// Helper functions (internal)
// ============================================================================

fn wire_to_domain(wire: BundleWire) -> FhirResult<BundleData> {
    expect_resource_type(&wire.resource_type, "Bundle")?;

    let next = wire
        .link
        .into_iter()
        .find(|l| l.relation == "next" && !l.url.trim().is_empty())
        .map(|l| l.url);

    let entries = wire
        .entry
        .into_iter()
        .map(|e| BundleEntry {
            full_url: e.full_url,
            resource: e.resource,
        })
        .collect();

    Ok(BundleData {
        entries,
        next,
        total: wire.total,
    })
}

fn domain_to_wire(data: &BundleData) -> BundleWire {
    BundleWire {
        resource_type: "Bundle".to_string(),
        bundle_type: Some("searchset".to_string()),
        total: data.total,
        link: data
            .next
            .iter()
            .map(|url| BundleLinkWire {
                relation: "next".to_string(),
                url: url.clone(),
            })
            .collect(),
        entry: data
            .entries
            .iter()
            .map(|e| BundleEntryWire {
                full_url: e.full_url.clone(),
                resource: e.resource.clone(),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FhirError;

    #[test]
    fn parses_entries_and_next_link() {
        let input = r#"{
            "resourceType": "Bundle",
            "type": "searchset",
            "total": 3,
            "link": [
                {"relation": "self", "url": "https://ehr/fhir/Observation?code=x"},
                {"relation": "next", "url": "https://ehr/fhir?_getpages=abc&_offset=2"}
            ],
            "entry": [
                {"fullUrl": "https://ehr/fhir/Observation/1", "resource": {"resourceType": "Observation", "id": "1"}},
                {"resource": {"resourceType": "Observation", "id": "2"}}
            ]
        }"#;

        let bundle = Bundle::parse(input).expect("parse bundle");
        assert_eq!(bundle.entries.len(), 2);
        assert_eq!(bundle.total, Some(3));
        assert_eq!(
            bundle.next.as_deref(),
            Some("https://ehr/fhir?_getpages=abc&_offset=2")
        );
        assert_eq!(bundle.entries[0].resource_id(), Some("1"));
        assert_eq!(bundle.entries[1].resource_type(), Some("Observation"));
    }

    #[test]
    fn bundle_without_links_has_no_next_page() {
        let input = r#"{"resourceType": "Bundle", "type": "searchset"}"#;
        let bundle = Bundle::parse(input).expect("parse bundle");
        assert!(bundle.entries.is_empty());
        assert!(bundle.next.is_none());
    }

    #[test]
    fn rejects_other_resource_types() {
        let input = r#"{"resourceType": "OperationOutcome"}"#;
        let err = Bundle::parse(input).expect_err("should reject");
        assert!(matches!(err, FhirError::InvalidInput(msg) if msg.contains("OperationOutcome")));
    }

    #[test]
    fn reports_path_of_wrong_types() {
        let input = r#"{"resourceType": "Bundle", "link": [{"relation": 5, "url": "x"}]}"#;
        let err = Bundle::parse(input).expect_err("should reject");
        match err {
            FhirError::Translation(msg) => assert!(msg.contains("link"), "{msg}"),
            other => panic!("expected Translation error, got {other:?}"),
        }
    }

    #[test]
    fn render_keeps_next_link() {
        let data = BundleData {
            entries: vec![],
            next: Some("https://ehr/fhir/page2".into()),
            total: None,
        };
        let json = Bundle::render(&data).expect("render");
        let reparsed = Bundle::parse(&json).expect("reparse");
        assert_eq!(reparsed.next, data.next);
    }
}
