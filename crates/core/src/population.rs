//! Fetch functions that fill a session's resource slots.
//!
//! Each [`ResourceKind`] is fetched according to its catalog binding (or a default search
//! for the kind's FHIR resource type). Observations are additionally tagged with where the
//! reading was taken, using the catalog's source rules and the encounters they were
//! recorded in.

use crate::cache::{ClinicalRecord, FetchFuture, ResourceKind, SlotValue};
use crate::catalog::{Catalog, ResourceBinding};
use crate::classifier::ObservationSource;
use crate::error::{CoreError, CoreResult};
use crate::query::{BatchQueryEngine, FhirConnector};
use crate::session::{Session, SessionIdentity};
use fhir::{Encounter, EncounterData, Observation, Patient};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// What the UI should render for a resource kind.
#[derive(Clone, Debug)]
pub enum DataAvailability {
    Available(Arc<SlotValue>),
    Unavailable { kind: ResourceKind, reason: String },
}

impl DataAvailability {
    pub fn is_available(&self) -> bool {
        matches!(self, DataAvailability::Available(_))
    }
}

/// Populates resource slots from the session's FHIR server.
#[derive(Clone)]
pub struct ClinicalDataService {
    connector: Arc<dyn FhirConnector>,
    catalog: Arc<Catalog>,
}

impl ClinicalDataService {
    pub fn new(connector: Arc<dyn FhirConnector>, catalog: Arc<Catalog>) -> Self {
        Self { connector, catalog }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// The fetch that populates `kind` for `identity`. Nothing happens until it is polled.
    pub fn fetch(&self, identity: &SessionIdentity, kind: ResourceKind) -> FetchFuture {
        let connector = Arc::clone(&self.connector);
        let catalog = Arc::clone(&self.catalog);
        let identity = identity.clone();

        Box::pin(async move {
            let client = connector.connect(&identity.credentials)?;
            let engine = BatchQueryEngine::new(client);
            populate(kind, &engine, &catalog, &identity.patient_id).await
        })
    }

    /// Cached value of `kind`, populating the slot on first use.
    pub async fn get(&self, session: &Session, kind: ResourceKind) -> CoreResult<Arc<SlotValue>> {
        let fetch = self.fetch(session.identity(), kind);
        session.cache().get(kind, Some(fetch)).await
    }

    /// Drop the cached value of `kind` and fetch it again.
    pub async fn refresh(&self, session: &Session, kind: ResourceKind) -> CoreResult<Arc<SlotValue>> {
        session.cache().clear_slot(kind);
        self.get(session, kind).await
    }

    /// [`get`](Self::get), with data failures turned into [`DataAvailability::Unavailable`].
    pub async fn availability(&self, session: &Session, kind: ResourceKind) -> DataAvailability {
        match self.get(session, kind).await {
            Ok(value) => DataAvailability::Available(value),
            Err(err) => {
                warn!("{kind} unavailable for session {}: {err}", session.id());
                DataAvailability::Unavailable {
                    kind,
                    reason: err.to_string(),
                }
            }
        }
    }
}

async fn populate(
    kind: ResourceKind,
    engine: &BatchQueryEngine,
    catalog: &Catalog,
    patient_id: &str,
) -> CoreResult<SlotValue> {
    match kind {
        ResourceKind::Patient => {
            let value = engine.read("Patient", patient_id).await?;
            Ok(SlotValue::Patient(Patient::from_value(value)?))
        }
        ResourceKind::Observations => {
            let engine = engine.clone().with_subject(patient_id);
            let records = fetch_observations(&engine, catalog).await?;
            Ok(SlotValue::Records(records))
        }
        other => {
            let engine = engine.clone().with_subject(patient_id);
            let records = fetch_records(&engine, &binding_for(catalog, other)?).await?;
            Ok(SlotValue::Records(records))
        }
    }
}

fn binding_for(catalog: &Catalog, kind: ResourceKind) -> CoreResult<ResourceBinding> {
    if let Some(binding) = catalog.binding(kind) {
        return Ok(binding.clone());
    }
    let binding = match kind {
        ResourceKind::Patient => {
            return Err(CoreError::ConfigurationError(
                "the patient resource has no search binding".into(),
            ))
        }
        ResourceKind::Encounters => ResourceBinding::new("Encounter", None),
        ResourceKind::Observations => ResourceBinding::new("Observation", None),
        ResourceKind::Conditions => ResourceBinding::new("Condition", None),
        ResourceKind::CurrentGoals => {
            ResourceBinding::new("Goal", None).with_param("lifecycle-status", "active")
        }
        ResourceKind::Medications => ResourceBinding::new("MedicationRequest", None),
        ResourceKind::AdverseEvents => ResourceBinding::new("AdverseEvent", None),
    };
    Ok(binding)
}

async fn fetch_records(
    engine: &BatchQueryEngine,
    binding: &ResourceBinding,
) -> CoreResult<Vec<ClinicalRecord>> {
    let engine = engine.clone().with_params(binding.params().iter().cloned());
    let entries = match binding.value_set() {
        Some(value_set) => {
            engine
                .query_by_value_set(binding.resource_type(), value_set)
                .await?
        }
        None => engine.query_all(binding.resource_type()).await?,
    };
    Ok(entries.into_iter().map(ClinicalRecord::from_entry).collect())
}

async fn fetch_observations(
    engine: &BatchQueryEngine,
    catalog: &Catalog,
) -> CoreResult<Vec<ClinicalRecord>> {
    let rules = catalog.source_rules();
    let records =
        fetch_records(engine, &binding_for(catalog, ResourceKind::Observations)?).await?;

    let encounters = if rules.uses_encounters() {
        let records =
            fetch_records(engine, &binding_for(catalog, ResourceKind::Encounters)?).await?;
        encounters_by_id(records)
    } else {
        HashMap::new()
    };

    let tagged = records
        .into_iter()
        .map(|record| {
            let source = match Observation::from_value(record.resource.clone()) {
                Ok(observation) => {
                    let encounter = observation
                        .encounter_id()
                        .and_then(|id| encounters.get(id));
                    rules.resolve_source(&observation, encounter)
                }
                Err(e) => {
                    warn!(
                        "observation {} could not be classified: {e}",
                        record.id.as_deref().unwrap_or("<no id>")
                    );
                    ObservationSource::Unknown
                }
            };
            record.with_source(source)
        })
        .collect::<Vec<_>>();

    debug!(
        "tagged {} observation(s) using {} encounter(s)",
        tagged.len(),
        encounters.len()
    );
    Ok(tagged)
}

fn encounters_by_id(records: Vec<ClinicalRecord>) -> HashMap<String, EncounterData> {
    records
        .into_iter()
        .filter_map(|record| match Encounter::from_value(record.resource) {
            Ok(encounter) => encounter.id.clone().map(|id| (id, encounter)),
            Err(e) => {
                warn!("skipping unreadable encounter: {e}");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::tests::ScriptedClient;
    use crate::session::{Credentials, SessionStore};
    use careview_types::{Audience, SessionId};
    use fhir::{BundleData, BundleEntry};
    use serde_json::json;

    const CATALOG: &str = r#"
value_sets:
  - oid: 1.2.840.1
    concepts:
      - system: http://loinc.org
        code: 85354-9
resources:
  observations:
    resource_type: Observation
    value_set: 1.2.840.1
source_rules:
  office:
    encounter:
      class_include: [AMB]
  home:
    observation:
      type_include: ["https://careview.example/tags|home"]
"#;

    fn page(resources: Vec<serde_json::Value>) -> CoreResult<BundleData> {
        Ok(BundleData {
            entries: resources
                .into_iter()
                .map(|resource| BundleEntry {
                    full_url: None,
                    resource,
                })
                .collect(),
            next: None,
            total: None,
        })
    }

    fn service(client: Arc<ScriptedClient>) -> ClinicalDataService {
        let catalog = Catalog::parse(CATALOG).expect("catalog parses");
        ClinicalDataService::new(Arc::new(client), Arc::new(catalog))
    }

    fn session(store: &SessionStore) -> Arc<Session> {
        store.create(
            SessionId::new("s1").expect("valid id"),
            SessionIdentity {
                credentials: Credentials::new("https://ehr.example/fhir", "t"),
                audience: Audience::Patient,
                patient_id: "p1".into(),
            },
        )
    }

    #[tokio::test]
    async fn observations_are_tagged_by_source() {
        let client = Arc::new(ScriptedClient::default());
        client.search_results.lock().unwrap().extend([
            page(vec![
                json!({"resourceType": "Observation", "id": "o1",
                       "code": {"coding": [{"system": "http://loinc.org", "code": "85354-9"}]},
                       "encounter": {"reference": "Encounter/e1"}}),
                json!({"resourceType": "Observation", "id": "o2",
                       "meta": {"tag": [{"system": "https://careview.example/tags", "code": "home"}]},
                       "code": {"coding": [{"system": "http://loinc.org", "code": "85354-9"}]}}),
                json!({"resourceType": "Observation", "id": "o3"}),
            ]),
            page(vec![json!({"resourceType": "Encounter", "id": "e1",
                             "class": {"system": "http://terminology.hl7.org/CodeSystem/v3-ActCode", "code": "AMB"}})]),
        ]);
        let store = SessionStore::new(5);
        let session = session(&store);

        let value = service(Arc::clone(&client))
            .get(&session, ResourceKind::Observations)
            .await
            .expect("populated");

        let sources: Vec<_> = value
            .records()
            .expect("records")
            .iter()
            .map(|r| (r.id.as_deref(), r.source))
            .collect();
        assert_eq!(
            sources,
            vec![
                (Some("o1"), Some(ObservationSource::Office)),
                (Some("o2"), Some(ObservationSource::Home)),
                (Some("o3"), Some(ObservationSource::Unknown)),
            ]
        );

        let searches = client.searches.lock().unwrap();
        assert_eq!(searches.len(), 2);
        assert_eq!(searches[0].codes.len(), 1);
        assert_eq!(searches[1].resource_type, "Encounter");
        assert!(searches[1]
            .params
            .contains(&("subject".to_string(), "Patient/p1".to_string())));
    }

    #[tokio::test]
    async fn patient_is_read_by_id() {
        let client = Arc::new(ScriptedClient::default());
        client.reads.lock().unwrap().insert(
            "Patient/p1".into(),
            json!({"resourceType": "Patient", "id": "p1",
                   "name": [{"family": "Doe", "given": ["Jane"]}]}),
        );
        let store = SessionStore::new(5);
        let session = session(&store);

        let value = service(client)
            .get(&session, ResourceKind::Patient)
            .await
            .expect("populated");
        assert_eq!(value.as_patient().map(|p| p.id.as_str()), Some("p1"));
    }

    #[tokio::test]
    async fn unbound_kinds_use_default_search() {
        let client = Arc::new(ScriptedClient {
            entries_per_search: 2,
            ..ScriptedClient::default()
        });
        let store = SessionStore::new(5);
        let session = session(&store);

        let value = service(Arc::clone(&client))
            .get(&session, ResourceKind::CurrentGoals)
            .await
            .expect("populated");
        assert_eq!(value.records().map(<[ClinicalRecord]>::len), Some(2));

        let searches = client.searches.lock().unwrap();
        assert_eq!(searches[0].resource_type, "Goal");
        assert!(searches[0]
            .params
            .contains(&("lifecycle-status".to_string(), "active".to_string())));
    }

    #[tokio::test]
    async fn failures_become_unavailable() {
        let client = Arc::new(ScriptedClient::default());
        client
            .search_results
            .lock()
            .unwrap()
            .push(Err(CoreError::RemoteQueryFailed("503 Service Unavailable".into())));
        let store = SessionStore::new(5);
        let session = session(&store);
        let service = service(client);

        match service.availability(&session, ResourceKind::Conditions).await {
            DataAvailability::Unavailable { kind, reason } => {
                assert_eq!(kind, ResourceKind::Conditions);
                assert!(reason.contains("503"), "{reason}");
            }
            DataAvailability::Available(_) => panic!("expected unavailable"),
        }

        let refreshed = service
            .refresh(&session, ResourceKind::Conditions)
            .await
            .expect("second attempt succeeds");
        assert_eq!(refreshed.records().map(<[ClinicalRecord]>::len), Some(0));
    }

    #[tokio::test]
    async fn shutdown_leaves_kinds_unavailable() {
        let client = Arc::new(ScriptedClient::default());
        let store = SessionStore::new(5);
        let session = session(&store);
        store.shutdown();

        match service(client).availability(&session, ResourceKind::Conditions).await {
            DataAvailability::Unavailable { kind, reason } => {
                assert_eq!(kind, ResourceKind::Conditions);
                assert!(reason.contains("shut"), "{reason}");
            }
            DataAvailability::Available(_) => panic!("expected unavailable"),
        }
    }
}
