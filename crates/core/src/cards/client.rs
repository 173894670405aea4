//! Hook-service client and the card refresh flow.
//!
//! `refresh` discovers the services a hook endpoint offers, calls each one with the session's
//! context and prefetch data, and stores the decoded cards as one group per service id. A
//! service that fails (transport, status or decode) contributes a single error card and never
//! stops the other services from being refreshed.

use super::detail::{CardDetail, DetailScheme};
use super::model::{Card, Indicator};
use super::sanitize::sanitize;
use crate::cache::{ResourceKind, SlotValue};
use crate::constants::CDS_SERVICES_PATH;
use crate::error::{CoreError, CoreResult};
use crate::population::ClinicalDataService;
use crate::session::Session;
use async_trait::async_trait;
use fhir::{Bundle, BundleData, BundleEntry, Patient};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One service advertised by the discovery endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub id: String,

    #[serde(default)]
    pub hook: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Prefetch key to FHIR query template.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub prefetch: BTreeMap<String, String>,
}

/// A card exactly as the hook service returns it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCard {
    #[serde(default)]
    pub summary: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indicator: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DiscoveryResponse {
    #[serde(default)]
    services: Vec<ServiceDescriptor>,
}

#[derive(Debug, Deserialize)]
struct CardsResponse {
    #[serde(default)]
    cards: Vec<RawCard>,
}

/// The decision-support endpoint.
#[async_trait]
pub trait HookServiceClient: Send + Sync {
    async fn discover(&self) -> CoreResult<Vec<ServiceDescriptor>>;

    async fn invoke(&self, service_id: &str, request: &Value) -> CoreResult<Vec<RawCard>>;
}

/// [`HookServiceClient`] over HTTP.
pub struct HttpHookClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpHookClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::ConfigurationError(format!("HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> CoreResult<Value> {
        let response = request
            .send()
            .await
            .map_err(|e| CoreError::RemoteQueryFailed(e.to_string()))?;

        let status = response.status();
        let url = response.url().to_string();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::RemoteQueryFailed(format!(
                "{url} returned {status}: {body}"
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| CoreError::DecodeFailed(format!("{url} returned invalid JSON: {e}")))
    }
}

#[async_trait]
impl HookServiceClient for HttpHookClient {
    async fn discover(&self) -> CoreResult<Vec<ServiceDescriptor>> {
        let url = format!("{}/{CDS_SERVICES_PATH}", self.base_url);
        let body = self.send(self.client.get(&url)).await?;
        let discovery: DiscoveryResponse = serde_json::from_value(body)
            .map_err(|e| CoreError::DecodeFailed(format!("discovery document: {e}")))?;
        Ok(discovery.services)
    }

    async fn invoke(&self, service_id: &str, request: &Value) -> CoreResult<Vec<RawCard>> {
        let url = format!("{}/{CDS_SERVICES_PATH}/{service_id}", self.base_url);
        let body = self.send(self.client.post(&url).json(request)).await?;
        let response: CardsResponse = serde_json::from_value(body)
            .map_err(|e| CoreError::DecodeFailed(format!("cards from {service_id}: {e}")))?;
        Ok(response.cards)
    }
}

/// Decode a service's raw cards.
///
/// # Errors
///
/// [`CoreError::DecodeFailed`] if any card's detail cannot be decoded.
pub fn decode_cards(
    raw: Vec<RawCard>,
    scheme: DetailScheme,
    prefetch_modified: bool,
) -> CoreResult<Vec<Card>> {
    raw.into_iter()
        .map(|raw| {
            let indicator = raw
                .indicator
                .as_deref()
                .map(Indicator::from_wire)
                .unwrap_or_default();
            let detail = CardDetail::new(raw.detail.unwrap_or_default(), scheme);
            let card = Card::new(raw.summary, indicator, detail)
                .with_prefetch_modified(prefetch_modified);
            card.detail().validate()?;
            Ok(card)
        })
        .collect()
}

/// An outbound hook request and whether its prefetch data had to be cleaned.
#[derive(Clone, Debug, PartialEq)]
pub struct HookRequest {
    pub body: Value,
    pub prefetch_modified: bool,
}

/// Fetches, decodes and caches a session's cards.
pub struct CardService {
    hooks: Arc<dyn HookServiceClient>,
    data: ClinicalDataService,
    scheme: DetailScheme,
}

impl CardService {
    pub fn new(hooks: Arc<dyn HookServiceClient>, data: ClinicalDataService, scheme: DetailScheme) -> Self {
        Self {
            hooks,
            data,
            scheme,
        }
    }

    /// Refresh every card group of the session's audience. Returns the hook ids stored.
    pub async fn refresh(&self, session: &Session) -> Vec<String> {
        let audience = session.audience();
        let services = match self.hooks.discover().await {
            Ok(services) => services,
            Err(e) => {
                warn!("hook service discovery failed: {e}");
                session
                    .cards()
                    .set_cards(audience, CDS_SERVICES_PATH, vec![Card::error(e.to_string(), false)])
                    .await;
                return vec![CDS_SERVICES_PATH.to_string()];
            }
        };

        let mut refreshed = Vec::with_capacity(services.len());
        for service in &services {
            let cards = self.refresh_service(session, service).await;
            session.cards().set_cards(audience, &service.id, cards).await;
            refreshed.push(service.id.clone());
        }
        info!(
            "refreshed {} card group(s) for session {}",
            refreshed.len(),
            session.id()
        );
        refreshed
    }

    async fn refresh_service(&self, session: &Session, service: &ServiceDescriptor) -> Vec<Card> {
        let request = self.build_request(session, service).await;
        if request.prefetch_modified {
            debug!("prefetch for {} needed sanitizing", service.id);
        }

        let outcome = match self.hooks.invoke(&service.id, &request.body).await {
            Ok(raw) => decode_cards(raw, self.scheme, request.prefetch_modified),
            Err(e) => Err(e),
        };

        outcome.unwrap_or_else(|e| {
            warn!("hook service {} failed: {e}", service.id);
            vec![Card::error(e.to_string(), request.prefetch_modified)]
        })
    }

    /// The CDS Hooks request for `service`. Only the prefetch data is 7-bit cleaned; the
    /// context identifiers are sent as the session holds them.
    pub async fn build_request(&self, session: &Session, service: &ServiceDescriptor) -> HookRequest {
        let identity = session.identity();
        let mut prefetch = Map::new();

        for (key, template) in &service.prefetch {
            let Some(kind) = self
                .data
                .catalog()
                .prefetch_kind(key)
                .or_else(|| kind_for_template(template))
            else {
                debug!("no resource kind for prefetch key {key} ({template})");
                continue;
            };

            match self.data.get(session, kind).await {
                Ok(value) => match prefetch_value(&value) {
                    Ok(rendered) => {
                        prefetch.insert(key.clone(), rendered);
                    }
                    Err(e) => warn!("cannot render prefetch {key}: {e}"),
                },
                Err(e) => warn!("prefetch {key} unavailable: {e}"),
            }
        }

        let prefetch = sanitize(&Value::Object(prefetch));
        let body = json!({
            "hookInstance": Uuid::new_v4().to_string(),
            "hook": service.hook,
            "context": {
                "patientId": identity.patient_id,
                "userId": identity.credentials.user_id,
                "audience": identity.audience,
            },
            "prefetch": prefetch.value,
        });
        HookRequest {
            body,
            prefetch_modified: prefetch.modified,
        }
    }
}

fn kind_for_template(template: &str) -> Option<ResourceKind> {
    let resource_type = template
        .split(['/', '?'])
        .next()
        .unwrap_or_default()
        .trim();
    match resource_type {
        "Patient" => Some(ResourceKind::Patient),
        "Encounter" => Some(ResourceKind::Encounters),
        "Observation" => Some(ResourceKind::Observations),
        "Condition" => Some(ResourceKind::Conditions),
        "Goal" => Some(ResourceKind::CurrentGoals),
        "MedicationRequest" | "MedicationStatement" => Some(ResourceKind::Medications),
        "AdverseEvent" => Some(ResourceKind::AdverseEvents),
        _ => None,
    }
}

fn prefetch_value(value: &SlotValue) -> CoreResult<Value> {
    match value {
        SlotValue::Patient(patient) => Ok(Patient::to_value(patient)?),
        SlotValue::Records(records) => {
            let bundle = BundleData {
                entries: records
                    .iter()
                    .map(|r| BundleEntry {
                        full_url: None,
                        resource: r.resource.clone(),
                    })
                    .collect(),
                next: None,
                total: Some(records.len() as u64),
            };
            Ok(Bundle::to_value(&bundle)?)
        }
    }
}
