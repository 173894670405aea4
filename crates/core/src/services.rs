use crate::cache::PopulationPool;
use crate::cards::{CardService, HookServiceClient, HttpHookClient};
use crate::catalog::Catalog;
use crate::config::CoreConfig;
use crate::error::CoreResult;
use crate::population::ClinicalDataService;
use crate::query::{FhirConnector, HttpFhirConnector};
use crate::session::SessionStore;
use std::sync::Arc;

/// Everything a front end needs, wired from one [`CoreConfig`].
pub struct CoreServices {
    pub config: CoreConfig,
    pub sessions: SessionStore,
    pub data: ClinicalDataService,
    pub cards: CardService,
}

impl CoreServices {
    /// Wire the HTTP clients described by `config`.
    pub fn new(config: CoreConfig, catalog: Catalog) -> CoreResult<Self> {
        let connector: Arc<dyn FhirConnector> =
            Arc::new(HttpFhirConnector::new(config.request_timeout()));
        let hooks: Arc<dyn HookServiceClient> = Arc::new(HttpHookClient::new(
            config.hooks_base_url(),
            config.request_timeout(),
        )?);
        Ok(Self::with_clients(config, catalog, connector, hooks))
    }

    /// Wire caller-supplied clients.
    pub fn with_clients(
        config: CoreConfig,
        catalog: Catalog,
        connector: Arc<dyn FhirConnector>,
        hooks: Arc<dyn HookServiceClient>,
    ) -> Self {
        let data = ClinicalDataService::new(connector, Arc::new(catalog));
        let cards = CardService::new(hooks, data.clone(), config.detail_scheme());
        let pool = PopulationPool::new(
            config.population_concurrency(),
            config.population_pool_capacity(),
        );
        let sessions =
            SessionStore::with_pool(pool).with_provisional_ttl(config.provisional_ttl());
        Self {
            config,
            sessions,
            data,
            cards,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::tests::ScriptedClient;
    use crate::session::{Credentials, SessionIdentity};
    use async_trait::async_trait;
    use careview_types::{Audience, SessionId};
    use serde_json::Value;
    use std::time::Duration;

    struct NoHooks;

    #[async_trait]
    impl HookServiceClient for NoHooks {
        async fn discover(&self) -> CoreResult<Vec<crate::cards::ServiceDescriptor>> {
            Ok(Vec::new())
        }

        async fn invoke(
            &self,
            _service_id: &str,
            _request: &Value,
        ) -> CoreResult<Vec<crate::cards::RawCard>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn provisional_sessions_follow_configured_ttl() {
        let config = CoreConfig::new("https://ehr.example/fhir".into(), "http://hooks".into())
            .expect("valid config")
            .with_provisional_ttl(Duration::from_secs(10));
        let services = CoreServices::with_clients(
            config,
            Catalog::default(),
            Arc::new(Arc::new(ScriptedClient::default())),
            Arc::new(NoHooks),
        );
        assert_eq!(services.sessions.provisional_ttl(), Duration::from_secs(10));

        let id = SessionId::new("s1").expect("valid id");
        let _session = services.sessions.create_provisional(
            id.clone(),
            SessionIdentity {
                credentials: Credentials::new("https://ehr.example/fhir", "t"),
                audience: Audience::Patient,
                patient_id: "p1".into(),
            },
        );

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(!services.sessions.contains(&id));
    }
}
