//! Sessions and the session table.
//!
//! A session is created by whoever performed the credential exchange and owns exactly one
//! [`ResourceCache`] and one [`CardCache`]. Sessions are independent: the table is a sharded
//! concurrent map, so work on one session never blocks another.

use crate::cache::{PopulationPool, ResourceCache};
use crate::cards::CardCache;
use crate::constants::{DEFAULT_POPULATION_POOL_CAPACITY, DEFAULT_PROVISIONAL_TTL};
use crate::error::{CoreError, CoreResult};
use careview_types::{Audience, SessionId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info};

/// Access to the patient's FHIR server.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub fhir_base_url: String,
    pub bearer_token: String,
    pub user_id: Option<String>,
}

impl Credentials {
    pub fn new(fhir_base_url: impl Into<String>, bearer_token: impl Into<String>) -> Self {
        Self {
            fhir_base_url: fhir_base_url.into(),
            bearer_token: bearer_token.into(),
            user_id: None,
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("fhir_base_url", &self.fhir_base_url)
            .field("bearer_token", &"<redacted>")
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// Who a session belongs to and what it renders.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionIdentity {
    pub credentials: Credentials,
    pub audience: Audience,
    /// Internal (FHIR logical) patient id.
    pub patient_id: String,
}

/// One user session.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    identity: SessionIdentity,
    cache: ResourceCache,
    cards: CardCache,
    created_at: DateTime<Utc>,
    provisional: AtomicBool,
}

impl Session {
    fn new(id: SessionId, identity: SessionIdentity, cache: ResourceCache, provisional: bool) -> Self {
        Self {
            id,
            identity,
            cache,
            cards: CardCache::new(),
            created_at: Utc::now(),
            provisional: AtomicBool::new(provisional),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn audience(&self) -> Audience {
        self.identity.audience
    }

    pub fn patient_id(&self) -> &str {
        &self.identity.patient_id
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    pub fn cards(&self) -> &CardCache {
        &self.cards
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_provisional(&self) -> bool {
        self.provisional.load(Ordering::Acquire)
    }

    /// Soft reset: drop cached resources and card groups, keep the identity.
    pub async fn flush(&self) {
        self.cache.clear_all();
        self.cards.delete_all_cards().await;
    }
}

/// Concurrent table of live sessions.
pub struct SessionStore {
    sessions: Arc<DashMap<SessionId, Arc<Session>>>,
    pool: PopulationPool,
    provisional_ttl: Duration,
}

impl SessionStore {
    /// A store whose sessions may each run `population_concurrency` populations at once.
    pub fn new(population_concurrency: usize) -> Self {
        Self::with_pool(PopulationPool::new(
            population_concurrency,
            DEFAULT_POPULATION_POOL_CAPACITY,
        ))
    }

    pub fn with_pool(pool: PopulationPool) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            pool,
            provisional_ttl: DEFAULT_PROVISIONAL_TTL,
        }
    }

    /// Lifetime given to sessions from [`create_provisional`](Self::create_provisional).
    pub fn with_provisional_ttl(mut self, ttl: Duration) -> Self {
        self.provisional_ttl = ttl;
        self
    }

    pub fn provisional_ttl(&self) -> Duration {
        self.provisional_ttl
    }

    /// Register a session, replacing any previous session with the same id.
    pub fn create(&self, id: SessionId, identity: SessionIdentity) -> Arc<Session> {
        self.insert(id, identity, false)
    }

    /// Register a session that is destroyed after the store's provisional TTL unless
    /// [`promote`](Self::promote)d.
    ///
    /// Must be called from within a tokio runtime.
    pub fn create_provisional(&self, id: SessionId, identity: SessionIdentity) -> Arc<Session> {
        self.create_provisional_with_ttl(id, identity, self.provisional_ttl)
    }

    /// [`create_provisional`](Self::create_provisional) with an explicit lifetime.
    pub fn create_provisional_with_ttl(
        &self,
        id: SessionId,
        identity: SessionIdentity,
        ttl: Duration,
    ) -> Arc<Session> {
        let session = self.insert(id.clone(), identity, true);
        let sessions = Arc::clone(&self.sessions);
        let watched: Weak<Session> = Arc::downgrade(&session);

        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let expired = sessions
                .remove_if(&id, |_, current| {
                    watched
                        .upgrade()
                        .is_some_and(|s| Arc::ptr_eq(&s, current) && s.is_provisional())
                })
                .is_some();
            if expired {
                info!("provisional session {id} expired");
            }
        });

        session
    }

    fn insert(&self, id: SessionId, identity: SessionIdentity, provisional: bool) -> Arc<Session> {
        let session = Arc::new(Session::new(
            id.clone(),
            identity,
            self.pool.new_cache(),
            provisional,
        ));
        if self.sessions.insert(id.clone(), Arc::clone(&session)).is_some() {
            debug!("session {id} replaced");
        }
        info!(
            "session {id} created for patient {} ({})",
            session.patient_id(),
            session.audience()
        );
        session
    }

    /// Turn a provisional session into a full one.
    pub fn promote(&self, id: &SessionId) -> CoreResult<Arc<Session>> {
        let session = self.get(id)?;
        session.provisional.store(false, Ordering::Release);
        info!("session {id} promoted");
        Ok(session)
    }

    pub fn get(&self, id: &SessionId) -> CoreResult<Arc<Session>> {
        self.sessions
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| CoreError::SessionMissing(id.to_string()))
    }

    /// Remove a session entirely. Returns whether it existed.
    pub fn destroy(&self, id: &SessionId) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            info!("session {id} destroyed");
        }
        removed
    }

    /// Clear a session's resources and cards while keeping its identity.
    pub async fn flush(&self, id: &SessionId) -> CoreResult<()> {
        let session = self.get(id)?;
        session.flush().await;
        debug!("session {id} flushed");
        Ok(())
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Interrupt every cache waiter in every session.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{ResourceKind, SlotStatus, SlotValue};
    use crate::cards::{Card, CardDetail, DetailScheme, Indicator};
    use crate::error::CoreError;

    fn sid(value: &str) -> SessionId {
        SessionId::new(value).expect("valid session id")
    }

    fn identity() -> SessionIdentity {
        SessionIdentity {
            credentials: Credentials::new("https://ehr.example/fhir", "secret-token")
                .with_user_id("u1"),
            audience: Audience::CareTeam,
            patient_id: "p42".into(),
        }
    }

    #[test]
    fn credentials_debug_redacts_token() {
        let rendered = format!("{:?}", identity().credentials);
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("redacted"));
    }

    #[tokio::test]
    async fn missing_session_is_an_error() {
        let store = SessionStore::new(5);
        let err = store.get(&sid("nope")).expect_err("missing");
        assert!(matches!(err, CoreError::SessionMissing(id) if id == "nope"));
        assert!(store.flush(&sid("nope")).await.is_err());
    }

    #[tokio::test]
    async fn flush_keeps_identity_and_clears_state() {
        let store = SessionStore::new(5);
        let session = store.create(sid("s1"), identity());

        session
            .cache()
            .get_or_populate(ResourceKind::Conditions, async {
                Ok::<_, CoreError>(SlotValue::Records(vec![]))
            })
            .await
            .expect("populated");
        let detail = CardDetail::new("why|[]|any|[]", DetailScheme::Pipe);
        session
            .cards()
            .set_cards(
                Audience::CareTeam,
                "bp",
                vec![Card::new("s", Indicator::Info, detail)],
            )
            .await;

        store.flush(&sid("s1")).await.expect("flushed");

        let after = store.get(&sid("s1")).expect("still present");
        assert_eq!(after.identity(), &identity());
        assert_eq!(after.patient_id(), "p42");
        for kind in ResourceKind::ALL {
            assert_eq!(after.cache().status(kind), SlotStatus::Empty);
        }
        assert!(after.cards().is_empty().await);
    }

    #[tokio::test]
    async fn destroy_removes_session() {
        let store = SessionStore::new(5);
        store.create(sid("s1"), identity());
        assert!(store.destroy(&sid("s1")));
        assert!(!store.destroy(&sid("s1")));
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unpromoted_provisional_session_expires() {
        let store = SessionStore::new(5);
        let session =
            store.create_provisional_with_ttl(sid("p"), identity(), Duration::from_secs(60));
        assert!(session.is_provisional());

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(!store.contains(&sid("p")));
    }

    #[tokio::test(start_paused = true)]
    async fn promoted_session_survives_expiry() {
        let store = SessionStore::new(5);
        store.create_provisional_with_ttl(sid("p"), identity(), Duration::from_secs(60));
        let promoted = store.promote(&sid("p")).expect("present");
        assert!(!promoted.is_provisional());

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(store.contains(&sid("p")));
    }

    #[tokio::test(start_paused = true)]
    async fn provisional_session_uses_configured_ttl() {
        let store = SessionStore::new(5).with_provisional_ttl(Duration::from_secs(30));
        assert_eq!(store.provisional_ttl(), Duration::from_secs(30));
        let _session = store.create_provisional(sid("p"), identity());

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(store.contains(&sid("p")));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!store.contains(&sid("p")));
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_ignores_replacement_session() {
        let store = SessionStore::new(5);
        store.create_provisional_with_ttl(sid("p"), identity(), Duration::from_secs(60));
        store.create(sid("p"), identity());

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(store.contains(&sid("p")));
    }
}
