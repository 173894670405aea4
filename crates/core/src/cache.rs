//! Session-scoped clinical resource cache.
//!
//! Each [`ResourceKind`] owns one slot. A slot is populated at most once per generation: the
//! first caller that finds it empty and supplies a fetch claims it, the fetch runs on a
//! spawned task gated by the session's own bound and the shared [`PopulationPool`], and every
//! caller that arrives in the meantime waits on the slot's watch channel until a value or a
//! failure is published.
//!
//! Failures are sticky until [`ResourceCache::clear_slot`] is called. Clearing bumps the slot
//! generation, so a population still in flight for the old generation cannot publish.

use crate::classifier::ObservationSource;
use crate::error::{CoreError, CoreResult};
use fhir::{BundleEntry, PatientData};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, warn};

/// The clinical resource slots every session has.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Patient,
    Encounters,
    Observations,
    Conditions,
    CurrentGoals,
    Medications,
    AdverseEvents,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 7] = [
        ResourceKind::Patient,
        ResourceKind::Encounters,
        ResourceKind::Observations,
        ResourceKind::Conditions,
        ResourceKind::CurrentGoals,
        ResourceKind::Medications,
        ResourceKind::AdverseEvents,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Patient => "patient",
            ResourceKind::Encounters => "encounters",
            ResourceKind::Observations => "observations",
            ResourceKind::Conditions => "conditions",
            ResourceKind::CurrentGoals => "current_goals",
            ResourceKind::Medications => "medications",
            ResourceKind::AdverseEvents => "adverse_events",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s.trim())
            .ok_or_else(|| CoreError::ConfigurationError(format!("unknown resource kind '{s}'")))
    }
}

/// One fetched resource as held in a collection slot.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClinicalRecord {
    pub resource_type: String,
    pub id: Option<String>,
    pub resource: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<ObservationSource>,
}

impl ClinicalRecord {
    pub fn from_entry(entry: BundleEntry) -> Self {
        let resource_type = entry.resource_type().unwrap_or_default().to_string();
        let id = entry.resource_id().map(str::to_string);
        Self {
            resource_type,
            id,
            resource: entry.resource,
            source: None,
        }
    }

    pub fn with_source(mut self, source: ObservationSource) -> Self {
        self.source = Some(source);
        self
    }
}

/// The value a populated slot holds.
#[derive(Clone, Debug, PartialEq)]
pub enum SlotValue {
    Patient(PatientData),
    Records(Vec<ClinicalRecord>),
}

impl SlotValue {
    pub fn as_patient(&self) -> Option<&PatientData> {
        match self {
            SlotValue::Patient(patient) => Some(patient),
            SlotValue::Records(_) => None,
        }
    }

    pub fn records(&self) -> Option<&[ClinicalRecord]> {
        match self {
            SlotValue::Records(records) => Some(records),
            SlotValue::Patient(_) => None,
        }
    }
}

/// Observable slot state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotStatus {
    Empty,
    Populating,
    Ready,
    Failed,
}

/// Deferred fetch handed to [`ResourceCache::get`]. It is only polled if the caller claims
/// the slot.
pub type FetchFuture = Pin<Box<dyn Future<Output = CoreResult<SlotValue>> + Send + 'static>>;

#[derive(Clone, Debug)]
enum SlotState {
    Empty,
    Populating,
    Ready(Arc<SlotValue>),
    Failed(String),
}

#[derive(Clone, Debug)]
struct Slot {
    state: SlotState,
    generation: u64,
}

impl Slot {
    fn empty() -> Self {
        Self {
            state: SlotState::Empty,
            generation: 0,
        }
    }

    fn outcome(&self, kind: ResourceKind) -> Option<CoreResult<Arc<SlotValue>>> {
        match &self.state {
            SlotState::Ready(value) => Some(Ok(Arc::clone(value))),
            SlotState::Failed(message) => Some(Err(CoreError::PopulationFailed {
                kind,
                message: message.clone(),
            })),
            SlotState::Empty | SlotState::Populating => None,
        }
    }
}

/// Population limits and shutdown signal shared by every session's cache.
///
/// Each cache may run at most `per_session` populations at once; `capacity` bounds the total
/// across all sessions.
pub struct PopulationPool {
    per_session: usize,
    permits: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
}

impl PopulationPool {
    pub fn new(per_session: usize, capacity: usize) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            per_session: per_session.max(1),
            permits: Arc::new(Semaphore::new(capacity.max(1))),
            shutdown,
        }
    }

    pub fn per_session(&self) -> usize {
        self.per_session
    }

    /// A fresh, empty cache drawing on this pool.
    pub fn new_cache(&self) -> ResourceCache {
        ResourceCache::new(
            Arc::new(Semaphore::new(self.per_session)),
            Arc::clone(&self.permits),
            self.shutdown.subscribe(),
        )
    }

    /// Interrupt every waiter and fail populations that have not started yet.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        self.permits.close();
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}

enum Waited {
    Resolved(CoreResult<Arc<SlotValue>>),
    Cleared,
}

/// Per-session slots, one per [`ResourceKind`].
#[derive(Debug)]
pub struct ResourceCache {
    slots: [Arc<watch::Sender<Slot>>; ResourceKind::ALL.len()],
    session_permits: Arc<Semaphore>,
    pool_permits: Arc<Semaphore>,
    shutdown: watch::Receiver<bool>,
}

impl ResourceCache {
    /// A population holds one of `session_permits` and then one of `pool_permits` while it
    /// runs.
    pub fn new(
        session_permits: Arc<Semaphore>,
        pool_permits: Arc<Semaphore>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let slots = std::array::from_fn(|_| Arc::new(watch::channel(Slot::empty()).0));
        Self {
            slots,
            session_permits,
            pool_permits,
            shutdown,
        }
    }

    fn slot(&self, kind: ResourceKind) -> &Arc<watch::Sender<Slot>> {
        &self.slots[kind as usize]
    }

    /// Return the slot's value, populating it with `fetch` if it is empty.
    ///
    /// * populated: returns immediately.
    /// * populating: waits for the in-flight population and shares its outcome.
    /// * empty with `fetch`: claims the slot and runs the fetch on the population pool.
    /// * empty without `fetch`: waits until another caller populates the slot.
    ///
    /// # Errors
    ///
    /// [`CoreError::PopulationFailed`] if the population failed (or the slot was cleared while
    /// this caller's own population was in flight), [`CoreError::Interrupted`] on shutdown.
    pub async fn get(
        &self,
        kind: ResourceKind,
        fetch: Option<FetchFuture>,
    ) -> CoreResult<Arc<SlotValue>> {
        let slot = self.slot(kind);
        let mut fetch = fetch;

        loop {
            let mut outcome = None;
            let mut claimed = false;
            let mut observed = 0;
            slot.send_if_modified(|s| {
                observed = s.generation;
                outcome = s.outcome(kind);
                if matches!(s.state, SlotState::Empty) && fetch.is_some() {
                    s.state = SlotState::Populating;
                    claimed = true;
                    return true;
                }
                false
            });

            if let Some(result) = outcome {
                debug!("{kind} served from cache");
                return result;
            }

            if claimed {
                if let Some(fetch) = fetch.take() {
                    self.spawn_population(kind, observed, fetch);
                }
            }

            match self.wait(kind, observed).await? {
                Waited::Resolved(result) => return result,
                Waited::Cleared if claimed => {
                    return Err(CoreError::PopulationFailed {
                        kind,
                        message: "slot was cleared while populating".into(),
                    })
                }
                Waited::Cleared => continue,
            }
        }
    }

    /// [`get`](Self::get) with an unboxed fetch.
    pub async fn get_or_populate<F>(&self, kind: ResourceKind, fetch: F) -> CoreResult<Arc<SlotValue>>
    where
        F: Future<Output = CoreResult<SlotValue>> + Send + 'static,
    {
        self.get(kind, Some(Box::pin(fetch))).await
    }

    async fn wait(&self, kind: ResourceKind, generation: u64) -> CoreResult<Waited> {
        let mut updates = self.slot(kind).subscribe();
        let mut shutdown = self.shutdown.clone();

        let interrupted = async move {
            if shutdown.wait_for(|stop| *stop).await.is_err() {
                // No pool owns this cache any more; nothing can interrupt it.
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            changed = updates.wait_for(|s| {
                s.generation != generation || s.outcome(kind).is_some()
            }) => {
                let slot = changed.map_err(|_| CoreError::Interrupted(kind))?;
                if slot.generation != generation {
                    return Ok(Waited::Cleared);
                }
                match slot.outcome(kind) {
                    Some(result) => Ok(Waited::Resolved(result)),
                    None => Ok(Waited::Cleared),
                }
            }
            _ = interrupted => Err(CoreError::Interrupted(kind)),
        }
    }

    fn spawn_population(&self, kind: ResourceKind, generation: u64, fetch: FetchFuture) {
        let guard = PopulationGuard {
            slot: Arc::clone(self.slot(kind)),
            kind,
            generation,
            armed: true,
        };
        let session_permits = Arc::clone(&self.session_permits);
        let pool_permits = Arc::clone(&self.pool_permits);

        tokio::spawn(async move {
            let permits = match session_permits.acquire_owned().await {
                Ok(session) => pool_permits
                    .acquire_owned()
                    .await
                    .map(|pool| (session, pool)),
                Err(closed) => Err(closed),
            };
            let outcome = match permits {
                Ok(_permits) => {
                    debug!("populating {kind}");
                    fetch.await
                }
                Err(_) => Err(CoreError::PopulationFailed {
                    kind,
                    message: "population pool is shut down".into(),
                }),
            };
            guard.finish(outcome);
        });
    }

    /// Append a record to a populated collection slot.
    ///
    /// If the slot holds no collection this logs a warning and does nothing.
    pub fn add_record_to_slot(&self, kind: ResourceKind, record: ClinicalRecord) {
        let mut appended = false;
        self.slot(kind).send_if_modified(|s| {
            if let SlotState::Ready(value) = &mut s.state {
                if let SlotValue::Records(records) = Arc::make_mut(value) {
                    records.push(record);
                    appended = true;
                }
            }
            appended
        });

        if !appended {
            warn!("add_record_to_slot: {kind} holds no record collection; record dropped");
        }
    }

    /// Remove a slot's value and failure so the next `get` populates it again.
    pub fn clear_slot(&self, kind: ResourceKind) {
        self.slot(kind).send_modify(|s| {
            s.state = SlotState::Empty;
            s.generation = s.generation.wrapping_add(1);
        });
        debug!("{kind} cleared");
    }

    pub fn clear_all(&self) {
        for kind in ResourceKind::ALL {
            self.clear_slot(kind);
        }
    }

    /// The slot's value if populated, without waiting.
    pub fn peek(&self, kind: ResourceKind) -> Option<Arc<SlotValue>> {
        match &self.slot(kind).borrow().state {
            SlotState::Ready(value) => Some(Arc::clone(value)),
            _ => None,
        }
    }

    pub fn status(&self, kind: ResourceKind) -> SlotStatus {
        match self.slot(kind).borrow().state {
            SlotState::Empty => SlotStatus::Empty,
            SlotState::Populating => SlotStatus::Populating,
            SlotState::Ready(_) => SlotStatus::Ready,
            SlotState::Failed(_) => SlotStatus::Failed,
        }
    }

    /// Recorded failure message of a failed slot.
    pub fn failure(&self, kind: ResourceKind) -> Option<String> {
        match &self.slot(kind).borrow().state {
            SlotState::Failed(message) => Some(message.clone()),
            _ => None,
        }
    }
}

/// Publishes a population outcome, or a failure if the task is dropped before finishing.
struct PopulationGuard {
    slot: Arc<watch::Sender<Slot>>,
    kind: ResourceKind,
    generation: u64,
    armed: bool,
}

impl PopulationGuard {
    fn finish(mut self, outcome: CoreResult<SlotValue>) {
        self.armed = false;
        let state = match outcome {
            Ok(value) => SlotState::Ready(Arc::new(value)),
            Err(CoreError::PopulationFailed { message, .. }) => SlotState::Failed(message),
            Err(err) => SlotState::Failed(err.to_string()),
        };
        if let SlotState::Failed(message) = &state {
            warn!("population of {} failed: {message}", self.kind);
        }
        self.publish(state);
    }

    fn publish(&self, state: SlotState) {
        let generation = self.generation;
        let published = self.slot.send_if_modified(|s| {
            if s.generation != generation || !matches!(s.state, SlotState::Populating) {
                return false;
            }
            s.state = state;
            true
        });
        if !published {
            debug!("{} population outcome discarded; slot was cleared", self.kind);
        }
    }
}

impl Drop for PopulationGuard {
    fn drop(&mut self) {
        if self.armed {
            self.publish(SlotState::Failed("population task aborted".into()));
        }
    }
}
