//! # Careview Core
//!
//! Session-scoped clinical data and recommendation cards.
//!
//! This crate contains:
//! - a per-session resource cache with populate-once slots ([`cache`]),
//! - the batched value-set query engine that fills it ([`query`], [`population`]),
//! - coded-value classification rules for tagging readings by source ([`classifier`]),
//! - the recommendation-card decode/cache/invalidate pipeline ([`cards`]),
//! - sessions and the concurrent session table ([`session`]).
//!
//! **No HTTP routing or view rendering**: front ends create sessions and call into these
//! services.

pub mod cache;
pub mod cards;
pub mod catalog;
pub mod classifier;
pub mod config;
pub mod constants;
pub mod error;
pub mod population;
pub mod query;
pub mod services;
pub mod session;
pub mod value_set;

pub use cache::{
    ClinicalRecord, FetchFuture, PopulationPool, ResourceCache, ResourceKind, SlotStatus,
    SlotValue,
};
pub use cards::{Card, CardCache, CardService, DetailScheme, Indicator, Suggestion};
pub use catalog::{Catalog, ResourceBinding};
pub use classifier::{classify, ObservationSource, RuleSet, SourceRules};
pub use config::CoreConfig;
pub use error::{CoreError, CoreResult};
pub use population::{ClinicalDataService, DataAvailability};
pub use query::{BatchQueryEngine, FhirSearchClient, HttpFhirClient, SearchQuery};
pub use services::CoreServices;
pub use session::{Credentials, Session, SessionIdentity, SessionStore};
pub use value_set::{Concept, ValueSet, ValueSetLookup, ValueSetRegistry};
