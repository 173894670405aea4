//! Constants used throughout the Careview core crate.

use std::time::Duration;

/// Most codes the remote server accepts in one OR-combined `code` token filter.
pub const MAX_CODES_PER_QUERY: usize = 32;

/// Default bound on concurrently running slot populations within one session.
pub const DEFAULT_POPULATION_CONCURRENCY: usize = 5;

/// Default bound on concurrently running slot populations across all sessions.
pub const DEFAULT_POPULATION_POOL_CAPACITY: usize = 64;

/// Default socket timeout applied to every remote call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default lifetime of a provisional session that is never promoted.
pub const DEFAULT_PROVISIONAL_TTL: Duration = Duration::from_secs(5 * 60);

/// Hook-service summary that means "monitoring found nothing to act on".
pub const MONITORING_SUCCESS_SUMMARY: &str = "[monitoring-success]";

/// Hook-service summary that means "render this card without a headline".
pub const BLANK_SUMMARY: &str = "[blank]";

/// Character substituted for anything outside 7-bit ASCII in outbound hook requests.
pub const SANITIZE_REPLACEMENT: char = '?';

/// Media type for FHIR JSON requests and responses.
pub const FHIR_JSON_MEDIA_TYPE: &str = "application/fhir+json";

/// Path segment of the CDS Hooks discovery endpoint.
pub const CDS_SERVICES_PATH: &str = "cds-services";
