//! Core runtime configuration.
//!
//! This module defines configuration that should be resolved once at process startup and then
//! passed into core services. The intent is to avoid reading process-wide environment variables
//! during request handling, which can lead to inconsistent behaviour in multi-threaded runtimes
//! and test harnesses.
//!
//! The `*_from_env_value` helpers take the raw `Option<String>` so that binaries own the
//! environment reads.

use crate::cards::DetailScheme;
use crate::constants::{
    DEFAULT_POPULATION_CONCURRENCY, DEFAULT_POPULATION_POOL_CAPACITY, DEFAULT_PROVISIONAL_TTL,
    DEFAULT_REQUEST_TIMEOUT,
};
use crate::error::{CoreError, CoreResult};
use std::time::Duration;

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    fhir_base_url: String,
    hooks_base_url: String,
    request_timeout: Duration,
    population_concurrency: usize,
    population_pool_capacity: usize,
    detail_scheme: DetailScheme,
    provisional_ttl: Duration,
}

impl CoreConfig {
    /// Create a new `CoreConfig` with default tuning.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConfigurationError`] if either URL is empty or not http(s).
    pub fn new(fhir_base_url: String, hooks_base_url: String) -> CoreResult<Self> {
        Ok(Self {
            fhir_base_url: validate_base_url("FHIR base URL", fhir_base_url)?,
            hooks_base_url: validate_base_url("hook service URL", hooks_base_url)?,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            population_concurrency: DEFAULT_POPULATION_CONCURRENCY,
            population_pool_capacity: DEFAULT_POPULATION_POOL_CAPACITY,
            detail_scheme: DetailScheme::default(),
            provisional_ttl: DEFAULT_PROVISIONAL_TTL,
        })
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Populations one session may run at once.
    pub fn with_population_concurrency(mut self, concurrency: usize) -> Self {
        self.population_concurrency = concurrency.max(1);
        self
    }

    /// Populations all sessions together may run at once.
    pub fn with_population_pool_capacity(mut self, capacity: usize) -> Self {
        self.population_pool_capacity = capacity.max(1);
        self
    }

    pub fn with_detail_scheme(mut self, scheme: DetailScheme) -> Self {
        self.detail_scheme = scheme;
        self
    }

    pub fn with_provisional_ttl(mut self, ttl: Duration) -> Self {
        self.provisional_ttl = ttl;
        self
    }

    pub fn fhir_base_url(&self) -> &str {
        &self.fhir_base_url
    }

    pub fn hooks_base_url(&self) -> &str {
        &self.hooks_base_url
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn population_concurrency(&self) -> usize {
        self.population_concurrency
    }

    pub fn population_pool_capacity(&self) -> usize {
        self.population_pool_capacity
    }

    pub fn detail_scheme(&self) -> DetailScheme {
        self.detail_scheme
    }

    pub fn provisional_ttl(&self) -> Duration {
        self.provisional_ttl
    }
}

fn validate_base_url(label: &str, value: String) -> CoreResult<String> {
    let trimmed = value.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(CoreError::ConfigurationError(format!(
            "{label} cannot be empty"
        )));
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(CoreError::ConfigurationError(format!(
            "{label} '{trimmed}' must start with http:// or https://"
        )));
    }
    Ok(trimmed.to_string())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse the request timeout (whole seconds) from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns the default of 30 seconds.
pub fn request_timeout_from_env_value(value: Option<String>) -> CoreResult<Duration> {
    match non_blank(value) {
        None => Ok(DEFAULT_REQUEST_TIMEOUT),
        Some(v) => match v.parse::<u64>() {
            Ok(0) | Err(_) => Err(CoreError::ConfigurationError(format!(
                "request timeout '{v}' must be a positive number of seconds"
            ))),
            Ok(secs) => Ok(Duration::from_secs(secs)),
        },
    }
}

fn positive_from_env_value(
    label: &str,
    value: Option<String>,
    default: usize,
) -> CoreResult<usize> {
    match non_blank(value) {
        None => Ok(default),
        Some(v) => match v.parse::<usize>() {
            Ok(0) | Err(_) => Err(CoreError::ConfigurationError(format!(
                "{label} '{v}' must be a positive integer"
            ))),
            Ok(n) => Ok(n),
        },
    }
}

/// Parse the per-session population bound from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns the default of 5.
pub fn population_concurrency_from_env_value(value: Option<String>) -> CoreResult<usize> {
    positive_from_env_value(
        "population concurrency",
        value,
        DEFAULT_POPULATION_CONCURRENCY,
    )
}

/// Parse the process-wide population bound from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns the default of 64.
pub fn population_pool_capacity_from_env_value(value: Option<String>) -> CoreResult<usize> {
    positive_from_env_value(
        "population pool capacity",
        value,
        DEFAULT_POPULATION_POOL_CAPACITY,
    )
}

/// Parse the provisional-session lifetime (whole seconds) from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns the default of 5 minutes.
pub fn provisional_ttl_from_env_value(value: Option<String>) -> CoreResult<Duration> {
    match non_blank(value) {
        None => Ok(DEFAULT_PROVISIONAL_TTL),
        Some(v) => match v.parse::<u64>() {
            Ok(0) | Err(_) => Err(CoreError::ConfigurationError(format!(
                "provisional session TTL '{v}' must be a positive number of seconds"
            ))),
            Ok(secs) => Ok(Duration::from_secs(secs)),
        },
    }
}

/// Parse the card detail scheme from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns [`DetailScheme::Pipe`].
pub fn detail_scheme_from_env_value(value: Option<String>) -> CoreResult<DetailScheme> {
    non_blank(value)
        .map(|v| v.parse::<DetailScheme>())
        .transpose()
        .map(Option::unwrap_or_default)
}
