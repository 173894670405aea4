//! Recommendation-card pipeline: decode, sanitize, fetch and cache.

mod cache;
mod client;
mod detail;
mod model;
mod sanitize;

pub use cache::CardCache;
pub use client::{
    decode_cards, CardService, HookRequest, HookServiceClient, HttpHookClient, RawCard, ServiceDescriptor,
};
pub use detail::{CardDetail, DetailScheme};
pub use model::{Action, Card, GoalSnapshot, Indicator, Link, Suggestion};
pub use sanitize::{sanitize, Sanitized};
