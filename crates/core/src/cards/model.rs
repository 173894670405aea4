//! Decoded recommendation cards.

use super::detail::CardDetail;
use crate::constants::{BLANK_SUMMARY, MONITORING_SUCCESS_SUMMARY};
use crate::error::CoreResult;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

/// Card severity / category.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Indicator {
    #[default]
    Info,
    Warning,
    Critical,
    Success,
}

impl Indicator {
    /// Map a hook-service indicator string; anything unrecognised is `Info`.
    pub fn from_wire(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "warning" => Indicator::Warning,
            "critical" | "hard-stop" => Indicator::Critical,
            "success" => Indicator::Success,
            _ => Indicator::Info,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Indicator::Info => "info",
            Indicator::Warning => "warning",
            Indicator::Critical => "critical",
            Indicator::Success => "success",
        }
    }
}

impl fmt::Display for Indicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reference link attached to a card.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    #[serde(default)]
    pub label: String,

    #[serde(default)]
    pub url: String,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub link_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_context: Option<String>,
}

/// One action a suggestion would perform if accepted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type", default)]
    pub action_type: String,

    #[serde(default)]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<serde_json::Value>,
}

/// The user's existing goal, embedded in "update" suggestions.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_system: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifecycle_status: Option<String>,
}

/// An actionable suggestion.
///
/// Suggestions without an `id` cannot be targeted by point deletion; they live until their
/// card group is replaced or deleted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(rename = "type", default)]
    pub suggestion_type: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<String>,

    #[serde(default)]
    pub label: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<Action>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<GoalSnapshot>,
}

impl Suggestion {
    /// True for the "update" variants, which carry the user's existing goal.
    pub fn is_update(&self) -> bool {
        self.suggestion_type
            .to_ascii_lowercase()
            .starts_with("update")
    }
}

/// A decision-support recommendation.
#[derive(Clone, Debug)]
pub struct Card {
    summary: String,
    indicator: Indicator,
    detail: CardDetail,
    error: bool,
    prefetch_modified: bool,
}

impl Card {
    /// Build a card, rewriting the summary sentinels.
    ///
    /// `[monitoring-success]` becomes an empty summary with indicator `success`; `[blank]`
    /// becomes an empty summary with the indicator unchanged.
    pub fn new(summary: impl Into<String>, indicator: Indicator, detail: CardDetail) -> Self {
        let summary = summary.into();
        let (summary, indicator) = match summary.trim() {
            MONITORING_SUCCESS_SUMMARY => (String::new(), Indicator::Success),
            BLANK_SUMMARY => (String::new(), indicator),
            _ => (summary, indicator),
        };

        Self {
            summary,
            indicator,
            detail,
            error: false,
            prefetch_modified: false,
        }
    }

    /// The card shown in place of a hook-service group that could not be fetched or decoded.
    pub fn error(message: impl Into<String>, prefetch_modified: bool) -> Self {
        Self {
            summary: message.into(),
            indicator: Indicator::Critical,
            detail: CardDetail::empty(),
            error: true,
            prefetch_modified,
        }
    }

    pub fn with_prefetch_modified(mut self, modified: bool) -> Self {
        self.prefetch_modified = modified;
        self
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn indicator(&self) -> Indicator {
        self.indicator
    }

    pub fn is_error(&self) -> bool {
        self.error
    }

    /// True if the outbound request had to be sanitized to 7-bit ASCII.
    pub fn prefetch_modified(&self) -> bool {
        self.prefetch_modified
    }

    pub fn detail(&self) -> &CardDetail {
        &self.detail
    }

    pub fn rationale(&self) -> CoreResult<&str> {
        self.detail.rationale()
    }

    pub fn selection_behaviour(&self) -> CoreResult<Option<&str>> {
        self.detail.selection_behaviour()
    }

    pub fn source_label(&self) -> CoreResult<Option<&str>> {
        self.detail.source_label()
    }

    pub fn suggestions(&self) -> CoreResult<&[Suggestion]> {
        self.detail.suggestions()
    }

    pub fn links(&self) -> CoreResult<&[Link]> {
        self.detail.links()
    }

    /// Remove every suggestion with `id`. Returns whether anything was removed.
    pub fn remove_suggestion(&mut self, id: &str) -> bool {
        self.detail.remove_suggestion(id)
    }

    /// JSON view for display. Undecodable detail fields render as empty.
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "summary": self.summary,
            "indicator": self.indicator,
            "error": self.error,
            "prefetchModified": self.prefetch_modified,
            "source": self.source_label().ok().flatten(),
            "rationale": self.rationale().unwrap_or_default(),
            "selectionBehavior": self.selection_behaviour().ok().flatten(),
            "suggestions": self.suggestions().unwrap_or_default(),
            "links": self.links().unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cards::DetailScheme;

    #[test]
    fn monitoring_success_sentinel_forces_success() {
        let card = Card::new(
            MONITORING_SUCCESS_SUMMARY,
            Indicator::Warning,
            CardDetail::empty(),
        );
        assert_eq!(card.summary(), "");
        assert_eq!(card.indicator(), Indicator::Success);
    }

    #[test]
    fn blank_sentinel_keeps_indicator() {
        let card = Card::new(BLANK_SUMMARY, Indicator::Warning, CardDetail::empty());
        assert_eq!(card.summary(), "");
        assert_eq!(card.indicator(), Indicator::Warning);
    }

    #[test]
    fn ordinary_summary_is_untouched() {
        let card = Card::new("Check BP", Indicator::Info, CardDetail::empty());
        assert_eq!(card.summary(), "Check BP");
        assert!(!card.is_error());
    }

    #[test]
    fn error_card_is_critical() {
        let card = Card::error("hook service timed out", true);
        assert_eq!(card.indicator(), Indicator::Critical);
        assert!(card.is_error());
        assert!(card.prefetch_modified());
        assert_eq!(card.summary(), "hook service timed out");
        assert_eq!(card.suggestions().map(<[Suggestion]>::len).ok(), Some(0));
    }

    #[test]
    fn indicator_from_wire_falls_back_to_info() {
        assert_eq!(Indicator::from_wire("WARNING"), Indicator::Warning);
        assert_eq!(Indicator::from_wire("hard-stop"), Indicator::Critical);
        assert_eq!(Indicator::from_wire("mystery"), Indicator::Info);
    }

    #[test]
    fn json_view_includes_decoded_detail() {
        let detail = CardDetail::new(
            r#"Because|[{"id":"s1","type":"add","label":"Add goal"}]|any|[]"#,
            DetailScheme::Pipe,
        );
        let card = Card::new("Set a goal", Indicator::Info, detail);
        let view = card.to_json();
        assert_eq!(view["rationale"], "Because");
        assert_eq!(view["suggestions"][0]["id"], "s1");
        assert_eq!(view["selectionBehavior"], "any");
    }

    #[test]
    fn update_suggestions_are_recognised() {
        let suggestion = Suggestion {
            suggestion_type: "update-goal".into(),
            ..Suggestion::default()
        };
        assert!(suggestion.is_update());
    }
}
