//! The delimited `detail` string carried by hook-service cards.
//!
//! Two upstream contracts exist and their field positions differ:
//!
//! | scheme | delimiter | fields |
//! |---|---|---|
//! | [`DetailScheme::Pipe`] | `\|` | rationale, suggestions-json, selection-behaviour, links-json |
//! | [`DetailScheme::Semicolon`] | `;` | source-label, rationale, selection-behaviour, suggestions-json, links-json |
//!
//! The string is split on first access and the result cached. JSON fields are read with a
//! streaming deserializer, so delimiters inside the JSON do not break the split. Plain-text
//! fields end at the next delimiter. Missing trailing fields are empty.

use super::model::{Link, Suggestion};
use crate::error::{CoreError, CoreResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Which upstream detail contract is in force.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailScheme {
    #[default]
    Pipe,
    Semicolon,
}

impl DetailScheme {
    pub fn delimiter(self) -> char {
        match self {
            DetailScheme::Pipe => '|',
            DetailScheme::Semicolon => ';',
        }
    }
}

impl fmt::Display for DetailScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DetailScheme::Pipe => "pipe",
            DetailScheme::Semicolon => "semicolon",
        })
    }
}

impl FromStr for DetailScheme {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pipe" | "|" => Ok(DetailScheme::Pipe),
            "semicolon" | ";" => Ok(DetailScheme::Semicolon),
            other => Err(CoreError::ConfigurationError(format!(
                "unknown detail scheme '{other}' (expected 'pipe' or 'semicolon')"
            ))),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
struct DetailFields {
    source_label: Option<String>,
    rationale: String,
    selection_behaviour: Option<String>,
    suggestions: Vec<Suggestion>,
    links: Vec<Link>,
}

/// Lazily decoded card detail.
#[derive(Clone, Debug)]
pub struct CardDetail {
    raw: String,
    scheme: DetailScheme,
    fields: OnceLock<Result<DetailFields, String>>,
}

impl CardDetail {
    pub fn new(raw: impl Into<String>, scheme: DetailScheme) -> Self {
        Self {
            raw: raw.into(),
            scheme,
            fields: OnceLock::new(),
        }
    }

    /// A detail with every field empty.
    pub fn empty() -> Self {
        let fields = OnceLock::new();
        let _ = fields.set(Ok(DetailFields::default()));
        Self {
            raw: String::new(),
            scheme: DetailScheme::default(),
            fields,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn scheme(&self) -> DetailScheme {
        self.scheme
    }

    /// True once the raw string has been split.
    pub fn is_decoded(&self) -> bool {
        self.fields.get().is_some()
    }

    fn fields(&self) -> CoreResult<&DetailFields> {
        self.fields
            .get_or_init(|| split(&self.raw, self.scheme))
            .as_ref()
            .map_err(|message| CoreError::DecodeFailed(message.clone()))
    }

    pub fn rationale(&self) -> CoreResult<&str> {
        Ok(&self.fields()?.rationale)
    }

    pub fn selection_behaviour(&self) -> CoreResult<Option<&str>> {
        Ok(self.fields()?.selection_behaviour.as_deref())
    }

    /// Only the semicolon scheme carries a source label.
    pub fn source_label(&self) -> CoreResult<Option<&str>> {
        Ok(self.fields()?.source_label.as_deref())
    }

    pub fn suggestions(&self) -> CoreResult<&[Suggestion]> {
        Ok(&self.fields()?.suggestions)
    }

    pub fn links(&self) -> CoreResult<&[Link]> {
        Ok(&self.fields()?.links)
    }

    /// Decode now, surfacing any error.
    pub fn validate(&self) -> CoreResult<()> {
        self.fields().map(|_| ())
    }

    pub(crate) fn remove_suggestion(&mut self, id: &str) -> bool {
        if self.fields().is_err() {
            return false;
        }
        let Some(Ok(fields)) = self.fields.get_mut() else {
            return false;
        };
        let before = fields.suggestions.len();
        fields
            .suggestions
            .retain(|s| s.id.as_deref() != Some(id));
        fields.suggestions.len() != before
    }
}

fn split(raw: &str, scheme: DetailScheme) -> Result<DetailFields, String> {
    let mut cursor = FieldCursor::new(raw, scheme.delimiter());
    let fields = match scheme {
        DetailScheme::Pipe => {
            let rationale = cursor.text().to_string();
            let suggestions = cursor.json("suggestions")?;
            let selection_behaviour = non_empty(cursor.text());
            let links = cursor.json("links")?;
            DetailFields {
                source_label: None,
                rationale,
                selection_behaviour,
                suggestions,
                links,
            }
        }
        DetailScheme::Semicolon => {
            let source_label = non_empty(cursor.text());
            let rationale = cursor.text().to_string();
            let selection_behaviour = non_empty(cursor.text());
            let suggestions = cursor.json("suggestions")?;
            let links = cursor.json("links")?;
            DetailFields {
                source_label,
                rationale,
                selection_behaviour,
                suggestions,
                links,
            }
        }
    };
    cursor.finish()?;

    Ok(DetailFields {
        suggestions: fields
            .suggestions
            .into_iter()
            .map(|mut s: Suggestion| {
                if !s.is_update() {
                    s.goal = None;
                }
                s
            })
            .collect(),
        ..fields
    })
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Walks the detail string one field at a time.
struct FieldCursor<'a> {
    rest: Option<&'a str>,
    delimiter: char,
}

impl<'a> FieldCursor<'a> {
    fn new(raw: &'a str, delimiter: char) -> Self {
        Self {
            rest: Some(raw),
            delimiter,
        }
    }

    /// Text up to the next delimiter.
    fn text(&mut self) -> &'a str {
        let Some(rest) = self.rest else {
            return "";
        };
        match rest.split_once(self.delimiter) {
            Some((field, tail)) => {
                self.rest = Some(tail);
                field
            }
            None => {
                self.rest = None;
                rest
            }
        }
    }

    /// One JSON list; empty, missing or `null` fields are an empty list.
    fn json<T: DeserializeOwned>(&mut self, label: &str) -> Result<Vec<T>, String> {
        let Some(rest) = self.rest else {
            return Ok(Vec::new());
        };
        let trimmed = rest.trim_start();
        if trimmed.is_empty() {
            self.rest = None;
            return Ok(Vec::new());
        }
        if let Some(tail) = trimmed.strip_prefix(self.delimiter) {
            self.rest = Some(tail);
            return Ok(Vec::new());
        }

        let (parsed, tail) = match trimmed.strip_prefix("null") {
            Some(tail) => (Vec::new(), tail),
            None => {
                let mut stream = serde_json::Deserializer::from_str(trimmed).into_iter::<Vec<T>>();
                let parsed = match stream.next() {
                    Some(Ok(value)) => value,
                    Some(Err(e)) => return Err(format!("malformed {label} JSON: {e}")),
                    None => Vec::new(),
                };
                (parsed, &trimmed[stream.byte_offset()..])
            }
        };
        let tail = tail.trim_start();

        if tail.is_empty() {
            self.rest = None;
        } else if let Some(after) = tail.strip_prefix(self.delimiter) {
            self.rest = Some(after);
        } else {
            return Err(format!("unexpected text after {label} JSON"));
        }
        Ok(parsed)
    }

    fn finish(&self) -> Result<(), String> {
        match self.rest {
            Some(rest) if !rest.trim().is_empty() => {
                Err(format!("unexpected trailing detail content '{rest}'"))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIPE: &str = r#"BP above goal|[{"id":"s1","type":"update-goal","label":"Update","goal":{"id":"g1","target":"<140/90"}},{"type":"add","label":"Add","goal":{"id":"ignored"}}]|at-most-one|[{"label":"Guideline","url":"https://example.org/bp","type":"absolute"}]"#;

    const SEMICOLON: &str = r#"USPSTF;Screening is due;any;[{"id":"s9","type":"add","label":"Order"}];[]"#;

    #[test]
    fn pipe_scheme_field_positions() {
        let detail = CardDetail::new(PIPE, DetailScheme::Pipe);
        assert!(!detail.is_decoded());
        assert_eq!(detail.rationale().ok(), Some("BP above goal"));
        assert!(detail.is_decoded());
        assert_eq!(detail.selection_behaviour().ok().flatten(), Some("at-most-one"));
        assert_eq!(detail.source_label().ok().flatten(), None);

        let suggestions = detail.suggestions().expect("suggestions decode");
        assert_eq!(suggestions.len(), 2);
        assert_eq!(
            suggestions[0].goal.as_ref().and_then(|g| g.target.as_deref()),
            Some("<140/90")
        );
        assert!(suggestions[1].goal.is_none());

        let links = detail.links().expect("links decode");
        assert_eq!(links[0].url, "https://example.org/bp");
    }

    #[test]
    fn semicolon_scheme_field_positions() {
        let detail = CardDetail::new(SEMICOLON, DetailScheme::Semicolon);
        assert_eq!(detail.source_label().ok().flatten(), Some("USPSTF"));
        assert_eq!(detail.rationale().ok(), Some("Screening is due"));
        assert_eq!(detail.selection_behaviour().ok().flatten(), Some("any"));
        let suggestions = detail.suggestions().expect("suggestions decode");
        assert_eq!(suggestions[0].id.as_deref(), Some("s9"));
        assert!(detail.links().expect("links decode").is_empty());
    }

    #[test]
    fn schemes_are_not_interchangeable() {
        let detail = CardDetail::new(SEMICOLON, DetailScheme::Pipe);
        assert_eq!(detail.rationale().ok(), Some(SEMICOLON));
        assert!(detail.suggestions().expect("empty").is_empty());
    }

    #[test]
    fn repeated_reads_are_identical() {
        let detail = CardDetail::new(PIPE, DetailScheme::Pipe);
        let first: Vec<Suggestion> = detail.suggestions().expect("decode").to_vec();
        let first_rationale = detail.rationale().expect("decode").to_string();
        for _ in 0..3 {
            assert_eq!(detail.suggestions().expect("decode"), first.as_slice());
            assert_eq!(detail.rationale().expect("decode"), first_rationale);
            assert_eq!(
                detail.selection_behaviour().expect("decode"),
                Some("at-most-one")
            );
        }
    }

    #[test]
    fn delimiters_inside_json_are_kept() {
        let raw = r#"Why|[{"id":"a|b","type":"add","label":"x|y"}]||[]"#;
        let detail = CardDetail::new(raw, DetailScheme::Pipe);
        let suggestions = detail.suggestions().expect("decode");
        assert_eq!(suggestions[0].id.as_deref(), Some("a|b"));
        assert_eq!(suggestions[0].label, "x|y");
        assert_eq!(detail.selection_behaviour().expect("decode"), None);
    }

    #[test]
    fn malformed_suggestions_fail_every_read() {
        let detail = CardDetail::new("Why|[{not json]|any|[]", DetailScheme::Pipe);
        assert!(matches!(detail.suggestions(), Err(CoreError::DecodeFailed(_))));
        assert!(matches!(detail.rationale(), Err(CoreError::DecodeFailed(_))));
        assert!(detail.validate().is_err());
    }

    #[test]
    fn missing_trailing_fields_are_empty() {
        let detail = CardDetail::new("Only a rationale", DetailScheme::Pipe);
        assert_eq!(detail.rationale().ok(), Some("Only a rationale"));
        assert!(detail.suggestions().expect("empty").is_empty());
        assert!(detail.links().expect("empty").is_empty());

        let null = CardDetail::new("Why|null|any|null", DetailScheme::Pipe);
        assert!(null.suggestions().expect("null is empty").is_empty());
    }

    #[test]
    fn removes_suggestions_by_id_only() {
        let mut detail = CardDetail::new(PIPE, DetailScheme::Pipe);
        assert!(!detail.remove_suggestion("missing"));
        assert!(detail.remove_suggestion("s1"));
        let remaining = detail.suggestions().expect("decode");
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].id.is_none());
    }

    #[test]
    fn parses_scheme_names() {
        assert_eq!("pipe".parse::<DetailScheme>().ok(), Some(DetailScheme::Pipe));
        assert_eq!(";".parse::<DetailScheme>().ok(), Some(DetailScheme::Semicolon));
        assert!("comma".parse::<DetailScheme>().is_err());
    }
}
