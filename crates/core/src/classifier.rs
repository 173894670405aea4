//! Coded-value classification rules.
//!
//! A [`RuleSet`] is four optional pattern lists (class include/exclude, type include/exclude)
//! evaluated against anything that exposes a class coding and type codings. Encounters and
//! observations both do, which lets [`SourceRules`] decide whether a reading was taken in the
//! office, at home, or at home with a connected device.
//!
//! Patterns are either a bare `code` (matches the code exactly, or the display text
//! case-insensitively) or `system|code` (matches both exactly).

use crate::error::{CoreError, CoreResult};
use fhir::{Coding, EncounterData, ObservationData};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A single coded-match pattern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodePattern {
    system: Option<String>,
    code: String,
}

impl CodePattern {
    /// Parse `code` or `system|code`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConfigurationError`] for empty patterns, empty halves, or more
    /// than one `|`.
    pub fn parse(input: &str) -> CoreResult<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(CoreError::ConfigurationError(
                "classification pattern cannot be empty".into(),
            ));
        }

        let mut parts = trimmed.split('|');
        let first = parts.next().unwrap_or_default();
        match (parts.next(), parts.next()) {
            (None, _) => Ok(Self {
                system: None,
                code: first.to_string(),
            }),
            (Some(code), None) => {
                let (system, code) = (first.trim(), code.trim());
                if system.is_empty() || code.is_empty() {
                    return Err(CoreError::ConfigurationError(format!(
                        "classification pattern '{trimmed}' must be 'code' or 'system|code'"
                    )));
                }
                Ok(Self {
                    system: Some(system.to_string()),
                    code: code.to_string(),
                })
            }
            (Some(_), Some(_)) => Err(CoreError::ConfigurationError(format!(
                "classification pattern '{trimmed}' contains more than one '|'"
            ))),
        }
    }

    /// True if `coding` satisfies this pattern.
    pub fn matches(&self, coding: &Coding) -> bool {
        match &self.system {
            Some(system) => {
                coding.system() == Some(system.as_str()) && coding.code() == Some(self.code.as_str())
            }
            None => {
                coding.code() == Some(self.code.as_str())
                    || coding
                        .display()
                        .is_some_and(|d| d.to_lowercase() == self.code.to_lowercase())
            }
        }
    }
}

impl FromStr for CodePattern {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CodePattern::parse(s)
    }
}

impl fmt::Display for CodePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.system {
            Some(system) => write!(f, "{system}|{}", self.code),
            None => f.write_str(&self.code),
        }
    }
}

/// Anything with a class coding and type codings.
pub trait Classifiable {
    fn class_coding(&self) -> Option<&Coding>;
    fn type_codings(&self) -> Vec<&Coding>;
}

impl Classifiable for EncounterData {
    fn class_coding(&self) -> Option<&Coding> {
        self.class.as_ref()
    }

    fn type_codings(&self) -> Vec<&Coding> {
        EncounterData::type_codings(self).collect()
    }
}

/// Observations expose their first category coding as the class, and both their code
/// codings and resource tags as types.
impl Classifiable for ObservationData {
    fn class_coding(&self) -> Option<&Coding> {
        self.category_coding()
    }

    fn type_codings(&self) -> Vec<&Coding> {
        self.code.coding.iter().chain(self.tags.iter()).collect()
    }
}

/// Raw rule-set strings as they appear in the clinical catalog.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RuleSetSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_include: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_exclude: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_include: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_exclude: Option<Vec<String>>,
}

/// Parsed classification rule set. Absent lists impose no constraint.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuleSet {
    class_include: Option<Vec<CodePattern>>,
    class_exclude: Option<Vec<CodePattern>>,
    type_include: Option<Vec<CodePattern>>,
    type_exclude: Option<Vec<CodePattern>>,
}

impl RuleSet {
    /// Parse every pattern of `spec`, failing on the first malformed one.
    pub fn from_spec(spec: &RuleSetSpec) -> CoreResult<Self> {
        fn parse_list(list: &Option<Vec<String>>) -> CoreResult<Option<Vec<CodePattern>>> {
            list.as_ref()
                .map(|items| {
                    items
                        .iter()
                        .map(|s| CodePattern::parse(s))
                        .collect::<CoreResult<Vec<_>>>()
                })
                .transpose()
        }

        Ok(Self {
            class_include: parse_list(&spec.class_include)?,
            class_exclude: parse_list(&spec.class_exclude)?,
            type_include: parse_list(&spec.type_include)?,
            type_exclude: parse_list(&spec.type_exclude)?,
        })
    }

    pub fn with_class_include(mut self, patterns: &[&str]) -> CoreResult<Self> {
        self.class_include = Some(parse_patterns(patterns)?);
        Ok(self)
    }

    pub fn with_class_exclude(mut self, patterns: &[&str]) -> CoreResult<Self> {
        self.class_exclude = Some(parse_patterns(patterns)?);
        Ok(self)
    }

    pub fn with_type_include(mut self, patterns: &[&str]) -> CoreResult<Self> {
        self.type_include = Some(parse_patterns(patterns)?);
        Ok(self)
    }

    pub fn with_type_exclude(mut self, patterns: &[&str]) -> CoreResult<Self> {
        self.type_exclude = Some(parse_patterns(patterns)?);
        Ok(self)
    }

    /// True if no list is configured.
    pub fn is_unconstrained(&self) -> bool {
        self.class_include.is_none()
            && self.class_exclude.is_none()
            && self.type_include.is_none()
            && self.type_exclude.is_none()
    }
}

fn parse_patterns(patterns: &[&str]) -> CoreResult<Vec<CodePattern>> {
    patterns.iter().map(|p| CodePattern::parse(p)).collect()
}

fn any_match(patterns: &[CodePattern], codings: &[&Coding]) -> bool {
    codings
        .iter()
        .any(|coding| patterns.iter().any(|p| p.matches(coding)))
}

/// Evaluate `rules` against `candidate`.
///
/// Every configured list must pass: include lists need at least one matching coding,
/// exclude lists need none. A candidate without a class coding fails any class-include
/// list and passes any class-exclude list; the same holds for type codings.
pub fn classify<C: Classifiable + ?Sized>(candidate: &C, rules: &RuleSet) -> bool {
    let class: Vec<&Coding> = candidate.class_coding().into_iter().collect();
    let types = candidate.type_codings();

    if let Some(include) = &rules.class_include {
        if !any_match(include, &class) {
            return false;
        }
    }
    if let Some(exclude) = &rules.class_exclude {
        if any_match(exclude, &class) {
            return false;
        }
    }
    if let Some(include) = &rules.type_include {
        if !any_match(include, &types) {
            return false;
        }
    }
    if let Some(exclude) = &rules.type_exclude {
        if any_match(exclude, &types) {
            return false;
        }
    }
    true
}

/// Where a reading was taken.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObservationSource {
    Office,
    Home,
    HomeBluetooth,
    Unknown,
}

impl fmt::Display for ObservationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ObservationSource::Office => "OFFICE",
            ObservationSource::Home => "HOME",
            ObservationSource::HomeBluetooth => "HOME_BLUETOOTH",
            ObservationSource::Unknown => "UNKNOWN",
        })
    }
}

/// Rules for one source category: an observation-level and an encounter-level rule set.
///
/// A missing rule set means "this category cannot be decided at that level", which is not
/// the same as an unconstrained rule set (which matches everything).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceRule {
    pub observation: Option<RuleSet>,
    pub encounter: Option<RuleSet>,
}

/// Source classification rules for every category.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceRules {
    pub office: SourceRule,
    pub home: SourceRule,
    pub home_bluetooth: SourceRule,
}

impl SourceRules {
    /// Most specific category first.
    fn ordered(&self) -> [(ObservationSource, &SourceRule); 3] {
        [
            (ObservationSource::HomeBluetooth, &self.home_bluetooth),
            (ObservationSource::Home, &self.home),
            (ObservationSource::Office, &self.office),
        ]
    }

    /// True if any category can be decided from the encounter.
    pub fn uses_encounters(&self) -> bool {
        self.ordered()
            .iter()
            .any(|(_, rule)| rule.encounter.is_some())
    }

    /// Classify an observation's own codings.
    pub fn observation_source(&self, observation: &ObservationData) -> ObservationSource {
        self.ordered()
            .into_iter()
            .find(|(_, rule)| {
                rule.observation
                    .as_ref()
                    .is_some_and(|rules| classify(observation, rules))
            })
            .map(|(source, _)| source)
            .unwrap_or(ObservationSource::Unknown)
    }

    /// Classify the encounter a reading was recorded in.
    pub fn encounter_source(&self, encounter: &EncounterData) -> ObservationSource {
        self.ordered()
            .into_iter()
            .find(|(_, rule)| {
                rule.encounter
                    .as_ref()
                    .is_some_and(|rules| classify(encounter, rules))
            })
            .map(|(source, _)| source)
            .unwrap_or(ObservationSource::Unknown)
    }

    /// The observation's own coding wins; the encounter is only consulted when that yields
    /// [`ObservationSource::Unknown`].
    pub fn resolve_source(
        &self,
        observation: &ObservationData,
        encounter: Option<&EncounterData>,
    ) -> ObservationSource {
        match self.observation_source(observation) {
            ObservationSource::Unknown => encounter
                .map(|e| self.encounter_source(e))
                .unwrap_or(ObservationSource::Unknown),
            source => source,
        }
    }
}
