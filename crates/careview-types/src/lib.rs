//! Small validated value types shared by every Careview crate.
//!
//! - [`NonEmptyText`]: trimmed, guaranteed non-empty text
//! - [`SessionId`]: opaque identifier of a UI session
//! - [`Audience`]: the viewer role that cards and content are filtered for

use std::fmt;
use std::str::FromStr;

/// Errors that can occur when creating validated text types.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TextError {
    /// The input text was empty or contained only whitespace
    #[error("Text cannot be empty")]
    Empty,

    /// The input did not name a known audience
    #[error("unknown audience: {0}")]
    UnknownAudience(String),
}

/// A string type that guarantees non-empty content.
///
/// The input is trimmed of leading and trailing whitespace during construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Creates a new `NonEmptyText` from the given input.
    ///
    /// # Errors
    ///
    /// Returns `Err(TextError::Empty)` if the trimmed input is empty.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for NonEmptyText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NonEmptyText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NonEmptyText::new(&s).map_err(serde::de::Error::custom)
    }
}

/// Opaque identifier of a UI session.
///
/// The value is chosen by whoever performs the credential exchange; Careview only requires
/// it to be non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(NonEmptyText);

impl SessionId {
    /// Wraps an externally supplied session id.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        NonEmptyText::new(input).map(Self)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = TextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SessionId::new(s)
    }
}

/// The viewer role that a session renders content for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Audience {
    /// The patient viewing their own record.
    Patient,
    /// A clinician or other member of the care team.
    CareTeam,
}

impl Audience {
    /// Wire name used in hook requests and configuration.
    pub fn as_str(self) -> &'static str {
        match self {
            Audience::Patient => "patient",
            Audience::CareTeam => "care-team",
        }
    }
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Audience {
    type Err = TextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "patient" => Ok(Audience::Patient),
            "care-team" | "careteam" | "care_team" => Ok(Audience::CareTeam),
            other => Err(TextError::UnknownAudience(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_empty_text_trims_input() {
        let text = NonEmptyText::new("  hello  ").expect("valid text");
        assert_eq!(text.as_str(), "hello");
    }

    #[test]
    fn non_empty_text_rejects_whitespace() {
        assert_eq!(NonEmptyText::new("   "), Err(TextError::Empty));
    }

    #[test]
    fn session_id_rejects_empty() {
        assert!(SessionId::new("").is_err());
        assert_eq!(SessionId::new("abc").expect("valid id").as_str(), "abc");
    }

    #[test]
    fn audience_parses_known_spellings() {
        assert_eq!("patient".parse::<Audience>(), Ok(Audience::Patient));
        assert_eq!("Care-Team".parse::<Audience>(), Ok(Audience::CareTeam));
        assert_eq!("care_team".parse::<Audience>(), Ok(Audience::CareTeam));
        assert!(matches!(
            "nurse".parse::<Audience>(),
            Err(TextError::UnknownAudience(_))
        ));
    }

    #[test]
    fn audience_serialises_kebab_case() {
        let json = serde_json::to_string(&Audience::CareTeam).expect("serialise");
        assert_eq!(json, "\"care-team\"");
    }
}
