//! Rule display-name grammar
//!
//! Every rule created by fwblock is identified solely by its display name:
//!
//! ```text
//! <Prefix> - <application> - <file> (<Direction>)
//! ```
//!
//! The name is not escaped. Application or file names containing the literal
//! separator `" - "` encode fine but decode into a different split; such names
//! are a known limitation and are covered by tests rather than rewritten.
//!
//! # Example
//!
//! ```
//! use fwblock::core::naming::{Direction, RuleNamingCodec};
//!
//! let codec = RuleNamingCodec::default();
//! let name = codec.encode("Foo", "Foo.exe", Direction::Inbound);
//! assert_eq!(name, "FwBlock - Foo - Foo.exe (Inbound)");
//!
//! let identity = codec.decode(&name).unwrap();
//! assert_eq!(identity.application, "Foo");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Ownership prefix placed in front of every rule this tool creates
pub const DEFAULT_RULE_PREFIX: &str = "FwBlock";

/// Separator between display-name components
pub const SEPARATOR: &str = " - ";

/// Traffic direction of a firewall rule
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    /// Creation order for a blocked file: inbound first, then outbound
    pub const BOTH: [Direction; 2] = [Direction::Inbound, Direction::Outbound];

    /// netsh `dir=` keyword
    pub const fn netsh_keyword(self) -> &'static str {
        match self {
            Direction::Inbound => "in",
            Direction::Outbound => "out",
        }
    }

    /// Parses the spellings firewall tools print (`In`, `Out`, `Inbound`, `Outbound`)
    pub fn from_raw(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "in" | "inbound" | "1" => Some(Direction::Inbound),
            "out" | "outbound" | "2" => Some(Direction::Outbound),
            _ => None,
        }
    }
}

/// The (application, file, direction) triple a display name encodes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleIdentity {
    pub application: String,
    pub file: String,
    pub direction: Direction,
}

impl RuleIdentity {
    pub fn new(application: impl Into<String>, file: impl Into<String>, direction: Direction) -> Self {
        Self {
            application: application.into(),
            file: file.into(),
            direction,
        }
    }
}

/// Reasons a display name could not be decoded
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("display name does not start with the ownership prefix")]
    MissingPrefix,

    #[error("display name has {0} segment(s), expected at least 3")]
    TooFewSegments(usize),

    #[error("display name has no trailing direction group")]
    MissingDirection,

    #[error("direction group is not at the end of the display name")]
    TrailingText,

    #[error("unknown direction '{0}'")]
    UnknownDirection(String),

    #[error("display name has an empty {0}")]
    EmptyComponent(&'static str),
}

/// Error returned when constructing a codec with an unusable prefix
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PrefixError {
    #[error("rule prefix cannot be empty")]
    Empty,

    #[error("rule prefix cannot contain the separator \"{SEPARATOR}\"")]
    ContainsSeparator,

    #[error("rule prefix cannot contain quotes or parentheses")]
    InvalidCharacter,
}

/// Encodes and decodes rule display names for one ownership prefix
///
/// The codec is a plain value: construct it once from configuration and pass it
/// to the components that need it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleNamingCodec {
    prefix: String,
}

impl Default for RuleNamingCodec {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_RULE_PREFIX.to_string(),
        }
    }
}

impl RuleNamingCodec {
    /// Creates a codec for a custom prefix
    ///
    /// # Errors
    ///
    /// Returns `Err` if the prefix is empty, contains the separator, or contains
    /// characters that would break quoting or direction parsing.
    pub fn new(prefix: impl Into<String>) -> Result<Self, PrefixError> {
        let prefix = prefix.into();
        let trimmed = prefix.trim();

        if trimmed.is_empty() {
            return Err(PrefixError::Empty);
        }
        if trimmed.contains(SEPARATOR) {
            return Err(PrefixError::ContainsSeparator);
        }
        if trimmed.chars().any(|c| matches!(c, '"' | '\'' | '(' | ')')) {
            return Err(PrefixError::InvalidCharacter);
        }

        Ok(Self {
            prefix: trimmed.to_string(),
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Builds the display name for one rule
    pub fn encode(&self, application: &str, file: &str, direction: Direction) -> String {
        format!(
            "{}{SEPARATOR}{application}{SEPARATOR}{file} ({direction})",
            self.prefix
        )
    }

    /// True iff the display name starts with the ownership prefix
    pub fn is_owned(&self, display_name: &str) -> bool {
        display_name.starts_with(&self.prefix)
    }

    /// Recovers the identity from a display name
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] describing the first grammar violation found.
    pub fn decode(&self, display_name: &str) -> Result<RuleIdentity, DecodeError> {
        if !self.is_owned(display_name) {
            return Err(DecodeError::MissingPrefix);
        }

        let parts: Vec<&str> = display_name.split(SEPARATOR).collect();
        if parts.len() < 3 {
            return Err(DecodeError::TooFewSegments(parts.len()));
        }
        if parts[0] != self.prefix {
            return Err(DecodeError::MissingPrefix);
        }

        let application = parts[1];
        let file_and_direction = parts[2..].join(SEPARATOR);

        let open = file_and_direction
            .rfind('(')
            .ok_or(DecodeError::MissingDirection)?;
        if !file_and_direction.ends_with(')') {
            return Err(DecodeError::TrailingText);
        }

        let inner = &file_and_direction[open + 1..file_and_direction.len() - 1];
        if inner.contains(')') {
            return Err(DecodeError::TrailingText);
        }

        let direction: Direction = inner
            .parse()
            .map_err(|_| DecodeError::UnknownDirection(inner.to_string()))?;

        let file = file_and_direction[..open].trim_end();

        if application.trim().is_empty() {
            return Err(DecodeError::EmptyComponent("application"));
        }
        if file.is_empty() {
            return Err(DecodeError::EmptyComponent("file"));
        }

        Ok(RuleIdentity {
            application: application.to_string(),
            file: file.to_string(),
            direction,
        })
    }
}

impl fmt::Display for RuleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {} ({})", self.application, self.file, self.direction)
    }
}
