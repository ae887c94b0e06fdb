//! Rule records as reported by the firewall
//!
//! [`RawRule`] is what a backend returns: best-effort strings with empty
//! defaults. [`RuleRecord`] is what the catalog hands to callers after
//! classification and optional enrichment. Records are never mutated; a
//! refresh replaces them wholesale.

use crate::core::naming::{Direction, RuleIdentity};
use serde::{Deserialize, Serialize};

/// One rule as listed by a backend, fields defaulted when absent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRule {
    pub display_name: String,
    pub direction: String,
    pub action: String,
    pub protocol: String,
    pub profile: String,
    pub description: String,
    pub group: String,
    pub enabled: bool,
    /// Program path when the listing carries it (netsh does, PowerShell does not)
    pub program: Option<String>,
    /// Port filters when the listing carries them
    pub ports: Option<PortDetails>,
}

impl RawRule {
    pub fn named(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            ..Self::default()
        }
    }
}

/// Local and remote port filters of a rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDetails {
    pub protocol: String,
    pub local_ports: Vec<String>,
    pub remote_ports: Vec<String>,
}

impl PortDetails {
    pub fn local_display(&self) -> String {
        join_or_any(&self.local_ports)
    }

    pub fn remote_display(&self) -> String {
        join_or_any(&self.remote_ports)
    }
}

fn join_or_any(ports: &[String]) -> String {
    if ports.is_empty() {
        "Any".to_string()
    } else {
        ports.join(",")
    }
}

/// Outcome of an optional secondary lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum Enrichment<T> {
    /// Lookup was not performed
    NotRequested,
    /// Lookup succeeded
    Present(T),
    /// Lookup was attempted and failed; the reason is kept for display
    Missing { reason: String },
}

impl<T> Enrichment<T> {
    pub fn present(&self) -> Option<&T> {
        match self {
            Enrichment::Present(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Enrichment::Missing { .. })
    }
}

/// A classified rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRecord {
    pub display_name: String,
    /// Decoded application for owned rules, raw rule group otherwise
    pub application: String,
    /// Decoded identity; `None` for unrelated rules and undecodable owned names
    pub identity: Option<RuleIdentity>,
    pub direction: Option<Direction>,
    /// Direction text as the backend reported it
    pub raw_direction: String,
    pub action: String,
    pub protocol: String,
    pub profile: String,
    pub description: String,
    pub group: String,
    pub enabled: bool,
    /// True iff the display name starts with the ownership prefix
    pub owned: bool,
    pub program: Enrichment<String>,
    pub ports: Enrichment<PortDetails>,
}

impl RuleRecord {
    /// Decoded application name, only for owned rules that decoded cleanly
    pub fn owned_application(&self) -> Option<&str> {
        self.identity.as_ref().map(|id| id.application.as_str())
    }
}
