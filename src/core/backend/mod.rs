//! Rule-management backends
//!
//! Two interchangeable implementations of [`RuleBackend`]:
//!
//! - [`powershell::ManagementBackend`]: structured NetSecurity cmdlets (primary path)
//! - [`netsh::CommandLineBackend`]: `netsh advfirewall firewall` (fallback path)
//!
//! Both must give identical semantics for the required operations. Methods take
//! `&mut self`: a backend instance is one session and cannot be shared between
//! concurrent operations.

pub mod netsh;
pub mod powershell;

use crate::core::error::{Error, Result};
use crate::core::naming::Direction;
use crate::core::rule::{PortDetails, RawRule};
use std::path::Path;
use std::time::Duration;

/// Default bounded wait for a single external tool invocation
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// A firewall rule-management path
#[allow(async_fn_in_trait)]
pub trait RuleBackend {
    /// Short name used in logs and error details
    fn name(&self) -> &'static str;

    /// Prepares the execution environment
    ///
    /// Failure here is fatal to the calling operation.
    async fn ensure_ready(&mut self) -> Result<()>;

    async fn rule_exists(&mut self, display_name: &str) -> Result<bool>;

    /// Creates a blocking rule for `program`
    ///
    /// Idempotent: if a rule with `display_name` already exists this succeeds
    /// without creating a duplicate.
    async fn create_rule(
        &mut self,
        program: &Path,
        display_name: &str,
        direction: Direction,
    ) -> Result<()>;

    async fn remove_rule(&mut self, display_name: &str) -> Result<()>;

    /// Lists every rule in the firewall store, best effort per field
    async fn list_all(&mut self) -> Result<Vec<RawRule>>;

    async fn set_enabled(&mut self, _display_name: &str, _enabled: bool) -> Result<()> {
        Err(Error::Unsupported {
            backend: self.name(),
            operation: "enable/disable",
        })
    }

    /// Program path from the rule's application filter
    async fn lookup_program(&mut self, _display_name: &str) -> Result<String> {
        Err(Error::Unsupported {
            backend: self.name(),
            operation: "application-filter lookup",
        })
    }

    /// Protocol and ports from the rule's port filter
    async fn lookup_ports(&mut self, _display_name: &str) -> Result<PortDetails> {
        Err(Error::Unsupported {
            backend: self.name(),
            operation: "port-filter lookup",
        })
    }
}

/// Which backend completed a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendPath {
    #[strum(serialize = "primary")]
    Primary,
    #[strum(serialize = "fallback")]
    Fallback,
}

/// Result of a call tried on the primary backend, then on the fallback
#[derive(Debug)]
pub enum BackendOutcome<T = ()> {
    Succeeded { via: BackendPath, value: T },
    Failed { primary: Error, fallback: Error },
}

impl<T> BackendOutcome<T> {
    /// Builds the outcome once the primary call has failed with `primary`
    pub fn after_primary_failure(primary: Error, fallback: Result<T>) -> Self {
        match fallback {
            Ok(value) => BackendOutcome::Succeeded {
                via: BackendPath::Fallback,
                value,
            },
            Err(fallback) => BackendOutcome::Failed { primary, fallback },
        }
    }

    /// Collapses into a `Result`, folding both failures into [`Error::BothBackends`]
    pub fn into_result(self) -> Result<(T, BackendPath)> {
        match self {
            BackendOutcome::Succeeded { via, value } => Ok((value, via)),
            BackendOutcome::Failed { primary, fallback } => Err(Error::BothBackends {
                primary: primary.diagnostic_text(),
                fallback: fallback.diagnostic_text(),
            }),
        }
    }

    /// Every sub-error reported by either backend
    pub fn sub_errors(&self) -> Vec<String> {
        match self {
            BackendOutcome::Succeeded { .. } => Vec::new(),
            BackendOutcome::Failed { primary, fallback } => [primary, fallback]
                .into_iter()
                .flat_map(|e| match e {
                    Error::BackendCall { sub_errors, .. } if !sub_errors.is_empty() => {
                        sub_errors.clone()
                    }
                    other => vec![other.to_string()],
                })
                .collect(),
        }
    }
}
