//! Block and remove operations across both backends
//!
//! Each public operation is one unit of work: backend calls run sequentially,
//! every rule is handled individually, and a failure on one rule never stops
//! the others. A rule is only reported failed when the structured backend and
//! the command-line fallback both fail on it.
//!
//! # Example
//!
//! ```no_run
//! use fwblock::core::backend::{netsh::CommandLineBackend, powershell::ManagementBackend};
//! use fwblock::core::discovery::{FileBlockRequest, TargetExtension};
//! use fwblock::core::naming::RuleNamingCodec;
//! use fwblock::core::orchestrator::RuleOrchestrator;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> fwblock::Result<()> {
//! let mut orchestrator = RuleOrchestrator::new(
//!     ManagementBackend::default(),
//!     CommandLineBackend::default(),
//!     RuleNamingCodec::default(),
//! );
//!
//! let request = FileBlockRequest::new(r"C:\Apps\Foo")
//!     .with_extension(TargetExtension::Exe)
//!     .exclude_keyword("setup");
//! let report = orchestrator.block(&request, &CancellationToken::new()).await?;
//! println!("{} rule(s) created", report.created.len());
//! # Ok(())
//! # }
//! ```

use crate::core::backend::{BackendOutcome, BackendPath, RuleBackend};
use crate::core::catalog::{EnrichMode, RuleCatalog};
use crate::core::discovery::{FileBlockRequest, discover};
use crate::core::error::{Error, Result};
use crate::core::naming::{Direction, RuleNamingCodec};
use crate::core::rule::RuleRecord;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// A rule that was created (or already existed)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedRule {
    pub display_name: String,
    pub program: PathBuf,
    pub direction: Direction,
    pub via: BackendPath,
}

/// A rule neither backend could process
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleFailure {
    pub display_name: String,
    pub primary: String,
    pub fallback: String,
    pub sub_errors: Vec<String>,
}

impl RuleFailure {
    fn from_outcome<T>(display_name: &str, outcome: BackendOutcome<T>) -> Option<Self> {
        let sub_errors = outcome.sub_errors();
        match outcome {
            BackendOutcome::Succeeded { .. } => None,
            BackendOutcome::Failed { primary, fallback } => Some(Self {
                display_name: display_name.to_string(),
                primary: primary.diagnostic_text(),
                fallback: fallback.diagnostic_text(),
                sub_errors,
            }),
        }
    }
}

/// A file skipped because an earlier file in the batch already uses its rule names
///
/// Names only carry the file name, so `Suite/a.exe` and `Suite/bin/a.exe`
/// would share both rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NameCollision {
    pub file: PathBuf,
    pub blocked_by: PathBuf,
}

/// Result of a block operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BlockReport {
    pub application: String,
    /// Files that survived the exclusion filters, in processing order
    pub files: Vec<PathBuf>,
    /// Number of files fully processed before completion or cancellation
    pub files_processed: usize,
    pub created: Vec<CreatedRule>,
    pub failures: Vec<RuleFailure>,
    /// Files left unblocked because their rule names were already taken
    pub collisions: Vec<NameCollision>,
    pub cancelled: bool,
    pub warning: Option<String>,
}

impl BlockReport {
    /// True when every file is blocked and the run was not cancelled
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.collisions.is_empty() && !self.cancelled
    }

    pub fn fallback_count(&self) -> usize {
        self.created
            .iter()
            .filter(|c| c.via == BackendPath::Fallback)
            .count()
    }
}

/// Result of removing an application's rules
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemovalReport {
    pub application: String,
    pub candidates: usize,
    pub removed: Vec<String>,
    pub failures: Vec<RuleFailure>,
}

impl RemovalReport {
    pub fn removed_count(&self) -> usize {
        self.removed.len()
    }
}

/// Drives rule creation and removal against a primary and a fallback backend
#[derive(Debug)]
pub struct RuleOrchestrator<P, F> {
    primary: P,
    fallback: F,
    catalog: RuleCatalog,
}

impl<P: RuleBackend, F: RuleBackend> RuleOrchestrator<P, F> {
    pub fn new(primary: P, fallback: F, codec: RuleNamingCodec) -> Self {
        Self {
            primary,
            fallback,
            catalog: RuleCatalog::new(codec),
        }
    }

    pub fn codec(&self) -> &RuleNamingCodec {
        self.catalog.codec()
    }

    pub fn primary(&self) -> &P {
        &self.primary
    }

    pub fn fallback(&self) -> &F {
        &self.fallback
    }

    pub fn into_backends(self) -> (P, F) {
        (self.primary, self.fallback)
    }

    /// Blocks every matching file under the request root, both directions
    ///
    /// # Errors
    ///
    /// Returns `Err` only for an invalid request, an unready structured
    /// backend, or an unreadable root. Per-rule failures are collected in the
    /// report; cancellation stops between files and returns the partial report.
    pub async fn block(
        &mut self,
        request: &FileBlockRequest,
        cancel: &CancellationToken,
    ) -> Result<BlockReport> {
        request.validate()?;
        let application = request.application_name()?;

        if let Err(e) = self.primary.ensure_ready().await {
            error!("{} backend not ready, aborting block: {e}", self.primary.name());
            return Err(match e {
                Error::Precondition(_) => e,
                other => Error::Precondition(other.diagnostic_text()),
            });
        }

        let files = discover(request)?;
        let mut report = BlockReport {
            application: application.clone(),
            files: files.clone(),
            ..BlockReport::default()
        };

        if files.is_empty() {
            let warning = format!(
                "No matching files found under '{}'",
                request.root.display()
            );
            warn!("{warning}");
            report.warning = Some(warning);
            return Ok(report);
        }

        info!("Blocking {} file(s) for application '{application}'", files.len());

        // Keyed case-insensitively: the firewall matches display names that way.
        let mut claimed: BTreeMap<String, PathBuf> = BTreeMap::new();

        for path in &files {
            if cancel.is_cancelled() {
                warn!(
                    "Block cancelled after {} of {} file(s)",
                    report.files_processed,
                    files.len()
                );
                report.cancelled = true;
                break;
            }

            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let key = self
                .codec()
                .encode(&application, &file_name, Direction::Inbound)
                .to_lowercase();
            if let Some(earlier) = claimed.get(&key) {
                warn!(
                    "Skipping '{}': rule names already used for '{}'",
                    path.display(),
                    earlier.display()
                );
                report.collisions.push(NameCollision {
                    file: path.clone(),
                    blocked_by: earlier.clone(),
                });
                report.files_processed += 1;
                continue;
            }
            claimed.insert(key, path.clone());

            for direction in Direction::BOTH {
                let display_name = self.codec().encode(&application, &file_name, direction);
                let outcome = self.create_with_fallback(path, &display_name, direction).await;

                match outcome {
                    BackendOutcome::Succeeded { via, .. } => report.created.push(CreatedRule {
                        display_name,
                        program: path.clone(),
                        direction,
                        via,
                    }),
                    failed @ BackendOutcome::Failed { .. } => {
                        error!("Could not create rule '{display_name}' with either backend");
                        report
                            .failures
                            .extend(RuleFailure::from_outcome(&display_name, failed));
                    }
                }
            }

            report.files_processed += 1;
        }

        info!(
            "Block finished: {} created ({} via fallback), {} failed, {} skipped",
            report.created.len(),
            report.fallback_count(),
            report.failures.len(),
            report.collisions.len()
        );
        Ok(report)
    }

    /// Removes every owned rule whose decoded application equals `application`
    ///
    /// Application names compare case-insensitively, like Windows folder names.
    ///
    /// # Errors
    ///
    /// Returns `Err` only when neither backend can list rules.
    pub async fn remove_by_application(&mut self, application: &str) -> Result<RemovalReport> {
        let records = self
            .catalog
            .list_owned(&mut self.primary, &mut self.fallback, EnrichMode::Skip)
            .await?;

        let target = application.trim().to_lowercase();
        let candidates: BTreeSet<String> = records
            .iter()
            .filter(|r| {
                r.owned
                    && r.owned_application()
                        .is_some_and(|app| app.to_lowercase() == target)
            })
            .map(|r| r.display_name.clone())
            .collect();

        let mut report = RemovalReport {
            application: application.to_string(),
            candidates: candidates.len(),
            ..RemovalReport::default()
        };

        if candidates.is_empty() {
            info!("No rules found for application '{application}'");
            return Ok(report);
        }

        for display_name in candidates {
            match self.remove_with_fallback(&display_name).await {
                BackendOutcome::Succeeded { .. } => report.removed.push(display_name),
                failed @ BackendOutcome::Failed { .. } => {
                    error!("Could not remove rule '{display_name}' with either backend");
                    report
                        .failures
                        .extend(RuleFailure::from_outcome(&display_name, failed));
                }
            }
        }

        info!(
            "Removed {} of {} rule(s) for '{application}'",
            report.removed.len(),
            report.candidates
        );
        Ok(report)
    }

    /// Removes one rule by display name
    ///
    /// # Errors
    ///
    /// Returns [`Error::BothBackends`] when neither backend could remove it.
    pub async fn remove_single(&mut self, display_name: &str) -> Result<BackendPath> {
        let (_, via) = self.remove_with_fallback(display_name).await.into_result()?;
        Ok(via)
    }

    /// Enables or disables one rule by display name
    ///
    /// # Errors
    ///
    /// Returns [`Error::BothBackends`] when neither backend could change it.
    pub async fn set_enabled(&mut self, display_name: &str, enabled: bool) -> Result<BackendPath> {
        let outcome = match self.primary.set_enabled(display_name, enabled).await {
            Ok(()) => BackendOutcome::Succeeded {
                via: BackendPath::Primary,
                value: (),
            },
            Err(e) => {
                self.log_fallback("set_enabled", display_name, &e);
                BackendOutcome::after_primary_failure(
                    e,
                    self.fallback.set_enabled(display_name, enabled).await,
                )
            }
        };

        let (_, via) = outcome.into_result()?;
        info!(
            "{} rule '{display_name}'",
            if enabled { "Enabled" } else { "Disabled" }
        );
        Ok(via)
    }

    /// Full inventory with classification
    ///
    /// # Errors
    ///
    /// Returns `Err` only when neither backend can list rules.
    pub async fn list_all(&mut self, enrich: EnrichMode) -> Result<Vec<RuleRecord>> {
        self.catalog
            .list_all(&mut self.primary, &mut self.fallback, enrich)
            .await
    }

    /// Only rules carrying the ownership prefix
    ///
    /// # Errors
    ///
    /// Returns `Err` only when neither backend can list rules.
    pub async fn list_owned(&mut self, enrich: EnrichMode) -> Result<Vec<RuleRecord>> {
        self.catalog
            .list_owned(&mut self.primary, &mut self.fallback, enrich)
            .await
    }

    async fn create_with_fallback(
        &mut self,
        program: &Path,
        display_name: &str,
        direction: Direction,
    ) -> BackendOutcome {
        match self
            .primary
            .create_rule(program, display_name, direction)
            .await
        {
            Ok(()) => BackendOutcome::Succeeded {
                via: BackendPath::Primary,
                value: (),
            },
            Err(e) => {
                self.log_fallback("create", display_name, &e);
                BackendOutcome::after_primary_failure(
                    e,
                    self.fallback
                        .create_rule(program, display_name, direction)
                        .await,
                )
            }
        }
    }

    async fn remove_with_fallback(&mut self, display_name: &str) -> BackendOutcome {
        match self.primary.remove_rule(display_name).await {
            Ok(()) => BackendOutcome::Succeeded {
                via: BackendPath::Primary,
                value: (),
            },
            Err(e) => {
                self.log_fallback("remove", display_name, &e);
                BackendOutcome::after_primary_failure(
                    e,
                    self.fallback.remove_rule(display_name).await,
                )
            }
        }
    }

    fn log_fallback(&self, operation: &str, display_name: &str, error: &Error) {
        warn!(
            backend = self.primary.name(),
            fallback = self.fallback.name(),
            operation,
            "'{display_name}' failed on primary backend: {error}"
        );
    }
}
