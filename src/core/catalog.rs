//! Rule inventory and classification
//!
//! The catalog lists every rule through the backends, marks the ones carrying
//! the ownership prefix, decodes their identity, and optionally enriches each
//! record with program path and port filters from the structured backend.
//! Nothing is cached: every call re-reads the firewall store.

use crate::core::backend::{BackendOutcome, BackendPath, RuleBackend};
use crate::core::error::Result;
use crate::core::naming::{Direction, RuleNamingCodec};
use crate::core::rule::{Enrichment, RawRule, RuleRecord};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Whether listing should issue the per-rule secondary lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnrichMode {
    #[default]
    Skip,
    Lookup,
}

#[derive(Debug, Clone)]
pub struct RuleCatalog {
    codec: RuleNamingCodec,
}

impl RuleCatalog {
    pub fn new(codec: RuleNamingCodec) -> Self {
        Self { codec }
    }

    pub fn codec(&self) -> &RuleNamingCodec {
        &self.codec
    }

    /// Reads all raw rules, structured backend first
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::BothBackends`] when neither backend can list.
    pub async fn fetch<P, F>(&self, primary: &mut P, fallback: &mut F) -> Result<(Vec<RawRule>, BackendPath)>
    where
        P: RuleBackend,
        F: RuleBackend,
    {
        let outcome = match primary.list_all().await {
            Ok(rules) => BackendOutcome::Succeeded {
                via: BackendPath::Primary,
                value: rules,
            },
            Err(e) => {
                warn!(backend = primary.name(), "Listing failed, using fallback: {e}");
                BackendOutcome::after_primary_failure(e, fallback.list_all().await)
            }
        };

        let (rules, via) = outcome.into_result()?;
        debug!("Listed {} rule(s) via {via} backend", rules.len());
        Ok((rules, via))
    }

    /// Turns a raw rule into a record without any lookups
    ///
    /// Owned rules get their identity decoded; an owned name that fails to
    /// decode is logged and keeps the raw values.
    pub fn classify(&self, raw: RawRule) -> RuleRecord {
        let owned = self.codec.is_owned(&raw.display_name);

        let identity = if owned {
            match self.codec.decode(&raw.display_name) {
                Ok(identity) => Some(identity),
                Err(e) => {
                    warn!("Cannot decode rule name '{}': {e}", raw.display_name);
                    None
                }
            }
        } else {
            None
        };

        let direction = identity
            .as_ref()
            .map(|id| id.direction)
            .or_else(|| Direction::from_raw(&raw.direction));
        let application = identity
            .as_ref()
            .map_or_else(|| raw.group.clone(), |id| id.application.clone());

        RuleRecord {
            application,
            identity,
            direction,
            raw_direction: raw.direction,
            action: raw.action,
            protocol: raw.protocol,
            profile: raw.profile,
            description: raw.description,
            group: raw.group,
            enabled: raw.enabled,
            owned,
            program: raw.program.map_or(Enrichment::NotRequested, Enrichment::Present),
            ports: raw.ports.map_or(Enrichment::NotRequested, Enrichment::Present),
            display_name: raw.display_name,
        }
    }

    /// Full inventory: every rule, owned or not
    ///
    /// # Errors
    ///
    /// Returns `Err` only when neither backend can list rules; enrichment
    /// failures are recorded on the records.
    pub async fn list_all<P, F>(
        &self,
        primary: &mut P,
        fallback: &mut F,
        enrich: EnrichMode,
    ) -> Result<Vec<RuleRecord>>
    where
        P: RuleBackend,
        F: RuleBackend,
    {
        let (raw, via) = self.fetch(primary, fallback).await?;
        let records = raw.into_iter().map(|r| self.classify(r)).collect();
        Ok(self.finish(primary, records, via, enrich).await)
    }

    /// Only the rules carrying the ownership prefix
    ///
    /// # Errors
    ///
    /// See [`RuleCatalog::list_all`].
    pub async fn list_owned<P, F>(
        &self,
        primary: &mut P,
        fallback: &mut F,
        enrich: EnrichMode,
    ) -> Result<Vec<RuleRecord>>
    where
        P: RuleBackend,
        F: RuleBackend,
    {
        let (raw, via) = self.fetch(primary, fallback).await?;
        let records = raw
            .into_iter()
            .filter(|r| self.codec.is_owned(&r.display_name))
            .map(|r| self.classify(r))
            .collect();
        Ok(self.finish(primary, records, via, enrich).await)
    }

    async fn finish<P: RuleBackend>(
        &self,
        primary: &mut P,
        records: Vec<RuleRecord>,
        via: BackendPath,
        enrich: EnrichMode,
    ) -> Vec<RuleRecord> {
        if enrich == EnrichMode::Skip {
            return records;
        }

        let mut enriched = Vec::with_capacity(records.len());
        for record in records {
            enriched.push(enrich_record(primary, record, via).await);
        }
        info!("Enriched {} rule(s)", enriched.len());
        enriched
    }
}

/// Fills program and ports through the structured backend
///
/// Values already carried by the listing are kept. Lookup errors become
/// [`Enrichment::Missing`].
async fn enrich_record<P: RuleBackend>(
    primary: &mut P,
    mut record: RuleRecord,
    listed_via: BackendPath,
) -> RuleRecord {
    if listed_via == BackendPath::Fallback {
        // The structured backend already failed to list; per-rule lookups would too.
        let reason = format!("{} unavailable", primary.name());
        if record.program.present().is_none() {
            record.program = Enrichment::Missing {
                reason: reason.clone(),
            };
        }
        if record.ports.present().is_none() {
            record.ports = Enrichment::Missing { reason };
        }
        return record;
    }

    if record.program.present().is_none() {
        record.program = match primary.lookup_program(&record.display_name).await {
            Ok(program) => Enrichment::Present(program),
            Err(e) => {
                debug!("No program for '{}': {e}", record.display_name);
                Enrichment::Missing {
                    reason: e.to_string(),
                }
            }
        };
    }

    if record.ports.present().is_none() {
        record.ports = match primary.lookup_ports(&record.display_name).await {
            Ok(ports) => {
                if record.protocol.is_empty() {
                    record.protocol.clone_from(&ports.protocol);
                }
                Enrichment::Present(ports)
            }
            Err(e) => {
                debug!("No ports for '{}': {e}", record.display_name);
                Enrichment::Missing {
                    reason: e.to_string(),
                }
            }
        };
    }

    record
}

/// Owned rules grouped by application
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationSummary {
    pub application: String,
    pub rule_count: usize,
    pub enabled_count: usize,
    pub files: BTreeSet<String>,
}

/// Groups decoded owned records by application, sorted by name
pub fn summarize_by_application(records: &[RuleRecord]) -> Vec<ApplicationSummary> {
    let mut groups: BTreeMap<&str, ApplicationSummary> = BTreeMap::new();

    for record in records {
        let Some(identity) = record.identity.as_ref() else {
            continue;
        };

        let summary = groups
            .entry(identity.application.as_str())
            .or_insert_with(|| ApplicationSummary {
                application: identity.application.clone(),
                rule_count: 0,
                enabled_count: 0,
                files: BTreeSet::new(),
            });
        summary.rule_count += 1;
        if record.enabled {
            summary.enabled_count += 1;
        }
        summary.files.insert(identity.file.clone());
    }

    groups.into_values().collect()
}
