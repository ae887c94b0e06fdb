//! Core firewall rule orchestration
//!
//! - [`naming`]: Rule display-name grammar (encode/decode, ownership prefix)
//! - [`rule`]: Raw and classified rule records
//! - [`backend`]: The structured (PowerShell) and command-line (netsh) backends
//! - [`discovery`]: Block requests and file enumeration
//! - [`orchestrator`]: Block/remove/toggle with per-rule fallback
//! - [`catalog`]: Listing, classification and enrichment
//! - [`error`]: Error types and user-facing translations

pub mod backend;
pub mod catalog;
pub mod discovery;
pub mod error;
pub mod naming;
pub mod orchestrator;
pub mod rule;

#[cfg(test)]
pub mod test_helpers;
