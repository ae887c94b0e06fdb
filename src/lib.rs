//! fwblock - network blocking for Windows applications
//!
//! Creates inbound and outbound Windows Firewall block rules for every
//! executable and library of an application, and lists, toggles and removes
//! them again by application.
//!
//! # Architecture
//!
//! - [`core`] - Rule naming, file discovery, backends, orchestration and listing
//! - [`process`] - Bounded execution of PowerShell and netsh
//! - [`audit`] - JSON-lines audit trail of rule changes
//! - [`config`] - Configuration persistence
//! - [`utils`] - Per-user directories
//!
//! # Backends
//!
//! - PowerShell `NetSecurity` cmdlets are tried first
//! - `netsh advfirewall firewall` is the fallback for each individual rule
//! - A rule only counts as failed when both report failure

// Allow pedantic clippy warnings that are not worth fixing for this codebase
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::needless_lifetimes)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]

pub mod audit;
pub mod config;
pub mod core;
pub mod process;
pub mod utils;

// Re-export commonly used types
pub use core::discovery::{FileBlockRequest, TargetExtension};
pub use core::error::{Error, Result};
pub use core::naming::{Direction, RuleIdentity, RuleNamingCodec};
pub use core::orchestrator::{BlockReport, RemovalReport, RuleOrchestrator};
