//! Shared test utilities for core module tests
//!
//! Provides an in-memory firewall and a scriptable backend so orchestration
//! logic can be tested without PowerShell or netsh. This module is only
//! compiled in test mode.

use crate::core::backend::RuleBackend;
use crate::core::error::{Error, Result};
use crate::core::naming::Direction;
use crate::core::rule::{PortDetails, RawRule};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Mutex for tests that need exclusive access to environment variables.
///
/// # Example
///
/// ```ignore
/// let _guard = ENV_VAR_MUTEX.lock().unwrap();
/// unsafe {
///     std::env::set_var("FWBLOCK_NETSH_COMMAND", "/tmp/mock");
/// }
/// // ... test with custom env state ...
/// unsafe {
///     std::env::remove_var("FWBLOCK_NETSH_COMMAND");
/// }
/// ```
pub static ENV_VAR_MUTEX: Mutex<()> = Mutex::new(());

/// One stored rule plus the program its application filter points at
#[derive(Debug, Clone)]
pub struct StoredRule {
    pub raw: RawRule,
    pub program: Option<String>,
}

/// Rule store shared by every fake backend, like the OS firewall store
#[derive(Debug, Clone, Default)]
pub struct FakeFirewall {
    rules: Arc<Mutex<Vec<StoredRule>>>,
}

impl FakeFirewall {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule as if created by someone else
    pub fn seed(&self, display_name: &str, group: &str, direction: &str) {
        self.rules.lock().unwrap().push(StoredRule {
            raw: RawRule {
                display_name: display_name.to_string(),
                direction: direction.to_string(),
                action: "Block".to_string(),
                group: group.to_string(),
                enabled: true,
                ..RawRule::default()
            },
            program: None,
        });
    }

    pub fn names(&self) -> Vec<String> {
        self.rules
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.raw.display_name.clone())
            .collect()
    }

    pub fn count(&self, display_name: &str) -> usize {
        self.rules
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.raw.display_name == display_name)
            .count()
    }

    pub fn is_enabled(&self, display_name: &str) -> Option<bool> {
        self.rules
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.raw.display_name == display_name)
            .map(|r| r.raw.enabled)
    }
}

/// A recorded backend call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    EnsureReady,
    Exists(String),
    Create(String),
    Remove(String),
    List,
    SetEnabled(String, bool),
    LookupProgram(String),
    LookupPorts(String),
}

/// Which names an operation should fail for
#[derive(Debug, Clone, Default)]
pub struct FailSet {
    pub all: bool,
    pub names: HashSet<String>,
}

impl FailSet {
    pub fn all() -> Self {
        Self {
            all: true,
            names: HashSet::new(),
        }
    }

    pub fn names<I: IntoIterator<Item = S>, S: Into<String>>(names: I) -> Self {
        Self {
            all: false,
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    fn hits(&self, name: &str) -> bool {
        self.all || self.names.contains(name)
    }
}

/// In-memory backend with failure injection and call recording
#[derive(Debug, Clone)]
pub struct FakeBackend {
    name: &'static str,
    firewall: FakeFirewall,
    calls: Arc<Mutex<Vec<Call>>>,
    pub fail_ready: bool,
    pub fail_list: bool,
    pub fail_create: FailSet,
    pub fail_remove: FailSet,
    pub fail_lookup: bool,
    pub supports_toggle: bool,
}

impl FakeBackend {
    pub fn new(name: &'static str, firewall: &FakeFirewall) -> Self {
        Self {
            name,
            firewall: firewall.clone(),
            calls: Arc::new(Mutex::new(Vec::new())),
            fail_ready: false,
            fail_list: false,
            fail_create: FailSet::default(),
            fail_remove: FailSet::default(),
            fail_lookup: false,
            supports_toggle: true,
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Create calls issued for exactly this display name
    pub fn create_calls_for(&self, display_name: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Create(n) if n == display_name))
            .count()
    }

    pub fn create_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Create(_)))
            .count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn failure(&self, message: &str) -> Error {
        Error::BackendCall {
            backend: self.name,
            message: message.to_string(),
            stderr: Some(format!("{message}\nsecond line")),
            exit_code: Some(1),
            sub_errors: vec![message.to_string(), "second line".to_string()],
        }
    }
}

impl RuleBackend for FakeBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn ensure_ready(&mut self) -> Result<()> {
        self.record(Call::EnsureReady);
        if self.fail_ready {
            return Err(Error::Precondition("module not available".to_string()));
        }
        Ok(())
    }

    async fn rule_exists(&mut self, display_name: &str) -> Result<bool> {
        self.record(Call::Exists(display_name.to_string()));
        Ok(self.firewall.count(display_name) > 0)
    }

    async fn create_rule(
        &mut self,
        program: &Path,
        display_name: &str,
        direction: Direction,
    ) -> Result<()> {
        self.record(Call::Create(display_name.to_string()));
        if self.fail_create.hits(display_name) {
            return Err(self.failure("create failed"));
        }
        if self.firewall.count(display_name) > 0 {
            return Ok(());
        }

        self.firewall.rules.lock().unwrap().push(StoredRule {
            raw: RawRule {
                display_name: display_name.to_string(),
                direction: direction.to_string(),
                action: "Block".to_string(),
                profile: "Any".to_string(),
                enabled: true,
                ..RawRule::default()
            },
            program: Some(program.to_string_lossy().into_owned()),
        });
        Ok(())
    }

    async fn remove_rule(&mut self, display_name: &str) -> Result<()> {
        self.record(Call::Remove(display_name.to_string()));
        if self.fail_remove.hits(display_name) {
            return Err(self.failure("remove failed"));
        }

        let mut rules = self.firewall.rules.lock().unwrap();
        let before = rules.len();
        rules.retain(|r| r.raw.display_name != display_name);
        if rules.len() == before {
            return Err(self.failure("No rules match the specified criteria."));
        }
        Ok(())
    }

    async fn list_all(&mut self) -> Result<Vec<RawRule>> {
        self.record(Call::List);
        if self.fail_list {
            return Err(self.failure("list failed"));
        }
        Ok(self
            .firewall
            .rules
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.raw.clone())
            .collect())
    }

    async fn set_enabled(&mut self, display_name: &str, enabled: bool) -> Result<()> {
        self.record(Call::SetEnabled(display_name.to_string(), enabled));
        if !self.supports_toggle {
            return Err(Error::Unsupported {
                backend: self.name,
                operation: "enable/disable",
            });
        }

        let mut rules = self.firewall.rules.lock().unwrap();
        let mut found = false;
        for rule in rules.iter_mut().filter(|r| r.raw.display_name == display_name) {
            rule.raw.enabled = enabled;
            found = true;
        }
        if found {
            Ok(())
        } else {
            Err(self.failure("No rules match the specified criteria."))
        }
    }

    async fn lookup_program(&mut self, display_name: &str) -> Result<String> {
        self.record(Call::LookupProgram(display_name.to_string()));
        if self.fail_lookup {
            return Err(self.failure("lookup failed"));
        }
        self.firewall
            .rules
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.raw.display_name == display_name)
            .and_then(|r| r.program.clone())
            .ok_or_else(|| Error::Internal("no application filter returned".to_string()))
    }

    async fn lookup_ports(&mut self, display_name: &str) -> Result<PortDetails> {
        self.record(Call::LookupPorts(display_name.to_string()));
        if self.fail_lookup {
            return Err(self.failure("lookup failed"));
        }
        Ok(PortDetails {
            protocol: "Any".to_string(),
            local_ports: Vec::new(),
            remote_ports: Vec::new(),
        })
    }
}

/// Creates `<tmp>/<application>/` containing empty files with the given names
pub fn create_app_dir(application: &str, files: &[&str]) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join(application);
    std::fs::create_dir_all(&root).unwrap();
    for file in files {
        let path = root.join(file);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, b"MZ").unwrap();
    }
    (dir, root)
}
