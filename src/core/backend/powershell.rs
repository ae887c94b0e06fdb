//! Structured backend driving the NetSecurity PowerShell module
//!
//! Scripts are written to PowerShell's stdin (`-Command -`) so rule names never
//! pass through command-line parsing. Every script runs inside a `try`/`catch`
//! with `$ErrorActionPreference = 'Stop'`: any reported execution error ends the
//! script with exit code 1 and the message on stderr.
//!
//! Queries emit compact JSON via `ConvertTo-Json`; enum-valued properties are
//! converted to strings in the script so the JSON never carries bare numbers.

use super::{DEFAULT_COMMAND_TIMEOUT, RuleBackend};
use crate::core::error::{Error, Result};
use crate::core::naming::Direction;
use crate::core::rule::{PortDetails, RawRule};
use crate::process::{Tool, ToolCommand, ToolOutput, quote_powershell, run_tool};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

const BACKEND_NAME: &str = "PowerShell";

/// Arguments preceding the script on stdin
const POWERSHELL_ARGS: [&str; 5] = [
    "-NoProfile",
    "-NonInteractive",
    "-ExecutionPolicy",
    "Bypass",
    "-Command",
];

/// Loosens the execution policy for this process and loads the firewall cmdlets
const READY_SCRIPT: &str = "Set-ExecutionPolicy -Scope Process -ExecutionPolicy Bypass -Force; \
Import-Module NetSecurity; \
Get-Command New-NetFirewallRule | Out-Null";

/// Session-scoped access to the NetSecurity cmdlets
#[derive(Debug, Clone)]
pub struct ManagementBackend {
    command: ToolCommand,
    timeout: Duration,
    ready: bool,
}

impl Default for ManagementBackend {
    fn default() -> Self {
        Self::new(ToolCommand::resolve(Tool::PowerShell), DEFAULT_COMMAND_TIMEOUT)
    }
}

impl ManagementBackend {
    pub fn new(command: ToolCommand, timeout: Duration) -> Self {
        Self {
            command,
            timeout,
            ready: false,
        }
    }

    /// Whether [`RuleBackend::ensure_ready`] has succeeded on this session
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    async fn run_script(&self, body: &str) -> Result<ToolOutput> {
        let script = wrap_script(body);
        let args: Vec<String> = POWERSHELL_ARGS
            .iter()
            .map(|a| (*a).to_string())
            .chain(std::iter::once("-".to_string()))
            .collect();

        let output = run_tool(&self.command, &args, Some(&script), self.timeout).await?;
        check_output(output)
    }
}

/// Wraps a script body so any error terminates with exit code 1
fn wrap_script(body: &str) -> String {
    format!(
        "try {{ $ErrorActionPreference = 'Stop'; $ProgressPreference = 'SilentlyContinue'; \
Import-Module NetSecurity; {body} }} \
catch {{ [Console]::Error.WriteLine($_.Exception.Message); exit 1 }}\n"
    )
}

/// Treats non-zero exit codes and any stderr output as failure
fn check_output(output: ToolOutput) -> Result<ToolOutput> {
    let sub_errors = output.stderr_lines();
    if output.success() && sub_errors.is_empty() {
        return Ok(output);
    }

    let message = sub_errors.first().cloned().unwrap_or_else(|| {
        format!(
            "exited with code {}",
            output
                .exit_code
                .map_or_else(|| "unknown".to_string(), |c| c.to_string())
        )
    });

    Err(Error::BackendCall {
        backend: BACKEND_NAME,
        message,
        stderr: Some(output.stderr.clone()).filter(|s| !s.trim().is_empty()),
        exit_code: output.exit_code,
        sub_errors,
    })
}

/// `-DisplayName` argument matching exactly one name
///
/// The query cmdlets treat `-DisplayName` as a wildcard pattern, so `[`, `]`,
/// `*` and `?` in a file name must be escaped to match literally.
pub(crate) fn literal_name_arg(display_name: &str) -> String {
    format!(
        "([WildcardPattern]::Escape({}))",
        quote_powershell(display_name)
    )
}

pub(crate) fn exists_script(display_name: &str) -> String {
    format!(
        "if (Get-NetFirewallRule -DisplayName {} -ErrorAction SilentlyContinue) {{ 'true' }} else {{ 'false' }}",
        literal_name_arg(display_name)
    )
}

// New-NetFirewallRule stores -DisplayName verbatim; no pattern matching applies.
pub(crate) fn create_script(program: &Path, display_name: &str, direction: Direction) -> String {
    format!(
        "New-NetFirewallRule -DisplayName {} -Direction {direction} -Program {} \
-Action Block -Profile Any -Enabled True | Out-Null",
        quote_powershell(display_name),
        quote_powershell(&program.to_string_lossy()),
    )
}

pub(crate) fn remove_script(display_name: &str) -> String {
    format!(
        "Remove-NetFirewallRule -DisplayName {}",
        literal_name_arg(display_name)
    )
}

pub(crate) fn set_enabled_script(display_name: &str, enabled: bool) -> String {
    let verb = if enabled { "Enable" } else { "Disable" };
    format!(
        "{verb}-NetFirewallRule -DisplayName {}",
        literal_name_arg(display_name)
    )
}

pub(crate) const LIST_SCRIPT: &str = "ConvertTo-Json -Compress -InputObject @(Get-NetFirewallRule | \
ForEach-Object { [pscustomobject]@{ \
DisplayName = $_.DisplayName; \
Direction = $_.Direction.ToString(); \
Action = $_.Action.ToString(); \
Profile = $_.Profile.ToString(); \
Description = $_.Description; \
DisplayGroup = $_.DisplayGroup; \
Enabled = $_.Enabled.ToString() } })";

pub(crate) fn program_script(display_name: &str) -> String {
    format!(
        "ConvertTo-Json -Compress -InputObject @(Get-NetFirewallRule -DisplayName {} | \
Get-NetFirewallApplicationFilter | ForEach-Object {{ $_.Program }})",
        literal_name_arg(display_name)
    )
}

pub(crate) fn ports_script(display_name: &str) -> String {
    format!(
        "ConvertTo-Json -Compress -Depth 3 -InputObject @(Get-NetFirewallRule -DisplayName {} | \
Get-NetFirewallPortFilter | Select-Object -First 1 | ForEach-Object {{ [pscustomobject]@{{ \
Protocol = [string]$_.Protocol; LocalPort = @($_.LocalPort); RemotePort = @($_.RemotePort) }} }})",
        literal_name_arg(display_name)
    )
}

/// Splits `ConvertTo-Json` output into items
///
/// Accepts an array, a single object (older PowerShell unwraps one-element
/// arrays), `null`, or no output at all.
pub(crate) fn json_items(stdout: &str) -> Result<Vec<Value>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    match serde_json::from_str::<Value>(trimmed)? {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        other => Ok(vec![other]),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PsRule {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    direction: Option<String>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    profile: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    display_group: Option<String>,
    #[serde(default)]
    enabled: Option<Value>,
}

impl From<PsRule> for RawRule {
    fn from(rule: PsRule) -> Self {
        RawRule {
            display_name: rule.display_name.unwrap_or_default(),
            direction: rule.direction.unwrap_or_default(),
            action: rule.action.unwrap_or_default(),
            protocol: String::new(),
            profile: rule.profile.unwrap_or_default(),
            description: rule.description.unwrap_or_default(),
            group: rule.display_group.unwrap_or_default(),
            enabled: rule.enabled.as_ref().is_some_and(value_is_true),
            program: None,
            ports: None,
        }
    }
}

fn value_is_true(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.eq_ignore_ascii_case("true") || s.eq_ignore_ascii_case("yes"),
        // GpoBoolean: True = 1, False = 2
        Value::Number(n) => n.as_u64() == Some(1),
        _ => false,
    }
}

/// Parses the list query output, skipping entries that fail to deserialize
pub(crate) fn parse_rule_list(stdout: &str) -> Result<Vec<RawRule>> {
    let items = json_items(stdout)?;
    let mut rules = Vec::with_capacity(items.len());

    for item in items {
        match serde_json::from_value::<PsRule>(item) {
            Ok(rule) => rules.push(rule.into()),
            Err(e) => warn!("Skipping unreadable rule entry: {e}"),
        }
    }

    Ok(rules)
}

fn value_to_strings(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().flat_map(value_to_strings).collect(),
        Value::String(s) if !s.is_empty() && !s.eq_ignore_ascii_case("any") => vec![s.clone()],
        Value::Number(n) => vec![n.to_string()],
        _ => Vec::new(),
    }
}

pub(crate) fn parse_ports(stdout: &str) -> Result<PortDetails> {
    let item = json_items(stdout)?
        .into_iter()
        .next()
        .ok_or_else(|| Error::Internal("no port filter returned".to_string()))?;

    Ok(PortDetails {
        protocol: item
            .get("Protocol")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        local_ports: item.get("LocalPort").map(value_to_strings).unwrap_or_default(),
        remote_ports: item
            .get("RemotePort")
            .map(value_to_strings)
            .unwrap_or_default(),
    })
}

pub(crate) fn parse_program(stdout: &str) -> Result<String> {
    json_items(stdout)?
        .into_iter()
        .find_map(|v| v.as_str().map(String::from))
        .filter(|p| !p.is_empty())
        .ok_or_else(|| Error::Internal("no application filter returned".to_string()))
}

impl RuleBackend for ManagementBackend {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn ensure_ready(&mut self) -> Result<()> {
        if self.ready {
            return Ok(());
        }

        match self.run_script(READY_SCRIPT).await {
            Ok(_) => {
                info!("NetSecurity module loaded");
                self.ready = true;
                Ok(())
            }
            Err(e) => Err(Error::Precondition(e.diagnostic_text())),
        }
    }

    async fn rule_exists(&mut self, display_name: &str) -> Result<bool> {
        let output = self.run_script(&exists_script(display_name)).await?;
        Ok(output.stdout.trim().eq_ignore_ascii_case("true"))
    }

    async fn create_rule(
        &mut self,
        program: &Path,
        display_name: &str,
        direction: Direction,
    ) -> Result<()> {
        if self.rule_exists(display_name).await? {
            debug!("Rule already exists, skipping: {display_name}");
            return Ok(());
        }

        self.run_script(&create_script(program, display_name, direction))
            .await?;
        info!("Created rule {display_name}");
        Ok(())
    }

    async fn remove_rule(&mut self, display_name: &str) -> Result<()> {
        self.run_script(&remove_script(display_name)).await?;
        info!("Removed rule {display_name}");
        Ok(())
    }

    async fn list_all(&mut self) -> Result<Vec<RawRule>> {
        let output = self.run_script(LIST_SCRIPT).await?;
        parse_rule_list(&output.stdout)
    }

    async fn set_enabled(&mut self, display_name: &str, enabled: bool) -> Result<()> {
        self.run_script(&set_enabled_script(display_name, enabled))
            .await?;
        Ok(())
    }

    async fn lookup_program(&mut self, display_name: &str) -> Result<String> {
        let output = self.run_script(&program_script(display_name)).await?;
        parse_program(&output.stdout)
    }

    async fn lookup_ports(&mut self, display_name: &str) -> Result<PortDetails> {
        let output = self.run_script(&ports_script(display_name)).await?;
        parse_ports(&output.stdout)
    }
}
