//! Command-line fallback backend using `netsh advfirewall firewall`
//!
//! Only three invocations are ever issued:
//!
//! ```text
//! netsh advfirewall firewall add rule name="<name>" dir=<in|out> action=block program="<path>" enable=yes
//! netsh advfirewall firewall delete rule name="<name>"
//! netsh advfirewall firewall show rule name=all
//! ```
//!
//! Existence checks are answered from the `show` output. Success is a zero
//! exit code; otherwise the captured error text becomes the failure detail.

use super::{DEFAULT_COMMAND_TIMEOUT, RuleBackend};
use crate::core::error::{Error, Result};
use crate::core::naming::Direction;
use crate::core::rule::{PortDetails, RawRule};
use crate::process::{Tool, ToolCommand, ToolOutput, quote_netsh, run_tool};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

const BACKEND_NAME: &str = "netsh";

const NO_RULES_MATCH: &str = "No rules match the specified criteria.";

const CONTEXT: [&str; 2] = ["advfirewall", "firewall"];

#[derive(Debug, Clone)]
pub struct CommandLineBackend {
    command: ToolCommand,
    timeout: Duration,
}

impl Default for CommandLineBackend {
    fn default() -> Self {
        Self::new(ToolCommand::resolve(Tool::Netsh), DEFAULT_COMMAND_TIMEOUT)
    }
}

impl CommandLineBackend {
    pub fn new(command: ToolCommand, timeout: Duration) -> Self {
        Self { command, timeout }
    }

    async fn run(&self, args: Vec<String>) -> Result<ToolOutput> {
        let output = run_tool(&self.command, &args, None, self.timeout).await?;
        check_output(output)
    }
}

fn context_args(rest: &[String]) -> Vec<String> {
    CONTEXT
        .iter()
        .map(|s| (*s).to_string())
        .chain(rest.iter().cloned())
        .collect()
}

pub(crate) fn add_rule_args(program: &Path, display_name: &str, direction: Direction) -> Vec<String> {
    context_args(&[
        "add".to_string(),
        "rule".to_string(),
        format!("name={}", quote_netsh(display_name)),
        format!("dir={}", direction.netsh_keyword()),
        "action=block".to_string(),
        format!("program={}", quote_netsh(&program.to_string_lossy())),
        "enable=yes".to_string(),
    ])
}

pub(crate) fn delete_rule_args(display_name: &str) -> Vec<String> {
    context_args(&[
        "delete".to_string(),
        "rule".to_string(),
        format!("name={}", quote_netsh(display_name)),
    ])
}

pub(crate) fn show_all_args() -> Vec<String> {
    context_args(&[
        "show".to_string(),
        "rule".to_string(),
        "name=all".to_string(),
    ])
}

fn check_output(output: ToolOutput) -> Result<ToolOutput> {
    if output.success() {
        return Ok(output);
    }

    // netsh reports most errors on stdout
    let detail = if output.stderr.trim().is_empty() {
        output.stdout.trim().to_string()
    } else {
        output.stderr.trim().to_string()
    };
    let sub_errors: Vec<String> = detail
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect();

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
        stderr: Some(detail).filter(|d| !d.is_empty()),
        exit_code: output.exit_code,
        sub_errors,
    })
}

/// `show rule name=all` on a store without rules exits non-zero with this text
fn is_empty_store(output: &ToolOutput) -> bool {
    !output.success()
        && output
            .stdout
            .lines()
            .any(|l| l.trim() == NO_RULES_MATCH)
}

fn split_ports(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty() && !p.eq_ignore_ascii_case("any"))
        .map(String::from)
        .collect()
}

/// Parses `netsh advfirewall firewall show rule` output
///
/// A `Rule Name:` line starts a new record; known keys populate it until the
/// next `Rule Name:` or the end of output. Unknown lines are ignored.
pub fn parse_show_rule_output(text: &str) -> Vec<RawRule> {
    let mut rules = Vec::new();
    let mut current: Option<RawRule> = None;

    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        if key == "Rule Name" {
            if let Some(rule) = current.take() {
                rules.push(rule);
            }
            current = Some(RawRule::named(value));
            continue;
        }

        let Some(rule) = current.as_mut() else {
            continue;
        };

        match key {
            "Direction" => rule.direction = value.to_string(),
            "Action" => rule.action = value.to_string(),
            "Enabled" => rule.enabled = value.eq_ignore_ascii_case("yes"),
            "Protocol" => rule.protocol = value.to_string(),
            "Program" => rule.program = Some(value.to_string()).filter(|p| !p.is_empty()),
            "Profiles" => rule.profile = value.to_string(),
            "Grouping" => rule.group = value.to_string(),
            "Description" => rule.description = value.to_string(),
            "LocalPort" => {
                rule.ports.get_or_insert_with(PortDetails::default).local_ports = split_ports(value);
            }
            "RemotePort" => {
                rule.ports.get_or_insert_with(PortDetails::default).remote_ports =
                    split_ports(value);
            }
            _ => {}
        }
    }

    if let Some(rule) = current {
        rules.push(rule);
    }

    // Port details only make sense together with the protocol they apply to
    for rule in &mut rules {
        if let Some(ports) = rule.ports.as_mut() {
            ports.protocol.clone_from(&rule.protocol);
        }
    }

    rules
}

impl RuleBackend for CommandLineBackend {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn ensure_ready(&mut self) -> Result<()> {
        Ok(())
    }

    async fn rule_exists(&mut self, display_name: &str) -> Result<bool> {
        let rules = self.list_all().await?;
        Ok(rules.iter().any(|r| r.display_name == display_name))
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

        self.run(add_rule_args(program, display_name, direction))
            .await?;
        info!("Created rule via netsh: {display_name}");
        Ok(())
    }

    async fn remove_rule(&mut self, display_name: &str) -> Result<()> {
        self.run(delete_rule_args(display_name)).await?;
        info!("Removed rule via netsh: {display_name}");
        Ok(())
    }

    async fn list_all(&mut self) -> Result<Vec<RawRule>> {
        let output = run_tool(&self.command, &show_all_args(), None, self.timeout).await?;
        if is_empty_store(&output) {
            return Ok(Vec::new());
        }
        let output = check_output(output)?;
        Ok(parse_show_rule_output(&output.stdout))
    }
}
