//! Controlled execution of firewall administration tools
//!
//! fwblock only ever runs two external programs:
//!
//! - **PowerShell**: the NetSecurity cmdlets used by the management backend
//! - **netsh**: the `advfirewall firewall` context used by the command-line fallback
//!
//! # Environment Variables
//!
//! - `FWBLOCK_POWERSHELL_COMMAND`: path of the PowerShell executable to run.
//! - `FWBLOCK_NETSH_COMMAND`: path of the netsh executable to run.
//!
//! Both are mainly useful for pointing at mock tools in tests.
//!
//! # Security
//!
//! - Only the approved [`Tool`]s can be turned into commands
//! - Rule names are quoted with [`quote_netsh`] / [`quote_powershell`], doubling
//!   embedded quotes so a name can never inject extra arguments
//! - Commands are never passed through `cmd.exe`
//!
//! Every invocation has a bounded wait: a hung tool is killed once
//! the timeout elapses and reported as [`Error::Timeout`].

use crate::core::error::{Error, Result};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// External tools fwblock is allowed to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    PowerShell,
    Netsh,
}

impl Tool {
    /// Environment variable overriding the executable
    pub const fn env_override(self) -> &'static str {
        match self {
            Tool::PowerShell => "FWBLOCK_POWERSHELL_COMMAND",
            Tool::Netsh => "FWBLOCK_NETSH_COMMAND",
        }
    }

    pub const fn default_program(self) -> &'static str {
        match self {
            Tool::PowerShell if cfg!(windows) => "powershell.exe",
            Tool::PowerShell => "powershell",
            Tool::Netsh if cfg!(windows) => "netsh.exe",
            Tool::Netsh => "netsh",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Tool::PowerShell => "PowerShell",
            Tool::Netsh => "netsh",
        }
    }
}

/// Program plus fixed leading arguments for one tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub tool: Tool,
    pub program: PathBuf,
    pub leading_args: Vec<OsString>,
}

impl ToolCommand {
    /// Resolves the executable from the environment override or the default name
    pub fn resolve(tool: Tool) -> Self {
        let program = std::env::var_os(tool.env_override())
            .filter(|v| !v.is_empty())
            .map_or_else(|| PathBuf::from(tool.default_program()), PathBuf::from);

        Self {
            tool,
            program,
            leading_args: Vec::new(),
        }
    }

    /// Runs `tool` through an explicit interpreter, e.g. `sh mock_netsh.sh`
    pub fn with_program(tool: Tool, program: impl Into<PathBuf>) -> Self {
        Self {
            tool,
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    pub fn leading_arg(mut self, arg: impl Into<OsString>) -> Self {
        self.leading_args.push(arg.into());
        self
    }

    /// Builds a tokio command with `args` appended verbatim
    ///
    /// On Windows the arguments are appended raw so that already-quoted forms
    /// such as `name="My Rule"` reach the tool exactly as written.
    pub fn build(&self, args: &[String], with_stdin: bool) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args);

        for arg in args {
            #[cfg(windows)]
            {
                cmd.raw_arg(arg);
            }
            #[cfg(not(windows))]
            {
                cmd.arg(arg);
            }
        }

        cmd.stdin(if with_stdin {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
        cmd
    }
}

/// Captured result of one tool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Non-empty trimmed stderr lines
    pub fn stderr_lines(&self) -> Vec<String> {
        self.stderr
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect()
    }
}

/// Runs a tool with `args`, waiting at most `timeout`
///
/// When `stdin` is given it is written to the child while waiting (PowerShell
/// scripts are passed this way so they never go through command-line parsing).
/// A non-zero exit code is not an error here; callers decide how to
/// interpret it.
///
/// # Errors
///
/// Returns `Err` if the tool cannot be spawned, cannot be waited on, or
/// exceeds the timeout (the child is killed in that case).
pub async fn run_tool(
    command: &ToolCommand,
    args: &[String],
    stdin: Option<&str>,
    timeout: Duration,
) -> Result<ToolOutput> {
    let tool = command.tool.label();
    debug!(tool, program = %command.program.display(), ?args, "Running tool");

    let mut child = command
        .build(args, stdin.is_some())
        .spawn()
        .map_err(|e| Error::Spawn {
            tool,
            message: e.to_string(),
        })?;

    // The pipe drops when `feed` finishes, closing stdin so the tool sees the
    // end of the script.
    let pipe = child.stdin.take();
    let feed = async move {
        let (Some(input), Some(mut pipe)) = (stdin, pipe) else {
            return Ok(());
        };
        use tokio::io::AsyncWriteExt;
        match pipe.write_all(input.as_bytes()).await {
            // The tool exited without reading everything; its output says why.
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
            other => other,
        }
    };
    let run = async move {
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        fed?;
        output
    };

    // Feeding stdin counts against the timeout: a tool that never reads it
    // must not hang the caller.
    let output = match tokio::time::timeout(timeout, run).await {
        Ok(result) => result?,
        Err(_) => {
            // Dropping the future drops the child, which kills it (kill_on_drop).
            return Err(Error::Timeout {
                tool,
                seconds: timeout.as_secs(),
            });
        }
    };

    Ok(ToolOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code(),
    })
}

/// Quotes a value for a netsh `key="value"` argument, doubling embedded quotes
pub fn quote_netsh(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

/// Quotes a value as a PowerShell single-quoted string literal
pub fn quote_powershell(value: &str) -> String {
    // PowerShell also treats typographic quotes as string delimiters.
    let escaped: String = value
        .chars()
        .flat_map(|c| match c {
            '\'' | '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' => vec![c, c],
            _ => vec![c],
        })
        .collect();
    format!("'{escaped}'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_helpers::ENV_VAR_MUTEX;

    #[test]
    fn test_quote_netsh() {
        assert_eq!(quote_netsh("FwBlock - A - a.exe (Inbound)"), "\"FwBlock - A - a.exe (Inbound)\"");
        assert_eq!(quote_netsh("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_quote_powershell() {
        assert_eq!(quote_powershell("plain"), "'plain'");
        assert_eq!(quote_powershell("it's"), "'it''s'");
        assert_eq!(quote_powershell("a'; Remove-Item x; '"), "'a''; Remove-Item x; '''");
    }

    #[test]
    fn test_resolve_env_override() {
        let _guard = ENV_VAR_MUTEX.lock().unwrap();

        unsafe {
            std::env::set_var("FWBLOCK_NETSH_COMMAND", "/opt/mock/netsh");
        }
        let cmd = ToolCommand::resolve(Tool::Netsh);
        unsafe {
            std::env::remove_var("FWBLOCK_NETSH_COMMAND");
        }

        assert_eq!(cmd.program, PathBuf::from("/opt/mock/netsh"));
        assert_eq!(ToolCommand::resolve(Tool::Netsh).program, PathBuf::from(Tool::Netsh.default_program()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_tool_captures_exit_code_and_stderr() {
        let cmd = ToolCommand::with_program(Tool::Netsh, "sh");
        let output = run_tool(
            &cmd,
            &["-c".to_string(), "echo out; echo err 1>&2; exit 3".to_string()],
            None,
            Duration::from_secs(10),
        )
        .await
        .unwrap();

        assert!(!output.success());
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr_lines(), vec!["err".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_tool_times_out() {
        let cmd = ToolCommand::with_program(Tool::Netsh, "sh");
        let result = run_tool(
            &cmd,
            &["-c".to_string(), "sleep 5".to_string()],
            None,
            Duration::from_millis(100),
        )
        .await;

        assert!(matches!(result, Err(Error::Timeout { tool: "netsh", .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_tool_feeds_stdin() {
        let cmd = ToolCommand::with_program(Tool::PowerShell, "sh");
        let output = run_tool(&cmd, &[], Some("echo from-stdin\n"), Duration::from_secs(10))
            .await
            .unwrap();

        assert!(output.success());
        assert_eq!(output.stdout.trim(), "from-stdin");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_tool_times_out_when_stdin_is_never_read() {
        let cmd = ToolCommand::with_program(Tool::PowerShell, "sh");
        // Larger than any pipe buffer, so the write blocks until the child reads.
        let script = "#".repeat(4 * 1024 * 1024);
        let started = std::time::Instant::now();

        let result = run_tool(
            &cmd,
            &["-c".to_string(), "sleep 30".to_string()],
            Some(&script),
            Duration::from_millis(200),
        )
        .await;

        assert!(matches!(result, Err(Error::Timeout { tool: "PowerShell", .. })));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_tool_tolerates_unread_stdin_on_exit() {
        let cmd = ToolCommand::with_program(Tool::PowerShell, "sh");
        let script = "#".repeat(4 * 1024 * 1024);

        let output = run_tool(
            &cmd,
            &["-c".to_string(), "echo bail 1>&2; exit 2".to_string()],
            Some(&script),
            Duration::from_secs(10),
        )
        .await
        .unwrap();

        assert_eq!(output.exit_code, Some(2));
        assert_eq!(output.stderr_lines(), vec!["bail".to_string()]);
    }

    #[tokio::test]
    async fn test_run_tool_missing_binary() {
        let cmd = ToolCommand::with_program(Tool::PowerShell, "fwblock_nonexistent_binary_xyz");
        let result = run_tool(&cmd, &[], None, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(Error::Spawn { .. })));
    }
}
