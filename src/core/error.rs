use thiserror::Error;

/// Core error types for fwblock
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backend environment could not be prepared; nothing was attempted
    #[error("Backend not ready: {0}")]
    Precondition(String),

    /// A single backend call reported failure
    #[error("{backend} error: {message}")]
    BackendCall {
        backend: &'static str,
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
        sub_errors: Vec<String>,
    },

    /// External tool did not finish within the configured wait
    #[error("{tool} timed out after {seconds}s")]
    Timeout { tool: &'static str, seconds: u64 },

    /// External tool could not be started
    #[error("Failed to start {tool}: {message}")]
    Spawn { tool: &'static str, message: String },

    /// Operation is not available on this backend
    #[error("{backend} does not support {operation}")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },

    /// Input validation failed
    #[error("Validation error in {field}: {message}")]
    Validation { field: String, message: String },

    /// Neither backend could process the request
    #[error("Both backends failed: primary: {primary}; fallback: {fallback}")]
    BothBackends { primary: String, fallback: String },

    /// Internal logic error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Text most useful for matching against [`FirewallErrorPattern`]
    pub fn diagnostic_text(&self) -> String {
        match self {
            Error::BackendCall {
                message,
                stderr: Some(stderr),
                ..
            } if !stderr.trim().is_empty() && stderr.trim() != message.trim() => {
                format!("{message}\n{stderr}")
            }
            other => other.to_string(),
        }
    }
}

/// Represents a translated error with helpful context
#[derive(Debug, Clone)]
pub struct ErrorTranslation {
    pub user_message: String,
    pub suggestions: Vec<String>,
    pub help_url: Option<String>,
}

impl ErrorTranslation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            user_message: message.into(),
            suggestions: Vec::new(),
            help_url: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_help(mut self, url: impl Into<String>) -> Self {
        self.help_url = Some(url.into());
        self
    }
}

/// Database of Windows Firewall / PowerShell / netsh error patterns
pub struct FirewallErrorPattern;

impl FirewallErrorPattern {
    /// Matches an error message against known patterns and returns a user-friendly translation.
    pub fn match_error(msg: &str) -> ErrorTranslation {
        let lower = msg.to_lowercase();

        // Permission errors
        if lower.contains("access is denied")
            || lower.contains("requires elevation")
            || lower.contains("run as administrator")
            || lower.contains("permissiondenied")
        {
            return ErrorTranslation::new("Insufficient permissions to modify firewall rules")
                .with_suggestion("Run fwblock from an elevated (Administrator) terminal")
                .with_suggestion("Check that your account is a member of the Administrators group")
                .with_help("https://learn.microsoft.com/windows/security/operating-system-security/network-security/windows-firewall/");
        }

        // Execution policy
        if lower.contains("execution policy") || lower.contains("running scripts is disabled") {
            return ErrorTranslation::new("PowerShell execution policy blocked the firewall command")
                .with_suggestion("fwblock sets a process-scoped Bypass policy; a Group Policy may override it")
                .with_suggestion("Inspect the effective policy: Get-ExecutionPolicy -List")
                .with_help("https://learn.microsoft.com/powershell/module/microsoft.powershell.core/about/about_execution_policies");
        }

        // Missing module or cmdlet
        if lower.contains("is not recognized as")
            || lower.contains("no valid module file")
            || lower.contains("module 'netsecurity'")
            || lower.contains("commandnotfoundexception")
        {
            return ErrorTranslation::new("The NetSecurity PowerShell module is not available")
                .with_suggestion("The command-line fallback (netsh) is used automatically for rule changes")
                .with_suggestion("Windows 8 / Server 2012 or newer is required for the firewall cmdlets")
                .with_help("https://learn.microsoft.com/powershell/module/netsecurity/");
        }

        // Tool missing
        if lower.contains("no such file")
            || lower.contains("cannot find the file")
            || lower.contains("failed to start")
        {
            return ErrorTranslation::new("A firewall administration tool could not be started")
                .with_suggestion("Ensure powershell.exe and netsh.exe are on PATH")
                .with_suggestion("Override the executables with FWBLOCK_POWERSHELL_COMMAND / FWBLOCK_NETSH_COMMAND");
        }

        // Rule not found
        if lower.contains("no rules match") || lower.contains("no msft_netfirewallrule objects found")
        {
            return ErrorTranslation::new("No firewall rule matches that name")
                .with_suggestion("List existing rules: fwblock list --owned")
                .with_suggestion("Display names are matched exactly, including the direction suffix");
        }

        // Duplicate
        if lower.contains("already exists") {
            return ErrorTranslation::new("A firewall rule with that name already exists")
                .with_suggestion("Existing rules are kept; nothing needs to be done");
        }

        // Firewall service
        if lower.contains("service") && (lower.contains("not running") || lower.contains("stopped"))
        {
            return ErrorTranslation::new("The Windows Defender Firewall service is not running")
                .with_suggestion("Start it: Start-Service mpssvc")
                .with_suggestion("Check its state: Get-Service mpssvc");
        }

        // Timeout errors
        if lower.contains("timeout") || lower.contains("timed out") {
            return ErrorTranslation::new("Firewall command timed out")
                .with_suggestion("The external tool did not respond in time")
                .with_suggestion("Increase command_timeout_secs in the configuration")
                .with_suggestion("Try again when the system is less busy");
        }

        // Generic fallback
        ErrorTranslation::new(format!("Firewall error: {msg}"))
            .with_suggestion("Check the detailed error message for more information")
            .with_suggestion("Verify the firewall is reachable: netsh advfirewall show currentprofile")
    }
}

pub type Result<T> = std::result::Result<T, Error>;
