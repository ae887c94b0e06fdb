use crate::core::discovery::{FileBlockRequest, TargetExtension};
use crate::core::error::{Error, Result};
use crate::core::naming::{DEFAULT_RULE_PREFIX, RuleNamingCodec};
use crate::utils::get_data_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "config.json";
const MIN_TIMEOUT_SECS: u64 = 1;
const MAX_TIMEOUT_SECS: u64 = 600;

/// Persistent settings for the CLI and the default block request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Ownership prefix written into every created rule name
    #[serde(default = "default_rule_prefix")]
    pub rule_prefix: String,
    /// Upper bound on a single PowerShell or netsh invocation
    ///
    /// Clamped to 1..=600 seconds when read through [`AppConfig::command_timeout`].
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_extensions")]
    pub default_extensions: Vec<TargetExtension>,
    #[serde(default)]
    pub default_exclusion_keywords: Vec<String>,
    #[serde(default)]
    pub default_exclusion_files: Vec<String>,
    /// Look up program and ports for every listed rule (one extra call per rule)
    #[serde(default)]
    pub enrich_listing: bool,
    #[serde(default = "default_true")]
    pub enable_audit_log: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            rule_prefix: default_rule_prefix(),
            command_timeout_secs: default_command_timeout(),
            default_extensions: default_extensions(),
            default_exclusion_keywords: Vec::new(),
            default_exclusion_files: Vec::new(),
            enrich_listing: false,
            enable_audit_log: true,
        }
    }
}

fn default_rule_prefix() -> String {
    DEFAULT_RULE_PREFIX.to_string()
}

fn default_command_timeout() -> u64 {
    30
}

fn default_extensions() -> Vec<TargetExtension> {
    vec![TargetExtension::Exe, TargetExtension::Dll]
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    /// Builds the naming codec for the configured prefix
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the prefix is empty or contains
    /// the name separator.
    pub fn codec(&self) -> Result<RuleNamingCodec> {
        RuleNamingCodec::new(self.rule_prefix.clone())
            .map_err(|e| Error::validation("rule_prefix", e.to_string()))
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(
            self.command_timeout_secs
                .clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS),
        )
    }

    /// Applies the configured defaults to a request
    ///
    /// Extensions are only filled in when the request names none; exclusions
    /// are always added.
    pub fn apply_defaults(&self, mut request: FileBlockRequest) -> FileBlockRequest {
        if request.extensions.is_empty() {
            request.extensions.extend(self.default_extensions.iter().copied());
        }
        request
            .exclusion_keywords
            .extend(self.default_exclusion_keywords.iter().cloned());
        request
            .exclusion_files
            .extend(self.default_exclusion_files.iter().cloned());
        request
    }
}

pub fn config_path() -> Option<PathBuf> {
    get_data_dir().map(|dir| dir.join(CONFIG_FILE))
}

/// Saves the config to the data directory using an atomic write
///
/// Does nothing when no home directory can be determined.
pub async fn save_config(config: &AppConfig) -> std::io::Result<()> {
    let Some(path) = config_path() else {
        return Ok(());
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    save_config_to(config, &path).await
}

/// Atomic write: temp file (0o600 on unix), sync, rename
pub async fn save_config_to(config: &AppConfig, path: &Path) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let json = serde_json::to_string_pretty(config)?;
    let temp_path = path.with_extension("json.tmp");

    #[cfg(unix)]
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(0o600)
        .open(&temp_path)
        .await?;

    #[cfg(not(unix))]
    let mut file = tokio::fs::File::create(&temp_path).await?;

    file.write_all(json.as_bytes()).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&temp_path, path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::StorageFull {
            std::io::Error::new(
                std::io::ErrorKind::StorageFull,
                "Disk full: cannot save configuration. Free up space and try again.",
            )
        } else {
            e
        }
    })
}

/// Loads the config, or defaults if it is missing or unreadable
pub async fn load_config() -> AppConfig {
    match config_path() {
        Some(path) => load_config_from(&path).await,
        None => AppConfig::default(),
    }
}

pub async fn load_config_from(path: &Path) -> AppConfig {
    let Ok(json) = tokio::fs::read_to_string(path).await else {
        return AppConfig::default();
    };
    match serde_json::from_str::<AppConfig>(&json) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("Ignoring unreadable config at {}: {e}", path.display());
            AppConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.rule_prefix, "FwBlock");
        assert_eq!(config.command_timeout(), Duration::from_secs(30));
        assert_eq!(
            config.default_extensions,
            vec![TargetExtension::Exe, TargetExtension::Dll]
        );
        assert!(!config.enrich_listing);
        assert!(config.enable_audit_log);
    }

    #[test]
    fn test_partial_json_uses_field_defaults() {
        let config: AppConfig = serde_json::from_str(r#"{"rule_prefix":"Corp"}"#).unwrap();
        assert_eq!(config.rule_prefix, "Corp");
        assert_eq!(config.command_timeout_secs, 30);
        assert!(config.enable_audit_log);
        assert_eq!(config.default_extensions.len(), 2);
    }

    #[test]
    fn test_extensions_deserialize_lowercase() {
        let config: AppConfig =
            serde_json::from_str(r#"{"default_extensions":["dll"]}"#).unwrap();
        assert_eq!(config.default_extensions, vec![TargetExtension::Dll]);
    }

    #[test]
    fn test_timeout_is_clamped() {
        let mut config = AppConfig {
            command_timeout_secs: 0,
            ..AppConfig::default()
        };
        assert_eq!(config.command_timeout(), Duration::from_secs(1));
        config.command_timeout_secs = 100_000;
        assert_eq!(config.command_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn test_codec_rejects_bad_prefix() {
        let config = AppConfig {
            rule_prefix: "Bad - Prefix".to_string(),
            ..AppConfig::default()
        };
        assert!(matches!(config.codec(), Err(Error::Validation { .. })));
        assert_eq!(AppConfig::default().codec().unwrap().prefix(), "FwBlock");
    }

    #[test]
    fn test_apply_defaults_keeps_explicit_extensions() {
        let config = AppConfig {
            default_exclusion_keywords: vec!["setup".to_string()],
            ..AppConfig::default()
        };

        let filled = config.apply_defaults(FileBlockRequest::new("C:/Apps/Foo"));
        assert_eq!(filled.extensions.len(), 2);
        assert_eq!(filled.exclusion_keywords, vec!["setup".to_string()]);

        let explicit = config.apply_defaults(
            FileBlockRequest::new("C:/Apps/Foo").with_extension(TargetExtension::Dll),
        );
        assert_eq!(explicit.extensions.len(), 1);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_save_config_creates_data_dir() {
        let _guard = crate::core::test_helpers::ENV_VAR_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let previous = std::env::var_os("XDG_DATA_HOME");
        unsafe {
            std::env::set_var("XDG_DATA_HOME", dir.path());
        }

        let config = AppConfig {
            rule_prefix: "Corp".to_string(),
            ..AppConfig::default()
        };
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(save_config(&config)).unwrap();
        let path = config_path().unwrap();
        let loaded = runtime.block_on(load_config());

        unsafe {
            match previous {
                Some(value) => std::env::set_var("XDG_DATA_HOME", value),
                None => std::env::remove_var("XDG_DATA_HOME"),
            }
        }

        assert!(path.starts_with(dir.path()));
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let config = AppConfig {
            rule_prefix: "Corp".to_string(),
            enrich_listing: true,
            ..AppConfig::default()
        };

        save_config_to(&config, &path).await.unwrap();
        assert!(!path.with_extension("json.tmp").exists());
        assert_eq!(load_config_from(&path).await, config);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn test_load_corrupt_or_missing_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        assert_eq!(load_config_from(&path).await, AppConfig::default());

        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(load_config_from(&path).await, AppConfig::default());
    }
}
