//! Per-user directories for configuration, audit and log files
//!
//! Locations come from the platform conventions (`directories` crate):
//!
//! - Data: `%APPDATA%\fwblock\fwblock\data` on Windows, `~/.local/share/fwblock/` elsewhere
//! - State: `~/.local/state/fwblock/` where the platform has one (audit log, log file)
//!
//! # Example
//!
//! ```no_run
//! use fwblock::utils::{ensure_dirs, get_data_dir};
//!
//! ensure_dirs().expect("Failed to create directories");
//! if let Some(data_path) = get_data_dir() {
//!     println!("config lives in {}", data_path.display());
//! }
//! ```

use directories::ProjectDirs;
use std::path::PathBuf;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "fwblock", "fwblock")
}

pub fn get_data_dir() -> Option<PathBuf> {
    project_dirs().map(|pd| pd.data_dir().to_path_buf())
}

/// State directory, falling back to the local data directory on platforms
/// without one (Windows, macOS)
pub fn get_state_dir() -> Option<PathBuf> {
    project_dirs().map(|pd| {
        pd.state_dir()
            .unwrap_or_else(|| pd.data_local_dir())
            .to_path_buf()
    })
}

pub fn ensure_dirs() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::fs::DirBuilder;
        use std::os::unix::fs::DirBuilderExt;

        let mut builder = DirBuilder::new();
        builder.mode(0o700);
        builder.recursive(true);

        if let Some(dir) = get_data_dir() {
            builder.create(dir)?;
        }
        if let Some(dir) = get_state_dir() {
            builder.create(dir)?;
        }
    }

    #[cfg(not(unix))]
    {
        if let Some(dir) = get_data_dir() {
            std::fs::create_dir_all(dir)?;
        }
        if let Some(dir) = get_state_dir() {
            std::fs::create_dir_all(dir)?;
        }
    }

    Ok(())
}

/// Shortens `s` to at most `max_len` bytes, ending in "..." when cut
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        let end = s
            .char_indices()
            .map(|(idx, _)| idx)
            .take_while(|&idx| idx <= max_len.saturating_sub(3))
            .last()
            .unwrap_or(0);
        format!("{}...", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("short", 10), "short");
        assert_eq!(truncate_string("FwBlock - Foo - Foo.exe", 10), "FwBlock...");
        // Multi-byte characters are never split
        assert_eq!(truncate_string("ééééé", 6), "é...");
    }

    #[test]
    fn test_state_dir_under_project() {
        if let (Some(state), Some(data)) = (get_state_dir(), get_data_dir()) {
            assert!(state.to_string_lossy().contains("fwblock"));
            assert!(data.to_string_lossy().contains("fwblock"));
        }
    }
}
