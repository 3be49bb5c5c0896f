//! Configuration: optional TOML file at `~/.bulk/config.toml` + CLI overrides.
//!
//! ```toml
//! [pipeline]
//! log_dir = "LOG"
//! file_workers = 2
//! drain_timeout_ms = 5000
//! idle_poll_ms = 50
//! help_threshold = 16
//!
//! [session]
//! reassemble_lines = false
//! ```

use anyhow::{Context, Result};
use bulk_core::BulkConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Values given on the command line; `None` / `false` leave the file value.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub log_dir: Option<String>,
    pub file_workers: Option<usize>,
    pub drain_timeout_ms: Option<u64>,
    pub reassemble_lines: bool,
}

/// Load config from `path` (missing file means defaults), then apply
/// CLI overrides.
pub fn load(path: &str, overrides: &Overrides) -> Result<BulkConfig> {
    let expanded = expand_tilde(path);
    let mut config = if expanded.exists() {
        info!(path = %expanded.display(), "loading config file");
        let content = std::fs::read_to_string(&expanded)
            .with_context(|| format!("failed to read config {}", expanded.display()))?;
        parse(&content).with_context(|| format!("failed to parse config {}", expanded.display()))?
    } else {
        debug!(path = %expanded.display(), "config file not found, using defaults");
        BulkConfig::default()
    };

    apply(&mut config, overrides);
    let log_dir = config.pipeline.log_dir.to_string_lossy().into_owned();
    config.pipeline.log_dir = expand_tilde(&log_dir);
    Ok(config)
}

/// Parse the TOML text of a config file.
pub fn parse(content: &str) -> Result<BulkConfig> {
    Ok(toml::from_str::<BulkConfig>(content)?)
}

fn apply(config: &mut BulkConfig, overrides: &Overrides) {
    if let Some(dir) = &overrides.log_dir {
        config.pipeline.log_dir = PathBuf::from(dir);
    }
    if let Some(n) = overrides.file_workers {
        config.pipeline.file_workers = n;
    }
    if let Some(ms) = overrides.drain_timeout_ms {
        config.pipeline.drain_timeout = Duration::from_millis(ms);
    }
    if overrides.reassemble_lines {
        config.session.reassemble_lines = true;
    }
}

/// Expand a leading `~/` to the user's home directory.
fn expand_tilde(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    Path::new(s).to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_file() {
        let config = parse(
            r#"
            [pipeline]
            log_dir = "out"
            file_workers = 3
            drain_timeout_ms = 250
            idle_poll_ms = 5
            help_threshold = 4

            [session]
            reassemble_lines = true
            "#,
        )
        .unwrap();
        assert_eq!(config.pipeline.log_dir, PathBuf::from("out"));
        assert_eq!(config.pipeline.file_workers, 3);
        assert_eq!(config.pipeline.drain_timeout, Duration::from_millis(250));
        assert_eq!(config.pipeline.idle_poll, Duration::from_millis(5));
        assert_eq!(config.pipeline.help_threshold, 4);
        assert!(config.session.reassemble_lines);
    }

    #[test]
    fn parse_partial_file_keeps_defaults() {
        let config = parse("[pipeline]\nfile_workers = 1\n").unwrap();
        assert_eq!(config.pipeline.file_workers, 1);
        assert_eq!(config.pipeline.log_dir, PathBuf::from("LOG"));
        assert_eq!(config.pipeline.drain_timeout, Duration::from_secs(5));
        assert!(!config.session.reassemble_lines);
    }

    #[test]
    fn parse_rejects_bad_types() {
        assert!(parse("[pipeline]\nfile_workers = \"two\"\n").is_err());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("absent.toml");
        let config = load(path.to_str().unwrap(), &Overrides::default()).unwrap();
        assert_eq!(config.pipeline.file_workers, 2);
    }

    #[test]
    fn overrides_win_over_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[pipeline]\nfile_workers = 4\ndrain_timeout_ms = 100\n").unwrap();

        let overrides = Overrides {
            log_dir: Some("elsewhere".into()),
            file_workers: Some(1),
            drain_timeout_ms: None,
            reassemble_lines: true,
        };
        let config = load(path.to_str().unwrap(), &overrides).unwrap();
        assert_eq!(config.pipeline.log_dir, PathBuf::from("elsewhere"));
        assert_eq!(config.pipeline.file_workers, 1);
        assert_eq!(config.pipeline.drain_timeout, Duration::from_millis(100));
        assert!(config.session.reassemble_lines);
    }

    #[test]
    fn tilde_expansion() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/logs"), home.join("logs"));
        }
        assert_eq!(expand_tilde("LOG"), PathBuf::from("LOG"));
    }
}
