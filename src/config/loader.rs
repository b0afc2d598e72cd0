// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::config::consts::DEFAULT_LOG_FILTER;
use crate::errors::ConfigError;
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Runtime configuration, usually loaded from a YAML file.
///
/// Every field is optional.
///
/// # Fields
/// * `allocator` - Allocator for tensor default buffers (defaults to `heap`)
/// * `parallel_limit` - Overrides the `parallel_limit` of every bundle when set
/// * `log_filter` - `tracing` filter used when `RUST_LOG` is not set
///
/// # Example
/// ```yaml
/// allocator: device
/// parallel_limit: 2
/// log_filter: "npu_runtime=debug"
/// ```
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub allocator: AllocatorKind,
    pub parallel_limit: Option<usize>,
    pub log_filter: Option<String>,
}

impl RuntimeConfig {
    /// Log filter to use when `RUST_LOG` is not set.
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
    }
}

/// Where tensor default buffers get their memory.
///
/// # Variants
/// * `Heap` - Page-aligned process memory; works without NPU hardware
/// * `Device` - Driver io buffers that NPU predictors can attach without copies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocatorKind {
    #[default]
    Heap,
    Device,
}

impl AllocatorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AllocatorKind::Heap => "heap",
            AllocatorKind::Device => "device",
        }
    }
}

/// Load a config from a YAML file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<RuntimeConfig, ConfigError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let cfg: RuntimeConfig = serde_yaml::from_str(&content)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn parse_full_config() {
        let yaml = r#"
allocator: device
parallel_limit: 3
log_filter: "debug"
"#;
        let cfg: RuntimeConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.allocator, AllocatorKind::Device);
        assert_eq!(cfg.parallel_limit, Some(3));
        assert_eq!(cfg.log_filter(), "debug");
    }

    #[test]
    fn parse_empty_config_uses_defaults() {
        let cfg: RuntimeConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg, RuntimeConfig::default());
        assert_eq!(cfg.allocator, AllocatorKind::Heap);
        assert_eq!(cfg.log_filter(), DEFAULT_LOG_FILTER);
    }

    #[test]
    fn reject_unknown_allocator() {
        assert!(serde_yaml::from_str::<RuntimeConfig>("allocator: gpu").is_err());
    }

    #[test]
    fn load_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "parallel_limit: 1").unwrap();

        let cfg = load_config(file.path()).unwrap();
        assert_eq!(cfg.parallel_limit, Some(1));
    }

    #[test]
    fn load_config_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.yaml");
        assert!(matches!(
            load_config(&missing),
            Err(ConfigError::Io { path, .. }) if path == missing
        ));
    }
}
