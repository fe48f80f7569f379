use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "PROGRESSD_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "progressd.toml";

/// Runtime settings. Loaded from an optional TOML file, then overridden by
/// `PROGRESSD_*` environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Workspace opened at startup; clients may still switch with `workspace.select`.
    pub workspace: Option<PathBuf>,
    pub log_level: String,
    pub default_page_limit: i64,
    pub max_page_limit: i64,
    pub top_performers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            log_level: "info".to_string(),
            default_page_limit: 50,
            max_page_limit: 1000,
            top_performers: 5,
        }
    }
}

impl Config {
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let cfg: Config = toml::from_str(text).context("invalid config file")?;
        Ok(cfg.normalized())
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.to_string_lossy()))?;
        Self::from_toml_str(&text)
            .with_context(|| format!("failed to parse config {}", path.to_string_lossy()))
    }

    /// File named by `PROGRESSD_CONFIG`, else `progressd.toml` if present,
    /// else defaults; environment overrides applied last.
    pub fn load() -> anyhow::Result<Self> {
        let base = match std::env::var_os(CONFIG_ENV) {
            Some(p) => Self::from_file(Path::new(&p))?,
            None => {
                let local = Path::new(DEFAULT_CONFIG_FILE);
                if local.is_file() {
                    Self::from_file(local)?
                } else {
                    Self::default()
                }
            }
        };
        Ok(base.with_overrides(|k| std::env::var(k).ok()))
    }

    pub fn with_overrides<F>(self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = self;
        if let Some(ws) = lookup("PROGRESSD_WORKSPACE").filter(|s| !s.trim().is_empty()) {
            cfg.workspace = Some(PathBuf::from(ws));
        }
        if let Some(level) = lookup("PROGRESSD_LOG_LEVEL").filter(|s| !s.trim().is_empty()) {
            cfg.log_level = level.trim().to_string();
        }
        if let Some(limit) = lookup("PROGRESSD_PAGE_LIMIT").and_then(|s| s.trim().parse().ok()) {
            cfg.default_page_limit = limit;
        }
        cfg.normalized()
    }

    fn normalized(mut self) -> Self {
        if self.max_page_limit < 1 {
            self.max_page_limit = 1;
        }
        self.default_page_limit = self.default_page_limit.clamp(1, self.max_page_limit);
        if self.top_performers == 0 {
            self.top_performers = 1;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = Config::from_toml_str("").expect("parse");
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn file_values_are_read_and_normalized() {
        let cfg = Config::from_toml_str(
            r#"
workspace = "/tmp/records"
log_level = "debug"
default_page_limit = 5000
max_page_limit = 200
"#,
        )
        .expect("parse");
        assert_eq!(cfg.workspace, Some(PathBuf::from("/tmp/records")));
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.default_page_limit, 200);
        assert_eq!(cfg.top_performers, 5);
    }

    #[test]
    fn env_overrides_win() {
        let env: HashMap<&str, &str> = [
            ("PROGRESSD_WORKSPACE", "/data/ws"),
            ("PROGRESSD_LOG_LEVEL", "warn"),
            ("PROGRESSD_PAGE_LIMIT", "25"),
        ]
        .into_iter()
        .collect();
        let cfg = Config::default().with_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.workspace, Some(PathBuf::from("/data/ws")));
        assert_eq!(cfg.log_level, "warn");
        assert_eq!(cfg.default_page_limit, 25);
    }

    #[test]
    fn unknown_types_are_rejected() {
        assert!(Config::from_toml_str("default_page_limit = \"many\"").is_err());
    }
}
