use anyhow::{Context, Result};
use std::time::Duration;

/// Feature flag gating the whole pipeline.
pub const CHANGELIST_MAPPING_FLAG: &str = "perforceChangelistMapping";

/// Value the feature flag must hold for jobs to be admitted.
pub const FLAG_ENABLED: &str = "enabled";

/// Pipeline configuration.
///
/// Every field has a default; `from_env` overrides them from
/// `CHANGELIST_SYNC_*` variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// sqlx connection URL of the mapping store
    pub database_url: String,
    /// git executable used to enumerate commits
    pub git_binary: String,
    /// Label attached to the queue metrics
    pub queue_name: String,
    /// Tasks running longer than this are logged as slow
    pub slow_task_threshold: Duration,
    /// Settings key of the admission flag
    pub feature_flag: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://changelist-sync.db".to_string(),
            git_binary: "git".to_string(),
            queue_name: "perforce-changelist-mapper".to_string(),
            slow_task_threshold: Duration::from_secs(60),
            feature_flag: CHANGELIST_MAPPING_FLAG.to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(url) = lookup("CHANGELIST_SYNC_DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(git) = lookup("CHANGELIST_SYNC_GIT") {
            config.git_binary = git;
        }
        if let Some(name) = lookup("CHANGELIST_SYNC_QUEUE_NAME") {
            config.queue_name = name;
        }
        if let Some(secs) = lookup("CHANGELIST_SYNC_SLOW_TASK_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .with_context(|| format!("CHANGELIST_SYNC_SLOW_TASK_SECS is not a number: {:?}", secs))?;
            config.slow_task_threshold = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let config = PipelineConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.slow_task_threshold, Duration::from_secs(60));
        assert_eq!(config.feature_flag, "perforceChangelistMapping");
    }

    #[test]
    fn test_env_overrides() {
        let config = PipelineConfig::from_lookup(lookup_from(&[
            ("CHANGELIST_SYNC_DATABASE_URL", "sqlite::memory:"),
            ("CHANGELIST_SYNC_GIT", "/usr/local/bin/git"),
            ("CHANGELIST_SYNC_QUEUE_NAME", "p4"),
            ("CHANGELIST_SYNC_SLOW_TASK_SECS", " 5 "),
        ]))
        .unwrap();

        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.git_binary, "/usr/local/bin/git");
        assert_eq!(config.queue_name, "p4");
        assert_eq!(config.slow_task_threshold, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_threshold_is_an_error() {
        let err = PipelineConfig::from_lookup(lookup_from(&[(
            "CHANGELIST_SYNC_SLOW_TASK_SECS",
            "a minute",
        )]))
        .unwrap_err();
        assert!(err.to_string().contains("CHANGELIST_SYNC_SLOW_TASK_SECS"));
    }
}
