use anyhow::{Context, Result};
use review_engine::AssignmentPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReviewsConfig {
    pub database_path: Option<PathBuf>,
    pub catalog_path: Option<PathBuf>,
    pub log_level: Option<String>,
    pub busy_timeout_ms: Option<u64>,
    pub assignment: AssignmentConfig,
    pub roles: RolesConfig,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct AssignmentConfig {
    pub reviewers_per_proposal: Option<usize>,
}

/// Role membership backing the capability checks.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct RolesConfig {
    pub reviewers: Vec<String>,
    pub reviewer_admins: Vec<String>,
    pub staff: Vec<String>,
    pub superusers: Vec<String>,
    /// Section slug to the users allowed to review it.
    pub sections: BTreeMap<String, Vec<String>>,
}

impl ReviewsConfig {
    pub fn policy(&self) -> AssignmentPolicy {
        let mut policy = AssignmentPolicy::default();
        if let Some(reviewers_per_proposal) = self.assignment.reviewers_per_proposal {
            policy.reviewers_per_proposal = reviewers_per_proposal;
        }
        policy
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms.unwrap_or(DEFAULT_BUSY_TIMEOUT_MS))
    }

    pub fn database_path(&self, env: impl Fn(&str) -> Option<String>) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| state_dir(&env).join("reviews/reviews.db"))
    }

    pub fn catalog_path(&self, env: impl Fn(&str) -> Option<String>) -> PathBuf {
        self.catalog_path
            .clone()
            .unwrap_or_else(|| config_dir(&env).join("reviews/proposals.json"))
    }

    /// `REVIEWS_LOG_LEVEL`, then the file's `log_level`, then `info`.
    pub fn log_level(&self, env: impl Fn(&str) -> Option<String>) -> String {
        env("REVIEWS_LOG_LEVEL")
            .filter(|level| !level.trim().is_empty())
            .or_else(|| self.log_level.clone())
            .unwrap_or_else(|| "info".to_string())
    }
}

/// A missing file yields the defaults; an unreadable or malformed one is an error.
pub fn load_config(path: &Path) -> Result<ReviewsConfig> {
    if !path.exists() {
        return Ok(ReviewsConfig::default());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    Ok(config)
}

pub fn config_path(explicit: Option<&Path>, env: impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Some(path) = env("REVIEWS_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    config_dir(&env).join("reviews/config.toml")
}

pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn config_dir(env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(path) = env("XDG_CONFIG_HOME") {
        return PathBuf::from(path);
    }
    home_dir(env).join(".config")
}

fn state_dir(env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(path) = env("XDG_STATE_HOME") {
        return PathBuf::from(path);
    }
    home_dir(env).join(".local/state")
}

fn home_dir(env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    env("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env_of(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key| {
            pairs
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| value.to_string())
        }
    }

    #[test]
    fn parses_full_config() {
        let mut file = NamedTempFile::new().expect("temp config");
        write!(
            file,
            r#"
database_path = "/var/lib/reviews/reviews.db"
log_level = "debug"
busy_timeout_ms = 250

[assignment]
reviewers_per_proposal = 2

[roles]
reviewers = ["ana", "bo"]
reviewer_admins = ["root"]

[roles.sections]
talks = ["ana", "bo"]
"#
        )
        .expect("write config");

        let config = load_config(file.path()).expect("load config");
        assert_eq!(
            config.database_path(env_of(&[])),
            PathBuf::from("/var/lib/reviews/reviews.db")
        );
        assert_eq!(config.busy_timeout(), Duration::from_millis(250));
        assert_eq!(config.policy().reviewers_per_proposal, 2);
        assert_eq!(config.roles.reviewers, vec!["ana", "bo"]);
        assert_eq!(config.roles.sections["talks"], vec!["ana", "bo"]);
        assert!(config.roles.staff.is_empty());
        assert_eq!(config.log_level(env_of(&[])), "debug");
        assert_eq!(
            config.log_level(env_of(&[("REVIEWS_LOG_LEVEL", "warn")])),
            "warn"
        );
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = load_config(&dir.path().join("absent.toml")).expect("defaults");
        assert_eq!(config, ReviewsConfig::default());
        assert_eq!(config.policy(), AssignmentPolicy::default());
        assert_eq!(
            config.busy_timeout(),
            Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS)
        );
        assert_eq!(config.log_level(env_of(&[])), "info");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = NamedTempFile::new().expect("temp config");
        write!(file, "busy_timeout_ms = \"soon\"").expect("write config");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn config_path_prefers_flag_then_env_then_xdg() {
        let explicit = PathBuf::from("/tmp/explicit.toml");
        assert_eq!(
            config_path(
                Some(&explicit),
                env_of(&[("REVIEWS_CONFIG_PATH", "/tmp/env.toml")])
            ),
            explicit
        );
        assert_eq!(
            config_path(None, env_of(&[("REVIEWS_CONFIG_PATH", "/tmp/env.toml")])),
            PathBuf::from("/tmp/env.toml")
        );
        assert_eq!(
            config_path(None, env_of(&[("XDG_CONFIG_HOME", "/cfg")])),
            PathBuf::from("/cfg/reviews/config.toml")
        );
        assert_eq!(
            config_path(None, env_of(&[("HOME", "/home/ana")])),
            PathBuf::from("/home/ana/.config/reviews/config.toml")
        );

        let config = ReviewsConfig::default();
        assert_eq!(
            config.database_path(env_of(&[("XDG_STATE_HOME", "/state")])),
            PathBuf::from("/state/reviews/reviews.db")
        );
        assert_eq!(
            config.catalog_path(env_of(&[("HOME", "/home/ana")])),
            PathBuf::from("/home/ana/.config/reviews/proposals.json")
        );
    }
}
