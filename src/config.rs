//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Packages that get the deferred default-app permissions at the end of setup.
pub const DEFAULT_PERMISSION_PACKAGES: &[&str] =
    &["com.aurora.services", "com.aurora.store", "org.fdroid.basic"];

/// Wizard configuration.
#[derive(Debug, Clone)]
pub struct WizardConfig {
    /// Path to the declarative step script (JSON).
    pub script_path: PathBuf,
    /// Directory holding the durable settings files.
    pub state_dir: PathBuf,
    /// Fixed delay between checks for the post-finalization host relaunch.
    pub relaunch_check_delay: Duration,
    /// Number of relaunch checks before giving up on observing a relaunch.
    pub max_relaunch_checks: u32,
    /// Packages granted default-app permissions during the exit sequence.
    pub permission_packages: Vec<String>,
}

impl Default for WizardConfig {
    fn default() -> Self {
        Self {
            script_path: PathBuf::from("./scripts/default.json"),
            state_dir: PathBuf::from("./data"),
            relaunch_check_delay: Duration::from_millis(1000),
            max_relaunch_checks: 10,
            permission_packages: DEFAULT_PERMISSION_PACKAGES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl WizardConfig {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let script_path = std::env::var("SETUP_WIZARD_SCRIPT")
            .map(PathBuf::from)
            .unwrap_or(defaults.script_path);

        let state_dir = std::env::var("SETUP_WIZARD_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.state_dir);

        let relaunch_check_delay = match std::env::var("SETUP_WIZARD_RELAUNCH_DELAY_MS") {
            Ok(raw) => Duration::from_millis(parse_number("SETUP_WIZARD_RELAUNCH_DELAY_MS", &raw)?),
            Err(_) => defaults.relaunch_check_delay,
        };

        let max_relaunch_checks = match std::env::var("SETUP_WIZARD_MAX_RELAUNCH_CHECKS") {
            Ok(raw) => parse_number("SETUP_WIZARD_MAX_RELAUNCH_CHECKS", &raw)?,
            Err(_) => defaults.max_relaunch_checks,
        };

        let permission_packages = match std::env::var("SETUP_WIZARD_PERMISSION_PACKAGES") {
            Ok(raw) => split_list(&raw),
            Err(_) => defaults.permission_packages,
        };

        Ok(Self {
            script_path,
            state_dir,
            relaunch_check_delay,
            max_relaunch_checks,
            permission_packages,
        })
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
