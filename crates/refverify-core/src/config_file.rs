//! TOML configuration file layer.
//!
//! Every field is optional; a value present in the file replaces the
//! built-in default and is in turn overridden by environment variables and
//! command-line flags (the CLI applies those on top).
//!
//! Lookup order when no explicit path is given:
//! 1. `./.refverify.toml`
//! 2. `<platform config dir>/refverify/config.toml`

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Config, CoreError};

const LOCAL_FILE: &str = ".refverify.toml";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub s2_api_key: Option<String>,
    pub openalex_key: Option<String>,
    pub crossref_mailto: Option<String>,
    pub local_index_path: Option<PathBuf>,
    pub disabled_sources: Option<Vec<String>>,
    pub num_workers: Option<usize>,
    pub ref_timeout_secs: Option<u64>,
    pub db_timeout_secs: Option<u64>,
    pub arxiv_delay_secs: Option<f64>,
    pub max_rate_limit_retries: Option<u32>,
    pub title_threshold: Option<f64>,
    pub min_candidate_similarity: Option<f64>,
    pub retry_failed_sources: Option<bool>,
}

impl ConfigFile {
    /// Reject values no run could work with.
    pub fn validate(&self) -> Result<(), CoreError> {
        if let Some(n) = self.num_workers {
            if !(1..=64).contains(&n) {
                return Err(invalid("num_workers", n, "1..=64"));
            }
        }
        for (field, value) in [
            ("ref_timeout_secs", self.ref_timeout_secs),
            ("db_timeout_secs", self.db_timeout_secs),
        ] {
            if let Some(v) = value {
                if !(1..=3600).contains(&v) {
                    return Err(invalid(field, v, "1..=3600"));
                }
            }
        }
        for (field, value) in [
            ("title_threshold", self.title_threshold),
            ("min_candidate_similarity", self.min_candidate_similarity),
        ] {
            if let Some(v) = value {
                if !(0.0..=1.0).contains(&v) {
                    return Err(invalid(field, v, "0.0..=1.0"));
                }
            }
        }
        if let Some(d) = self.arxiv_delay_secs {
            if !d.is_finite() || d < 0.0 {
                return Err(invalid("arxiv_delay_secs", d, "a non-negative number"));
            }
        }
        Ok(())
    }

    /// Overlay the values set in this file onto `config`.
    pub fn apply(&self, config: &mut Config) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *target = v.clone();
            }
        }
        fn set_opt<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                *target = value.clone();
            }
        }

        set_opt(&mut config.s2_api_key, &self.s2_api_key);
        set_opt(&mut config.openalex_key, &self.openalex_key);
        set_opt(&mut config.crossref_mailto, &self.crossref_mailto);
        set_opt(&mut config.local_index_path, &self.local_index_path);
        set(&mut config.disabled_sources, &self.disabled_sources);
        set(&mut config.max_concurrent_refs, &self.num_workers);
        set(&mut config.ref_timeout_secs, &self.ref_timeout_secs);
        set(&mut config.db_timeout_secs, &self.db_timeout_secs);
        set(&mut config.arxiv_delay_secs, &self.arxiv_delay_secs);
        set(&mut config.max_rate_limit_retries, &self.max_rate_limit_retries);
        set(&mut config.title_threshold, &self.title_threshold);
        set(&mut config.min_candidate_similarity, &self.min_candidate_similarity);
        set(&mut config.retry_failed_sources, &self.retry_failed_sources);
    }
}

fn invalid(field: &str, value: impl std::fmt::Display, expected: &str) -> CoreError {
    CoreError::Config(format!(
        "invalid value for `{field}`: {value}; expected {expected}"
    ))
}

/// The platform-wide config file location, if the platform has one.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("refverify").join("config.toml"))
}

/// Parse and validate the file at `path`.
pub fn load_from_path(path: &Path) -> Result<ConfigFile, CoreError> {
    let text = fs::read_to_string(path)
        .map_err(|e| CoreError::Config(format!("cannot read {}: {e}", path.display())))?;
    let file: ConfigFile = toml::from_str(&text)
        .map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))?;
    file.validate()?;
    log::debug!("loaded configuration from {}", path.display());
    Ok(file)
}

/// Load the configuration file.
///
/// An explicit path must exist. Otherwise the first existing file among the
/// default locations is used; having none is fine.
pub fn load_config(explicit: Option<&Path>) -> Result<Option<ConfigFile>, CoreError> {
    if let Some(path) = explicit {
        return load_from_path(path).map(Some);
    }
    let candidates = [Some(PathBuf::from(LOCAL_FILE)), default_config_path()];
    for path in candidates.into_iter().flatten() {
        if path.is_file() {
            return load_from_path(&path).map(Some);
        }
    }
    Ok(None)
}
