//! Hierarchical loader for [`EngineConfig`].
//!
//! Grounded on `infrastructure/config/loader.rs`'s figment merge order, with
//! the precedence chain and `<ns>`-prefixed env vars carried over verbatim;
//! retargeted at `EngineConfig` and the `.ralph/` project directory this
//! engine's namespace convention uses (§6, "Config surface").

use figment::providers::{Env, Format, Yaml};
use figment::Figment;

use crate::domain::error::ConfigError;
use crate::domain::models::config::EngineConfig;

/// Loads [`EngineConfig`] from a fixed precedence chain.
///
/// Precedence (lowest to highest):
/// 1. Per-field defaults declared on `EngineConfig` itself (`#[serde(default = ..)]`).
/// 2. `.ralph/config.yaml` (project config).
/// 3. `.ralph/local.yaml` (project-local overrides, optional, untracked).
/// 4. `RALPH_`-prefixed environment variables, `__` as the nesting separator.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from the standard project locations.
    ///
    /// # Errors
    /// Returns [`ConfigError::Figment`] if extraction fails (e.g. a required
    /// field with no default, such as `min_free_memory_mb`, is missing from
    /// every source), or a field-level [`ConfigError`] if validation fails.
    pub fn load() -> Result<EngineConfig, ConfigError> {
        let config: EngineConfig = Figment::new()
            .merge(Yaml::file(".ralph/config.yaml"))
            .merge(Yaml::file(".ralph/local.yaml"))
            .merge(Env::prefixed("RALPH_").split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from one explicit YAML file, skipping the project
    /// directory and environment layers. Used by the demo binary's
    /// `--config <path>` argument.
    ///
    /// # Errors
    /// Same as [`Self::load`].
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<EngineConfig, ConfigError> {
        let config: EngineConfig = Figment::new().merge(Yaml::file(path.as_ref())).extract()?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn load_from_file_applies_field_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "min_free_memory_mb: 256\nmax_cpu_utilization: 90.0").unwrap();
        file.flush().unwrap();

        let config = ConfigLoader::load_from_file(file.path()).unwrap();
        assert_eq!(config.max_workers, 3);
        assert_eq!(config.min_free_memory_mb, 256);
        assert!(config.ai_conflict_resolution);
    }

    #[test]
    fn load_from_file_rejects_missing_required_field() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "max_workers: 5").unwrap();
        file.flush().unwrap();

        let result = ConfigLoader::load_from_file(file.path());
        assert!(result.is_err());
    }

    #[test]
    fn load_from_file_rejects_invalid_field() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "min_free_memory_mb: 256\nmax_cpu_utilization: 90.0\nmax_workers: 0"
        )
        .unwrap();
        file.flush().unwrap();

        let result = ConfigLoader::load_from_file(file.path());
        assert!(matches!(result, Err(ConfigError::InvalidMaxWorkers(0))));
    }

    #[test]
    fn hierarchical_merge_lets_override_win() {
        let mut base = NamedTempFile::new().unwrap();
        writeln!(
            base,
            "min_free_memory_mb: 256\nmax_cpu_utilization: 90.0\nmax_workers: 3"
        )
        .unwrap();
        base.flush().unwrap();

        let mut overrides = NamedTempFile::new().unwrap();
        writeln!(overrides, "max_workers: 8").unwrap();
        overrides.flush().unwrap();

        let config: EngineConfig = Figment::new()
            .merge(Yaml::file(base.path()))
            .merge(Yaml::file(overrides.path()))
            .extract()
            .unwrap();

        assert_eq!(config.max_workers, 8);
        assert_eq!(config.min_free_memory_mb, 256);
    }
}
