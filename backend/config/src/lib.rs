//! `aerodesk-config`: runtime configuration and the installed-app catalog.
//!
//! Provides:
//! - Typed config schema with defaults for every field
//! - YAML read/write
//! - Environment overrides
//! - Validation
//! - App descriptor lookup from `app.properties.json`

pub mod catalog;
pub mod env;
pub mod io;
pub mod schema;
pub mod validation;

pub use catalog::{AppCatalog, FsAppCatalog, StaticAppCatalog};
pub use env::{apply_env_overrides, apply_env_overrides_with};
pub use io::{config_dir, config_file_path, load_config, write_config};
pub use schema::{
    AeroConfig, AppsConfig, ExecConfig, GatewayConfig, LoggingConfig, SecurityConfig,
    SessionsConfig, SunshineSection, XpraSection,
};
pub use validation::{validate, ConfigValidationError, ValidationReport};

use anyhow::{bail, Result};
use std::path::Path;

/// Load the file and apply environment overrides, without validating.
pub async fn load_effective(path: &Path) -> Result<AeroConfig> {
    let config = load_config(path).await?;
    apply_env_overrides(config)
}

/// Validate `config`, logging every finding. Any error aborts.
pub fn ensure_valid(config: &AeroConfig, path: &Path) -> Result<()> {
    let report = validate(config);
    for warning in &report.warnings {
        tracing::warn!(path = %warning.path, message = %warning.message, "Config warning");
    }
    for error in &report.errors {
        tracing::error!(path = %error.path, message = %error.message, "Config error");
    }
    if !report.is_valid() {
        bail!("{} invalid config value(s) in {}", report.errors.len(), path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    async fn load_without_env(path: &Path) -> AeroConfig {
        let config = load_config(path).await.unwrap();
        apply_env_overrides_with(config, &HashMap::new()).unwrap()
    }

    #[tokio::test]
    async fn invalid_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "gateway:\n  port: 0\n").unwrap();

        let config = load_without_env(&path).await;
        assert!(ensure_valid(&config, &path).is_err());
    }

    #[tokio::test]
    async fn missing_file_prepares_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_without_env(&dir.path().join("absent.yaml")).await;
        assert!(ensure_valid(&config, dir.path()).is_ok());
    }
}
