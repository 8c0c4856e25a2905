//! Environment overrides, applied on top of the file.
//!
//! | Variable              | Field            |
//! |-----------------------|------------------|
//! | `AERODESK_BIND`       | `gateway.bind`   |
//! | `AERODESK_PORT`/`PORT`| `gateway.port`   |
//! | `AERODESK_APPS_DIR`   | `apps.dir`       |
//! | `AERODESK_LOG_LEVEL`  | `logging.level`  |

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::schema::AeroConfig;

/// Apply overrides from the process environment.
pub fn apply_env_overrides(config: AeroConfig) -> Result<AeroConfig> {
    apply_env_overrides_with(config, &std::env::vars().collect())
}

/// Apply overrides from a provided map (useful for testing).
pub fn apply_env_overrides_with(mut config: AeroConfig, env: &HashMap<String, String>) -> Result<AeroConfig> {
    let get = |key: &str| env.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

    if let Some(bind) = get("AERODESK_BIND") {
        config.gateway.bind = bind.to_string();
    }
    if let Some((key, port)) = get("AERODESK_PORT")
        .map(|p| ("AERODESK_PORT", p))
        .or_else(|| get("PORT").map(|p| ("PORT", p)))
    {
        config.gateway.port = port
            .parse()
            .with_context(|| format!("{key} must be a port number, got {port:?}"))?;
    }
    if let Some(dir) = get("AERODESK_APPS_DIR") {
        config.apps.dir = PathBuf::from(dir);
    }
    if let Some(level) = get("AERODESK_LOG_LEVEL") {
        config.logging.level = level.to_string();
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn overrides_replace_file_values() {
        let config = apply_env_overrides_with(
            AeroConfig::default(),
            &env(&[("AERODESK_PORT", "8080"), ("AERODESK_APPS_DIR", "/srv/apps")]),
        )
        .unwrap();
        assert_eq!(config.gateway.port, 8080);
        assert_eq!(config.apps.dir, PathBuf::from("/srv/apps"));
    }

    #[test]
    fn aerodesk_port_beats_plain_port() {
        let config = apply_env_overrides_with(
            AeroConfig::default(),
            &env(&[("PORT", "1111"), ("AERODESK_PORT", "2222")]),
        )
        .unwrap();
        assert_eq!(config.gateway.port, 2222);

        let config = apply_env_overrides_with(AeroConfig::default(), &env(&[("PORT", "1111")])).unwrap();
        assert_eq!(config.gateway.port, 1111);
    }

    #[test]
    fn bad_port_is_an_error() {
        let err = apply_env_overrides_with(AeroConfig::default(), &env(&[("PORT", "http")])).unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn empty_values_are_ignored() {
        let config =
            apply_env_overrides_with(AeroConfig::default(), &env(&[("AERODESK_BIND", "  ")])).unwrap();
        assert_eq!(config.gateway.bind, "0.0.0.0");
    }
}
