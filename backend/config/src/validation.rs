//! Config validation with path-qualified messages.

use crate::schema::AeroConfig;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Config validation error at '{path}': {message}")]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }

    fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }
}

pub fn validate(config: &AeroConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    validate_gateway(config, &mut report);
    validate_exec(config, &mut report);
    validate_backends(config, &mut report);
    report
}

fn validate_gateway(config: &AeroConfig, report: &mut ValidationReport) {
    if config.gateway.port == 0 {
        report.error("gateway.port", "Port must be non-zero");
    }
    if config.gateway.bind.trim().is_empty() {
        report.error("gateway.bind", "Bind address cannot be empty");
    }
}

fn validate_exec(config: &AeroConfig, report: &mut ValidationReport) {
    if config.exec.shell.trim().is_empty() {
        report.error("exec.shell", "Shell cannot be empty");
    }
    if config.exec.max_output_bytes == 0 {
        report.warn("exec.maxOutputBytes", "All command output will be discarded");
    }
    for (i, pattern) in config.security.extra_blocked.iter().enumerate() {
        if pattern.trim().is_empty() {
            report.warn(format!("security.extraBlocked[{i}]"), "Empty pattern is ignored");
        }
    }
}

fn validate_backends(config: &AeroConfig, report: &mut ValidationReport) {
    if config.xpra.binary.trim().is_empty() {
        report.error("xpra.binary", "Binary cannot be empty");
    }
    if config.xpra.ready_timeout_secs == 0 {
        report.error("xpra.readyTimeoutSecs", "Timeout must be at least one second");
    }
    if config.sunshine.binary.trim().is_empty() {
        report.error("sunshine.binary", "Binary cannot be empty");
    }
    if !config.sunshine.url.starts_with("http://") && !config.sunshine.url.starts_with("https://") {
        report.error("sunshine.url", "URL must start with http:// or https://");
    }
    if config.sunshine.settle_delay_ms == 0 {
        report.warn(
            "sunshine.settleDelayMs",
            "Stream will be announced before Sunshine has had any time to start",
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let report = validate(&AeroConfig::default());
        assert!(report.is_valid());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn reports_each_bad_field() {
        let mut config = AeroConfig::default();
        config.gateway.port = 0;
        config.xpra.binary = " ".into();
        config.sunshine.url = "localhost:47989".into();
        config.sunshine.settle_delay_ms = 0;

        let report = validate(&config);
        let paths: Vec<_> = report.errors.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["gateway.port", "xpra.binary", "sunshine.url"]);
        assert_eq!(report.warnings.len(), 1);
    }
}
