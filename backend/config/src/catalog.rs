//! Installed-app lookup: the descriptor a launch is resolved against.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};

use aerodesk_core::AppDescriptor;

const PROPERTIES_FILE: &str = "app.properties.json";

#[async_trait]
pub trait AppCatalog: Send + Sync {
    /// Descriptor for `app_key`; empty when the app declares nothing.
    async fn descriptor(&self, app_key: &str) -> AppDescriptor;
}

/// Reads `<root>/<appKey>/app.properties.json`.
#[derive(Debug, Clone)]
pub struct FsAppCatalog {
    root: PathBuf,
}

impl FsAppCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn properties_path(&self, app_key: &str) -> Option<PathBuf> {
        let mut components = Path::new(app_key).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Some(self.root.join(app_key).join(PROPERTIES_FILE)),
            _ => None,
        }
    }
}

#[async_trait]
impl AppCatalog for FsAppCatalog {
    async fn descriptor(&self, app_key: &str) -> AppDescriptor {
        let Some(path) = self.properties_path(app_key) else {
            warn!(app_key, "Rejected app key outside the apps directory");
            return AppDescriptor::default();
        };

        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "No app properties; using client values");
                return AppDescriptor::default();
            }
        };

        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "Malformed app properties ignored");
            AppDescriptor::default()
        })
    }
}

/// Fixed in-memory catalog.
#[derive(Debug, Clone, Default)]
pub struct StaticAppCatalog {
    apps: HashMap<String, AppDescriptor>,
}

impl StaticAppCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, app_key: impl Into<String>, descriptor: AppDescriptor) -> Self {
        self.apps.insert(app_key.into(), descriptor);
        self
    }
}

#[async_trait]
impl AppCatalog for StaticAppCatalog {
    async fn descriptor(&self, app_key: &str) -> AppDescriptor {
        self.apps.get(app_key).cloned().unwrap_or_default()
    }
}
