//! `ds.yaml`: which container and directory to snapshot, and the namespace
//! of the helper resources.

use ds_common::{Result, SnapshotError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::debug;

pub const SETTINGS_FILE: &str = "ds.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub container_name: String,
    pub directory: String,
    pub namespace: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            container_name: String::new(),
            directory: "/".to_string(),
            namespace: "ds".to_string(),
        }
    }
}

/// Per-invocation values from flags or the environment. Empty values are
/// treated as not given.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub container_name: Option<String>,
    pub directory: Option<String>,
    pub namespace: Option<String>,
}

impl Settings {
    /// Settings from `path`, or the defaults when there is no such file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "No settings file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };

        serde_yaml::from_str(&content).map_err(|e| {
            SnapshotError::Config(format!("invalid settings in `{}`: {e}", path.display()))
        })
    }

    pub fn with_overrides(self, overrides: &Overrides) -> Self {
        fn pick(value: &Option<String>, fallback: String) -> String {
            value.clone().filter(|v| !v.is_empty()).unwrap_or(fallback)
        }

        Self {
            container_name: pick(&overrides.container_name, self.container_name),
            directory: pick(&overrides.directory, self.directory),
            namespace: pick(&overrides.namespace, self.namespace),
        }
    }

    /// Writes the default settings to `path`, which must not exist yet.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            return Err(SnapshotError::Config(format!(
                "File already exists, delete `{}` and try again.",
                path.display()
            )));
        }

        let content = serde_yaml::to_string(&Self::default())
            .map_err(|e| SnapshotError::Internal(format!("cannot serialize settings: {e}")))?;
        fs::write(path, content)?;
        Ok(())
    }
}
