//! TOML-based configuration for the journal registry.
//!
//! ```toml
//! [registry]
//! data_dir = "/var/lib/journals"
//! log_level = "info"
//! editable_tables = ["master", "names", "idents", "abbrevs", "publisher", "titlehistory"]
//!
//! [surface]
//! kind = "folder"
//! dir = "/srv/journals/sheets"
//!
//! [reconcile]
//! blank_as_null_on_modify = false
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;
use crate::registry::SchemaRegistry;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Storage, logging and editable-table settings.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Edit surface settings.
    #[serde(default)]
    pub surface: SurfaceConfig,

    /// Reconciliation behaviour.
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Directory for persistent data (database, default surface folder).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Tables that may be checked out.
    #[serde(default = "default_editable_tables")]
    pub editable_tables: Vec<String>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/journals")
}
fn default_log_level() -> String {
    "info".into()
}
fn default_editable_tables() -> Vec<String> {
    ["master", "names", "idents", "abbrevs", "publisher", "titlehistory"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
            editable_tables: default_editable_tables(),
        }
    }
}

// ---------------------------------------------------------------------------
// Edit surface
// ---------------------------------------------------------------------------

/// Which edit surface implementation to use.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SurfaceKind {
    /// CSV files in a directory.
    #[default]
    Folder,
    /// In-process only; nothing survives the process.
    Memory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SurfaceConfig {
    #[serde(default)]
    pub kind: SurfaceKind,

    /// Folder for CSV surfaces (default `<data_dir>/sheets`).
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Read blank cells as NULL when diffing existing records too, not only
    /// when creating new ones.
    #[serde(default)]
    pub blank_as_null_on_modify: bool,
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self, registry: &SchemaRegistry) -> Result<(), ConfigError> {
        if self.registry.editable_tables.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "registry.editable_tables".into(),
                detail: "at least one editable table is required".into(),
            });
        }
        if let Some(unknown) = self
            .registry
            .editable_tables
            .iter()
            .find(|t| !registry.contains(t.as_str()))
        {
            return Err(ConfigError::InvalidValue {
                field: "registry.editable_tables".into(),
                detail: format!("unknown table '{unknown}'"),
            });
        }
        if self.registry.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "registry.data_dir".into(),
                detail: "data directory must not be empty".into(),
            });
        }
        Ok(())
    }

    /// Convenience: load and validate in one call.
    pub fn load_and_validate<P: AsRef<Path>>(
        path: P,
        registry: &SchemaRegistry,
    ) -> Result<Self, ConfigError> {
        let config = Self::load_from_file(path)?;
        config.validate(registry)?;
        Ok(config)
    }

    /// Location of the SQLite database.
    pub fn database_path(&self) -> PathBuf {
        self.registry.data_dir.join("journals.db")
    }

    /// Folder used by the CSV edit surface.
    pub fn surface_dir(&self) -> PathBuf {
        self.surface
            .dir
            .clone()
            .unwrap_or_else(|| self.registry.data_dir.join("sheets"))
    }
}
