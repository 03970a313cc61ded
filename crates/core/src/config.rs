//! Configuration types shared across crates.

use crate::error::{Error, Result};
use crate::policy::ExpectedFiles;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Parser limits. Every limit is optional; unset limits fall back to the
/// global options and then to the parser defaults.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    /// Max field name size in bytes (default: 100).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_name_size: Option<usize>,
    /// Max field value size in bytes (default: 1 MiB).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_size: Option<usize>,
    /// Max number of non-file fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<usize>,
    /// Max size of a single file in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    /// Max number of file parts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<usize>,
    /// Max number of parts (fields + files).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parts: Option<usize>,
}

impl Limits {
    /// Overlay `self` on `base`: every limit set here wins.
    pub fn merged_over(&self, base: &Limits) -> Limits {
        Limits {
            field_name_size: self.field_name_size.or(base.field_name_size),
            field_size: self.field_size.or(base.field_size),
            fields: self.fields.or(base.fields),
            file_size: self.file_size.or(base.file_size),
            files: self.files.or(base.files),
            parts: self.parts.or(base.parts),
        }
    }

    /// Effective field name limit.
    pub fn field_name_size(&self) -> usize {
        self.field_name_size
            .unwrap_or(crate::DEFAULT_FIELD_NAME_SIZE)
    }

    /// Effective field value limit.
    pub fn field_size(&self) -> usize {
        self.field_size.unwrap_or(crate::DEFAULT_FIELD_SIZE)
    }
}

/// Decoder options: global on the plugin, optionally overridden per route.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipartOptions {
    /// Keep directory components of submitted file names.
    #[serde(default)]
    pub preserve_path: bool,
    #[serde(default)]
    pub limits: Limits,
}

/// Per-route overrides.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preserve_path: Option<bool>,
    #[serde(default)]
    pub limits: Limits,
}

impl MultipartOptions {
    /// Apply route overrides to these global options.
    pub fn merge(&self, route: &RouteOptions) -> MultipartOptions {
        MultipartOptions {
            preserve_path: route.preserve_path.unwrap_or(self.preserve_path),
            limits: route.limits.merged_over(&self.limits),
        }
    }
}

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

/// Global multipart configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MultipartConfig {
    /// Directory for temporary upload files (default: the OS temp dir).
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
    #[serde(default)]
    pub preserve_path: bool,
    #[serde(default)]
    pub limits: Limits,
}

impl MultipartConfig {
    /// Global decoder options.
    pub fn options(&self) -> MultipartOptions {
        MultipartOptions {
            preserve_path: self.preserve_path,
            limits: self.limits.clone(),
        }
    }

    /// Resolved temp directory.
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// One form route.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RouteConfig {
    /// `"ANY_FILES"` or an object of field -> max count.
    pub expected_files: ExpectedFiles,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preserve_path: Option<bool>,
    #[serde(default)]
    pub limits: Limits,
}

impl RouteConfig {
    pub fn options(&self) -> RouteOptions {
        RouteOptions {
            preserve_path: self.preserve_path,
            limits: self.limits.clone(),
        }
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub multipart: MultipartConfig,
    /// Form routes keyed by the `{route}` path segment.
    #[serde(default)]
    pub routes: BTreeMap<String, RouteConfig>,
}

impl AppConfig {
    /// Validate route names.
    pub fn validate(&self) -> Result<()> {
        for name in self.routes.keys() {
            if name.is_empty() || name.contains('/') {
                return Err(Error::Config(format!(
                    "route name {name:?} must be a non-empty path segment"
                )));
            }
        }
        Ok(())
    }
}
