//! Decoding of the JSON descriptor embedded under `jp_metadata`.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use jackplug_plugin_api::PLUGIN_API;

use crate::version::PluginVersion;

/// A named, version-gated requirement on another plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySpec {
    /// The `jp_name` of the required plugin.
    pub name: String,
    /// Minimum required version, under the caret compatibility rule.
    pub version: String,
}

/// The decoded plugin descriptor.
///
/// Field order of `dependencies` is preserved: it is surfaced to the
/// plugin's constructor as a positional array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Host API version the plugin was built against (JSON field `api`).
    #[serde(rename = "api")]
    pub api_version: String,
    pub name: String,
    #[serde(rename = "prettyName")]
    pub pretty_name: String,
    pub version: String,
    pub author: String,
    pub url: String,
    pub license: String,
    pub copyright: String,
    pub dependencies: Vec<DependencySpec>,
}

/// Why an embedded descriptor was rejected.
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("metadata is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("invalid metadata JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("plugin name is empty")]
    EmptyName,

    #[error("plugin targets API {found}, host provides {host}")]
    IncompatibleApi { found: String, host: String },
}

/// Decode a `jp_metadata` payload.
///
/// All fields of the JSON schema are required; a descriptor with an empty
/// name, or one built against an incompatible host API, is rejected as a
/// whole.
pub fn parse_metadata(bytes: &[u8]) -> Result<PluginDescriptor, MetadataError> {
    let text = std::str::from_utf8(bytes)?;
    let descriptor: PluginDescriptor = serde_json::from_str(text)?;

    if descriptor.name.is_empty() {
        return Err(MetadataError::EmptyName);
    }
    if !PluginVersion::parse(&descriptor.api_version).compatible(PLUGIN_API) {
        return Err(MetadataError::IncompatibleApi {
            found: descriptor.api_version,
            host: PLUGIN_API.to_string(),
        });
    }

    Ok(descriptor)
}

impl fmt::Display for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Plugin info:")?;
        writeln!(f, "Name: {}", self.name)?;
        writeln!(f, "Pretty name: {}", self.pretty_name)?;
        writeln!(f, "Version: {}", self.version)?;
        writeln!(f, "Author: {}", self.author)?;
        writeln!(f, "Url: {}", self.url)?;
        writeln!(f, "License: {}", self.license)?;
        writeln!(f, "Copyright: {}", self.copyright)?;
        writeln!(f, "Dependencies:")?;
        for dep in &self.dependencies {
            writeln!(f, " - {} ({})", dep.name, dep.version)?;
        }
        Ok(())
    }
}
