//! Embedded plugin metadata parsing and validation.
//!
//! Every plugin binary carries a NUL-terminated JSON blob behind its
//! `jp_metadata` symbol. Metadata is trusted only when it is well-formed
//! *and* declares an API version compatible with this host, so the
//! parser gates on `api` before anything else is looked at.

use std::fmt;

use serde::Deserialize;

use mortise_plugin_api::{PLUGIN_API, is_valid_plugin_name};

use crate::error::MetadataError;
use crate::version::Version;

#[derive(Deserialize)]
struct RawMetadata {
    api: String,
    name: String,
    #[serde(rename = "prettyName")]
    pretty_name: String,
    version: String,
    author: String,
    url: String,
    license: String,
    copyright: String,
    dependencies: Vec<RawDependency>,
}

#[derive(Deserialize)]
struct RawDependency {
    name: String,
    version: String,
}

/// A declared dependency on another plugin, by name and minimum version.
#[derive(Debug, Clone)]
pub struct Dependency {
    pub name: String,
    pub min_version: Version,
}

/// Validated plugin metadata.
#[derive(Debug, Clone)]
pub struct PluginMetadata {
    pub api: Version,
    pub name: String,
    pub pretty_name: String,
    pub version: Version,
    pub author: String,
    pub url: String,
    pub license: String,
    pub copyright: String,
    pub dependencies: Vec<Dependency>,
}

impl PluginMetadata {
    /// Parse the raw bytes behind a `jp_metadata` symbol.
    ///
    /// The blob is read up to its first NUL byte.
    pub fn from_embedded(bytes: &[u8]) -> Result<Self, MetadataError> {
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        let text = std::str::from_utf8(&bytes[..end]).map_err(|_| MetadataError::NotUtf8)?;
        Self::from_json(text)
    }

    /// Parse and validate a metadata JSON document.
    pub fn from_json(text: &str) -> Result<Self, MetadataError> {
        let raw: RawMetadata = serde_json::from_str(text)?;

        let api: Version = raw.api.parse()?;
        let host: Version = PLUGIN_API.parse()?;
        if !api.compatible(&host) {
            return Err(MetadataError::IncompatibleApi {
                found: raw.api,
                host: PLUGIN_API,
            });
        }

        if !is_valid_plugin_name(&raw.name) {
            return Err(MetadataError::BadName { name: raw.name });
        }

        let dependencies = raw
            .dependencies
            .into_iter()
            .map(|dep| {
                Ok(Dependency {
                    min_version: dep.version.parse()?,
                    name: dep.name,
                })
            })
            .collect::<Result<Vec<_>, MetadataError>>()?;

        Ok(Self {
            api,
            name: raw.name,
            pretty_name: raw.pretty_name,
            version: raw.version.parse()?,
            author: raw.author,
            url: raw.url,
            license: raw.license,
            copyright: raw.copyright,
            dependencies,
        })
    }
}

impl fmt::Display for PluginMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Plugin info:")?;
        writeln!(f, "Name: {}", self.name)?;
        writeln!(f, "Pretty name: {}", self.pretty_name)?;
        writeln!(f, "Version: {}", self.version)?;
        writeln!(f, "Author: {}", self.author)?;
        writeln!(f, "Url: {}", self.url)?;
        writeln!(f, "License: {}", self.license)?;
        writeln!(f, "Copyright: {}", self.copyright)?;
        write!(f, "Dependencies:")?;
        for dep in &self.dependencies {
            write!(f, "\n - {} ({})", dep.name, dep.min_version)?;
        }
        Ok(())
    }
}
