//! In-memory plugin registry and discovery driver.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{ErrorCallback, ReturnCode};
use crate::library::{self, SharedLibrary};
use crate::metadata::PluginMetadata;
use crate::paths;
use crate::record::PluginRecord;

/// Maps unique plugin names to their records, and keeps the discovery
/// locations, the last computed load order, and the main-plugin name.
///
/// Records are keyed by the `jp_name` symbol value. A `BTreeMap` keeps
/// iteration deterministic, which in turn keeps load-order tie-breaking
/// stable between runs.
#[derive(Default)]
pub(crate) struct Registry {
    records: BTreeMap<String, PluginRecord>,
    locations: Vec<PathBuf>,
    load_order: Vec<String>,
    main_plugin: Option<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan `dir` for plugin libraries and register every new valid one.
    ///
    /// Unreadable and non-plugin libraries are silently discarded;
    /// per-candidate failures (duplicate name, bad metadata) fire the
    /// callback and discard the candidate. The scan succeeds when at
    /// least one plugin was registered.
    pub fn search_for_plugins(
        &mut self,
        dir: &Path,
        recursive: bool,
        callback: &mut ErrorCallback,
    ) -> ReturnCode {
        tracing::info!(dir = %dir.display(), recursive, "searching for plugins");

        let listing = paths::list_libraries(dir, recursive);
        if let Some(error) = &listing.error {
            callback(ReturnCode::SearchListFilesError, Some(&error.to_string()));
            // Keep going with whatever the scan managed to collect.
            if listing.paths.is_empty() {
                return ReturnCode::SearchListFilesError;
            }
        }

        let mut registered_any = false;
        for path in &listing.paths {
            let path_str = path.display().to_string();

            let library = match SharedLibrary::load(path) {
                Ok(library) => library,
                Err(error) => {
                    tracing::debug!(path = %path_str, %error, "not a loadable library, skipping");
                    continue;
                }
            };

            if !library.has_symbol(library::NAME_SYMBOL)
                || !library.has_symbol(library::METADATA_SYMBOL)
                || !library.has_symbol(library::CREATE_SYMBOL)
            {
                // Some other shared library living in the plugin dir.
                continue;
            }

            let Some(name) = library.plugin_name() else {
                continue;
            };
            tracing::info!(path = %path_str, plugin = %name, "found plugin library");

            if self.records.contains_key(&name) {
                callback(ReturnCode::SearchNameAlreadyExists, Some(&path_str));
                continue;
            }

            let metadata = match library
                .metadata_bytes()
                .ok_or(crate::error::MetadataError::NotUtf8)
                .and_then(|bytes| PluginMetadata::from_embedded(&bytes))
            {
                Ok(metadata) => metadata,
                Err(error) => {
                    tracing::warn!(plugin = %name, %error, "rejecting plugin metadata");
                    callback(ReturnCode::SearchCannotParseMetadata, Some(&path_str));
                    continue;
                }
            };

            if metadata.name != name {
                tracing::warn!(
                    symbol = %name,
                    metadata = %metadata.name,
                    "plugin name symbol and metadata disagree, keying by symbol"
                );
            }
            tracing::debug!("{metadata}");

            self.records
                .insert(name, PluginRecord::new(path.clone(), library, metadata));
            registered_any = true;
        }

        if registered_any {
            self.add_location(dir);
            ReturnCode::Success
        } else {
            ReturnCode::SearchNothingFound
        }
    }

    pub fn insert(&mut self, name: String, record: PluginRecord) {
        self.records.insert(name, record);
    }

    pub fn get(&self, name: &str) -> Option<&PluginRecord> {
        self.records.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut PluginRecord> {
        self.records.get_mut(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<PluginRecord> {
        self.records.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PluginRecord)> {
        self.records.iter()
    }

    pub fn records_mut(&mut self) -> impl Iterator<Item = (&String, &mut PluginRecord)> {
        self.records.iter_mut()
    }

    /// First registered name, used when draining stragglers.
    pub fn first_name(&self) -> Option<String> {
        self.records.keys().next().cloned()
    }

    pub fn locations(&self) -> &[PathBuf] {
        &self.locations
    }

    pub fn add_location(&mut self, dir: &Path) {
        if !self.locations.iter().any(|known| known == dir) {
            self.locations.push(dir.to_path_buf());
        }
    }

    pub fn clear_locations(&mut self) {
        self.locations.clear();
    }

    pub fn load_order(&self) -> &[String] {
        &self.load_order
    }

    pub fn set_load_order(&mut self, order: Vec<String>) {
        self.load_order = order;
    }

    pub fn take_load_order(&mut self) -> Vec<String> {
        std::mem::take(&mut self.load_order)
    }

    pub fn main_plugin(&self) -> Option<&str> {
        self.main_plugin.as_deref()
    }

    pub fn set_main_plugin(&mut self, name: String) {
        self.main_plugin = Some(name);
    }
}
