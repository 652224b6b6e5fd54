//! `PluginManager` - the front door composing discovery, dependency
//! resolution, lifecycle, and the request broker.

use std::cell::{OnceCell, RefCell};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::broker;
use crate::error::{ErrorCallback, ReturnCode};
use crate::lifecycle;
use crate::metadata::PluginMetadata;
use crate::paths;
use crate::record::PluginInstance;
use crate::registry::Registry;
use crate::version::Version;

/// Configuration for a [`PluginManager`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Directories scanned by [`PluginManager::search_configured_dirs`].
    pub plugin_dirs: Vec<PathBuf>,
    /// Whether configured scans descend into subdirectories.
    pub recursive: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            plugin_dirs: vec![paths::default_plugin_dir()],
            recursive: false,
        }
    }
}

/// State shared between the facade and the broker entry points.
pub(crate) struct ManagerShared {
    pub registry: RefCell<Registry>,
}

/// The plugin manager facade.
///
/// Owns the registry and drives every operation. Orchestration is
/// single-threaded: the broker entry points handed to plugins service
/// the most recently constructed manager of the constructing thread, so
/// keep one manager per thread. [`PluginManager::global`] offers a
/// lazily created per-thread instance for hosts that want singleton
/// ergonomics; explicit construction is the test-friendly path.
pub struct PluginManager {
    shared: Rc<ManagerShared>,
    config: ManagerConfig,
}

thread_local! {
    static GLOBAL: OnceCell<Rc<PluginManager>> = const { OnceCell::new() };
}

impl PluginManager {
    pub fn new() -> Self {
        Self::with_config(ManagerConfig::default())
    }

    pub fn with_config(config: ManagerConfig) -> Self {
        let shared = Rc::new(ManagerShared {
            registry: RefCell::new(Registry::new()),
        });
        broker::set_current(&shared);
        tracing::debug!("plugin manager created");
        Self { shared, config }
    }

    /// The per-thread shared instance, created on first access.
    pub fn global() -> Rc<PluginManager> {
        GLOBAL.with(|cell| cell.get_or_init(|| Rc::new(Self::new())).clone())
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub(crate) fn shared(&self) -> &Rc<ManagerShared> {
        &self.shared
    }

    /// Scan `dir` for plugin libraries and register the valid ones.
    ///
    /// Only metadata is read at this stage; [`Self::load_plugins`]
    /// constructs and starts the plugins. May be called several times
    /// for different directories.
    pub fn search_for_plugins(
        &self,
        dir: &Path,
        recursive: bool,
        callback: Option<&mut ErrorCallback>,
    ) -> ReturnCode {
        with_callback(callback, |cb| {
            self.shared
                .registry
                .borrow_mut()
                .search_for_plugins(dir, recursive, cb)
        })
    }

    /// Scan every configured plugin directory. Succeeds when at least
    /// one directory yielded a plugin.
    pub fn search_configured_dirs(&self, callback: Option<&mut ErrorCallback>) -> ReturnCode {
        with_callback(callback, |cb| {
            let mut found = false;
            let mut last = ReturnCode::SearchNothingFound;
            for dir in &self.config.plugin_dirs {
                let code = self
                    .shared
                    .registry
                    .borrow_mut()
                    .search_for_plugins(dir, self.config.recursive, cb);
                if code.is_success() {
                    found = true;
                } else {
                    last = code;
                }
            }
            if found { ReturnCode::Success } else { last }
        })
    }

    /// Register `name` as the main plugin.
    ///
    /// The main plugin's `main_plugin_exec()` runs after every bulk
    /// load, and only it may reach non-dependency plugins through the
    /// broker. Succeeds iff no main plugin is set and the plugin exists.
    pub fn register_main_plugin(&self, name: &str) -> ReturnCode {
        let mut registry = self.shared.registry.borrow_mut();
        if registry.main_plugin().is_none() {
            if let Some(record) = registry.get_mut(name) {
                record.is_main = true;
                registry.set_main_plugin(name.to_string());
                tracing::info!(plugin = %name, "main plugin registered");
                return ReturnCode::Success;
            }
        }
        ReturnCode::UnknownError
    }

    /// Load every plugin found by previous searches, dependencies first.
    ///
    /// With `try_to_continue`, per-plugin dependency failures are
    /// reported through the callback and skipped; otherwise the first
    /// failure aborts the whole load.
    pub fn load_plugins(
        &self,
        try_to_continue: bool,
        callback: Option<&mut ErrorCallback>,
    ) -> ReturnCode {
        with_callback(callback, |cb| {
            lifecycle::load_plugins(&self.shared, try_to_continue, cb)
        })
    }

    /// Load a single already-registered plugin. Its dependencies must be
    /// loaded beforehand. Answers `true` when the plugin ends up loaded,
    /// including the already-loaded no-op case.
    pub fn load_plugin(&self, name: &str) -> bool {
        lifecycle::load_plugin(&self.shared, name)
    }

    /// Register the library at `path` (if new) and load it like
    /// [`Self::load_plugin`].
    pub fn load_plugin_from_path(&self, path: &Path) -> bool {
        lifecycle::load_plugin_from_path(&self.shared, path)
    }

    /// Unload a single plugin, recursively unloading its loaded
    /// dependents first, and erase it from the registry.
    pub fn unload_plugin(&self, name: &str) -> bool {
        lifecycle::unload_plugin(&self.shared, name)
    }

    /// Unload everything, reversing the last load order, and clear the
    /// discovery locations. A fresh search is needed before reloading.
    pub fn unload_plugins(&self, callback: Option<&mut ErrorCallback>) -> ReturnCode {
        with_callback(callback, |cb| lifecycle::unload_plugins(&self.shared, cb))
    }

    //
    // Getters
    //

    /// Directory of the host executable.
    pub fn app_directory() -> Option<PathBuf> {
        paths::app_directory()
    }

    /// The plugin API version of this host.
    pub fn plugin_api() -> &'static str {
        mortise_plugin_api::PLUGIN_API
    }

    pub fn plugins_count(&self) -> usize {
        self.shared.registry.borrow().len()
    }

    pub fn plugins_list(&self) -> Vec<String> {
        self.shared.registry.borrow().names()
    }

    /// Every directory where plugins were found.
    pub fn plugins_location(&self) -> Vec<PathBuf> {
        self.shared.registry.borrow().locations().to_vec()
    }

    /// The last computed load order.
    pub fn load_order(&self) -> Vec<String> {
        self.shared.registry.borrow().load_order().to_vec()
    }

    pub fn has_plugin(&self, name: &str) -> bool {
        self.shared.registry.borrow().contains(name)
    }

    /// Whether `name` exists with a version compatible with
    /// `min_version`.
    pub fn has_plugin_min_version(&self, name: &str, min_version: &str) -> bool {
        let Ok(min_version) = min_version.parse::<Version>() else {
            return false;
        };
        self.shared
            .registry
            .borrow()
            .get(name)
            .is_some_and(|record| record.metadata.version.compatible(&min_version))
    }

    pub fn is_plugin_loaded(&self, name: &str) -> bool {
        self.shared
            .registry
            .borrow()
            .get(name)
            .is_some_and(|record| record.is_live())
    }

    /// Shared handle to a loaded plugin's instance, or `None` when the
    /// plugin is unknown or not loaded.
    ///
    /// The instance's code lives in the plugin library: drop the handle
    /// before the plugin is unloaded.
    pub fn plugin_object(&self, name: &str) -> Option<PluginInstance> {
        self.shared
            .registry
            .borrow()
            .get(name)
            .filter(|record| record.is_live())
            .and_then(|record| record.instance.clone())
    }

    /// A copy of the plugin's parsed metadata.
    pub fn plugin_info(&self, name: &str) -> Option<PluginMetadata> {
        self.shared
            .registry
            .borrow()
            .get(name)
            .map(|record| record.metadata.clone())
    }
}

impl Default for PluginManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PluginManager {
    fn drop(&mut self) {
        let has_records = !self.shared.registry.borrow().is_empty();
        if has_records {
            let mut quiet = |_: ReturnCode, _: Option<&str>| {};
            lifecycle::unload_plugins(&self.shared, &mut quiet);
        }
        broker::clear_current(&self.shared);
    }
}

fn with_callback<R>(
    callback: Option<&mut ErrorCallback>,
    f: impl FnOnce(&mut ErrorCallback) -> R,
) -> R {
    let mut quiet = |_: ReturnCode, _: Option<&str>| {};
    match callback {
        Some(cb) => f(cb),
        None => f(&mut quiet),
    }
}
