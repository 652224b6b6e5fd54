//! Per-plugin bookkeeping: one record per discovered library.

use std::cell::RefCell;
use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;

use mortise_plugin_api::{CreateFn, Plugin, PluginPtr};

use crate::error::ReturnCode;
use crate::library::SharedLibrary;
use crate::metadata::PluginMetadata;

/// Shared handle to a live plugin instance.
///
/// The registry holds one reference; [`crate::PluginManager::plugin_object`]
/// may hand out more. Any outside reference must be dropped before the
/// plugin is unloaded, since the instance's code lives in the library.
pub type PluginInstance = Rc<RefCell<Box<dyn Plugin>>>;

/// Memoized outcome of the dependency check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resolution {
    /// Not checked yet.
    #[default]
    Unknown,
    /// Every transitive dependency is present and version-compatible.
    Resolved,
    /// Failed, with the code the check produced.
    Unresolved(ReturnCode),
}

/// Raw pointer to a live instance, for handing across the ABI.
///
/// The pointee is the boxed instance owned by the registry; the pointer
/// stays valid until that box is dropped during unload.
pub(crate) fn instance_ptr(instance: &PluginInstance) -> PluginPtr {
    let mut guard = instance.borrow_mut();
    &mut **guard as *mut dyn Plugin
}

/// Everything the manager tracks about one discovered plugin.
pub struct PluginRecord {
    /// Absolute path of the shared library.
    pub path: PathBuf,
    /// Owned library handle; open from discovery until unload.
    pub library: SharedLibrary,
    pub metadata: PluginMetadata,
    /// Factory resolved from the library; valid while the handle is open.
    pub creator: Option<CreateFn>,
    /// Live instance, present strictly between `loaded()` and
    /// `about_to_be_unloaded()`.
    pub instance: Option<PluginInstance>,
    pub resolution: Resolution,
    /// Node index during a single load pass.
    pub graph_id: Option<usize>,
    pub is_main: bool,
}

impl PluginRecord {
    pub fn new(path: PathBuf, library: SharedLibrary, metadata: PluginMetadata) -> Self {
        Self {
            path,
            library,
            metadata,
            creator: None,
            instance: None,
            resolution: Resolution::Unknown,
            graph_id: None,
            is_main: false,
        }
    }

    /// A record whose code lives in the test binary itself.
    #[cfg(test)]
    pub fn resident(metadata: PluginMetadata, creator: CreateFn) -> Self {
        let mut record = Self::new(
            PathBuf::from(format!("<resident:{}>", metadata.name)),
            SharedLibrary::resident(),
            metadata,
        );
        record.creator = Some(creator);
        record
    }

    /// Whether the plugin is LIVE: instance constructed, `loaded()`
    /// called, library still open.
    pub fn is_live(&self) -> bool {
        self.library.is_loaded() && self.instance.is_some()
    }
}

impl Drop for PluginRecord {
    // Last-line safety net; the lifecycle paths close everything first,
    // leaving this a no-op.
    fn drop(&mut self) {
        if self.library.is_loaded() {
            tracing::warn!(plugin = %self.metadata.name, "record dropped while still loaded");
            if let Some(instance) = self.instance.take() {
                instance.borrow_mut().about_to_be_unloaded();
                drop(instance);
            }
            self.library.unload();
        }
    }
}

impl fmt::Debug for PluginRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRecord")
            .field("name", &self.metadata.name)
            .field("path", &self.path)
            .field("library", &self.library)
            .field("live", &self.instance.is_some())
            .field("resolution", &self.resolution)
            .field("is_main", &self.is_main)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn metadata(name: &str) -> PluginMetadata {
        crate::testutil::metadata(name, "1.0.0", &[])
    }

    struct ProbePlugin {
        events: Rc<RefCell<Vec<&'static str>>>,
    }

    impl Plugin for ProbePlugin {
        fn loaded(&mut self) {
            self.events.borrow_mut().push("loaded");
        }
        fn about_to_be_unloaded(&mut self) {
            self.events.borrow_mut().push("unloaded");
        }
    }

    fn live_record(events: &Rc<RefCell<Vec<&'static str>>>) -> PluginRecord {
        let mut record = PluginRecord::new(
            PathBuf::from("<probe>"),
            SharedLibrary::resident(),
            metadata("probe"),
        );
        let instance: Box<dyn Plugin> = Box::new(ProbePlugin {
            events: events.clone(),
        });
        record.instance = Some(Rc::new(RefCell::new(instance)));
        record
    }

    #[test]
    fn test_drop_safety_net_unloads() {
        let events = Rc::new(RefCell::new(Vec::new()));
        drop(live_record(&events));
        assert_eq!(*events.borrow(), ["unloaded"]);
    }

    #[test]
    fn test_drop_after_explicit_unload_is_noop() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let mut record = live_record(&events);

        if let Some(instance) = record.instance.take() {
            instance.borrow_mut().about_to_be_unloaded();
        }
        record.library.unload();
        drop(record);

        // Exactly one unload notification, from the explicit path.
        assert_eq!(*events.borrow(), ["unloaded"]);
    }

    #[test]
    fn test_is_live_requires_instance_and_handle() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let mut record = live_record(&events);
        assert!(record.is_live());

        let instance = record.instance.take();
        assert!(!record.is_live());
        record.instance = instance;

        record.library.unload();
        record.instance.take();
        assert!(!record.is_live());
    }

    #[test]
    fn test_resolution_defaults_to_unknown() {
        let record = PluginRecord::new(
            PathBuf::from("x"),
            SharedLibrary::resident(),
            metadata("x"),
        );
        assert_eq!(record.resolution, Resolution::Unknown);
        assert!(record.graph_id.is_none());
        assert!(!record.is_main);
    }
}
