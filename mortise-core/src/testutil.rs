//! Shared fixtures: in-process plugins with event recording.
//!
//! The dlopen path is a thin shim over `libloading`, so lifecycle and
//! broker tests run against resident records whose factories live in
//! the test binary. Plugins append to a per-thread event log, which
//! also gives each test an isolated log since the harness runs tests on
//! their own threads.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::os::raw::c_int;

use mortise_plugin_api::{GetNonDepFn, Plugin, PluginPtr, RequestFn, codes};

use crate::manager::PluginManager;
use crate::metadata::{Dependency, PluginMetadata};
use crate::record::PluginRecord;

thread_local! {
    static EVENTS: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

pub(crate) fn push_event(event: String) {
    EVENTS.with(|events| events.borrow_mut().push(event));
}

/// Drain and return the events recorded on this thread so far.
pub(crate) fn take_events() -> Vec<String> {
    EVENTS.with(|events| std::mem::take(&mut *events.borrow_mut()))
}

/// Compile-time plugin identity for the recording fixtures.
pub(crate) trait Named {
    const NAME: &'static str;
}

macro_rules! markers {
    ($($ty:ident => $name:literal),* $(,)?) => {
        $(
            pub(crate) struct $ty;
            impl Named for $ty {
                const NAME: &'static str = $name;
            }
        )*
    };
}

markers! {
    NoopA => "A",
    NoopB => "B",
    NoopM => "M",
    NoopX => "X",
    NoopY => "Y",
}

/// Test plugin that logs its lifecycle to the per-thread event log.
struct RecordingPlugin<T: Named> {
    #[allow(dead_code)]
    request: RequestFn,
    #[allow(dead_code)]
    dependencies: Vec<PluginPtr>,
    _marker: PhantomData<T>,
}

impl<T: Named> Plugin for RecordingPlugin<T> {
    fn loaded(&mut self) {
        push_event(format!("loaded:{}", T::NAME));
    }

    fn about_to_be_unloaded(&mut self) {
        push_event(format!("unloaded:{}", T::NAME));
    }

    fn handle_request(
        &mut self,
        _sender: &std::ffi::CStr,
        code: u16,
        _data: *mut *mut std::ffi::c_void,
        _data_size: *mut u32,
    ) -> u16 {
        push_event(format!("request:{}:{code}", T::NAME));
        if code >= codes::USER_BASE {
            codes::SUCCESS
        } else {
            codes::UNKNOWN_REQUEST
        }
    }

    fn main_plugin_exec(&mut self) {
        push_event(format!("main:{}", T::NAME));
    }
}

/// Factory for [`RecordingPlugin<T>`]; logs construction with the
/// number of dependency instances received.
#[allow(improper_ctypes_definitions)]
pub(crate) extern "C" fn factory<T: Named + 'static>(
    request: RequestFn,
    _get_non_dep: GetNonDepFn,
    deps: *const PluginPtr,
    dep_count: c_int,
    _is_main: bool,
) -> PluginPtr {
    let dependencies = if deps.is_null() || dep_count <= 0 {
        Vec::new()
    } else {
        // SAFETY: the manager passes `dep_count` valid entries.
        unsafe { std::slice::from_raw_parts(deps, dep_count as usize) }.to_vec()
    };
    push_event(format!("created:{}:deps={}", T::NAME, dependencies.len()));
    Box::into_raw(Box::new(RecordingPlugin::<T> {
        request,
        dependencies,
        _marker: PhantomData,
    }) as Box<dyn Plugin>)
}

/// Build validated metadata without going through JSON.
pub(crate) fn metadata(name: &str, version: &str, deps: &[(&str, &str)]) -> PluginMetadata {
    PluginMetadata {
        api: mortise_plugin_api::PLUGIN_API.parse().unwrap(),
        name: name.to_string(),
        pretty_name: format!("{name} plugin"),
        version: version.parse().unwrap(),
        author: "tests".to_string(),
        url: String::new(),
        license: "MIT".to_string(),
        copyright: String::new(),
        dependencies: deps
            .iter()
            .map(|(name, min)| Dependency {
                name: (*name).to_string(),
                min_version: min.parse().unwrap(),
            })
            .collect(),
    }
}

/// A registry record whose factory lives in the test binary.
pub(crate) fn resident_record<T: Named + 'static>(
    version: &str,
    deps: &[(&str, &str)],
) -> PluginRecord {
    PluginRecord::resident(metadata(T::NAME, version, deps), factory::<T>)
}

/// Register a recording plugin with the manager, as discovery would.
pub(crate) fn install<T: Named + 'static>(
    manager: &PluginManager,
    version: &str,
    deps: &[(&str, &str)],
) {
    manager
        .shared()
        .registry
        .borrow_mut()
        .insert(T::NAME.to_string(), resident_record::<T>(version, deps));
}
