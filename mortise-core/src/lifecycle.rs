//! Load/unload orchestration: dependency checks, load-order
//! computation, factory invocation, and reverse-order teardown.
//!
//! Plugin callbacks (`loaded()`, `about_to_be_unloaded()`, the factory,
//! `main_plugin_exec()`) can re-enter the manager through the request
//! broker, so no registry borrow may be held across any call into
//! plugin code.

use std::cell::RefCell;
use std::os::raw::c_int;
use std::path::Path;
use std::rc::Rc;

use mortise_plugin_api::PluginPtr;

use crate::broker;
use crate::error::{ErrorCallback, ReturnCode};
use crate::graph::{Graph, Node};
use crate::library::SharedLibrary;
use crate::manager::ManagerShared;
use crate::metadata::PluginMetadata;
use crate::record::{PluginInstance, PluginRecord, Resolution, instance_ptr};
use crate::registry::Registry;
use crate::version::Version;

/// Memoized recursive dependency check.
///
/// Verifies that every declared dependency exists with a compatible
/// version, transitively. A direct failure marks the record unresolved
/// and fires the callback with the record's path; propagated failures
/// leave the intermediate records unchecked. Cycles terminate the walk
/// and are left for the graph pass to report.
pub(crate) fn check_dependencies(
    registry: &mut Registry,
    name: &str,
    callback: &mut ErrorCallback,
) -> ReturnCode {
    let mut visiting = Vec::new();
    check_dependencies_inner(registry, name, callback, &mut visiting)
}

fn check_dependencies_inner(
    registry: &mut Registry,
    name: &str,
    callback: &mut ErrorCallback,
    visiting: &mut Vec<String>,
) -> ReturnCode {
    let Some(record) = registry.get(name) else {
        return ReturnCode::LoadDependencyNotFound;
    };
    match record.resolution {
        Resolution::Resolved => return ReturnCode::Success,
        Resolution::Unresolved(code) => return code,
        Resolution::Unknown => {}
    }
    if visiting.iter().any(|seen| seen == name) {
        // Looped back onto a record already being checked; the
        // topological sort owns cycle reporting.
        return ReturnCode::Success;
    }
    visiting.push(name.to_string());

    let path = record.path.display().to_string();
    let dependencies: Vec<(String, Version)> = record
        .metadata
        .dependencies
        .iter()
        .map(|dep| (dep.name.clone(), dep.min_version.clone()))
        .collect();

    let mut outcome = ReturnCode::Success;
    for (dep_name, min_version) in dependencies {
        let direct_failure = match registry.get(&dep_name) {
            None => Some(ReturnCode::LoadDependencyNotFound),
            Some(dep) if !dep.metadata.version.compatible(&min_version) => {
                Some(ReturnCode::LoadDependencyBadVersion)
            }
            Some(_) => None,
        };

        if let Some(code) = direct_failure {
            tracing::warn!(
                plugin = %name,
                dependency = %dep_name,
                result = %code,
                "dependency check failed"
            );
            if let Some(record) = registry.get_mut(name) {
                record.resolution = Resolution::Unresolved(code);
            }
            callback(code, Some(&path));
            outcome = code;
            break;
        }

        let code = check_dependencies_inner(registry, &dep_name, callback, visiting);
        if !code.is_success() {
            outcome = code;
            break;
        }
    }

    visiting.pop();
    if outcome.is_success() {
        if let Some(record) = registry.get_mut(name) {
            record.resolution = Resolution::Resolved;
        }
    }
    outcome
}

/// Bulk load: check every record, compute the load order, construct and
/// start plugins in that order, then run the main plugin.
pub(crate) fn load_plugins(
    shared: &Rc<ManagerShared>,
    try_to_continue: bool,
    callback: &mut ErrorCallback,
) -> ReturnCode {
    tracing::info!("loading plugins");

    let mut nodes: Vec<Node> = Vec::new();
    {
        let mut registry = shared.registry.borrow_mut();
        let names = registry.names();

        // Reset per-pass state; the graph is rebuilt on every call.
        for (_, record) in registry.records_mut() {
            record.graph_id = None;
        }

        for name in &names {
            let code = check_dependencies(&mut registry, name, callback);
            if !code.is_success() {
                if !try_to_continue {
                    return code;
                }
                continue;
            }
            if let Some(record) = registry.get_mut(name) {
                if record.resolution == Resolution::Resolved {
                    record.graph_id = Some(nodes.len());
                    nodes.push(Node {
                        name: name.clone(),
                        parents: Vec::new(),
                    });
                }
            }
        }

        for name in &names {
            let Some(id) = registry.get(name).and_then(|record| record.graph_id) else {
                continue;
            };
            let dep_names: Vec<String> = registry
                .get(name)
                .map(|record| {
                    record
                        .metadata
                        .dependencies
                        .iter()
                        .map(|dep| dep.name.clone())
                        .collect()
                })
                .unwrap_or_default();
            let parents: Vec<usize> = dep_names
                .iter()
                .filter_map(|dep| registry.get(dep).and_then(|record| record.graph_id))
                .collect();
            nodes[id].parents = parents;
        }
    }

    let order = match Graph::new(nodes).topological_sort() {
        Ok(order) => order,
        Err(_) => {
            shared.registry.borrow_mut().set_load_order(Vec::new());
            callback(ReturnCode::LoadDependencyCycle, None);
            return ReturnCode::LoadDependencyCycle;
        }
    };

    tracing::info!(order = ?order, "load order computed");
    shared.registry.borrow_mut().set_load_order(order.clone());

    for name in &order {
        instantiate(shared, name);
    }

    let main_instance = {
        let registry = shared.registry.borrow();
        registry
            .main_plugin()
            .and_then(|main| registry.get(main))
            .and_then(|record| record.instance.clone())
    };
    if let Some(instance) = main_instance {
        instance.borrow_mut().main_plugin_exec();
    }

    ReturnCode::Success
}

/// Targeted load. Dependencies must already be live; this entry point
/// does not load them transitively.
pub(crate) fn load_plugin(shared: &Rc<ManagerShared>, name: &str) -> bool {
    tracing::info!(plugin = %name, "loading plugin");
    {
        let mut registry = shared.registry.borrow_mut();
        match registry.get(name) {
            None => {
                tracing::error!(plugin = %name, "plugin not found");
                return false;
            }
            Some(record) if record.is_live() => {
                tracing::info!(plugin = %name, "plugin is already loaded");
                return true;
            }
            Some(_) => {}
        }

        let mut quiet = |_: ReturnCode, _: Option<&str>| {};
        let code = check_dependencies(&mut registry, name, &mut quiet);
        if !code.is_success() {
            tracing::error!(plugin = %name, result = %code, "unmet dependencies");
            return false;
        }
    }
    instantiate(shared, name)
}

/// Late registration: open a library, add it to the registry if new,
/// then load it like [`load_plugin`].
pub(crate) fn load_plugin_from_path(shared: &Rc<ManagerShared>, path: &Path) -> bool {
    let library = match SharedLibrary::load(path) {
        Ok(library) => library,
        Err(error) => {
            tracing::error!(path = %path.display(), %error, "failed to open plugin library");
            return false;
        }
    };
    let Some(name) = library.plugin_name() else {
        tracing::error!(path = %path.display(), "library does not export a plugin name");
        return false;
    };

    {
        let mut registry = shared.registry.borrow_mut();
        match registry.get(&name) {
            Some(record) if record.is_live() => {
                tracing::info!(plugin = %name, "plugin is already loaded");
                return true;
            }
            // Discovered earlier with its handle still open; load that.
            Some(record) if record.library.is_loaded() => {}
            // New, or left behind with a closed handle: (re)register.
            _ => {
                let metadata = match library
                    .metadata_bytes()
                    .ok_or(crate::error::MetadataError::NotUtf8)
                    .and_then(|bytes| PluginMetadata::from_embedded(&bytes))
                {
                    Ok(metadata) => metadata,
                    Err(error) => {
                        tracing::error!(plugin = %name, %error, "rejecting plugin metadata");
                        return false;
                    }
                };
                registry.insert(
                    name.clone(),
                    PluginRecord::new(path.to_path_buf(), library, metadata),
                );
            }
        }
    }
    load_plugin(shared, &name)
}

/// Bulk unload: reverse of the stored load order, then any stragglers,
/// then forget the search locations.
pub(crate) fn unload_plugins(shared: &Rc<ManagerShared>, callback: &mut ErrorCallback) -> ReturnCode {
    tracing::info!("unloading plugins");

    let order = shared.registry.borrow_mut().take_load_order();
    let mut all_unloaded = true;

    for name in order.iter().rev() {
        if !shared.registry.borrow().contains(name) {
            continue;
        }
        if !retire(shared, name) {
            all_unloaded = false;
        }
        shared.registry.borrow_mut().remove(name);
    }

    // Records that never made the load order: unresolved plugins and
    // leftovers from discovery.
    loop {
        let Some(name) = shared.registry.borrow().first_name() else {
            break;
        };
        if !retire(shared, &name) {
            all_unloaded = false;
        }
        shared.registry.borrow_mut().remove(&name);
    }

    shared.registry.borrow_mut().clear_locations();

    if all_unloaded {
        tracing::info!("all plugins unloaded");
        ReturnCode::Success
    } else {
        callback(ReturnCode::UnloadNotAll, None);
        ReturnCode::UnloadNotAll
    }
}

/// Targeted unload. Currently-loaded dependents are unloaded first,
/// recursively; the record is erased afterwards.
pub(crate) fn unload_plugin(shared: &Rc<ManagerShared>, name: &str) -> bool {
    let mut unloading = Vec::new();
    unload_plugin_inner(shared, name, &mut unloading)
}

fn unload_plugin_inner(
    shared: &Rc<ManagerShared>,
    name: &str,
    unloading: &mut Vec<String>,
) -> bool {
    tracing::info!(plugin = %name, "unloading plugin");
    {
        let registry = shared.registry.borrow();
        match registry.get(name) {
            None => {
                tracing::error!(plugin = %name, "plugin not found");
                return false;
            }
            Some(record) if !record.library.is_loaded() => {
                tracing::info!(plugin = %name, "plugin is not loaded");
                return false;
            }
            Some(_) => {}
        }
    }
    if unloading.iter().any(|seen| seen == name) {
        return true;
    }
    unloading.push(name.to_string());

    let dependents: Vec<String> = {
        let registry = shared.registry.borrow();
        registry
            .iter()
            .filter(|(other, record)| {
                other.as_str() != name
                    && record.library.is_loaded()
                    && record
                        .metadata
                        .dependencies
                        .iter()
                        .any(|dep| dep.name == name)
            })
            .map(|(other, _)| other.clone())
            .collect()
    };

    for dependent in dependents {
        if !unload_plugin_inner(shared, &dependent, unloading) {
            tracing::error!(plugin = %name, dependent = %dependent, "failed to unload dependent");
            return false;
        }
    }

    let closed = retire(shared, name);
    shared.registry.borrow_mut().remove(name);
    closed
}

/// Construct a plugin instance and call `loaded()`. Expects every
/// declared dependency to be live already.
fn instantiate(shared: &Rc<ManagerShared>, name: &str) -> bool {
    let (creator, dep_ptrs, is_main) = {
        let mut registry = shared.registry.borrow_mut();
        let Some(record) = registry.get_mut(name) else {
            return false;
        };
        if record.is_live() {
            return true;
        }

        let creator = match record.creator.or_else(|| record.library.create_fn()) {
            Some(creator) => creator,
            None => {
                tracing::error!(plugin = %name, "factory symbol unavailable");
                return false;
            }
        };
        record.creator = Some(creator);

        let dep_names: Vec<String> = record
            .metadata
            .dependencies
            .iter()
            .map(|dep| dep.name.clone())
            .collect();
        let is_main = record.is_main;

        let mut dep_ptrs: Vec<PluginPtr> = Vec::with_capacity(dep_names.len());
        for dep in &dep_names {
            let Some(instance) = registry.get(dep).and_then(|record| record.instance.clone())
            else {
                tracing::error!(plugin = %name, dependency = %dep, "dependency is not live");
                return false;
            };
            dep_ptrs.push(instance_ptr(&instance));
        }
        (creator, dep_ptrs, is_main)
    };

    // No registry borrow may be live here: the factory and `loaded()`
    // can call back into the broker.
    let raw = creator(
        broker::handle_request,
        broker::get_non_dep_plugin,
        dep_ptrs.as_ptr(),
        dep_ptrs.len() as c_int,
        is_main,
    );
    if raw.is_null() {
        tracing::error!(plugin = %name, "factory returned a null instance");
        return false;
    }
    // SAFETY: the factory contract hands us an owned, heap-allocated
    // instance.
    let instance: PluginInstance = Rc::new(RefCell::new(unsafe { Box::from_raw(raw) }));

    {
        let mut registry = shared.registry.borrow_mut();
        let Some(record) = registry.get_mut(name) else {
            return false;
        };
        record.instance = Some(instance.clone());
    }

    tracing::info!(plugin = %name, "plugin loaded");
    instance.borrow_mut().loaded();
    true
}

/// Stop an instance (if any) and close the library handle. The record
/// stays in the registry; callers erase it.
fn retire(shared: &Rc<ManagerShared>, name: &str) -> bool {
    let instance = {
        let mut registry = shared.registry.borrow_mut();
        match registry.get_mut(name) {
            Some(record) => record.instance.take(),
            None => return false,
        }
    };

    if let Some(instance) = instance {
        instance.borrow_mut().about_to_be_unloaded();
        if Rc::strong_count(&instance) > 1 {
            tracing::warn!(
                plugin = %name,
                "instance still referenced outside the registry at unload"
            );
        }
        // The instance's code lives in the library; it must go first.
        drop(instance);
    }

    let mut registry = shared.registry.borrow_mut();
    match registry.get_mut(name) {
        Some(record) => {
            let closed = record.library.unload();
            if closed {
                tracing::info!(plugin = %name, "plugin unloaded");
            } else {
                tracing::error!(plugin = %name, "library handle failed to close");
            }
            closed
        }
        None => false,
    }
}
