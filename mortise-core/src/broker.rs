//! Static request entry points handed to every plugin.
//!
//! Plugins receive two C-ABI function pointers at construction: one for
//! manager requests and one for the main plugin's privileged lookup of
//! non-dependency plugins. Both reach the facade through a thread-local
//! handle the manager registers on construction; orchestration is
//! single-threaded, so the handle is the thread that drove the load.
//!
//! Answers that carry payloads are allocations from the host's global
//! allocator; receivers release them with the
//! `mortise_plugin_api::take_string` / `PluginInfo::free` helpers.

use std::cell::RefCell;
use std::ffi::{CStr, c_void};
use std::os::raw::c_char;
use std::rc::{Rc, Weak};

use mortise_plugin_api::{PluginInfo, PluginPtr, alloc_string, codes, null_plugin};

use crate::manager::ManagerShared;
use crate::paths;
use crate::record::instance_ptr;

thread_local! {
    static CURRENT: RefCell<Weak<ManagerShared>> = RefCell::new(Weak::new());
}

/// Make `shared` the manager serviced by this thread's broker entry
/// points. The most recently constructed manager wins.
pub(crate) fn set_current(shared: &Rc<ManagerShared>) {
    CURRENT.with(|current| *current.borrow_mut() = Rc::downgrade(shared));
}

/// Drop the broker registration, if `shared` still holds it.
pub(crate) fn clear_current(shared: &Rc<ManagerShared>) {
    CURRENT.with(|current| {
        let mut slot = current.borrow_mut();
        if slot.upgrade().is_some_and(|live| Rc::ptr_eq(&live, shared)) {
            *slot = Weak::new();
        }
    });
}

fn with_current<R>(f: impl FnOnce(&ManagerShared) -> R) -> Option<R> {
    let shared = CURRENT.with(|current| current.borrow().upgrade())?;
    Some(f(&shared))
}

/// SAFETY: `ptr` must be null or a valid NUL-terminated string.
unsafe fn read_name(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

/// Manager request entry point passed to every plugin.
pub(crate) extern "C" fn handle_request(
    sender: *const c_char,
    code: u16,
    data: *mut *mut c_void,
    data_size: *mut u32,
) -> u16 {
    // Every recognized request reads or writes through these slots.
    if data.is_null() || data_size.is_null() {
        return codes::DATASIZE_NULL;
    }
    // SAFETY: the sender pointer is the NUL-terminated name the manager
    // handed the plugin at construction.
    let Some(sender) = (unsafe { read_name(sender) }) else {
        return codes::NOT_FOUND;
    };
    tracing::debug!(sender = %sender, code, "plugin request");

    with_current(|shared| dispatch(shared, &sender, code, data, data_size))
        .unwrap_or(codes::NOT_FOUND)
}

fn dispatch(
    shared: &ManagerShared,
    sender: &str,
    code: u16,
    data: *mut *mut c_void,
    data_size: *mut u32,
) -> u16 {
    match code {
        codes::GET_APPDIRECTORY => {
            let dir = paths::app_directory()
                .map(|dir| dir.display().to_string())
                .unwrap_or_default();
            // SAFETY: slots checked non-null by the caller.
            unsafe { answer_string(&dir, data, data_size) }
        }
        codes::GET_PLUGINAPI => {
            // SAFETY: slots checked non-null by the caller.
            unsafe { answer_string(mortise_plugin_api::PLUGIN_API, data, data_size) }
        }
        codes::GET_PLUGINSCOUNT => {
            let count = shared.registry.borrow().len();
            // SAFETY: slots checked non-null by the caller.
            unsafe {
                *data = Box::into_raw(Box::new(count)) as *mut c_void;
                *data_size = 1;
            }
            codes::SUCCESS
        }
        codes::GET_PLUGININFO => {
            // SAFETY: a non-null input slot names the target plugin.
            let target = unsafe { target_name(sender, data) };
            let registry = shared.registry.borrow();
            let Some(record) = registry.get(&target) else {
                return codes::NOT_FOUND;
            };
            let metadata = &record.metadata;
            let dependencies: Vec<(String, String)> = metadata
                .dependencies
                .iter()
                .map(|dep| (dep.name.clone(), dep.min_version.to_string()))
                .collect();
            let info = PluginInfo::from_parts(
                &metadata.name,
                &metadata.pretty_name,
                &metadata.version.to_string(),
                &metadata.author,
                &metadata.url,
                &metadata.license,
                &metadata.copyright,
                dependencies.iter().map(|(name, min)| (name.as_str(), min.as_str())),
            );
            // SAFETY: slots checked non-null by the caller.
            unsafe {
                *data = Box::into_raw(Box::new(info)) as *mut c_void;
                *data_size = 1;
            }
            codes::SUCCESS
        }
        codes::GET_PLUGINVERSION => {
            // SAFETY: a non-null input slot names the target plugin.
            let target = unsafe { target_name(sender, data) };
            let version = {
                let registry = shared.registry.borrow();
                match registry.get(&target) {
                    Some(record) => record.metadata.version.to_string(),
                    None => return codes::NOT_FOUND,
                }
            };
            // SAFETY: slots checked non-null by the caller.
            unsafe { answer_string(&version, data, data_size) }
        }
        codes::CHECK_PLUGIN => {
            // SAFETY: the input slot names the plugin to test.
            match unsafe { input_name(data) } {
                Some(name) if shared.registry.borrow().contains(&name) => codes::RESULT_TRUE,
                _ => codes::RESULT_FALSE,
            }
        }
        codes::CHECK_PLUGINLOADED => {
            // SAFETY: the input slot names the plugin to test.
            match unsafe { input_name(data) } {
                Some(name)
                    if shared
                        .registry
                        .borrow()
                        .get(&name)
                        .is_some_and(|record| record.is_live()) =>
                {
                    codes::RESULT_TRUE
                }
                _ => codes::RESULT_FALSE,
            }
        }
        _ => codes::UNKNOWN_REQUEST,
    }
}

/// SAFETY: `data` must be a valid slot; a non-null payload must be a
/// NUL-terminated string.
unsafe fn input_name(data: *mut *mut c_void) -> Option<String> {
    unsafe { read_name(*data as *const c_char) }
}

/// Target selection for info requests: the payload names another
/// plugin, a null payload means the sender itself.
///
/// SAFETY: as for [`input_name`].
unsafe fn target_name(sender: &str, data: *mut *mut c_void) -> String {
    unsafe { input_name(data) }.unwrap_or_else(|| sender.to_string())
}

/// SAFETY: both slots must be valid to write.
unsafe fn answer_string(s: &str, data: *mut *mut c_void, data_size: *mut u32) -> u16 {
    unsafe {
        *data = alloc_string(s) as *mut c_void;
        *data_size = s.len() as u32;
    }
    codes::SUCCESS
}

/// Privileged lookup entry point: the main plugin may reach any LIVE
/// plugin; everyone else gets null. An unknown sender also answers null
/// rather than trusting the caller.
#[allow(improper_ctypes_definitions)]
pub(crate) extern "C" fn get_non_dep_plugin(
    sender: *const c_char,
    plugin_name: *const c_char,
) -> PluginPtr {
    with_current(|shared| {
        // SAFETY: both pointers are NUL-terminated names per the ABI.
        let (Some(sender), Some(target)) =
            (unsafe { read_name(sender) }, unsafe { read_name(plugin_name) })
        else {
            return null_plugin();
        };

        let registry = shared.registry.borrow();
        let Some(sender_record) = registry.get(&sender) else {
            return null_plugin();
        };
        if !sender_record.is_main {
            return null_plugin();
        }

        match registry.get(&target) {
            Some(record) if record.is_live() => {
                tracing::debug!(main = %sender, plugin = %target, "main plugin instance lookup");
                match &record.instance {
                    Some(instance) => instance_ptr(instance),
                    None => null_plugin(),
                }
            }
            _ => null_plugin(),
        }
    })
    .unwrap_or_else(null_plugin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::PluginManager;
    use crate::testutil::{self, NoopA, NoopB, NoopM, NoopX};
    use mortise_plugin_api::take_string;
    use std::ffi::CString;

    fn request(sender: &CStr, code: u16, payload: Option<&CStr>) -> (u16, *mut c_void, u32) {
        let mut data: *mut c_void = match payload {
            Some(p) => p.as_ptr() as *mut c_void,
            None => std::ptr::null_mut(),
        };
        let mut size: u32 = 0;
        let status = handle_request(sender.as_ptr(), code, &mut data, &mut size);
        (status, data, size)
    }

    fn manager_with_loaded_a() -> PluginManager {
        let manager = PluginManager::new();
        testutil::install::<NoopA>(&manager, "1.4.0", &[]);
        testutil::install::<NoopB>(&manager, "1.0.0", &[("A", "1.0.0")]);
        assert!(manager.load_plugins(true, None).is_success());
        manager
    }

    #[test]
    fn test_datasize_null_guard() {
        let _manager = manager_with_loaded_a();
        let sender = CString::new("A").unwrap();
        let status = handle_request(
            sender.as_ptr(),
            codes::GET_PLUGINAPI,
            &mut std::ptr::null_mut(),
            std::ptr::null_mut(),
        );
        assert_eq!(status, codes::DATASIZE_NULL);
    }

    #[test]
    fn test_no_manager_on_thread() {
        let sender = CString::new("A").unwrap();
        let (status, _, _) = request(&sender, codes::GET_PLUGINAPI, None);
        assert_eq!(status, codes::NOT_FOUND);
    }

    #[test]
    fn test_get_plugin_api() {
        let _manager = manager_with_loaded_a();
        let (status, data, size) = request(c"A", codes::GET_PLUGINAPI, None);
        assert_eq!(status, codes::SUCCESS);
        let api = unsafe { take_string(data as *mut c_char) }.unwrap();
        assert_eq!(api, mortise_plugin_api::PLUGIN_API);
        assert_eq!(size as usize, api.len());
    }

    #[test]
    fn test_get_app_directory() {
        let _manager = manager_with_loaded_a();
        let (status, data, _) = request(c"A", codes::GET_APPDIRECTORY, None);
        assert_eq!(status, codes::SUCCESS);
        let dir = unsafe { take_string(data as *mut c_char) }.unwrap();
        assert!(!dir.is_empty());
    }

    #[test]
    fn test_get_plugins_count() {
        let _manager = manager_with_loaded_a();
        let (status, data, size) = request(c"A", codes::GET_PLUGINSCOUNT, None);
        assert_eq!(status, codes::SUCCESS);
        assert_eq!(size, 1);
        let count = unsafe { Box::from_raw(data as *mut usize) };
        assert_eq!(*count, 2);
    }

    #[test]
    fn test_get_plugin_info_defaults_to_sender() {
        let _manager = manager_with_loaded_a();
        let (status, data, size) = request(c"B", codes::GET_PLUGININFO, None);
        assert_eq!(status, codes::SUCCESS);
        assert_eq!(size, 1);
        let info = unsafe { Box::from_raw(data as *mut PluginInfo) };
        assert_eq!(
            unsafe { mortise_plugin_api::borrow_string(info.name) }.as_deref(),
            Some("B")
        );
        assert_eq!(info.dependencies_len, 1);
    }

    #[test]
    fn test_get_plugin_info_unknown_target() {
        let _manager = manager_with_loaded_a();
        let (status, _, _) = request(c"A", codes::GET_PLUGININFO, Some(c"ghost"));
        assert_eq!(status, codes::NOT_FOUND);
    }

    #[test]
    fn test_get_plugin_version_of_target() {
        let _manager = manager_with_loaded_a();
        let (status, data, _) = request(c"B", codes::GET_PLUGINVERSION, Some(c"A"));
        assert_eq!(status, codes::SUCCESS);
        let version = unsafe { take_string(data as *mut c_char) }.unwrap();
        assert_eq!(version, "1.4.0");
    }

    #[test]
    fn test_check_plugin() {
        let _manager = manager_with_loaded_a();
        let (status, _, _) = request(c"A", codes::CHECK_PLUGIN, Some(c"B"));
        assert_eq!(status, codes::RESULT_TRUE);
        let (status, _, _) = request(c"A", codes::CHECK_PLUGIN, Some(c"ghost"));
        assert_eq!(status, codes::RESULT_FALSE);
    }

    #[test]
    fn test_check_plugin_loaded_tracks_liveness() {
        let manager = PluginManager::new();
        testutil::install::<NoopA>(&manager, "1.0.0", &[]);
        let (status, _, _) = request(c"A", codes::CHECK_PLUGINLOADED, Some(c"A"));
        assert_eq!(status, codes::RESULT_FALSE);

        assert!(manager.load_plugins(true, None).is_success());
        let (status, _, _) = request(c"A", codes::CHECK_PLUGINLOADED, Some(c"A"));
        assert_eq!(status, codes::RESULT_TRUE);
    }

    #[test]
    fn test_unknown_request_code() {
        let _manager = manager_with_loaded_a();
        let (status, _, _) = request(c"A", codes::USER_BASE + 7, None);
        assert_eq!(status, codes::UNKNOWN_REQUEST);
    }

    #[test]
    fn test_main_plugin_reaches_non_dependency() {
        let manager = PluginManager::new();
        testutil::install::<NoopM>(&manager, "1.0.0", &[]);
        testutil::install::<NoopX>(&manager, "1.0.0", &[]);
        assert!(manager.register_main_plugin("M").is_success());
        assert!(manager.load_plugins(true, None).is_success());

        let from_main = get_non_dep_plugin(c"M".as_ptr(), c"X".as_ptr());
        assert!(!from_main.is_null());
    }

    #[test]
    fn test_non_main_plugin_gets_null() {
        let manager = PluginManager::new();
        testutil::install::<NoopM>(&manager, "1.0.0", &[]);
        testutil::install::<NoopX>(&manager, "1.0.0", &[]);
        assert!(manager.register_main_plugin("M").is_success());
        assert!(manager.load_plugins(true, None).is_success());

        let from_ordinary = get_non_dep_plugin(c"X".as_ptr(), c"M".as_ptr());
        assert!(from_ordinary.is_null());
    }

    #[test]
    fn test_unknown_sender_gets_null() {
        let manager = PluginManager::new();
        testutil::install::<NoopM>(&manager, "1.0.0", &[]);
        assert!(manager.register_main_plugin("M").is_success());
        assert!(manager.load_plugins(true, None).is_success());

        let answer = get_non_dep_plugin(c"ghost".as_ptr(), c"M".as_ptr());
        assert!(answer.is_null());
    }

    #[test]
    fn test_target_must_be_live() {
        let manager = PluginManager::new();
        testutil::install::<NoopM>(&manager, "1.0.0", &[]);
        testutil::install::<NoopX>(&manager, "1.0.0", &[]);
        assert!(manager.register_main_plugin("M").is_success());
        // X is discovered but never loaded.
        assert!(manager.load_plugin("M"));

        let answer = get_non_dep_plugin(c"M".as_ptr(), c"X".as_ptr());
        assert!(answer.is_null());
    }

    #[test]
    fn test_registry_drained_after_bulk_unload() {
        let manager = manager_with_loaded_a();
        assert!(manager.unload_plugins(None).is_success());
        let (status, data, _) = request(c"A", codes::GET_PLUGINSCOUNT, None);
        assert_eq!(status, codes::SUCCESS);
        let count = unsafe { Box::from_raw(data as *mut usize) };
        assert_eq!(*count, 0);
    }
}
