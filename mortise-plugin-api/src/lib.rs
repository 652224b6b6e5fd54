//! mortise-plugin-api - Plugin API for the mortise plugin runtime
//!
//! This crate defines everything a plugin shares with the host: the
//! [`Plugin`] trait, the C-ABI function-pointer types handed to every
//! plugin at construction, the request/status [`codes`], the FFI-safe
//! [`PluginInfo`] record, and the [`register_plugin!`] macro that emits
//! the three exported symbols a plugin binary must carry.
//!
//! # Example
//!
//! ```ignore
//! use mortise_plugin_api::{Host, Plugin, register_plugin};
//!
//! pub struct MyPlugin {
//!     host: Host,
//! }
//!
//! impl From<Host> for MyPlugin {
//!     fn from(host: Host) -> Self {
//!         Self { host }
//!     }
//! }
//!
//! impl Plugin for MyPlugin {
//!     fn loaded(&mut self) {
//!         let api = self.host.plugin_api();
//!     }
//!
//!     fn about_to_be_unloaded(&mut self) {}
//! }
//!
//! register_plugin!(MyPlugin, "my_plugin", include_str!("../meta.json"));
//! ```

pub mod codes;
pub mod info;

pub use info::{PluginInfo, PluginInfoDependency, alloc_string, borrow_string, free_string, take_string};

use std::ffi::{CStr, c_void};
use std::os::raw::{c_char, c_int};

/// Host plugin API version, semver. Plugins whose metadata declares an
/// incompatible `api` are rejected during discovery. ABI compatibility is
/// only guaranteed within the same major version.
pub const PLUGIN_API: &str = "1.0.0";

/// Raw pointer to a live plugin instance as it crosses the ABI.
pub type PluginPtr = *mut dyn Plugin;

/// Manager request entry point handed to every plugin.
///
/// `sender` is the calling plugin's name; `data` points to the request
/// payload slot (input and answer); `data_size` receives the answer
/// length. Returns a status code from [`codes`].
pub type RequestFn =
    extern "C" fn(sender: *const c_char, code: u16, data: *mut *mut c_void, data_size: *mut u32) -> u16;

/// Privileged cross-plugin lookup handed to every plugin.
///
/// Returns the named plugin's live instance if the sender is the
/// registered main plugin and the target is loaded, otherwise a null
/// [`PluginPtr`].
pub type GetNonDepFn = extern "C" fn(sender: *const c_char, plugin_name: *const c_char) -> PluginPtr;

/// Factory signature stored behind the `jp_createPlugin` symbol.
///
/// `deps` points to `dep_count` live instances, one per declared
/// dependency, in metadata order. They stay valid until the plugin's
/// [`Plugin::about_to_be_unloaded`] returns.
pub type CreateFn = extern "C" fn(
    request: RequestFn,
    get_non_dep: GetNonDepFn,
    deps: *const PluginPtr,
    dep_count: c_int,
    is_main: bool,
) -> PluginPtr;

/// The core plugin trait.
///
/// A plugin is LIVE between `loaded()` returning and
/// `about_to_be_unloaded()` being invoked; only then may it service
/// requests. Dependencies are live for that whole window.
pub trait Plugin {
    /// Called by the manager once the plugin is constructed and all its
    /// dependencies have finished their own `loaded()`.
    fn loaded(&mut self);

    /// Called just before the instance is dropped and the library
    /// unloaded. Dependencies remain valid until this returns.
    fn about_to_be_unloaded(&mut self);

    /// Handle a request sent by another plugin.
    fn handle_request(
        &mut self,
        sender: &CStr,
        code: u16,
        data: *mut *mut c_void,
        data_size: *mut u32,
    ) -> u16 {
        let _ = (sender, code, data, data_size);
        codes::UNKNOWN_REQUEST
    }

    /// Entry point of the registered main plugin, invoked once after
    /// every plugin's `loaded()` has returned. No-op for ordinary
    /// plugins.
    fn main_plugin_exec(&mut self) {}
}

/// A null [`PluginPtr`], the "no such plugin" answer of
/// [`GetNonDepFn`].
pub fn null_plugin() -> PluginPtr {
    struct NullPlugin;
    impl Plugin for NullPlugin {
        fn loaded(&mut self) {}
        fn about_to_be_unloaded(&mut self) {}
    }
    std::ptr::null_mut::<NullPlugin>() as PluginPtr
}

/// Everything the manager hands a plugin at construction, in borrowable
/// form. Built by the [`register_plugin!`] factory and typically stored
/// as a field of the plugin struct.
pub struct Host {
    name: &'static CStr,
    request: RequestFn,
    get_non_dep: GetNonDepFn,
    dependencies: Vec<PluginPtr>,
    is_main: bool,
}

impl Host {
    /// Assemble a host handle from the raw factory arguments.
    ///
    /// # Safety
    /// `deps` must point to `dep_count` valid [`PluginPtr`] entries (or
    /// be null with `dep_count == 0`), as passed by the manager.
    pub unsafe fn from_raw(
        name: &'static CStr,
        request: RequestFn,
        get_non_dep: GetNonDepFn,
        deps: *const PluginPtr,
        dep_count: c_int,
        is_main: bool,
    ) -> Self {
        let dependencies = if deps.is_null() || dep_count <= 0 {
            Vec::new()
        } else {
            unsafe { std::slice::from_raw_parts(deps, dep_count as usize) }.to_vec()
        };
        Self {
            name,
            request,
            get_non_dep,
            dependencies,
            is_main,
        }
    }

    /// This plugin's name, as declared to [`register_plugin!`].
    pub fn name(&self) -> &CStr {
        self.name
    }

    /// Whether this plugin was registered as the main plugin.
    pub fn is_main(&self) -> bool {
        self.is_main
    }

    /// Live instances of the declared dependencies, in metadata order.
    pub fn dependencies(&self) -> &[PluginPtr] {
        &self.dependencies
    }

    /// Send a raw request to the manager.
    pub fn send_request(&self, code: u16, data: *mut *mut c_void, data_size: *mut u32) -> u16 {
        (self.request)(self.name.as_ptr(), code, data, data_size)
    }

    /// Look up a non-dependency plugin. Answers null unless this plugin
    /// is the main plugin and the target is loaded.
    pub fn non_dep_plugin(&self, name: &CStr) -> PluginPtr {
        (self.get_non_dep)(self.name.as_ptr(), name.as_ptr())
    }

    /// Request a string answer (`GET_APPDIRECTORY`, `GET_PLUGINAPI`,
    /// `GET_PLUGINVERSION`). `target` selects another plugin where the
    /// request supports it; `None` means the sender itself.
    pub fn request_string(&self, code: u16, target: Option<&CStr>) -> Option<String> {
        let mut data: *mut c_void = match target {
            Some(t) => t.as_ptr() as *mut c_void,
            None => std::ptr::null_mut(),
        };
        let mut size: u32 = 0;
        if self.send_request(code, &mut data, &mut size) != codes::SUCCESS {
            return None;
        }
        // SAFETY: on SUCCESS the manager stored an owned string answer.
        unsafe { take_string(data as *mut c_char) }
    }

    /// The host executable's directory.
    pub fn app_directory(&self) -> Option<String> {
        self.request_string(codes::GET_APPDIRECTORY, None)
    }

    /// The host's plugin API version string.
    pub fn plugin_api(&self) -> Option<String> {
        self.request_string(codes::GET_PLUGINAPI, None)
    }

    /// How many plugins the registry currently holds.
    pub fn plugins_count(&self) -> Option<usize> {
        let mut data: *mut c_void = std::ptr::null_mut();
        let mut size: u32 = 0;
        if self.send_request(codes::GET_PLUGINSCOUNT, &mut data, &mut size) != codes::SUCCESS {
            return None;
        }
        if data.is_null() {
            return None;
        }
        // SAFETY: on SUCCESS the manager stored an owned `usize` answer.
        Some(*unsafe { Box::from_raw(data as *mut usize) })
    }

    /// Full info record for `target`, or the sender itself when `None`.
    pub fn plugin_info(&self, target: Option<&CStr>) -> Option<Box<PluginInfo>> {
        let mut data: *mut c_void = match target {
            Some(t) => t.as_ptr() as *mut c_void,
            None => std::ptr::null_mut(),
        };
        let mut size: u32 = 0;
        if self.send_request(codes::GET_PLUGININFO, &mut data, &mut size) != codes::SUCCESS {
            return None;
        }
        if data.is_null() {
            return None;
        }
        // SAFETY: on SUCCESS the manager stored an owned `PluginInfo`.
        Some(unsafe { Box::from_raw(data as *mut PluginInfo) })
    }

    /// Whether the registry knows a plugin by this name.
    pub fn plugin_exists(&self, name: &CStr) -> bool {
        let mut data = name.as_ptr() as *mut c_void;
        let mut size: u32 = 0;
        self.send_request(codes::CHECK_PLUGIN, &mut data, &mut size) == codes::RESULT_TRUE
    }

    /// Whether the named plugin is currently loaded.
    pub fn plugin_loaded(&self, name: &CStr) -> bool {
        let mut data = name.as_ptr() as *mut c_void;
        let mut size: u32 = 0;
        self.send_request(codes::CHECK_PLUGINLOADED, &mut data, &mut size) == codes::RESULT_TRUE
    }
}

/// `*const c_char` wrapper so a pointer-valued symbol can be a static.
#[repr(transparent)]
pub struct CStrPtr(pub *const c_char);
// SAFETY: points to an immutable static string; never written.
unsafe impl Sync for CStrPtr {}

/// [`CreateFn`] wrapper so a function-pointer-valued symbol can be a
/// static whose bit-pattern is the factory address.
#[repr(transparent)]
pub struct CreateFnPtr(pub CreateFn);
// SAFETY: plain function pointer, immutable.
unsafe impl Sync for CreateFnPtr {}

/// Compile-time check used by [`register_plugin!`]: a plugin name is a C
/// identifier (`[A-Za-z_][A-Za-z0-9_]*`).
pub const fn is_valid_plugin_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.is_empty() {
        return false;
    }
    if !(bytes[0].is_ascii_alphabetic() || bytes[0] == b'_') {
        return false;
    }
    let mut i = 1;
    while i < bytes.len() {
        if !(bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
            return false;
        }
        i += 1;
    }
    true
}

/// Copy `s` into a NUL-terminated byte array. `N` must be
/// `s.len() + 1`; used by [`register_plugin!`] to emit the metadata
/// symbol.
pub const fn nul_terminated<const N: usize>(s: &str) -> [u8; N] {
    let bytes = s.as_bytes();
    assert!(bytes.len() + 1 == N, "array must be string length plus NUL");
    let mut out = [0u8; N];
    let mut i = 0;
    while i < bytes.len() {
        out[i] = bytes[i];
        i += 1;
    }
    out
}

/// Export a plugin type for dynamic loading.
///
/// Emits the three symbols the host looks for:
///
/// - `jp_name`: pointer to the NUL-terminated plugin name
/// - `jp_metadata`: the NUL-terminated metadata JSON bytes
/// - `jp_createPlugin`: the factory pointer
///
/// The plugin type must implement [`Plugin`] and `From<Host>`. `$name`
/// must be a C-identifier string literal matching the `name` field of
/// the metadata JSON; it is checked at compile time.
#[macro_export]
macro_rules! register_plugin {
    ($plugin_type:ty, $name:literal, $metadata:expr) => {
        const _: () = assert!(
            $crate::is_valid_plugin_name($name),
            "plugin name must contain only letters, digits and '_', and not start with a digit",
        );

        const __MORTISE_PLUGIN_NAME: &::std::ffi::CStr =
            match ::std::ffi::CStr::from_bytes_with_nul(concat!($name, "\0").as_bytes()) {
                Ok(name) => name,
                Err(_) => panic!("plugin name must not contain NUL bytes"),
            };

        #[unsafe(no_mangle)]
        pub static jp_name: $crate::CStrPtr = $crate::CStrPtr(__MORTISE_PLUGIN_NAME.as_ptr());

        #[unsafe(no_mangle)]
        pub static jp_metadata: [u8; $metadata.len() + 1] = $crate::nul_terminated($metadata);

        #[unsafe(no_mangle)]
        pub static jp_createPlugin: $crate::CreateFnPtr = $crate::CreateFnPtr(__mortise_create);

        #[allow(improper_ctypes_definitions)]
        extern "C" fn __mortise_create(
            request: $crate::RequestFn,
            get_non_dep: $crate::GetNonDepFn,
            deps: *const $crate::PluginPtr,
            dep_count: ::std::os::raw::c_int,
            is_main: bool,
        ) -> $crate::PluginPtr {
            // SAFETY: the manager passes `dep_count` valid dependency
            // instances.
            let host = unsafe {
                $crate::Host::from_raw(
                    __MORTISE_PLUGIN_NAME,
                    request,
                    get_non_dep,
                    deps,
                    dep_count,
                    is_main,
                )
            };
            let plugin: ::std::boxed::Box<dyn $crate::Plugin> =
                ::std::boxed::Box::new(<$plugin_type as ::std::convert::From<$crate::Host>>::from(
                    host,
                ));
            ::std::boxed::Box::into_raw(plugin)
        }
    };
}
