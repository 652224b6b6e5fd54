//! FFI-safe plugin info records returned by `GET_PLUGININFO`.
//!
//! These structs cross the plugin ABI, so they are plain C layouts of
//! owned, NUL-terminated strings. The host allocates them with the
//! process-global Rust allocator; receivers release them either by
//! letting a reconstructed `Box` drop ([`PluginInfo::free`]) or through
//! [`take_string`] for bare string answers. Plugins built against a
//! different allocator must not free these directly.

use std::ffi::{CStr, CString};
use std::fmt;
use std::os::raw::c_char;

/// One dependency entry of a plugin info record.
#[repr(C)]
pub struct PluginInfoDependency {
    /// Depended-on plugin name.
    pub name: *mut c_char,
    /// Minimum required version.
    pub min_version: *mut c_char,
}

/// Full plugin metadata as exposed over the request protocol.
///
/// Every string field is an owned, NUL-terminated allocation. Dropping
/// the struct releases all of them.
#[repr(C)]
pub struct PluginInfo {
    pub name: *mut c_char,
    pub pretty_name: *mut c_char,
    pub version: *mut c_char,
    pub author: *mut c_char,
    pub url: *mut c_char,
    pub license: *mut c_char,
    pub copyright: *mut c_char,
    /// Owned array of `dependencies_len` entries, or null when empty.
    pub dependencies: *mut PluginInfoDependency,
    pub dependencies_len: u32,
}

impl PluginInfo {
    /// Build an owned info record from borrowed parts.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts<'a>(
        name: &str,
        pretty_name: &str,
        version: &str,
        author: &str,
        url: &str,
        license: &str,
        copyright: &str,
        dependencies: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        let deps: Vec<PluginInfoDependency> = dependencies
            .into_iter()
            .map(|(name, min_version)| PluginInfoDependency {
                name: alloc_string(name),
                min_version: alloc_string(min_version),
            })
            .collect();
        let dependencies_len = deps.len() as u32;
        let dependencies = if deps.is_empty() {
            std::ptr::null_mut()
        } else {
            Box::into_raw(deps.into_boxed_slice()) as *mut PluginInfoDependency
        };

        Self {
            name: alloc_string(name),
            pretty_name: alloc_string(pretty_name),
            version: alloc_string(version),
            author: alloc_string(author),
            url: alloc_string(url),
            license: alloc_string(license),
            copyright: alloc_string(copyright),
            dependencies,
            dependencies_len,
        }
    }

    /// Borrow the dependency entries.
    pub fn dependencies(&self) -> &[PluginInfoDependency] {
        if self.dependencies.is_null() {
            return &[];
        }
        // SAFETY: `dependencies` was produced by `from_parts` from a boxed
        // slice of exactly `dependencies_len` entries.
        unsafe { std::slice::from_raw_parts(self.dependencies, self.dependencies_len as usize) }
    }

    /// Release a heap info record previously handed across the ABI.
    ///
    /// # Safety
    /// `ptr` must come from `Box::into_raw` on a [`PluginInfo`] allocated
    /// by this crate, and must not be used afterwards.
    pub unsafe fn free(ptr: *mut PluginInfo) {
        if !ptr.is_null() {
            drop(unsafe { Box::from_raw(ptr) });
        }
    }
}

impl Drop for PluginInfo {
    fn drop(&mut self) {
        // SAFETY: all fields were allocated by `from_parts` and are only
        // released here.
        unsafe {
            free_string(self.name);
            free_string(self.pretty_name);
            free_string(self.version);
            free_string(self.author);
            free_string(self.url);
            free_string(self.license);
            free_string(self.copyright);
            if !self.dependencies.is_null() {
                let deps = Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                    self.dependencies,
                    self.dependencies_len as usize,
                ));
                for dep in deps.iter() {
                    free_string(dep.name);
                    free_string(dep.min_version);
                }
            }
        }
    }
}

impl fmt::Debug for PluginInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn field(ptr: *const c_char) -> String {
            // SAFETY: fields are NUL-terminated allocations or null.
            unsafe { borrow_string(ptr) }.unwrap_or_default()
        }
        f.debug_struct("PluginInfo")
            .field("name", &field(self.name))
            .field("version", &field(self.version))
            .field("dependencies_len", &self.dependencies_len)
            .finish_non_exhaustive()
    }
}

/// Copy a string into an owned, NUL-terminated ABI allocation.
///
/// Interior NUL bytes are truncated at the first NUL.
pub fn alloc_string(s: &str) -> *mut c_char {
    let s = match s.find('\0') {
        Some(idx) => &s[..idx],
        None => s,
    };
    CString::new(s).expect("NUL bytes stripped above").into_raw()
}

/// Release a string produced by [`alloc_string`].
///
/// # Safety
/// `ptr` must be null or come from [`alloc_string`] (or the host's
/// request answers), and must not be used afterwards.
pub unsafe fn free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(unsafe { CString::from_raw(ptr) });
    }
}

/// Take ownership of a string answer, releasing the allocation.
///
/// # Safety
/// Same contract as [`free_string`].
pub unsafe fn take_string(ptr: *mut c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    let s = unsafe { CString::from_raw(ptr) };
    Some(s.to_string_lossy().into_owned())
}

/// Borrow a NUL-terminated string without taking ownership.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string valid for the
/// duration of the call.
pub unsafe fn borrow_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_take_roundtrip() {
        let ptr = alloc_string("hello");
        let back = unsafe { take_string(ptr) };
        assert_eq!(back.as_deref(), Some("hello"));
    }

    #[test]
    fn test_alloc_string_truncates_interior_nul() {
        let ptr = alloc_string("ab\0cd");
        let back = unsafe { take_string(ptr) };
        assert_eq!(back.as_deref(), Some("ab"));
    }

    #[test]
    fn test_take_string_null() {
        assert_eq!(unsafe { take_string(std::ptr::null_mut()) }, None);
    }

    #[test]
    fn test_info_from_parts_and_free() {
        let info = PluginInfo::from_parts(
            "engine",
            "Engine",
            "1.2.3",
            "someone",
            "https://example.org",
            "MIT",
            "(c) someone",
            [("base", "1.0.0"), ("codec", "0.3.0")],
        );

        assert_eq!(unsafe { borrow_string(info.name) }.as_deref(), Some("engine"));
        assert_eq!(info.dependencies_len, 2);
        let deps = info.dependencies();
        assert_eq!(unsafe { borrow_string(deps[1].name) }.as_deref(), Some("codec"));

        let boxed = Box::into_raw(Box::new(info));
        unsafe { PluginInfo::free(boxed) };
    }

    #[test]
    fn test_info_empty_dependencies() {
        let info = PluginInfo::from_parts("a", "A", "0.1.0", "", "", "", "", []);
        assert!(info.dependencies.is_null());
        assert!(info.dependencies().is_empty());
    }

    #[test]
    fn test_free_null_info_is_noop() {
        unsafe { PluginInfo::free(std::ptr::null_mut()) };
    }
}
