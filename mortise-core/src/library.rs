//! Thin wrapper over `libloading` with typed readers for the three
//! plugin symbols.
//!
//! A plugin binary exports:
//!
//! - `jp_name` - a data symbol holding a pointer to the NUL-terminated
//!   plugin name
//! - `jp_metadata` - the NUL-terminated metadata JSON bytes themselves
//! - `jp_createPlugin` - a data symbol holding the factory pointer
//!   bit-pattern
//!
//! The readers mirror that layout: name and factory are loads *through*
//! the symbol, metadata is read *at* the symbol.

use std::ffi::CStr;
use std::os::raw::c_char;
use std::path::Path;

use libloading::Library;

use mortise_plugin_api::CreateFn;

/// Symbol holding a pointer to the plugin name.
pub const NAME_SYMBOL: &[u8] = b"jp_name\0";
/// Symbol holding the metadata JSON bytes.
pub const METADATA_SYMBOL: &[u8] = b"jp_metadata\0";
/// Symbol holding the factory pointer.
pub const CREATE_SYMBOL: &[u8] = b"jp_createPlugin\0";

enum Inner {
    Closed,
    Open(Library),
    /// Test stand-in for code living in the host binary itself.
    #[cfg(test)]
    Resident,
}

/// An owned shared-library handle.
///
/// The handle stays open from discovery until the plugin is unloaded;
/// every symbol reader answers `None` once it is closed.
pub struct SharedLibrary(Inner);

impl SharedLibrary {
    /// Open the library at `path`.
    pub fn load(path: &Path) -> Result<Self, libloading::Error> {
        // SAFETY: loading a candidate plugin; its initializers run, which
        // is the documented trust model for plugin directories.
        let library = unsafe { Library::new(path) }?;
        Ok(Self(Inner::Open(library)))
    }

    /// A handle that reports loaded without backing code, for tests that
    /// wire factories directly.
    #[cfg(test)]
    pub fn resident() -> Self {
        Self(Inner::Resident)
    }

    pub fn is_loaded(&self) -> bool {
        !matches!(self.0, Inner::Closed)
    }

    /// Close the handle. Answers `false` when the underlying unload
    /// reported an error; the handle is gone either way.
    pub fn unload(&mut self) -> bool {
        match std::mem::replace(&mut self.0, Inner::Closed) {
            Inner::Closed => true,
            Inner::Open(library) => library.close().is_ok(),
            #[cfg(test)]
            Inner::Resident => true,
        }
    }

    pub fn has_symbol(&self, symbol: &[u8]) -> bool {
        match &self.0 {
            Inner::Open(library) => {
                // SAFETY: only the symbol's presence is checked.
                unsafe { library.get::<*mut std::ffi::c_void>(symbol) }.is_ok()
            }
            _ => false,
        }
    }

    /// Read the plugin name behind `jp_name`.
    pub fn plugin_name(&self) -> Option<String> {
        let Inner::Open(library) = &self.0 else {
            return None;
        };
        // SAFETY: `jp_name` is a data symbol holding a pointer to a
        // NUL-terminated string with the library's lifetime.
        unsafe {
            let symbol = library.get::<*const *const c_char>(NAME_SYMBOL).ok()?;
            let ptr: *const c_char = **symbol;
            if ptr.is_null() {
                return None;
            }
            Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
        }
    }

    /// Copy the metadata bytes behind `jp_metadata`, including the NUL.
    pub fn metadata_bytes(&self) -> Option<Vec<u8>> {
        let Inner::Open(library) = &self.0 else {
            return None;
        };
        // SAFETY: `jp_metadata` is the NUL-terminated byte array itself;
        // the symbol address is its first byte.
        unsafe {
            let symbol = library.get::<*const c_char>(METADATA_SYMBOL).ok()?;
            let start: *const c_char = *symbol;
            Some(CStr::from_ptr(start).to_bytes_with_nul().to_vec())
        }
    }

    /// Read the factory pointer behind `jp_createPlugin`.
    pub fn create_fn(&self) -> Option<CreateFn> {
        let Inner::Open(library) = &self.0 else {
            return None;
        };
        // SAFETY: `jp_createPlugin` is a data symbol whose stored value
        // is a `CreateFn` pointer, per the plugin binary contract.
        unsafe {
            let symbol = library.get::<*const CreateFn>(CREATE_SYMBOL).ok()?;
            let addr: *const CreateFn = *symbol;
            Some(*addr)
        }
    }
}

impl std::fmt::Debug for SharedLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.0 {
            Inner::Closed => "closed",
            Inner::Open(_) => "open",
            #[cfg(test)]
            Inner::Resident => "resident",
        };
        f.debug_tuple("SharedLibrary").field(&state).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_rejects_non_library_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fake.so");
        std::fs::write(&path, b"this is not an ELF file").unwrap();
        assert!(SharedLibrary::load(&path).is_err());
    }

    #[test]
    fn test_load_rejects_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(SharedLibrary::load(&dir.path().join("absent.so")).is_err());
    }

    #[test]
    fn test_resident_handle_state() {
        let mut library = SharedLibrary::resident();
        assert!(library.is_loaded());
        assert!(!library.has_symbol(NAME_SYMBOL));
        assert!(library.plugin_name().is_none());

        assert!(library.unload());
        assert!(!library.is_loaded());
        // A second unload is a no-op.
        assert!(library.unload());
    }
}
