//! Thin wrapper around platform shared-library loading.
//!
//! `DynLib` keeps the `libloading` handle optional so a record can outlive
//! its library: after an unload the path is retained and the library can be
//! reopened for a later load cycle.

use std::ffi::{CStr, c_char, c_void};
use std::path::{Path, PathBuf};

use libloading::Library;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DynLibError {
    #[error("failed to load library {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("symbol `{name}` not found: {source}")]
    Symbol {
        name: String,
        #[source]
        source: libloading::Error,
    },

    #[error("library {0} is not loaded")]
    NotLoaded(PathBuf),
}

/// A shared library handle bound to its on-disk path.
pub struct DynLib {
    // declared before nothing that depends on it; instances referencing
    // code from this library must be dropped before the handle
    lib: Option<Library>,
    path: PathBuf,
}

impl std::fmt::Debug for DynLib {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynLib")
            .field("path", &self.path)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl DynLib {
    /// Dynamically open the library at `path`.
    pub fn open(path: &Path) -> Result<Self, DynLibError> {
        // SAFETY: loading a shared object runs its initializers; plugin
        // paths come from directories the embedding application chose to
        // search.
        let lib = unsafe { Library::new(path) }.map_err(|source| DynLibError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            lib: Some(lib),
            path: path.to_path_buf(),
        })
    }

    /// A closed handle remembering only its path. Used for records whose
    /// library was released and may be reopened later.
    pub(crate) fn closed(path: &Path) -> Self {
        Self {
            lib: None,
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_loaded(&self) -> bool {
        self.lib.is_some()
    }

    /// Whether the library exports `name`. `name` must be NUL-terminated.
    pub fn has_symbol(&self, name: &[u8]) -> bool {
        let Some(lib) = &self.lib else {
            return false;
        };
        // SAFETY: only the symbol's presence is inspected.
        unsafe { lib.get::<*mut c_void>(name) }.is_ok()
    }

    /// Read an exported NUL-terminated string. The symbol address is the
    /// first byte of the buffer (`jp_name`, `jp_metadata`).
    ///
    /// # Safety
    ///
    /// The symbol must actually be a NUL-terminated buffer.
    pub unsafe fn cstr_symbol(&self, name: &[u8]) -> Result<&CStr, DynLibError> {
        let lib = self.lib.as_ref().ok_or(DynLibError::NotLoaded(self.path.clone()))?;
        // SAFETY: caller guarantees the symbol's shape; the returned CStr
        // borrows from the library, which `&self` keeps alive.
        unsafe {
            let symbol = lib
                .get::<*const c_char>(name)
                .map_err(|source| DynLibError::Symbol {
                    name: String::from_utf8_lossy(name).trim_end_matches('\0').to_string(),
                    source,
                })?;
            Ok(CStr::from_ptr(*symbol))
        }
    }

    /// Read the value stored at an exported data symbol (`jp_createPlugin`
    /// holds the constructor function pointer as its value).
    ///
    /// # Safety
    ///
    /// The symbol must be a data symbol holding a valid `T`.
    pub unsafe fn value_symbol<T: Copy>(&self, name: &[u8]) -> Result<T, DynLibError> {
        let lib = self.lib.as_ref().ok_or(DynLibError::NotLoaded(self.path.clone()))?;
        // SAFETY: caller guarantees the symbol's type.
        unsafe {
            let symbol = lib.get::<*const T>(name).map_err(|source| DynLibError::Symbol {
                name: String::from_utf8_lossy(name).trim_end_matches('\0').to_string(),
                source,
            })?;
            Ok(**symbol)
        }
    }

    /// Release the OS handle. Post-condition: `is_loaded()` is false.
    pub fn unload(&mut self) {
        if let Some(lib) = self.lib.take() {
            let _ = lib.close();
        }
    }
}
