//! C-layout plugin metadata handed across the broker boundary.

use std::ffi::{CStr, CString, c_char};

/// A single dependency entry inside a [`PluginInfo`].
#[repr(C)]
#[derive(Debug)]
pub struct DependencyInfo {
    pub name: *mut c_char,
    pub version: *mut c_char,
}

/// Plugin metadata in C layout, as answered to `GET_PLUGININFO`.
///
/// Every string field is an owned, NUL-terminated allocation made by the
/// host; the whole structure must be handed back through the `FREE_RESULT`
/// request (or [`PluginInfo::free`] on the host side) exactly once.
#[repr(C)]
#[derive(Debug)]
pub struct PluginInfo {
    pub name: *mut c_char,
    pub pretty_name: *mut c_char,
    pub version: *mut c_char,
    pub author: *mut c_char,
    pub url: *mut c_char,
    pub license: *mut c_char,
    pub copyright: *mut c_char,
    pub dependencies: *mut DependencyInfo,
    pub dependencies_len: usize,
}

fn owned_c_string(s: &str) -> *mut c_char {
    CString::new(s).unwrap_or_default().into_raw()
}

impl PluginInfo {
    /// Build an owned `PluginInfo` from borrowed string parts.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        name: &str,
        pretty_name: &str,
        version: &str,
        author: &str,
        url: &str,
        license: &str,
        copyright: &str,
        dependencies: &[(&str, &str)],
    ) -> Box<PluginInfo> {
        let deps: Vec<DependencyInfo> = dependencies
            .iter()
            .map(|(dep_name, dep_version)| DependencyInfo {
                name: owned_c_string(dep_name),
                version: owned_c_string(dep_version),
            })
            .collect();
        let dependencies_len = deps.len();
        let dependencies = Box::into_raw(deps.into_boxed_slice()).cast::<DependencyInfo>();

        Box::new(PluginInfo {
            name: owned_c_string(name),
            pretty_name: owned_c_string(pretty_name),
            version: owned_c_string(version),
            author: owned_c_string(author),
            url: owned_c_string(url),
            license: owned_c_string(license),
            copyright: owned_c_string(copyright),
            dependencies,
            dependencies_len,
        })
    }

    /// Read a string field.
    ///
    /// # Safety
    ///
    /// `field` must be one of this structure's own string pointers, still
    /// owned by it.
    pub unsafe fn field_str<'a>(field: *const c_char) -> Option<&'a str> {
        if field.is_null() {
            return None;
        }
        unsafe { CStr::from_ptr(field) }.to_str().ok()
    }

    /// Release an info structure previously produced by [`from_parts`] and
    /// leaked across the FFI boundary.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `Box::into_raw` on a [`from_parts`] result and
    /// must not be used afterwards.
    ///
    /// [`from_parts`]: PluginInfo::from_parts
    pub unsafe fn free(ptr: *mut PluginInfo) {
        if ptr.is_null() {
            return;
        }
        let info = unsafe { Box::from_raw(ptr) };
        for &field in &[
            info.name,
            info.pretty_name,
            info.version,
            info.author,
            info.url,
            info.license,
            info.copyright,
        ] {
            if !field.is_null() {
                drop(unsafe { CString::from_raw(field) });
            }
        }
        if !info.dependencies.is_null() {
            let deps = unsafe {
                Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                    info.dependencies,
                    info.dependencies_len,
                ))
            };
            for dep in deps.iter() {
                if !dep.name.is_null() {
                    drop(unsafe { CString::from_raw(dep.name) });
                }
                if !dep.version.is_null() {
                    drop(unsafe { CString::from_raw(dep.version) });
                }
            }
        }
    }
}
