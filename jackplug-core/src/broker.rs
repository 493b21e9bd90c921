//! Process-wide request brokering between plugins and the host.
//!
//! Both entry points are handed to every plugin constructor as plain
//! function pointers; they route back to [`PluginManager::instance()`].
//! Allocations the host hands out are recorded in a ledger and reclaimed
//! with the matching deallocator when the plugin passes them back through
//! the `FREE_RESULT` request.

use std::collections::HashMap;
use std::ffi::{CStr, CString, c_char, c_void};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::debug;

use jackplug_plugin_api::codes::{self, status};
use jackplug_plugin_api::{PLUGIN_API, PluginHandle, PluginInfo, null_handle};

use crate::manager::PluginManager;
use crate::record::PluginRecord;

/// The kind of a handed-out allocation, keyed by pointer address.
enum Allocation {
    Text,
    Count,
    Info,
}

static ALLOCATIONS: Lazy<Mutex<HashMap<usize, Allocation>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn hand_out(ptr: *mut c_void, kind: Allocation) {
    ALLOCATIONS.lock().insert(ptr as usize, kind);
}

fn reclaim(ptr: *mut c_void) -> u16 {
    let Some(kind) = ALLOCATIONS.lock().remove(&(ptr as usize)) else {
        return status::NOT_FOUND;
    };
    match kind {
        // SAFETY: the ledger guarantees each pointer came from the matching
        // allocator and is reclaimed at most once.
        Allocation::Text => drop(unsafe { CString::from_raw(ptr.cast::<c_char>()) }),
        Allocation::Count => drop(unsafe { Box::from_raw(ptr.cast::<usize>()) }),
        Allocation::Info => unsafe { PluginInfo::free(ptr.cast::<PluginInfo>()) },
    }
    status::SUCCESS
}

/// # Safety
///
/// `ptr` must be null or a valid NUL-terminated string.
unsafe fn cstr_arg<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

fn give_string(text: &str, data: *mut *mut c_void, data_size: *mut u32) {
    let owned = CString::new(text).unwrap_or_default();
    let len = owned.as_bytes().len() as u32;
    let ptr = owned.into_raw().cast::<c_void>();
    hand_out(ptr, Allocation::Text);
    // SAFETY: the dispatcher verified both out-pointers.
    unsafe {
        *data = ptr;
        *data_size = len;
    }
}

/// The request dispatch function handed to every plugin constructor.
///
/// `data` and `data_size` are in-out: requests that take a name read it
/// from `*data`, requests that answer with an allocation overwrite `*data`
/// and set `*data_size`. Ownership of every allocation written to `*data`
/// stays with the host; the plugin returns it through `FREE_RESULT`.
pub extern "C" fn broker_request(
    sender: *const c_char,
    code: u16,
    data: *mut *mut c_void,
    data_size: *mut u32,
) -> u16 {
    let manager = PluginManager::instance();

    // every request exchanges data, so the out-pointers must exist
    if data.is_null() || data_size.is_null() {
        return status::DATASIZE_NULL;
    }
    // SAFETY: senders pass their own NUL-terminated jp_name.
    let sender_name = unsafe { cstr_arg(sender) }.unwrap_or_default().to_owned();
    if manager.log_on() {
        debug!(sender = %sender_name, code, "broker request");
    }

    match code {
        codes::GET_APPDIRECTORY => {
            let dir = PluginManager::app_directory();
            give_string(&dir.to_string_lossy(), data, data_size);
            status::SUCCESS
        }
        codes::GET_PLUGINAPI => {
            give_string(PLUGIN_API, data, data_size);
            status::SUCCESS
        }
        codes::GET_PLUGINSCOUNT => {
            let ptr = Box::into_raw(Box::new(manager.plugins_count())).cast::<c_void>();
            hand_out(ptr, Allocation::Count);
            // SAFETY: out-pointers verified above.
            unsafe {
                *data = ptr;
                // one element, unlike the string replies where this is a
                // byte length
                *data_size = 1;
            }
            status::SUCCESS
        }
        codes::GET_PLUGININFO => {
            // SAFETY: `*data` is either null or a plugin-name string.
            let target = unsafe { cstr_arg((*data).cast::<c_char>()) }.unwrap_or(&sender_name);
            let Some(descriptor) = manager.plugin_info(target) else {
                return status::NOT_FOUND;
            };
            let dependencies: Vec<(&str, &str)> = descriptor
                .dependencies
                .iter()
                .map(|dep| (dep.name.as_str(), dep.version.as_str()))
                .collect();
            let info = PluginInfo::from_parts(
                &descriptor.name,
                &descriptor.pretty_name,
                &descriptor.version,
                &descriptor.author,
                &descriptor.url,
                &descriptor.license,
                &descriptor.copyright,
                &dependencies,
            );
            let ptr = Box::into_raw(info).cast::<c_void>();
            hand_out(ptr, Allocation::Info);
            // SAFETY: out-pointers verified above.
            unsafe {
                *data = ptr;
                *data_size = 1;
            }
            status::SUCCESS
        }
        codes::GET_PLUGINVERSION => {
            // SAFETY: `*data` is either null or a plugin-name string.
            let target = unsafe { cstr_arg((*data).cast::<c_char>()) }.unwrap_or(&sender_name);
            let Some(descriptor) = manager.plugin_info(target) else {
                return status::NOT_FOUND;
            };
            give_string(&descriptor.version, data, data_size);
            status::SUCCESS
        }
        codes::CHECK_PLUGIN => {
            // SAFETY: `*data` carries the name to check.
            match unsafe { cstr_arg((*data).cast::<c_char>()) } {
                Some(name) if manager.has_plugin(name) => status::RESULT_TRUE,
                _ => status::RESULT_FALSE,
            }
        }
        codes::CHECK_PLUGINLOADED => {
            // SAFETY: `*data` carries the name to check.
            match unsafe { cstr_arg((*data).cast::<c_char>()) } {
                Some(name) if manager.is_plugin_loaded(name) => status::RESULT_TRUE,
                _ => status::RESULT_FALSE,
            }
        }
        codes::FREE_RESULT => {
            // SAFETY: out-pointers verified above.
            let ptr = unsafe { *data };
            if ptr.is_null() {
                return status::NOT_FOUND;
            }
            reclaim(ptr)
        }
        _ => status::UNKNOWN_REQUEST,
    }
}

/// Peer access for the main plugin.
///
/// Ordinary plugins only ever see their declared dependencies; reaching an
/// arbitrary loaded plugin is the main plugin's privilege. Returns a null
/// handle when the sender is not the registered main plugin or the target
/// is not currently loaded.
#[allow(improper_ctypes_definitions)]
pub extern "C" fn get_non_dep_plugin(
    sender: *const c_char,
    target: *const c_char,
) -> PluginHandle {
    let manager = PluginManager::instance();

    // SAFETY: both arguments are NUL-terminated names or null.
    let (Some(sender_name), Some(target_name)) =
        (unsafe { cstr_arg(sender) }, unsafe { cstr_arg(target) })
    else {
        return null_handle();
    };

    let mut registry = manager.registry.lock();
    if !registry.get(sender_name).is_some_and(|record| record.is_main) {
        return null_handle();
    }
    if manager.log_on() {
        debug!(sender = %sender_name, target = %target_name, "main plugin peer access");
    }
    registry
        .get_mut(target_name)
        .filter(|record| record.is_loaded())
        .and_then(PluginRecord::instance_ptr)
        .unwrap_or_else(null_handle)
}
