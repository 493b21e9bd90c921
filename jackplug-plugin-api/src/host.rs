//! Plugin-side view of the host broker.
//!
//! [`Host`] wraps the two function pointers every constructor receives and
//! exposes typed requests, so plugin code does not have to build raw
//! `data`/`data_size` exchanges by hand. Allocations the host hands back are
//! released through the `FREE_RESULT` request before the typed value is
//! returned.

use std::ffi::{CStr, CString, c_char, c_void};
use std::ptr;

use crate::codes::{self, status};
use crate::info::PluginInfo;
use crate::{BrokerRequestFn, DependencyHandle, PeerAccessFn};

/// Typed access to the host broker, owned by a plugin instance.
pub struct Host {
    name: CString,
    broker: BrokerRequestFn,
    peers: PeerAccessFn,
}

impl Host {
    pub fn new(name: &str, broker: BrokerRequestFn, peers: PeerAccessFn) -> Self {
        Self {
            name: CString::new(name).unwrap_or_default(),
            broker,
            peers,
        }
    }

    /// The name this plugin identifies itself with.
    pub fn plugin_name(&self) -> &str {
        self.name.to_str().unwrap_or_default()
    }

    /// Raw request passthrough for plugin-defined codes.
    pub fn send_request(&self, code: u16, data: &mut *mut c_void, data_size: &mut u32) -> u16 {
        (self.broker)(
            self.name.as_ptr(),
            code,
            ptr::from_mut(data),
            ptr::from_mut(data_size),
        )
    }

    /// The host application's directory.
    pub fn app_directory(&self) -> Option<String> {
        self.request_string(codes::GET_APPDIRECTORY, None)
    }

    /// The host's plugin API version.
    pub fn plugin_api(&self) -> Option<String> {
        self.request_string(codes::GET_PLUGINAPI, None)
    }

    /// How many plugins the host currently knows about.
    pub fn plugins_count(&self) -> Option<usize> {
        let mut data: *mut c_void = ptr::null_mut();
        let mut size = 0u32;
        let status = (self.broker)(
            self.name.as_ptr(),
            codes::GET_PLUGINSCOUNT,
            &mut data,
            &mut size,
        );
        if status != status::SUCCESS || data.is_null() {
            return None;
        }
        // SAFETY: on success the host stored an owned `usize` in `data`.
        let count = unsafe { *data.cast::<usize>() };
        self.release(data);
        Some(count)
    }

    /// Version string of `name`, or of this plugin when `None`.
    pub fn plugin_version(&self, name: Option<&str>) -> Option<String> {
        self.request_string(codes::GET_PLUGINVERSION, name)
    }

    /// Whether the host knows a plugin called `name`.
    pub fn has_plugin(&self, name: &str) -> bool {
        self.check(codes::CHECK_PLUGIN, name)
    }

    /// Whether `name` is currently loaded.
    pub fn is_plugin_loaded(&self, name: &str) -> bool {
        self.check(codes::CHECK_PLUGINLOADED, name)
    }

    /// Borrow the metadata of `name` (or of this plugin when `None`) for the
    /// duration of `f`. The underlying allocation is released on return.
    pub fn with_plugin_info<R>(
        &self,
        name: Option<&str>,
        f: impl FnOnce(&PluginInfo) -> R,
    ) -> Option<R> {
        let carg = name.and_then(|n| CString::new(n).ok());
        let mut data: *mut c_void = carg
            .as_ref()
            .map_or(ptr::null_mut(), |c| c.as_ptr().cast_mut().cast());
        let mut size = 0u32;
        let status = (self.broker)(
            self.name.as_ptr(),
            codes::GET_PLUGININFO,
            &mut data,
            &mut size,
        );
        if status != status::SUCCESS || data.is_null() {
            return None;
        }
        // SAFETY: on success the host replaced `data` with an owned
        // `PluginInfo`, valid until released below.
        let result = f(unsafe { &*data.cast::<PluginInfo>() });
        self.release(data);
        Some(result)
    }

    /// Reach a plugin outside the declared dependencies. The host only
    /// grants this to the registered main plugin, and only for loaded
    /// targets.
    pub fn peer(&self, name: &str) -> Option<DependencyHandle> {
        let cname = CString::new(name).ok()?;
        let handle = (self.peers)(self.name.as_ptr(), cname.as_ptr());
        if handle.is_null() {
            None
        } else {
            Some(DependencyHandle::new(handle))
        }
    }

    /// Hand an allocation back to the host for deallocation.
    pub fn release(&self, allocation: *mut c_void) {
        if allocation.is_null() {
            return;
        }
        let mut data = allocation;
        let mut size = 0u32;
        let _ = (self.broker)(self.name.as_ptr(), codes::FREE_RESULT, &mut data, &mut size);
    }

    fn request_string(&self, code: u16, name: Option<&str>) -> Option<String> {
        let carg = name.and_then(|n| CString::new(n).ok());
        let mut data: *mut c_void = carg
            .as_ref()
            .map_or(ptr::null_mut(), |c| c.as_ptr().cast_mut().cast());
        let mut size = 0u32;
        let status = (self.broker)(self.name.as_ptr(), code, &mut data, &mut size);
        if status != status::SUCCESS || data.is_null() {
            return None;
        }
        // SAFETY: on success the host replaced `data` with an owned,
        // NUL-terminated string.
        let text = unsafe { CStr::from_ptr(data.cast::<c_char>()) }
            .to_string_lossy()
            .into_owned();
        self.release(data);
        Some(text)
    }

    fn check(&self, code: u16, name: &str) -> bool {
        let Ok(cname) = CString::new(name) else {
            return false;
        };
        let mut data: *mut c_void = cname.as_ptr().cast_mut().cast();
        let mut size = 0u32;
        (self.broker)(self.name.as_ptr(), code, &mut data, &mut size) == status::RESULT_TRUE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A broker stub that answers the string requests with a leaked CString
    // and claims every plugin exists. FREE_RESULT reclaims the leak.
    extern "C" fn stub_broker(
        _sender: *const c_char,
        code: u16,
        data: *mut *mut c_void,
        data_size: *mut u32,
    ) -> u16 {
        if data_size.is_null() || data.is_null() {
            return status::DATASIZE_NULL;
        }
        match code {
            codes::GET_PLUGINAPI => {
                let text = CString::new(crate::PLUGIN_API).unwrap();
                let len = text.as_bytes().len() as u32;
                unsafe {
                    *data = text.into_raw().cast();
                    *data_size = len;
                }
                status::SUCCESS
            }
            codes::GET_PLUGINSCOUNT => {
                unsafe {
                    *data = Box::into_raw(Box::new(3usize)).cast();
                    *data_size = 1;
                }
                status::SUCCESS
            }
            codes::CHECK_PLUGIN => status::RESULT_TRUE,
            codes::CHECK_PLUGINLOADED => status::RESULT_FALSE,
            codes::FREE_RESULT => {
                // The stub only hands out CStrings and counts; leak-free
                // enough for a unit test either way.
                status::SUCCESS
            }
            _ => status::UNKNOWN_REQUEST,
        }
    }

    #[allow(improper_ctypes_definitions)]
    extern "C" fn stub_peers(
        _sender: *const c_char,
        _target: *const c_char,
    ) -> crate::PluginHandle {
        crate::null_handle()
    }

    fn host() -> Host {
        Host::new("test_plugin", stub_broker, stub_peers)
    }

    #[test]
    fn plugin_api_reads_string_reply() {
        assert_eq!(host().plugin_api().as_deref(), Some(crate::PLUGIN_API));
    }

    #[test]
    fn plugins_count_reads_usize_reply() {
        assert_eq!(host().plugins_count(), Some(3));
    }

    #[test]
    fn checks_map_to_booleans() {
        let host = host();
        assert!(host.has_plugin("anything"));
        assert!(!host.is_plugin_loaded("anything"));
    }

    #[test]
    fn unknown_request_yields_none() {
        assert!(host().request_string(codes::USER_BASE, None).is_none());
    }

    #[test]
    fn peer_denied_yields_none() {
        assert!(host().peer("other").is_none());
    }

    #[test]
    fn plugin_name_round_trips() {
        assert_eq!(host().plugin_name(), "test_plugin");
    }
}
