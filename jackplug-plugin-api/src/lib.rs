//! jackplug-plugin-api - Plugin SDK for the jackplug plugin manager
//!
//! This crate provides the traits and types needed to write plugins for
//! jackplug. Plugins are native dynamic libraries that export three
//! well-known symbols: `jp_name`, `jp_metadata` and `jp_createPlugin`. The
//! [`declare_plugin!`] macro emits all three from a type implementing
//! [`Plugin`].
//!
//! # Example
//!
//! ```ignore
//! use jackplug_plugin_api::{declare_plugin, Plugin, PluginInit};
//!
//! pub struct MyPlugin {
//!     init: PluginInit,
//! }
//!
//! impl Plugin for MyPlugin {
//!     fn create(init: PluginInit) -> Self {
//!         MyPlugin { init }
//!     }
//!
//!     fn loaded(&mut self) {
//!         // dependencies are live here
//!     }
//! }
//!
//! declare_plugin!(MyPlugin, name: "my_plugin", metadata: r#"{
//!     "api": "1.0.0", "name": "my_plugin", "prettyName": "My Plugin",
//!     "version": "0.1.0", "author": "me", "url": "", "license": "MIT",
//!     "copyright": "", "dependencies": []
//! }"#);
//! ```

pub mod codes;
pub mod host;
pub mod info;

pub use codes::status;
pub use host::Host;
pub use info::{DependencyInfo, PluginInfo};

use std::ffi::{c_char, c_void};

/// Host plugin API version. A plugin's metadata `api` field must be
/// compatible with this for the plugin to be accepted.
pub const PLUGIN_API: &str = "1.0.0";

/// A raw handle to a live plugin instance.
///
/// Handles passed to constructors (the dependency array) and returned by the
/// peer-access function are borrowed from the host: the plugin must never
/// free them, and they stay valid until the owning plugin is unloaded.
pub type PluginHandle = *mut dyn Plugin;

/// Signature of the host's request broker, handed to every constructor.
pub type BrokerRequestFn =
    extern "C" fn(sender: *const c_char, code: u16, data: *mut *mut c_void, data_size: *mut u32) -> u16;

/// Signature of the host's peer-access function. Returns a null handle
/// unless the sender is the registered main plugin and the target is loaded.
pub type PeerAccessFn = extern "C" fn(sender: *const c_char, target: *const c_char) -> PluginHandle;

/// Type of the value stored in the `jp_createPlugin` data symbol.
pub type PluginCreateFn = extern "C" fn(
    broker: BrokerRequestFn,
    peers: PeerAccessFn,
    deps: *const PluginHandle,
    dep_count: usize,
    is_main: bool,
) -> PluginHandle;

/// The core plugin trait - implement this to create a jackplug plugin.
///
/// All hooks have default no-op implementations, so plugins only need to
/// override the ones they care about.
pub trait Plugin: Send {
    /// Construct the plugin from what the host hands to `jp_createPlugin`.
    /// Called by the glue the [`declare_plugin!`] macro generates.
    fn create(init: PluginInit) -> Self
    where
        Self: Sized;

    /// Called exactly once after construction. Every declared dependency is
    /// live for the duration of this call.
    fn loaded(&mut self) {}

    /// Called exactly once just before the plugin is destroyed and its
    /// library unloaded. Dependencies remain live until this returns.
    fn about_to_be_unloaded(&mut self) {}

    /// Handle a request sent by another plugin.
    fn handle_request(
        &mut self,
        _sender: &str,
        _code: u16,
        _data: *mut *mut c_void,
        _data_size: *mut u32,
    ) -> u16 {
        status::UNKNOWN_REQUEST
    }

    /// Called once on the registered main plugin after every plugin loaded.
    fn main_plugin_exec(&mut self) {}
}

/// Everything a plugin receives at construction time.
pub struct PluginInit {
    /// Typed access to the host broker.
    pub host: Host,
    /// Live handles to the declared dependencies, in metadata order.
    pub dependencies: Vec<DependencyHandle>,
    /// Whether this plugin was registered as the main plugin.
    pub is_main: bool,
}

/// A borrowed handle to another plugin instance.
///
/// The host serializes all calls into plugin code, so holding one of these
/// across hooks is sound; the handle goes stale once the target plugin is
/// unloaded, which the host only does after unloading every dependent.
#[derive(Clone, Copy, Debug)]
pub struct DependencyHandle(PluginHandle);

// Handles are only ever dereferenced on the host's calling thread; the
// wrapper exists so plugin state containing them can satisfy `Plugin: Send`.
unsafe impl Send for DependencyHandle {}
unsafe impl Sync for DependencyHandle {}

impl DependencyHandle {
    pub fn new(raw: PluginHandle) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> PluginHandle {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0.is_null()
    }

    /// Borrow the target plugin.
    ///
    /// # Safety
    ///
    /// The handle must be non-null and the target plugin still loaded, and
    /// no other reference into the target may be live.
    pub unsafe fn plugin_mut<'a>(self) -> &'a mut dyn Plugin {
        unsafe { &mut *self.0 }
    }
}

struct NullMarker;

impl Plugin for NullMarker {
    fn create(_init: PluginInit) -> Self {
        NullMarker
    }
}

/// The null [`PluginHandle`], returned by the peer-access function when the
/// request is denied or the target is not loaded.
pub fn null_handle() -> PluginHandle {
    std::ptr::null_mut::<NullMarker>() as PluginHandle
}

/// Gather the constructor's dependency array into owned handles.
///
/// # Safety
///
/// `deps` must point to `len` valid handles, or be null when `len` is 0.
pub unsafe fn collect_dependencies(deps: *const PluginHandle, len: usize) -> Vec<DependencyHandle> {
    if deps.is_null() || len == 0 {
        return Vec::new();
    }
    unsafe { std::slice::from_raw_parts(deps, len) }
        .iter()
        .map(|&handle| DependencyHandle::new(handle))
        .collect()
}

/// Whether `name` is a valid plugin name: ASCII letters, digits and `_`,
/// not starting with a digit, non-empty. Evaluated at compile time by
/// [`declare_plugin!`].
pub const fn is_valid_plugin_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes[0].is_ascii_digit() {
        return false;
    }
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if !(b.is_ascii_alphanumeric() || b == b'_') {
            return false;
        }
        i += 1;
    }
    true
}

/// Copy `s` into a NUL-terminated byte array. `N` must be `s.len() + 1`.
pub const fn to_c_bytes<const N: usize>(s: &str) -> [u8; N] {
    let bytes = s.as_bytes();
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
/// Emits the three symbols the host probes for:
///
/// - `jp_name`: NUL-terminated plugin name
/// - `jp_metadata`: NUL-terminated JSON descriptor
/// - `jp_createPlugin`: data symbol whose value is the constructor
///
/// The plugin name is validated at compile time: it must be a C-like
/// identifier (letters, digits, `_`, not starting with a digit).
#[macro_export]
macro_rules! declare_plugin {
    ($plugin_type:ty, name: $name:expr, metadata: $metadata:expr) => {
        const _: () = {
            assert!(
                $crate::is_valid_plugin_name($name),
                "plugin name must contain only letters, digits and '_', and not start with a digit",
            );
        };

        #[unsafe(no_mangle)]
        #[allow(non_upper_case_globals)]
        pub static jp_name: [u8; $name.len() + 1] = $crate::to_c_bytes::<{ $name.len() + 1 }>($name);

        #[unsafe(no_mangle)]
        #[allow(non_upper_case_globals)]
        pub static jp_metadata: [u8; $metadata.len() + 1] =
            $crate::to_c_bytes::<{ $metadata.len() + 1 }>($metadata);

        #[unsafe(no_mangle)]
        #[allow(non_upper_case_globals)]
        pub static jp_createPlugin: $crate::PluginCreateFn = {
            #[allow(improper_ctypes_definitions)]
            extern "C" fn create(
                broker: $crate::BrokerRequestFn,
                peers: $crate::PeerAccessFn,
                deps: *const $crate::PluginHandle,
                dep_count: usize,
                is_main: bool,
            ) -> $crate::PluginHandle {
                let init = $crate::PluginInit {
                    host: $crate::Host::new($name, broker, peers),
                    // SAFETY: the host passes a valid dependency array.
                    dependencies: unsafe { $crate::collect_dependencies(deps, dep_count) },
                    is_main,
                };
                let plugin: Box<dyn $crate::Plugin> = Box::new(<$plugin_type>::create(init));
                Box::into_raw(plugin)
            }
            create
        };
    };
}
