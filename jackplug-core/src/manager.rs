//! The plugin manager facade: discovery, lifecycle and queries.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error, info};

use jackplug_plugin_api::{PLUGIN_API, PluginCreateFn, PluginHandle};

use crate::broker;
use crate::dynlib::{DynLib, DynLibError};
use crate::error::{Callback, ReturnCode, emit};
use crate::fsutil;
use crate::metadata::{self, PluginDescriptor};
use crate::record::PluginRecord;
use crate::registry::Registry;
use crate::version::PluginVersion;

const SYM_NAME: &[u8] = b"jp_name\0";
const SYM_METADATA: &[u8] = b"jp_metadata\0";
const SYM_CREATE: &[u8] = b"jp_createPlugin\0";

static INSTANCE: Lazy<PluginManager> = Lazy::new(PluginManager::new);

#[derive(Error, Debug)]
enum LoadError {
    #[error(transparent)]
    Lib(#[from] DynLibError),

    #[error("plugin `{0}` is not registered")]
    UnknownPlugin(String),

    #[error("dependency `{0}` has no live instance")]
    DependencyNotLive(String),

    #[error("constructor returned a null instance")]
    NullInstance,
}

/// Manages every plugin of the process: searching, loading, unloading and
/// request brokering.
///
/// The process-wide [`instance()`](PluginManager::instance) is the canonical
/// owner; the broker entry points handed to plugin constructors always route
/// back to it. Embedders and tests may also construct standalone managers
/// with [`new()`](PluginManager::new).
///
/// The manager is single-threaded from the caller's perspective: the caller
/// serializes `search_for_plugins`, `load_all`, `unload_all` and the
/// per-plugin variants. The registry still sits behind a coarse mutex so the
/// broker, invoked synchronously from plugin code, observes consistent
/// state; that lock is never held across a plugin hook or constructor.
pub struct PluginManager {
    pub(crate) registry: Mutex<Registry>,
    log_enabled: AtomicBool,
}

impl Default for PluginManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginManager {
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry::new()),
            log_enabled: AtomicBool::new(true),
        }
    }

    /// The process-wide manager instance.
    pub fn instance() -> &'static PluginManager {
        &INSTANCE
    }

    //
    // Logging controls
    //

    /// Enable or disable the manager's log output. Enabled by default;
    /// routing is owned by whatever `tracing` subscriber the application
    /// installed.
    pub fn enable_log_output(&self, enable: bool) {
        let was_enabled = self.log_enabled.swap(enable, Ordering::Relaxed);
        if enable && !was_enabled {
            info!("log output enabled");
        }
    }

    /// Same as `enable_log_output(false)`.
    pub fn disable_log_output(&self) {
        self.enable_log_output(false);
    }

    pub(crate) fn log_on(&self) -> bool {
        self.log_enabled.load(Ordering::Relaxed)
    }

    //
    // Discovery
    //

    /// Search `dir` for plugin libraries and register every new one.
    ///
    /// Only the libraries are opened here, to read their name and metadata;
    /// actually constructing the plugins is [`load_all`]'s job. Can be
    /// called several times with different directories.
    ///
    /// [`load_all`]: PluginManager::load_all
    pub fn search_for_plugins(
        &self,
        dir: &Path,
        recursive: bool,
        mut callback: Option<Callback<'_>>,
    ) -> ReturnCode {
        if self.log_on() {
            info!(dir = %dir.display(), recursive, "search for plugins");
        }

        let (candidates, walk_error) = fsutil::list_libraries(dir, recursive);
        if let Some(err) = walk_error {
            if self.log_on() {
                error!(dir = %dir.display(), error = %err, "plugin directory scan failed");
            }
            emit(
                &mut callback,
                ReturnCode::SearchListFilesError,
                Some(&err.to_string()),
            );
            // only fatal when the scan produced nothing at all
            if candidates.is_empty() {
                return ReturnCode::SearchListFilesError;
            }
        }

        let mut found_any = false;
        for path in candidates {
            let lib = match DynLib::open(&path) {
                Ok(lib) => lib,
                Err(err) => {
                    debug!(path = %path.display(), error = %err, "skipping unloadable file");
                    continue;
                }
            };
            if !(lib.has_symbol(SYM_NAME)
                && lib.has_symbol(SYM_METADATA)
                && lib.has_symbol(SYM_CREATE))
            {
                debug!(path = %path.display(), "not a plugin library");
                continue;
            }
            if self.log_on() {
                info!(path = %path.display(), "found plugin library");
            }

            // SAFETY: presence verified above; the ABI fixes both symbols
            // as NUL-terminated buffers.
            let name = match unsafe { lib.cstr_symbol(SYM_NAME) }
                .ok()
                .and_then(|cstr| cstr.to_str().ok())
                .map(str::to_owned)
            {
                Some(name) if !name.is_empty() => name,
                _ => {
                    debug!(path = %path.display(), "unreadable plugin name");
                    continue;
                }
            };
            if self.log_on() {
                info!(plugin = %name, "library name read");
            }

            // names are unique across the whole registry
            if self.registry.lock().contains(&name) {
                emit(
                    &mut callback,
                    ReturnCode::SearchNameAlreadyExists,
                    Some(&path.to_string_lossy()),
                );
                continue;
            }

            // SAFETY: as above.
            let metadata_bytes = match unsafe { lib.cstr_symbol(SYM_METADATA) } {
                Ok(cstr) => cstr.to_bytes().to_vec(),
                Err(err) => {
                    debug!(path = %path.display(), error = %err, "unreadable metadata");
                    continue;
                }
            };
            let descriptor = match metadata::parse_metadata(&metadata_bytes) {
                Ok(descriptor) => descriptor,
                Err(err) => {
                    if self.log_on() {
                        error!(path = %path.display(), error = %err, "cannot parse metadata");
                    }
                    emit(
                        &mut callback,
                        ReturnCode::SearchCannotParseMetadata,
                        Some(&path.to_string_lossy()),
                    );
                    continue;
                }
            };
            if self.log_on() {
                info!(plugin = %name, version = %descriptor.version, "plugin registered");
            }

            self.registry
                .lock()
                .insert(name, PluginRecord::new(&path, lib, descriptor));
            found_any = true;
        }

        if found_any {
            self.registry.lock().add_location(dir);
            ReturnCode::Success
        } else {
            ReturnCode::SearchNothingFound
        }
    }

    /// Register the privileged main plugin. Only succeeds while no main
    /// plugin is set and `name` is known.
    pub fn register_main_plugin(&self, name: &str) -> ReturnCode {
        if self.registry.lock().register_main(name) {
            ReturnCode::Success
        } else {
            ReturnCode::UnknownError
        }
    }

    //
    // Lifecycle
    //

    /// Resolve dependencies, order the graph and load every plugin.
    ///
    /// With `try_to_continue` true (the usual mode) a plugin failing to
    /// resolve or load is reported through `callback` and skipped;
    /// otherwise the first failure aborts the whole operation. A cycle in
    /// the dependency graph always aborts with nothing loaded.
    pub fn load_all(
        &self,
        try_to_continue: bool,
        mut callback: Option<Callback<'_>>,
    ) -> ReturnCode {
        if self.log_on() {
            info!("load plugins");
        }

        let order = {
            let mut registry = self.registry.lock();
            match registry.plan_load_order(try_to_continue, &mut callback) {
                Ok(order) => {
                    registry.set_load_order(order.clone());
                    order
                }
                Err(code) => return code,
            }
        };
        if self.log_on() {
            info!(order = ?order, "load order");
        }

        for name in &order {
            if let Err(err) = self.load_one(name) {
                if self.log_on() {
                    error!(plugin = %name, error = %err, "failed to load plugin");
                }
                emit(&mut callback, ReturnCode::UnknownError, Some(name));
                if !try_to_continue {
                    return ReturnCode::UnknownError;
                }
            }
        }

        // the main plugin runs once every plugin is live
        let main_ptr = {
            let mut registry = self.registry.lock();
            let main_name = registry.main_plugin().map(str::to_owned);
            main_name.and_then(|main| {
                registry
                    .get_mut(&main)
                    .filter(|record| record.is_loaded())
                    .and_then(PluginRecord::instance_ptr)
            })
        };
        if let Some(ptr) = main_ptr {
            // SAFETY: the instance stays owned by the registry until
            // unload; hooks run on the caller's thread with the lock
            // released so the plugin may call back into the broker.
            unsafe { (*ptr).main_plugin_exec() };
        }

        ReturnCode::Success
    }

    /// Unload every plugin, newest dependents first.
    ///
    /// Walks the last load order in reverse, then sweeps any record that is
    /// still active (discovered but never loaded). Registered records stay
    /// in the registry with their libraries released, so a later `load_all`
    /// starts from the same inventory; scan locations are cleared.
    pub fn unload_all(&self, mut callback: Option<Callback<'_>>) -> ReturnCode {
        if self.log_on() {
            info!("unload plugins");
        }

        let order = self.registry.lock().take_load_order();
        let mut all_unloaded = true;
        for name in order.iter().rev() {
            if !self.unload_one(name) {
                all_unloaded = false;
            }
        }

        // leftovers never made it into a load order; their mutual
        // dependency order is arbitrary here
        let leftovers: Vec<String> = {
            let registry = self.registry.lock();
            registry
                .sorted_names()
                .into_iter()
                .filter(|name| registry.get(name).is_some_and(PluginRecord::is_active))
                .collect()
        };
        for name in &leftovers {
            if !self.unload_one(name) {
                all_unloaded = false;
            }
        }

        self.registry.lock().clear_locations();

        if !all_unloaded {
            emit(&mut callback, ReturnCode::UnloadNotAll, None);
            return ReturnCode::UnloadNotAll;
        }
        if self.log_on() {
            info!("all plugins unloaded");
        }
        ReturnCode::Success
    }

    /// Load a single plugin, bringing its not-yet-loaded dependencies up
    /// first.
    pub fn load_plugin(&self, name: &str) -> bool {
        if self.log_on() {
            info!(plugin = %name, "loading plugin");
        }
        {
            let registry = self.registry.lock();
            let Some(record) = registry.get(name) else {
                if self.log_on() {
                    error!(plugin = %name, "plugin not found");
                }
                return false;
            };
            if record.is_loaded() {
                if self.log_on() {
                    info!(plugin = %name, "plugin is already loaded");
                }
                return true;
            }
        }

        let code = self.registry.lock().check_dependencies(name, &mut None);
        if !code.is_success() {
            if self.log_on() {
                error!(plugin = %name, code = %code, "unmet dependencies");
            }
            return false;
        }

        self.load_with_dependencies(name, &mut HashSet::new())
    }

    /// Probe a single library file, register it and load it.
    ///
    /// The registry insert is rolled back if the plugin's dependencies do
    /// not resolve, so a failed registration leaves no trace.
    pub fn load_plugin_from_path(&self, path: &Path) -> bool {
        let lib = match DynLib::open(path) {
            Ok(lib) => lib,
            Err(err) => {
                if self.log_on() {
                    error!(path = %path.display(), error = %err, "failed to load plugin library");
                }
                return false;
            }
        };
        if !(lib.has_symbol(SYM_NAME) && lib.has_symbol(SYM_METADATA) && lib.has_symbol(SYM_CREATE))
        {
            if self.log_on() {
                error!(path = %path.display(), "not a plugin library");
            }
            return false;
        }

        // SAFETY: presence verified above, ABI fixes the symbol shapes.
        let name = match unsafe { lib.cstr_symbol(SYM_NAME) }
            .ok()
            .and_then(|cstr| cstr.to_str().ok())
            .map(str::to_owned)
        {
            Some(name) if !name.is_empty() => name,
            _ => {
                if self.log_on() {
                    error!(path = %path.display(), "unreadable plugin name");
                }
                return false;
            }
        };

        if self
            .registry
            .lock()
            .get(&name)
            .is_some_and(PluginRecord::is_loaded)
        {
            if self.log_on() {
                info!(plugin = %name, "plugin is already loaded");
            }
            return true;
        }

        // SAFETY: as above.
        let metadata_bytes = match unsafe { lib.cstr_symbol(SYM_METADATA) } {
            Ok(cstr) => cstr.to_bytes().to_vec(),
            Err(_) => return false,
        };
        let descriptor = match metadata::parse_metadata(&metadata_bytes) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                if self.log_on() {
                    error!(path = %path.display(), error = %err, "cannot parse metadata");
                }
                return false;
            }
        };

        {
            let mut registry = self.registry.lock();
            registry.insert(name.clone(), PluginRecord::new(path, lib, descriptor));
            let code = registry.check_dependencies(&name, &mut None);
            if !code.is_success() {
                // unwind the insert so the failed registration leaves no trace
                registry.remove(&name);
                if self.log_on() {
                    error!(plugin = %name, code = %code, "unmet dependencies");
                }
                return false;
            }
        }

        self.load_with_dependencies(&name, &mut HashSet::new())
    }

    /// Unload a single plugin and erase it from the registry, transitively
    /// unloading every loaded dependent first.
    pub fn unload_plugin(&self, name: &str) -> bool {
        if self.log_on() {
            info!(plugin = %name, "unloading plugin");
        }
        {
            let registry = self.registry.lock();
            match registry.get(name) {
                None => {
                    if self.log_on() {
                        error!(plugin = %name, "plugin not found");
                    }
                    return false;
                }
                Some(record) if !record.is_active() => {
                    if self.log_on() {
                        info!(plugin = %name, "plugin is not loaded");
                    }
                    return false;
                }
                Some(_) => {}
            }
        }

        // dependents go down first
        let dependents = self.registry.lock().active_dependents_of(name);
        for dependent in &dependents {
            if !self.unload_plugin(dependent) {
                if self.log_on() {
                    error!(plugin = %dependent, "failed to unload dependent plugin");
                }
                return false;
            }
        }

        if !self.unload_one(name) {
            if self.log_on() {
                error!(plugin = %name, "failed to unload plugin");
            }
            return false;
        }
        self.registry.lock().remove(name);

        if self.log_on() {
            info!(plugin = %name, "plugin unloaded");
        }
        true
    }

    //
    // Queries
    //

    /// The host application's directory.
    pub fn app_directory() -> PathBuf {
        jackplug_paths::app_dir()
    }

    /// The plugin API version this host provides.
    pub fn plugin_api() -> &'static str {
        PLUGIN_API
    }

    pub fn plugins_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Names of every registered plugin, sorted.
    pub fn plugins_list(&self) -> Vec<String> {
        self.registry.lock().sorted_names()
    }

    /// Every directory that contributed at least one plugin.
    pub fn plugins_location(&self) -> Vec<PathBuf> {
        self.registry.lock().locations()
    }

    pub fn has_plugin(&self, name: &str) -> bool {
        self.registry.lock().contains(name)
    }

    /// Whether `name` is registered in a version compatible with
    /// `min_version`.
    pub fn has_plugin_compatible(&self, name: &str, min_version: &str) -> bool {
        self.registry
            .lock()
            .get(name)
            .is_some_and(|record| {
                PluginVersion::parse(&record.descriptor.version).compatible(min_version)
            })
    }

    pub fn is_plugin_loaded(&self, name: &str) -> bool {
        self.registry
            .lock()
            .get(name)
            .is_some_and(PluginRecord::is_loaded)
    }

    /// Raw handle to a loaded plugin's instance. Borrowed from the
    /// registry: valid until that plugin is unloaded.
    pub fn plugin_object(&self, name: &str) -> Option<PluginHandle> {
        self.registry
            .lock()
            .get_mut(name)
            .and_then(PluginRecord::instance_ptr)
    }

    /// A copy of the plugin's decoded metadata.
    pub fn plugin_info(&self, name: &str) -> Option<PluginDescriptor> {
        self.registry
            .lock()
            .get(name)
            .map(|record| record.descriptor.clone())
    }

    //
    // Internals
    //

    fn load_with_dependencies(&self, name: &str, visiting: &mut HashSet<String>) -> bool {
        if self
            .registry
            .lock()
            .get(name)
            .is_some_and(PluginRecord::is_loaded)
        {
            return true;
        }
        if !visiting.insert(name.to_string()) {
            // a dependency cycle below this plugin
            return false;
        }

        let dependencies: Vec<String> = self
            .registry
            .lock()
            .get(name)
            .map(|record| {
                record
                    .descriptor
                    .dependencies
                    .iter()
                    .map(|dep| dep.name.clone())
                    .collect()
            })
            .unwrap_or_default();
        for dependency in &dependencies {
            if !self.load_with_dependencies(dependency, visiting) {
                return false;
            }
        }

        match self.load_one(name) {
            Ok(()) => {
                if self.log_on() {
                    info!(plugin = %name, "plugin loaded");
                }
                true
            }
            Err(err) => {
                if self.log_on() {
                    error!(plugin = %name, error = %err, "failed to load plugin");
                }
                false
            }
        }
    }

    /// Construct one plugin. Dependencies MUST already be live.
    fn load_one(&self, name: &str) -> Result<(), LoadError> {
        let (creator, dep_handles, is_main) = {
            let mut registry = self.registry.lock();
            let record = registry
                .get_mut(name)
                .ok_or_else(|| LoadError::UnknownPlugin(name.to_string()))?;
            if record.is_loaded() {
                return Ok(());
            }
            if !record.lib.is_loaded() {
                record.lib = DynLib::open(&record.path)?;
            }
            // SAFETY: discovery verified the symbol; its value is the
            // constructor function pointer.
            let creator: PluginCreateFn = unsafe { record.lib.value_symbol(SYM_CREATE)? };
            let is_main = record.is_main;
            let dep_names: Vec<String> = record
                .descriptor
                .dependencies
                .iter()
                .map(|dep| dep.name.clone())
                .collect();

            let mut dep_handles: Vec<PluginHandle> = Vec::with_capacity(dep_names.len());
            for dep_name in &dep_names {
                let handle = registry
                    .get_mut(dep_name)
                    .and_then(PluginRecord::instance_ptr)
                    .ok_or_else(|| LoadError::DependencyNotLive(dep_name.clone()))?;
                dep_handles.push(handle);
            }
            (creator, dep_handles, is_main)
        };

        // The constructor may call straight back into the broker, so the
        // registry lock is released here.
        let raw = creator(
            broker::broker_request,
            broker::get_non_dep_plugin,
            dep_handles.as_ptr(),
            dep_handles.len(),
            is_main,
        );
        if raw.is_null() {
            return Err(LoadError::NullInstance);
        }

        {
            let mut registry = self.registry.lock();
            let Some(record) = registry.get_mut(name) else {
                // SAFETY: sole owner of the freshly constructed instance.
                drop(unsafe { Box::from_raw(raw) });
                return Err(LoadError::UnknownPlugin(name.to_string()));
            };
            // SAFETY: `raw` came from the plugin's constructor; the record
            // owns it from here until unload.
            record.instance = Some(unsafe { Box::from_raw(raw) });
        }

        let ptr = self
            .registry
            .lock()
            .get_mut(name)
            .and_then(PluginRecord::instance_ptr);
        if let Some(ptr) = ptr {
            // SAFETY: the registry keeps the instance alive until unload;
            // the hook runs on the caller's thread, lock released.
            unsafe { (*ptr).loaded() };
        }
        Ok(())
    }

    /// Tear one plugin down. Returns true when the library handle ends up
    /// released.
    fn unload_one(&self, name: &str) -> bool {
        // teardown hook runs while every dependency is still live
        let ptr = self
            .registry
            .lock()
            .get_mut(name)
            .and_then(PluginRecord::instance_ptr);
        if let Some(ptr) = ptr {
            // SAFETY: instance owned by the registry until taken below;
            // single caller thread, lock released during the hook.
            unsafe { (*ptr).about_to_be_unloaded() };
        }

        // drop outside the lock: plugin Drop impls may call the broker
        let instance = self
            .registry
            .lock()
            .get_mut(name)
            .and_then(|record| record.instance.take());
        drop(instance);

        let mut registry = self.registry.lock();
        match registry.get_mut(name) {
            Some(record) => {
                record.lib.unload();
                let released = !record.lib.is_loaded();
                if released && self.log_on() {
                    debug!(plugin = %name, "library released");
                }
                released
            }
            None => false,
        }
    }
}
