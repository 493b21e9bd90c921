//! Per-plugin state held by the registry.

use std::path::{Path, PathBuf};

use jackplug_plugin_api::{Plugin, PluginHandle};

use crate::dynlib::DynLib;
use crate::metadata::PluginDescriptor;

/// Memoized answer of the dependency resolver for one record.
///
/// `Checking` marks a record currently on the resolver's recursion path, so
/// cyclic graphs terminate; the cycle itself is reported by the topological
/// sort, not the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DepState {
    Unknown,
    Checking,
    Satisfied,
    Missing,
    BadVersion,
}

/// One discovered plugin library.
pub(crate) struct PluginRecord {
    pub path: PathBuf,
    pub descriptor: PluginDescriptor,
    // dropped before `lib`: instance code lives in the library
    pub instance: Option<Box<dyn Plugin>>,
    pub lib: DynLib,
    pub dependency_state: DepState,
    /// Index into the node list of the current load cycle; `None` when the
    /// record was excluded from it.
    pub graph_id: Option<usize>,
    pub is_main: bool,
}

impl PluginRecord {
    pub fn new(path: &Path, lib: DynLib, descriptor: PluginDescriptor) -> Self {
        Self {
            path: path.to_path_buf(),
            descriptor,
            instance: None,
            lib,
            dependency_state: DepState::Unknown,
            graph_id: None,
            is_main: false,
        }
    }

    /// A plugin is loaded while its instance exists.
    pub fn is_loaded(&self) -> bool {
        self.instance.is_some()
    }

    /// Whether there is anything to tear down: a live instance or an open
    /// library handle.
    pub fn is_active(&self) -> bool {
        self.instance.is_some() || self.lib.is_loaded()
    }

    /// Raw handle to the live instance, for the dependency array and the
    /// peer-access path. Borrowed from the owning `Box`; stable until the
    /// instance is dropped.
    pub fn instance_ptr(&mut self) -> Option<PluginHandle> {
        self.instance
            .as_deref_mut()
            .map(|plugin| plugin as *mut dyn Plugin)
    }
}

impl Drop for PluginRecord {
    fn drop(&mut self) {
        // The teardown hook runs while the library is still resident; the
        // regular unload path has already taken the instance out by now.
        if let Some(instance) = self.instance.as_deref_mut() {
            instance.about_to_be_unloaded();
        }
    }
}

impl std::fmt::Debug for PluginRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRecord")
            .field("path", &self.path)
            .field("name", &self.descriptor.name)
            .field("loaded", &self.is_loaded())
            .field("dependency_state", &self.dependency_state)
            .field("graph_id", &self.graph_id)
            .field("is_main", &self.is_main)
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn fresh_record_is_neither_loaded_nor_active() {
        let record = fixtures::record("a", "1.0.0", &[]);
        assert!(!record.is_loaded());
        assert!(!record.is_active());
        assert_eq!(record.dependency_state, DepState::Unknown);
        assert!(record.graph_id.is_none());
    }

    #[test]
    fn record_with_instance_is_loaded_and_active() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut record = fixtures::record("a", "1.0.0", &[]);
        record.instance = Some(fixtures::RecordingPlugin::boxed("a", &journal));
        assert!(record.is_loaded());
        assert!(record.is_active());
        assert!(record.instance_ptr().is_some());
    }

    #[test]
    fn dropping_a_live_record_fires_the_teardown_hook() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        {
            let mut record = fixtures::record("a", "1.0.0", &[]);
            record.instance = Some(fixtures::RecordingPlugin::boxed("a", &journal));
        }
        assert_eq!(*journal.lock().unwrap(), vec!["a:unloading"]);
    }

    #[test]
    fn dropping_an_empty_record_is_silent() {
        let record = fixtures::record("a", "1.0.0", &[]);
        drop(record);
    }
}
