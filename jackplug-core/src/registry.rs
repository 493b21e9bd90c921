//! The plugin registry: every discovered record, the scan locations, the
//! most recent load order and the main-plugin slot.
//!
//! The dependency resolver and the load planner live here so the whole
//! planning pipeline can be exercised without shared objects on disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Callback, ReturnCode, emit};
use crate::graph::{Graph, Node};
use crate::record::{DepState, PluginRecord};
use crate::version::PluginVersion;

#[derive(Default)]
pub(crate) struct Registry {
    plugins: HashMap<String, PluginRecord>,
    locations: Vec<PathBuf>,
    load_order: Vec<String>,
    main_plugin: Option<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&PluginRecord> {
        self.plugins.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut PluginRecord> {
        self.plugins.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    pub fn insert(&mut self, name: String, record: PluginRecord) {
        self.plugins.insert(name, record);
    }

    pub fn remove(&mut self, name: &str) -> Option<PluginRecord> {
        self.load_order.retain(|n| n != name);
        if self.main_plugin.as_deref() == Some(name) {
            self.main_plugin = None;
        }
        self.plugins.remove(name)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Registered names in sorted order, so every walk over the registry is
    /// deterministic.
    pub fn sorted_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.plugins.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn locations(&self) -> Vec<PathBuf> {
        self.locations.clone()
    }

    /// Remember a directory that contributed at least one plugin. Kept
    /// unique and in first-seen order.
    pub fn add_location(&mut self, dir: &Path) {
        if !self.locations.iter().any(|known| known == dir) {
            self.locations.push(dir.to_path_buf());
        }
    }

    pub fn clear_locations(&mut self) {
        self.locations.clear();
    }

    pub fn load_order(&self) -> &[String] {
        &self.load_order
    }

    pub fn set_load_order(&mut self, order: Vec<String>) {
        self.load_order = order;
    }

    pub fn take_load_order(&mut self) -> Vec<String> {
        std::mem::take(&mut self.load_order)
    }

    pub fn main_plugin(&self) -> Option<&str> {
        self.main_plugin.as_deref()
    }

    /// Mark `name` as the main plugin. Succeeds only while no main plugin
    /// is set and `name` is registered.
    pub fn register_main(&mut self, name: &str) -> bool {
        if self.main_plugin.is_some() {
            return false;
        }
        match self.plugins.get_mut(name) {
            Some(record) => {
                record.is_main = true;
                self.main_plugin = Some(name.to_string());
                true
            }
            None => false,
        }
    }

    fn set_dependency_state(&mut self, name: &str, state: DepState) {
        if let Some(record) = self.plugins.get_mut(name) {
            record.dependency_state = state;
        }
    }

    /// Verify that every dependency of `name` is registered and
    /// version-compatible, transitively. Memoized on the record's
    /// dependency state; a record already on the recursion path resolves as
    /// success and leaves cycle detection to the topological sort.
    pub fn check_dependencies(
        &mut self,
        name: &str,
        callback: &mut Option<Callback<'_>>,
    ) -> ReturnCode {
        let Some(record) = self.plugins.get(name) else {
            return ReturnCode::LoadDependencyNotFound;
        };
        match record.dependency_state {
            DepState::Satisfied | DepState::Checking => return ReturnCode::Success,
            DepState::Missing => return ReturnCode::LoadDependencyNotFound,
            DepState::BadVersion => return ReturnCode::LoadDependencyBadVersion,
            DepState::Unknown => {}
        }

        let path = record.path.to_string_lossy().into_owned();
        let dependencies = record.descriptor.dependencies.clone();
        self.set_dependency_state(name, DepState::Checking);

        for dep in &dependencies {
            let Some(dep_record) = self.plugins.get(&dep.name) else {
                debug!(plugin = name, dependency = %dep.name, "dependency not found");
                self.set_dependency_state(name, DepState::Missing);
                emit(callback, ReturnCode::LoadDependencyNotFound, Some(&path));
                return ReturnCode::LoadDependencyNotFound;
            };

            if !PluginVersion::parse(&dep_record.descriptor.version).compatible(&dep.version) {
                debug!(
                    plugin = name,
                    dependency = %dep.name,
                    have = %dep_record.descriptor.version,
                    want = %dep.version,
                    "dependency version incompatible"
                );
                self.set_dependency_state(name, DepState::BadVersion);
                emit(callback, ReturnCode::LoadDependencyBadVersion, Some(&path));
                return ReturnCode::LoadDependencyBadVersion;
            }

            let code = self.check_dependencies(&dep.name, callback);
            if !code.is_success() {
                // transitive failure: this record's own answer stays open
                self.set_dependency_state(name, DepState::Unknown);
                return code;
            }
        }

        self.set_dependency_state(name, DepState::Satisfied);
        ReturnCode::Success
    }

    /// Run the resolver over every record and compute the load order.
    ///
    /// Dependency states and graph ids are re-evaluated from scratch on
    /// every call. With `try_to_continue` false the first resolver failure
    /// aborts the plan; otherwise failing records are simply left out
    /// (their `graph_id` stays `None`).
    pub fn plan_load_order(
        &mut self,
        try_to_continue: bool,
        callback: &mut Option<Callback<'_>>,
    ) -> Result<Vec<String>, ReturnCode> {
        let names = self.sorted_names();
        for name in &names {
            if let Some(record) = self.plugins.get_mut(name) {
                record.graph_id = None;
                record.dependency_state = DepState::Unknown;
            }
        }

        let mut nodes: Vec<Node> = Vec::with_capacity(names.len());
        for name in &names {
            let code = self.check_dependencies(name, callback);
            if !try_to_continue && !code.is_success() {
                return Err(code);
            }
            if let Some(record) = self.plugins.get_mut(name) {
                if record.dependency_state == DepState::Satisfied {
                    record.graph_id = Some(nodes.len());
                    nodes.push(Node::new(name.clone()));
                }
            }
        }

        // Wire edges in descriptor order; every dependency of a satisfied
        // record is itself satisfied, so it has a graph id.
        for name in &names {
            let Some(record) = self.plugins.get(name) else {
                continue;
            };
            let Some(node_id) = record.graph_id else {
                continue;
            };
            let parents: Vec<usize> = record
                .descriptor
                .dependencies
                .iter()
                .filter_map(|dep| self.plugins.get(&dep.name).and_then(|d| d.graph_id))
                .collect();
            nodes[node_id].parents = parents;
        }

        match Graph::new(nodes).topological_sort() {
            Ok(order) => Ok(order),
            Err(_) => {
                emit(callback, ReturnCode::LoadDependencyCycle, None);
                Err(ReturnCode::LoadDependencyCycle)
            }
        }
    }

    /// Names of active records that declare `name` as a dependency.
    pub fn active_dependents_of(&self, name: &str) -> Vec<String> {
        let mut dependents: Vec<String> = self
            .plugins
            .iter()
            .filter(|(_, record)| {
                record.is_active()
                    && record
                        .descriptor
                        .dependencies
                        .iter()
                        .any(|dep| dep.name == name)
            })
            .map(|(dependent, _)| dependent.clone())
            .collect();
        dependents.sort();
        dependents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::fixtures;

    fn registry_with(records: Vec<PluginRecord>) -> Registry {
        let mut registry = Registry::new();
        for record in records {
            registry.insert(record.descriptor.name.clone(), record);
        }
        registry
    }

    #[test]
    fn locations_stay_unique_and_ordered() {
        let mut registry = Registry::new();
        registry.add_location(Path::new("/a"));
        registry.add_location(Path::new("/b"));
        registry.add_location(Path::new("/a"));
        assert_eq!(
            registry.locations(),
            vec![PathBuf::from("/a"), PathBuf::from("/b")]
        );
    }

    #[test]
    fn register_main_requires_known_name_and_empty_slot() {
        let mut registry = registry_with(vec![fixtures::record("m", "1.0.0", &[])]);
        assert!(!registry.register_main("ghost"));
        assert!(registry.register_main("m"));
        assert_eq!(registry.main_plugin(), Some("m"));
        assert!(registry.get("m").unwrap().is_main);
        // slot already taken
        assert!(!registry.register_main("m"));
    }

    #[test]
    fn remove_scrubs_load_order_and_main_slot() {
        let mut registry = registry_with(vec![fixtures::record("m", "1.0.0", &[])]);
        registry.register_main("m");
        registry.set_load_order(vec!["m".to_string()]);
        registry.remove("m");
        assert!(registry.load_order().is_empty());
        assert!(registry.main_plugin().is_none());
        assert!(!registry.contains("m"));
    }

    #[test]
    fn resolver_accepts_satisfied_chain() {
        let mut registry = registry_with(vec![
            fixtures::record("a", "1.0.0", &[]),
            fixtures::record("b", "1.0.0", &[("a", "1.0.0")]),
        ]);
        let code = registry.check_dependencies("b", &mut None);
        assert!(code.is_success());
        assert_eq!(
            registry.get("b").unwrap().dependency_state,
            DepState::Satisfied
        );
    }

    #[test]
    fn resolver_reports_missing_dependency_with_dependent_path() {
        let mut registry = registry_with(vec![fixtures::record(
            "b",
            "1.0.0",
            &[("ghost", "1.0.0")],
        )]);
        let mut reported = Vec::new();
        let mut record_report = |code, detail: Option<&str>| {
            reported.push((code, detail.map(str::to_owned)));
        };
        let code = registry.check_dependencies("b", &mut Some(&mut record_report));
        assert_eq!(code, ReturnCode::LoadDependencyNotFound);
        assert_eq!(reported.len(), 1);
        assert!(reported[0].1.as_deref().unwrap().contains("libb"));
        assert_eq!(
            registry.get("b").unwrap().dependency_state,
            DepState::Missing
        );
    }

    #[test]
    fn resolver_reports_bad_version() {
        let mut registry = registry_with(vec![
            fixtures::record("a", "1.0.0", &[]),
            fixtures::record("b", "1.0.0", &[("a", "2.0.0")]),
        ]);
        let code = registry.check_dependencies("b", &mut None);
        assert_eq!(code, ReturnCode::LoadDependencyBadVersion);
        assert_eq!(
            registry.get("b").unwrap().dependency_state,
            DepState::BadVersion
        );
    }

    #[test]
    fn resolver_memoizes_failures() {
        let mut registry = registry_with(vec![fixtures::record(
            "b",
            "1.0.0",
            &[("ghost", "1.0.0")],
        )]);
        assert_eq!(
            registry.check_dependencies("b", &mut None),
            ReturnCode::LoadDependencyNotFound
        );
        // second call answers from the memo without a callback
        let mut count = 0usize;
        let mut count_report = |_, _: Option<&str>| count += 1;
        assert_eq!(
            registry.check_dependencies("b", &mut Some(&mut count_report)),
            ReturnCode::LoadDependencyNotFound
        );
        assert_eq!(count, 0);
    }

    #[test]
    fn resolver_propagates_transitive_failure() {
        let mut registry = registry_with(vec![
            fixtures::record("a", "1.0.0", &[("ghost", "1.0.0")]),
            fixtures::record("b", "1.0.0", &[("a", "1.0.0")]),
        ]);
        let code = registry.check_dependencies("b", &mut None);
        assert_eq!(code, ReturnCode::LoadDependencyNotFound);
        // the direct failure is memoized on a, not on b
        assert_eq!(registry.get("a").unwrap().dependency_state, DepState::Missing);
        assert_eq!(registry.get("b").unwrap().dependency_state, DepState::Unknown);
    }

    #[test]
    fn resolver_terminates_on_cycles() {
        let mut registry = registry_with(vec![
            fixtures::record("a", "1.0.0", &[("b", "1.0.0")]),
            fixtures::record("b", "1.0.0", &[("a", "1.0.0")]),
        ]);
        // the resolver leaves cycle detection to the sort
        assert!(registry.check_dependencies("a", &mut None).is_success());
    }

    #[test]
    fn plan_orders_linear_chain() {
        let mut registry = registry_with(vec![
            fixtures::record("c", "1.0.0", &[("b", "1.0.0")]),
            fixtures::record("a", "1.0.0", &[]),
            fixtures::record("b", "1.0.0", &[("a", "1.0.0")]),
        ]);
        let order = registry.plan_load_order(true, &mut None).unwrap();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn plan_orders_diamond_with_root_first_and_sink_last() {
        let mut registry = registry_with(vec![
            fixtures::record("a", "1.0.0", &[]),
            fixtures::record("b1", "1.0.0", &[("a", "1.0.0")]),
            fixtures::record("b2", "1.0.0", &[("a", "1.0.0")]),
            fixtures::record("c", "1.0.0", &[("b1", "1.0.0"), ("b2", "1.0.0")]),
        ]);
        let order = registry.plan_load_order(true, &mut None).unwrap();
        assert_eq!(order.len(), 4);
        assert_eq!(order.first().map(String::as_str), Some("a"));
        assert_eq!(order.last().map(String::as_str), Some("c"));
    }

    #[test]
    fn plan_aborts_on_failure_when_not_continuing() {
        let mut registry = registry_with(vec![
            fixtures::record("a", "1.0.0", &[]),
            fixtures::record("b", "1.0.0", &[("ghost", "1.0.0")]),
        ]);
        let result = registry.plan_load_order(false, &mut None);
        assert_eq!(result, Err(ReturnCode::LoadDependencyNotFound));
    }

    #[test]
    fn plan_skips_failing_records_when_continuing() {
        let mut registry = registry_with(vec![
            fixtures::record("a", "1.0.0", &[]),
            fixtures::record("b", "1.0.0", &[("ghost", "1.0.0")]),
        ]);
        let order = registry.plan_load_order(true, &mut None).unwrap();
        assert_eq!(order, vec!["a"]);
        assert!(registry.get("b").unwrap().graph_id.is_none());
        assert!(registry.get("a").unwrap().graph_id.is_some());
    }

    #[test]
    fn plan_reports_version_mismatch() {
        let mut registry = registry_with(vec![
            fixtures::record("a", "1.0.0", &[]),
            fixtures::record("b", "1.0.0", &[("a", "2.0.0")]),
        ]);
        let result = registry.plan_load_order(false, &mut None);
        assert_eq!(result, Err(ReturnCode::LoadDependencyBadVersion));
    }

    #[test]
    fn plan_rejects_cycles_with_nothing_ordered() {
        let mut registry = registry_with(vec![
            fixtures::record("a", "1.0.0", &[("b", "1.0.0")]),
            fixtures::record("b", "1.0.0", &[("a", "1.0.0")]),
        ]);
        let mut reported = Vec::new();
        let mut record_report = |code, _: Option<&str>| reported.push(code);
        let result = registry.plan_load_order(true, &mut Some(&mut record_report));
        assert_eq!(result, Err(ReturnCode::LoadDependencyCycle));
        assert_eq!(reported, vec![ReturnCode::LoadDependencyCycle]);
    }

    #[test]
    fn plan_is_recomputed_on_every_call() {
        let mut registry = registry_with(vec![fixtures::record(
            "b",
            "1.0.0",
            &[("a", "1.0.0")],
        )]);
        assert_eq!(
            registry.plan_load_order(false, &mut None),
            Err(ReturnCode::LoadDependencyNotFound)
        );
        // the missing dependency appears; the next plan must see it
        registry.insert(
            "a".to_string(),
            fixtures::record("a", "1.0.0", &[]),
        );
        let order = registry.plan_load_order(false, &mut None).unwrap();
        assert_eq!(order, vec!["a", "b"]);
    }

    #[test]
    fn active_dependents_ignore_inactive_records() {
        let journal = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut active = fixtures::record("b", "1.0.0", &[("a", "1.0.0")]);
        active.instance = Some(fixtures::RecordingPlugin::boxed("b", &journal));
        let mut registry = registry_with(vec![
            fixtures::record("a", "1.0.0", &[]),
            active,
            fixtures::record("c", "1.0.0", &[("a", "1.0.0")]),
        ]);
        assert_eq!(registry.active_dependents_of("a"), vec!["b"]);
        // drop the instance before the registry goes away
        drop(registry.get_mut("b").and_then(|record| record.instance.take()));
    }
}
