//! NodeStatusStore — component <-> isolate mapping guarded by one mutex.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write as _;
use std::sync::{Mutex, MutexGuard, PoisonError};

use conclave_core::{Component, Isolate};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{StatusError, StatusResult};

#[derive(Debug, Default)]
struct Tables {
    /// Component name -> isolate name.
    placement: HashMap<String, String>,
    /// Component name -> description.
    components: HashMap<String, Component>,
    /// Isolate name -> member component names.
    isolates: BTreeMap<String, BTreeSet<String>>,
    /// Isolate name -> language.
    languages: HashMap<String, Option<String>>,
}

/// Serializable view of the store: isolate name -> sorted component names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub isolates: BTreeMap<String, Vec<String>>,
}

/// Thread-safe record of the isolates running on this node.
#[derive(Debug, Default)]
pub struct NodeStatusStore {
    tables: Mutex<Tables>,
}

impl NodeStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the given isolates and their components. A component already
    /// known in another isolate is moved.
    pub fn store(&self, isolates: &[Isolate]) {
        insert(&mut self.lock(), isolates);
    }

    /// Swap the whole content for the given isolates in one step.
    pub fn replace(&self, isolates: &[Isolate]) {
        let mut tables = self.lock();
        *tables = Tables::default();
        insert(&mut tables, isolates);
    }

    /// Forget the given components. Absent names are logged and skipped.
    pub fn remove<S: AsRef<str>>(&self, names: &[S]) {
        let mut tables = self.lock();
        for name in names {
            let name = name.as_ref();
            tables.components.remove(name);
            let placed = tables.placement.remove(name);
            match placed {
                Some(isolate) => detach(&mut tables, &isolate, name),
                None => warn!(component = name, "unknown component, not removed"),
            }
        }
    }

    /// Drop every record.
    pub fn clear(&self) {
        *self.lock() = Tables::default();
    }

    /// Components hosted by the given isolate, sorted by name. Empty for an
    /// unknown isolate.
    pub fn get_components_for_isolate(&self, isolate: &str) -> Vec<Component> {
        let tables = self.lock();
        tables
            .isolates
            .get(isolate)
            .map(|members| {
                members
                    .iter()
                    .filter_map(|name| tables.components.get(name).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Name of the isolate hosting a component.
    pub fn get_isolate_for_component(&self, component: &str) -> StatusResult<String> {
        self.lock()
            .placement
            .get(component)
            .cloned()
            .ok_or_else(|| StatusError::UnknownComponent(component.to_string()))
    }

    /// Full description of a known isolate.
    pub fn isolate(&self, name: &str) -> StatusResult<Isolate> {
        let tables = self.lock();
        let members = tables
            .isolates
            .get(name)
            .ok_or_else(|| StatusError::UnknownIsolate(name.to_string()))?;
        Ok(build_isolate(&tables, name, members))
    }

    /// True if every named component runs in the same isolate. False for an
    /// empty list or as soon as one component is unknown.
    pub fn neighbours<S: AsRef<str>>(&self, names: &[S]) -> bool {
        let tables = self.lock();
        let Some(first) = names.first() else {
            return false;
        };
        let Some(isolate) = tables.placement.get(first.as_ref()) else {
            return false;
        };
        let Some(members) = tables.isolates.get(isolate) else {
            return false;
        };
        names.iter().all(|name| members.contains(name.as_ref()))
    }

    /// Sorted names of the known isolates.
    pub fn isolates(&self) -> Vec<String> {
        self.lock().isolates.keys().cloned().collect()
    }

    /// Every known component, sorted by name.
    pub fn components(&self) -> Vec<Component> {
        let tables = self.lock();
        let mut components: Vec<Component> = tables.components.values().cloned().collect();
        components.sort();
        components
    }

    /// Every known isolate with its components, sorted by name.
    pub fn running_isolates(&self) -> Vec<Isolate> {
        let tables = self.lock();
        tables
            .isolates
            .iter()
            .map(|(name, members)| build_isolate(&tables, name, members))
            .collect()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let tables = self.lock();
        StatusSnapshot {
            isolates: tables
                .isolates
                .iter()
                .map(|(name, members)| (name.clone(), members.iter().cloned().collect()))
                .collect(),
        }
    }

    /// Human-readable listing, one isolate per line.
    pub fn dump(&self) -> String {
        let tables = self.lock();
        let mut out = String::new();
        for (name, members) in &tables.isolates {
            let members: Vec<&str> = members.iter().map(String::as_str).collect();
            let _ = writeln!(out, "{name}: {}", members.join(", "));
        }
        out
    }
}

fn insert(tables: &mut Tables, isolates: &[Isolate]) {
    for isolate in isolates {
        tables
            .languages
            .insert(isolate.name.clone(), isolate.language.clone());
        tables.isolates.entry(isolate.name.clone()).or_default();

        for component in &isolate.components {
            let previous = tables
                .placement
                .insert(component.name.clone(), isolate.name.clone());
            if let Some(previous) = previous.filter(|p| *p != isolate.name) {
                detach(tables, &previous, &component.name);
            }
            tables
                .components
                .insert(component.name.clone(), component.clone());
            if let Some(members) = tables.isolates.get_mut(&isolate.name) {
                members.insert(component.name.clone());
            }
        }
        debug!(isolate = %isolate.name, components = isolate.components.len(), "isolate stored");
    }
}

/// Remove a component from an isolate's member set, dropping the isolate
/// once empty.
fn detach(tables: &mut Tables, isolate: &str, component: &str) {
    let now_empty = match tables.isolates.get_mut(isolate) {
        Some(members) => {
            members.remove(component);
            members.is_empty()
        }
        None => false,
    };
    if now_empty {
        tables.isolates.remove(isolate);
        tables.languages.remove(isolate);
        debug!(%isolate, "isolate emptied");
    }
}

fn build_isolate(tables: &Tables, name: &str, members: &BTreeSet<String>) -> Isolate {
    Isolate {
        name: name.to_string(),
        language: tables.languages.get(name).cloned().flatten(),
        components: members
            .iter()
            .filter_map(|n| tables.components.get(n).cloned())
            .collect(),
    }
}
