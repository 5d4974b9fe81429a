//! Placement candidates — isolates under construction during a vote.
//!
//! An [`EligibleIsolate`] is a cheap, clonable handle: every clone points at
//! the same state, so the distributor, the electors and the vote record all
//! see the same candidate. Identity (equality, hashing, ordering) is the
//! numeric id assigned by whoever creates the candidate.
//!
//! Two flavours exist:
//! - **fresh** candidates, created for a distribution pass (the neutral
//!   isolate of each election starts this way);
//! - **wrapped** candidates, built from an already running [`Isolate`]; only
//!   the components added during the pass count as new for them.
//!
//! Each candidate keeps a *visible* subset of its components. The distributor
//! hides the components being placed so the criteria compare a component
//! with its future neighbours and not with itself.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Serialize, Serializer};

use crate::types::{Component, Isolate};

#[derive(Debug)]
struct CandidateState {
    name: Option<String>,
    proposed_name: Option<String>,
    language: Option<String>,
    components: BTreeMap<String, Component>,
    visible: BTreeSet<String>,
    added: BTreeSet<String>,
    wrapped: bool,
}

/// An isolate that can be elected to host a component.
#[derive(Clone)]
pub struct EligibleIsolate {
    id: u64,
    state: Arc<Mutex<CandidateState>>,
}

impl EligibleIsolate {
    /// A fresh candidate with an optional name, language and content.
    pub fn new(
        id: u64,
        name: Option<&str>,
        language: Option<&str>,
        components: impl IntoIterator<Item = Component>,
    ) -> Self {
        let components: BTreeMap<String, Component> = components
            .into_iter()
            .map(|c| (c.name.clone(), c))
            .collect();
        let visible = components.keys().cloned().collect();
        Self {
            id,
            state: Arc::new(Mutex::new(CandidateState {
                name: name.map(str::to_string),
                proposed_name: None,
                language: language.map(str::to_string),
                components,
                visible,
                added: BTreeSet::new(),
                wrapped: false,
            })),
        }
    }

    /// The nameless, empty, language-agnostic candidate.
    pub fn neutral(id: u64) -> Self {
        Self::new(id, None, None, Vec::new())
    }

    /// Wrap an already running isolate.
    pub fn wrap(id: u64, isolate: &Isolate) -> Self {
        let candidate = Self::new(
            id,
            Some(&isolate.name),
            isolate.language.as_deref(),
            isolate.components.iter().cloned(),
        );
        candidate.lock().wrapped = true;
        candidate
    }

    fn lock(&self) -> MutexGuard<'_, CandidateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> Option<String> {
        self.lock().name.clone()
    }

    pub fn proposed_name(&self) -> Option<String> {
        self.lock().proposed_name.clone()
    }

    pub fn language(&self) -> Option<String> {
        self.lock().language.clone()
    }

    pub fn is_wrapped(&self) -> bool {
        self.lock().wrapped
    }

    /// Visible components, sorted by name.
    pub fn components(&self) -> Vec<Component> {
        let state = self.lock();
        state
            .visible
            .iter()
            .filter_map(|name| state.components.get(name).cloned())
            .collect()
    }

    /// Names of the visible components.
    pub fn component_names(&self) -> BTreeSet<String> {
        self.lock().visible.clone()
    }

    pub fn contains(&self, component: &str) -> bool {
        self.lock().visible.contains(component)
    }

    pub fn is_empty(&self) -> bool {
        self.lock().visible.is_empty()
    }

    /// Nameless and without visible components.
    pub fn is_neutral(&self) -> bool {
        let state = self.lock();
        state.name.is_none() && state.visible.is_empty()
    }

    /// Hide the given components from the visible set.
    pub fn hide<'a>(&self, names: impl IntoIterator<Item = &'a str>) {
        let mut state = self.lock();
        for name in names {
            state.visible.remove(name);
        }
    }

    /// Show a component again. Does nothing if the component was never
    /// part of this candidate.
    pub fn unhide(&self, name: &str) {
        let mut state = self.lock();
        if state.components.contains_key(name) {
            state.visible.insert(name.to_string());
        }
    }

    /// Offer a name to an unnamed candidate. Only the first proposal of a
    /// vote is retained.
    pub fn propose_rename(&self, name: &str) -> bool {
        let mut state = self.lock();
        if state.name.is_some() || state.proposed_name.is_some() {
            return false;
        }
        state.proposed_name = Some(name.to_string());
        true
    }

    /// The candidate won: adopt the pending proposal, if any. Named
    /// candidates are left untouched.
    pub fn accept_rename(&self) {
        let mut state = self.lock();
        if state.name.is_none() {
            state.name = state.proposed_name.take();
        }
    }

    /// The candidate lost: forget the pending proposal.
    pub fn reject_rename(&self) {
        self.lock().proposed_name = None;
    }

    /// Commit a component to this candidate. The first component decides
    /// the language of a language-agnostic candidate.
    pub fn add_component(&self, component: Component) {
        let mut state = self.lock();
        if state.language.is_none() {
            state.language = component.language.clone();
        }
        let name = component.name.clone();
        state.components.insert(name.clone(), component);
        state.visible.insert(name.clone());
        if state.wrapped {
            state.added.insert(name);
        }
    }

    /// Components gained during this pass.
    pub fn new_components(&self) -> Vec<Component> {
        let state = self.lock();
        let names = if state.wrapped { &state.added } else { &state.visible };
        names
            .iter()
            .filter_map(|name| state.components.get(name).cloned())
            .collect()
    }

    /// Name the candidate `{node}-{language}-auto{counter:02}` unless it
    /// already has a name. Returns the (possibly pre-existing) name.
    pub fn generate_name(&self, node: &str, counter: u64) -> String {
        let mut state = self.lock();
        if let Some(name) = &state.name {
            return name.clone();
        }
        let language = state.language.as_deref().unwrap_or("any");
        let name = format!("{node}-{language}-auto{counter:02}");
        state.name = Some(name.clone());
        name
    }

    /// Committed view of this candidate; `None` while it is still unnamed.
    pub fn to_isolate(&self) -> Option<Isolate> {
        let state = self.lock();
        let name = state.name.clone()?;
        Some(Isolate {
            name,
            language: state.language.clone(),
            components: state
                .visible
                .iter()
                .filter_map(|n| state.components.get(n).cloned())
                .collect(),
        })
    }

    /// Label used in logs and vote records.
    pub fn label(&self) -> String {
        let state = self.lock();
        match (&state.name, state.visible.is_empty()) {
            (Some(name), _) => name.clone(),
            (None, true) => "Neutral".to_string(),
            (None, false) => format!("unnamed-{}", self.id),
        }
    }
}

impl PartialEq for EligibleIsolate {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for EligibleIsolate {}

impl Hash for EligibleIsolate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for EligibleIsolate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EligibleIsolate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

impl fmt::Display for EligibleIsolate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl fmt::Debug for EligibleIsolate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("EligibleIsolate")
            .field("id", &self.id)
            .field("name", &state.name)
            .field("language", &state.language)
            .field("visible", &state.visible)
            .finish()
    }
}

impl Serialize for EligibleIsolate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.label())
    }
}
