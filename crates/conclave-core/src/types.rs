//! Domain types shared by the placement core.
//!
//! Components are identified by name only: two `Component` values with the
//! same name compare equal whatever their other attributes are. Isolates are
//! the committed placement targets handed to the launching layer.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

// ── Components ─────────────────────────────────────────────────────

/// A named, independently placeable unit of application logic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Component {
    /// Unique name on the node. Never contains a `.`.
    pub name: String,
    /// Identifier of the factory implementing the component.
    pub factory: String,
    /// Implementation language, filled by the upstream resolver.
    #[serde(default)]
    pub language: Option<String>,
    /// Isolate the configuration pins this component to.
    #[serde(default)]
    pub isolate: Option<String>,
    /// Node decided by a higher layer.
    #[serde(default)]
    pub node: Option<String>,
    /// Component properties.
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
    /// Wires: field name -> component name.
    #[serde(default)]
    pub wires: BTreeMap<String, String>,
    /// Filters: field name -> LDAP filter.
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
}

impl Component {
    /// Create a component, validating its name.
    pub fn new(name: impl Into<String>, factory: impl Into<String>) -> CoreResult<Self> {
        let component = Self {
            name: name.into(),
            factory: factory.into(),
            language: None,
            isolate: None,
            node: None,
            properties: BTreeMap::new(),
            wires: BTreeMap::new(),
            filters: BTreeMap::new(),
        };
        component.validate()?;
        Ok(component)
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_isolate(mut self, isolate: impl Into<String>) -> Self {
        self.isolate = Some(isolate.into());
        self
    }

    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn with_wire(mut self, field: impl Into<String>, target: impl Into<String>) -> Self {
        self.wires.insert(field.into(), target.into());
        self
    }

    /// Check the name rules (non-empty, no dot). Deserialized components
    /// must go through this before being handed to the scheduler.
    pub fn validate(&self) -> CoreResult<()> {
        if self.name.is_empty() || self.name.contains('.') {
            return Err(CoreError::InvalidComponentName(self.name.clone()));
        }
        Ok(())
    }
}

impl PartialEq for Component {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Component {}

impl Hash for Component {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl PartialOrd for Component {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Component {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.factory)
    }
}

// ── Languages ──────────────────────────────────────────────────────

/// True for every Python flavour (`python`, `python3`, ...).
pub fn is_python_family(language: &str) -> bool {
    language.starts_with("python")
}

/// Can an isolate running `isolate_language` host a component written in
/// `component_language`?
///
/// Language-agnostic isolates (`None`) accept anything. Python variants
/// accept each other.
pub fn languages_compatible(
    isolate_language: Option<&str>,
    component_language: Option<&str>,
) -> bool {
    match (isolate_language, component_language) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(iso), Some(comp)) => {
            iso == comp || (is_python_family(iso) && is_python_family(comp))
        }
    }
}

// ── Isolates ───────────────────────────────────────────────────────

/// A committed isolate: a name, a language and its member components.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Isolate {
    pub name: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub components: BTreeSet<Component>,
}

impl Isolate {
    pub fn new(
        name: impl Into<String>,
        language: Option<&str>,
        components: impl IntoIterator<Item = Component>,
    ) -> Self {
        Self {
            name: name.into(),
            language: language.map(str::to_string),
            components: components.into_iter().collect(),
        }
    }

    /// Sorted names of the member components.
    pub fn component_names(&self) -> Vec<String> {
        self.components.iter().map(|c| c.name.clone()).collect()
    }
}

// ── Lifecycle events ───────────────────────────────────────────────

/// Kind of lifecycle event delivered to the criteria.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Stability tick: the components behaved since the previous tick.
    #[serde(rename = "timer")]
    Timer,
    /// The isolate hosting the components crashed.
    #[serde(rename = "isolate.lost")]
    IsolateLost,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Timer => "timer",
            EventKind::IsolateLost => "isolate.lost",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A crash or stability event about the components of one isolate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub kind: EventKind,
    /// Name of the source isolate, when known.
    #[serde(default)]
    pub isolate: Option<String>,
    pub components: Vec<Component>,
    /// Unix timestamp (seconds) of the event.
    #[serde(default = "epoch_secs")]
    pub timestamp: u64,
}

impl LifecycleEvent {
    pub fn new(
        kind: EventKind,
        isolate: Option<&str>,
        components: impl IntoIterator<Item = Component>,
    ) -> Self {
        Self {
            kind,
            isolate: isolate.map(str::to_string),
            components: components.into_iter().collect(),
            timestamp: epoch_secs(),
        }
    }

    pub fn timer(isolate: Option<&str>, components: impl IntoIterator<Item = Component>) -> Self {
        Self::new(EventKind::Timer, isolate, components)
    }

    pub fn isolate_lost(
        isolate: Option<&str>,
        components: impl IntoIterator<Item = Component>,
    ) -> Self {
        Self::new(EventKind::IsolateLost, isolate, components)
    }

    /// Override the event timestamp.
    pub fn at(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Sorted, de-duplicated names of the implicated components.
    pub fn component_names(&self) -> BTreeSet<String> {
        self.components.iter().map(|c| c.name.clone()).collect()
    }
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_rejects_dotted_name() {
        assert!(Component::new("a.b", "factory").is_err());
        assert!(Component::new("", "factory").is_err());
        assert!(Component::new("ab", "factory").is_ok());
    }

    #[test]
    fn component_identity_is_the_name() {
        let a = Component::new("a", "f1").unwrap().with_language("java");
        let b = Component::new("a", "f2").unwrap();
        assert_eq!(a, b);

        let set: BTreeSet<Component> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn python_variants_are_compatible() {
        assert!(languages_compatible(Some("python"), Some("python3")));
        assert!(languages_compatible(Some("python3"), Some("python")));
        assert!(languages_compatible(None, Some("java")));
        assert!(!languages_compatible(Some("java"), Some("python")));
        assert!(!languages_compatible(Some("java"), None));
    }

    #[test]
    fn event_kind_serializes_as_wire_name() {
        let json = serde_json::to_string(&EventKind::IsolateLost).unwrap();
        assert_eq!(json, "\"isolate.lost\"");
        let kind: EventKind = serde_json::from_str("\"timer\"").unwrap();
        assert_eq!(kind, EventKind::Timer);
    }

    #[test]
    fn event_names_are_sorted_and_unique() {
        let event = LifecycleEvent::isolate_lost(
            Some("iso"),
            vec![
                Component::new("b", "f").unwrap(),
                Component::new("a", "f").unwrap(),
                Component::new("b", "f").unwrap(),
            ],
        )
        .at(42);
        let names: Vec<String> = event.component_names().into_iter().collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(event.timestamp, 42);
    }

    #[test]
    fn epoch_secs_returns_reasonable_value() {
        assert!(epoch_secs() > 1_704_067_200);
    }
}
