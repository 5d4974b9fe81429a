//! Composition files — the components a node has to run.
//!
//! ```toml
//! name = "shop"
//!
//! [[components]]
//! name = "cart"
//! factory = "shop-cart-factory"
//! language = "python"
//! isolate = "frontend"   # optional pin
//! ```

use std::path::Path;

use anyhow::Context;
use conclave_core::{Component, Isolate, LifecycleEvent};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Composition {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub components: Vec<Component>,
}

impl Composition {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading composition {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("parsing composition {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let composition: Composition = toml::from_str(content)?;
        for component in &composition.components {
            component.validate()?;
        }
        Ok(composition)
    }
}

/// Running isolates, as a JSON array.
pub fn load_isolates(path: &Path) -> anyhow::Result<Vec<Isolate>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading isolates {}", path.display()))?;
    let isolates: Vec<Isolate> = serde_json::from_str(&content)?;
    for component in isolates.iter().flat_map(|i| i.components.iter()) {
        component.validate()?;
    }
    Ok(isolates)
}

/// Lifecycle events to replay, as a JSON array.
pub fn load_events(path: &Path) -> anyhow::Result<Vec<LifecycleEvent>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading events {}", path.display()))?;
    Ok(serde_json::from_str(&content)?)
}
