use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::error::{EventSourcingError, Result};
use super::event::variant_tag;

// ============================================================================
// Event Class Map - Logical Names ↔ Implementation Paths
// ============================================================================
//
// Stored rows carry the logical event name recorded at write time. The map
// is only consulted to interpret it, so renaming an event type never
// invalidates history: update the mapping, keep the name.
//
// Built once at process start and shared read-only behind an `Arc`.
//
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventMapConfig {
    /// Aggregate tokens, in precedence order for stream name resolution.
    #[serde(default)]
    pub aggregates: Vec<String>,

    #[serde(default)]
    pub events: Vec<EventMapping>,

    /// Exact event (path or logical name) → stream name.
    #[serde(default)]
    pub overrides: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMapping {
    pub name: String,
    pub path: String,
}

impl EventMapConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            EventSourcingError::Config(format!("cannot read event map {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&contents)
    }
}

#[derive(Debug, Clone)]
pub struct EventClassMap {
    aggregates: Vec<String>,
    name_by_path: HashMap<String, String>,
    path_by_name: HashMap<String, String>,
    overrides: HashMap<String, String>,
}

impl EventClassMap {
    pub fn new(config: EventMapConfig) -> Result<Self> {
        let mut name_by_path = HashMap::with_capacity(config.events.len());
        let mut path_by_name = HashMap::with_capacity(config.events.len());

        for mapping in config.events {
            if path_by_name.contains_key(&mapping.name) {
                return Err(EventSourcingError::Config(format!(
                    "event name {} is mapped more than once",
                    mapping.name
                )));
            }
            if name_by_path.contains_key(&mapping.path) {
                return Err(EventSourcingError::Config(format!(
                    "event path {} is mapped more than once",
                    mapping.path
                )));
            }
            name_by_path.insert(mapping.path.clone(), mapping.name.clone());
            path_by_name.insert(mapping.name, mapping.path);
        }

        tracing::debug!(
            aggregates = config.aggregates.len(),
            events = name_by_path.len(),
            overrides = config.overrides.len(),
            "Event class map initialised"
        );

        Ok(Self {
            aggregates: config.aggregates,
            name_by_path,
            path_by_name,
            overrides: config.overrides.into_iter().collect(),
        })
    }

    /// Logical name for an implementation path; unmapped paths are their own name.
    pub fn logical_name(&self, path: &str) -> String {
        self.name_by_path
            .get(path)
            .cloned()
            .unwrap_or_else(|| path.to_string())
    }

    /// Implementation path for a logical name; unmapped names are their own path.
    pub fn implementation_path(&self, name: &str) -> String {
        self.path_by_name
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    /// Resolve the stream an event belongs to.
    ///
    /// 1. exact override (by path or by logical name)
    /// 2. first configured aggregate token contained in the event path
    /// 3. the bare event name
    pub fn stream_name_for(&self, path_or_name: &str) -> String {
        let (path, name) = if let Some(name) = self.name_by_path.get(path_or_name) {
            (path_or_name.to_string(), name.clone())
        } else if let Some(path) = self.path_by_name.get(path_or_name) {
            (path.clone(), path_or_name.to_string())
        } else {
            (path_or_name.to_string(), path_or_name.to_string())
        };

        if let Some(stream) = self.overrides.get(&path).or_else(|| self.overrides.get(&name)) {
            return stream.clone();
        }

        if let Some(token) = self.aggregates.iter().find(|token| path.contains(token.as_str())) {
            return token.clone();
        }

        variant_tag(path_or_name).to_string()
    }

    pub fn aggregates(&self) -> &[String] {
        &self.aggregates
    }
}
