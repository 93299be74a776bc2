//! Lookup table of max connections per database instance class and parameter group.

use serde::Deserialize;

use std::collections::HashMap;

const EMBEDDED_TABLE: &str = include_str!("../data/max_connections.json");
const DEFAULT_GROUP: &str = "default";

/// Two-level mapping `instance class -> (parameter group -> max connections)`. Each class
/// may have a `default` entry used when there is no exact match for the parameter group.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct MaxConnectionsTable {
    classes: HashMap<String, HashMap<String, i64>>,
}

impl MaxConnectionsTable {
    /// Loads the table shipped with the exporter.
    ///
    /// # Errors
    ///
    /// Returns an error if the embedded table is malformed.
    pub fn embedded() -> Result<Self, serde_json::Error> {
        Self::from_json(EMBEDDED_TABLE)
    }

    /// Parses a table from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Looks up max connections for an exact `(class, group)` pair, falling back
    /// to `(class, "default")`. Returns `None` if the class is unknown.
    pub fn lookup(&self, instance_class: &str, parameter_group: Option<&str>) -> Option<i64> {
        let groups = self.classes.get(instance_class)?;
        parameter_group
            .and_then(|group| groups.get(group))
            .or_else(|| groups.get(DEFAULT_GROUP))
            .copied()
    }

    /// Returns the number of known instance classes.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Checks whether this table is empty.
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
