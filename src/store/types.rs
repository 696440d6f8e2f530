//! Configuration documents and record types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A stored record: a JSON object carrying `_id` plus client fields.
pub type Document = Map<String, Value>;

/// Field holding the server-assigned record identity.
pub const ID_FIELD: &str = "_id";

/// A project in the configuration collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectDefinition {
    /// Server-assigned identity; schemas are keyed by it.
    pub id: String,
    /// Unique name, used as the first path segment.
    pub name: String,
    /// Modules in declaration order.
    #[serde(default)]
    pub modules: Vec<ModuleDefinition>,
}

impl ProjectDefinition {
    /// Path keys this project contributes to the routing table.
    pub fn path_keys(&self) -> impl Iterator<Item = String> + '_ {
        self.modules.iter().map(move |m| path_key(&self.name, &m.name))
    }
}

/// A named sub-resource of a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDefinition {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<String>,
}

impl ModuleDefinition {
    pub fn new(name: impl Into<String>, fields: &[&str]) -> Self {
        Self {
            name: name.into(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }
}

/// Raw JSON-Schema-shaped document attached to a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaDefinition(pub Value);

impl SchemaDefinition {
    /// `null` and `{}` carry no constraints.
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }
}

/// A change observed on the configuration collection.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Inserted {
        current: ProjectDefinition,
    },
    Updated {
        prior: Option<ProjectDefinition>,
        current: ProjectDefinition,
    },
    Deleted {
        project_id: String,
        /// Pre-image; required to know which collections to drop.
        prior: Option<ProjectDefinition>,
    },
}

impl ChangeEvent {
    /// Label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ChangeEvent::Inserted { .. } => "insert",
            ChangeEvent::Updated { .. } => "update",
            ChangeEvent::Deleted { .. } => "delete",
        }
    }
}

/// Identity of a record within a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId(Uuid);

impl RecordId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Routing key for a project/module pair.
pub fn path_key(project: &str, module: &str) -> String {
    format!("/{}/{}", project, module)
}

/// Storage collection backing a project/module pair.
pub fn collection_name(project: &str, module: &str) -> String {
    format!("{}_{}", project, module)
}
