//! Known devices and the tool declarations built from them.
//!
//! The directory is a YAML (or JSON) file:
//!
//! ```yaml
//! entities:
//!   - entity_id: light.kitchen
//!     name: Kitchen light
//!     area: Kitchen
//!   - entity_id: climate.hallway
//!     name: Thermostat
//! ```
//!
//! A bare list of entries is accepted as well.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::sync::LazyLock;
use thiserror::Error;

use crate::core::live::messages::{FunctionDeclaration, Tool};

/// Tool that invokes a control-plane service.
pub const CONTROL_DEVICE_TOOL: &str = "control_home_device";
/// Tool that reads an entity's current state.
pub const GET_STATE_TOOL: &str = "get_device_state";

static ENTITY_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9_]+\.[a-z0-9_]+$").expect("entity id pattern compiles")
});

/// `domain.object_id`, lower-case ASCII, digits and underscores.
pub fn is_valid_entity_id(entity_id: &str) -> bool {
    ENTITY_ID_PATTERN.is_match(entity_id)
}

#[derive(Debug, Error)]
pub enum EntityDirectoryError {
    #[error("Failed to read entity directory {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse entity directory: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid entity id '{0}'")]
    InvalidEntityId(String),
}

/// One known device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityInfo {
    pub entity_id: String,
    #[serde(default, alias = "friendly_name")]
    pub name: Option<String>,
    #[serde(default)]
    pub area: Option<String>,
    /// Supported features, e.g. `brightness`, `color_temp`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
}

impl EntityInfo {
    /// Part before the dot.
    pub fn domain(&self) -> &str {
        self.entity_id
            .split_once('.')
            .map(|(domain, _)| domain)
            .unwrap_or(&self.entity_id)
    }

    /// Friendly name, falling back to the id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.entity_id)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DirectoryFile {
    Wrapped { entities: Vec<EntityInfo> },
    List(Vec<EntityInfo>),
}

/// The devices the assistant may talk about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityDirectory {
    entities: Vec<EntityInfo>,
}

impl EntityDirectory {
    /// Build from entries, validating ids and dropping duplicates.
    pub fn new(entries: Vec<EntityInfo>) -> Result<Self, EntityDirectoryError> {
        let mut seen = HashSet::new();
        let mut entities = Vec::with_capacity(entries.len());
        for entry in entries {
            if !is_valid_entity_id(&entry.entity_id) {
                return Err(EntityDirectoryError::InvalidEntityId(entry.entity_id));
            }
            if !seen.insert(entry.entity_id.clone()) {
                tracing::warn!(entity_id = %entry.entity_id, "Duplicate entity in directory");
                continue;
            }
            entities.push(entry);
        }
        Ok(Self { entities })
    }

    /// Parse YAML or JSON text.
    pub fn parse(text: &str) -> Result<Self, EntityDirectoryError> {
        let entries = match serde_yaml::from_str::<DirectoryFile>(text)? {
            DirectoryFile::Wrapped { entities } => entities,
            DirectoryFile::List(entities) => entities,
        };
        Self::new(entries)
    }

    /// Load a directory file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EntityDirectoryError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| EntityDirectoryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let directory = Self::parse(&text)?;
        tracing::info!(
            path = %path.display(),
            entities = directory.len(),
            "Loaded entity directory"
        );
        Ok(directory)
    }

    pub fn entities(&self) -> &[EntityInfo] {
        &self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn contains(&self, entity_id: &str) -> bool {
        self.entities.iter().any(|e| e.entity_id == entity_id)
    }

    /// Distinct domains, sorted.
    pub fn domains(&self) -> Vec<String> {
        self.entities
            .iter()
            .map(|e| e.domain().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Tool declarations advertised in the session setup.
    ///
    /// With a non-empty directory the `entity_id` and `domain` parameters are
    /// restricted to known values.
    pub fn function_declarations(&self) -> Vec<FunctionDeclaration> {
        let mut entity_id = json!({
            "type": "STRING",
            "description": "Entity id in domain.object_id form, e.g. light.kitchen"
        });
        let mut domain = json!({
            "type": "STRING",
            "description": "Service domain, e.g. light, switch, climate"
        });
        if !self.is_empty() {
            let ids: Vec<&str> = self.entities.iter().map(|e| e.entity_id.as_str()).collect();
            entity_id["enum"] = json!(ids);
            domain["enum"] = json!(self.domains());
        }

        vec![
            FunctionDeclaration {
                name: CONTROL_DEVICE_TOOL.to_string(),
                description: "Control a smart-home device by calling a service on it \
                              (turn_on, turn_off, toggle, set_temperature, ...)."
                    .to_string(),
                parameters: json!({
                    "type": "OBJECT",
                    "properties": {
                        "domain": domain,
                        "service": {
                            "type": "STRING",
                            "description": "Service to call, e.g. turn_on"
                        },
                        "entity_id": entity_id,
                        "service_data": {
                            "type": "OBJECT",
                            "description": "Optional extra fields such as brightness_pct or temperature"
                        }
                    },
                    "required": ["domain", "service", "entity_id"]
                }),
            },
            FunctionDeclaration {
                name: GET_STATE_TOOL.to_string(),
                description: "Read the current state and attributes of a smart-home device."
                    .to_string(),
                parameters: json!({
                    "type": "OBJECT",
                    "properties": { "entity_id": entity_id },
                    "required": ["entity_id"]
                }),
            },
        ]
    }

    /// Declarations wrapped as the single tool group of a session.
    pub fn tools(&self) -> Vec<Tool> {
        vec![Tool {
            function_declarations: self.function_declarations(),
        }]
    }

    /// Device list grouped by area, appended to the system instructions.
    pub fn context_block(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        let mut areas: BTreeMap<&str, Vec<&EntityInfo>> = BTreeMap::new();
        for entity in &self.entities {
            areas
                .entry(entity.area.as_deref().unwrap_or("Other"))
                .or_default()
                .push(entity);
        }

        let mut block = String::from("Known devices:\n");
        for (area, entities) in areas {
            block.push_str(&format!("{area}:\n"));
            for entity in entities {
                block.push_str(&format!(
                    "- {} ({})",
                    entity.display_name(),
                    entity.entity_id
                ));
                if !entity.capabilities.is_empty() {
                    block.push_str(&format!(" [{}]", entity.capabilities.join(", ")));
                }
                block.push('\n');
            }
        }
        block
    }

    /// System instructions with the device list appended.
    pub fn instructions(&self, base: &str) -> String {
        let block = self.context_block();
        if block.is_empty() {
            base.to_string()
        } else if base.is_empty() {
            block
        } else {
            format!("{base}\n\n{block}")
        }
    }
}
