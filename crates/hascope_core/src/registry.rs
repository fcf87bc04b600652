//! Entity registry.
//!
//! Loads the known entity-id vocabulary from the `.storage` registry file,
//! falling back to the live API when the file is unreadable. The vocabulary
//! feeds error-message reference extraction; friendly names feed the
//! presentation layer.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::api::LiveApi;
use crate::error::CoreResult;

const ENTITY_REGISTRY_FILE: &str = "core.entity_registry";

/// One registry entry; only the fields the core consumes.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryEntry {
    pub entity_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub original_name: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StorageEnvelope {
    data: StorageData,
}

#[derive(Debug, Deserialize)]
struct StorageData {
    #[serde(default)]
    entities: Vec<RegistryEntry>,
}

/// In-memory view of the entity registry.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    entries: BTreeMap<String, RegistryEntry>,
}

impl EntityRegistry {
    /// Path of the registry file under a HA config directory.
    pub fn storage_path(ha_config_path: &Path) -> PathBuf {
        ha_config_path.join(".storage").join(ENTITY_REGISTRY_FILE)
    }

    /// Load from the storage file, or fall back to seeding the vocabulary
    /// from the live API's current states. An empty registry is a valid
    /// outcome; reference extraction simply finds nothing.
    pub async fn load(ha_config_path: &Path, fallback_api: Option<&LiveApi>) -> EntityRegistry {
        let path = Self::storage_path(ha_config_path);
        match Self::load_file(&path) {
            Ok(registry) => {
                debug!("loaded {} registry entries from {}", registry.len(), path.display());
                return registry;
            }
            Err(e) => warn!("could not load entity registry {}: {}", path.display(), e),
        }

        if let Some(api) = fallback_api {
            match Self::load_from_api(api).await {
                Ok(registry) => {
                    debug!("seeded {} registry entries from live API", registry.len());
                    return registry;
                }
                Err(e) => warn!("could not seed registry from API: {}", e),
            }
        }

        EntityRegistry::default()
    }

    fn load_file(path: &Path) -> anyhow::Result<EntityRegistry> {
        let text = std::fs::read_to_string(path)?;
        let envelope: StorageEnvelope = serde_json::from_str(&text)?;
        Ok(Self::from_entries(envelope.data.entities))
    }

    async fn load_from_api(api: &LiveApi) -> CoreResult<EntityRegistry> {
        let states = api.states().await?;
        let entries = states
            .into_iter()
            .map(|record| {
                let name = record
                    .attributes
                    .get("friendly_name")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());
                RegistryEntry {
                    entity_id: record.entity_id,
                    name,
                    original_name: None,
                    platform: None,
                }
            })
            .collect();
        Ok(Self::from_entries(entries))
    }

    pub fn from_entries(entries: Vec<RegistryEntry>) -> EntityRegistry {
        let entries = entries
            .into_iter()
            .filter(|e| e.entity_id.contains('.'))
            .map(|e| (e.entity_id.clone(), e))
            .collect();
        EntityRegistry { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The known entity-id vocabulary (domain.object_id shape).
    pub fn vocabulary(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Friendly name for an entity: name, then original name, then the id
    /// itself.
    pub fn friendly_name<'a>(&'a self, entity_id: &'a str) -> &'a str {
        self.entries
            .get(entity_id)
            .and_then(|e| e.name.as_deref().or(e.original_name.as_deref()))
            .unwrap_or(entity_id)
    }
}
